//! Guest Photo Match Client
//!
//! This library provides the core functionality for the guest-match client,
//! which submits an event guest's selfie to the face-matching backend and
//! tracks the resulting job over a push channel and a polling fallback until
//! it resolves to the guest's matched photos.

pub mod config;
pub mod models;
pub mod services;
