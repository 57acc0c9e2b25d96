pub mod api;
pub mod job;
pub mod payload;
pub mod photo;
