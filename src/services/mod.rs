pub mod api_client;
pub mod capture;
pub mod downloads;
pub mod normalizer;
pub mod orchestrator;
pub mod sse;
pub mod transport;
