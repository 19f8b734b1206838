//! Typed remote operations over HTTP.

pub mod client;
pub mod operations;
pub mod transport;
pub mod types;

pub use client::ApiClient;
pub use transport::{HttpTransport, Transport, TransportError};
