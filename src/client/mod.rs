//! HTTP client surface

pub mod http;

pub use http::{ConnectionStatus, HttpClient};
