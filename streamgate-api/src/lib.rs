//! HTTP surface of the streamgate edge

pub mod http;

pub use http::{create_router, AppState};
