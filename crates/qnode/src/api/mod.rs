//! Outer API surfaces

mod http;

pub use http::HttpApi;
