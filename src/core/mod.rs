//! Core Infrastructure
//!
//! HTTP transport boundary used by the request executor.

pub mod transport;

pub use transport::{
    HttpMethod, HttpRequest, HttpResponse, HttpTransport, MockHttpTransport, ReqwestHttpTransport,
};
