//! HTTP plumbing
//!
//! Client used by the `http` test kind and by driver/agent communication.

mod client;
mod retry;

pub use client::{HttpClient, HttpError, HttpRequest, HttpResponse};
pub use retry::RetryPolicy;
