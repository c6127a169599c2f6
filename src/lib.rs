//! Toolgate - an HTTP gateway in front of local AI tool backends
//!
//! This library provides a small gateway that:
//! - Exposes summarize, idea generation, description and PDF routes
//! - Forwards each request to one backend service over HTTP
//! - Streams PDF responses through without buffering them
//! - Launches the backend scripts as child processes and logs their output

pub mod client;
pub mod config;
pub mod cors;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod logging;
pub mod supervisor;
pub mod text;
