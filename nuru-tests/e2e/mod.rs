//! End-to-end tests: a real server on a loopback socket driven over HTTP.

#[path = "../common/mod.rs"]
mod common;

mod server_lifecycle;
mod streaming_workflow;
