//! Integration tests for Nuru
//!
//! These drive the assembled server over a loopback socket and check how
//! sessions, prioritization and streaming interact.

#[path = "common/mod.rs"]
mod common;

#[path = "integration/multi_session.rs"]
mod multi_session;
#[path = "integration/range_validation.rs"]
mod range_validation;
