//! Testing utilities for codeflow
//!
//! `MockServer` stands in for an OAuth2 authorization server: register
//! expectations for token requests, point a client's token URL at
//! [`MockServer::url`], and inspect what the client sent.

pub mod expectation;
pub mod matcher;
pub mod server;

pub use expectation::{Expectation, MockResponse, Times};
pub use matcher::{parse_form, RequestMatcher};
pub use server::{MockServer, RecordedRequest};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install a test-friendly tracing subscriber, once per process.
///
/// Honors `RUST_LOG`, defaulting to `codeflow=debug`.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,codeflow=debug")),
        )
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}
