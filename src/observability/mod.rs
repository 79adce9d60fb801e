//! Observability for sessions and the publisher binary
//!
//! Structured logging through `tracing`, with span macros for session and
//! publish scopes.

pub mod logging;

pub use logging::{init_default_logging, init_default_logging_with, init_logging, LogFormat};

// Span macros for structured logging
pub use logging::{publish_span, session_span};
