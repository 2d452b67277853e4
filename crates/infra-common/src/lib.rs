//! # Infra-Common - shared plumbing for the sigstack crates
//!
//! Everything in here is protocol-agnostic:
//!
//! - [`errors`] - the infrastructure error type plus [`ErrorContext`] helpers
//!   for tagging an error with the component and operation that produced it
//! - [`logging`] - `tracing-subscriber` setup driven by [`LoggingConfig`]
//! - [`config`] - loading `serde` configuration values from TOML

pub mod config;
pub mod errors;
pub mod logging;

pub use config::{load_toml, parse_toml};
pub use errors::{Error, ErrorContext, ErrorExt, Result};
pub use logging::{parse_log_level, setup_logging, LoggingConfig};
