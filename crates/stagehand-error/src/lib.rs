//! Common error types for stagehand.
//!
//! Every crate in the workspace defines its own error enum and wraps
//! [`CommonError`] for the failure modes they all share: I/O, missing
//! records, integrity violations, timeouts and cancellation.
//!
//! ```rust
//! use stagehand_error::CommonError;
//!
//! fn lookup(id: &str) -> Result<(), CommonError> {
//!     Err(CommonError::not_found(format!("artifact {id}")))
//! }
//! ```

mod common;

pub use common::CommonError;

/// Result type alias using `CommonError`.
pub type Result<T> = std::result::Result<T, CommonError>;
