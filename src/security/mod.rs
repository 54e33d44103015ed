//! Local trust boundary for i18ntk.
//!
//! See [`i18ntk`] for the module overview, architecture diagram,
//! and public API documentation.

mod audit;
mod auth;
mod credential;
mod error;
mod i18ntk;
mod lockout;
mod safe_fs;
mod sandbox;
mod sanitize;
mod session;

// The i18ntk.rs facade controls the entire public API surface.
pub use self::i18ntk::*;
