//! i18ntk - translation file toolkit
//!
//! This crate provides the local trust boundary the toolkit runs inside:
//! - Path sandbox and safe file operations confined to a project root
//! - Input and config sanitization against allow-lists
//! - Admin PIN storage, lockout and session management
//! - Opt-in hash-chained security event log

pub mod cli;
pub mod concurrency;
pub mod config;
pub mod paths;
pub mod security;

pub use config::Config;
