//! # Toolmesh Domain
//!
//! Data types shared by every toolmesh crate.
//!
//! This crate contains:
//! - Tool catalog and execution types exchanged with the remote API
//! - Configuration structures with their defaults
//! - The top-level error type and Result alias
//! - Wire constants (paths, headers)
//!
//! ## Architecture
//! - Depends only on the foundation tier of `toolmesh-common`
//! - No I/O, no async

pub mod config;
pub mod constants;
pub mod errors;
pub mod types;

// Re-export commonly used items
pub use config::*;
pub use errors::*;
pub use types::*;
