//! Configuration loading
//!
//! Loads [`ToolmeshConfig`](toolmesh_domain::ToolmeshConfig) from files and
//! environment variables.

pub mod loader;

// Re-export commonly used items
pub use loader::{
    apply_env_overrides, load, load_from_file, load_with_prefix, probe_config_paths, ENV_PREFIX,
};
