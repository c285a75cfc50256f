//! Configuration loader
//!
//! Builds a [`ToolmeshConfig`] from defaults, an optional file and
//! environment overrides, then validates it.
//!
//! ## Loading Strategy
//! 1. Load `.env` from the working directory if present
//! 2. Read `{PREFIX}_CONFIG` if set, otherwise probe the standard paths
//! 3. Fall back to built-in defaults when no file exists
//! 4. Apply environment overrides on top
//! 5. Validate the result
//!
//! ## Environment Variables
//! - `TOOLMESH_CONFIG`: Path to a `.toml` or `.json` config file
//! - `TOOLMESH_BASE_URL`: Tool API base URL
//! - `TOOLMESH_API_KEY`: Bearer token for the tool API
//! - `TOOLMESH_TENANT_ID`: Default tenant
//! - `TOOLMESH_TIMEOUT_MS`: Request timeout in milliseconds
//! - `TOOLMESH_MAX_RETRIES`: Retry attempts per request
//! - `TOOLMESH_LOG_LEVEL`: Default `EnvFilter` directive
//! - `TOOLMESH_LOG_JSON`: Emit JSON logs (true/false)
//!
//! ## File Locations
//! The loader probes, in order, `./toolmesh.{toml,json}`,
//! `./config.{toml,json}` and the same names next to the executable.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use toolmesh_domain::{Result, ToolmeshConfig, ToolmeshError};

/// Prefix used by [`load`]
pub const ENV_PREFIX: &str = "TOOLMESH";

/// Load configuration with the default `TOOLMESH_` prefix
///
/// # Errors
/// Returns `ToolmeshError::Config` if the file cannot be read or parsed,
/// an override is malformed, or the merged config fails validation.
pub fn load() -> Result<ToolmeshConfig> {
    load_with_prefix(ENV_PREFIX)
}

/// Load configuration reading overrides from `{prefix}_*` variables
pub fn load_with_prefix(prefix: &str) -> Result<ToolmeshConfig> {
    if let Ok(path) = dotenvy::dotenv() {
        tracing::debug!(path = %path.display(), "Loaded .env file");
    }

    let explicit = env_var(&format!("{prefix}_CONFIG")).map(PathBuf::from);
    let mut config = match explicit.or_else(probe_config_paths) {
        Some(path) => load_from_file(Some(path))?,
        None => {
            tracing::debug!("No config file found, using defaults");
            ToolmeshConfig::default()
        }
    };

    apply_env_overrides(&mut config, prefix)?;
    validate(&config)?;

    tracing::info!(
        base_url = %config.client.base_url,
        tenant_id = %config.client.tenant_id,
        "Configuration loaded"
    );
    Ok(config)
}

/// Load configuration from a file
///
/// If `path` is `None`, probes the standard locations. Format is detected
/// by extension. The result is not validated.
///
/// # Errors
/// Returns `ToolmeshError::Config` if:
/// - File not found (when path is specified)
/// - No config file found (when path is `None`)
/// - File format is invalid
pub fn load_from_file(path: Option<PathBuf>) -> Result<ToolmeshConfig> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(ToolmeshError::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            p
        }
        None => probe_config_paths().ok_or_else(|| {
            ToolmeshError::Config("No config file found in any of the standard locations".into())
        })?,
    };

    tracing::info!(path = %config_path.display(), "Loading configuration from file");

    let contents = std::fs::read_to_string(&config_path).map_err(|e| {
        ToolmeshError::Config(format!("Failed to read {}: {}", config_path.display(), e))
    })?;

    parse_config(&contents, &config_path)
}

fn parse_config(contents: &str, path: &Path) -> Result<ToolmeshConfig> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match extension {
        "toml" => toml::from_str(contents)
            .map_err(|e| ToolmeshError::Config(format!("Invalid TOML format: {}", e))),
        "json" => serde_json::from_str(contents)
            .map_err(|e| ToolmeshError::Config(format!("Invalid JSON format: {}", e))),
        _ => Err(ToolmeshError::Config(format!("Unsupported config format: {}", extension))),
    }
}

/// Probe the standard locations for a config file
///
/// # Returns
/// The first config file found, or `None` if no file exists.
pub fn probe_config_paths() -> Option<PathBuf> {
    const NAMES: [&str; 4] = ["toolmesh.toml", "toolmesh.json", "config.toml", "config.json"];

    let mut dirs = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        dirs.push(cwd);
    }
    if let Some(exe_dir) =
        std::env::current_exe().ok().and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        dirs.push(exe_dir);
    }

    dirs.iter()
        .flat_map(|dir| NAMES.iter().map(move |name| dir.join(name)))
        .find(|path| path.exists())
}

/// Apply `{prefix}_*` environment overrides to `config`
///
/// # Errors
/// Returns `ToolmeshError::Config` if a numeric variable does not parse.
pub fn apply_env_overrides(config: &mut ToolmeshConfig, prefix: &str) -> Result<()> {
    let key = |name: &str| format!("{prefix}_{name}");

    if let Some(base_url) = env_var(&key("BASE_URL")) {
        config.client.base_url = base_url;
    }
    if let Some(api_key) = env_var(&key("API_KEY")) {
        config.client.api_key = api_key;
    }
    if let Some(tenant_id) = env_var(&key("TENANT_ID")) {
        config.client.tenant_id = tenant_id;
    }
    if let Some(timeout_ms) = env_parse::<u64>(&key("TIMEOUT_MS"))? {
        config.client.timeout = Duration::from_millis(timeout_ms);
    }
    if let Some(max_retries) = env_parse::<u32>(&key("MAX_RETRIES"))? {
        config.client.max_retries = max_retries;
    }
    if let Some(level) = env_var(&key("LOG_LEVEL")) {
        config.logging.level = level;
    }
    config.logging.json = env_bool(&key("LOG_JSON"), config.logging.json);

    Ok(())
}

/// Section checks plus a full URL parse of the base URL
fn validate(config: &ToolmeshConfig) -> Result<()> {
    config.validate()?;
    url::Url::parse(config.client.base_url.trim()).map_err(|e| {
        ToolmeshError::Config(format!("client.base_url '{}' is invalid: {}", config.client.base_url, e))
    })?;
    Ok(())
}

/// Non-empty environment variable
fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    env_var(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| ToolmeshError::Config(format!("Invalid value for {}: {}", key, e)))
        })
        .transpose()
}

/// Parse boolean from environment variable
///
/// Accepts: `1`/`0`, `true`/`false`, `yes`/`no`, `on`/`off` (case-insensitive)
fn env_bool(key: &str, default: bool) -> bool {
    env_var(key)
        .map(|s| matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::Mutex;

    use tempfile::NamedTempFile;

    use super::*;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn write_config(suffix: &str, contents: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_env_bool_parsing() {
        let _guard = ENV_LOCK.lock().expect("env mutex poisoned");

        for (key, value) in [("TMB_ONE", "1"), ("TMB_TRUE", "TRUE"), ("TMB_YES", "yes"), ("TMB_ON", "on")]
        {
            std::env::set_var(key, value);
            assert!(env_bool(key, false), "{value} should parse as true");
            std::env::remove_var(key);
        }
        for (key, value) in [("TMB_ZERO", "0"), ("TMB_FALSE", "false"), ("TMB_OFF", "off")] {
            std::env::set_var(key, value);
            assert!(!env_bool(key, true), "{value} should parse as false");
            std::env::remove_var(key);
        }

        std::env::remove_var("TMB_MISSING");
        assert!(env_bool("TMB_MISSING", true));
        assert!(!env_bool("TMB_MISSING", false));
    }

    /// Validates TOML loading with environment overrides.
    ///
    /// Assertions:
    /// - File values are applied.
    /// - Environment variables win over the file.
    /// - Untouched sections keep their defaults.
    #[test]
    fn test_load_toml_with_env_overrides() {
        let _guard = ENV_LOCK.lock().expect("env mutex poisoned");
        let file = write_config(
            ".toml",
            r#"
            [client]
            base_url = "https://file.example.com"
            tenant_id = "from-file"
            max_retries = 1

            [logging]
            level = "debug"
            "#,
        );

        std::env::set_var("TMLOAD_CONFIG", file.path());
        std::env::set_var("TMLOAD_TENANT_ID", "from-env");
        std::env::set_var("TMLOAD_TIMEOUT_MS", "2500");
        std::env::set_var("TMLOAD_LOG_JSON", "yes");

        let config = load_with_prefix("TMLOAD").unwrap();

        assert_eq!(config.client.base_url, "https://file.example.com");
        assert_eq!(config.client.tenant_id, "from-env");
        assert_eq!(config.client.max_retries, 1);
        assert_eq!(config.client.timeout, Duration::from_millis(2500));
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);
        assert_eq!(config.batch, toolmesh_domain::BatchConfig::default());

        for name in ["CONFIG", "TENANT_ID", "TIMEOUT_MS", "LOG_JSON"] {
            std::env::remove_var(format!("TMLOAD_{name}"));
        }
    }

    #[test]
    fn test_load_from_file_json() {
        let file = write_config(
            ".json",
            r#"{"client": {"base_url": "https://json.example.com", "timeout": 1500},
                "batch": {"workers": 2}}"#,
        );

        let config = load_from_file(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(config.client.base_url, "https://json.example.com");
        assert_eq!(config.client.timeout, Duration::from_millis(1500));
        assert_eq!(config.batch.workers, 2);
    }

    #[test]
    fn test_invalid_numeric_override() {
        let _guard = ENV_LOCK.lock().expect("env mutex poisoned");
        std::env::set_var("TMBAD_MAX_RETRIES", "lots");

        let mut config = ToolmeshConfig::default();
        let err = apply_env_overrides(&mut config, "TMBAD").unwrap_err();
        assert!(matches!(err, ToolmeshError::Config(ref msg) if msg.contains("TMBAD_MAX_RETRIES")));

        std::env::remove_var("TMBAD_MAX_RETRIES");
    }

    /// Validates that the merged config is validated.
    ///
    /// Assertions:
    /// - A base URL override that is not http(s) is rejected.
    #[test]
    fn test_invalid_override_fails_validation() {
        let _guard = ENV_LOCK.lock().expect("env mutex poisoned");
        let file = write_config(".toml", "[client]\nbase_url = \"https://ok.example.com\"\n");
        std::env::set_var("TMURL_CONFIG", file.path());
        std::env::set_var("TMURL_BASE_URL", "not a url");

        let result = load_with_prefix("TMURL");
        assert!(matches!(result, Err(ToolmeshError::Config(_))));

        std::env::remove_var("TMURL_CONFIG");
        std::env::remove_var("TMURL_BASE_URL");
    }

    #[test]
    fn test_missing_and_unsupported_files() {
        let missing = load_from_file(Some(PathBuf::from("/nonexistent/toolmesh.toml")));
        assert!(matches!(missing, Err(ToolmeshError::Config(ref msg)) if msg.contains("not found")));

        let file = write_config(".yaml", "client: {}");
        let unsupported = load_from_file(Some(file.path().to_path_buf()));
        assert!(matches!(unsupported, Err(ToolmeshError::Config(ref msg)) if msg.contains("Unsupported")));
    }

    #[test]
    fn test_malformed_toml() {
        let file = write_config(".toml", "[client\nbase_url = ");
        let result = load_from_file(Some(file.path().to_path_buf()));
        assert!(matches!(result, Err(ToolmeshError::Config(ref msg)) if msg.contains("TOML")));
    }
}
