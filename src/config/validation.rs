//! Field-level validation for configuration values.
//!
//! Hard problems become [`ConfigError`]s and abort loading; soft problems
//! become [`ValidationWarning`]s which the command layer logs.
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use super::Config;
use crate::error::ConfigError;
use crate::host::dependency::normalize_name;
use crate::steps::Plan;

/// Minimum length for octal mode strings.
const OCTAL_MODE_MIN_LEN: usize = 3;

/// Maximum length for octal mode strings.
const OCTAL_MODE_MAX_LEN: usize = 4;

/// URL schemes accepted for git and download sources.
const URL_SCHEMES: &[&str] = &["https://", "http://", "git://", "ssh://", "file://"];

/// A validation warning detected during configuration loading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationWarning {
    /// The dotted key the warning refers to (e.g. `packages.install`).
    pub key: String,
    /// The specific item that triggered the warning.
    pub item: String,
    /// Human-readable warning message.
    pub message: String,
}

impl ValidationWarning {
    /// Create a new warning.
    #[must_use]
    pub fn new(key: impl Into<String>, item: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            item: item.into(),
            message: message.into(),
        }
    }
}

fn invalid(key: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        reason: reason.into(),
    }
}

/// Unwrap a required string, rejecting absent and blank values.
pub(super) fn require(value: Option<String>, key: &str) -> Result<String, ConfigError> {
    let value = value.ok_or_else(|| ConfigError::MissingKey(key.to_string()))?;
    non_empty(value, key)
}

/// Reject blank strings, returning the trimmed value.
pub(super) fn non_empty(value: String, key: &str) -> Result<String, ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::EmptyValue(key.to_string()));
    }
    Ok(trimmed.to_string())
}

/// Require an absolute path other than `/`.
pub(super) fn absolute_path(value: String, key: &str) -> Result<PathBuf, ConfigError> {
    let value = non_empty(value, key)?;
    let path = PathBuf::from(&value);
    if !path.is_absolute() {
        return Err(invalid(key, format!("'{value}' is not an absolute path")));
    }
    if path == Path::new("/") {
        return Err(invalid(key, "must not be the filesystem root"));
    }
    Ok(path)
}

/// Require a single token without whitespace (versions, package names).
pub(super) fn token(value: String, key: &str) -> Result<String, ConfigError> {
    let value = non_empty(value, key)?;
    if value.chars().any(char::is_whitespace) {
        return Err(invalid(key, format!("'{value}' must not contain whitespace")));
    }
    Ok(value)
}

/// Require a non-empty list of tokens.
pub(super) fn token_list(values: Option<Vec<String>>, key: &str) -> Result<Vec<String>, ConfigError> {
    let values = values.ok_or_else(|| ConfigError::MissingKey(key.to_string()))?;
    if values.is_empty() {
        return Err(ConfigError::EmptyValue(key.to_string()));
    }
    values.into_iter().map(|v| token(v, key)).collect()
}

/// Parse an octal permission string such as `775` or `0755`.
pub(super) fn octal_mode(value: &str, key: &str) -> Result<u32, ConfigError> {
    let len = value.len();
    if !(OCTAL_MODE_MIN_LEN..=OCTAL_MODE_MAX_LEN).contains(&len)
        || !value.chars().all(|c| c.is_digit(8))
    {
        return Err(invalid(key, format!("'{value}' is not an octal mode")));
    }
    u32::from_str_radix(value, 8).map_err(|e| invalid(key, e.to_string()))
}

/// Require a URL with a supported scheme, or scp-like `git@host:path`.
pub(super) fn url(value: String, key: &str) -> Result<String, ConfigError> {
    let value = token(value, key)?;
    let scp_like = value.starts_with("git@") && value.contains(':');
    if scp_like || URL_SCHEMES.iter().any(|s| value.starts_with(s)) {
        Ok(value)
    } else {
        Err(invalid(key, format!("'{value}' is not a supported URL")))
    }
}

/// Require a lowercase hex SHA-256 digest.
pub(super) fn sha256(value: String, key: &str) -> Result<String, ConfigError> {
    let value = non_empty(value, key)?.to_ascii_lowercase();
    if value.len() != 64 || !value.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(invalid(key, "expected 64 hex characters"));
    }
    Ok(value)
}

/// Require `key = value` kernel parameter lines.
pub(super) fn kernel_parameter(value: String, key: &str) -> Result<String, ConfigError> {
    let value = non_empty(value, key)?;
    match value.split_once('=') {
        Some((name, setting))
            if !name.trim().is_empty()
                && !setting.trim().is_empty()
                && !name.trim().contains(char::is_whitespace) =>
        {
            Ok(value)
        }
        _ => Err(invalid(key, format!("'{value}' is not a 'key = value' line"))),
    }
}

/// Reject configurations whose two mounts collide.
pub(super) fn distinct_mounts(config: &Config) -> Result<(), ConfigError> {
    if config.backup.device == config.data.device {
        return Err(invalid(
            "data.device",
            format!("{} is also used for backup", config.data.device.display()),
        ));
    }
    if config.backup.directory == config.data.directory {
        return Err(invalid(
            "data.directory",
            format!("{} is also used for backup", config.data.directory.display()),
        ));
    }
    Ok(())
}

/// Collect duplicated entries of `items` as warnings for `key`.
fn duplicates<'a>(key: &str, items: impl IntoIterator<Item = &'a String>) -> Vec<ValidationWarning> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| !seen.insert(item.to_ascii_lowercase()))
        .map(|item| ValidationWarning::new(key, item, "listed more than once"))
        .collect()
}

/// Soft checks over a fully loaded configuration.
pub(super) fn warnings(config: &Config) -> Vec<ValidationWarning> {
    let mut warnings = duplicates("packages.install", &config.packages);
    warnings.extend(duplicates("runtime.default_modules", &config.runtime.default_modules));
    warnings.extend(duplicates("kernel.parameters", &config.kernel.parameters));

    let extra = normalize_name(&config.runtime.extra_module);
    if config
        .runtime
        .default_modules
        .iter()
        .any(|m| normalize_name(m) == extra)
    {
        warnings.push(ValidationWarning::new(
            "runtime.extra_module",
            &config.runtime.extra_module,
            "also listed in default_modules; the pinned version wins",
        ));
    }

    let plan = Plan::standard();
    let steps = plan.names();
    warnings.extend(
        config
            .policy
            .optional_steps
            .iter()
            .filter(|name| !steps.contains(&name.as_str()))
            .map(|name| {
                ValidationWarning::new("policy.optional_steps", name, "no step has this name")
            }),
    );

    if config.filesystem.force {
        warnings.push(ValidationWarning::new(
            "filesystem.force",
            "true",
            "devices holding a different filesystem will be reformatted",
        ));
    }

    if config.container.script_sha256.is_none() {
        warnings.push(ValidationWarning::new(
            "container.script_sha256",
            &config.container.install_script,
            "install script will run without checksum verification",
        ));
    }

    warnings
}
