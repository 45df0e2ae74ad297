//! TOML deserialization of the raw provisioning settings.
//!
//! Required keys are modelled as `Option` so that their absence surfaces as
//! [`ConfigError::MissingKey`] with the dotted key name rather than a generic
//! serde message.  Optional groups fall back to the stock oradock layout.
use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;

/// Read and deserialize a configuration file.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] if the file cannot be read and
/// [`ConfigError::Parse`] if it is not valid TOML for [`RawConfig`].
pub fn load_file(path: &Path) -> Result<RawConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse(&content, &path.display().to_string())
}

/// Deserialize configuration from an in-memory TOML document.
///
/// # Errors
///
/// Returns [`ConfigError::Parse`] on syntax errors, type mismatches or
/// unknown keys.
pub fn parse(content: &str, source: &str) -> Result<RawConfig, ConfigError> {
    toml::from_str(content).map_err(|e| ConfigError::Parse {
        file: source.to_string(),
        message: e.message().to_string(),
    })
}

/// Top-level document.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfig {
    pub backup: Option<RawMount>,
    pub data: Option<RawMount>,
    pub runtime: Option<RawRuntime>,
    pub packages: Option<RawPackages>,
    #[serde(default)]
    pub filesystem: RawFilesystem,
    #[serde(default)]
    pub container: RawContainer,
    #[serde(default)]
    pub version_manager: RawVersionManager,
    #[serde(default)]
    pub source: RawSource,
    #[serde(default)]
    pub kernel: RawKernel,
    #[serde(default)]
    pub policy: RawPolicy,
}

/// `[backup]` / `[data]`.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawMount {
    pub directory: Option<String>,
    pub device: Option<String>,
}

/// `[runtime]`.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawRuntime {
    pub version: Option<String>,
    pub root_path: Option<String>,
    pub default_modules: Option<Vec<String>>,
    pub extra_module: Option<String>,
    pub extra_module_version: Option<String>,
}

/// `[packages]`.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawPackages {
    pub install: Option<Vec<String>>,
}

/// `[filesystem]`.
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RawFilesystem {
    pub fstype: String,
    pub owner: String,
    pub group: String,
    pub mode: String,
    pub force: bool,
    pub enable: bool,
    pub fstab: String,
    pub options: String,
}

impl Default for RawFilesystem {
    fn default() -> Self {
        Self {
            fstype: "xfs".to_string(),
            owner: "root".to_string(),
            group: "root".to_string(),
            mode: "775".to_string(),
            force: false,
            enable: true,
            fstab: "/etc/fstab".to_string(),
            options: "defaults".to_string(),
        }
    }
}

/// `[container]`.
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RawContainer {
    pub install_script: String,
    pub script_sha256: Option<String>,
    pub service: String,
    pub binary: String,
}

impl Default for RawContainer {
    fn default() -> Self {
        Self {
            install_script: "https://get.docker.com/".to_string(),
            script_sha256: None,
            service: "docker".to_string(),
            binary: "docker".to_string(),
        }
    }
}

/// `[version_manager]`.
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RawVersionManager {
    pub repository: String,
    pub branch: String,
    pub profile: String,
    pub init_lines: Vec<String>,
}

impl Default for RawVersionManager {
    fn default() -> Self {
        Self {
            repository: "https://github.com/yyuu/pyenv.git".to_string(),
            branch: "master".to_string(),
            profile: "/root/.bash_profile".to_string(),
            init_lines: vec![
                r#"export PYENV_ROOT="$HOME/.pyenv""#.to_string(),
                r#"export PATH="$PYENV_ROOT/bin:$PATH""#.to_string(),
                r#"eval "$(pyenv init -)""#.to_string(),
            ],
        }
    }
}

/// `[source]`.
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RawSource {
    pub repository: String,
    pub directory: String,
    pub branch: String,
}

impl Default for RawSource {
    fn default() -> Self {
        Self {
            repository: "https://github.com/rafaelmariotti/oradock.git".to_string(),
            directory: "/opt/oradock".to_string(),
            branch: "master".to_string(),
        }
    }
}

/// `[kernel]`.
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RawKernel {
    pub file: String,
    pub header: String,
    pub parameters: Vec<String>,
    pub reload: bool,
}

impl Default for RawKernel {
    fn default() -> Self {
        Self {
            file: "/etc/sysctl.conf".to_string(),
            header: "# oradock settings".to_string(),
            parameters: vec![
                "net.ipv4.ip_forward = 1".to_string(),
                "net.core.rmem_default = 16777216".to_string(),
                "net.core.rmem_max = 67108864".to_string(),
                "net.core.wmem_default = 16777216".to_string(),
                "net.core.wmem_max = 67108864".to_string(),
            ],
            reload: true,
        }
    }
}

/// `[policy]`.
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RawPolicy {
    pub continue_on_error: bool,
    pub optional_steps: Vec<String>,
    pub step_timeout_secs: Option<u64>,
    pub verify: bool,
}

impl Default for RawPolicy {
    fn default() -> Self {
        Self {
            continue_on_error: false,
            optional_steps: Vec::new(),
            step_timeout_secs: None,
            verify: true,
        }
    }
}
