// Shared helpers for integration tests.
//
// Writes provisioning configuration into a temporary directory so each test
// loads a real file through the same path the binary uses.
//
// Used by all integration test binaries that declare `mod common;`.
#![allow(dead_code)]

use std::path::{Path, PathBuf};

use oradock_provision::config::Config;

/// The four sections every configuration must carry.
pub const MINIMAL_TOML: &str = r#"
[backup]
directory = "/backup"
device = "/dev/sdb"

[data]
directory = "/data"
device = "/dev/sdc"

[runtime]
version = "3.5.1"
root_path = "/root/.pyenv"
default_modules = ["boto", "docopt"]
extra_module = "docker-py"
extra_module_version = "1.9.0"

[packages]
install = ["wget.x86_64", "git.x86_64"]
"#;

/// The sample configuration shipped with the crate.
pub fn shipped_config_path() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("conf/provision.toml")
}

/// A configuration file inside a [`tempfile::TempDir`].
///
/// The directory is deleted when dropped.
pub struct ConfigFile {
    /// Temporary directory holding the file.
    pub root: tempfile::TempDir,
    /// Path of the written file.
    pub path: PathBuf,
}

impl ConfigFile {
    /// Write `content` to `provision.toml` in a fresh temporary directory.
    pub fn new(content: &str) -> Self {
        let root = tempfile::tempdir().expect("create temp dir");
        let path = root.path().join("provision.toml");
        std::fs::write(&path, content).expect("write provision.toml");
        Self { root, path }
    }

    /// [`MINIMAL_TOML`] followed by `extra`.
    pub fn minimal_with(extra: &str) -> Self {
        Self::new(&format!("{MINIMAL_TOML}\n{extra}"))
    }

    /// Load and validate the file.
    pub fn load(&self) -> Config {
        Config::load(&self.path).expect("load config")
    }
}
