//! Host platform detection: distribution, init system and package tool.
use std::fmt;
use std::path::Path;

/// Service supervisor running on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitSystem {
    /// systemd (`systemctl`).
    Systemd,
    /// SysV init scripts (`service`), as on Amazon Linux 1.
    SysV,
}

impl fmt::Display for InitSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Systemd => write!(f, "systemd"),
            Self::SysV => write!(f, "sysv"),
        }
    }
}

/// Platform information for the current system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    /// `ID` from `/etc/os-release` (e.g. `amzn`), or `linux` when unknown.
    pub distro: String,
    /// `VERSION_ID` from `/etc/os-release`, if present.
    pub version: Option<String>,
    /// Detected init system.
    pub init: InitSystem,
    /// Whether `dnf` should be preferred over `yum`.
    pub has_dnf: bool,
}

impl Platform {
    /// Detect the current platform.
    #[must_use]
    pub fn detect() -> Self {
        let os_release = std::fs::read_to_string("/etc/os-release").unwrap_or_default();
        let init = if Path::new("/run/systemd/system").exists() {
            InitSystem::Systemd
        } else {
            InitSystem::SysV
        };
        Self::from_os_release(&os_release, init, which::which("dnf").is_ok())
    }

    /// Build a platform from the contents of an `os-release` file.
    #[must_use]
    pub fn from_os_release(contents: &str, init: InitSystem, has_dnf: bool) -> Self {
        let field = |name: &str| {
            contents.lines().find_map(|line| {
                line.strip_prefix(name)
                    .and_then(|rest| rest.strip_prefix('='))
                    .map(|v| v.trim().trim_matches('"').to_string())
                    .filter(|v| !v.is_empty())
            })
        };
        Self {
            distro: field("ID").unwrap_or_else(|| "linux".to_string()),
            version: field("VERSION_ID"),
            init,
            has_dnf,
        }
    }

    /// Package tool used for installs (`dnf` or `yum`).
    #[must_use]
    pub const fn package_tool(&self) -> &'static str {
        if self.has_dnf { "dnf" } else { "yum" }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(v) => write!(f, "{} {v} ({})", self.distro, self.init),
            None => write!(f, "{} ({})", self.distro, self.init),
        }
    }
}
