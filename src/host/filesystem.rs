//! Mount table inspection, filesystem probing, formatting and mounting.
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, Result};

use crate::config::{FilesystemSettings, MountPoint};
use crate::error::StepError;
use crate::exec::Executor;

/// Kernel view of the current mount table.
const PROC_MOUNTS: &str = "/proc/self/mounts";

/// Everything needed to put a device at a mount point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountRequest {
    /// Block device.
    pub device: PathBuf,
    /// Mount point directory.
    pub directory: PathBuf,
    /// Filesystem type.
    pub fstype: String,
    /// Owner of the mount point.
    pub owner: String,
    /// Group of the mount point.
    pub group: String,
    /// Permission bits of the mount point.
    pub mode: u32,
}

impl MountRequest {
    /// Combine a configured mount with the shared filesystem settings.
    #[must_use]
    pub fn new(mount: &MountPoint, fs: &FilesystemSettings) -> Self {
        Self {
            device: mount.device.clone(),
            directory: mount.directory.clone(),
            fstype: fs.fstype.clone(),
            owner: fs.owner.clone(),
            group: fs.group.clone(),
            mode: fs.mode,
        }
    }
}

/// Mount and filesystem operations.
#[cfg_attr(test, mockall::automock)]
pub trait FilesystemManager: Send + Sync + std::fmt::Debug {
    /// Device currently mounted at `directory`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the mount table cannot be read.
    fn mounted_device(&self, directory: &Path) -> Result<Option<PathBuf>>;

    /// Filesystem type already present on `device`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the device cannot be probed.
    fn existing_filesystem(&self, device: &Path) -> Result<Option<String>>;

    /// Create the mount point and mount an already formatted device.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be prepared or the mount fails.
    fn mount(&self, request: &MountRequest) -> Result<()>;

    /// Format the device and mount it.
    ///
    /// When the device already holds a filesystem and `force` is false this
    /// refuses with [`StepError::DestructiveActionBlocked`] before anything is
    /// written.
    ///
    /// # Errors
    ///
    /// Returns an error if formatting is refused or any command fails.
    fn format_and_mount(&self, request: &MountRequest, force: bool) -> Result<()>;
}

/// Whether two device paths name the same device once symlinks are resolved.
#[must_use]
pub fn same_device(a: &Path, b: &Path) -> bool {
    let resolve = |p: &Path| dunce::canonicalize(p).unwrap_or_else(|_| p.to_path_buf());
    a == b || resolve(a) == resolve(b)
}

/// Decode the octal escapes the kernel uses for whitespace in mount paths.
fn unescape_mount_field(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut rest = field;
    while let Some(pos) = rest.find('\\') {
        out.push_str(rest.get(..pos).unwrap_or_default());
        let escape = rest.get(pos + 1..pos + 4);
        match escape.and_then(|e| u8::from_str_radix(e, 8).ok()) {
            Some(byte) => {
                out.push(char::from(byte));
                rest = rest.get(pos + 4..).unwrap_or_default();
            }
            None => {
                out.push('\\');
                rest = rest.get(pos + 1..).unwrap_or_default();
            }
        }
    }
    out.push_str(rest);
    out
}

/// Find the device mounted at `directory` in `/proc/mounts` formatted text.
///
/// Later entries shadow earlier ones, so the last match wins.
#[must_use]
pub fn parse_mount_table(table: &str, directory: &Path) -> Option<PathBuf> {
    table
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let device = fields.next()?;
            let target = fields.next()?;
            (Path::new(&unescape_mount_field(target)) == directory)
                .then(|| PathBuf::from(unescape_mount_field(device)))
        })
        .last()
}

fn prepare_mount_point(request: &MountRequest) -> Result<()> {
    std::fs::create_dir_all(&request.directory)
        .with_context(|| format!("creating {}", request.directory.display()))?;
    Ok(())
}

/// [`FilesystemManager`] using the kernel mount table and standard tools.
#[derive(Debug)]
pub struct SystemFilesystem {
    executor: Arc<dyn Executor>,
    mount_table: PathBuf,
}

impl SystemFilesystem {
    /// Create a manager reading the live mount table.
    #[must_use]
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self {
            executor,
            mount_table: PathBuf::from(PROC_MOUNTS),
        }
    }

    /// Read mounts from `path` instead of the live table.
    #[must_use]
    pub fn with_mount_table(mut self, path: PathBuf) -> Self {
        self.mount_table = path;
        self
    }

    fn set_ownership(&self, request: &MountRequest) -> Result<()> {
        let dir = request.directory.to_string_lossy();
        let owner = format!("{}:{}", request.owner, request.group);
        let mode = format!("{:o}", request.mode);
        self.executor
            .run("chown", &[&owner, &dir])
            .with_context(|| format!("setting owner of {dir}"))?;
        self.executor
            .run("chmod", &[&mode, &dir])
            .with_context(|| format!("setting mode of {dir}"))?;
        Ok(())
    }
}

impl FilesystemManager for SystemFilesystem {
    fn mounted_device(&self, directory: &Path) -> Result<Option<PathBuf>> {
        let table = std::fs::read_to_string(&self.mount_table)
            .with_context(|| format!("reading {}", self.mount_table.display()))?;
        Ok(parse_mount_table(&table, directory))
    }

    fn existing_filesystem(&self, device: &Path) -> Result<Option<String>> {
        let device = device.to_string_lossy();
        let result = self
            .executor
            .run_unchecked("blkid", &["-o", "value", "-s", "TYPE", &device])
            .with_context(|| format!("probing {device}"))?;
        let fstype = result.stdout.trim();
        Ok((result.success && !fstype.is_empty()).then(|| fstype.to_string()))
    }

    fn mount(&self, request: &MountRequest) -> Result<()> {
        prepare_mount_point(request)?;
        let device = request.device.to_string_lossy();
        let dir = request.directory.to_string_lossy();
        self.executor
            .run("mount", &["-t", &request.fstype, &device, &dir])
            .with_context(|| format!("mounting {device} at {dir}"))?;
        self.set_ownership(request)
    }

    fn format_and_mount(&self, request: &MountRequest, force: bool) -> Result<()> {
        let existing = self.existing_filesystem(&request.device)?;
        if let Some(existing) = &existing
            && !force
        {
            return Err(StepError::DestructiveActionBlocked {
                device: request.device.clone(),
                existing: existing.clone(),
            }
            .into());
        }

        let device = request.device.to_string_lossy();
        let mkfs = format!("mkfs.{}", request.fstype);
        let mut args: Vec<&str> = Vec::new();
        if existing.is_some() {
            // xfs spells "overwrite" -f, the ext family -F
            args.push(if request.fstype == "xfs" { "-f" } else { "-F" });
        }
        args.push(&device);
        tracing::debug!("{mkfs} {}", args.join(" "));
        self.executor
            .run(&mkfs, &args)
            .with_context(|| format!("formatting {device} as {}", request.fstype))?;

        self.mount(request)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::exec::test_helpers::MockExecutor;

    const MOUNTS: &str = "\
/dev/xvda1 / ext4 rw,relatime 0 0
proc /proc proc rw 0 0
/dev/sdb /backup xfs rw,attr2 0 0
/dev/sdd /mnt/with\\040space xfs rw 0 0
";

    fn request(dir: &Path) -> MountRequest {
        MountRequest {
            device: PathBuf::from("/dev/sdb"),
            directory: dir.to_path_buf(),
            fstype: "xfs".to_string(),
            owner: "root".to_string(),
            group: "root".to_string(),
            mode: 0o775,
        }
    }

    // -----------------------------------------------------------------------
    // mount table parsing
    // -----------------------------------------------------------------------

    #[test]
    fn parse_finds_mounted_device() {
        assert_eq!(
            parse_mount_table(MOUNTS, Path::new("/backup")),
            Some(PathBuf::from("/dev/sdb"))
        );
        assert_eq!(parse_mount_table(MOUNTS, Path::new("/data")), None);
    }

    #[test]
    fn parse_decodes_escaped_spaces() {
        assert_eq!(
            parse_mount_table(MOUNTS, Path::new("/mnt/with space")),
            Some(PathBuf::from("/dev/sdd"))
        );
    }

    #[test]
    fn parse_last_entry_wins() {
        let table = "/dev/sdb /data xfs rw 0 0\n/dev/sdc /data xfs rw 0 0\n";
        assert_eq!(
            parse_mount_table(table, Path::new("/data")),
            Some(PathBuf::from("/dev/sdc"))
        );
    }

    #[test]
    fn mounted_device_reads_configured_table() {
        let dir = tempfile::tempdir().unwrap();
        let table = dir.path().join("mounts");
        std::fs::write(&table, MOUNTS).unwrap();
        let fs = SystemFilesystem::new(Arc::new(MockExecutor::with_responses(vec![])))
            .with_mount_table(table);
        assert_eq!(
            fs.mounted_device(Path::new("/backup")).unwrap(),
            Some(PathBuf::from("/dev/sdb"))
        );
    }

    #[test]
    fn same_device_accepts_identical_paths() {
        assert!(same_device(Path::new("/dev/sdb"), Path::new("/dev/sdb")));
        assert!(!same_device(Path::new("/dev/sdb"), Path::new("/dev/sdc")));
    }

    #[test]
    fn same_device_follows_symlinks() {
        let dir = tempfile::tempdir().unwrap();
        let real = dir.path().join("xvdb");
        std::fs::write(&real, "").unwrap();
        let link = dir.path().join("sdb");
        std::os::unix::fs::symlink(&real, &link).unwrap();
        assert!(same_device(&link, &real));
    }

    // -----------------------------------------------------------------------
    // probing and formatting
    // -----------------------------------------------------------------------

    #[test]
    fn existing_filesystem_reads_blkid_value() {
        let fs = SystemFilesystem::new(Arc::new(MockExecutor::ok("xfs\n")));
        assert_eq!(
            fs.existing_filesystem(Path::new("/dev/sdb")).unwrap(),
            Some("xfs".to_string())
        );
    }

    #[test]
    fn blank_device_has_no_filesystem() {
        let fs = SystemFilesystem::new(Arc::new(MockExecutor::fail()));
        assert_eq!(fs.existing_filesystem(Path::new("/dev/sdb")).unwrap(), None);
    }

    #[test]
    fn format_refuses_existing_filesystem_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let executor = Arc::new(MockExecutor::ok("ext4\n"));
        let fs = SystemFilesystem::new(executor.clone());

        let err = fs.format_and_mount(&request(dir.path()), false).unwrap_err();
        assert_eq!(
            StepError::from_collaborator(err),
            StepError::DestructiveActionBlocked {
                device: PathBuf::from("/dev/sdb"),
                existing: "ext4".to_string(),
            }
        );
        assert!(
            executor.calls().iter().all(|c| !c.starts_with("mkfs")),
            "no mkfs may be issued: {:?}",
            executor.calls()
        );
    }

    #[test]
    fn format_blank_device_then_mounts() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("backup");
        let executor = Arc::new(MockExecutor::with_responses(vec![
            (false, String::new()),
            (true, String::new()),
            (true, String::new()),
            (true, String::new()),
            (true, String::new()),
        ]));
        let fs = SystemFilesystem::new(executor.clone());

        fs.format_and_mount(&request(&target), false).unwrap();
        let target = target.display().to_string();
        assert_eq!(
            executor.calls(),
            vec![
                "blkid -o value -s TYPE /dev/sdb".to_string(),
                "mkfs.xfs /dev/sdb".to_string(),
                format!("mount -t xfs /dev/sdb {target}"),
                format!("chown root:root {target}"),
                format!("chmod 775 {target}"),
            ]
        );
        assert!(Path::new(&target).is_dir());
    }

    #[test]
    fn forced_format_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let executor = Arc::new(MockExecutor::with_responses(vec![
            (true, "ext4".to_string()),
            (true, String::new()),
            (true, String::new()),
            (true, String::new()),
            (true, String::new()),
        ]));
        let fs = SystemFilesystem::new(executor.clone());

        fs.format_and_mount(&request(dir.path()), true).unwrap();
        assert_eq!(executor.calls()[1], "mkfs.xfs -f /dev/sdb");
    }
}
