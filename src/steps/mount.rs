//! Format-if-blank, mount and persist the backup and data volumes.
use std::path::Path;

use crate::config::{Config, MountPoint};
use crate::error::StepError;
use crate::host::filesystem::same_device;
use crate::host::{LineMatcher, MountRequest};

use super::{Context, ConvergenceStep, Probe};

/// Which configured volume a [`MountFilesystem`] handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Volume {
    /// `[backup]`.
    Backup,
    /// `[data]`.
    Data,
}

/// Mount one volume at its directory and record it in fstab.
#[derive(Debug, Clone, Copy)]
pub struct MountFilesystem {
    volume: Volume,
}

impl MountFilesystem {
    /// The backup volume.
    #[must_use]
    pub const fn backup() -> Self {
        Self {
            volume: Volume::Backup,
        }
    }

    /// The data volume.
    #[must_use]
    pub const fn data() -> Self {
        Self {
            volume: Volume::Data,
        }
    }

    const fn mount_point(self, config: &Config) -> &MountPoint {
        match self.volume {
            Volume::Backup => &config.backup,
            Volume::Data => &config.data,
        }
    }

    /// Whether the volume is mounted from the right device.
    ///
    /// A different device at the mount point is a conflict.
    fn is_mounted(self, ctx: &Context) -> Result<bool, StepError> {
        let mount = self.mount_point(&ctx.config);
        match ctx.host.filesystems.mounted_device(&mount.directory)? {
            None => Ok(false),
            Some(mounted) if same_device(&mounted, &mount.device) => Ok(true),
            Some(mounted) => Err(StepError::MountConflict {
                path: mount.directory.clone(),
                mounted,
                requested: mount.device.clone(),
            }),
        }
    }

    /// Whether fstab already carries an entry for the volume.
    ///
    /// Any entry for the directory from the same device counts, whatever its
    /// type or options. Entries keyed by UUID or label are taken at their
    /// word. An entry from a different device path is a conflict.
    fn has_fstab_entry(self, ctx: &Context) -> Result<bool, StepError> {
        let mount = self.mount_point(&ctx.config);
        let fstab = &ctx.config.filesystem.fstab;
        let Some(entry) = ctx.host.text.find_line(fstab, &fstab_matcher(mount)?)? else {
            return Ok(false);
        };
        let existing = entry.split_whitespace().next().unwrap_or_default();
        if TAGGED_DEVICES.iter().any(|tag| existing.starts_with(tag))
            || same_device(Path::new(existing), &mount.device)
        {
            return Ok(true);
        }
        Err(StepError::FstabConflict {
            file: fstab.clone(),
            directory: mount.directory.clone(),
            existing: existing.to_string(),
            requested: mount.device.clone(),
        })
    }
}

/// Device fields that name a filesystem instead of a block device path.
const TAGGED_DEVICES: [&str; 4] = ["UUID=", "LABEL=", "PARTUUID=", "PARTLABEL="];

/// Matcher for any active fstab entry mounting `mount.directory`.
fn fstab_matcher(mount: &MountPoint) -> Result<LineMatcher, StepError> {
    Ok(LineMatcher::new(&format!(
        r"\s*[^#\s]\S*\s+{}(?:\s.*)?",
        regex::escape(&mount.directory.display().to_string())
    ))?)
}

fn fstab_line(config: &Config, mount: &MountPoint) -> String {
    format!(
        "{} {} {} {} 0 0",
        mount.device.display(),
        mount.directory.display(),
        config.filesystem.fstype,
        config.filesystem.options
    )
}

impl ConvergenceStep for MountFilesystem {
    fn name(&self) -> &str {
        match self.volume {
            Volume::Backup => "mount-backup",
            Volume::Data => "mount-data",
        }
    }

    fn description(&self, config: &Config) -> String {
        let mount = self.mount_point(config);
        format!(
            "mount {} at {} as {}",
            mount.device.display(),
            mount.directory.display(),
            config.filesystem.fstype
        )
    }

    fn check(&self, ctx: &Context) -> Result<Probe, StepError> {
        let mount = self.mount_point(&ctx.config);
        if !self.is_mounted(ctx)? {
            return Ok(Probe::Unsatisfied(format!(
                "{} is not mounted",
                mount.directory.display()
            )));
        }
        if ctx.config.filesystem.enable && !self.has_fstab_entry(ctx)? {
            return Ok(Probe::Unsatisfied(format!(
                "no fstab entry for {}",
                mount.directory.display()
            )));
        }
        Ok(Probe::Satisfied)
    }

    fn apply(&self, ctx: &Context) -> Result<(), StepError> {
        let config = &ctx.config;
        let mount = self.mount_point(config);
        let needs_entry = config.filesystem.enable && !self.has_fstab_entry(ctx)?;

        if !self.is_mounted(ctx)? {
            let request = MountRequest::new(mount, &config.filesystem);
            let existing = ctx.host.filesystems.existing_filesystem(&mount.device)?;
            if existing.as_deref() == Some(config.filesystem.fstype.as_str()) {
                ctx.log.info(&format!(
                    "{} already holds {}, mounting without formatting",
                    mount.device.display(),
                    config.filesystem.fstype
                ));
                ctx.host.filesystems.mount(&request)?;
            } else {
                ctx.log.info(&format!(
                    "formatting {} as {}",
                    mount.device.display(),
                    config.filesystem.fstype
                ));
                ctx.host
                    .filesystems
                    .format_and_mount(&request, config.filesystem.force)?;
            }
        }

        if needs_entry {
            let line = fstab_line(config, mount);
            if ctx
                .host
                .text
                .ensure_line(&config.filesystem.fstab, &fstab_matcher(mount)?, &line)?
            {
                ctx.log.info(&format!("added fstab entry: {line}"));
            }
        }
        Ok(())
    }
}
