use std::io;
use std::path::Path;

use serde::{Serialize, Serializer};
use sysinfo::System;

use crate::config::MonitorConfig;
use crate::issue::{Issue, IssueKind, Observed};
use crate::size::format_size;

pub const UNKNOWN: &str = "unknown";

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SystemInfo {
    pub hostname: String,
    pub uptime: String,
    pub nas_mounted: bool,
    #[serde(serialize_with = "serialize_space")]
    pub nas_space: Option<SpaceUsage>,
    pub auto_scan_enabled: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SpaceUsage {
    pub total: String,
    pub used: String,
    pub free: String,
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub free_bytes: u64,
    pub percent: u8,
}

/// Raw capacity figures for one filesystem, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilesystemSpace {
    pub total_bytes: u64,
    pub available_bytes: u64,
}

fn serialize_space<S: Serializer>(value: &Option<SpaceUsage>, serializer: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(space) => space.serialize(serializer),
        None => serializer.serialize_str(UNKNOWN),
    }
}

/// Host measurements, each of which may independently be unavailable.
pub trait HostProbe {
    fn hostname(&self) -> Option<String>;
    fn uptime_seconds(&self) -> Option<u64>;
    fn is_mount_point(&self, path: &Path) -> io::Result<bool>;
    fn filesystem_space(&self, path: &Path) -> io::Result<FilesystemSpace>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LocalHost;

impl HostProbe for LocalHost {
    fn hostname(&self) -> Option<String> {
        System::host_name().filter(|name| !name.is_empty())
    }

    fn uptime_seconds(&self) -> Option<u64> {
        // sysinfo reports 0 when the counter cannot be read.
        Some(System::uptime()).filter(|seconds| *seconds > 0)
    }

    #[cfg(unix)]
    fn is_mount_point(&self, path: &Path) -> io::Result<bool> {
        use std::os::unix::fs::MetadataExt;

        let own = std::fs::symlink_metadata(path)?;
        if own.file_type().is_symlink() {
            return Ok(false);
        }
        let parent = std::fs::metadata(path.join(".."))?;
        Ok(own.dev() != parent.dev() || own.ino() == parent.ino())
    }

    #[cfg(not(unix))]
    fn is_mount_point(&self, _path: &Path) -> io::Result<bool> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "mount detection requires a unix host",
        ))
    }

    #[cfg(unix)]
    fn filesystem_space(&self, path: &Path) -> io::Result<FilesystemSpace> {
        let stats = rustix::fs::statvfs(path)?;
        Ok(FilesystemSpace {
            total_bytes: stats.f_blocks.saturating_mul(stats.f_frsize),
            available_bytes: stats.f_bavail.saturating_mul(stats.f_frsize),
        })
    }

    #[cfg(not(unix))]
    fn filesystem_space(&self, _path: &Path) -> io::Result<FilesystemSpace> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "filesystem statistics require a unix host",
        ))
    }
}

pub fn collect_system_info(config: &MonitorConfig) -> Observed<SystemInfo> {
    collect_system_info_with(config, &LocalHost)
}

/// Every field is measured on its own; one failing probe never blanks the others.
pub fn collect_system_info_with(config: &MonitorConfig, host: &dyn HostProbe) -> Observed<SystemInfo> {
    let mut issues = Vec::new();

    let hostname = host.hostname().unwrap_or_else(|| {
        issues.push(Issue::record(
            IssueKind::MissingResource,
            "host name unavailable",
        ));
        UNKNOWN.to_string()
    });

    let uptime = match host.uptime_seconds() {
        Some(seconds) => format_uptime(seconds),
        None => {
            issues.push(Issue::record(
                IssueKind::MissingResource,
                "host uptime counter unavailable",
            ));
            UNKNOWN.to_string()
        }
    };

    let root = &config.ingest_root;
    let nas_mounted = match host.is_mount_point(root) {
        Ok(mounted) => mounted,
        Err(err) if err.kind() == io::ErrorKind::NotFound => false,
        Err(err) => {
            issues.push(Issue::record(
                IssueKind::PartialIo,
                format!("mount check failed for {}: {err}", root.display()),
            ));
            false
        }
    };

    let nas_space = if nas_mounted {
        match host.filesystem_space(root) {
            Ok(space) => space_usage(space).or_else(|| {
                issues.push(Issue::record(
                    IssueKind::MalformedData,
                    format!("filesystem at {} reports zero capacity", root.display()),
                ));
                None
            }),
            Err(err) => {
                issues.push(Issue::record(
                    IssueKind::PartialIo,
                    format!("filesystem statistics unavailable for {}: {err}", root.display()),
                ));
                None
            }
        }
    } else {
        None
    };

    Observed::with_issues(
        SystemInfo {
            hostname,
            uptime,
            nas_mounted,
            nas_space,
            auto_scan_enabled: config.auto_scan_enabled(),
        },
        issues,
    )
}

pub fn format_uptime(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    format!("{hours}h {minutes}m")
}

/// Percent used is truncated, not rounded: 99.9% full reports 99.
pub fn space_usage(space: FilesystemSpace) -> Option<SpaceUsage> {
    if space.total_bytes == 0 {
        return None;
    }
    let free_bytes = space.available_bytes.min(space.total_bytes);
    let used_bytes = space.total_bytes - free_bytes;
    let percent = (u128::from(used_bytes) * 100 / u128::from(space.total_bytes)) as u8;

    Some(SpaceUsage {
        total: format_size(space.total_bytes),
        used: format_size(used_bytes),
        free: format_size(free_bytes),
        total_bytes: space.total_bytes,
        used_bytes,
        free_bytes,
        percent,
    })
}
