#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use anyhow::Result;
use ingest_monitor_core::{list_devices, IssueKind, MonitorConfig};

fn fake_lsblk(dir: &Path, body: &str) -> Result<PathBuf> {
    let path = dir.join("lsblk");
    fs::write(&path, format!("#!/bin/sh\n{body}\n"))?;
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
    Ok(path)
}

fn config_with(lsblk_program: PathBuf) -> MonitorConfig {
    MonitorConfig {
        lsblk_program,
        ..MonitorConfig::default()
    }
}

#[test]
fn lists_partitions_from_the_topology_query() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let lsblk = fake_lsblk(
        dir.path(),
        r#"echo '{"blockdevices": [{"name": "sdb", "type": "disk", "children": [{"name": "sdb1", "size": "29.7G", "label": "CARD_C", "fstype": "exfat", "type": "part"}]}]}'"#,
    )?;

    let observed = list_devices(&config_with(lsblk));
    assert!(observed.issues.is_empty());
    assert_eq!(observed.value.len(), 1);
    assert_eq!(observed.value[0].device, "/dev/sdb1");
    assert_eq!(observed.value[0].label, "CARD_C");
    Ok(())
}

#[test]
fn failing_query_yields_empty_list() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let lsblk = fake_lsblk(dir.path(), "echo 'lsblk: cannot open /sys' >&2\nexit 1")?;

    let observed = list_devices(&config_with(lsblk));
    assert!(observed.value.is_empty());
    assert!(observed.has_issue(IssueKind::ExternalProcess));
    Ok(())
}

#[test]
fn garbled_output_yields_empty_list() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let lsblk = fake_lsblk(dir.path(), "echo 'NAME SIZE LABEL'\necho 'sdb1 29.7G CARD_C'")?;

    let observed = list_devices(&config_with(lsblk));
    assert!(observed.value.is_empty());
    assert!(observed.has_issue(IssueKind::MalformedData));
    Ok(())
}
