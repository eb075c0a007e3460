#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::Result;
use ingest_monitor_core::{ControlAction, ControlBridge, ControlError, ScriptBridge};

fn write_script(dir: &Path, body: &str) -> Result<PathBuf> {
    let path = dir.join("ingest-control.sh");
    fs::write(&path, format!("#!/bin/sh\n{body}\n"))?;
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
    Ok(path)
}

#[test]
fn forwards_arguments_and_trims_output() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let script = write_script(dir.path(), "echo \"  scanning $1 $2  \"")?;
    let bridge = ScriptBridge::new(script, Duration::from_secs(10), dir.path().join("flag"));

    let outcome = bridge.execute(&ControlAction::manual_scan(Some("/dev/sdb1"))?)?;
    assert!(outcome.success);
    assert_eq!(outcome.message, "scanning manual-scan /dev/sdb1");
    assert_eq!(outcome.auto_scan_enabled, None);
    Ok(())
}

#[test]
fn non_zero_exit_is_reported_not_raised() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let script = write_script(dir.path(), "echo 'device busy'; echo 'umount failed' >&2; exit 3")?;
    let bridge = ScriptBridge::new(script, Duration::from_secs(10), dir.path().join("flag"));

    let outcome = bridge.execute(&ControlAction::unmount_device(Some("/dev/sdb1"))?)?;
    assert!(!outcome.success);
    assert_eq!(outcome.message, "device busy");
    Ok(())
}

#[test]
fn toggles_report_flag_state_after_the_call() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let flag = dir.path().join("auto_scan_enabled");
    let script = write_script(
        dir.path(),
        &format!(
            "case \"$1\" in enable-auto) touch '{0}';; disable-auto) rm -f '{0}';; esac; echo ok",
            flag.display()
        ),
    )?;
    let bridge = ScriptBridge::new(script, Duration::from_secs(10), &flag);

    let enabled = bridge.execute(&ControlAction::EnableAutoScan)?;
    assert_eq!(enabled.auto_scan_enabled, Some(true));
    let disabled = bridge.execute(&ControlAction::DisableAutoScan)?;
    assert_eq!(disabled.auto_scan_enabled, Some(false));
    Ok(())
}

#[test]
fn slow_program_times_out() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let script = write_script(dir.path(), "exec sleep 5")?;
    let bridge = ScriptBridge::new(script, Duration::from_millis(200), dir.path().join("flag"));

    let result = bridge.execute(&ControlAction::Stop);
    assert!(matches!(result, Err(ControlError::Timeout(_))));
    Ok(())
}

#[test]
fn background_jobs_holding_output_do_not_outlive_the_deadline() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let script = write_script(dir.path(), "sleep 5 &\necho started\nexit 0")?;
    let bridge = ScriptBridge::new(script, Duration::from_secs(10), dir.path().join("flag"));

    let started = Instant::now();
    let outcome = bridge.execute(&ControlAction::manual_scan(Some("/dev/sdb1"))?)?;
    assert!(
        started.elapsed() < Duration::from_secs(3),
        "waited {:?} on inherited pipes",
        started.elapsed()
    );
    assert!(outcome.success);
    assert_eq!(outcome.message, "started");
    Ok(())
}

#[test]
fn background_jobs_are_bounded_by_a_short_timeout() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let script = write_script(dir.path(), "sleep 4 &\necho started\nexit 0")?;
    let bridge = ScriptBridge::new(script, Duration::from_millis(500), dir.path().join("flag"));

    let started = Instant::now();
    let outcome = bridge.execute(&ControlAction::Stop)?;
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(outcome.message, "started");
    Ok(())
}

#[test]
fn missing_program_is_a_spawn_error() {
    let bridge = ScriptBridge::new(
        "/nonexistent/ingest-control.sh",
        Duration::from_secs(1),
        "/nonexistent/flag",
    );
    assert!(matches!(
        bridge.execute(&ControlAction::Stop),
        Err(ControlError::Spawn { .. })
    ));
}
