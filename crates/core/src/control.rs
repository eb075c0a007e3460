use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::MonitorConfig;
use crate::error::ControlError;
use crate::history::is_plain_folder_name;

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const OUTPUT_GRACE: Duration = Duration::from_millis(500);

/// Operator actions forwarded to the control program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlAction {
    EnableAutoScan,
    DisableAutoScan,
    ManualScan { device: String },
    Stop,
    DeleteFolder { folder: String },
    UnmountDevice { device: String },
}

impl ControlAction {
    pub fn manual_scan(device: Option<&str>) -> Result<Self, ControlError> {
        Ok(Self::ManualScan {
            device: required("device", device)?,
        })
    }

    pub fn unmount_device(device: Option<&str>) -> Result<Self, ControlError> {
        Ok(Self::UnmountDevice {
            device: required("device", device)?,
        })
    }

    pub fn delete_folder(folder: Option<&str>) -> Result<Self, ControlError> {
        let folder = required("folder", folder)?;
        if !is_plain_folder_name(&folder) {
            return Err(ControlError::InvalidInput(format!(
                "folder must be a single name inside the ingest root, got {folder:?}"
            )));
        }
        Ok(Self::DeleteFolder { folder })
    }

    /// Parses the operator-facing verb names used by the CLI.
    pub fn from_verb(verb: &str, argument: Option<&str>) -> Result<Self, ControlError> {
        match verb {
            "enable-auto-scan" => Ok(Self::EnableAutoScan),
            "disable-auto-scan" => Ok(Self::DisableAutoScan),
            "manual-scan" => Self::manual_scan(argument),
            "stop" => Ok(Self::Stop),
            "delete-folder" => Self::delete_folder(argument),
            "unmount-device" => Self::unmount_device(argument),
            other => Err(ControlError::InvalidInput(format!(
                "unknown control action {other:?}"
            ))),
        }
    }

    /// Subcommand and arguments as the control program expects them.
    pub fn program_args(&self) -> Vec<&str> {
        match self {
            Self::EnableAutoScan => vec!["enable-auto"],
            Self::DisableAutoScan => vec!["disable-auto"],
            Self::ManualScan { device } => vec!["manual-scan", device],
            Self::Stop => vec!["stop"],
            Self::DeleteFolder { folder } => vec!["delete-folder", folder],
            Self::UnmountDevice { device } => vec!["unmount-device", device],
        }
    }

    pub fn toggles_auto_scan(&self) -> bool {
        matches!(self, Self::EnableAutoScan | Self::DisableAutoScan)
    }
}

fn required(field: &str, value: Option<&str>) -> Result<String, ControlError> {
    match value.map(str::trim) {
        Some(value) if !value.is_empty() => Ok(value.to_string()),
        _ => Err(ControlError::InvalidInput(format!("{field} is required"))),
    }
}

/// What the control program reported. `message` is its trimmed stdout,
/// passed through uninterpreted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ControlOutcome {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "enabled")]
    pub auto_scan_enabled: Option<bool>,
}

pub trait ControlBridge: Send + Sync {
    fn execute(&self, action: &ControlAction) -> Result<ControlOutcome, ControlError>;
}

/// Runs the external control program once per action, with a hard timeout.
#[derive(Debug, Clone)]
pub struct ScriptBridge {
    program: PathBuf,
    timeout: Duration,
    auto_scan_flag: PathBuf,
}

impl ScriptBridge {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration, auto_scan_flag: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            timeout,
            auto_scan_flag: auto_scan_flag.into(),
        }
    }

    pub fn from_config(config: &MonitorConfig) -> Self {
        Self::new(
            &config.control_program,
            config.control_timeout(),
            &config.auto_scan_flag,
        )
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl ControlBridge for ScriptBridge {
    fn execute(&self, action: &ControlAction) -> Result<ControlOutcome, ControlError> {
        let args = action.program_args();
        info!(program = %self.program.display(), ?args, "invoking control program");

        let deadline = Instant::now() + self.timeout;
        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ControlError::Spawn {
                program: self.program.display().to_string(),
                source,
            })?;

        let stdout = OutputDrain::start(child.stdout.take());
        let stderr = OutputDrain::start(child.stderr.take());
        let status = wait_with_deadline(&mut child, deadline, self.timeout)?;

        // Background jobs started by the program may inherit its pipes and keep them open.
        let drain_deadline = deadline.min(Instant::now() + OUTPUT_GRACE);
        let message = String::from_utf8_lossy(&stdout.finish(drain_deadline))
            .trim()
            .to_string();
        if !status.success() {
            warn!(
                program = %self.program.display(),
                ?args,
                %status,
                stderr = %String::from_utf8_lossy(&stderr.finish(drain_deadline)).trim(),
                "control program reported failure"
            );
        }

        Ok(ControlOutcome {
            success: status.success(),
            message,
            auto_scan_enabled: action
                .toggles_auto_scan()
                .then(|| self.auto_scan_flag.exists()),
        })
    }
}

/// Reads one child pipe on its own thread into a shared buffer, so whatever
/// arrived can be taken at a deadline even while the pipe is still open.
struct OutputDrain {
    buffer: Arc<Mutex<Vec<u8>>>,
    closed: Receiver<()>,
}

impl OutputDrain {
    fn start<R: Read + Send + 'static>(pipe: Option<R>) -> Self {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let (closed_tx, closed) = mpsc::channel();
        let sink = Arc::clone(&buffer);
        thread::spawn(move || {
            if let Some(mut pipe) = pipe {
                let mut chunk = [0_u8; 4096];
                loop {
                    match pipe.read(&mut chunk) {
                        Ok(0) => break,
                        Ok(read) => lock(&sink).extend_from_slice(&chunk[..read]),
                        Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                        Err(err) => {
                            warn!("failed to read control program output: {err}");
                            break;
                        }
                    }
                }
            }
            let _ = closed_tx.send(());
        });
        Self { buffer, closed }
    }

    fn finish(self, deadline: Instant) -> Vec<u8> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if let Err(RecvTimeoutError::Timeout) = self.closed.recv_timeout(remaining) {
            warn!("control program output still open after exit; keeping what was captured");
        }
        let captured = lock(&self.buffer).clone();
        captured
    }
}

fn lock(buffer: &Mutex<Vec<u8>>) -> MutexGuard<'_, Vec<u8>> {
    match buffer.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn wait_with_deadline(
    child: &mut Child,
    deadline: Instant,
    timeout: Duration,
) -> Result<ExitStatus, ControlError> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }
        if Instant::now() >= deadline {
            if let Err(err) = child.kill() {
                warn!("failed to kill timed-out control program: {err}");
            }
            child.wait()?;
            warn!(?timeout, "control program timed out");
            return Err(ControlError::Timeout(timeout));
        }
        thread::sleep(POLL_INTERVAL);
    }
}
