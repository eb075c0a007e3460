pub mod classify;
pub mod config;
pub mod control;
pub mod credentials;
pub mod devices;
pub mod error;
pub mod history;
pub mod issue;
pub mod size;
pub mod status;
pub mod system;

pub use classify::{classify_log, IngestOutcome, LogClassification};
pub use config::{MonitorConfig, DEFAULT_HISTORY_LIMIT};
pub use control::{ControlAction, ControlBridge, ControlOutcome, ScriptBridge};
pub use credentials::{hash_password, CredentialStore};
pub use devices::{list_devices, parse_block_devices, BlockDevice};
pub use error::{ControlError, CredentialError, LookupError};
pub use history::{list_recent, read_session_log, IngestSession, SessionLog};
pub use issue::{Issue, IssueKind, Observed};
pub use size::format_size;
pub use status::{read_status, PipelineState, StatusSnapshot};
pub use system::{collect_system_info, HostProbe, LocalHost, SpaceUsage, SystemInfo};
