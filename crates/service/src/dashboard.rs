use std::sync::Arc;

use anyhow::Result;
use ingest_monitor_core::{
    collect_system_info, list_devices, list_recent, read_session_log, read_status, BlockDevice,
    ControlAction, ControlBridge, ControlError, ControlOutcome, CredentialStore, IngestSession,
    LookupError, MonitorConfig, Observed, ScriptBridge, SessionLog, StatusSnapshot, SystemInfo,
};
use tracing::warn;

/// Everything a front end needs, wired from one config at startup.
pub struct Dashboard {
    config: MonitorConfig,
    credentials: Arc<CredentialStore>,
    bridge: Arc<dyn ControlBridge>,
}

impl Dashboard {
    pub fn new(
        config: MonitorConfig,
        credentials: Arc<CredentialStore>,
        bridge: Arc<dyn ControlBridge>,
    ) -> Self {
        Self {
            config,
            credentials,
            bridge,
        }
    }

    /// Production wiring: credentials from the configured file and the
    /// configured control program. A missing credentials file locks everyone out.
    pub fn from_config(config: MonitorConfig) -> Result<Self> {
        let credentials = if config.credentials_file.exists() {
            CredentialStore::load(&config.credentials_file)?
        } else {
            warn!(
                path = %config.credentials_file.display(),
                "credentials file not found; all logins will be rejected"
            );
            CredentialStore::empty(&config.credentials_file)
        };
        let bridge = ScriptBridge::from_config(&config);
        Ok(Self::new(config, Arc::new(credentials), Arc::new(bridge)))
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    pub fn status(&self) -> Observed<StatusSnapshot> {
        read_status(&self.config)
    }

    pub fn history(&self, limit: Option<usize>) -> Observed<Vec<IngestSession>> {
        list_recent(&self.config, self.config.history_limit_or_default(limit))
    }

    pub fn system(&self) -> Observed<SystemInfo> {
        collect_system_info(&self.config)
    }

    pub fn devices(&self) -> Observed<Vec<BlockDevice>> {
        list_devices(&self.config)
    }

    pub fn session_log(&self, session: &str) -> Result<SessionLog, LookupError> {
        read_session_log(&self.config, session)
    }

    pub fn control(&self, action: &ControlAction) -> Result<ControlOutcome, ControlError> {
        self.bridge.execute(action)
    }
}
