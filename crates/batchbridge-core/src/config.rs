//! Connection configuration.

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Poll delay used by the wait loops when neither the dialect nor the
/// configuration says otherwise.
pub const DEFAULT_POLL_DELAY: Duration = Duration::from_millis(1000);

/// Settings for a remote scheduler connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Directory relative working directories resolve against. Discovered
    /// with `pwd` at connect time when unset.
    pub entry_directory: Option<Utf8PathBuf>,
    /// Override of the dialect's poll delay, in milliseconds.
    pub poll_delay_ms: Option<u64>,
    /// How long a job missing from every source still counts as existing.
    pub accounting_grace_secs: u64,
    /// Accept scheduler versions and schemas that are not recognised.
    pub ignore_version: bool,
    /// Never query the accounting store.
    pub disable_accounting: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            entry_directory: None,
            poll_delay_ms: None,
            accounting_grace_secs: 60,
            ignore_version: false,
            disable_accounting: false,
        }
    }
}

impl ConnectionConfig {
    pub fn accounting_grace(&self) -> Duration {
        Duration::from_secs(self.accounting_grace_secs)
    }

    /// Poll delay to use, given the dialect's own default.
    pub fn poll_delay(&self, dialect_default: Duration) -> Duration {
        self.poll_delay_ms
            .map(Duration::from_millis)
            .unwrap_or(dialect_default)
    }
}
