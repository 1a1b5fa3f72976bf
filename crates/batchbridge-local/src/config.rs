//! Local executor configuration.

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    /// Directory relative working directories resolve against; the
    /// process working directory when unset.
    pub entry_directory: Option<Utf8PathBuf>,
    /// Workers of the `multi` queue; host parallelism when unset.
    pub multi_cores: Option<usize>,
    /// Jobs kept per queue before finished ones are purged.
    pub max_history: usize,
    pub poll_delay_ms: u64,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            entry_directory: None,
            multi_cores: None,
            max_history: 500,
            poll_delay_ms: 100,
        }
    }
}

impl LocalConfig {
    pub fn multi_workers(&self) -> usize {
        self.multi_cores
            .filter(|&n| n > 0)
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1)
            })
    }

    pub fn poll_delay(&self) -> Duration {
        Duration::from_millis(self.poll_delay_ms)
    }
}
