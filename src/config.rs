//! Pipeline preferences.
//!
//! Every [`CaptureFile`](crate::capture::CaptureFile) owns its own copy;
//! there is no process-wide preferences singleton.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Largest record the default snapshot length allows.
pub const MAX_PACKET_SIZE_STANDARD: u32 = 262_144;

/// Tunable behaviour of the capture pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    /// Match text predicates case-sensitively
    pub case_sensitive_search: bool,
    /// Continue a search at the other end of the file
    pub wrap_search: bool,
    /// Time a long operation runs before progress is shown
    pub progress_begin_delay_ms: u64,
    /// Minimum wall time between two progress updates
    pub progress_update_interval_ms: u64,
    /// Snapshot length used when the file doesn't record one
    pub default_snaplen: u32,
    /// Largest record the writers accept
    pub max_packet_size: u32,
    /// Panic when an event fires with nobody listening
    pub require_listeners: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            case_sensitive_search: false,
            wrap_search: true,
            progress_begin_delay_ms: 500,
            progress_update_interval_ms: 150,
            default_snaplen: MAX_PACKET_SIZE_STANDARD,
            max_packet_size: MAX_PACKET_SIZE_STANDARD,
            require_listeners: false,
        }
    }
}

impl Preferences {
    /// Load preferences from a JSON file. Missing keys keep their defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let prefs = serde_json::from_str(&text)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        Ok(prefs)
    }

    pub fn progress_begin_delay(&self) -> Duration {
        Duration::from_millis(self.progress_begin_delay_ms)
    }

    pub fn progress_update_interval(&self) -> Duration {
        Duration::from_millis(self.progress_update_interval_ms)
    }
}
