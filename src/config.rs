//! Runtime configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Buffer size of the bus's stream surface. Handler subscriptions are
    /// unbuffered; only `on()` consumers can lag.
    #[serde(default = "default_event_buffer_size")]
    pub event_buffer_size: usize,

    /// Quiet window for emitter flushes. The default of 0 ms coalesces
    /// within one scheduling turn and flushes on the next timer turn.
    #[serde(default = "default_emitter_debounce", with = "duration_ms")]
    pub emitter_debounce: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            event_buffer_size: default_event_buffer_size(),
            emitter_debounce: default_emitter_debounce(),
        }
    }
}

impl RuntimeConfig {
    /// Loads the configuration from a JSON file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let file = std::fs::File::open(path)
            .map_err(|e| Error::Config(format!("failed to open config file: {}", e)))?;
        let reader = std::io::BufReader::new(file);
        serde_json::from_reader(reader)
            .map_err(|e| Error::Config(format!("failed to parse config file: {}", e)))
    }
}

fn default_event_buffer_size() -> usize {
    256
}

fn default_emitter_debounce() -> Duration {
    Duration::from_millis(0)
}

pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
