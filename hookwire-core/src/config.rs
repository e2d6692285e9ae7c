use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bus tuning knobs.
///
/// Configuration for the helper side rides the channel itself (a
/// `Configure` envelope); this struct only shapes a single bus instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Default reply window for `send_and_wait`. Kept short because OS
    /// low-level hook callbacks must return promptly or the OS disables
    /// the hook.
    #[serde(default = "default_response_timeout", with = "duration_ms")]
    pub response_timeout: Duration,

    /// Hard cap on a single frame's payload byte count, both directions.
    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: usize,

    /// Log unrouted envelopes (no waiter, no handler) at `debug` instead
    /// of `trace`. Dropping them is not an error either way.
    #[serde(default)]
    pub log_unrouted: bool,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            response_timeout: default_response_timeout(),
            max_frame_len: default_max_frame_len(),
            log_unrouted: false,
        }
    }
}

fn default_response_timeout() -> Duration {
    Duration::from_millis(50)
}

fn default_max_frame_len() -> usize {
    64 * 1024
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

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_from_empty_object() {
        let config: BusConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.response_timeout, Duration::from_millis(50));
        assert_eq!(config.max_frame_len, 64 * 1024);
        assert!(!config.log_unrouted);
    }

    #[test]
    fn test_timeout_is_milliseconds_on_the_wire() {
        let config: BusConfig = serde_json::from_str(r#"{"response_timeout": 200}"#).unwrap();
        assert_eq!(config.response_timeout, Duration::from_millis(200));

        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["response_timeout"], 200);
    }
}
