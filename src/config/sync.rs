//! Folder sync settings.

use std::time::Duration;

use crate::error::{Error, Result};
use crate::sync::ParentResolution;

const DEFAULT_POLL_INTERVAL_MS: u64 = 3000;
const DEFAULT_DEBOUNCE_MS: u64 = 500;

/// Timing and policy for a sync session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncConfig {
    /// Time between reads of the folder.
    pub poll_interval: Duration,
    /// Quiet period after a store change before writing back.
    pub debounce: Duration,
    /// How created lines below depth 0 find their parent.
    pub parent_resolution: ParentResolution,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            parent_resolution: ParentResolution::default(),
        }
    }
}

impl SyncConfig {
    /// Read overrides from `TD_POLL_INTERVAL_MS`, `TD_DEBOUNCE_MS` and
    /// `TD_PARENT_RESOLUTION`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for a value that does not parse.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(value) = lookup("TD_POLL_INTERVAL_MS") {
            config.poll_interval = parse_millis("TD_POLL_INTERVAL_MS", &value)?;
        }
        if let Some(value) = lookup("TD_DEBOUNCE_MS") {
            config.debounce = parse_millis("TD_DEBOUNCE_MS", &value)?;
        }
        if let Some(value) = lookup("TD_PARENT_RESOLUTION") {
            config.parent_resolution = value
                .parse()
                .map_err(|e| Error::Config(format!("TD_PARENT_RESOLUTION: {e}")))?;
        }

        Ok(config)
    }
}

/// Positive millisecond count.
fn parse_millis(key: &str, value: &str) -> Result<Duration> {
    match value.trim().parse::<u64>() {
        Ok(ms) if ms > 0 => Ok(Duration::from_millis(ms)),
        _ => Err(Error::Config(format!(
            "{key} must be a positive number of milliseconds, got {value:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = SyncConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, SyncConfig::default());
        assert_eq!(config.poll_interval, Duration::from_secs(3));
        assert_eq!(config.debounce, Duration::from_millis(500));
        assert_eq!(config.parent_resolution, ParentResolution::PreOrder);
    }

    #[test]
    fn test_overrides() {
        let config = SyncConfig::from_lookup(lookup(&[
            ("TD_POLL_INTERVAL_MS", "1000"),
            ("TD_DEBOUNCE_MS", " 50 "),
            ("TD_PARENT_RESOLUTION", "flat"),
        ]))
        .unwrap();

        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.debounce, Duration::from_millis(50));
        assert_eq!(config.parent_resolution, ParentResolution::Flat);
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            SyncConfig::from_lookup(lookup(&[("TD_POLL_INTERVAL_MS", "0")])),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            SyncConfig::from_lookup(lookup(&[("TD_DEBOUNCE_MS", "soon")])),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            SyncConfig::from_lookup(lookup(&[("TD_PARENT_RESOLUTION", "guess")])),
            Err(Error::Config(_))
        ));
    }
}
