//! Construction options for buffers and their facades
//!
//! Options are composable: start from [`BufferOptions::default`] (in-memory
//! only) and layer a backing file, persistence and recovery on top, or use
//! [`BufferOptions::durable`] for the lookup-or-create preset.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{Result, SpoolError};

/// Period used when persistence is enabled without an explicit period
pub const DEFAULT_PERSISTENCE_PERIOD: Duration = Duration::from_secs(5 * 60);

/// Options recognised when constructing or binding a buffer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferOptions {
    /// File mirroring the buffer's mutations
    pub backing_file: Option<PathBuf>,
    /// Whether flushes to the backing file are allowed
    pub persistence_enabled: bool,
    /// Interval between scheduled flushes
    pub persistence_period: Duration,
    /// Whether the buffer is rebuilt from the backing file on bind
    pub recovery_enabled: bool,
    /// Capture the record type on the first insert, enabling recovery
    pub register_on_first_insert: bool,
}

impl BufferOptions {
    /// Options for a purely in-memory buffer
    pub fn in_memory() -> Self {
        Self {
            backing_file: None,
            persistence_enabled: false,
            persistence_period: DEFAULT_PERSISTENCE_PERIOD,
            recovery_enabled: false,
            register_on_first_insert: true,
        }
    }

    /// Lookup-or-create preset: bound to `path`, persisted, recovered on bind
    pub fn durable<P: AsRef<Path>>(path: P) -> Self {
        Self::in_memory()
            .with_backing_file(path)
            .with_persistence(true)
            .with_recovery(true)
    }

    pub fn with_backing_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.backing_file = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn with_persistence(mut self, enabled: bool) -> Self {
        self.persistence_enabled = enabled;
        self
    }

    pub fn with_persistence_period(mut self, period: Duration) -> Self {
        self.persistence_period = period;
        self
    }

    pub fn with_recovery(mut self, enabled: bool) -> Self {
        self.recovery_enabled = enabled;
        self
    }

    pub fn with_register_on_first_insert(mut self, enabled: bool) -> Self {
        self.register_on_first_insert = enabled;
        self
    }

    /// Parse options from a JSON document; missing fields take their defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        let options: BufferOptions = serde_json::from_str(json)?;
        options.validate()?;
        Ok(options)
    }

    /// The configured period, or the default when it is zero
    pub fn effective_period(&self) -> Duration {
        if self.persistence_period.is_zero() {
            DEFAULT_PERSISTENCE_PERIOD
        } else {
            self.persistence_period
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if let Some(path) = &self.backing_file {
            if path.as_os_str().is_empty() {
                return Err(SpoolError::validation("backing file path cannot be empty"));
            }
        }
        Ok(())
    }
}

impl Default for BufferOptions {
    fn default() -> Self {
        Self::in_memory()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_defaults() {
        let options = BufferOptions::default();
        assert!(options.backing_file.is_none());
        assert!(!options.persistence_enabled);
        assert!(!options.recovery_enabled);
        assert!(options.register_on_first_insert);
        assert_eq!(options.persistence_period, Duration::from_secs(300));
    }

    #[test]
    fn test_durable_preset() {
        let options = BufferOptions::durable("/var/spool/jobs.spool");
        assert_eq!(
            options.backing_file,
            Some(PathBuf::from("/var/spool/jobs.spool"))
        );
        assert!(options.persistence_enabled);
        assert!(options.recovery_enabled);
    }

    #[test]
    fn test_options_compose() {
        let options = BufferOptions::default()
            .with_backing_file("queue.spool")
            .with_persistence(true)
            .with_persistence_period(Duration::from_millis(10))
            .with_register_on_first_insert(false);

        assert_eq!(options.persistence_period, Duration::from_millis(10));
        assert!(!options.register_on_first_insert);
        assert!(!options.recovery_enabled);
    }

    #[test]
    fn test_zero_period_falls_back_to_default() {
        let options = BufferOptions::default().with_persistence_period(Duration::ZERO);
        assert_eq!(options.effective_period(), DEFAULT_PERSISTENCE_PERIOD);
    }

    #[test]
    fn test_validate_rejects_empty_path() {
        let options = BufferOptions::default().with_backing_file("");
        assert!(options.validate().is_err());
        assert!(BufferOptions::durable("ok.spool").validate().is_ok());
    }

    #[test]
    fn test_from_json_partial_document() {
        let options = BufferOptions::from_json_str(
            r#"{"backing_file": "/tmp/a.spool", "persistence_enabled": true}"#,
        )
        .unwrap();

        assert_eq!(options.backing_file, Some(PathBuf::from("/tmp/a.spool")));
        assert!(options.persistence_enabled);
        assert_eq!(options.persistence_period, DEFAULT_PERSISTENCE_PERIOD);
    }

    #[test]
    fn test_from_json_invalid() {
        let result = BufferOptions::from_json_str(r#"{"backing_file": ""}"#);
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("cannot be empty"));
    }
}
