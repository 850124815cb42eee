//! Batch processor configuration

use crate::error::{BatchError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// How row tasks are scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingMode {
    #[default]
    Parallel,
    Sequential,
}

/// Batch run configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    pub enabled: bool,
    pub csv_path: PathBuf,
    /// Rows per batch in parallel mode
    pub batch_size: usize,
    /// Concurrent row tasks within a batch
    pub concurrent_tasks: usize,
    pub mode: ProcessingMode,
    /// Restrict template rendering to these columns, when set
    pub field_selection: Option<Vec<String>>,
}

impl BatchConfig {
    pub fn new(csv_path: impl Into<PathBuf>) -> Self {
        Self {
            enabled: true,
            csv_path: csv_path.into(),
            batch_size: 20,
            concurrent_tasks: 5,
            mode: ProcessingMode::Parallel,
            field_selection: None,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_concurrent_tasks(mut self, concurrent_tasks: usize) -> Self {
        self.concurrent_tasks = concurrent_tasks;
        self
    }

    pub fn with_mode(mut self, mode: ProcessingMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_field_selection<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.field_selection = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.enabled {
            return Err(BatchError::Config("batch mode is not enabled".to_string()));
        }
        if self.batch_size < 1 {
            return Err(BatchError::Config("batch_size must be at least 1".to_string()));
        }
        if self.concurrent_tasks < 1 {
            return Err(BatchError::Config(
                "concurrent_tasks must be at least 1".to_string(),
            ));
        }
        if self.csv_path.as_os_str().is_empty() {
            return Err(BatchError::Config("csv_path is empty".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BatchConfig::new("data.csv");
        assert!(config.enabled);
        assert_eq!(config.batch_size, 20);
        assert_eq!(config.concurrent_tasks, 5);
        assert_eq!(config.mode, ProcessingMode::Parallel);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_sizes_rejected() {
        assert!(BatchConfig::new("d.csv").with_batch_size(0).validate().is_err());
        assert!(BatchConfig::new("d.csv")
            .with_concurrent_tasks(0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_disabled_config_rejected() {
        let mut config = BatchConfig::new("d.csv");
        config.enabled = false;
        assert!(config.validate().is_err());
    }
}
