//! Error types for Revenant
//!
//! Centralized error handling using thiserror.

use thiserror::Error;

/// All error types that can occur in Revenant
#[derive(Debug, Error)]
pub enum RevenantError {
    /// Volume is not tracked by the timing store
    #[error("Volume not found: {0}")]
    VolumeNotFound(String),

    /// Invalid state transition or operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Configuration could not be loaded or migrated
    #[error("Config error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Result type alias for Revenant operations
pub type Result<T> = std::result::Result<T, RevenantError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volume_not_found_error() {
        let err = RevenantError::VolumeNotFound("E:".to_string());
        assert_eq!(err.to_string(), "Volume not found: E:");
    }

    #[test]
    fn test_invalid_state_error() {
        let err = RevenantError::InvalidState("cannot pause quarantined volume".to_string());
        assert_eq!(err.to_string(), "Invalid state: cannot pause quarantined volume");
    }

    #[test]
    fn test_config_error() {
        let err = RevenantError::Config("unsupported version 9".to_string());
        assert_eq!(err.to_string(), "Config error: unsupported version 9");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: RevenantError = io_err.into();
        assert!(matches!(err, RevenantError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_yaml_error_conversion() {
        let yaml_err = serde_yaml::from_str::<Vec<u32>>("{ not: a list }").unwrap_err();
        let err: RevenantError = yaml_err.into();
        assert!(matches!(err, RevenantError::Yaml(_)));
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_ok() -> Result<i32> {
            Ok(42)
        }

        fn returns_err() -> Result<i32> {
            Err(RevenantError::InvalidState("test".to_string()))
        }

        assert!(returns_ok().is_ok());
        assert!(returns_err().is_err());
    }
}
