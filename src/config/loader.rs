//! Configuration loader with environment variable expansion

use super::{expand_env_vars, Config, ConfigError};
use std::path::Path;

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from YAML text
    pub fn parse(content: &str) -> Result<Config, ConfigError> {
        let expanded = expand_env_vars(content);
        let config: Config = serde_yaml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_expands_before_parsing() {
        std::env::set_var("VERITY_TEST_BUCKET", "from-env");
        let config = ConfigLoader::parse(
            r#"
store:
  endpoint: "https://project.example.co"
  api_key: "key"
  bucket: "${VERITY_TEST_BUCKET}"
"#,
        )
        .unwrap();
        assert_eq!(config.store.bucket, "from-env");
        std::env::remove_var("VERITY_TEST_BUCKET");
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = ConfigLoader::load("/nonexistent/verity.yaml");
        assert!(matches!(result, Err(ConfigError::IoError(_))));
    }
}
