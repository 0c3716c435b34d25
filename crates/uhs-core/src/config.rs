use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{UhsError, UhsResult};

/// Top-level configuration (loaded from uhs.toml)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UhsConfig {
    pub log: LogConfig,
    pub codec: CodecConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level or EnvFilter directive (default: warn)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "warn".into(),
            format: "text".into(),
        }
    }
}

/// Encoder/decoder settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    /// Largest container the decoder will accept (default: 64 MiB)
    pub max_document_bytes: u64,
    /// Require offset/length fields to use the minimal width the writer
    /// would produce, not merely a consistent one
    pub strict_field_widths: bool,
    /// Decode every freshly encoded container and compare it to its source
    pub verify_roundtrip: bool,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            max_document_bytes: 64 * 1024 * 1024,
            strict_field_widths: true,
            verify_roundtrip: false,
        }
    }
}

impl UhsConfig {
    /// Load from a TOML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> UhsResult<Self> {
        if !path.exists() {
            tracing::debug!("config file not found: {}  (using defaults)", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: UhsConfig = toml::from_str(&content)
            .map_err(|e| UhsError::Config(format!("parsing {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> UhsResult<()> {
        if self.codec.max_document_bytes == 0 {
            return Err(UhsError::Config(
                "codec.max_document_bytes must be greater than zero".into(),
            ));
        }
        match self.log.format.as_str() {
            "json" | "text" => Ok(()),
            other => Err(UhsError::Config(format!(
                "log.format must be \"json\" or \"text\", got {other:?}"
            ))),
        }
    }

    pub fn to_toml(&self) -> UhsResult<String> {
        toml::to_string_pretty(self).map_err(|e| UhsError::Config(format!("serializing: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = UhsConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, UhsConfig::default());
        assert!(config.codec.strict_field_widths);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("uhs.toml");
        std::fs::write(&path, "[codec]\nverify_roundtrip = true\n").unwrap();

        let config = UhsConfig::load(&path).unwrap();
        assert!(config.codec.verify_roundtrip);
        assert_eq!(config.codec.max_document_bytes, 64 * 1024 * 1024);
        assert_eq!(config.log.level, "warn");
    }

    #[test]
    fn rejects_unknown_log_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("uhs.toml");
        std::fs::write(&path, "[log]\nformat = \"xml\"\n").unwrap();

        let err = UhsConfig::load(&path).unwrap_err();
        assert!(matches!(err, UhsError::Config(_)));
    }

    #[test]
    fn rejects_zero_size_limit() {
        let mut config = UhsConfig::default();
        config.codec.max_document_bytes = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn toml_roundtrip() {
        let config = UhsConfig::default();
        let text = config.to_toml().unwrap();
        let back: UhsConfig = toml::from_str(&text).unwrap();
        assert_eq!(back, config);
    }
}
