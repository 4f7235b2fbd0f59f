//! Transport configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via BOLT_CONFIG)
//! 3. Environment variables

use bolt_protocol::frame::V2_REQUEST_HEADER_LEN;
use bolt_protocol::{BoltProtocol, CodecType, EncodeOptions, MAX_FRAME_SIZE};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default read buffer size (8 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8 * 1024;

/// Minimum read buffer size (1 KiB).
pub const MIN_READ_BUFFER_SIZE: usize = 1024;

/// Maximum read buffer size (1 MiB).
pub const MAX_READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Default write buffer high-water mark (16 KiB).
pub const DEFAULT_HIGH_WATER_MARK: usize = 16 * 1024;

/// Transport configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Framing options for outbound requests and heartbeats.
    pub protocol: ProtocolConfig,
    /// Buffer sizing.
    pub io: IoConfig,
    /// Logging configuration.
    pub log: LogConfig,
}

impl Config {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("BOLT_CONFIG") {
            config = Self::from_file(&path)?;
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    /// Loads configuration from environment variables only.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        self.protocol.apply_env_overrides();
        self.io.apply_env_overrides();
        self.log.apply_env_overrides();
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.protocol.validate()?;
        self.io.validate()
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        Ok(())
    }
}

/// Outbound framing options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// `bolt` (v1) or `bolt2` (v2).
    pub protocol: BoltProtocol,
    /// Version byte written by v2.
    pub bolt_version: u8,
    /// Content codec: `hessian2` or `protobuf`.
    pub codec: CodecType,
    /// Append a CRC32 to v2 packets.
    pub crc_enabled: bool,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            protocol: BoltProtocol::V1,
            bolt_version: 1,
            codec: CodecType::Hessian2,
            crc_enabled: false,
        }
    }
}

impl ProtocolConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(protocol) = std::env::var("BOLT_PROTOCOL") {
            if let Ok(parsed) = protocol.parse() {
                self.protocol = parsed;
            }
        }

        if let Ok(version) = std::env::var("BOLT_VERSION") {
            if let Ok(v) = version.parse() {
                self.bolt_version = v;
            }
        }

        if let Ok(codec) = std::env::var("BOLT_CODEC") {
            if let Ok(parsed) = codec.parse() {
                self.codec = parsed;
            }
        }

        if let Ok(crc) = std::env::var("BOLT_CRC") {
            self.crc_enabled = crc == "1" || crc.to_lowercase() == "true";
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.crc_enabled && self.protocol == BoltProtocol::V1 {
            return Err(ConfigError::ValidationError(
                "crc_enabled requires protocol bolt2".to_string(),
            ));
        }
        Ok(())
    }

    /// Encoder options for this configuration.
    pub fn encode_options(&self) -> EncodeOptions {
        EncodeOptions {
            protocol: self.protocol,
            bolt_version: self.bolt_version,
            codec: self.codec,
            crc_enabled: self.crc_enabled,
        }
    }
}

/// Buffer sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IoConfig {
    /// Bytes read from the socket per call.
    pub read_buffer_size: usize,
    /// Buffered outbound bytes at which the writer pauses and queues.
    pub high_water_mark: usize,
    /// Largest inbound packet accepted before the stream is failed.
    pub max_frame_size: usize,
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
            max_frame_size: MAX_FRAME_SIZE,
        }
    }
}

impl IoConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(size) = std::env::var("BOLT_READ_BUFFER_SIZE") {
            if let Ok(n) = size.parse() {
                self.read_buffer_size = n;
            }
        }

        if let Ok(mark) = std::env::var("BOLT_HIGH_WATER_MARK") {
            if let Ok(n) = mark.parse() {
                self.high_water_mark = n;
            }
        }

        if let Ok(max) = std::env::var("BOLT_MAX_FRAME_SIZE") {
            if let Ok(n) = max.parse() {
                self.max_frame_size = n;
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_READ_BUFFER_SIZE..=MAX_READ_BUFFER_SIZE).contains(&self.read_buffer_size) {
            return Err(ConfigError::ValidationError(format!(
                "read_buffer_size must be between {} and {}",
                MIN_READ_BUFFER_SIZE, MAX_READ_BUFFER_SIZE
            )));
        }
        if self.high_water_mark == 0 {
            return Err(ConfigError::ValidationError(
                "high_water_mark must be positive".to_string(),
            ));
        }
        if self.max_frame_size < V2_REQUEST_HEADER_LEN {
            return Err(ConfigError::ValidationError(
                "max_frame_size must hold at least a packet header".to_string(),
            ));
        }
        Ok(())
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter used when RUST_LOG is not set, in `EnvFilter` syntax.
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

impl LogConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(filter) = std::env::var("BOLT_LOG") {
            if !filter.is_empty() {
                self.filter = filter;
            }
        }
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.protocol.protocol, BoltProtocol::V1);
        assert_eq!(config.protocol.codec, CodecType::Hessian2);
        assert!(!config.protocol.crc_enabled);
        assert_eq!(config.io.read_buffer_size, DEFAULT_READ_BUFFER_SIZE);
        assert_eq!(config.log.filter, "info");
        assert_eq!(config.io.max_frame_size, MAX_FRAME_SIZE);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml_roundtrip() {
        let mut config = Config::default();
        config.protocol.protocol = BoltProtocol::V2;
        config.protocol.codec = CodecType::Protobuf;
        let yaml = serde_yaml::to_string(&config).unwrap();
        assert!(yaml.contains("bolt2"));
        assert!(yaml.contains("protobuf"));
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.protocol.protocol, BoltProtocol::V2);
        assert_eq!(parsed.protocol.codec, CodecType::Protobuf);
    }

    #[test]
    fn test_from_file_partial() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bolt.yaml");
        std::fs::write(
            &path,
            "protocol:\n  protocol: bolt2\n  crc_enabled: true\nio:\n  high_water_mark: 4096\n",
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.protocol.protocol, BoltProtocol::V2);
        assert!(config.protocol.crc_enabled);
        assert_eq!(config.protocol.bolt_version, 1);
        assert_eq!(config.io.high_water_mark, 4096);
        assert_eq!(config.io.read_buffer_size, DEFAULT_READ_BUFFER_SIZE);

        let options = config.protocol.encode_options();
        assert_eq!(options.protocol, BoltProtocol::V2);
        assert!(options.crc_enabled);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("saved.yaml");
        let mut config = Config::default();
        config.io.high_water_mark = 1234;
        config.save(&path).unwrap();
        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.io.high_water_mark, 1234);
    }

    #[test]
    fn test_missing_and_invalid_files() {
        let err = Config::from_file("/nonexistent/bolt.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::IoError(..)));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.yaml");
        std::fs::write(&path, "protocol:\n  codec: json\n").unwrap();
        let err = Config::from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(..)));
    }

    #[test]
    fn test_validation() {
        let mut config = Config::default();
        config.protocol.crc_enabled = true;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));

        let mut config = Config::default();
        config.io.read_buffer_size = 10;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.io.max_frame_size = 8;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        std::env::set_var("BOLT_PROTOCOL", "bolt2");
        std::env::set_var("BOLT_CODEC", "protobuf");
        std::env::set_var("BOLT_CRC", "true");
        std::env::set_var("BOLT_HIGH_WATER_MARK", "2048");
        std::env::set_var("BOLT_LOG", "debug");

        let config = Config::from_env();

        for key in [
            "BOLT_PROTOCOL",
            "BOLT_CODEC",
            "BOLT_CRC",
            "BOLT_HIGH_WATER_MARK",
            "BOLT_LOG",
        ] {
            std::env::remove_var(key);
        }

        assert_eq!(config.protocol.protocol, BoltProtocol::V2);
        assert_eq!(config.protocol.codec, CodecType::Protobuf);
        assert!(config.protocol.crc_enabled);
        assert_eq!(config.io.high_water_mark, 2048);
        assert_eq!(config.log.filter, "debug");
    }
}
