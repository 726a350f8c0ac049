//! Configuration loading using Figment.
//!
//! Settings are layered, later sources overriding earlier ones:
//! 1. Built-in defaults ([`Settings::default`])
//! 2. `config/framer.toml` (or a caller-supplied path)
//! 3. Environment variables prefixed with `RUST_FRAMER_`, sections separated by `__`
//!
//! # Example
//! ```no_run
//! use rust_framer::config::Settings;
//!
//! let settings = Settings::load()?;
//! settings.validate()?;
//! println!("Reader mode: {:?}", settings.reader.operation_mode);
//! # Ok::<(), rust_framer::error::FramerError>(())
//! ```
//!
//! Overriding a nested value from the environment:
//!
//! ```text
//! RUST_FRAMER_SCRIPT__TIMEOUT_MS=250
//! RUST_FRAMER_READER__FRAME_DETECTION=start-and-end
//! ```

use crate::error::{AppResult, FramerError};
use crate::parsing::decoder::DecoderMethod;
use crate::parsing::frame::FrameReaderConfig;
use crate::scripting::ScriptEngineConfig;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default settings file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/framer.toml";

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "RUST_FRAMER_";

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Top-level settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Frame reader settings
    #[serde(default)]
    pub reader: FrameReaderConfig,
    /// Script sandbox limits
    #[serde(default)]
    pub script: ScriptEngineConfig,
    /// Frame processing pipeline used by the command-line frontend
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// How frames travel from the reader to the transformer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Decoding applied to each payload before `parse`
    #[serde(default)]
    pub decoder: DecoderMethod,
    /// Script file loaded instead of the default script
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_path: Option<PathBuf>,
    /// Bytes fed to the reader per delivery
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

fn default_name() -> String {
    "Rust Framer".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_chunk_size() -> usize {
    4096
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            decoder: DecoderMethod::default(),
            script_path: None,
            chunk_size: default_chunk_size(),
        }
    }
}

impl Settings {
    /// Load from `config/framer.toml` and the environment.
    ///
    /// A missing file is not an error; defaults and environment overrides
    /// still apply.
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file path and the environment.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        Ok(Self::figment(path.as_ref()).extract()?)
    }

    /// The provider stack used by [`load_from`](Self::load_from).
    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate settings after loading.
    pub fn validate(&self) -> AppResult<()> {
        let level = self.application.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(FramerError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                VALID_LOG_LEVELS.join(", ")
            )));
        }

        self.reader.validate()?;
        self.script.validate().map_err(FramerError::Configuration)?;

        if self.pipeline.chunk_size == 0 {
            return Err(FramerError::Configuration(
                "pipeline chunk_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Render as TOML, e.g. to seed a settings file.
    pub fn to_toml(&self) -> AppResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| FramerError::Configuration(format!("Cannot render settings: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsing::frame::{FrameDetection, OperationMode};
    use serial_test::serial;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    #[serial]
    fn test_missing_file_yields_defaults() {
        let settings = Settings::load_from("does/not/exist.toml").unwrap();
        assert_eq!(settings, Settings::default());
        assert!(settings.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_file_overrides_defaults() {
        let file = write_config(
            r#"
[application]
log_level = "debug"

[reader]
frame_detection = "start-and-end"
start_sequence = "$"
finish_sequence = [13, 10]
checksum_algorithm = "crc16"

[script]
timeout_ms = 250

[pipeline]
decoder = "hexadecimal"
"#,
        );

        let settings = Settings::load_from(file.path()).unwrap();
        assert_eq!(settings.application.log_level, "debug");
        assert_eq!(settings.application.name, "Rust Framer");
        assert_eq!(settings.reader.frame_detection, FrameDetection::StartAndEnd);
        assert_eq!(settings.reader.operation_mode, OperationMode::Configurable);
        assert_eq!(settings.reader.start_sequence, b"$");
        assert_eq!(settings.reader.finish_sequence, b"\r\n");
        assert_eq!(settings.script.timeout_ms, 250);
        assert!(settings.script.enable_console);
        assert_eq!(settings.pipeline.decoder, DecoderMethod::Hexadecimal);
        assert!(settings.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_env_overrides_file() {
        let file = write_config("[script]\ntimeout_ms = 250\n");
        std::env::set_var("RUST_FRAMER_SCRIPT__TIMEOUT_MS", "75");
        std::env::set_var("RUST_FRAMER_APPLICATION__LOG_LEVEL", "warn");

        let result = Settings::load_from(file.path());

        std::env::remove_var("RUST_FRAMER_SCRIPT__TIMEOUT_MS");
        std::env::remove_var("RUST_FRAMER_APPLICATION__LOG_LEVEL");

        let settings = result.unwrap();
        assert_eq!(settings.script.timeout_ms, 75);
        assert_eq!(settings.application.log_level, "warn");
    }

    #[test]
    #[serial]
    fn test_malformed_file_is_config_error() {
        let file = write_config("[script]\ntimeout_ms = \"soon\"\n");
        assert!(matches!(
            Settings::load_from(file.path()),
            Err(FramerError::Config(_))
        ));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut settings = Settings::default();
        settings.application.log_level = "verbose".to_string();
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.script.timeout_ms = 0;
        assert!(matches!(
            settings.validate(),
            Err(FramerError::Configuration(_))
        ));

        let mut settings = Settings::default();
        settings.reader.checksum_algorithm = "CRC-64".to_string();
        assert!(matches!(
            settings.validate(),
            Err(FramerError::UnsupportedChecksum(_))
        ));
    }

    #[test]
    fn test_to_toml_parses_back() {
        let settings = Settings::default();
        let text = settings.to_toml().unwrap();
        assert!(text.contains("[reader]"));
        let parsed: Settings = toml::from_str(&text).unwrap();
        assert_eq!(parsed, settings);
    }
}
