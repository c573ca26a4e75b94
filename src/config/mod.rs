//! Configuration module for the conversation client
//!
//! Configuration is resolved from environment variables (with `.env` support
//! via dotenvy, loaded in `main`) and overridden by CLI flags. Priority:
//! CLI flags > ENV vars > .env values > defaults.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default Converse API endpoint.
pub const DEFAULT_API_ENDPOINT: &str = "https://embeddedassistant.googleapis.com";

/// Default path for stored OAuth2 credentials.
pub const DEFAULT_CREDENTIALS_FILE: &str = ".converse_credentials.json";

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid endpoint '{0}': must be an https:// or http:// URL")]
    InvalidEndpoint(String),

    #[error("unsupported sample rate {0} Hz: must be between 8000 and 48000")]
    InvalidSampleRate(u32),

    #[error("unsupported channel count {0}: only mono (1) is supported")]
    InvalidChannels(u16),

    #[error("chunk size must be a positive multiple of the sample width, got {0}")]
    InvalidChunkSize(usize),

    #[error("volume must be between 0 and 100, got {0}")]
    InvalidVolume(u8),

    #[error("invalid value for {0}: '{1}'")]
    InvalidEnvValue(&'static str, String),
}

/// PCM format contract shared by sources, sinks and the network stream.
///
/// Negotiated once per session, out of band; chunks carry no format metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Channel count (mono only)
    pub channels: u16,
    /// Bits per sample (signed little-endian PCM)
    pub bits_per_sample: u16,
    /// Bytes per chunk moved through the pipeline
    pub chunk_bytes: usize,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            channels: 1,
            bits_per_sample: 16,
            // 100ms of 16kHz mono s16le
            chunk_bytes: 3200,
        }
    }
}

impl AudioFormat {
    /// Bytes of PCM data per second at this format.
    pub fn bytes_per_second(&self) -> u64 {
        self.sample_rate as u64 * self.channels as u64 * (self.bits_per_sample as u64 / 8)
    }

    /// Bytes per sample frame (all channels).
    pub fn bytes_per_frame(&self) -> usize {
        self.channels as usize * (self.bits_per_sample as usize / 8)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(8000..=48000).contains(&self.sample_rate) {
            return Err(ConfigError::InvalidSampleRate(self.sample_rate));
        }
        if self.channels != 1 {
            return Err(ConfigError::InvalidChannels(self.channels));
        }
        if self.chunk_bytes == 0 || self.chunk_bytes % self.bytes_per_frame() != 0 {
            return Err(ConfigError::InvalidChunkSize(self.chunk_bytes));
        }
        Ok(())
    }
}

/// Client configuration
///
/// Everything needed to run a conversation session: the API endpoint, the
/// stored credential location, the PCM format contract, playback volume and
/// the file-input pacing switch.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Converse API endpoint (scheme + host, https in production)
    pub endpoint: String,

    /// Path to stored OAuth2 credentials
    pub credentials_path: PathBuf,

    /// PCM format contract for the session
    pub audio: AudioFormat,

    /// Playback volume percentage requested from the service (0-100)
    pub volume_percent: u8,

    /// Throttle file reads to approximate real-time pacing.
    /// Cosmetic for the protocol; keeps a file input behaving like a
    /// microphone. See DESIGN.md.
    pub file_pacing: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_API_ENDPOINT.to_string(),
            credentials_path: PathBuf::from(DEFAULT_CREDENTIALS_FILE),
            audio: AudioFormat::default(),
            volume_percent: 50,
            file_pacing: true,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset.
    ///
    /// Recognized variables: `CONVERSE_API_ENDPOINT`, `CONVERSE_CREDENTIALS`,
    /// `CONVERSE_SAMPLE_RATE`, `CONVERSE_VOLUME`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(endpoint) = std::env::var("CONVERSE_API_ENDPOINT") {
            if !endpoint.is_empty() {
                config.endpoint = endpoint;
            }
        }
        if let Ok(path) = std::env::var("CONVERSE_CREDENTIALS") {
            if !path.is_empty() {
                config.credentials_path = PathBuf::from(path);
            }
        }
        if let Ok(rate) = std::env::var("CONVERSE_SAMPLE_RATE") {
            if !rate.is_empty() {
                config.audio.sample_rate = parse_env("CONVERSE_SAMPLE_RATE", &rate)?;
            }
        }
        if let Ok(volume) = std::env::var("CONVERSE_VOLUME") {
            if !volume.is_empty() {
                config.volume_percent = parse_env("CONVERSE_VOLUME", &volume)?;
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration before any turn starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.endpoint.starts_with("https://") && !self.endpoint.starts_with("http://") {
            return Err(ConfigError::InvalidEndpoint(self.endpoint.clone()));
        }
        if self.volume_percent > 100 {
            return Err(ConfigError::InvalidVolume(self.volume_percent));
        }
        self.audio.validate()
    }
}

/// Parse an environment value, naming the variable in the error.
fn parse_env<T: std::str::FromStr>(name: &'static str, value: &str) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::InvalidEnvValue(name, value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ClientConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.audio.sample_rate, 16000);
        assert!(config.file_pacing);
    }

    #[test]
    fn test_audio_format_bytes_per_second() {
        let format = AudioFormat::default();
        // 16kHz * 1 channel * 2 bytes
        assert_eq!(format.bytes_per_second(), 32000);
        assert_eq!(format.bytes_per_frame(), 2);
    }

    #[test]
    fn test_invalid_sample_rate_rejected() {
        let mut config = ClientConfig::default();
        config.audio.sample_rate = 192000;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidSampleRate(192000))
        ));
    }

    #[test]
    fn test_invalid_endpoint_rejected() {
        let mut config = ClientConfig::default();
        config.endpoint = "not-a-url".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidEndpoint(_))
        ));
    }

    #[test]
    fn test_odd_chunk_size_rejected() {
        let mut config = ClientConfig::default();
        config.audio.chunk_bytes = 3201;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidChunkSize(3201))
        ));
    }

    #[test]
    fn test_unparsable_env_value_rejected() {
        assert_eq!(parse_env::<u32>("CONVERSE_SAMPLE_RATE", "24000").unwrap(), 24000);
        assert_eq!(parse_env::<u8>("CONVERSE_VOLUME", "55").unwrap(), 55);

        let err = parse_env::<u32>("CONVERSE_SAMPLE_RATE", "fast").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnvValue("CONVERSE_SAMPLE_RATE", _)));
        assert!(err.to_string().contains("CONVERSE_SAMPLE_RATE"));

        // Out-of-range for the type is rejected too, not truncated
        assert!(parse_env::<u8>("CONVERSE_VOLUME", "300").is_err());
    }

    #[test]
    fn test_stereo_rejected() {
        let mut config = ClientConfig::default();
        config.audio.channels = 2;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidChannels(2))
        ));
    }
}
