use serde::Deserialize;
use std::path::Path;
use strand_logbuffer::descriptor::{TERM_MAX_LENGTH, TERM_MIN_LENGTH};
use strand_ringbuffer::HEADER_LENGTH;

/// Settings for `strand-probe`.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ProbeConfig {
    /// Directory holding `cnc.ring` and `stream.log`.
    #[serde(default = "defaults::dir")]
    pub dir: String,
    #[serde(default = "defaults::log_level")]
    pub log_level: String,
    #[serde(default = "defaults::term_length")]
    pub term_length: usize,
    /// Record space of the ring buffer, excluding its trailer.
    #[serde(default = "defaults::ring_capacity")]
    pub ring_capacity: usize,
    #[serde(default = "defaults::writers")]
    pub writers: usize,
    #[serde(default = "defaults::messages_per_writer")]
    pub messages_per_writer: u64,
    #[serde(default = "defaults::fragment_limit")]
    pub fragment_limit: usize,
    #[serde(default = "defaults::message_count_limit")]
    pub message_count_limit: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read '{path}'")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config")]
    Parse(#[from] toml::de::Error),

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

mod defaults {
    pub fn dir() -> String {
        "/tmp/strand".into()
    }

    pub fn log_level() -> String {
        "info".into()
    }

    pub fn term_length() -> usize {
        strand_logbuffer::descriptor::TERM_MIN_LENGTH
    }

    pub fn ring_capacity() -> usize {
        64 * 1024
    }

    pub fn writers() -> usize {
        4
    }

    pub fn messages_per_writer() -> u64 {
        100_000
    }

    pub fn fragment_limit() -> usize {
        10
    }

    pub fn message_count_limit() -> usize {
        64
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            dir: defaults::dir(),
            log_level: defaults::log_level(),
            term_length: defaults::term_length(),
            ring_capacity: defaults::ring_capacity(),
            writers: defaults::writers(),
            messages_per_writer: defaults::messages_per_writer(),
            fragment_limit: defaults::fragment_limit(),
            message_count_limit: defaults::message_count_limit(),
        }
    }
}

impl ProbeConfig {
    pub fn load(path: impl AsRef<Path> + ToString) -> Result<Self, ConfigError> {
        let toml_to_str = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        Self::from_toml(&toml_to_str)
    }

    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let probe_config: ProbeConfig = toml::from_str(toml_str)?;
        probe_config.validate()?;
        Ok(probe_config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.term_length.is_power_of_two()
            || !(TERM_MIN_LENGTH..=TERM_MAX_LENGTH).contains(&self.term_length)
        {
            return Err(invalid(
                "term_length",
                format!(
                    "{} must be a power of two between {TERM_MIN_LENGTH} and {TERM_MAX_LENGTH}",
                    self.term_length
                ),
            ));
        }
        if !self.ring_capacity.is_power_of_two() || self.ring_capacity < HEADER_LENGTH {
            return Err(invalid(
                "ring_capacity",
                format!(
                    "{} must be a power of two of at least {HEADER_LENGTH}",
                    self.ring_capacity
                ),
            ));
        }
        for (field, value) in [
            ("writers", self.writers),
            ("fragment_limit", self.fragment_limit),
            ("message_count_limit", self.message_count_limit),
        ] {
            if value == 0 {
                return Err(invalid(field, "must be greater than zero".into()));
            }
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: String) -> ConfigError {
    ConfigError::Invalid { field, reason }
}
