//! Transport core configuration.
//!
//! Configuration is loaded from environment variables with documented
//! defaults. Validation happens at load time and returns a
//! [`ConfigError`]; components receive an already-validated config.

use std::env;
use std::time::Duration;
use thiserror::Error;

/// Default maximum segment payload per segment (so that payload plus
/// the 16-byte segment header stays within the 1500-byte wire bound).
pub const DEFAULT_MAX_PAYLOAD: usize = 1484;

/// Default bound on the audio reassembler's out-of-order cache.
pub const DEFAULT_AUDIO_CACHE_LIMIT: usize = 16;

/// Default bound on the video reassembler's frame cache.
pub const DEFAULT_MAX_CACHED_FRAMES: usize = 32;

/// Default retransmission history capacity (FEC frames).
pub const DEFAULT_HISTORY_CAPACITY: usize = 512;

/// Default FEC window source unit count.
pub const DEFAULT_FEC_K: u8 = 8;

/// Default FEC window repair unit count.
pub const DEFAULT_FEC_R: u8 = 2;

/// Default ceiling on the repair unit count.
pub const DEFAULT_FEC_R_MAX: u8 = 4;

/// Default network loss threshold (basis points) above which the
/// controller raises redundancy.
pub const DEFAULT_LOSS_RAISE_THRESHOLD_BP: u16 = 200;

/// Default RTT threshold (milliseconds) above which the controller
/// raises redundancy.
pub const DEFAULT_RTT_THRESHOLD_MS: u32 = 150;

/// Default number of consecutive clean reports before redundancy is
/// lowered.
pub const DEFAULT_CLEAN_REPORTS_TO_LOWER: u32 = 3;

/// Default minimum interval between FEC parameter updates.
pub const DEFAULT_MIN_UPDATE_INTERVAL: Duration = Duration::from_secs(2);

/// Transport core configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Maximum segment payload length in bytes.
    pub max_payload: usize,
    /// Bound on the audio reassembler's out-of-order cache.
    pub audio_cache_limit: usize,
    /// Bound on the video reassembler's frame cache.
    pub max_cached_frames: usize,
    /// Retransmission history capacity in FEC frames.
    pub history_capacity: usize,
    /// Initial FEC window source unit count.
    pub fec_k: u8,
    /// Initial FEC window repair unit count.
    pub fec_r: u8,
    /// Ceiling on the repair unit count.
    pub fec_r_max: u8,
    /// Network loss threshold in basis points for raising redundancy.
    pub loss_raise_threshold_bp: u16,
    /// RTT threshold in milliseconds for raising redundancy.
    pub rtt_threshold_ms: u32,
    /// Consecutive clean reports before lowering redundancy.
    pub clean_reports_to_lower: u32,
    /// Minimum interval between FEC parameter updates.
    pub min_update_interval: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_payload: DEFAULT_MAX_PAYLOAD,
            audio_cache_limit: DEFAULT_AUDIO_CACHE_LIMIT,
            max_cached_frames: DEFAULT_MAX_CACHED_FRAMES,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            fec_k: DEFAULT_FEC_K,
            fec_r: DEFAULT_FEC_R,
            fec_r_max: DEFAULT_FEC_R_MAX,
            loss_raise_threshold_bp: DEFAULT_LOSS_RAISE_THRESHOLD_BP,
            rtt_threshold_ms: DEFAULT_RTT_THRESHOLD_MS,
            clean_reports_to_lower: DEFAULT_CLEAN_REPORTS_TO_LOWER,
            min_update_interval: DEFAULT_MIN_UPDATE_INTERVAL,
        }
    }
}

/// Configuration load/validation error.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable held a value that failed to parse.
    #[error("Invalid value for {variable}: {value}")]
    InvalidValue { variable: String, value: String },

    /// A value parsed but violates a documented bound.
    #[error("Out of range for {variable}: {reason}")]
    OutOfRange { variable: String, reason: String },
}

impl TransportConfig {
    /// Load configuration from environment variables, falling back to
    /// the documented defaults for unset variables.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if a set variable fails to parse or
    /// violates validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(v) = read_env("MT_MAX_PAYLOAD")? {
            config.max_payload = v;
        }
        if let Some(v) = read_env("MT_AUDIO_CACHE_LIMIT")? {
            config.audio_cache_limit = v;
        }
        if let Some(v) = read_env("MT_MAX_CACHED_FRAMES")? {
            config.max_cached_frames = v;
        }
        if let Some(v) = read_env("MT_HISTORY_CAPACITY")? {
            config.history_capacity = v;
        }
        if let Some(v) = read_env("MT_FEC_K")? {
            config.fec_k = v;
        }
        if let Some(v) = read_env("MT_FEC_R")? {
            config.fec_r = v;
        }
        if let Some(v) = read_env("MT_FEC_R_MAX")? {
            config.fec_r_max = v;
        }
        if let Some(v) = read_env("MT_LOSS_RAISE_THRESHOLD_BP")? {
            config.loss_raise_threshold_bp = v;
        }
        if let Some(v) = read_env("MT_RTT_THRESHOLD_MS")? {
            config.rtt_threshold_ms = v;
        }
        if let Some(v) = read_env("MT_CLEAN_REPORTS_TO_LOWER")? {
            config.clean_reports_to_lower = v;
        }
        if let Some(secs) = read_env::<u64>("MT_MIN_UPDATE_INTERVAL_SECONDS")? {
            config.min_update_interval = Duration::from_secs(secs);
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate bounds.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::OutOfRange`] for any violated bound.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_payload == 0 || self.max_payload > DEFAULT_MAX_PAYLOAD {
            return Err(ConfigError::OutOfRange {
                variable: "MT_MAX_PAYLOAD".to_string(),
                reason: format!("must be in 1..={DEFAULT_MAX_PAYLOAD}"),
            });
        }
        if self.audio_cache_limit == 0 {
            return Err(ConfigError::OutOfRange {
                variable: "MT_AUDIO_CACHE_LIMIT".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.max_cached_frames == 0 {
            return Err(ConfigError::OutOfRange {
                variable: "MT_MAX_CACHED_FRAMES".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.history_capacity == 0 {
            return Err(ConfigError::OutOfRange {
                variable: "MT_HISTORY_CAPACITY".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.fec_k == 0 || self.fec_r == 0 {
            return Err(ConfigError::OutOfRange {
                variable: "MT_FEC_K/MT_FEC_R".to_string(),
                reason: "k and r must both be at least 1".to_string(),
            });
        }
        if self.fec_r_max == 0 || self.fec_r > self.fec_r_max {
            return Err(ConfigError::OutOfRange {
                variable: "MT_FEC_R_MAX".to_string(),
                reason: "must be at least 1 and at least MT_FEC_R".to_string(),
            });
        }
        Ok(())
    }
}

fn read_env<T: std::str::FromStr>(variable: &str) -> Result<Option<T>, ConfigError> {
    match env::var(variable) {
        Ok(value) => value
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                variable: variable.to_string(),
                value,
            }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = TransportConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_payload, 1484);
        assert_eq!(config.fec_k, 8);
        assert_eq!(config.fec_r, 2);
    }

    #[test]
    fn test_zero_fec_params_rejected() {
        let config = TransportConfig {
            fec_r: 0,
            ..TransportConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let config = TransportConfig {
            max_payload: 4000,
            ..TransportConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_r_above_ceiling_rejected() {
        let config = TransportConfig {
            fec_r: 5,
            fec_r_max: 4,
            ..TransportConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
