use std::env;
use std::path::PathBuf;

use crate::error::AppError;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub battery: BatteryConfig,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_connections: u32,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Timing and sizing parameters for the six tests.
///
/// Every value has a sane default; env overrides exist so that clinical
/// deployments can retune durations without a rebuild.
#[derive(Debug, Clone)]
pub struct BatteryConfig {
    pub corsi: CorsiConfig,
    pub stroop: StroopConfig,
    pub reaction: ReactionConfig,
    pub fluency: FluencyConfig,
    pub rotation: RotationConfig,
    pub raven: RavenConfig,
    /// Delay before per-iteration feedback is replaced by the next stimulus.
    pub feedback_delay_ms: u64,
}

/// Sequence-memory (Corsi) parameters
#[derive(Debug, Clone)]
pub struct CorsiConfig {
    /// Sequence length of the first iteration.
    pub start_length: u32,
    /// Run ends successfully once a sequence longer than this is reached.
    pub max_length: u32,
    /// Consecutive errors at one length that end the run.
    pub error_limit: u32,
    /// Memorization time granted per sequence element.
    pub memorize_ms_per_item: u64,
}

/// Stroop interference parameters
#[derive(Debug, Clone)]
pub struct StroopConfig {
    pub parts: u32,
    pub iterations_per_part: u32,
}

/// Reaction-time parameters
#[derive(Debug, Clone)]
pub struct ReactionConfig {
    pub max_attempts: u32,
    /// Response window after the target appears.
    pub window_ms: u64,
    /// Random pre-target delay range.
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Assumed transport round-trip subtracted from measured latency.
    /// A heuristic, deliberately configurable rather than load-bearing.
    pub latency_correction_ms: u64,
}

/// Verbal-fluency parameters
#[derive(Debug, Clone)]
pub struct FluencyConfig {
    pub duration_secs: u64,
    /// Countdown display refresh interval.
    pub tick_secs: u64,
}

/// Mental-rotation parameters
#[derive(Debug, Clone)]
pub struct RotationConfig {
    pub iterations: u32,
}

/// Progressive-matrices (Raven) parameters
#[derive(Debug, Clone)]
pub struct RavenConfig {
    pub iterations: u32,
}

fn env_u32(key: &str, default: u32) -> u32 {
    env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let database = DatabaseConfig {
            path: PathBuf::from(
                env::var("DATABASE_PATH").unwrap_or_else(|_| "./data/results.db".to_string()),
            ),
            max_connections: env_u32("DATABASE_MAX_CONNECTIONS", 5),
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        let battery = BatteryConfig::from_env()?;

        Ok(Config {
            database,
            logging,
            battery,
        })
    }
}

impl BatteryConfig {
    /// Load battery parameters from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        let corsi = CorsiConfig {
            start_length: env_u32("CORSI_START_LENGTH", 2),
            max_length: env_u32("CORSI_MAX_LENGTH", 9),
            error_limit: env_u32("CORSI_ERROR_LIMIT", 2),
            memorize_ms_per_item: env_u64("CORSI_MEMORIZE_MS_PER_ITEM", 1000),
        };
        if corsi.start_length == 0 || corsi.start_length > corsi.max_length {
            return Err(AppError::Config {
                message: format!(
                    "CORSI_START_LENGTH {} must be within 1..={}",
                    corsi.start_length, corsi.max_length
                ),
            });
        }

        let reaction = ReactionConfig {
            max_attempts: env_u32("REACTION_MAX_ATTEMPTS", 3),
            window_ms: env_u64("REACTION_WINDOW_MS", 1000),
            min_delay_ms: env_u64("REACTION_MIN_DELAY_MS", 1500),
            max_delay_ms: env_u64("REACTION_MAX_DELAY_MS", 4000),
            latency_correction_ms: env_u64("REACTION_LATENCY_CORRECTION_MS", 150),
        };
        if reaction.min_delay_ms > reaction.max_delay_ms {
            return Err(AppError::Config {
                message: "REACTION_MIN_DELAY_MS exceeds REACTION_MAX_DELAY_MS".to_string(),
            });
        }

        Ok(BatteryConfig {
            corsi,
            stroop: StroopConfig {
                parts: 3,
                iterations_per_part: env_u32("STROOP_ITERATIONS_PER_PART", 8),
            },
            reaction,
            fluency: FluencyConfig {
                duration_secs: env_u64("FLUENCY_DURATION_SECS", 60),
                tick_secs: env_u64("FLUENCY_TICK_SECS", 10),
            },
            rotation: RotationConfig {
                iterations: env_u32("ROTATION_ITERATIONS", 10),
            },
            raven: RavenConfig {
                iterations: env_u32("RAVEN_ITERATIONS", 10),
            },
            feedback_delay_ms: env_u64("FEEDBACK_DELAY_MS", 1200),
        })
    }
}

impl Default for BatteryConfig {
    fn default() -> Self {
        Self {
            corsi: CorsiConfig {
                start_length: 2,
                max_length: 9,
                error_limit: 2,
                memorize_ms_per_item: 1000,
            },
            stroop: StroopConfig {
                parts: 3,
                iterations_per_part: 8,
            },
            reaction: ReactionConfig {
                max_attempts: 3,
                window_ms: 1000,
                min_delay_ms: 1500,
                max_delay_ms: 4000,
                latency_correction_ms: 150,
            },
            fluency: FluencyConfig {
                duration_secs: 60,
                tick_secs: 10,
            },
            rotation: RotationConfig { iterations: 10 },
            raven: RavenConfig { iterations: 10 },
            feedback_delay_ms: 1200,
        }
    }
}
