use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BackoffError {
    #[error("initial_delay_ms must be positive")]
    ZeroInitialDelay,
    #[error("backoff_factor must be a finite number >= 1.0, got {0}")]
    InvalidFactor(f64),
    #[error("max_delay_ms ({max}) is below initial_delay_ms ({initial})")]
    MaxBelowInitial { initial: u64, max: u64 },
}

/// Retry delay tuning for one family of reconnecting resources.
///
/// There is no attempt limit: a channel keeps retrying until it is torn down.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct BackoffConfig {
    pub initial_delay_ms: u64,
    pub backoff_factor: f64,
    pub max_delay_ms: u64,
}

impl BackoffConfig {
    /// Metadata and alert sockets.
    pub const SOCKET: Self = Self {
        initial_delay_ms: 1000,
        backoff_factor: 1.5,
        max_delay_ms: 30_000,
    };

    /// MJPEG image pulls.
    pub const IMAGE: Self = Self {
        initial_delay_ms: 2000,
        backoff_factor: 1.5,
        max_delay_ms: 30_000,
    };

    pub fn validate(&self) -> Result<(), BackoffError> {
        if self.initial_delay_ms == 0 {
            return Err(BackoffError::ZeroInitialDelay);
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(BackoffError::InvalidFactor(self.backoff_factor));
        }
        if self.max_delay_ms < self.initial_delay_ms {
            return Err(BackoffError::MaxBelowInitial {
                initial: self.initial_delay_ms,
                max: self.max_delay_ms,
            });
        }
        Ok(())
    }
}

/// `min(initial * factor^attempt, max)` in whole milliseconds.
pub fn delay_ms(attempt: u32, config: &BackoffConfig) -> u64 {
    let exponent = attempt.min(i32::MAX as u32) as i32;
    let raw = config.initial_delay_ms as f64 * config.backoff_factor.powi(exponent);
    let max = config.max_delay_ms as f64;

    // powi overflows to +inf for large attempts, which min() folds into the cap
    if raw.is_nan() || raw >= max {
        config.max_delay_ms
    } else {
        raw as u64
    }
}

pub fn delay(attempt: u32, config: &BackoffConfig) -> Duration {
    Duration::from_millis(delay_ms(attempt, config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_schedule() {
        let c = BackoffConfig::SOCKET;
        assert_eq!(delay_ms(0, &c), 1000);
        assert_eq!(delay_ms(1, &c), 1500);
        assert_eq!(delay_ms(2, &c), 2250);
        assert_eq!(delay_ms(3, &c), 3375);
        assert_eq!(delay_ms(4, &c), 5062);
        assert_eq!(delay_ms(9, &c), 30_000);
    }

    #[test]
    fn test_image_schedule() {
        let c = BackoffConfig::IMAGE;
        assert_eq!(delay(0, &c), Duration::from_millis(2000));
        assert_eq!(delay_ms(1, &c), 3000);
        assert_eq!(delay_ms(2, &c), 4500);
        assert_eq!(delay_ms(20, &c), 30_000);
    }

    #[test]
    fn test_monotonic_and_capped() {
        for c in [BackoffConfig::SOCKET, BackoffConfig::IMAGE] {
            let mut prev = 0;
            for n in 0..200 {
                let d = delay_ms(n, &c);
                assert!(d >= prev, "delay decreased at attempt {n}");
                assert!(d <= c.max_delay_ms);
                prev = d;
            }
        }
    }

    #[test]
    fn test_huge_attempt_saturates() {
        assert_eq!(delay_ms(u32::MAX, &BackoffConfig::SOCKET), 30_000);
    }

    #[test]
    fn test_validate() {
        assert!(BackoffConfig::SOCKET.validate().is_ok());
        assert!(BackoffConfig::IMAGE.validate().is_ok());

        let zero = BackoffConfig {
            initial_delay_ms: 0,
            ..BackoffConfig::SOCKET
        };
        assert_eq!(zero.validate(), Err(BackoffError::ZeroInitialDelay));

        let shrinking = BackoffConfig {
            backoff_factor: 0.5,
            ..BackoffConfig::SOCKET
        };
        assert_eq!(shrinking.validate(), Err(BackoffError::InvalidFactor(0.5)));

        let inverted = BackoffConfig {
            initial_delay_ms: 5000,
            max_delay_ms: 1000,
            ..BackoffConfig::SOCKET
        };
        assert_eq!(
            inverted.validate(),
            Err(BackoffError::MaxBelowInitial {
                initial: 5000,
                max: 1000
            })
        );

        let unbounded = BackoffConfig {
            backoff_factor: f64::INFINITY,
            ..BackoffConfig::SOCKET
        };
        assert!(matches!(
            unbounded.validate(),
            Err(BackoffError::InvalidFactor(_))
        ));
    }
}
