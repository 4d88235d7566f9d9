//! Usage-cost policy applied when a sub-experiment completes.
//!
//! Two pricing schemes have existed for the analysis model: a flat number
//! of tokens per processed image, and a charge per started minute of
//! provider execution time. Exactly one is active per process; the default
//! is the flat policy.

use crate::error::CoreError;

/// Tokens charged per image under the default flat policy.
pub const DEFAULT_FLAT_TOKENS: i64 = 16;

const MILLIS_PER_MINUTE: u64 = 60_000;

/// How many tokens a completed sub-experiment costs its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageCost {
    /// Fixed charge per completed image.
    Flat { tokens: i64 },
    /// Charge per started minute of execution time (ceiling-rounded).
    PerMinute { tokens_per_minute: i64 },
}

impl Default for UsageCost {
    fn default() -> Self {
        Self::Flat {
            tokens: DEFAULT_FLAT_TOKENS,
        }
    }
}

impl UsageCost {
    /// Parse a policy name (`flat` or `per_minute`) with its token amount.
    pub fn from_name(name: &str, tokens: i64) -> Result<Self, CoreError> {
        if tokens < 0 {
            return Err(CoreError::Validation(format!(
                "Usage cost must not be negative, got {tokens}"
            )));
        }
        match name {
            "flat" => Ok(Self::Flat { tokens }),
            "per_minute" => Ok(Self::PerMinute {
                tokens_per_minute: tokens,
            }),
            other => Err(CoreError::Validation(format!(
                "Unknown usage cost policy '{other}'. Must be one of: flat, per_minute"
            ))),
        }
    }

    /// Tokens to deduct for a member that ran for `execution_time_millis`.
    pub fn tokens_for(self, execution_time_millis: u64) -> i64 {
        match self {
            Self::Flat { tokens } => tokens,
            Self::PerMinute { tokens_per_minute } => {
                let minutes = execution_time_millis.div_ceil(MILLIS_PER_MINUTE);
                tokens_per_minute.saturating_mul(minutes as i64)
            }
        }
    }
}
