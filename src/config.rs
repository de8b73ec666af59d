use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::decimal::Rate;

/// late-payment penalty configuration
///
/// Process-wide row in the record store; the accrual engine falls back to
/// these defaults when the row is absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PenaltyConfig {
    /// penalty rate per month, e.g. 1.5%
    pub monthly_rate: Rate,
    /// days past due before penalties start accruing
    pub grace_period_days: u32,
}

impl Default for PenaltyConfig {
    fn default() -> Self {
        Self {
            monthly_rate: Rate::from_bps(150),
            grace_period_days: 5,
        }
    }
}

impl PenaltyConfig {
    pub fn new(monthly_rate: Rate, grace_period_days: u32) -> Self {
        Self {
            monthly_rate,
            grace_period_days,
        }
    }

    /// daily penalty rate as a plain multiplier (monthly% / 30 / 100)
    pub fn daily_rate(&self) -> Decimal {
        self.monthly_rate.as_decimal() / dec!(30)
    }
}

/// webhook reconciler retry configuration
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// delays between dispatch attempts; length bounds the retries
    pub retry_delays: Vec<Duration>,
    /// how many failed records one redrive sweep picks up
    pub redrive_batch_size: usize,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            retry_delays: vec![
                Duration::from_secs(1),
                Duration::from_secs(5),
                Duration::from_secs(30),
            ],
            redrive_batch_size: 50,
        }
    }
}

impl ReconcilerConfig {
    /// total attempt budget: the initial dispatch plus one per delay
    pub fn max_attempts(&self) -> u32 {
        1 + self.retry_delays.len() as u32
    }
}
