use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::distr::Alphanumeric;
use rand::Rng;
use uuid::Uuid;

/// Wall clock and sleeping, injectable so tests never block.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
    fn sleep(&self, duration: Duration);

    fn now_millis(&self) -> i64 {
        self.now().timestamp_millis()
    }

    /// Timestamp in the `x-amz-date` format, e.g. `20240101T120000Z`.
    fn amz_date(&self) -> String {
        self.now().format("%Y%m%dT%H%M%SZ").to_string()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Source of random identifiers used in drafts and upload queries.
pub trait IdSource: Send + Sync {
    fn uuid(&self) -> String;
    /// Short base-36 token used to disambiguate apply-upload queries.
    fn nonce(&self) -> String;
    /// Random generation seed in `[low, low + span)`.
    fn seed(&self, low: u64, span: u64) -> u64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RandomIds;

impl IdSource for RandomIds {
    fn uuid(&self) -> String {
        Uuid::new_v4().to_string()
    }

    fn nonce(&self) -> String {
        rand::rng()
            .sample_iter(Alphanumeric)
            .take(10)
            .map(|byte| char::from(byte).to_ascii_lowercase())
            .collect()
    }

    fn seed(&self, low: u64, span: u64) -> u64 {
        rand::rng().random_range(low..=low.saturating_add(span.saturating_sub(1)))
    }
}
