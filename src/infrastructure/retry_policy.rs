//! Retry and backoff rules for page loads and item extraction

use std::time::Duration;

use crate::domain::SiteTuning;
use crate::infrastructure::rendering::RenderError;

/// Fixed-delay retry rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included
    pub max_attempts: u32,
    /// Pause before every retry
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Navigation and readiness attempts for one listing page
    pub fn for_pages(tuning: &SiteTuning) -> Self {
        Self::fixed(tuning.page_attempts, Duration::from_millis(tuning.page_backoff_ms))
    }

    /// Whole-item extraction attempts while fields are missing
    pub fn for_extraction(tuning: &SiteTuning) -> Self {
        Self::fixed(
            tuning.extraction_attempts,
            Duration::from_millis(tuning.extraction_retry_delay_ms),
        )
    }

    pub fn has_attempts_left(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Retry only recoverable errors, and only while attempts remain
    pub fn should_retry(&self, error: &RenderError, attempt: u32) -> bool {
        error.is_retryable() && self.has_attempts_left(attempt)
    }
}
