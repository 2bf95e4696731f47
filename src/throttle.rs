//! Backpressure after the remote service signals overload

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// Default pause after an overload response
pub const DEFAULT_THROTTLE_SLEEP: Duration = Duration::from_secs(30);

/// What a scheduled flush does while a throttle window is open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThrottlePolicy {
    /// Skip the tick and try again next period
    SkipTick,
    /// Hold the scheduled flush until the window closes
    WaitForResume,
}

/// Decision for one scheduled flush attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleDecision {
    Proceed,
    Skip { resume_at: Instant },
    WaitUntil { resume_at: Instant },
}

/// The `resume_at` timestamp of one pipeline.
///
/// Only ever moves forward. Guarded by the pipeline's drain lock.
#[derive(Debug)]
pub struct ThrottleWindow {
    sleep: Duration,
    resume_at: Option<Instant>,
}

impl ThrottleWindow {
    pub fn new(sleep: Duration) -> Self {
        Self {
            sleep,
            resume_at: None,
        }
    }

    /// Open (or extend) the window after an overload observed at `now`
    pub fn open(&mut self, now: Instant) -> Instant {
        let candidate = now + self.sleep;
        let resume_at = match self.resume_at {
            Some(current) if current > candidate => current,
            _ => candidate,
        };
        self.resume_at = Some(resume_at);
        resume_at
    }

    pub fn resume_at(&self) -> Option<Instant> {
        self.resume_at
    }

    pub fn is_open(&self, now: Instant) -> bool {
        self.resume_at.is_some_and(|resume_at| now < resume_at)
    }

    pub fn decide(&self, now: Instant, policy: ThrottlePolicy) -> ThrottleDecision {
        match self.resume_at {
            Some(resume_at) if now < resume_at => match policy {
                ThrottlePolicy::SkipTick => ThrottleDecision::Skip { resume_at },
                ThrottlePolicy::WaitForResume => ThrottleDecision::WaitUntil { resume_at },
            },
            _ => ThrottleDecision::Proceed,
        }
    }
}
