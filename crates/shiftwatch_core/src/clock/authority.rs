//! Skew-corrected process clock.
//!
//! # Invariants
//! - The reference source is queried at most once per authority.
//! - A failed query is cached as zero skew; callers never see the error.

use super::{utc_frame, Clock, ClockError};
use chrono::{DateTime, Duration, FixedOffset, Utc};
use log::{info, warn};
use once_cell::sync::OnceCell;
use std::time::Instant;

/// Trusted reference for the current instant.
pub trait TimeSource: Send + Sync {
    /// Short label used in log events.
    fn name(&self) -> &str;

    fn reference_time(&self) -> Result<DateTime<Utc>, ClockError>;
}

/// Local clock corrected by a once-derived offset to a reference source.
pub struct ClockAuthority {
    source: Option<Box<dyn TimeSource>>,
    frame: FixedOffset,
    skew_ms: OnceCell<i64>,
}

impl ClockAuthority {
    /// Creates an authority that trusts the local clock as-is.
    pub fn local(frame: FixedOffset) -> Self {
        Self {
            source: None,
            frame,
            skew_ms: OnceCell::new(),
        }
    }

    /// Creates an authority that corrects the local clock against `source`.
    pub fn with_source(source: Box<dyn TimeSource>, frame: FixedOffset) -> Self {
        Self {
            source: Some(source),
            frame,
            skew_ms: OnceCell::new(),
        }
    }

    /// Returns the cached skew, deriving it on first use.
    pub fn skew_millis(&self) -> i64 {
        *self.skew_ms.get_or_init(|| self.derive_skew())
    }

    fn derive_skew(&self) -> i64 {
        let Some(source) = self.source.as_ref() else {
            return 0;
        };

        let started_at = Instant::now();
        let before = Utc::now();
        let reference = source.reference_time();
        let after = Utc::now();

        match reference {
            Ok(reference) => {
                // Assume the reference was sampled halfway through the round trip.
                let midpoint = before + (after - before) / 2;
                let skew = (reference - midpoint).num_milliseconds();
                info!(
                    "event=clock_skew module=clock status=ok source={} skew_ms={} duration_ms={}",
                    source.name(),
                    skew,
                    started_at.elapsed().as_millis()
                );
                skew
            }
            Err(err) => {
                warn!(
                    "event=clock_skew module=clock status=error source={} duration_ms={} error_code=clock_unavailable error={}",
                    source.name(),
                    started_at.elapsed().as_millis(),
                    err
                );
                0
            }
        }
    }
}

impl Default for ClockAuthority {
    fn default() -> Self {
        Self::local(utc_frame())
    }
}

impl Clock for ClockAuthority {
    fn now(&self) -> DateTime<Utc> {
        Utc::now() + Duration::milliseconds(self.skew_millis())
    }

    fn frame(&self) -> FixedOffset {
        self.frame
    }
}
