//! HTTP `Date`-header reference clock.

use super::{ClockError, TimeSource};
use chrono::{DateTime, Utc};
use std::time::Duration;

const USER_AGENT: &str = concat!("shiftwatch/", env!("CARGO_PKG_VERSION"), " (clock-skew)");

/// Reads the reference instant from a trusted server's `Date` header.
pub struct HttpDateTimeSource {
    url: String,
    agent: ureq::Agent,
}

impl HttpDateTimeSource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout(timeout)
            .build();
        Self {
            url: url.into(),
            agent,
        }
    }
}

impl TimeSource for HttpDateTimeSource {
    fn name(&self) -> &str {
        "http_date"
    }

    fn reference_time(&self) -> Result<DateTime<Utc>, ClockError> {
        let response = match self.agent.head(&self.url).set("User-Agent", USER_AGENT).call() {
            Ok(response) => response,
            // Error statuses still carry a server `Date` header.
            Err(ureq::Error::Status(_, response)) => response,
            Err(err) => return Err(ClockError::Unavailable(err.to_string())),
        };

        let header = response
            .header("Date")
            .ok_or_else(|| ClockError::InvalidResponse("missing Date header".to_string()))?;
        parse_http_date(header)
    }
}

/// Parses an IMF-fixdate / RFC 2822 `Date` header value.
pub(crate) fn parse_http_date(value: &str) -> Result<DateTime<Utc>, ClockError> {
    DateTime::parse_from_rfc2822(value.trim())
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|err| ClockError::InvalidResponse(format!("`{value}`: {err}")))
}
