//! Single conversion point between stored epoch milliseconds and the
//! configured IANA zone. Stats bucketing and report headings both go through
//! here so local hours always agree with what is displayed.

use chrono::{DateTime, NaiveDate, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

use crate::error::DigestError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Zone {
    tz: Tz,
}

impl Zone {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }

    pub fn parse(name: &str) -> Result<Self, DigestError> {
        name.trim()
            .parse::<Tz>()
            .map(Self::new)
            .map_err(|_| DigestError::Configuration(format!("unknown time zone `{name}`")))
    }

    pub fn tz(&self) -> Tz {
        self.tz
    }

    pub fn name(&self) -> &'static str {
        self.tz.name()
    }

    pub fn local(&self, ts_ms: i64) -> DateTime<Tz> {
        utc(ts_ms).with_timezone(&self.tz)
    }

    pub fn local_hour(&self, ts_ms: i64) -> u32 {
        self.local(ts_ms).hour()
    }

    pub fn clock_label(&self, ts_ms: i64) -> String {
        self.local(ts_ms).format("%H:%M").to_string()
    }

    pub fn date_label(&self, ts_ms: i64) -> String {
        self.local(ts_ms).format("%d/%m/%Y").to_string()
    }

    pub fn stamp_label(&self, ts_ms: i64) -> String {
        self.local(ts_ms).format("%d/%m/%Y %H:%M:%S").to_string()
    }

    pub fn rfc3339(&self, ts_ms: i64) -> String {
        self.local(ts_ms).to_rfc3339()
    }
}

/// Out-of-range timestamps clamp to the epoch instead of panicking.
pub fn utc(ts_ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ts_ms)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// UTC calendar day a message belongs to in the retention buffer.
pub fn utc_bucket(ts_ms: i64) -> NaiveDate {
    utc(ts_ms).date_naive()
}
