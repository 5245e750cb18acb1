//! Trading-hours window in the configured timezone.
//!
//! Futures sessions span midnight (17:00 open, 15:10 close next day), so the
//! window logic handles wrapped ranges. The trading day used for daily
//! rollover is the calendar date in the configured timezone.

use crate::config::TradingHoursConfig;
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use chrono_tz::Tz;

/// Session window and entry cutoff for one venue timezone.
#[derive(Debug, Clone)]
pub struct TradingHours {
    tz: Tz,
    session_open: NaiveTime,
    session_close: NaiveTime,
    entry_cutoff: NaiveTime,
}

impl TradingHours {
    /// Build from configuration, parsing the timezone and HH:MM times.
    pub fn from_config(config: &TradingHoursConfig) -> Result<Self> {
        let tz: Tz = config
            .timezone
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid timezone '{}': {e}", config.timezone))?;

        Ok(Self {
            tz,
            session_open: parse_time(&config.session_open)
                .context("invalid session_open time")?,
            session_close: parse_time(&config.session_close)
                .context("invalid session_close time")?,
            entry_cutoff: parse_time(&config.entry_cutoff)
                .context("invalid entry_cutoff time")?,
        })
    }

    /// Whether the session is open at `now`.
    pub fn is_open_at(&self, now: DateTime<Utc>) -> bool {
        let local = now.with_timezone(&self.tz).time();
        in_window(self.session_open, self.session_close, local)
    }

    /// Whether `now` falls in the pre-close blackout (no new entries between
    /// the entry cutoff and the session close).
    pub fn in_blackout_at(&self, now: DateTime<Utc>) -> bool {
        let local = now.with_timezone(&self.tz).time();
        in_window(self.entry_cutoff, self.session_close, local)
    }

    /// The trading day `now` belongs to: the calendar date in the venue
    /// timezone.
    pub fn trading_day_at(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.tz).date_naive()
    }
}

fn parse_time(value: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M").with_context(|| format!("cannot parse '{value}'"))
}

/// Half-open time window `[start, end)`, wrapping midnight when start > end.
fn in_window(start: NaiveTime, end: NaiveTime, t: NaiveTime) -> bool {
    if start <= end {
        start <= t && t < end
    } else {
        t >= start || t < end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono_tz::America::Chicago;

    fn hours() -> TradingHours {
        TradingHours::from_config(&TradingHoursConfig::default()).unwrap()
    }

    /// A Chicago wall-clock instant as UTC.
    fn chicago(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Chicago
            .with_ymd_and_hms(y, m, d, h, min, 0)
            .single()
            .expect("unambiguous local time")
            .with_timezone(&Utc)
    }

    #[test]
    fn overnight_session_wraps_midnight() {
        let hours = hours();
        // 2025-06-03 is a Tuesday.
        assert!(hours.is_open_at(chicago(2025, 6, 3, 10, 0)));
        assert!(hours.is_open_at(chicago(2025, 6, 3, 17, 30)));
        assert!(hours.is_open_at(chicago(2025, 6, 3, 2, 0)));
        assert!(hours.is_open_at(chicago(2025, 6, 3, 15, 9)));
    }

    #[test]
    fn closed_between_close_and_reopen() {
        let hours = hours();
        assert!(!hours.is_open_at(chicago(2025, 6, 3, 15, 10)));
        assert!(!hours.is_open_at(chicago(2025, 6, 3, 16, 0)));
        assert!(!hours.is_open_at(chicago(2025, 6, 3, 16, 59)));
    }

    #[test]
    fn blackout_runs_from_cutoff_to_close() {
        let hours = hours();
        assert!(!hours.in_blackout_at(chicago(2025, 6, 3, 14, 44)));
        assert!(hours.in_blackout_at(chicago(2025, 6, 3, 14, 45)));
        assert!(hours.in_blackout_at(chicago(2025, 6, 3, 15, 5)));
        assert!(!hours.in_blackout_at(chicago(2025, 6, 3, 15, 10)));
    }

    #[test]
    fn trading_day_is_local_date() {
        let hours = hours();
        // 20:00 CT on June 3 is already June 4 in UTC.
        let evening = chicago(2025, 6, 3, 20, 0);
        assert_eq!(
            hours.trading_day_at(evening),
            NaiveDate::from_ymd_opt(2025, 6, 3).unwrap()
        );
        let morning = chicago(2025, 6, 4, 8, 0);
        assert_eq!(
            hours.trading_day_at(morning),
            NaiveDate::from_ymd_opt(2025, 6, 4).unwrap()
        );
    }

    #[test]
    fn bad_config_is_rejected() {
        let mut config = TradingHoursConfig::default();
        config.timezone = "Mars/Olympus".to_string();
        assert!(TradingHours::from_config(&config).is_err());

        let mut config = TradingHoursConfig::default();
        config.session_open = "25:99".to_string();
        assert!(TradingHours::from_config(&config).is_err());
    }
}
