//! Schedule window evaluation.
//!
//! Decides whether background indexing may run right now: the global switch,
//! the daily `[start, end]` window (which may wrap past midnight) and, when
//! `idle_only` is set, a live load sample.
//!
//! Unparseable window times degrade to midnight with a warning instead of
//! failing; strict parsing for user input lives in [`validate_time_of_day`].

use chrono::{Duration, Local, NaiveDateTime, NaiveTime};
use tracing::{debug, warn};

use crate::error::{IndexError, Result};
use crate::models::ScheduleConfig;
use crate::probe::{is_idle, LoadProbe};

const TIME_FORMAT: &str = "%H:%M";

/// Parse `HH:MM`, falling back to 00:00.
pub fn parse_time_of_day(s: &str) -> NaiveTime {
    match NaiveTime::parse_from_str(s.trim(), TIME_FORMAT) {
        Ok(t) => t,
        Err(_) => {
            warn!(value = %s, "unparseable window time, using 00:00");
            NaiveTime::MIN
        }
    }
}

/// Strict `HH:MM` parse used when accepting configuration.
pub fn validate_time_of_day(s: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(s.trim(), TIME_FORMAT).map_err(|_| {
        IndexError::InvalidConfig(format!("'{}' is not a valid HH:MM time", s))
    })
}

/// Window membership, inclusive on both ends. `start > end` wraps midnight.
pub fn in_window(now: NaiveTime, start: NaiveTime, end: NaiveTime) -> bool {
    if start <= end {
        start <= now && now <= end
    } else {
        now >= start || now <= end
    }
}

/// The schedule is enabled and `now` falls inside its window.
pub fn window_open(config: &ScheduleConfig, now: NaiveTime) -> bool {
    if !config.enabled {
        return false;
    }
    let start = parse_time_of_day(&config.window_start);
    let end = parse_time_of_day(&config.window_end);
    let open = in_window(now, start, end);
    if !open {
        debug!(%now, %start, %end, "outside indexing window");
    }
    open
}

/// Whether scheduled indexing is permitted at the current local time.
pub async fn may_run_now(config: &ScheduleConfig, probe: &dyn LoadProbe) -> bool {
    may_run_at(config, probe, Local::now().time()).await
}

/// [`may_run_now`] with an explicit wall-clock time.
///
/// A failed load sample counts as busy.
pub async fn may_run_at(config: &ScheduleConfig, probe: &dyn LoadProbe, now: NaiveTime) -> bool {
    if !window_open(config, now) {
        return false;
    }
    if !config.idle_only {
        return true;
    }

    match probe.sample().await {
        Ok(sample) => {
            let idle = is_idle(
                sample.cpu_percent,
                sample.ram_percent,
                config.cpu_threshold,
                config.ram_threshold,
            );
            debug!(
                cpu = sample.cpu_percent,
                ram = sample.ram_percent,
                idle,
                "load sample"
            );
            idle
        }
        Err(e) => {
            warn!(error = %e, "load sample failed, treating system as busy");
            false
        }
    }
}

/// Next occurrence of the window start strictly after `now`.
pub fn next_window_start(now: NaiveDateTime, window_start: &str) -> NaiveDateTime {
    let start = parse_time_of_day(window_start);
    let today = now.date().and_time(start);
    if today > now {
        today
    } else {
        today + Duration::days(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SystemSample;
    use async_trait::async_trait;
    use chrono::{NaiveDate, Utc};

    struct FixedProbe {
        cpu: f32,
        ram: f32,
    }

    #[async_trait]
    impl LoadProbe for FixedProbe {
        async fn sample(&self) -> Result<SystemSample> {
            Ok(SystemSample {
                cpu_percent: self.cpu,
                ram_percent: self.ram,
                disk_percent: 0.0,
                timestamp: Utc::now(),
            })
        }
    }

    struct BrokenProbe;

    #[async_trait]
    impl LoadProbe for BrokenProbe {
        async fn sample(&self) -> Result<SystemSample> {
            Err(IndexError::Io(std::io::Error::other("no /proc")))
        }
    }

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn config(start: &str, end: &str, idle_only: bool) -> ScheduleConfig {
        ScheduleConfig {
            window_start: start.to_string(),
            window_end: end.to_string(),
            idle_only,
            cpu_threshold: 30.0,
            ram_threshold: 50.0,
            enabled: true,
        }
    }

    #[test]
    fn test_same_day_window() {
        assert!(in_window(t(9, 0), t(9, 0), t(17, 0)));
        assert!(in_window(t(17, 0), t(9, 0), t(17, 0)));
        assert!(in_window(t(12, 30), t(9, 0), t(17, 0)));
        assert!(!in_window(t(8, 59), t(9, 0), t(17, 0)));
        assert!(!in_window(t(17, 1), t(9, 0), t(17, 0)));
    }

    #[test]
    fn test_midnight_crossing_window() {
        assert!(in_window(t(23, 30), t(23, 0), t(7, 0)));
        assert!(in_window(t(0, 0), t(23, 0), t(7, 0)));
        assert!(in_window(t(7, 0), t(23, 0), t(7, 0)));
        assert!(!in_window(t(12, 0), t(23, 0), t(7, 0)));
        assert!(!in_window(t(22, 59), t(23, 0), t(7, 0)));
    }

    #[test]
    fn test_parse_falls_back_to_midnight() {
        assert_eq!(parse_time_of_day("23:15"), t(23, 15));
        assert_eq!(parse_time_of_day("late"), t(0, 0));
        assert_eq!(parse_time_of_day("24:00"), t(0, 0));
        assert!(validate_time_of_day("late").is_err());
        assert!(validate_time_of_day("07:00").is_ok());
    }

    #[tokio::test]
    async fn test_night_window_with_idle_probe() {
        let cfg = config("23:00", "07:00", true);
        let probe = FixedProbe { cpu: 10.0, ram: 20.0 };
        assert!(may_run_at(&cfg, &probe, t(23, 30)).await);
        assert!(!may_run_at(&cfg, &probe, t(12, 0)).await);
    }

    #[tokio::test]
    async fn test_busy_probe_blocks_when_idle_only() {
        let probe = FixedProbe { cpu: 80.0, ram: 20.0 };
        assert!(!may_run_at(&config("23:00", "07:00", true), &probe, t(1, 0)).await);
        assert!(may_run_at(&config("23:00", "07:00", false), &probe, t(1, 0)).await);
    }

    #[tokio::test]
    async fn test_disabled_never_runs() {
        let mut cfg = config("00:00", "23:59", false);
        cfg.enabled = false;
        let probe = FixedProbe { cpu: 0.0, ram: 0.0 };
        assert!(!may_run_at(&cfg, &probe, t(12, 0)).await);
    }

    #[tokio::test]
    async fn test_probe_failure_fails_closed() {
        let cfg = config("00:00", "23:59", true);
        assert!(!may_run_at(&cfg, &BrokenProbe, t(12, 0)).await);
    }

    #[tokio::test]
    async fn test_garbage_window_degrades_to_midnight() {
        // Both ends fall back to 00:00, so only midnight is inside.
        let cfg = config("soon", "later", false);
        let probe = FixedProbe { cpu: 0.0, ram: 0.0 };
        assert!(may_run_at(&cfg, &probe, t(0, 0)).await);
        assert!(!may_run_at(&cfg, &probe, t(0, 1)).await);
    }

    #[test]
    fn test_next_window_start() {
        let day = NaiveDate::from_ymd_opt(2026, 3, 10).unwrap();
        let before = day.and_time(t(22, 0));
        assert_eq!(next_window_start(before, "23:00"), day.and_time(t(23, 0)));

        let after = day.and_time(t(23, 30));
        let tomorrow = NaiveDate::from_ymd_opt(2026, 3, 11).unwrap();
        assert_eq!(next_window_start(after, "23:00"), tomorrow.and_time(t(23, 0)));

        let exact = day.and_time(t(23, 0));
        assert_eq!(next_window_start(exact, "23:00"), tomorrow.and_time(t(23, 0)));
    }
}
