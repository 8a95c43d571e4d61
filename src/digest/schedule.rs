use crate::digest::zone::Zone;
use crate::error::DigestError;
use anyhow::Result;
use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;
use std::thread;
use std::time::Duration;
use tracing::{error, info};

const MAX_SLEEP_SLICE_SECS: i64 = 30;

/// A cron trigger evaluated in the configured zone.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expr: String,
    schedule: Schedule,
    zone: Zone,
}

/// Crontab day-of-week numbers (0 or 7 = Sunday) to the 1 = Sunday
/// numbering the `cron` crate expects. Step values after `/` are untouched.
fn translate_weekdays(field: &str) -> String {
    field
        .split(',')
        .map(|item| {
            let (days, step) = match item.split_once('/') {
                Some((days, step)) => (days, Some(step)),
                None => (item, None),
            };
            let mut out = String::new();
            let mut digits = String::new();
            for ch in days.chars().chain(std::iter::once('\0')) {
                if ch.is_ascii_digit() {
                    digits.push(ch);
                    continue;
                }
                if !digits.is_empty() {
                    match digits.parse::<u32>() {
                        Ok(n) if n <= 7 => out.push_str(&((n % 7) + 1).to_string()),
                        _ => out.push_str(&digits),
                    }
                    digits.clear();
                }
                if ch != '\0' {
                    out.push(ch);
                }
            }
            match step {
                Some(step) => format!("{out}/{step}"),
                None => out,
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Five-field crontab gains a leading seconds field; six- and seven-field
/// expressions are taken as the `cron` crate's own syntax.
pub fn normalize_expression(expr: &str) -> String {
    let fields = expr.split_whitespace().collect::<Vec<_>>();
    if fields.len() != 5 {
        return fields.join(" ");
    }
    format!(
        "0 {} {} {} {} {}",
        fields[0],
        fields[1],
        fields[2],
        fields[3],
        translate_weekdays(fields[4])
    )
}

impl CronSchedule {
    pub fn parse(expr: &str, zone: Zone) -> Result<Self, DigestError> {
        let normalized = normalize_expression(expr);
        let schedule = Schedule::from_str(&normalized).map_err(|err| {
            DigestError::Configuration(format!("invalid cron expression `{expr}`: {err}"))
        })?;
        Ok(Self {
            expr: expr.trim().to_string(),
            schedule,
            zone,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expr
    }

    /// First fire time strictly after `now`.
    pub fn next_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let local_now = now.with_timezone(&self.zone.tz());
        self.schedule
            .after(&local_now)
            .next()
            .map(|at| at.with_timezone(&Utc))
    }
}

fn fire(trigger: &mut dyn FnMut() -> Result<()>) {
    if let Err(err) = trigger() {
        error!(error = %format!("{err:#}"), "scheduled summary run failed");
    }
}

/// Blocks forever, firing `trigger` at every schedule tick. Sleeps in short
/// slices so clock jumps are noticed within half a minute. A failed trigger
/// is logged and the loop moves on to the next tick.
pub fn run_daemon(
    schedule: &CronSchedule,
    run_now: bool,
    trigger: &mut dyn FnMut() -> Result<()>,
) -> Result<()> {
    if run_now {
        info!("running summary immediately");
        fire(trigger);
    }

    loop {
        let Some(next) = schedule.next_after(Utc::now()) else {
            return Err(DigestError::Configuration(format!(
                "cron expression `{}` has no upcoming fire time",
                schedule.expression()
            ))
            .into());
        };
        info!(next = %next.with_timezone(&schedule.zone.tz()).to_rfc3339(), "waiting for next summary run");

        loop {
            let remaining = (next - Utc::now()).num_seconds();
            if remaining <= 0 {
                break;
            }
            let slice = remaining.clamp(1, MAX_SLEEP_SLICE_SECS);
            thread::sleep(Duration::from_secs(slice.unsigned_abs()));
        }
        fire(trigger);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn five_field_expression_gains_seconds() {
        assert_eq!(normalize_expression("0 20 * * *"), "0 0 20 * * *");
        assert_eq!(normalize_expression("30 8 * * 1-5"), "0 30 8 * * 2-6");
        assert_eq!(normalize_expression("0 9 * * 0,6"), "0 0 9 * * 1,7");
        assert_eq!(normalize_expression("0 0 9 * * *"), "0 0 9 * * *");
    }

    #[test]
    fn weekday_steps_are_not_translated() {
        assert_eq!(translate_weekdays("*/2"), "*/2");
        assert_eq!(translate_weekdays("1-5/2"), "2-6/2");
        assert_eq!(translate_weekdays("MON-FRI"), "MON-FRI");
    }

    #[test]
    fn next_after_evaluates_in_configured_zone() {
        let zone = Zone::parse("America/Sao_Paulo").expect("zone");
        let schedule = CronSchedule::parse("0 20 * * *", zone).expect("parse");
        // 2024-03-10T12:30Z is 09:30 in São Paulo; 20:00 local is 23:00Z.
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 12, 30, 0).single().expect("now");
        let next = schedule.next_after(now).expect("next");
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 3, 10, 23, 0, 0).single().expect("at"));

        let after_fire = schedule.next_after(next).expect("following");
        assert_eq!(
            after_fire,
            Utc.with_ymd_and_hms(2024, 3, 11, 23, 0, 0).single().expect("at")
        );
    }

    #[test]
    fn weekday_restriction_uses_crontab_numbering() {
        let zone = Zone::parse("UTC").expect("zone");
        // 2024-03-10 is a Sunday.
        let schedule = CronSchedule::parse("0 9 * * 1", zone).expect("parse");
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).single().expect("now");
        assert_eq!(
            schedule.next_after(now).expect("next"),
            Utc.with_ymd_and_hms(2024, 3, 11, 9, 0, 0).single().expect("monday")
        );
    }

    #[test]
    fn invalid_expression_is_configuration_error() {
        let zone = Zone::parse("UTC").expect("zone");
        let err = CronSchedule::parse("every evening", zone).expect_err("invalid");
        assert!(matches!(err, DigestError::Configuration(_)));
    }
}
