//! Schedule resolution — interval literals and timezone-aware cron
//! expressions (5-field `min hour dom month dow`, or 6-field with a
//! leading seconds field).

use chrono::{DateTime, Datelike, NaiveDateTime, TimeZone, Timelike, Utc};

use nx_domain::state::{CronJobSpec, ScheduleKind};

/// Catch-up bound when advancing a stale `next_run_at` past `now`.
const MAX_ADVANCES: u32 = 2048;
/// One year of minutes — the scan bound for a single cron `next`.
const MAX_MINUTE_SCAN: u32 = 366 * 24 * 60;

/// Parse a timezone string into a `chrono_tz::Tz`. Empty or invalid
/// names fall back to UTC.
pub fn parse_tz(tz: &str) -> chrono_tz::Tz {
    tz.parse::<chrono_tz::Tz>().unwrap_or(chrono_tz::UTC)
}

/// Validate an IANA timezone string.
pub fn validate_timezone(tz: &str) -> Result<(), String> {
    if tz.is_empty() || tz.parse::<chrono_tz::Tz>().is_ok() {
        Ok(())
    } else {
        Err(format!(
            "invalid timezone '{tz}' — use IANA names like 'America/New_York' or 'UTC'"
        ))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Interval literals
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Parse an interval spec: an integer (seconds) or a duration literal
/// ("30s", "5m", "1h30m"). Must be at least one second.
pub fn parse_interval(raw: &str) -> Result<chrono::Duration, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err("interval is empty".into());
    }

    let std_dur = if raw.chars().all(|c| c.is_ascii_digit()) {
        let secs: u64 = raw
            .parse()
            .map_err(|_| format!("invalid interval seconds '{raw}'"))?;
        std::time::Duration::from_secs(secs)
    } else {
        humantime::parse_duration(raw).map_err(|e| format!("invalid interval '{raw}': {e}"))?
    };

    if std_dur.as_secs() < 1 {
        return Err(format!("interval '{raw}' must be at least 1 second"));
    }
    chrono::Duration::from_std(std_dur).map_err(|_| format!("interval '{raw}' is out of range"))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Cron expressions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Parse a cron field and check if a value matches.
fn cron_field_matches(field: &str, value: u32) -> bool {
    if field == "*" {
        return true;
    }
    if let Some(step) = field.strip_prefix("*/") {
        if let Ok(n) = step.parse::<u32>() {
            return n > 0 && value % n == 0;
        }
    }
    for part in field.split(',') {
        if let Some((start_s, end_s)) = part.split_once('-') {
            if let (Ok(start), Ok(end)) = (start_s.parse::<u32>(), end_s.parse::<u32>()) {
                if value >= start && value <= end {
                    return true;
                }
            }
        } else if let Ok(n) = part.parse::<u32>() {
            if value == n {
                return true;
            }
        }
    }
    false
}

/// Split an expression into `(seconds_field, [min, hour, dom, month, dow])`.
fn split_fields(cron: &str) -> Option<(Option<&str>, [&str; 5])> {
    let fields: Vec<&str> = cron.split_whitespace().collect();
    match fields.len() {
        5 => Some((None, [fields[0], fields[1], fields[2], fields[3], fields[4]])),
        6 => Some((
            Some(fields[0]),
            [fields[1], fields[2], fields[3], fields[4], fields[5]],
        )),
        _ => None,
    }
}

/// Minute-level match of the `[min, hour, dom, month, dow]` fields
/// against a local naive datetime.
fn minute_matches(fields: &[&str; 5], dt: &NaiveDateTime) -> bool {
    cron_field_matches(fields[0], dt.minute())
        && cron_field_matches(fields[1], dt.hour())
        && cron_field_matches(fields[2], dt.day())
        && cron_field_matches(fields[3], dt.month())
        && cron_field_matches(fields[4], dt.weekday().num_days_from_sunday())
}

fn validate_cron_field(field: &str, name: &str, min: u32, max: u32) -> Result<(), String> {
    if field == "*" {
        return Ok(());
    }
    if let Some(step) = field.strip_prefix("*/") {
        let n: u32 = step
            .parse()
            .map_err(|_| format!("{name}: invalid step '*/{step}' — expected a number"))?;
        if n == 0 || n > max {
            return Err(format!("{name}: step {n} out of range 1..={max}"));
        }
        return Ok(());
    }
    for part in field.split(',') {
        if let Some((start_s, end_s)) = part.split_once('-') {
            let start: u32 = start_s
                .parse()
                .map_err(|_| format!("{name}: invalid range start '{start_s}'"))?;
            let end: u32 = end_s
                .parse()
                .map_err(|_| format!("{name}: invalid range end '{end_s}'"))?;
            if start < min || start > max || end < min || end > max {
                return Err(format!(
                    "{name}: range {start}-{end} out of bounds {min}..={max}"
                ));
            }
            if start > end {
                return Err(format!("{name}: range start {start} > end {end}"));
            }
        } else {
            let n: u32 = part
                .parse()
                .map_err(|_| format!("{name}: invalid value '{part}'"))?;
            if n < min || n > max {
                return Err(format!("{name}: value {n} out of range {min}..={max}"));
            }
        }
    }
    Ok(())
}

/// Validate a 5- or 6-field cron expression.
pub fn validate_cron_expr(cron: &str) -> Result<(), String> {
    let (seconds, fields) = split_fields(cron)
        .ok_or_else(|| format!("expected 5 or 6 cron fields, got '{cron}'"))?;
    if let Some(sec) = seconds {
        validate_cron_field(sec, "second", 0, 59)?;
    }
    let names = ["minute", "hour", "day-of-month", "month", "day-of-week"];
    let ranges: [(u32, u32); 5] = [(0, 59), (0, 23), (1, 31), (1, 12), (0, 6)];
    for (i, field) in fields.iter().enumerate() {
        validate_cron_field(field, names[i], ranges[i].0, ranges[i].1)?;
    }
    Ok(())
}

/// Compute the next occurrence strictly after `after`, evaluated in the
/// given timezone. Returns a UTC `DateTime`.
///
/// DST handling: spring-forward gaps are skipped; fall-back overlaps
/// take the earliest (pre-transition) mapping.
pub fn cron_next_tz(
    cron: &str,
    after: &DateTime<Utc>,
    tz: chrono_tz::Tz,
) -> Option<DateTime<Utc>> {
    let (sec_field, fields) = split_fields(cron)?;
    let local_after = after.with_timezone(&tz).naive_local();

    let mut minute = local_after
        .with_second(0)
        .and_then(|d| d.with_nanosecond(0))?;

    for _ in 0..MAX_MINUTE_SCAN {
        if minute_matches(&fields, &minute) {
            // Candidate seconds within this minute.
            let candidate_secs: Vec<u32> = match sec_field {
                None => vec![0],
                Some(f) => (0..60).filter(|s| cron_field_matches(f, *s)).collect(),
            };
            for s in candidate_secs {
                let candidate = minute + chrono::Duration::seconds(s as i64);
                if candidate <= local_after {
                    continue;
                }
                match tz.from_local_datetime(&candidate) {
                    chrono::LocalResult::Single(dt) => return Some(dt.with_timezone(&Utc)),
                    chrono::LocalResult::Ambiguous(earliest, _) => {
                        return Some(earliest.with_timezone(&Utc));
                    }
                    chrono::LocalResult::None => {
                        // DST gap — this local time doesn't exist.
                        break;
                    }
                }
            }
        }
        minute += chrono::Duration::minutes(1);
    }
    None
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// resolve_next_run_at
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn next_after(job: &CronJobSpec, after: DateTime<Utc>) -> Result<DateTime<Utc>, String> {
    match job.schedule.kind {
        ScheduleKind::Interval => {
            let interval = parse_interval(&job.schedule.cron)?;
            Ok(after + interval)
        }
        ScheduleKind::Cron => {
            let tz = parse_tz(&job.schedule.timezone);
            cron_next_tz(&job.schedule.cron, &after, tz)
                .ok_or_else(|| format!("cron '{}' has no future occurrence", job.schedule.cron))
        }
    }
}

/// Compute `(next_run_at, due_at)` for one job.
///
/// `due_at` is non-nil iff the previously computed `next_run_at` has
/// already elapsed. The new `next_run_at` progresses monotonically:
/// a stale value is advanced past `now` in bounded steps; once the
/// bound is hit, the progression restarts from `now`.
pub fn resolve_next_run_at(
    job: &CronJobSpec,
    current: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<(Option<DateTime<Utc>>, Option<DateTime<Utc>>), String> {
    match current {
        None => Ok((Some(next_after(job, now)?), None)),
        Some(cur) if cur > now => Ok((Some(cur), None)),
        Some(cur) => {
            let due = cur;
            let mut next = cur;
            let mut advances = 0u32;
            while next <= now {
                advances += 1;
                if advances > MAX_ADVANCES {
                    next = next_after(job, now)?;
                    break;
                }
                let stepped = next_after(job, next)?;
                if stepped <= next {
                    return Err(format!(
                        "schedule '{}' does not progress",
                        job.schedule.cron
                    ));
                }
                next = stepped;
            }
            Ok((Some(next), Some(due)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nx_domain::state::{CronDispatch, CronRuntime, CronSchedule, CronTaskType, DispatchTarget};

    fn interval_job(cron: &str) -> CronJobSpec {
        CronJobSpec {
            id: "j1".into(),
            name: "test".into(),
            enabled: true,
            schedule: CronSchedule {
                kind: ScheduleKind::Interval,
                cron: cron.into(),
                timezone: String::new(),
            },
            task_type: CronTaskType::Text,
            text: "tick".into(),
            workflow: None,
            dispatch: CronDispatch {
                channel: "console".into(),
                target: DispatchTarget::default(),
                mode: String::new(),
                meta: serde_json::Map::new(),
            },
            runtime: CronRuntime::default(),
            meta: serde_json::Map::new(),
        }
    }

    fn cron_job(cron: &str, tz: &str) -> CronJobSpec {
        let mut job = interval_job(cron);
        job.schedule.kind = ScheduleKind::Cron;
        job.schedule.timezone = tz.into();
        job
    }

    // ── Interval literals ────────────────────────────────────────────

    #[test]
    fn parse_interval_forms() {
        assert_eq!(parse_interval("60").unwrap(), chrono::Duration::seconds(60));
        assert_eq!(parse_interval("30s").unwrap(), chrono::Duration::seconds(30));
        assert_eq!(parse_interval("5m").unwrap(), chrono::Duration::minutes(5));
        assert_eq!(
            parse_interval("1h30m").unwrap(),
            chrono::Duration::minutes(90)
        );
    }

    #[test]
    fn parse_interval_rejects_bad_input() {
        assert!(parse_interval("").is_err());
        assert!(parse_interval("banana").is_err());
        assert!(parse_interval("0").is_err());
        assert!(parse_interval("500ms").is_err());
    }

    // ── Cron matching ────────────────────────────────────────────────

    #[test]
    fn cron_every_5_minutes() {
        let (_, fields) = split_fields("*/5 * * * *").unwrap();
        let dt = chrono::NaiveDate::from_ymd_opt(2024, 6, 15)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap();
        assert!(minute_matches(&fields, &dt));
        let dt2 = dt.with_minute(3).unwrap();
        assert!(!minute_matches(&fields, &dt2));
    }

    #[test]
    fn cron_next_finds_occurrence() {
        let after = Utc.with_ymd_and_hms(2024, 6, 15, 10, 0, 0).unwrap();
        let next = cron_next_tz("30 * * * *", &after, chrono_tz::UTC).unwrap();
        assert_eq!(next.minute(), 30);
        assert_eq!(next.hour(), 10);
    }

    #[test]
    fn cron_next_is_strictly_after() {
        let after = Utc.with_ymd_and_hms(2024, 6, 15, 10, 30, 0).unwrap();
        let next = cron_next_tz("30 * * * *", &after, chrono_tz::UTC).unwrap();
        assert_eq!(next.hour(), 11);
    }

    #[test]
    fn six_field_cron_matches_seconds() {
        let after = Utc.with_ymd_and_hms(2024, 6, 15, 10, 0, 0).unwrap();
        let next = cron_next_tz("15 * * * * *", &after, chrono_tz::UTC).unwrap();
        assert_eq!(next.second(), 15);
        assert_eq!(next.minute(), 0);

        let next2 = cron_next_tz("15 * * * * *", &next, chrono_tz::UTC).unwrap();
        assert_eq!(next2.second(), 15);
        assert_eq!(next2.minute(), 1);
    }

    #[test]
    fn cron_next_tz_basic() {
        let after = Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap();
        let next = cron_next_tz("0 9 * * *", &after, parse_tz("US/Eastern")).unwrap();
        assert_eq!(next.hour(), 13); // 9 ET = 13 UTC during EDT
    }

    #[test]
    fn cron_next_tz_spring_forward_skips_gap() {
        let after = Utc.with_ymd_and_hms(2024, 3, 10, 6, 0, 0).unwrap();
        let next = cron_next_tz("30 2 * * *", &after, parse_tz("US/Eastern")).unwrap();
        // 2:30 local does not exist on 2024-03-10; next real occurrence
        // is the following day.
        assert_eq!(next.day(), 11);
        assert_eq!(next.hour(), 6);
        assert_eq!(next.minute(), 30);
    }

    #[test]
    fn cron_next_tz_fall_back_takes_earliest() {
        let after = Utc.with_ymd_and_hms(2024, 11, 3, 4, 0, 0).unwrap();
        let next = cron_next_tz("30 1 * * *", &after, parse_tz("US/Eastern")).unwrap();
        assert_eq!(next.hour(), 5);
        assert_eq!(next.minute(), 30);
    }

    #[test]
    fn validate_cron_expr_accepts_valid() {
        assert!(validate_cron_expr("0 * * * *").is_ok());
        assert!(validate_cron_expr("*/5 9-17 * * 1-5").is_ok());
        assert!(validate_cron_expr("30 0 9 1,15 * *").is_ok()); // 6-field
    }

    #[test]
    fn validate_cron_expr_rejects_invalid() {
        assert!(validate_cron_expr("* * *").is_err());
        assert!(validate_cron_expr("* * * * * * *").is_err());
        assert!(validate_cron_expr("60 * * * *").is_err());
        assert!(validate_cron_expr("* 24 * * *").is_err());
        assert!(validate_cron_expr("* * * * 7").is_err());
        assert!(validate_cron_expr("abc * * * *").is_err());
    }

    #[test]
    fn validate_timezone_behaviour() {
        assert!(validate_timezone("").is_ok());
        assert!(validate_timezone("UTC").is_ok());
        assert!(validate_timezone("Asia/Tokyo").is_ok());
        assert!(validate_timezone("Not/Real").is_err());
    }

    // ── resolve_next_run_at ──────────────────────────────────────────

    #[test]
    fn first_resolution_has_no_due() {
        let job = interval_job("60s");
        let now = Utc.with_ymd_and_hms(2024, 6, 15, 10, 0, 0).unwrap();
        let (next, due) = resolve_next_run_at(&job, None, now).unwrap();
        assert_eq!(next.unwrap(), now + chrono::Duration::seconds(60));
        assert!(due.is_none());
    }

    #[test]
    fn future_next_is_kept() {
        let job = interval_job("60s");
        let now = Utc.with_ymd_and_hms(2024, 6, 15, 10, 0, 0).unwrap();
        let future = now + chrono::Duration::seconds(30);
        let (next, due) = resolve_next_run_at(&job, Some(future), now).unwrap();
        assert_eq!(next.unwrap(), future);
        assert!(due.is_none());
    }

    #[test]
    fn elapsed_next_is_due_and_advances_past_now() {
        let job = interval_job("60s");
        let now = Utc.with_ymd_and_hms(2024, 6, 15, 10, 5, 5).unwrap();
        let scheduled = Utc.with_ymd_and_hms(2024, 6, 15, 10, 0, 0).unwrap();
        let (next, due) = resolve_next_run_at(&job, Some(scheduled), now).unwrap();
        assert_eq!(due.unwrap(), scheduled);
        let next = next.unwrap();
        assert!(next > now, "next_run_at must land after now");
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 6, 15, 10, 6, 0).unwrap());
    }

    #[test]
    fn missed_cycles_catch_up_monotonically() {
        // 1000 missed minutes stays within the advance bound.
        let job = interval_job("60s");
        let now = Utc.with_ymd_and_hms(2024, 6, 15, 10, 0, 30).unwrap();
        let scheduled = now - chrono::Duration::minutes(1000);
        let (next, due) = resolve_next_run_at(&job, Some(scheduled), now).unwrap();
        assert_eq!(due.unwrap(), scheduled);
        assert!(next.unwrap() > now);
    }

    #[test]
    fn very_stale_next_falls_back_to_now_progression() {
        // More than MAX_ADVANCES intervals behind.
        let job = interval_job("1s");
        let now = Utc.with_ymd_and_hms(2024, 6, 15, 10, 0, 0).unwrap();
        let scheduled = now - chrono::Duration::seconds(10_000);
        let (next, due) = resolve_next_run_at(&job, Some(scheduled), now).unwrap();
        assert_eq!(due.unwrap(), scheduled);
        assert!(next.unwrap() > now);
    }

    #[test]
    fn cron_schedule_resolves_due_and_next() {
        let job = cron_job("0 * * * *", "UTC");
        let now = Utc.with_ymd_and_hms(2024, 6, 15, 10, 30, 0).unwrap();
        let scheduled = Utc.with_ymd_and_hms(2024, 6, 15, 10, 0, 0).unwrap();
        let (next, due) = resolve_next_run_at(&job, Some(scheduled), now).unwrap();
        assert_eq!(due.unwrap(), scheduled);
        assert_eq!(
            next.unwrap(),
            Utc.with_ymd_and_hms(2024, 6, 15, 11, 0, 0).unwrap()
        );
    }

    #[test]
    fn bad_interval_surfaces_error() {
        let job = interval_job("banana");
        let now = Utc::now();
        assert!(resolve_next_run_at(&job, None, now).is_err());
    }
}
