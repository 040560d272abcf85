//! Time tasks spend in each workflow phase.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use chrono::NaiveDateTime;

use crate::db::TaskboardDb;
use crate::models::{Phase, PhaseDuration, PhaseDurationView, PhaseTotal, Task};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn parse_timestamp(value: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT)
        .with_context(|| format!("invalid timestamp '{}'", value))
}

/// Seconds between `start` and `end`, or `now` for an open interval.
/// Clock skew never produces a negative length.
pub fn duration_seconds(start: &str, end: Option<&str>, now: &str) -> Result<i64> {
    let start = parse_timestamp(start)?;
    let end = parse_timestamp(end.unwrap_or(now))?;
    Ok((end - start).num_seconds().max(0))
}

/// Render seconds as `1d 2h 3m 4s`, omitting zero units.
pub fn format_duration(seconds: i64) -> String {
    if seconds <= 0 {
        return "0s".to_string();
    }
    let units = [
        (seconds / 86_400, "d"),
        ((seconds % 86_400) / 3_600, "h"),
        ((seconds % 3_600) / 60, "m"),
        (seconds % 60, "s"),
    ];
    units
        .iter()
        .filter(|(n, _)| *n > 0)
        .map(|(n, unit)| format!("{}{}", n, unit))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Close the task's open interval and open one for its new phase. Called
/// after the task row has been updated. A move within the same phase
/// leaves the durations alone.
pub fn transition(db: &TaskboardDb, task: &Task, from_phase: i64) -> Result<()> {
    if task.phase_id == from_phase {
        return Ok(());
    }
    db.close_phase_durations(task.id)?;
    db.start_phase_duration(task)?;
    Ok(())
}

pub fn view(duration: PhaseDuration, now: &str) -> Result<PhaseDurationView> {
    let seconds = duration_seconds(&duration.time_start, duration.time_end.as_deref(), now)?;
    Ok(PhaseDurationView {
        duration,
        seconds,
        formatted: format_duration(seconds),
    })
}

pub fn task_durations(db: &TaskboardDb, task_id: i64) -> Result<Vec<PhaseDurationView>> {
    let now = db.now()?;
    db.list_phase_durations(task_id)?
        .into_iter()
        .map(|d| view(d, &now))
        .collect()
}

/// Sum durations per phase, listed in board order. Phases nobody visited
/// report zero.
pub fn totals(phases: &[Phase], durations: &[PhaseDuration], now: &str) -> Result<Vec<PhaseTotal>> {
    let mut sums: BTreeMap<i64, i64> = BTreeMap::new();
    for d in durations {
        *sums.entry(d.phase_id).or_default() +=
            duration_seconds(&d.time_start, d.time_end.as_deref(), now)?;
    }
    Ok(phases
        .iter()
        .map(|p| {
            let seconds = sums.get(&p.id).copied().unwrap_or(0);
            PhaseTotal {
                phase_id: p.id,
                phase_title: p.title.clone(),
                seconds,
                formatted: format_duration(seconds),
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn duration(phase_id: i64, start: &str, end: Option<&str>) -> PhaseDuration {
        PhaseDuration {
            id: 0,
            task_id: 1,
            phase_id,
            story_id: 1,
            sprint_id: None,
            project_id: 1,
            time_start: start.to_string(),
            time_end: end.map(str::to_string),
        }
    }

    fn phase(id: i64, title: &str) -> Phase {
        Phase {
            id,
            project_id: 1,
            title: title.to_string(),
            description: String::new(),
            order: id as i32,
            tasks: 0,
            is_done: false,
            background_color: String::new(),
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0), "0s");
        assert_eq!(format_duration(59), "59s");
        assert_eq!(format_duration(3_600), "1h");
        assert_eq!(format_duration(93_784), "1d 2h 3m 4s");
        assert_eq!(format_duration(86_460), "1d 1m");
    }

    #[test]
    fn test_open_interval_runs_until_now() {
        let secs =
            duration_seconds("2024-03-01 10:00:00", None, "2024-03-01 10:05:30").unwrap();
        assert_eq!(secs, 330);
        let secs = duration_seconds(
            "2024-03-01 10:00:00",
            Some("2024-03-01 09:00:00"),
            "2024-03-02 00:00:00",
        )
        .unwrap();
        assert_eq!(secs, 0);
    }

    #[test]
    fn test_totals_in_phase_order() {
        let phases = [phase(1, "Tasks"), phase(2, "In progress"), phase(3, "Done")];
        let durations = [
            duration(2, "2024-03-01 10:00:00", Some("2024-03-01 11:00:00")),
            duration(1, "2024-03-01 09:00:00", Some("2024-03-01 10:00:00")),
            duration(2, "2024-03-02 10:00:00", Some("2024-03-02 10:30:00")),
        ];
        let totals = totals(&phases, &durations, "2024-03-03 00:00:00").unwrap();
        assert_eq!(totals[0].seconds, 3_600);
        assert_eq!(totals[1].seconds, 5_400);
        assert_eq!(totals[1].formatted, "1h 30m");
        assert_eq!(totals[2].seconds, 0);
    }

    #[test]
    fn test_bad_timestamp_is_an_error() {
        assert!(duration_seconds("yesterday", None, "2024-03-01 00:00:00").is_err());
    }
}
