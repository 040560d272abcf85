//! Calendar rules for projects and sprints.

use chrono::{Datelike, NaiveDate, Weekday};

use crate::errors::BoardError;
use crate::models::{Project, Sprint};

/// Inclusive range of calendar days with `start <= end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, BoardError> {
        if start > end {
            return Err(BoardError::validation(format!(
                "Start date {} is after end date {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, other: &DateRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn overlaps(&self, other: &DateRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

impl From<&Sprint> for DateRange {
    fn from(s: &Sprint) -> Self {
        Self {
            start: s.date_start,
            end: s.date_end,
        }
    }
}

impl From<&Project> for DateRange {
    fn from(p: &Project) -> Self {
        Self {
            start: p.date_start,
            end: p.date_end,
        }
    }
}

/// Validate a sprint's range against its project and sibling sprints.
/// `except` names the sprint being updated so it does not collide with itself.
pub fn check_sprint(
    project: &Project,
    range: DateRange,
    siblings: &[Sprint],
    except: Option<i64>,
) -> Result<(), BoardError> {
    let project_range = DateRange::from(project);
    if !project_range.contains(&range) {
        return Err(BoardError::validation(format!(
            "Sprint dates must be within project duration {} - {}",
            project_range.start, project_range.end
        )));
    }
    if let Some(clash) = siblings
        .iter()
        .filter(|s| Some(s.id) != except)
        .find(|s| DateRange::from(*s).overlaps(&range))
    {
        return Err(BoardError::validation(format!(
            "Sprint dates overlap with sprint '{}' ({} - {})",
            clash.title, clash.date_start, clash.date_end
        )));
    }
    Ok(())
}

/// A project's new range must still contain every sprint it owns.
pub fn check_project(range: DateRange, sprints: &[Sprint]) -> Result<(), BoardError> {
    match sprints.iter().find(|s| !range.contains(&DateRange::from(*s))) {
        Some(outside) => Err(BoardError::validation(format!(
            "Sprint '{}' ({} - {}) would fall outside the project duration",
            outside.title, outside.date_start, outside.date_end
        ))),
        None => Ok(()),
    }
}

/// Number of days in the range, optionally skipping Saturdays and Sundays.
pub fn working_days(range: DateRange, ignore_weekends: bool) -> i64 {
    let total = (range.end - range.start).num_days() + 1;
    if !ignore_weekends {
        return total;
    }
    range
        .start
        .iter_days()
        .take(total as usize)
        .filter(|d| !matches!(d.weekday(), Weekday::Sat | Weekday::Sun))
        .count() as i64
}
