//! Board workflow: moving tasks between phases, moving and splitting
//! stories, and the read models built on top of them.
//!
//! Every function here issues several statements and expects to be called
//! inside [`TaskboardDb::transaction`].

use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;
use serde::Serialize;

use crate::db::TaskboardDb;
use crate::errors::BoardError;
use crate::models::*;
use crate::services::dates::{self, DateRange};
use crate::services::phase_duration;

/// Outcome of a task move.
#[derive(Debug, Clone, Serialize)]
pub struct TaskMove {
    pub task: Task,
    pub from_phase_id: i64,
    pub from_story_id: i64,
    /// Story the task now belongs to, with its recomputed done state.
    pub story: Story,
}

/// Outcome of a phase edit. `tasks` and `stories` list only what changed.
#[derive(Debug, Clone, Serialize)]
pub struct PhaseUpdate {
    pub phase: Phase,
    pub tasks: Vec<Task>,
    pub stories: Vec<Story>,
}

/// Outcome of a story split.
#[derive(Debug, Clone, Serialize)]
pub struct StorySplit {
    pub original: Story,
    pub copy: Story,
    pub moved_task_ids: Vec<i64>,
}

/// Move a task into `phase_id`, optionally re-parenting it under another
/// story of the same project.
pub fn move_task(
    db: &TaskboardDb,
    task_id: i64,
    phase_id: i64,
    story_id: Option<i64>,
) -> Result<TaskMove> {
    let task = db.require_task(task_id)?;
    let phase = db.require_phase(phase_id)?;
    if phase.project_id != task.project_id {
        return Err(BoardError::validation(format!(
            "Phase '{}' belongs to another project",
            phase.title
        ))
        .into());
    }

    let target_story = match story_id {
        Some(id) if id != task.story_id => {
            let story = db.require_story(id)?;
            if story.project_id != task.project_id {
                return Err(BoardError::validation(format!(
                    "Story {} belongs to another project",
                    id
                ))
                .into());
            }
            Some(story)
        }
        _ => None,
    };
    let sprint_id = target_story
        .as_ref()
        .map_or(task.sprint_id, |s| s.sprint_id);

    let entering = phase.id != task.phase_id || sprint_id != task.sprint_id;
    if entering {
        check_phase_capacity(db, &phase, sprint_id, 1)?;
    }

    let started = db
        .first_phase(task.project_id)?
        .is_some_and(|first| first.id != phase.id);

    if let Some(story) = &target_story {
        db.set_task_story(task.id, story)?;
    }
    db.set_task_phase(task.id, &phase, started)?;
    let moved = db.require_task(task.id)?;
    phase_duration::transition(db, &moved, task.phase_id)?;

    if started {
        db.mark_story_started(moved.story_id)?;
    }
    let story = refresh_story_done(db, moved.story_id)?;
    if target_story.is_some() {
        refresh_story_done(db, task.story_id)?;
    }

    tracing::debug!(
        task_id = moved.id,
        from_phase = task.phase_id,
        to_phase = moved.phase_id,
        "Moved task"
    );
    Ok(TaskMove {
        task: moved,
        from_phase_id: task.phase_id,
        from_story_id: task.story_id,
        story,
    })
}

/// Reject `incoming` more tasks entering `phase` within `sprint_id` when
/// that would exceed the phase's task limit. A limit of 0 means unlimited.
fn check_phase_capacity(
    db: &TaskboardDb,
    phase: &Phase,
    sprint_id: Option<i64>,
    incoming: i64,
) -> Result<()> {
    if phase.tasks <= 0 {
        return Ok(());
    }
    let held = db.count_tasks_in_phase(phase.id, sprint_id)?;
    if held + incoming > i64::from(phase.tasks) {
        return Err(BoardError::validation(format!(
            "Phase '{}' is limited to {} task(s)",
            phase.title, phase.tasks
        ))
        .into());
    }
    Ok(())
}

/// A story is done when it has at least one task and every task is done.
pub fn refresh_story_done(db: &TaskboardDb, story_id: i64) -> Result<Story> {
    let story = db.require_story(story_id)?;
    let tasks = db.list_story_tasks(story_id)?;
    let done = !tasks.is_empty() && tasks.iter().all(|t| t.is_done);
    if done != story.is_done {
        db.set_story_done(story_id, done)?;
        return db.require_story(story_id);
    }
    Ok(story)
}

/// Edit a phase. Toggling `is_done` carries over to the tasks sitting in
/// the phase and to the done state of their stories.
pub fn update_phase(db: &TaskboardDb, phase_id: i64, patch: &PhasePatch) -> Result<PhaseUpdate> {
    let before = db.require_phase(phase_id)?;
    let phase = db.update_phase(phase_id, patch)?;
    let mut tasks = Vec::new();
    let mut stories = Vec::new();
    if phase.is_done == before.is_done {
        return Ok(PhaseUpdate {
            phase,
            tasks,
            stories,
        });
    }

    let mut story_ids = BTreeSet::new();
    for task in db.list_phase_tasks(phase.id)? {
        db.set_task_phase(task.id, &phase, phase.is_done)?;
        story_ids.insert(task.story_id);
        tasks.push(db.require_task(task.id)?);
    }
    for story_id in story_ids {
        let was_done = db.require_story(story_id)?.is_done;
        let story = refresh_story_done(db, story_id)?;
        if story.is_done != was_done {
            stories.push(story);
        }
    }
    tracing::debug!(
        phase_id,
        is_done = phase.is_done,
        tasks = tasks.len(),
        stories = stories.len(),
        "Phase done state changed"
    );
    Ok(PhaseUpdate {
        phase,
        tasks,
        stories,
    })
}

/// Plan a story into `sprint_id` (or back into the backlog).
pub fn move_story(db: &TaskboardDb, story_id: i64, sprint_id: Option<i64>) -> Result<Story> {
    let story = db.set_story_sprint(story_id, sprint_id)?;
    tracing::debug!(story_id, ?sprint_id, "Moved story");
    Ok(story)
}

/// Carry the unfinished part of a story into `sprint_id`: a copy pointing
/// back at the original takes over every task that is not done, and the
/// original is closed.
pub fn split_story(db: &TaskboardDb, story_id: i64, sprint_id: Option<i64>) -> Result<StorySplit> {
    let original = db.require_story(story_id)?;
    if original.is_done {
        return Err(BoardError::validation(format!(
            "Story '{}' is already done",
            original.title
        ))
        .into());
    }
    let open_tasks: Vec<Task> = db
        .list_story_tasks(original.id)?
        .into_iter()
        .filter(|t| !t.is_done)
        .collect();
    if sprint_id != original.sprint_id {
        let mut incoming: BTreeMap<i64, i64> = BTreeMap::new();
        for task in &open_tasks {
            *incoming.entry(task.phase_id).or_default() += 1;
        }
        for (phase_id, count) in incoming {
            check_phase_capacity(db, &db.require_phase(phase_id)?, sprint_id, count)?;
        }
    }
    let copy = db.insert_split_story(&original, sprint_id)?;

    let mut moved_task_ids = Vec::new();
    for task in open_tasks {
        db.close_phase_durations(task.id)?;
        db.set_task_story(task.id, &copy)?;
        let moved = db.require_task(task.id)?;
        db.start_phase_duration(&moved)?;
        moved_task_ids.push(moved.id);
    }

    db.set_story_done(original.id, true)?;
    tracing::debug!(
        story_id,
        copy_id = copy.id,
        moved = moved_task_ids.len(),
        "Split story"
    );
    Ok(StorySplit {
        original: db.require_story(original.id)?,
        copy: db.require_story(copy.id)?,
        moved_task_ids,
    })
}

/// The sprint board: phases as columns, one row per story.
pub fn board_view(db: &TaskboardDb, sprint_id: i64) -> Result<BoardView> {
    let sprint = db.require_sprint(sprint_id)?;
    let phases = db.list_phases(sprint.project_id)?;
    let mut stories = Vec::new();
    for story in db.list_sprint_stories(sprint_id)? {
        let tasks = db.list_story_tasks(story.id)?;
        let columns = phases
            .iter()
            .map(|p| PhaseCell {
                phase_id: p.id,
                tasks: tasks.iter().filter(|t| t.phase_id == p.id).cloned().collect(),
            })
            .collect();
        stories.push(StoryRow { story, columns });
    }
    Ok(BoardView {
        sprint,
        phases,
        stories,
    })
}

pub fn story_detail(db: &TaskboardDb, story_id: i64) -> Result<StoryDetail> {
    let story = db.require_story(story_id)?;
    let tasks = db.list_story_tasks(story_id)?;
    Ok(StoryDetail { story, tasks })
}

pub fn sprint_stats(db: &TaskboardDb, sprint_id: i64) -> Result<SprintStats> {
    let sprint = db.require_sprint(sprint_id)?;
    let stories = db.list_sprint_stories(sprint_id)?;
    let tasks = db.list_sprint_tasks(sprint_id)?;

    let estimate_total: f64 = stories.iter().filter_map(|s| s.estimate).sum();
    let estimate_done: f64 = stories
        .iter()
        .filter(|s| s.is_done)
        .filter_map(|s| s.estimate)
        .sum();

    let now = db.now()?;
    let phases = db.list_phases(sprint.project_id)?;
    let durations = db.list_sprint_phase_durations(sprint_id)?;
    let phase_totals = phase_duration::totals(&phases, &durations, &now)?;

    Ok(SprintStats {
        sprint_id,
        working_days: dates::working_days(DateRange::from(&sprint), sprint.ignore_weekends),
        stories: Progress::new(stories.len(), stories.iter().filter(|s| s.is_done).count()),
        tasks: Progress::new(tasks.len(), tasks.iter().filter(|t| t.is_done).count()),
        estimate_total,
        estimate_done,
        phase_totals,
    })
}

pub fn milestone_progress(db: &TaskboardDb, milestone_id: i64) -> Result<MilestoneProgress> {
    let milestone = db.require_milestone(milestone_id)?;
    let stories = db.list_milestone_stories(milestone_id)?;
    let progress = Progress::new(stories.len(), stories.iter().filter(|s| s.is_done).count());
    Ok(MilestoneProgress {
        milestone,
        stories,
        progress,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::fixtures::{self, date};

    struct Board {
        db: TaskboardDb,
        project: Project,
        sprint: Sprint,
        phases: Vec<Phase>,
    }

    fn board() -> Board {
        let db = TaskboardDb::new_in_memory().unwrap();
        let manager = fixtures::user(&db, "manager", false);
        let project = fixtures::project(&db, &manager);
        let sprint = fixtures::sprint(&db, &project, date(2024, 3, 4), date(2024, 3, 15));
        let phases = db.list_phases(project.id).unwrap();
        Board {
            db,
            project,
            sprint,
            phases,
        }
    }

    #[test]
    fn test_move_task_updates_state_and_durations() -> Result<()> {
        let b = board();
        let story = fixtures::story(&b.db, &b.project, Some(b.sprint.id), "Story");
        let task = fixtures::task(&b.db, &story, "Task");

        let result = move_task(&b.db, task.id, b.phases[1].id, None)?;
        assert_eq!(result.from_phase_id, b.phases[0].id);
        assert_eq!(result.task.phase_id, b.phases[1].id);
        assert!(result.task.time_start.is_some());
        assert!(!result.task.is_done);
        assert!(result.story.time_start.is_some());

        let durations = b.db.list_phase_durations(task.id)?;
        assert_eq!(durations.len(), 2);
        assert!(durations[0].time_end.is_some());
        assert_eq!(durations[1].phase_id, b.phases[1].id);
        assert!(durations[1].time_end.is_none());
        Ok(())
    }

    #[test]
    fn test_same_phase_move_is_a_no_op_for_durations() -> Result<()> {
        let b = board();
        let story = fixtures::story(&b.db, &b.project, Some(b.sprint.id), "Story");
        let task = fixtures::task(&b.db, &story, "Task");
        move_task(&b.db, task.id, b.phases[0].id, None)?;
        assert_eq!(b.db.list_phase_durations(task.id)?.len(), 1);
        assert!(b.db.require_task(task.id)?.time_start.is_none());
        Ok(())
    }

    #[test]
    fn test_finishing_last_task_finishes_story() -> Result<()> {
        let b = board();
        let story = fixtures::story(&b.db, &b.project, Some(b.sprint.id), "Story");
        let first = fixtures::task(&b.db, &story, "First");
        let second = fixtures::task(&b.db, &story, "Second");
        let done = b.phases[2].id;

        let r = move_task(&b.db, first.id, done, None)?;
        assert!(r.task.is_done);
        assert!(r.task.time_end.is_some());
        assert!(!r.story.is_done);

        let r = move_task(&b.db, second.id, done, None)?;
        assert!(r.story.is_done);

        let r = move_task(&b.db, second.id, b.phases[1].id, None)?;
        assert!(r.task.time_end.is_none());
        assert!(!r.story.is_done);
        Ok(())
    }

    #[test]
    fn test_wip_limit_rejects_move() -> Result<()> {
        let b = board();
        let in_progress = b.db.update_phase(
            b.phases[1].id,
            &PhasePatch {
                tasks: Some(1),
                ..Default::default()
            },
        )?;
        let story = fixtures::story(&b.db, &b.project, Some(b.sprint.id), "Story");
        let first = fixtures::task(&b.db, &story, "First");
        let second = fixtures::task(&b.db, &story, "Second");

        move_task(&b.db, first.id, in_progress.id, None)?;
        let err = move_task(&b.db, second.id, in_progress.id, None).unwrap_err();
        assert!(matches!(err.downcast_ref::<BoardError>(), Some(BoardError::Validation(_))));
        assert_eq!(b.db.require_task(second.id)?.phase_id, b.phases[0].id);

        // The limit counts per sprint; a backlog story is unaffected.
        let backlog = fixtures::story(&b.db, &b.project, None, "Later");
        let third = fixtures::task(&b.db, &backlog, "Third");
        move_task(&b.db, third.id, in_progress.id, None)?;
        Ok(())
    }

    #[test]
    fn test_move_task_to_foreign_phase_rejected() -> Result<()> {
        let b = board();
        let manager = b.db.require_user(b.project.manager_id)?;
        let other = fixtures::project(&b.db, &manager);
        let foreign = b.db.first_phase(other.id)?.unwrap();
        let story = fixtures::story(&b.db, &b.project, None, "Story");
        let task = fixtures::task(&b.db, &story, "Task");
        assert!(move_task(&b.db, task.id, foreign.id, None).is_err());
        Ok(())
    }

    #[test]
    fn test_move_task_to_other_story() -> Result<()> {
        let b = board();
        let from = fixtures::story(&b.db, &b.project, None, "From");
        let to = fixtures::story(&b.db, &b.project, Some(b.sprint.id), "To");
        let task = fixtures::task(&b.db, &from, "Task");

        let r = move_task(&b.db, task.id, b.phases[2].id, Some(to.id))?;
        assert_eq!(r.task.story_id, to.id);
        assert_eq!(r.task.sprint_id, Some(b.sprint.id));
        assert_eq!(r.from_story_id, from.id);
        assert!(r.story.is_done);
        assert!(!b.db.require_story(from.id)?.is_done);
        Ok(())
    }

    #[test]
    fn test_split_moves_only_unfinished_tasks() -> Result<()> {
        let b = board();
        let next = fixtures::sprint(&b.db, &b.project, date(2024, 3, 18), date(2024, 3, 29));
        let story = fixtures::story(&b.db, &b.project, Some(b.sprint.id), "Story");
        let finished = fixtures::task(&b.db, &story, "Finished");
        let open = fixtures::task(&b.db, &story, "Open");
        move_task(&b.db, finished.id, b.phases[2].id, None)?;

        let split = split_story(&b.db, story.id, Some(next.id))?;
        assert!(split.original.is_done);
        assert_eq!(split.copy.parent_id, Some(story.id));
        assert_eq!(split.copy.sprint_id, Some(next.id));
        assert_eq!(split.moved_task_ids, vec![open.id]);

        let moved = b.db.require_task(open.id)?;
        assert_eq!(moved.story_id, split.copy.id);
        assert_eq!(moved.sprint_id, Some(next.id));
        assert_eq!(b.db.require_task(finished.id)?.story_id, story.id);

        let durations = b.db.list_phase_durations(open.id)?;
        assert_eq!(durations.len(), 2);
        assert_eq!(durations[1].sprint_id, Some(next.id));
        assert!(durations[0].time_end.is_some());
        Ok(())
    }

    #[test]
    fn test_split_respects_wip_limit_of_target_sprint() -> Result<()> {
        let b = board();
        let next = fixtures::sprint(&b.db, &b.project, date(2024, 3, 18), date(2024, 3, 29));
        let in_progress = b.db.update_phase(
            b.phases[1].id,
            &PhasePatch {
                tasks: Some(1),
                ..Default::default()
            },
        )?;
        let waiting = fixtures::story(&b.db, &b.project, Some(next.id), "Waiting");
        let occupant = fixtures::task(&b.db, &waiting, "Occupant");
        move_task(&b.db, occupant.id, in_progress.id, None)?;

        let story = fixtures::story(&b.db, &b.project, Some(b.sprint.id), "Story");
        let open = fixtures::task(&b.db, &story, "Open");
        move_task(&b.db, open.id, in_progress.id, None)?;

        let err = split_story(&b.db, story.id, Some(next.id)).unwrap_err();
        assert!(matches!(err.downcast_ref::<BoardError>(), Some(BoardError::Validation(_))));
        assert_eq!(b.db.require_task(open.id)?.story_id, story.id);
        assert!(!b.db.require_story(story.id)?.is_done);

        // Splitting within the same sprint moves nothing into a new column.
        split_story(&b.db, story.id, Some(b.sprint.id))?;
        Ok(())
    }

    #[test]
    fn test_phase_done_toggle_resyncs_tasks_and_stories() -> Result<()> {
        let b = board();
        let story = fixtures::story(&b.db, &b.project, Some(b.sprint.id), "Story");
        let task = fixtures::task(&b.db, &story, "Task");
        move_task(&b.db, task.id, b.phases[1].id, None)?;

        let update = update_phase(
            &b.db,
            b.phases[1].id,
            &PhasePatch {
                is_done: Some(true),
                ..Default::default()
            },
        )?;
        assert!(update.phase.is_done);
        assert_eq!(update.tasks.len(), 1);
        assert!(update.tasks[0].is_done);
        assert!(update.tasks[0].time_end.is_some());
        assert_eq!(update.stories.len(), 1);
        assert!(b.db.require_story(story.id)?.is_done);

        let update = update_phase(
            &b.db,
            b.phases[1].id,
            &PhasePatch {
                is_done: Some(false),
                ..Default::default()
            },
        )?;
        let reopened = b.db.require_task(task.id)?;
        assert!(!reopened.is_done);
        assert!(reopened.time_end.is_none());
        assert!(reopened.time_start.is_some());
        assert!(!update.stories[0].is_done);

        let renamed = update_phase(
            &b.db,
            b.phases[1].id,
            &PhasePatch {
                title: Some("Doing".into()),
                ..Default::default()
            },
        )?;
        assert!(renamed.tasks.is_empty());
        assert!(renamed.stories.is_empty());
        Ok(())
    }

    #[test]
    fn test_split_done_story_rejected() -> Result<()> {
        let b = board();
        let story = fixtures::story(&b.db, &b.project, Some(b.sprint.id), "Story");
        b.db.set_story_done(story.id, true)?;
        assert!(split_story(&b.db, story.id, None).is_err());
        Ok(())
    }

    #[test]
    fn test_board_view_groups_tasks_by_phase() -> Result<()> {
        let b = board();
        let story = fixtures::story(&b.db, &b.project, Some(b.sprint.id), "Story");
        let a = fixtures::task(&b.db, &story, "A");
        fixtures::task(&b.db, &story, "B");
        move_task(&b.db, a.id, b.phases[1].id, None)?;

        let view = board_view(&b.db, b.sprint.id)?;
        assert_eq!(view.phases.len(), 3);
        assert_eq!(view.stories.len(), 1);
        let columns = &view.stories[0].columns;
        assert_eq!(columns[0].tasks.len(), 1);
        assert_eq!(columns[1].tasks[0].id, a.id);
        assert!(columns[2].tasks.is_empty());
        Ok(())
    }

    #[test]
    fn test_sprint_stats() -> Result<()> {
        let b = board();
        let done = fixtures::story(&b.db, &b.project, Some(b.sprint.id), "Done");
        fixtures::story(&b.db, &b.project, Some(b.sprint.id), "Open");
        let task = fixtures::task(&b.db, &done, "Task");
        move_task(&b.db, task.id, b.phases[2].id, None)?;

        let stats = sprint_stats(&b.db, b.sprint.id)?;
        assert_eq!(stats.working_days, 12);
        assert_eq!(stats.stories, Progress::new(2, 1));
        assert_eq!(stats.tasks, Progress::new(1, 1));
        assert_eq!(stats.estimate_total, 6.0);
        assert_eq!(stats.estimate_done, 3.0);
        assert_eq!(stats.phase_totals.len(), 3);
        Ok(())
    }

    #[test]
    fn test_milestone_progress() -> Result<()> {
        let b = board();
        let milestone = b.db.create_milestone(
            b.project.id,
            &NewMilestone {
                title: "Beta".into(),
                description: String::new(),
                deadline: None,
            },
        )?;
        for (i, done) in [true, false, false, false].into_iter().enumerate() {
            let story = fixtures::story(&b.db, &b.project, None, &format!("S{}", i));
            b.db.update_story(
                story.id,
                &StoryPatch {
                    milestone_id: Some(Some(milestone.id)),
                    is_done: Some(done),
                    ..Default::default()
                },
            )?;
        }
        let progress = milestone_progress(&b.db, milestone.id)?;
        assert_eq!(progress.progress, Progress::new(4, 1));
        assert_eq!(progress.progress.percent, 25);
        Ok(())
    }
}
