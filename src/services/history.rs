//! Change log.
//!
//! Every mutation stores a full JSON snapshot of the object. Reading the log
//! turns consecutive snapshots into structural diffs, with foreign-key ids
//! resolved to human-readable labels.

use std::collections::HashSet;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::db::TaskboardDb;
use crate::models::{HistoryRow, ObjectKind, ObjectRef};

/// Keys that change on every write and carry no information of their own.
const VOLATILE_KEYS: &[&str] = &["updated_at"];

pub const DELETED_MESSAGE: &str = "deleted";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Removed,
    Changed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub path: String,
    pub kind: ChangeKind,
    pub old: Option<Value>,
    pub new: Option<Value>,
    pub old_label: Option<String>,
    pub new_label: Option<String>,
}

impl Change {
    fn new(path: String, kind: ChangeKind, old: Option<&Value>, new: Option<&Value>) -> Self {
        Self {
            path,
            kind,
            old: old.cloned(),
            new: new.cloned(),
            old_label: None,
            new_label: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: i64,
    pub created_at: String,
    pub user_id: Option<i64>,
    pub user_label: Option<String>,
    pub message: Option<String>,
    pub changes: Vec<Change>,
}

/// Resolves ids to display labels (titles, user names).
pub trait LabelLookup {
    fn label(&self, kind: ObjectKind, id: i64) -> Result<Option<String>>;
}

/// Append a snapshot of `snapshot` to the object's history.
pub fn record<T: Serialize>(
    db: &TaskboardDb,
    object: ObjectRef,
    snapshot: &T,
    message: Option<&str>,
    user_id: Option<i64>,
) -> Result<HistoryRow> {
    let data = serde_json::to_value(snapshot)?;
    db.insert_history(object, &data, message, user_id)
}

/// Record `object` as deleted together with everything that goes with it:
/// rows the schema removes in cascade and the comments and links attached
/// to each of them. Attachments are purged here. The caller deletes `object`
/// itself in the same transaction.
pub fn record_deletion<T: Serialize>(
    db: &TaskboardDb,
    object: ObjectRef,
    snapshot: &T,
    user_id: Option<i64>,
) -> Result<()> {
    record(db, object, snapshot, Some(DELETED_MESSAGE), user_id)?;
    match object.kind {
        ObjectKind::Project => {
            for story in db.list_project_stories(object.id)? {
                record_deletion(db, ObjectRef::story(story.id), &story, user_id)?;
            }
            for sprint in db.list_sprints(object.id)? {
                record_deletion(db, ObjectRef::sprint(sprint.id), &sprint, user_id)?;
            }
            for phase in db.list_phases(object.id)? {
                record_deletion(db, ObjectRef::new(ObjectKind::Phase, phase.id), &phase, user_id)?;
            }
            for milestone in db.list_milestones(object.id)? {
                let milestone_ref = ObjectRef::new(ObjectKind::Milestone, milestone.id);
                record_deletion(db, milestone_ref, &milestone, user_id)?;
            }
            for template in db.list_external_links(object.id)? {
                let template_ref = ObjectRef::new(ObjectKind::ExternalLink, template.id);
                record_deletion(db, template_ref, &template, user_id)?;
            }
        }
        ObjectKind::Story => {
            for task in db.list_story_tasks(object.id)? {
                record_deletion(db, ObjectRef::task(task.id), &task, user_id)?;
            }
        }
        ObjectKind::ExternalLink => {
            for link in db.list_template_links(object.id)? {
                record_deletion(db, ObjectRef::new(ObjectKind::Link, link.id), &link, user_id)?;
            }
        }
        ObjectKind::Comment => {
            for reply in db.list_replies(object.id)? {
                record_deletion(db, ObjectRef::new(ObjectKind::Comment, reply.id), &reply, user_id)?;
            }
        }
        ObjectKind::User => {
            // Replies under the user's own comments are reached through their parent.
            let own = db.list_user_comments(object.id)?;
            let own_ids: HashSet<i64> = own.iter().map(|c| c.id).collect();
            for comment in own
                .iter()
                .filter(|c| !c.parent_id.is_some_and(|p| own_ids.contains(&p)))
            {
                let comment_ref = ObjectRef::new(ObjectKind::Comment, comment.id);
                record_deletion(db, comment_ref, comment, user_id)?;
            }
        }
        ObjectKind::Sprint
        | ObjectKind::Phase
        | ObjectKind::Milestone
        | ObjectKind::Task
        | ObjectKind::Link => {}
    }
    if object.kind.accepts_attachments() {
        for comment in db.list_comments(object)? {
            let comment_ref = ObjectRef::new(ObjectKind::Comment, comment.id);
            record(db, comment_ref, &comment, Some(DELETED_MESSAGE), user_id)?;
        }
        for link in db.list_links(object)? {
            let link_ref = ObjectRef::new(ObjectKind::Link, link.id);
            record(db, link_ref, &link, Some(DELETED_MESSAGE), user_id)?;
        }
        db.delete_attachments(object)?;
    }
    Ok(())
}

/// Structural diff of two JSON values. Object keys are visited in sorted
/// order and arrays index by index.
pub fn diff(old: &Value, new: &Value) -> Vec<Change> {
    let mut changes = Vec::new();
    diff_into(&mut changes, String::new(), old, new);
    changes
}

fn diff_into(out: &mut Vec<Change>, path: String, old: &Value, new: &Value) {
    match (old, new) {
        (Value::Object(a), Value::Object(b)) => {
            let mut keys: Vec<&String> = a.keys().chain(b.keys()).collect();
            keys.sort();
            keys.dedup();
            for key in keys {
                let child = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", path, key)
                };
                match (a.get(key), b.get(key)) {
                    (Some(x), Some(y)) => diff_into(out, child, x, y),
                    (None, Some(y)) => out.push(Change::new(child, ChangeKind::Added, None, Some(y))),
                    (Some(x), None) => {
                        out.push(Change::new(child, ChangeKind::Removed, Some(x), None))
                    }
                    (None, None) => {}
                }
            }
        }
        (Value::Array(a), Value::Array(b)) => {
            for i in 0..a.len().max(b.len()) {
                let child = format!("{}[{}]", path, i);
                match (a.get(i), b.get(i)) {
                    (Some(x), Some(y)) => diff_into(out, child, x, y),
                    (None, Some(y)) => out.push(Change::new(child, ChangeKind::Added, None, Some(y))),
                    (Some(x), None) => {
                        out.push(Change::new(child, ChangeKind::Removed, Some(x), None))
                    }
                    (None, None) => {}
                }
            }
        }
        (a, b) if a != b => out.push(Change::new(path, ChangeKind::Changed, Some(a), Some(b))),
        _ => {}
    }
}

fn strip_volatile(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(k, _)| !VOLATILE_KEYS.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Object kind an id-valued field points at, if it is a foreign key.
fn label_kind(field: &str, own: ObjectKind) -> Option<ObjectKind> {
    match field {
        "project_id" => Some(ObjectKind::Project),
        "sprint_id" => Some(ObjectKind::Sprint),
        "story_id" => Some(ObjectKind::Story),
        "phase_id" => Some(ObjectKind::Phase),
        "milestone_id" => Some(ObjectKind::Milestone),
        "external_link_id" => Some(ObjectKind::ExternalLink),
        "parent_id" => Some(own),
        "user_id" | "manager_id" | "created_user_id" => Some(ObjectKind::User),
        _ => None,
    }
}

fn resolve_label(labels: &impl LabelLookup, kind: ObjectKind, value: Option<&Value>) -> Result<Option<String>> {
    match value.and_then(Value::as_i64) {
        Some(id) => labels.label(kind, id),
        None => Ok(None),
    }
}

/// Task type ids resolve through their own table, not an `ObjectKind`.
pub trait TaskTypeLabels {
    fn task_type_label(&self, id: i64) -> Result<Option<String>>;
}

fn attach_labels(
    changes: &mut [Change],
    own: ObjectKind,
    labels: &(impl LabelLookup + TaskTypeLabels),
) -> Result<()> {
    for change in changes.iter_mut() {
        let field = change.path.rsplit('.').next().unwrap_or(&change.path);
        if field == "type_id" && own == ObjectKind::Task {
            change.old_label = match change.old.as_ref().and_then(Value::as_i64) {
                Some(id) => labels.task_type_label(id)?,
                None => None,
            };
            change.new_label = match change.new.as_ref().and_then(Value::as_i64) {
                Some(id) => labels.task_type_label(id)?,
                None => None,
            };
            continue;
        }
        if let Some(kind) = label_kind(field, own) {
            change.old_label = resolve_label(labels, kind, change.old.as_ref())?;
            change.new_label = resolve_label(labels, kind, change.new.as_ref())?;
        }
    }
    Ok(())
}

/// Turn raw snapshots into a readable change log.
///
/// Rows are processed by id. A row without a message whose snapshot equals
/// the previous kept one (ignoring volatile keys) is skipped. The first kept
/// row lists every field as added; later ones list their diff against the
/// previous kept row. Entries with no changes and no message are dropped.
pub fn reconstruct(
    mut rows: Vec<HistoryRow>,
    labels: &(impl LabelLookup + TaskTypeLabels),
) -> Result<Vec<HistoryEntry>> {
    rows.sort_by_key(|r| r.id);
    let mut entries = Vec::new();
    let mut previous: Option<Value> = None;

    for row in rows {
        let current = strip_volatile(&row.object_data);
        if row.message.is_none() && previous.as_ref() == Some(&current) {
            continue;
        }
        let base = previous
            .take()
            .unwrap_or_else(|| Value::Object(Map::new()));
        let mut changes = diff(&base, &current);
        previous = Some(current);

        if changes.is_empty() && row.message.is_none() {
            continue;
        }
        attach_labels(&mut changes, row.object_name, labels)?;
        let user_label = match row.user_id {
            Some(id) => labels.label(ObjectKind::User, id)?,
            None => None,
        };
        entries.push(HistoryEntry {
            id: row.id,
            created_at: row.created_at,
            user_id: row.user_id,
            user_label,
            message: row.message,
            changes,
        });
    }
    Ok(entries)
}

/// Project a deleted object belonged to, read from its last snapshot.
pub fn last_known_project(rows: &[HistoryRow]) -> Option<i64> {
    rows.iter()
        .max_by_key(|r| r.id)
        .and_then(|r| r.object_data.get("project_id"))
        .and_then(Value::as_i64)
}

impl LabelLookup for TaskboardDb {
    fn label(&self, kind: ObjectKind, id: i64) -> Result<Option<String>> {
        Ok(match kind {
            ObjectKind::Project => self.get_project(id)?.map(|p| p.title),
            ObjectKind::Sprint => self.get_sprint(id)?.map(|s| s.title),
            ObjectKind::Story => self.get_story(id)?.map(|s| s.title),
            ObjectKind::Task => self.get_task(id)?.map(|t| t.title),
            ObjectKind::Phase => self.get_phase(id)?.map(|p| p.title),
            ObjectKind::Milestone => self.get_milestone(id)?.map(|m| m.title),
            ObjectKind::ExternalLink => self.get_external_link(id)?.map(|l| l.title),
            ObjectKind::Link => self.get_link(id)?.map(|l| l.name),
            ObjectKind::User => self.get_user(id)?.map(|u| u.full_name()),
            ObjectKind::Comment => self.get_comment(id)?.map(|c| {
                let mut text: String = c.comment.chars().take(40).collect();
                if c.comment.chars().count() > 40 {
                    text.push('…');
                }
                text
            }),
        })
    }
}

impl TaskTypeLabels for TaskboardDb {
    fn task_type_label(&self, id: i64) -> Result<Option<String>> {
        Ok(self.get_task_type(id)?.map(|t| t.title))
    }
}
