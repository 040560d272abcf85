use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ── Object kinds and roles ────────────────────────────────────────────

/// Every record type that can be addressed by `object_name`/`object_id`
/// (comments, links and history rows point at objects this way).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Project,
    Sprint,
    Story,
    Task,
    Phase,
    Milestone,
    Comment,
    ExternalLink,
    Link,
    User,
}

impl ObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Project => "project",
            Self::Sprint => "sprint",
            Self::Story => "story",
            Self::Task => "task",
            Self::Phase => "phase",
            Self::Milestone => "milestone",
            Self::Comment => "comment",
            Self::ExternalLink => "external_link",
            Self::Link => "link",
            Self::User => "user",
        }
    }

    /// Whether comments and links may be attached to objects of this kind.
    /// Replies thread through `parent_id`, and users belong to no project.
    pub fn accepts_attachments(&self) -> bool {
        !matches!(self, Self::Comment | Self::Link | Self::User)
    }
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "project" => Ok(Self::Project),
            "sprint" => Ok(Self::Sprint),
            "story" => Ok(Self::Story),
            "task" => Ok(Self::Task),
            "phase" => Ok(Self::Phase),
            "milestone" => Ok(Self::Milestone),
            "comment" => Ok(Self::Comment),
            "external_link" => Ok(Self::ExternalLink),
            "link" => Ok(Self::Link),
            "user" => Ok(Self::User),
            _ => Err(format!("Invalid object name: {}", s)),
        }
    }
}

/// A typed pointer to a single record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    pub kind: ObjectKind,
    pub id: i64,
}

impl ObjectRef {
    pub fn new(kind: ObjectKind, id: i64) -> Self {
        Self { kind, id }
    }

    pub fn project(id: i64) -> Self {
        Self::new(ObjectKind::Project, id)
    }

    pub fn sprint(id: i64) -> Self {
        Self::new(ObjectKind::Sprint, id)
    }

    pub fn story(id: i64) -> Self {
        Self::new(ObjectKind::Story, id)
    }

    pub fn task(id: i64) -> Self {
        Self::new(ObjectKind::Task, id)
    }
}

impl std::fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.kind, self.id)
    }
}

/// Per-project permission level. Ordering is significant: a higher role
/// satisfies every check a lower one does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Viewer,
    Contributor,
    Administrator,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Viewer => "viewer",
            Self::Contributor => "contributor",
            Self::Administrator => "administrator",
        }
    }

    /// Integer stored in `project_users.role`.
    pub fn as_i64(&self) -> i64 {
        match self {
            Self::Viewer => 0,
            Self::Contributor => 1,
            Self::Administrator => 2,
        }
    }

    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(Self::Viewer),
            1 => Some(Self::Contributor),
            2 => Some(Self::Administrator),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "viewer" => Ok(Self::Viewer),
            "contributor" => Ok(Self::Contributor),
            "administrator" => Ok(Self::Administrator),
            _ => Err(format!("Invalid role: {}", s)),
        }
    }
}

// ── Users ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub admin: bool,
    pub language: String,
    pub timezone: String,
    pub date_format: String,
    pub created_at: String,
    pub updated_at: String,
}

impl User {
    pub fn full_name(&self) -> String {
        let name = format!("{} {}", self.first_name, self.last_name);
        let name = name.trim();
        if name.is_empty() {
            self.username.clone()
        } else {
            name.to_string()
        }
    }
}

/// Fields accepted when creating a user.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewUser {
    pub username: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub admin: bool,
    pub password: String,
}

/// Partial update of a user; `None` leaves the field untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserPatch {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub admin: Option<bool>,
    pub language: Option<String>,
    pub timezone: Option<String>,
    pub date_format: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    pub user_id: i64,
    pub created_at: String,
    pub expires_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserLogin {
    pub id: i64,
    pub user_id: i64,
    pub ip: String,
    pub agent: String,
    pub stamp: String,
}

// ── Projects ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Project {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub manager_id: i64,
    pub date_start: NaiveDate,
    pub date_end: NaiveDate,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewProject {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub manager_id: Option<i64>,
    pub date_start: NaiveDate,
    pub date_end: NaiveDate,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProjectPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub manager_id: Option<i64>,
    pub date_start: Option<NaiveDate>,
    pub date_end: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectMember {
    pub id: i64,
    pub project_id: i64,
    pub user_id: i64,
    pub role: Role,
}

/// Member listing entry with the user record inlined.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectMemberView {
    #[serde(flatten)]
    pub member: ProjectMember,
    pub user: User,
}

// ── Phases and task types ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Phase {
    pub id: i64,
    pub project_id: i64,
    pub title: String,
    pub description: String,
    pub order: i32,
    /// Maximum number of tasks the phase may hold per sprint; 0 = unlimited.
    pub tasks: i32,
    pub is_done: bool,
    pub background_color: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPhase {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub order: Option<i32>,
    #[serde(default)]
    pub tasks: i32,
    #[serde(default)]
    pub is_done: bool,
    #[serde(default = "default_phase_color")]
    pub background_color: String,
}

pub fn default_phase_color() -> String {
    "#ffffff".to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PhasePatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub tasks: Option<i32>,
    pub is_done: Option<bool>,
    pub background_color: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskType {
    pub id: i64,
    pub title: String,
    pub order: i32,
    pub chart_color: String,
    pub class: String,
}

// ── Sprints and milestones ────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Sprint {
    pub id: i64,
    pub project_id: i64,
    pub title: String,
    pub description: String,
    pub date_start: NaiveDate,
    pub date_end: NaiveDate,
    pub ignore_weekends: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewSprint {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub date_start: NaiveDate,
    pub date_end: NaiveDate,
    #[serde(default)]
    pub ignore_weekends: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SprintPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub date_start: Option<NaiveDate>,
    pub date_end: Option<NaiveDate>,
    pub ignore_weekends: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Milestone {
    pub id: i64,
    pub project_id: i64,
    pub title: String,
    pub description: String,
    pub deadline: Option<NaiveDate>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewMilestone {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub deadline: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MilestonePatch {
    pub title: Option<String>,
    pub description: Option<String>,
    /// `Some(None)` clears the deadline.
    #[serde(default, deserialize_with = "double_option")]
    pub deadline: Option<Option<NaiveDate>>,
}

// ── Stories and tasks ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Story {
    pub id: i64,
    pub project_id: i64,
    /// `None` means the story sits in the project backlog.
    pub sprint_id: Option<i64>,
    pub milestone_id: Option<i64>,
    /// Story this one was split from.
    pub parent_id: Option<i64>,
    pub title: String,
    pub description: String,
    pub estimate: Option<f64>,
    pub priority: i32,
    pub is_done: bool,
    pub time_start: Option<String>,
    pub time_end: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewStory {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub sprint_id: Option<i64>,
    pub milestone_id: Option<i64>,
    pub estimate: Option<f64>,
    #[serde(default)]
    pub priority: i32,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoryPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub milestone_id: Option<Option<i64>>,
    #[serde(default, deserialize_with = "double_option")]
    pub estimate: Option<Option<f64>>,
    pub priority: Option<i32>,
    pub is_done: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: i64,
    pub story_id: i64,
    pub project_id: i64,
    pub sprint_id: Option<i64>,
    pub user_id: Option<i64>,
    pub phase_id: i64,
    pub type_id: i64,
    pub title: String,
    pub description: String,
    pub priority: i32,
    pub is_done: bool,
    pub time_start: Option<String>,
    pub time_end: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewTask {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub user_id: Option<i64>,
    /// Defaults to the project's first phase.
    pub phase_id: Option<i64>,
    /// Defaults to the first task type.
    pub type_id: Option<i64>,
    #[serde(default)]
    pub priority: i32,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub user_id: Option<Option<i64>>,
    pub type_id: Option<i64>,
    pub priority: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhaseDuration {
    pub id: i64,
    pub task_id: i64,
    pub phase_id: i64,
    pub story_id: i64,
    pub sprint_id: Option<i64>,
    pub project_id: i64,
    pub time_start: String,
    pub time_end: Option<String>,
}

/// A phase duration row with its computed length.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseDurationView {
    #[serde(flatten)]
    pub duration: PhaseDuration,
    pub seconds: i64,
    pub formatted: String,
}

/// Total time spent by all tasks in one phase.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhaseTotal {
    pub phase_id: i64,
    pub phase_title: String,
    pub seconds: i64,
    pub formatted: String,
}

// ── Comments and links ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Comment {
    pub id: i64,
    pub object_name: ObjectKind,
    pub object_id: i64,
    pub parent_id: Option<i64>,
    pub comment: String,
    pub created_user_id: i64,
    pub created_at: String,
    pub updated_at: String,
}

/// Comment with its replies, as shown in a discussion thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommentThread {
    #[serde(flatten)]
    pub comment: Comment,
    pub replies: Vec<CommentThread>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExternalLink {
    pub id: i64,
    pub project_id: i64,
    pub title: String,
    pub description: String,
    /// URL template, e.g. `https://tracker.example.com/browse/:issue`.
    pub link: String,
    pub parameters: Vec<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewExternalLink {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub link: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExternalLinkPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub link: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Link {
    pub id: i64,
    pub object_name: ObjectKind,
    pub object_id: i64,
    pub external_link_id: i64,
    pub name: String,
    pub url: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewLink {
    pub object_name: ObjectKind,
    pub object_id: i64,
    pub external_link_id: i64,
    pub name: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

// ── History ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryRow {
    pub id: i64,
    pub object_name: ObjectKind,
    pub object_id: i64,
    pub object_data: serde_json::Value,
    pub message: Option<String>,
    pub user_id: Option<i64>,
    pub created_at: String,
}

// ── API view types ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardView {
    pub sprint: Sprint,
    pub phases: Vec<Phase>,
    pub stories: Vec<StoryRow>,
}

/// One swim lane of the board: a story with its tasks bucketed by phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoryRow {
    pub story: Story,
    pub columns: Vec<PhaseCell>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseCell {
    pub phase_id: i64,
    pub tasks: Vec<Task>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoryDetail {
    pub story: Story,
    pub tasks: Vec<Task>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Progress {
    pub total: usize,
    pub done: usize,
    pub percent: u8,
}

impl Progress {
    pub fn new(total: usize, done: usize) -> Self {
        let percent = if total == 0 {
            0
        } else {
            ((done * 100) / total).min(100) as u8
        };
        Self {
            total,
            done,
            percent,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MilestoneProgress {
    pub milestone: Milestone,
    pub stories: Vec<Story>,
    pub progress: Progress,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SprintStats {
    pub sprint_id: i64,
    pub working_days: i64,
    pub stories: Progress,
    pub tasks: Progress,
    pub estimate_total: f64,
    pub estimate_done: f64,
    pub phase_totals: Vec<PhaseTotal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectSummary {
    #[serde(flatten)]
    pub project: Project,
    pub role: Role,
    pub sprint_count: i64,
    pub backlog_count: i64,
}

/// Distinguishes a missing JSON field (`None`) from an explicit `null`
/// (`Some(None)`) in patch payloads.
fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: serde::Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}
