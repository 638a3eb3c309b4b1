//! Core data types for workplan items.

use crate::error::ValidationError;
use crate::id;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// The four concrete kinds of tracked work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Epic,
    Issue,
    Task,
    Pr,
}

impl ItemKind {
    /// All kinds, parents before children.
    pub const ALL: [ItemKind; 4] = [ItemKind::Epic, ItemKind::Issue, ItemKind::Task, ItemKind::Pr];

    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Epic => "epic",
            ItemKind::Issue => "issue",
            ItemKind::Task => "task",
            ItemKind::Pr => "pr",
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "epic" | "epics" => Ok(ItemKind::Epic),
            "issue" | "issues" => Ok(ItemKind::Issue),
            "task" | "tasks" => Ok(ItemKind::Task),
            "pr" | "prs" => Ok(ItemKind::Pr),
            other => Err(format!("unknown item kind '{}'", other)),
        }
    }
}

/// Legacy status carried by epics, issues and tasks.
///
/// Hierarchical items use planning/active/completed/archived; flat tasks
/// use todo/in-progress/done/blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Status {
    #[default]
    Planning,
    Active,
    Completed,
    Archived,
    Todo,
    InProgress,
    Done,
    Blocked,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Planning => "planning",
            Status::Active => "active",
            Status::Completed => "completed",
            Status::Archived => "archived",
            Status::Todo => "todo",
            Status::InProgress => "in-progress",
            Status::Done => "done",
            Status::Blocked => "blocked",
        }
    }

    /// True for the flat-task vocabulary.
    pub fn is_flat(&self) -> bool {
        matches!(self, Status::Todo | Status::InProgress | Status::Done | Status::Blocked)
    }

    /// Collapse to one of planning/active/completed/archived.
    pub fn normalized(&self) -> Status {
        match self {
            Status::Planning | Status::Todo => Status::Planning,
            Status::Active | Status::InProgress | Status::Blocked => Status::Active,
            Status::Completed | Status::Done => Status::Completed,
            Status::Archived => Status::Archived,
        }
    }

    /// Express a normalized status in the same vocabulary as `self`.
    ///
    /// Flat tasks have no archived value, so archived stays archived.
    pub fn in_vocabulary_of(class: Status, current: Status) -> Status {
        let class = class.normalized();
        if !current.is_flat() {
            return class;
        }
        match class {
            Status::Planning => Status::Todo,
            Status::Active => Status::InProgress,
            Status::Completed => Status::Done,
            _ => class,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "planning" => Ok(Status::Planning),
            "active" => Ok(Status::Active),
            "completed" => Ok(Status::Completed),
            "archived" => Ok(Status::Archived),
            "todo" => Ok(Status::Todo),
            "in-progress" | "in_progress" => Ok(Status::InProgress),
            "done" => Ok(Status::Done),
            "blocked" => Ok(Status::Blocked),
            other => Err(format!("unknown status '{}'", other)),
        }
    }
}

/// Pull request status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PrStatus {
    #[default]
    Draft,
    Open,
    Review,
    Approved,
    Merged,
    Closed,
}

impl PrStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrStatus::Draft => "draft",
            PrStatus::Open => "open",
            PrStatus::Review => "review",
            PrStatus::Approved => "approved",
            PrStatus::Merged => "merged",
            PrStatus::Closed => "closed",
        }
    }
}

impl fmt::Display for PrStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PrStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(PrStatus::Draft),
            "open" => Ok(PrStatus::Open),
            "review" => Ok(PrStatus::Review),
            "approved" => Ok(PrStatus::Approved),
            "merged" => Ok(PrStatus::Merged),
            "closed" => Ok(PrStatus::Closed),
            other => Err(format!("unknown PR status '{}'", other)),
        }
    }
}

/// Unified lifecycle state superseding the legacy status fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    Planning,
    Active,
    Completed,
    Archived,
    ReadyForEngineering,
    ReadyForQa,
    ReadyForDeployment,
    #[serde(rename = "won_t_do")]
    WontDo,
    Done,
}

impl State {
    pub const ALL: [State; 9] = [
        State::Planning,
        State::Active,
        State::Completed,
        State::Archived,
        State::ReadyForEngineering,
        State::ReadyForQa,
        State::ReadyForDeployment,
        State::WontDo,
        State::Done,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            State::Planning => "planning",
            State::Active => "active",
            State::Completed => "completed",
            State::Archived => "archived",
            State::ReadyForEngineering => "ready_for_engineering",
            State::ReadyForQa => "ready_for_qa",
            State::ReadyForDeployment => "ready_for_deployment",
            State::WontDo => "won_t_do",
            State::Done => "done",
        }
    }

    /// Terminal-success states counted as finished work.
    pub fn is_finished(&self) -> bool {
        matches!(self, State::Completed | State::Done)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for State {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        State::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| format!("unknown state '{}'", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

/// Bookkeeping attached to every unified-state change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateMetadata {
    #[serde(with = "lenient_date")]
    pub transitioned_at: DateTime<Utc>,

    pub transitioned_by: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_state: Option<State>,

    #[serde(default)]
    pub automation_eligible: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub automation_source: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transition_reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewer: Option<String>,
}

/// Frontmatter fields shared by every kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemHeader {
    pub id: String,

    pub title: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<State>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_metadata: Option<StateMetadata>,

    #[serde(default = "epoch", with = "lenient_date")]
    pub created_date: DateTime<Utc>,

    #[serde(default = "epoch", with = "lenient_date")]
    pub updated_date: DateTime<Utc>,

    /// Bumped by every store update.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub revision: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_tokens: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_tokens: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_status: Option<String>,
}

impl ItemHeader {
    /// A fresh header stamped with the current time.
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            state: None,
            state_metadata: None,
            created_date: now,
            updated_date: now,
            revision: 0,
            estimated_tokens: None,
            actual_tokens: None,
            assignee: None,
            priority: None,
            sync_status: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EpicDetail {
    #[serde(default)]
    pub status: Status,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related_issues: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct IssueDetail {
    #[serde(default)]
    pub status: Status,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epic_id: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related_tasks: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related_prs: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blocked_by: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blocks: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TaskDetail {
    #[serde(default)]
    pub status: Status,

    #[serde(default)]
    pub issue_id: String,

    /// Derived from the parent issue when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epic_id: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related_prs: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blocked_by: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blocks: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PrDetail {
    #[serde(default, alias = "status")]
    pub pr_status: PrStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epic_id: Option<String>,

    /// Tasks this PR closes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related_tasks: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blocked_by: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blocks: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_branch: Option<String>,
}

/// Kind-specific part of an item.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ItemDetail {
    Epic(EpicDetail),
    Issue(IssueDetail),
    Task(TaskDetail),
    Pr(PrDetail),
}

impl ItemDetail {
    pub fn kind(&self) -> ItemKind {
        match self {
            ItemDetail::Epic(_) => ItemKind::Epic,
            ItemDetail::Issue(_) => ItemKind::Issue,
            ItemDetail::Task(_) => ItemKind::Task,
            ItemDetail::Pr(_) => ItemKind::Pr,
        }
    }

    /// An empty detail for the given kind.
    pub fn empty(kind: ItemKind) -> Self {
        match kind {
            ItemKind::Epic => ItemDetail::Epic(EpicDetail::default()),
            ItemKind::Issue => ItemDetail::Issue(IssueDetail::default()),
            ItemKind::Task => ItemDetail::Task(TaskDetail::default()),
            ItemKind::Pr => ItemDetail::Pr(PrDetail::default()),
        }
    }
}

/// A tracked work item: shared header plus kind-specific detail.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Item {
    #[serde(flatten)]
    pub header: ItemHeader,

    #[serde(flatten)]
    pub detail: ItemDetail,

    /// Location in the store. Identity only, never written to the file.
    pub file_path: PathBuf,

    /// Markdown body after the frontmatter.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub body: String,
}

impl Item {
    pub fn kind(&self) -> ItemKind {
        self.detail.kind()
    }

    pub fn id(&self) -> &str {
        &self.header.id
    }

    /// The legacy status label, whichever vocabulary the kind uses.
    pub fn status_label(&self) -> &'static str {
        match &self.detail {
            ItemDetail::Epic(d) => d.status.as_str(),
            ItemDetail::Issue(d) => d.status.as_str(),
            ItemDetail::Task(d) => d.status.as_str(),
            ItemDetail::Pr(d) => d.pr_status.as_str(),
        }
    }

    /// The legacy work status; `None` for PRs.
    pub fn work_status(&self) -> Option<Status> {
        match &self.detail {
            ItemDetail::Epic(d) => Some(d.status),
            ItemDetail::Issue(d) => Some(d.status),
            ItemDetail::Task(d) => Some(d.status),
            ItemDetail::Pr(_) => None,
        }
    }

    /// The direct parent reference, if any.
    pub fn parent(&self) -> Option<(ItemKind, &str)> {
        match &self.detail {
            ItemDetail::Epic(_) => None,
            ItemDetail::Issue(d) => d.epic_id.as_deref().map(|id| (ItemKind::Epic, id)),
            ItemDetail::Task(d) => {
                if d.issue_id.is_empty() {
                    None
                } else {
                    Some((ItemKind::Issue, d.issue_id.as_str()))
                }
            }
            ItemDetail::Pr(d) => match (&d.issue_id, &d.epic_id) {
                (Some(issue), _) => Some((ItemKind::Issue, issue.as_str())),
                (None, Some(epic)) => Some((ItemKind::Epic, epic.as_str())),
                (None, None) => None,
            },
        }
    }

    /// Items this one waits on, as declared in its own frontmatter.
    pub fn declared_dependencies(&self) -> Vec<&str> {
        let lists: [&[String]; 2] = match &self.detail {
            ItemDetail::Epic(_) => return Vec::new(),
            ItemDetail::Issue(d) => [&d.dependencies, &d.blocked_by],
            ItemDetail::Task(d) => [&d.dependencies, &d.blocked_by],
            ItemDetail::Pr(d) => [&d.depends_on, &d.blocked_by],
        };
        lists.iter().flat_map(|l| l.iter().map(String::as_str)).collect()
    }

    /// Ids named in the item's `related_*` fields.
    pub fn related_links(&self) -> Vec<&str> {
        let lists: Vec<&[String]> = match &self.detail {
            ItemDetail::Epic(d) => vec![d.related_issues.as_slice()],
            ItemDetail::Issue(d) => vec![d.related_tasks.as_slice(), d.related_prs.as_slice()],
            ItemDetail::Task(d) => vec![d.related_prs.as_slice()],
            ItemDetail::Pr(d) => vec![d.related_tasks.as_slice()],
        };
        lists.iter().flat_map(|l| l.iter().map(String::as_str)).collect()
    }

    /// Items declared as waiting on this one.
    pub fn declared_blocks(&self) -> &[String] {
        match &self.detail {
            ItemDetail::Epic(_) => &[],
            ItemDetail::Issue(d) => &d.blocks,
            ItemDetail::Task(d) => &d.blocks,
            ItemDetail::Pr(d) => &d.blocks,
        }
    }

    /// Validate the item's fields.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.header.title.trim().is_empty() {
            return Err(ValidationError::EmptyTitle);
        }
        if !id::is_valid_id(&self.header.id) {
            return Err(ValidationError::InvalidId(self.header.id.clone()));
        }
        if self.header.state.is_some() != self.header.state_metadata.is_some() {
            return Err(ValidationError::StateMetadataMismatch(self.header.id.clone()));
        }
        if self.header.updated_date < self.header.created_date {
            return Err(ValidationError::InvalidTimestamp(self.header.id.clone()));
        }
        if let ItemDetail::Task(task) = &self.detail
            && task.issue_id.is_empty()
        {
            return Err(ValidationError::MissingField {
                item_id: self.header.id.clone(),
                field: "issue_id",
            });
        }
        Ok(())
    }
}

fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

fn is_zero(n: &u64) -> bool {
    *n == 0
}

/// Accepts RFC 3339 timestamps as well as bare `YYYY-MM-DD` dates and
/// naive `YYYY-MM-DDTHH:MM:SS` values, all read as UTC.
pub(crate) mod lenient_date {
    use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid date '{}'", raw)))
    }

    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        let raw = raw.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.with_timezone(&Utc));
        }
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
            return Some(naive.and_utc());
        }
        NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|naive| naive.and_utc())
    }
}
