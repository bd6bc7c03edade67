//! Task data model (shared by the store, the view cache and the AI gateway)
//!
//! Ids are strings. Timestamps are UTC instants; due dates are calendar dates.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::error::StoreError;

pub const TITLE_MAX_LEN: usize = 255;
pub const DESCRIPTION_MAX_LEN: usize = 1000;

/// Prefix of ids given to optimistic entries that the store has not confirmed yet
pub const TEMP_ID_PREFIX: &str = "temp-";

/// Storage and wire format for due dates
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Priority level for tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }

    /// Sort rank, most urgent first
    fn rank(self) -> u8 {
        match self {
            Priority::High => 0,
            Priority::Medium => 1,
            Priority::Low => 2,
        }
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            other => Err(format!("unknown priority '{}'", other)),
        }
    }
}

// Models are not consistent about casing ("High", "HIGH"), so accept any.
impl<'de> Deserialize<'de> for Priority {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Workflow column of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[default]
    Todo,
    InProgress,
    Completed,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Todo => "todo",
            Status::InProgress => "in_progress",
            Status::Completed => "completed",
        }
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "todo" => Ok(Status::Todo),
            "in_progress" => Ok(Status::InProgress),
            "completed" | "done" => Ok(Status::Completed),
            other => Err(format!("unknown status '{}'", other)),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A task as persisted by the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub owner: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub priority: Priority,
    pub status: Status,
    pub is_completed: bool,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Placeholder entry shown while the store has not confirmed a create
    pub fn optimistic(owner: &str, new_task: &NewTask, now: DateTime<Utc>) -> Self {
        Self {
            id: format!("{}{}", TEMP_ID_PREFIX, uuid::Uuid::new_v4()),
            owner: owner.to_string(),
            title: new_task.title.clone(),
            description: new_task.description.clone(),
            priority: new_task.priority.unwrap_or_default(),
            status: Status::Todo,
            is_completed: false,
            due_date: new_task.due_date,
            created_at: now,
            updated_at: now,
        }
    }

    /// True for optimistic entries that are still waiting on the store
    pub fn is_pending(&self) -> bool {
        is_temp_id(&self.id)
    }

    /// Validate and merge a partial update, refreshing `updated_at`
    pub fn apply_patch(&mut self, patch: &TaskPatch, now: DateTime<Utc>) -> Result<(), StoreError> {
        patch.validate()?;
        self.merge(patch, now);
        Ok(())
    }

    /// Merge an already validated patch.
    pub fn merge(&mut self, patch: &TaskPatch, now: DateTime<Utc>) {
        if let Some(title) = &patch.title {
            self.title = title.trim().to_string();
        }
        if let Some(description) = &patch.description {
            self.description = clean_description(description.clone());
        }
        if let Some(priority) = patch.priority {
            self.priority = priority;
        }
        if let Some(due_date) = patch.due_date {
            self.due_date = due_date;
        }

        match (patch.status, patch.is_completed) {
            (Some(status), _) => {
                self.status = status;
                self.is_completed = status == Status::Completed;
            }
            (None, Some(true)) => {
                self.status = Status::Completed;
                self.is_completed = true;
            }
            (None, Some(false)) => {
                if self.status == Status::Completed {
                    self.status = Status::Todo;
                }
                self.is_completed = false;
            }
            (None, None) => {}
        }

        self.updated_at = now;
    }
}

pub fn is_temp_id(id: &str) -> bool {
    id.starts_with(TEMP_ID_PREFIX)
}

/// Fields supplied when creating a task
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default, deserialize_with = "lenient_date")]
    pub due_date: Option<NaiveDate>,
}

impl NewTask {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_due_date(mut self, due_date: NaiveDate) -> Self {
        self.due_date = Some(due_date);
        self
    }

    /// Check field bounds and return the cleaned-up form that gets stored
    pub fn validated(self) -> Result<Self, StoreError> {
        let title = check_title(&self.title)?;
        let description = clean_description(self.description);
        check_description(description.as_deref())?;
        Ok(Self {
            title,
            description,
            priority: Some(self.priority.unwrap_or_default()),
            due_date: self.due_date,
        })
    }
}

/// Partial update. `description` and `due_date` distinguish "leave alone"
/// (`None`) from "clear" (`Some(None)`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "double_option"
    )]
    pub description: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_completed: Option<bool>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "patch_date"
    )]
    pub due_date: Option<Option<NaiveDate>>,
}

impl TaskPatch {
    /// Checkbox toggle
    pub fn completed(done: bool) -> Self {
        Self {
            is_completed: Some(done),
            ..Default::default()
        }
    }

    /// Kanban column move
    pub fn status(status: Status) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    pub fn validate(&self) -> Result<(), StoreError> {
        if let Some(title) = &self.title {
            check_title(title)?;
        }
        if let Some(Some(description)) = &self.description {
            check_description(Some(description))?;
        }
        if let (Some(status), Some(done)) = (self.status, self.is_completed)
            && (status == Status::Completed) != done
        {
            return Err(StoreError::Validation(format!(
                "status '{}' disagrees with is_completed = {}",
                status, done
            )));
        }
        Ok(())
    }
}

fn check_title(title: &str) -> Result<String, StoreError> {
    let title = title.trim();
    if title.is_empty() {
        return Err(StoreError::Validation("title is required".to_string()));
    }
    if title.chars().count() > TITLE_MAX_LEN {
        return Err(StoreError::Validation(format!(
            "title is too long (max {} characters)",
            TITLE_MAX_LEN
        )));
    }
    Ok(title.to_string())
}

fn check_description(description: Option<&str>) -> Result<(), StoreError> {
    match description {
        Some(d) if d.chars().count() > DESCRIPTION_MAX_LEN => Err(StoreError::Validation(
            format!("description is too long (max {} characters)", DESCRIPTION_MAX_LEN),
        )),
        _ => Ok(()),
    }
}

fn clean_description(description: Option<String>) -> Option<String> {
    description.filter(|d| !d.trim().is_empty())
}

/// Which rows a list view shows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewFilter {
    #[default]
    All,
    Active,
    Completed,
}

impl ViewFilter {
    pub fn matches(self, task: &Task) -> bool {
        match self {
            ViewFilter::All => true,
            ViewFilter::Active => !task.is_completed,
            ViewFilter::Completed => task.is_completed,
        }
    }
}

impl FromStr for ViewFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(ViewFilter::All),
            "active" => Ok(ViewFilter::Active),
            "completed" => Ok(ViewFilter::Completed),
            other => Err(format!("unknown filter '{}'", other)),
        }
    }
}

/// Ordering of a list view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewSort {
    #[default]
    Newest,
    Oldest,
    Priority,
    DueDate,
}

impl ViewSort {
    pub fn sort(self, tasks: &mut [Task]) {
        tasks.sort_by(|a, b| self.compare(a, b));
    }

    fn compare(self, a: &Task, b: &Task) -> Ordering {
        let newest = b
            .created_at
            .cmp(&a.created_at)
            .then_with(|| a.id.cmp(&b.id));
        match self {
            ViewSort::Newest => newest,
            ViewSort::Oldest => newest.reverse(),
            ViewSort::Priority => a.priority.rank().cmp(&b.priority.rank()).then(newest),
            // Undated tasks go last
            ViewSort::DueDate => match (a.due_date, b.due_date) {
                (Some(x), Some(y)) => x.cmp(&y).then(newest),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => newest,
            },
        }
    }
}

impl FromStr for ViewSort {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "newest" => Ok(ViewSort::Newest),
            "oldest" => Ok(ViewSort::Oldest),
            "priority" => Ok(ViewSort::Priority),
            "due_date" | "due" => Ok(ViewSort::DueDate),
            other => Err(format!("unknown sort '{}'", other)),
        }
    }
}

/// Identity of one cached list view
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ViewKey {
    pub owner: String,
    pub filter: ViewFilter,
    pub sort: ViewSort,
}

impl ViewKey {
    pub fn new(owner: impl Into<String>, filter: ViewFilter, sort: ViewSort) -> Self {
        Self {
            owner: owner.into(),
            filter,
            sort,
        }
    }
}

impl fmt::Display for ViewKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{:?}/{:?}", self.owner, self.filter, self.sort)
    }
}

/// Kind of AI suggestion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionKind {
    Priority,
    Category,
    Breakdown,
    Insight,
}

/// Advisory productivity tip. Ids are only unique within one batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: SuggestionKind,
    pub title: String,
    pub description: String,
    #[serde(
        default,
        rename = "actionLabel",
        alias = "action_label",
        skip_serializing_if = "Option::is_none"
    )]
    pub action_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl Suggestion {
    pub fn new(
        id: &str,
        kind: SuggestionKind,
        title: &str,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.to_string(),
            kind,
            title: title.to_string(),
            description: description.into(),
            action_label: None,
            data: None,
        }
    }
}

/// AI rewrite of a bare task title
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Enhancement {
    pub title: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub priority: Priority,
    #[serde(default, deserialize_with = "lenient_date")]
    pub due_date: Option<NaiveDate>,
}

/// One task extracted from free text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedTask {
    pub title: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub priority: Priority,
    #[serde(default, deserialize_with = "lenient_date")]
    pub due_date: Option<NaiveDate>,
}

impl From<ParsedTask> for NewTask {
    fn from(parsed: ParsedTask) -> Self {
        Self {
            title: parsed.title,
            description: Some(parsed.description).filter(|d| !d.trim().is_empty()),
            priority: Some(parsed.priority),
            due_date: parsed.due_date,
        }
    }
}

impl From<Enhancement> for NewTask {
    fn from(enhanced: Enhancement) -> Self {
        Self {
            title: enhanced.title,
            description: Some(enhanced.description).filter(|d| !d.trim().is_empty()),
            priority: Some(enhanced.priority),
            due_date: enhanced.due_date,
        }
    }
}

/// Parse a due date the way models tend to write them: `YYYY-MM-DD`,
/// a full RFC 3339 timestamp, or an empty string meaning "no date".
pub fn parse_due_date(raw: &str) -> Result<Option<NaiveDate>, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, DATE_FORMAT) {
        return Ok(Some(date));
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(Some(ts.date_naive()));
    }
    // "2024-01-02T09:00:00" without an offset
    raw.get(..10)
        .and_then(|prefix| NaiveDate::parse_from_str(prefix, DATE_FORMAT).ok())
        .map(Some)
        .ok_or_else(|| format!("invalid date '{}'", raw))
}

fn lenient_date<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        Some(raw) => parse_due_date(&raw).map_err(serde::de::Error::custom),
        None => Ok(None),
    }
}

// Models write `null` for fields they have no opinion on
fn null_as_default<'de, T, D>(deserializer: D) -> Result<T, D::Error>
where
    T: Default + Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

fn patch_date<'de, D>(deserializer: D) -> Result<Option<Option<NaiveDate>>, D::Error>
where
    D: Deserializer<'de>,
{
    lenient_date(deserializer).map(Some)
}

fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}
