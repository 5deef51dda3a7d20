use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::datetime::{task_date_serde, timestamp_serde};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Pending,
    Completed,
    Deleted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub uuid: Uuid,

    pub description: String,

    pub status: Status,

    #[serde(with = "timestamp_serde")]
    pub entry: DateTime<Utc>,

    #[serde(default, with = "timestamp_serde::option")]
    pub end: Option<DateTime<Utc>>,

    #[serde(default)]
    pub project: Option<String>,

    #[serde(default)]
    pub priority: Option<String>,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default, with = "task_date_serde::option")]
    pub due: Option<NaiveDate>,

    #[serde(default, alias = "wait", with = "task_date_serde::option")]
    pub threshold: Option<NaiveDate>,

    #[serde(default)]
    pub recur: Option<String>,

    #[serde(default)]
    pub hidden: bool,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Parts of a task's one-line rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token {
    Completed,
    Priority,
    CompletionDate,
    CreationDate,
    Text,
    Project,
    Tags,
    DueDate,
    ThresholdDate,
    Recurrence,
    Hidden,
}

impl Token {
    const fn bit(self) -> u16 {
        1 << self as u16
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenSet(u16);

impl TokenSet {
    pub const ALL: TokenSet = TokenSet((1 << 11) - 1);

    pub const fn without(self, token: Token) -> TokenSet {
        TokenSet(self.0 & !token.bit())
    }

    pub const fn contains(self, token: Token) -> bool {
        self.0 & token.bit() != 0
    }
}

/// What a calendar entry shows for a task: text, project and tags only.
pub const SUMMARY_TOKENS: TokenSet = TokenSet::ALL
    .without(Token::Completed)
    .without(Token::CompletionDate)
    .without(Token::CreationDate)
    .without(Token::Priority)
    .without(Token::ThresholdDate)
    .without(Token::DueDate)
    .without(Token::Hidden)
    .without(Token::Recurrence);

impl Task {
    pub fn new_pending(description: String, now: DateTime<Utc>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            description,
            status: Status::Pending,
            entry: now,
            end: None,
            project: None,
            priority: None,
            tags: vec![],
            due: None,
            threshold: None,
            recur: None,
            hidden: false,
            extra: BTreeMap::new(),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == Status::Completed
    }

    /// Renders the task as a single todo.txt-style line, keeping only the
    /// tokens in `shown`.
    pub fn render(&self, shown: TokenSet) -> String {
        let mut parts: Vec<String> = Vec::new();

        if self.is_completed() && shown.contains(Token::Completed) {
            parts.push("x".to_string());
        }
        if let Some(priority) = self.priority.as_deref()
            && shown.contains(Token::Priority)
        {
            parts.push(format!("({priority})"));
        }
        if let Some(end) = self.end
            && self.is_completed()
            && shown.contains(Token::CompletionDate)
        {
            parts.push(end.format("%Y-%m-%d").to_string());
        }
        if shown.contains(Token::CreationDate) {
            parts.push(self.entry.format("%Y-%m-%d").to_string());
        }
        if shown.contains(Token::Text) && !self.description.trim().is_empty() {
            parts.push(self.description.trim().to_string());
        }
        if let Some(project) = self.project.as_deref()
            && shown.contains(Token::Project)
        {
            parts.push(format!("+{project}"));
        }
        if shown.contains(Token::Tags) {
            parts.extend(self.tags.iter().map(|tag| format!("@{tag}")));
        }
        if let Some(due) = self.due
            && shown.contains(Token::DueDate)
        {
            parts.push(format!("due:{}", due.format("%Y-%m-%d")));
        }
        if let Some(threshold) = self.threshold
            && shown.contains(Token::ThresholdDate)
        {
            parts.push(format!("t:{}", threshold.format("%Y-%m-%d")));
        }
        if let Some(recur) = self.recur.as_deref()
            && shown.contains(Token::Recurrence)
        {
            parts.push(format!("rec:{recur}"));
        }
        if self.hidden && shown.contains(Token::Hidden) {
            parts.push("h:1".to_string());
        }

        parts.join(" ")
    }
}
