//! Typed AI operations over an `AiTransport`

use chrono::{Local, NaiveDate};
use serde::Serialize;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;

use super::fallback::{MAX_SUGGESTIONS, fallback_suggestions};
use super::normalize::{normalize_list, normalize_object};
use super::{AiAction, AiRequest, AiTransport};
use crate::error::AiError;
use crate::models::{DATE_FORMAT, Enhancement, ParsedTask, Priority, Suggestion, Task};

/// What the model sees of each task
#[derive(Debug, Serialize)]
struct TaskContext<'a> {
    title: &'a str,
    description: Option<&'a str>,
    priority: Priority,
    completed: bool,
    due_date: Option<String>,
}

impl<'a> From<&'a Task> for TaskContext<'a> {
    fn from(task: &'a Task) -> Self {
        Self {
            title: &task.title,
            description: task.description.as_deref(),
            priority: task.priority,
            completed: task.is_completed,
            due_date: task.due_date.map(|d| d.format(DATE_FORMAT).to_string()),
        }
    }
}

pub struct AiGateway {
    transport: Arc<dyn AiTransport>,
    today: Option<NaiveDate>,
}

impl AiGateway {
    pub fn new(transport: Arc<dyn AiTransport>) -> Self {
        Self {
            transport,
            today: None,
        }
    }

    /// Pin the reference date used for prompts and fallback rules
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    fn today(&self) -> NaiveDate {
        self.today.unwrap_or_else(|| Local::now().date_naive())
    }

    fn request(&self, action: AiAction, mut payload: serde_json::Value) -> AiRequest {
        payload["today"] = json!(self.today().format(DATE_FORMAT).to_string());
        AiRequest::new(action, payload)
    }

    /// Advisory: never fails. An empty task list skips the model entirely,
    /// and any model failure falls back to the local rules.
    pub async fn suggestions(&self, tasks: &[Task]) -> Vec<Suggestion> {
        let today = self.today();
        if tasks.is_empty() {
            return fallback_suggestions(tasks, today);
        }

        match self.request_suggestions(tasks).await {
            Ok(suggestions) if !suggestions.is_empty() => suggestions,
            Ok(_) => {
                tracing::debug!("Model returned no suggestions, using fallback");
                fallback_suggestions(tasks, today)
            }
            Err(err) => {
                tracing::warn!(error = %err, "AI suggestions failed, using fallback");
                fallback_suggestions(tasks, today)
            }
        }
    }

    async fn request_suggestions(&self, tasks: &[Task]) -> Result<Vec<Suggestion>, AiError> {
        let context: Vec<TaskContext> = tasks.iter().map(TaskContext::from).collect();
        let request = self.request(AiAction::Suggestions, json!({ "todos": context }));
        let content = self.transport.complete(&request).await?;

        let mut suggestions = normalize_list::<Suggestion>(&content, "suggestions", false)?.items;
        suggestions.truncate(MAX_SUGGESTIONS);

        // Ids only need to be unique within the batch
        let mut seen = HashSet::new();
        for (index, suggestion) in suggestions.iter_mut().enumerate() {
            if suggestion.id.trim().is_empty() || !seen.insert(suggestion.id.clone()) {
                suggestion.id = format!("ai-{}", index + 1);
                seen.insert(suggestion.id.clone());
            }
        }
        Ok(suggestions)
    }

    /// Rewrite a bare title. Failures propagate.
    pub async fn enhance_task(&self, title: &str) -> Result<Enhancement, AiError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(AiError::InvalidRequest("title is required".to_string()));
        }

        let request = self.request(AiAction::Enhance, json!({ "title": title }));
        let content = self.transport.complete(&request).await?;
        let enhanced: Enhancement = normalize_object(&content)?;

        if enhanced.title.trim().is_empty() {
            return Err(AiError::Malformed("enhanced task has no title".to_string()));
        }
        Ok(enhanced)
    }

    /// Extract one or more tasks from free text. Failures propagate.
    pub async fn parse_tasks(&self, input: &str) -> Result<Vec<ParsedTask>, AiError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(AiError::InvalidRequest("input is required".to_string()));
        }

        let request = self.request(AiAction::Parse, json!({ "input": input }));
        let content = self.transport.complete(&request).await?;
        let normalized = normalize_list::<ParsedTask>(&content, "tasks", true)?;
        tracing::debug!(shape = ?normalized.shape, count = normalized.items.len(), "Parsed tasks");

        let tasks = normalized.items;
        if tasks.is_empty() {
            return Err(AiError::UnexpectedShape("no tasks in response".to_string()));
        }
        if tasks.iter().any(|t| t.title.trim().is_empty()) {
            return Err(AiError::Malformed("parsed task has no title".to_string()));
        }
        Ok(tasks)
    }
}
