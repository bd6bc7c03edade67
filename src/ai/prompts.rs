//! Chat messages for each AI action

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::AiAction;
use crate::error::AiError;
use crate::models::DATE_FORMAT;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    fn system(content: String) -> Self {
        Self {
            role: Role::System,
            content,
        }
    }

    fn user(content: String) -> Self {
        Self {
            role: Role::User,
            content,
        }
    }
}

/// Build the system/user pair for `action`. A `today` field in the payload
/// overrides the `today` argument so callers can pin the reference date.
pub fn build_messages(
    action: AiAction,
    payload: &Value,
    today: NaiveDate,
) -> Result<Vec<ChatMessage>, AiError> {
    let today = payload
        .get("today")
        .and_then(Value::as_str)
        .and_then(|raw| NaiveDate::parse_from_str(raw, DATE_FORMAT).ok())
        .unwrap_or(today)
        .format(DATE_FORMAT)
        .to_string();

    let messages = match action {
        AiAction::Suggestions => {
            let todos = payload
                .get("todos")
                .filter(|todos| todos.is_array())
                .ok_or_else(|| AiError::InvalidRequest("payload.todos must be an array".into()))?;
            vec![
                ChatMessage::system(suggestions_prompt(&today)),
                ChatMessage::user(format!("My tasks: {}", todos)),
            ]
        }
        AiAction::Enhance => {
            let title = string_field(payload, "title")?;
            vec![
                ChatMessage::system(enhance_prompt(&today)),
                ChatMessage::user(format!("Enhance this task: \"{}\"", title)),
            ]
        }
        AiAction::Parse => {
            let input = string_field(payload, "input")?;
            vec![
                ChatMessage::system(parse_prompt(&today)),
                ChatMessage::user(input.to_string()),
            ]
        }
    };

    Ok(messages)
}

fn string_field<'a>(payload: &'a Value, name: &str) -> Result<&'a str, AiError> {
    payload
        .get(name)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| AiError::InvalidRequest(format!("payload.{} must be a non-empty string", name)))
}

fn suggestions_prompt(today: &str) -> String {
    format!(
        "You are a productivity AI assistant. Analyze the user's task list and provide actionable suggestions.\n\
         Return a valid JSON array of 2-4 suggestions. Each object must have:\n\
         - \"id\": unique string\n\
         - \"type\": one of \"priority\", \"category\", \"breakdown\", \"insight\"\n\
         - \"title\": short title (max 6 words)\n\
         - \"description\": actionable advice (1-2 sentences, max 120 chars)\n\n\
         Focus on: overdue tasks, priority management, productivity patterns, task breakdown.\n\
         Today's date: {today}.\n\
         Return ONLY valid JSON array, no markdown."
    )
}

fn enhance_prompt(today: &str) -> String {
    format!(
        "You are a task planning assistant. Given a task title, enhance it with:\n\
         - A clearer, more actionable title (keep concise)\n\
         - A helpful description with actionable steps (2-3 sentences max)\n\
         - Suggested priority: \"low\", \"medium\", or \"high\"\n\
         - Suggested due date as ISO string (YYYY-MM-DD) or null if not determinable\n\n\
         Today's date: {today}.\n\
         Return ONLY valid JSON with keys: title, description, priority, due_date. No markdown."
    )
}

fn parse_prompt(today: &str) -> String {
    format!(
        "You are a smart task parser. Extract ONE OR MORE structured tasks from natural language input.\n\
         Return a valid JSON ARRAY of task objects. Each object must have:\n\
         - \"title\": clear task title\n\
         - \"description\": specific details mentioned or implied\n\
         - \"priority\": \"low\", \"medium\", or \"high\" (infer from urgency)\n\
         - \"due_date\": ISO date string (YYYY-MM-DD) or null\n\n\
         Handle multiple tasks if the user asks for them (e.g. \"Task A then Task B\").\n\
         If dependencies are implied, sequence the due dates in the order the tasks are mentioned.\n\
         Today's date: {today}.\n\
         Interpret relative dates (tomorrow, next week, friday, etc.) relative to today.\n\
         Return ONLY valid JSON ARRAY, no markdown."
    )
}
