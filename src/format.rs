//! Display helpers: relative due dates and completion statistics

use chrono::{Datelike, Local, NaiveDate};

use crate::models::{Priority, Task};

/// Phrase `date` relative to `today`: "Today", "Tomorrow", "In 3 days",
/// "3 days ago", and outside a week "Mar 5" (year added when it differs).
pub fn format_date(date: NaiveDate, today: NaiveDate) -> String {
    let days = (date - today).num_days();
    match days {
        0 => "Today".to_string(),
        1 => "Tomorrow".to_string(),
        -1 => "Yesterday".to_string(),
        2..=7 => format!("In {} days", days),
        -7..=-2 => format!("{} days ago", -days),
        _ if date.year() != today.year() => date.format("%b %-d, %Y").to_string(),
        _ => date.format("%b %-d").to_string(),
    }
}

/// `format_date` against the local calendar
pub fn format_due(date: NaiveDate) -> String {
    format_date(date, Local::now().date_naive())
}

/// Due strictly before today
pub fn is_overdue(due_date: Option<NaiveDate>, today: NaiveDate) -> bool {
    due_date.is_some_and(|due| due < today)
}

/// Integer percentage, rounded half away from zero. Zero when empty.
pub fn completion_rate(completed: usize, total: usize) -> u32 {
    if total == 0 {
        return 0;
    }
    ((completed as f64 / total as f64) * 100.0).round() as u32
}

/// Counts behind the dashboard numbers and the fallback suggestions
#[derive(Debug, Clone, PartialEq)]
pub struct TaskStats<'a> {
    pub total: usize,
    pub completed: usize,
    pub active: usize,
    pub completion_rate: u32,
    /// Active high-priority tasks, in list order
    pub high_priority: Vec<&'a Task>,
    /// Active tasks due before today
    pub overdue: Vec<&'a Task>,
}

impl<'a> TaskStats<'a> {
    pub fn compute(tasks: &'a [Task], today: NaiveDate) -> Self {
        let completed = tasks.iter().filter(|t| t.is_completed).count();
        let active: Vec<&Task> = tasks.iter().filter(|t| !t.is_completed).collect();

        Self {
            total: tasks.len(),
            completed,
            active: active.len(),
            completion_rate: completion_rate(completed, tasks.len()),
            high_priority: active
                .iter()
                .copied()
                .filter(|t| t.priority == Priority::High)
                .collect(),
            overdue: active
                .iter()
                .copied()
                .filter(|t| is_overdue(t.due_date, today))
                .collect(),
        }
    }
}
