//! Rule-based suggestions used when the model is unavailable

use chrono::NaiveDate;

use crate::format::TaskStats;
use crate::models::{Suggestion, SuggestionKind, Task};

/// Most suggestions ever shown at once
pub const MAX_SUGGESTIONS: usize = 4;

/// Rules run in a fixed order: completion rate, pending high priority,
/// overdue count, and a getting-started tip only when nothing else fired.
pub fn fallback_suggestions(tasks: &[Task], today: NaiveDate) -> Vec<Suggestion> {
    let stats = TaskStats::compute(tasks, today);
    let mut suggestions = Vec::new();

    if stats.total > 0 {
        let rate = stats.completion_rate;
        let description = if rate >= 70 {
            format!("Great work! {}% tasks completed. Keep it up!", rate)
        } else {
            format!("{}% completion rate. Try tackling quick wins first.", rate)
        };
        suggestions.push(Suggestion::new(
            "insight-1",
            SuggestionKind::Insight,
            "Productivity Insight",
            description,
        ));
    }

    if let Some(first) = stats.high_priority.first() {
        let count = stats.high_priority.len();
        suggestions.push(Suggestion::new(
            "priority-1",
            SuggestionKind::Priority,
            "High Priority Pending",
            format!(
                "{} high-priority task{} need attention. Focus on \"{}\" first.",
                count,
                if count > 1 { "s" } else { "" },
                first.title
            ),
        ));
    }

    if !stats.overdue.is_empty() {
        let count = stats.overdue.len();
        suggestions.push(Suggestion::new(
            "overdue-1",
            SuggestionKind::Category,
            "Overdue Tasks",
            format!(
                "{} task{} past due. Consider rescheduling.",
                count,
                if count > 1 { "s are" } else { " is" }
            ),
        ));
    }

    if suggestions.is_empty() {
        suggestions.push(Suggestion::new(
            "tip-1",
            SuggestionKind::Insight,
            "Getting Started",
            "Add tasks to get AI-powered productivity suggestions!",
        ));
    }

    suggestions.truncate(MAX_SUGGESTIONS);
    suggestions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewTask, Priority, TaskPatch};
    use chrono::Utc;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()
    }

    fn task(new_task: NewTask, done: bool) -> Task {
        let mut task = Task::optimistic("alice", &new_task, Utc::now());
        if done {
            task.merge(&TaskPatch::completed(true), Utc::now());
        }
        task
    }

    #[test]
    fn empty_list_gets_started_tip() {
        let suggestions = fallback_suggestions(&[], today());
        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].id, "tip-1");
        assert_eq!(suggestions[0].title, "Getting Started");
    }

    #[test]
    fn seventy_percent_is_praised() {
        let tasks: Vec<Task> = (0..10)
            .map(|i| task(NewTask::new(format!("t{}", i)), i < 7))
            .collect();

        let suggestions = fallback_suggestions(&tasks, today());
        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].kind, SuggestionKind::Insight);
        assert_eq!(
            suggestions[0].description,
            "Great work! 70% tasks completed. Keep it up!"
        );
    }

    #[test]
    fn low_rate_with_priority_and_overdue() {
        let yesterday = today().pred_opt().unwrap();
        let tasks = vec![
            task(NewTask::new("Pay rent").with_priority(Priority::High), false),
            task(NewTask::new("Call bank").with_priority(Priority::High), false),
            task(NewTask::new("Old").with_due_date(yesterday), false),
            task(NewTask::new("Done").with_priority(Priority::High), true),
        ];

        let suggestions = fallback_suggestions(&tasks, today());
        let ids: Vec<_> = suggestions.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, ["insight-1", "priority-1", "overdue-1"]);
        assert_eq!(
            suggestions[0].description,
            "25% completion rate. Try tackling quick wins first."
        );
        assert_eq!(
            suggestions[1].description,
            "2 high-priority tasks need attention. Focus on \"Pay rent\" first."
        );
        assert_eq!(
            suggestions[2].description,
            "1 task is past due. Consider rescheduling."
        );
    }

    #[test]
    fn due_today_is_not_overdue() {
        let tasks = vec![task(NewTask::new("Today").with_due_date(today()), false)];
        let suggestions = fallback_suggestions(&tasks, today());
        assert!(suggestions.iter().all(|s| s.id != "overdue-1"));
    }
}
