//! Priority extraction and batch ordering.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const LABEL_PREFIX: &str = "priority:";

/// Urgency level derived from `priority:<level>` labels.
///
/// Variants are declared most-urgent first, so the derived `Ord` agrees with
/// the score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    Medium,
    Low,
    None,
}

impl Priority {
    /// 0 (critical) through 4 (none); lower sorts first.
    pub fn score(self) -> u8 {
        match self {
            Priority::Critical => 0,
            Priority::High => 1,
            Priority::Medium => 2,
            Priority::Low => 3,
            Priority::None => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
            Priority::None => "none",
        }
    }

    /// Parses a single label such as `Priority: High`.
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim();
        let head = label.get(..LABEL_PREFIX.len())?;
        if !head.eq_ignore_ascii_case(LABEL_PREFIX) {
            return None;
        }
        match label[LABEL_PREFIX.len()..].trim().to_ascii_lowercase().as_str() {
            "critical" => Some(Priority::Critical),
            "high" => Some(Priority::High),
            "medium" => Some(Priority::Medium),
            "low" => Some(Priority::Low),
            _ => None,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The most urgent priority among `labels`, or [`Priority::None`].
pub fn extract_priority<S: AsRef<str>>(labels: &[S]) -> Priority {
    labels
        .iter()
        .filter_map(|l| Priority::from_label(l.as_ref()))
        .min()
        .unwrap_or(Priority::None)
}

pub fn priority_score(priority: Priority) -> u8 {
    priority.score()
}

/// Anything the scheduler can order.
pub trait Schedulable {
    fn priority_score(&self) -> u8;
    fn created_at(&self) -> DateTime<Utc>;
}

/// Stable sort by ascending score, oldest first within a score.
/// Returns a new vector; `items` is left untouched.
pub fn sort_by_priority<T: Schedulable + Clone>(items: &[T]) -> Vec<T> {
    let mut sorted = items.to_vec();
    sorted.sort_by(|a, b| {
        a.priority_score()
            .cmp(&b.priority_score())
            .then_with(|| a.created_at().cmp(&b.created_at()))
    });
    sorted
}

/// Sorted items truncated to `cap`. `None` and `Some(0)` both mean unlimited.
pub fn apply_max_concurrent<T: Schedulable + Clone>(items: &[T], cap: Option<usize>) -> Vec<T> {
    let mut sorted = sort_by_priority(items);
    if let Some(cap) = cap.filter(|c| *c > 0) {
        sorted.truncate(cap);
    }
    sorted
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[derive(Debug, Clone, PartialEq)]
    struct Item {
        name: &'static str,
        score: u8,
        created: DateTime<Utc>,
    }

    impl Schedulable for Item {
        fn priority_score(&self) -> u8 {
            self.score
        }
        fn created_at(&self) -> DateTime<Utc> {
            self.created
        }
    }

    fn item(name: &'static str, score: u8, day: u32) -> Item {
        Item {
            name,
            score,
            created: Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap(),
        }
    }

    fn names(items: &[Item]) -> Vec<&'static str> {
        items.iter().map(|i| i.name).collect()
    }

    #[test]
    fn extracts_most_urgent_label_case_insensitively() {
        assert_eq!(extract_priority(&["bug", "Priority:LOW", "priority: high"]), Priority::High);
        assert_eq!(extract_priority(&["PRIORITY:critical", "priority:medium"]), Priority::Critical);
        assert_eq!(extract_priority(&["bug", "enhancement"]), Priority::None);
        assert_eq!(extract_priority::<&str>(&[]), Priority::None);
    }

    #[test]
    fn unknown_levels_are_ignored() {
        assert_eq!(extract_priority(&["priority:urgent", "priority:"]), Priority::None);
        assert_eq!(Priority::from_label("prio:high"), None);
    }

    #[test]
    fn scores() {
        assert_eq!(priority_score(Priority::Critical), 0);
        assert_eq!(priority_score(Priority::High), 1);
        assert_eq!(priority_score(Priority::Medium), 2);
        assert_eq!(priority_score(Priority::Low), 3);
        assert_eq!(priority_score(Priority::None), 4);
    }

    #[test]
    fn sort_orders_by_score_then_age_without_mutating_input() {
        let input = vec![
            item("low-old", 3, 1),
            item("high-new", 1, 9),
            item("high-old", 1, 2),
            item("none", 4, 1),
            item("critical", 0, 20),
        ];
        let snapshot = input.clone();

        let sorted = sort_by_priority(&input);
        assert_eq!(names(&sorted), vec!["critical", "high-old", "high-new", "low-old", "none"]);
        assert_eq!(input, snapshot);
    }

    #[test]
    fn sort_is_stable_for_identical_keys() {
        let input = vec![item("a", 2, 5), item("b", 2, 5), item("c", 2, 5)];
        assert_eq!(names(&sort_by_priority(&input)), vec!["a", "b", "c"]);
    }

    #[test]
    fn cap_truncates_in_priority_order() {
        let input = vec![item("x", 3, 1), item("y", 0, 1), item("z", 1, 1)];
        assert_eq!(names(&apply_max_concurrent(&input, Some(2))), vec!["y", "z"]);
        assert_eq!(apply_max_concurrent(&input, Some(10)).len(), 3);
    }

    #[test]
    fn zero_or_missing_cap_means_unlimited() {
        let input = vec![item("x", 3, 1), item("y", 0, 1), item("z", 1, 1)];
        assert_eq!(apply_max_concurrent(&input, None).len(), 3);
        assert_eq!(apply_max_concurrent(&input, Some(0)).len(), 3);
        assert_eq!(names(&apply_max_concurrent(&input, None)), vec!["y", "z", "x"]);
    }
}
