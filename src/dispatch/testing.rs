//! In-memory tracker shared by the dispatch tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use chrono::{TimeZone, Utc};

use crate::tracker::{IssueRef, IssueState, ProjectRef, Tracker, TrackerError, WorkItem};

pub(crate) fn work_item(number: u64, state: IssueState, body: &str) -> WorkItem {
    WorkItem {
        id: IssueRef::new("acme", "widgets", number),
        title: format!("Issue {number}"),
        body: Some(body.to_string()),
        state,
        labels: Vec::new(),
        created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        updated_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        url: format!("https://github.com/acme/widgets/issues/{number}"),
        project_item_id: None,
    }
}

/// Known issues plus parent → children links.
#[derive(Default)]
pub(crate) struct MemoryTracker {
    pub issues: Vec<WorkItem>,
    pub children: HashMap<u64, Vec<u64>>,
    pub failing_children: HashSet<u64>,
    pub fail_listing: bool,
    pub item_fetches: Mutex<Vec<u64>>,
    pub status_updates: Mutex<Vec<(u64, String)>>,
}

impl Tracker for MemoryTracker {
    async fn fetch_items_by_label(&self, label: &str) -> Result<Vec<WorkItem>, TrackerError> {
        if self.fail_listing {
            return Err(TrackerError::Unauthorized {
                status: 401,
                body: "Bad credentials".into(),
            });
        }
        Ok(self
            .issues
            .iter()
            .filter(|i| i.labels.iter().any(|l| l == label))
            .cloned()
            .collect())
    }

    async fn fetch_items_by_project_status(
        &self,
        _project: &ProjectRef,
        status: &str,
    ) -> Result<Vec<WorkItem>, TrackerError> {
        // Board items in tests carry their status as a label.
        self.fetch_items_by_label(status).await.map(|items| {
            items
                .into_iter()
                .map(|mut i| {
                    i.project_item_id = Some(format!("PVTI_{}", i.id.number));
                    i
                })
                .collect()
        })
    }

    async fn fetch_item(
        &self,
        _owner: &str,
        _repo: &str,
        number: u64,
    ) -> Result<Option<WorkItem>, TrackerError> {
        self.item_fetches.lock().unwrap().push(number);
        Ok(self.issues.iter().find(|i| i.id.number == number).cloned())
    }

    async fn fetch_children(&self, _owner: &str, _repo: &str, number: u64) -> Result<Vec<u64>, TrackerError> {
        if self.failing_children.contains(&number) {
            return Err(TrackerError::Api {
                status: 500,
                body: "boom".into(),
            });
        }
        Ok(self.children.get(&number).cloned().unwrap_or_default())
    }

    async fn fetch_parent(&self, _owner: &str, _repo: &str, number: u64) -> Result<Option<u64>, TrackerError> {
        Ok(self
            .children
            .iter()
            .find(|(_, kids)| kids.contains(&number))
            .map(|(parent, _)| *parent))
    }

    async fn set_project_status(
        &self,
        _project: &ProjectRef,
        item: &WorkItem,
        status: &str,
    ) -> Result<(), TrackerError> {
        self.status_updates
            .lock()
            .unwrap()
            .push((item.id.number, status.to_string()));
        Ok(())
    }
}
