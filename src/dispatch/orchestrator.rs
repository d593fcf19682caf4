use chrono::{DateTime, Utc};
use serde::Serialize;

use super::graph::{CycleInfo, DependencyGraph, GraphBuilder, ItemStatus, ResolvedItem};
use super::matrix::MatrixOutput;
use super::priority::apply_max_concurrent;
use crate::error::DispatchError;
use crate::tracker::{ProjectRef, Tracker, WorkItem};

/// Where candidate items come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemSource {
    /// Open issues of the configured repository carrying this label.
    Label(String),
    /// Items of a project board whose status field equals `status`.
    Project { project: ProjectRef, status: String },
}

#[derive(Debug, Clone)]
pub struct DispatchOptions {
    pub owner: String,
    pub repo: String,
    pub source: ItemSource,
    /// `None` or `Some(0)`: no cap.
    pub max_concurrent: Option<usize>,
    /// Board status to set on dispatched items (project source only).
    pub in_progress_status: Option<String>,
    pub dry_run: bool,
    /// Abort with `CYCLE_DETECTED` instead of reporting cycles as warnings.
    pub fail_on_cycle: bool,
}

/// Everything one dispatch run computed.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchResult {
    pub total_fetched: usize,
    pub total_open: usize,
    /// Ready leaves after the concurrency cap, in dispatch order.
    pub ready: Vec<ResolvedItem>,
    /// Ready leaves that were cut by the concurrency cap.
    pub deferred: Vec<ResolvedItem>,
    pub blocked: Vec<ResolvedItem>,
    pub parents: Vec<ResolvedItem>,
    pub cycles: Vec<CycleInfo>,
    pub matrix: MatrixOutput,
    pub timestamp: DateTime<Utc>,
    pub dry_run: bool,
}

/// Drives fetch → graph → schedule → matrix for one run.
pub struct Dispatcher<'a, T> {
    tracker: &'a T,
    options: DispatchOptions,
}

impl<'a, T: Tracker> Dispatcher<'a, T> {
    pub fn new(tracker: &'a T, options: DispatchOptions) -> Self {
        Self { tracker, options }
    }

    pub fn options(&self) -> &DispatchOptions {
        &self.options
    }

    pub async fn run(&self) -> Result<DispatchResult, DispatchError> {
        let fetched = self.fetch().await?;
        let total_fetched = fetched.len();
        let open: Vec<WorkItem> = fetched.into_iter().filter(WorkItem::is_open).collect();
        let total_open = open.len();
        tracing::info!(total_fetched, total_open, "fetched candidate items");

        let resolved = GraphBuilder::new(self.tracker, &self.options.owner, &self.options.repo)
            .build(&open)
            .await;

        let cycles = DependencyGraph::from_resolved(&resolved).detect_cycles();
        for cycle in &cycles {
            tracing::warn!(cycle = %cycle.description, "dependency cycle detected");
        }
        if self.options.fail_on_cycle && !cycles.is_empty() {
            let descriptions: Vec<&str> = cycles.iter().map(|c| c.description.as_str()).collect();
            return Err(DispatchError::CycleDetected(descriptions.join("; ")));
        }

        let mut ready_leaves = Vec::new();
        let mut blocked = Vec::new();
        let mut parents = Vec::new();
        for item in resolved {
            if !item.is_leaf {
                parents.push(item);
                continue;
            }
            match item.status {
                ItemStatus::Ready => ready_leaves.push(item),
                ItemStatus::Blocked => blocked.push(item),
                ItemStatus::Closed => {}
            }
        }

        let ready = apply_max_concurrent(&ready_leaves, self.options.max_concurrent);
        let deferred: Vec<ResolvedItem> = ready_leaves
            .into_iter()
            .filter(|candidate| !ready.iter().any(|r| r.id() == candidate.id()))
            .collect();
        if !deferred.is_empty() {
            tracing::info!(
                deferred = deferred.len(),
                cap = ?self.options.max_concurrent,
                "ready items deferred by concurrency cap"
            );
        }

        let matrix = MatrixOutput::from_items(&ready);
        self.mark_in_progress(&ready).await;

        Ok(DispatchResult {
            total_fetched,
            total_open,
            ready,
            deferred,
            blocked,
            parents,
            cycles,
            matrix,
            timestamp: Utc::now(),
            dry_run: self.options.dry_run,
        })
    }

    async fn fetch(&self) -> Result<Vec<WorkItem>, DispatchError> {
        let items = match &self.options.source {
            ItemSource::Label(label) => self.tracker.fetch_items_by_label(label).await?,
            ItemSource::Project { project, status } => {
                self.tracker
                    .fetch_items_by_project_status(project, status)
                    .await?
            }
        };
        Ok(items)
    }

    /// Best-effort board update; never affects the computed result.
    async fn mark_in_progress(&self, items: &[ResolvedItem]) {
        let Some(status) = self.options.in_progress_status.as_deref() else {
            return;
        };
        let ItemSource::Project { project, .. } = &self.options.source else {
            tracing::debug!("in-progress status only applies to project sources");
            return;
        };
        if self.options.dry_run {
            tracing::info!(count = items.len(), status, "dry run: not updating board status");
            return;
        }

        for item in items {
            match self.tracker.set_project_status(project, &item.item, status).await {
                Ok(()) => tracing::info!(item = %item.id(), status, "marked item in progress"),
                Err(e) => tracing::warn!(item = %item.id(), error = %e, "failed to update board status"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::testing::{MemoryTracker, work_item};
    use crate::error::ErrorKind;
    use crate::tracker::{IssueState, WorkItem};
    use chrono::TimeZone;
    use std::collections::HashMap;

    fn labelled(number: u64, body: &str, labels: &[&str], day: u32) -> WorkItem {
        let mut item = work_item(number, IssueState::Open, body);
        item.labels = labels.iter().map(|l| l.to_string()).collect();
        item.created_at = Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap();
        item
    }

    fn options(source: ItemSource) -> DispatchOptions {
        DispatchOptions {
            owner: "acme".into(),
            repo: "widgets".into(),
            source,
            max_concurrent: None,
            in_progress_status: None,
            dry_run: false,
            fail_on_cycle: false,
        }
    }

    fn numbers(items: &[ResolvedItem]) -> Vec<u64> {
        items.iter().map(|i| i.id().number).collect()
    }

    fn sample_tracker() -> MemoryTracker {
        MemoryTracker {
            issues: vec![
                labelled(1, "", &["ready", "priority:low"], 1),
                labelled(2, "Depends on #1", &["ready", "priority:critical"], 2),
                labelled(3, "", &["ready", "priority:high"], 3),
                labelled(4, "Epic", &["ready"], 4),
                labelled(5, "", &["ready", "priority:high"], 2),
                labelled(6, "", &["other"], 1),
            ],
            children: HashMap::from([(4, vec![5])]),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn partitions_and_orders_ready_leaves() {
        let tracker = sample_tracker();
        let result = Dispatcher::new(&tracker, options(ItemSource::Label("ready".into())))
            .run()
            .await
            .unwrap();

        assert_eq!(result.total_fetched, 5);
        assert_eq!(result.total_open, 5);
        // high (day 2) before high (day 3), then low.
        assert_eq!(numbers(&result.ready), vec![5, 3, 1]);
        assert_eq!(numbers(&result.blocked), vec![2]);
        assert_eq!(numbers(&result.parents), vec![4]);
        assert!(result.cycles.is_empty());

        let matrix_numbers: Vec<u64> = result.matrix.include.iter().map(|e| e.issue_number).collect();
        assert_eq!(matrix_numbers, vec![5, 3, 1]);
        assert_eq!(result.matrix.include[0].parent_issue_number, Some(4));
    }

    #[tokio::test]
    async fn cap_limits_matrix_and_reports_deferred() {
        let tracker = sample_tracker();
        let mut opts = options(ItemSource::Label("ready".into()));
        opts.max_concurrent = Some(2);

        let result = Dispatcher::new(&tracker, opts).run().await.unwrap();
        assert_eq!(numbers(&result.ready), vec![5, 3]);
        assert_eq!(numbers(&result.deferred), vec![1]);
        assert_eq!(result.matrix.len(), 2);
    }

    #[tokio::test]
    async fn closed_items_are_dropped_before_graph_building() {
        let mut tracker = sample_tracker();
        tracker.issues[0].state = IssueState::Closed;

        let result = Dispatcher::new(&tracker, options(ItemSource::Label("ready".into())))
            .run()
            .await
            .unwrap();
        assert_eq!(result.total_fetched, 5);
        assert_eq!(result.total_open, 4);
        // #2 depended on the now-closed #1.
        assert!(numbers(&result.ready).contains(&2));
        assert!(result.blocked.is_empty());
    }

    #[tokio::test]
    async fn cycles_are_warnings_not_errors() {
        let tracker = MemoryTracker {
            issues: vec![
                labelled(1, "Blocked by #2", &["ready"], 1),
                labelled(2, "Blocked by #1", &["ready"], 1),
            ],
            ..Default::default()
        };
        let result = Dispatcher::new(&tracker, options(ItemSource::Label("ready".into())))
            .run()
            .await
            .unwrap();
        assert_eq!(result.cycles.len(), 1);
        assert_eq!(numbers(&result.blocked), vec![1, 2]);
        assert!(result.matrix.is_empty());
    }

    #[tokio::test]
    async fn fail_on_cycle_aborts_before_marking() {
        let tracker = MemoryTracker {
            issues: vec![
                labelled(1, "Blocked by #2", &["ready"], 1),
                labelled(2, "Blocked by #1", &["ready"], 1),
                labelled(3, "", &["ready"], 1),
            ],
            ..Default::default()
        };
        let mut opts = project_options(false);
        opts.fail_on_cycle = true;

        let err = Dispatcher::new(&tracker, opts).run().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CycleDetected);
        assert!(err.to_string().contains("#1"), "{err}");
        assert!(tracker.status_updates.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn tracker_failure_surfaces_typed_error() {
        let tracker = MemoryTracker {
            fail_listing: true,
            ..Default::default()
        };
        let err = Dispatcher::new(&tracker, options(ItemSource::Label("ready".into())))
            .run()
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthFailed);
    }

    fn project_options(dry_run: bool) -> DispatchOptions {
        let mut opts = options(ItemSource::Project {
            project: ProjectRef {
                owner: "acme".into(),
                number: 3,
            },
            status: "ready".into(),
        });
        opts.in_progress_status = Some("In Progress".into());
        opts.dry_run = dry_run;
        opts
    }

    #[tokio::test]
    async fn project_source_marks_dispatched_items_in_progress() {
        let tracker = sample_tracker();
        let result = Dispatcher::new(&tracker, project_options(false)).run().await.unwrap();

        let updates = tracker.status_updates.lock().unwrap().clone();
        let updated: Vec<u64> = updates.iter().map(|(n, _)| *n).collect();
        assert_eq!(updated, numbers(&result.ready));
        assert!(updates.iter().all(|(_, s)| s == "In Progress"));
    }

    #[tokio::test]
    async fn dry_run_computes_same_result_without_mutation() {
        let tracker = sample_tracker();
        let dry = Dispatcher::new(&tracker, project_options(true)).run().await.unwrap();
        assert!(tracker.status_updates.lock().unwrap().is_empty());
        assert!(dry.dry_run);

        let live = Dispatcher::new(&tracker, project_options(false)).run().await.unwrap();
        assert_eq!(dry.matrix, live.matrix);
    }
}
