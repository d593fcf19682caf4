//! Dependency graph construction, per-item status resolution and cycle
//! detection.
//!
//! # Edge Direction
//!
//! `depends_on` edges point from an item to the items it waits for;
//! `depended_by` is the reverse index. Only parsed body dependencies become
//! edges. Parent/child links affect status but are not graph edges.

use std::collections::{HashMap, HashSet};

use futures::future::join_all;
use serde::Serialize;

use super::parser::parse_dependencies;
use super::priority::{Priority, Schedulable, extract_priority};
use crate::tracker::{DependencyRef, IssueRef, IssueState, Tracker, WorkItem};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ItemStatus {
    Ready,
    Blocked,
    Closed,
}

/// A work item with its dispatch status resolved for the current run.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedItem {
    pub item: WorkItem,
    pub status: ItemStatus,
    pub dependencies: Vec<DependencyRef>,
    pub blocked_by: Vec<DependencyRef>,
    pub priority: Priority,
    pub priority_score: u8,
    /// True when the item has no open children.
    pub is_leaf: bool,
    pub sub_issue_numbers: Vec<u64>,
    pub parent_issue_number: Option<u64>,
}

impl ResolvedItem {
    pub fn id(&self) -> &IssueRef {
        &self.item.id
    }
}

impl Schedulable for ResolvedItem {
    fn priority_score(&self) -> u8 {
        self.priority_score
    }

    fn created_at(&self) -> chrono::DateTime<chrono::Utc> {
        self.item.created_at
    }
}

/// Parent/child links of one item as reported by the tracker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Hierarchy {
    pub children: Vec<u64>,
    pub parent: Option<u64>,
}

/// Resolves one item against known issue states.
///
/// A dependency or child blocks while its state is not closed. References
/// missing from `states` (deleted or inaccessible issues) do not block.
pub fn resolve_item(
    item: &WorkItem,
    dependencies: Vec<DependencyRef>,
    hierarchy: &Hierarchy,
    states: &HashMap<IssueRef, IssueState>,
) -> ResolvedItem {
    let is_blocking = |r: &IssueRef| matches!(states.get(r), Some(IssueState::Open));

    let mut blocked_by: Vec<DependencyRef> = Vec::new();
    for dep in dependencies.iter().filter(|d| is_blocking(*d)) {
        if !blocked_by.contains(dep) {
            blocked_by.push(dep.clone());
        }
    }

    let mut has_open_child = false;
    for child in hierarchy.children.iter().map(|n| item.id.sibling(*n)) {
        if is_blocking(&child) {
            has_open_child = true;
            if !blocked_by.contains(&child) {
                blocked_by.push(child);
            }
        }
    }

    let status = if item.state == IssueState::Closed {
        ItemStatus::Closed
    } else if !blocked_by.is_empty() {
        ItemStatus::Blocked
    } else {
        ItemStatus::Ready
    };

    let priority = extract_priority(&item.labels);
    ResolvedItem {
        item: item.clone(),
        status,
        dependencies,
        blocked_by,
        priority,
        priority_score: priority.score(),
        is_leaf: !has_open_child,
        sub_issue_numbers: hierarchy.children.clone(),
        parent_issue_number: hierarchy.parent,
    }
}

/// Builds [`ResolvedItem`]s for a batch, fetching hierarchy links and the
/// state of referenced issues outside the batch.
pub struct GraphBuilder<'a, T> {
    tracker: &'a T,
    default_owner: String,
    default_repo: String,
}

impl<'a, T: Tracker> GraphBuilder<'a, T> {
    pub fn new(tracker: &'a T, default_owner: impl Into<String>, default_repo: impl Into<String>) -> Self {
        Self {
            tracker,
            default_owner: default_owner.into(),
            default_repo: default_repo.into(),
        }
    }

    pub async fn build(&self, items: &[WorkItem]) -> Vec<ResolvedItem> {
        let dependencies: Vec<Vec<DependencyRef>> = items
            .iter()
            .map(|item| {
                parse_dependencies(
                    item.body.as_deref().unwrap_or_default(),
                    &self.default_owner,
                    &self.default_repo,
                )
            })
            .collect();

        let hierarchies = join_all(items.iter().map(|item| self.hierarchy(item))).await;

        let mut states: HashMap<IssueRef, IssueState> =
            items.iter().map(|i| (i.id.clone(), i.state)).collect();

        let mut unknown: Vec<IssueRef> = Vec::new();
        let mut queued: HashSet<IssueRef> = HashSet::new();
        let referenced = dependencies.iter().flatten().cloned().chain(
            items
                .iter()
                .zip(&hierarchies)
                .flat_map(|(item, h)| h.children.iter().map(|n| item.id.sibling(*n))),
        );
        for r in referenced {
            if !states.contains_key(&r) && queued.insert(r.clone()) {
                unknown.push(r);
            }
        }

        let fetched = join_all(unknown.iter().map(|r| async move {
            (r, self.tracker.fetch_item(&r.owner, &r.repo, r.number).await)
        }))
        .await;
        for (r, result) in fetched {
            match result {
                Ok(Some(found)) => {
                    states.insert(r.clone(), found.state);
                }
                Ok(None) => {
                    tracing::warn!(reference = %r, "referenced issue not found; treating as non-blocking");
                }
                Err(e) => {
                    tracing::warn!(reference = %r, error = %e, "failed to fetch referenced issue; treating as non-blocking");
                }
            }
        }

        items
            .iter()
            .zip(dependencies)
            .zip(&hierarchies)
            .map(|((item, deps), hierarchy)| resolve_item(item, deps, hierarchy, &states))
            .collect()
    }

    /// Enrichment failures degrade to "no hierarchy data" for that item.
    async fn hierarchy(&self, item: &WorkItem) -> Hierarchy {
        let id = &item.id;
        let (children, parent) = futures::join!(
            self.tracker.fetch_children(&id.owner, &id.repo, id.number),
            self.tracker.fetch_parent(&id.owner, &id.repo, id.number),
        );
        let children = children.unwrap_or_else(|e| {
            tracing::warn!(item = %id, error = %e, "failed to fetch sub-issues");
            Vec::new()
        });
        let parent = parent.unwrap_or_else(|e| {
            tracing::warn!(item = %id, error = %e, "failed to fetch parent issue");
            None
        });
        Hierarchy { children, parent }
    }
}

// ---------------------------------------------------------------------------
// Graph and cycle detection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct DagNode {
    pub id: IssueRef,
    pub depends_on: Vec<IssueRef>,
    pub depended_by: Vec<IssueRef>,
}

/// One detected dependency cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleInfo {
    pub has_cycle: bool,
    pub cycle_nodes: Vec<IssueRef>,
    pub description: String,
}

impl CycleInfo {
    pub fn none() -> Self {
        Self {
            has_cycle: false,
            cycle_nodes: Vec::new(),
            description: String::new(),
        }
    }

    fn from_path(path: Vec<IssueRef>) -> Self {
        let description = path
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" -> ");
        Self {
            has_cycle: true,
            cycle_nodes: path,
            description,
        }
    }
}

/// Id → node map with forward and reverse edges, rebuilt every run.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    nodes: HashMap<IssueRef, DagNode>,
    order: Vec<IssueRef>,
}

impl DependencyGraph {
    /// Edges to items outside `items` are dropped.
    pub fn from_resolved(items: &[ResolvedItem]) -> Self {
        let mut graph = Self::default();
        for item in items {
            if graph.nodes.contains_key(item.id()) {
                continue;
            }
            graph.order.push(item.id().clone());
            graph.nodes.insert(
                item.id().clone(),
                DagNode {
                    id: item.id().clone(),
                    depends_on: Vec::new(),
                    depended_by: Vec::new(),
                },
            );
        }

        for item in items {
            for dep in &item.dependencies {
                if !graph.nodes.contains_key(dep) {
                    continue;
                }
                if let Some(node) = graph.nodes.get_mut(item.id())
                    && !node.depends_on.contains(dep)
                {
                    node.depends_on.push(dep.clone());
                }
                if let Some(target) = graph.nodes.get_mut(dep)
                    && !target.depended_by.contains(item.id())
                {
                    target.depended_by.push(item.id().clone());
                }
            }
        }
        graph
    }

    pub fn node(&self, id: &IssueRef) -> Option<&DagNode> {
        self.nodes.get(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Depth-first search with a recursion stack, started from each unvisited
    /// node in insertion order. Each DFS run reports at most one cycle: the
    /// stack slice from the revisited node to the top.
    pub fn detect_cycles(&self) -> Vec<CycleInfo> {
        let mut visited: HashSet<&IssueRef> = HashSet::new();
        let mut cycles = Vec::new();

        for root in &self.order {
            if visited.contains(root) {
                continue;
            }
            let mut stack: Vec<&IssueRef> = Vec::new();
            if let Some(path) = self.dfs(root, &mut visited, &mut stack) {
                cycles.push(CycleInfo::from_path(path));
            }
        }
        cycles
    }

    /// The first cycle found, or an empty report.
    pub fn detect_cycle(&self) -> CycleInfo {
        self.detect_cycles().into_iter().next().unwrap_or_else(CycleInfo::none)
    }

    fn dfs<'g>(
        &'g self,
        id: &'g IssueRef,
        visited: &mut HashSet<&'g IssueRef>,
        stack: &mut Vec<&'g IssueRef>,
    ) -> Option<Vec<IssueRef>> {
        visited.insert(id);
        stack.push(id);

        if let Some(node) = self.nodes.get(id) {
            for next in &node.depends_on {
                if let Some(pos) = stack.iter().position(|s| *s == next) {
                    return Some(stack[pos..].iter().map(|r| (*r).clone()).collect());
                }
                if !visited.contains(next)
                    && let Some(cycle) = self.dfs(next, visited, stack)
                {
                    return Some(cycle);
                }
            }
        }

        stack.pop();
        None
    }
}
