//! Work item model shared by the tracker client and the dispatcher, plus the
//! wire shapes of the GitHub REST and GraphQL responses.

use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Repository-qualified issue reference (`owner/repo#number`).
///
/// Owner and repository compare case-insensitively, the number exactly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueRef {
    pub owner: String,
    pub repo: String,
    pub number: u64,
}

/// A reference to another work item found in an issue body.
pub type DependencyRef = IssueRef;

impl IssueRef {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>, number: u64) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            number,
        }
    }

    /// Normalized key used for de-duplication and map lookups.
    pub fn key(&self) -> String {
        format!(
            "{}/{}#{}",
            self.owner.to_ascii_lowercase(),
            self.repo.to_ascii_lowercase(),
            self.number
        )
    }

    /// `owner/repo` as written.
    pub fn repository(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }

    /// Same repository (case-insensitive), different number.
    pub fn sibling(&self, number: u64) -> Self {
        Self::new(self.owner.clone(), self.repo.clone(), number)
    }
}

impl PartialEq for IssueRef {
    fn eq(&self, other: &Self) -> bool {
        self.number == other.number
            && self.owner.eq_ignore_ascii_case(&other.owner)
            && self.repo.eq_ignore_ascii_case(&other.repo)
    }
}

impl Eq for IssueRef {}

impl Hash for IssueRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.owner.to_ascii_lowercase().hash(state);
        self.repo.to_ascii_lowercase().hash(state);
        self.number.hash(state);
    }
}

impl fmt::Display for IssueRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}#{}", self.owner, self.repo, self.number)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueState {
    Open,
    Closed,
}

impl IssueState {
    /// Parses both REST (`open`) and GraphQL (`OPEN`) spellings; anything
    /// that is not "closed" counts as open.
    pub fn parse(raw: &str) -> Self {
        if raw.eq_ignore_ascii_case("closed") {
            IssueState::Closed
        } else {
            IssueState::Open
        }
    }
}

/// An externally tracked unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: IssueRef,
    pub title: String,
    pub body: Option<String>,
    pub state: IssueState,
    pub labels: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub url: String,
    /// Project board item node id, set only for items fetched from a board.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_item_id: Option<String>,
}

impl WorkItem {
    pub fn is_open(&self) -> bool {
        self.state == IssueState::Open
    }
}

/// A GitHub Projects (v2) board addressed by owner login and number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectRef {
    pub owner: String,
    pub number: u64,
}

// ---------------------------------------------------------------------------
// REST wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub(crate) struct ApiLabel {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiIssue {
    pub number: u64,
    pub title: String,
    pub body: Option<String>,
    pub state: String,
    #[serde(default)]
    pub labels: Vec<ApiLabel>,
    pub html_url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Present when the "issue" is really a pull request.
    #[serde(default)]
    pub pull_request: Option<serde_json::Value>,
}

impl ApiIssue {
    pub fn is_pull_request(&self) -> bool {
        self.pull_request.is_some()
    }

    pub fn into_work_item(self, owner: &str, repo: &str) -> WorkItem {
        WorkItem {
            id: IssueRef::new(owner, repo, self.number),
            title: self.title,
            body: self.body,
            state: IssueState::parse(&self.state),
            labels: self.labels.into_iter().map(|l| l.name).collect(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            url: self.html_url,
            project_item_id: None,
        }
    }
}

// ---------------------------------------------------------------------------
// GraphQL wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub(crate) struct GraphQlResponse<T> {
    pub data: Option<T>,
    #[serde(default)]
    pub errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GraphQlError {
    pub message: String,
}

/// `owner` is an alias for either `organization(...)` or `user(...)`.
#[derive(Debug, Deserialize)]
pub(crate) struct ProjectOwnerData {
    pub owner: Option<ProjectOwnerNode>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ProjectOwnerNode {
    #[serde(rename = "projectV2")]
    pub project: Option<ProjectNode>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ProjectNode {
    pub id: String,
    #[serde(default)]
    pub items: Option<ItemConnection>,
    #[serde(default)]
    pub field: Option<StatusField>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ItemConnection {
    pub page_info: PageInfo,
    pub nodes: Vec<ProjectItemNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PageInfo {
    pub has_next_page: bool,
    pub end_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ProjectItemNode {
    pub id: String,
    #[serde(default)]
    pub field_value_by_name: Option<StatusValue>,
    /// Kept untyped: draft items and pull requests yield `{}` or other shapes.
    #[serde(default)]
    pub content: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StatusValue {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StatusField {
    pub id: String,
    #[serde(default)]
    pub options: Vec<StatusOption>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StatusOption {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct IssueContent {
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    pub state: String,
    pub url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub repository: RepositoryNode,
    #[serde(default)]
    pub labels: Option<LabelConnection>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RepositoryNode {
    pub name: String,
    pub owner: OwnerLogin,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OwnerLogin {
    pub login: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LabelConnection {
    pub nodes: Vec<ApiLabel>,
}

impl IssueContent {
    pub fn into_work_item(self, project_item_id: String) -> WorkItem {
        WorkItem {
            id: IssueRef::new(self.repository.owner.login, self.repository.name, self.number),
            title: self.title,
            body: self.body,
            state: IssueState::parse(&self.state),
            labels: self
                .labels
                .map(|c| c.nodes.into_iter().map(|l| l.name).collect())
                .unwrap_or_default(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            url: self.url,
            project_item_id: Some(project_item_id),
        }
    }
}
