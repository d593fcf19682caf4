use std::time::Duration;

use chrono::DateTime;
use reqwest::header::HeaderMap;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::json;

use super::error::TrackerError;
use super::types::{
    ApiIssue, GraphQlResponse, IssueContent, ProjectNode, ProjectOwnerData, ProjectRef, WorkItem,
};

const API_URL: &str = "https://api.github.com";
const PER_PAGE: usize = 100;

/// Read access to the issue tracker, plus the one write the dispatcher needs.
///
/// Implemented by [`GitHubClient`]; tests substitute in-memory trackers.
#[allow(async_fn_in_trait)]
pub trait Tracker {
    /// Every open issue in the configured repository carrying `label`.
    async fn fetch_items_by_label(&self, label: &str) -> Result<Vec<WorkItem>, TrackerError>;

    /// Every issue on a project board whose status field equals `status`.
    async fn fetch_items_by_project_status(
        &self,
        project: &ProjectRef,
        status: &str,
    ) -> Result<Vec<WorkItem>, TrackerError>;

    /// A single issue, or `None` when it does not exist.
    async fn fetch_item(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> Result<Option<WorkItem>, TrackerError>;

    /// Issue numbers of the sub-issues of `number`.
    async fn fetch_children(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> Result<Vec<u64>, TrackerError>;

    /// Issue number of the parent of `number`, if it has one.
    async fn fetch_parent(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> Result<Option<u64>, TrackerError>;

    /// Sets the board status field of a project item.
    async fn set_project_status(
        &self,
        project: &ProjectRef,
        item: &WorkItem,
        status: &str,
    ) -> Result<(), TrackerError>;
}

/// GitHub REST v3 + GraphQL client bound to one repository.
pub struct GitHubClient {
    token: String,
    owner: String,
    repo: String,
    client: Client,
    base_url: String,
}

impl GitHubClient {
    pub fn new(token: String, owner: String, repo: String) -> Result<Self, TrackerError> {
        Self::with_base_url(token, owner, repo, API_URL.to_string())
    }

    /// Create a client pointing at a custom base URL (useful for testing).
    pub fn with_base_url(
        token: String,
        owner: String,
        repo: String,
        base_url: String,
    ) -> Result<Self, TrackerError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(60))
            .user_agent(concat!("issueflow/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            token,
            owner,
            repo,
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.authorize(self.client.get(format!("{}{}", self.base_url, path)))
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        req.bearer_auth(&self.token)
            .header("accept", "application/vnd.github+json")
            .header("x-github-api-version", "2022-11-28")
    }

    async fn get_json<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, TrackerError> {
        let response = check_status(req.send().await?).await?;
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| TrackerError::Parse(e.to_string()))
    }

    async fn graphql<T: DeserializeOwned>(
        &self,
        query: &str,
        variables: serde_json::Value,
    ) -> Result<Option<T>, TrackerError> {
        let req = self
            .authorize(self.client.post(format!("{}/graphql", self.base_url)))
            .json(&json!({ "query": query, "variables": variables }));
        let body: GraphQlResponse<T> = self.get_json(req).await?;

        // A missing organization comes back as data.owner = null plus a
        // NOT_FOUND error; callers fall back to the user query in that case.
        if body.data.is_none() && !body.errors.is_empty() {
            let messages: Vec<String> = body.errors.into_iter().map(|e| e.message).collect();
            return Err(TrackerError::Api {
                status: 200,
                body: messages.join("; "),
            });
        }
        Ok(body.data)
    }

    /// Loads one page of a project, trying the owner as an organization
    /// first and as a user second.
    async fn project_page(
        &self,
        project: &ProjectRef,
        fields: &str,
        cursor: Option<&str>,
    ) -> Result<ProjectNode, TrackerError> {
        for owner_kind in ["organization", "user"] {
            let query = format!(
                "query($owner: String!, $number: Int!, $cursor: String) {{ \
                   owner: {owner_kind}(login: $owner) {{ projectV2(number: $number) {{ {fields} }} }} \
                 }}"
            );
            let vars = json!({
                "owner": project.owner,
                "number": project.number,
                "cursor": cursor,
            });
            let data = match self.graphql::<ProjectOwnerData>(&query, vars).await {
                Ok(data) => data,
                Err(TrackerError::Api { .. }) if owner_kind == "organization" => continue,
                Err(e) => return Err(e),
            };
            if let Some(node) = data.and_then(|d| d.owner).and_then(|o| o.project) {
                return Ok(node);
            }
        }
        Err(TrackerError::NotFound {
            status: 404,
            body: format!("project {}#{} not found", project.owner, project.number),
        })
    }
}

const PROJECT_ITEMS_FIELDS: &str = "id items(first: 100, after: $cursor) { \
    pageInfo { hasNextPage endCursor } \
    nodes { id \
      fieldValueByName(name: \"Status\") { ... on ProjectV2ItemFieldSingleSelectValue { name } } \
      content { ... on Issue { number title body state url createdAt updatedAt \
        repository { name owner { login } } labels(first: 50) { nodes { name } } } } } }";

const PROJECT_STATUS_FIELD: &str = "id field(name: \"Status\") { \
    ... on ProjectV2SingleSelectField { id options { id name } } }";

const UPDATE_STATUS_MUTATION: &str = "mutation($project: ID!, $item: ID!, $field: ID!, $option: String!) { \
    updateProjectV2ItemFieldValue(input: { projectId: $project, itemId: $item, fieldId: $field, \
      value: { singleSelectOptionId: $option } }) { projectV2Item { id } } }";

impl Tracker for GitHubClient {
    async fn fetch_items_by_label(&self, label: &str) -> Result<Vec<WorkItem>, TrackerError> {
        let mut items = Vec::new();
        let mut page = 1usize;
        let per_page = PER_PAGE.to_string();
        loop {
            let page_param = page.to_string();
            let req = self
                .get(&format!("/repos/{}/{}/issues", self.owner, self.repo))
                .query(&[
                    ("state", "open"),
                    ("labels", label),
                    ("per_page", per_page.as_str()),
                    ("page", page_param.as_str()),
                ]);
            let batch: Vec<ApiIssue> = self.get_json(req).await?;
            let count = batch.len();
            items.extend(
                batch
                    .into_iter()
                    .filter(|i| !i.is_pull_request())
                    .map(|i| i.into_work_item(&self.owner, &self.repo)),
            );
            tracing::debug!(label, page, count, "fetched issue page");
            if count < PER_PAGE {
                break;
            }
            page += 1;
        }
        Ok(items)
    }

    async fn fetch_items_by_project_status(
        &self,
        project: &ProjectRef,
        status: &str,
    ) -> Result<Vec<WorkItem>, TrackerError> {
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let node = self
                .project_page(project, PROJECT_ITEMS_FIELDS, cursor.as_deref())
                .await?;
            let Some(connection) = node.items else {
                break;
            };
            for item in connection.nodes {
                let matches = item
                    .field_value_by_name
                    .as_ref()
                    .and_then(|v| v.name.as_deref())
                    .is_some_and(|name| name.eq_ignore_ascii_case(status));
                if !matches {
                    continue;
                }
                // Draft items and pull requests do not deserialize as issues.
                let Some(content) = item.content else { continue };
                if let Ok(issue) = serde_json::from_value::<IssueContent>(content) {
                    items.push(issue.into_work_item(item.id));
                }
            }
            if !connection.page_info.has_next_page {
                break;
            }
            cursor = connection.page_info.end_cursor;
        }
        Ok(items)
    }

    async fn fetch_item(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> Result<Option<WorkItem>, TrackerError> {
        let req = self.get(&format!("/repos/{owner}/{repo}/issues/{number}"));
        match self.get_json::<ApiIssue>(req).await {
            Ok(issue) => Ok(Some(issue.into_work_item(owner, repo))),
            Err(TrackerError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn fetch_children(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> Result<Vec<u64>, TrackerError> {
        let mut numbers = Vec::new();
        let mut page = 1usize;
        loop {
            let req = self
                .get(&format!("/repos/{owner}/{repo}/issues/{number}/sub_issues"))
                .query(&[
                    ("per_page", PER_PAGE.to_string()),
                    ("page", page.to_string()),
                ]);
            let batch: Vec<ApiIssue> = match self.get_json(req).await {
                Ok(batch) => batch,
                Err(TrackerError::NotFound { .. }) => break,
                Err(e) => return Err(e),
            };
            let count = batch.len();
            numbers.extend(batch.into_iter().map(|i| i.number));
            if count < PER_PAGE {
                break;
            }
            page += 1;
        }
        Ok(numbers)
    }

    async fn fetch_parent(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> Result<Option<u64>, TrackerError> {
        let req = self.get(&format!("/repos/{owner}/{repo}/issues/{number}/parent"));
        match self.get_json::<ApiIssue>(req).await {
            Ok(parent) => Ok(Some(parent.number)),
            Err(TrackerError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn set_project_status(
        &self,
        project: &ProjectRef,
        item: &WorkItem,
        status: &str,
    ) -> Result<(), TrackerError> {
        let Some(item_id) = item.project_item_id.as_deref() else {
            return Err(TrackerError::NotFound {
                status: 404,
                body: format!("{} is not on project {}", item.id, project.number),
            });
        };

        let node = self.project_page(project, PROJECT_STATUS_FIELD, None).await?;
        let field = node.field.ok_or_else(|| TrackerError::NotFound {
            status: 404,
            body: "project has no Status field".to_string(),
        })?;
        let option = field
            .options
            .iter()
            .find(|o| o.name.eq_ignore_ascii_case(status))
            .ok_or_else(|| TrackerError::NotFound {
                status: 404,
                body: format!("Status option '{status}' not found"),
            })?;

        let vars = json!({
            "project": node.id,
            "item": item_id,
            "field": field.id,
            "option": option.id,
        });
        self.graphql::<serde_json::Value>(UPDATE_STATUS_MUTATION, vars)
            .await?;
        Ok(())
    }
}

/// Maps non-success responses onto the tracker's error kinds.
async fn check_status(response: Response) -> Result<Response, TrackerError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let headers = response.headers().clone();
    let code = status.as_u16();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "unknown error".to_string());

    let exhausted = headers
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim() == "0");

    Err(match status {
        StatusCode::TOO_MANY_REQUESTS => TrackerError::RateLimited {
            status: code,
            reset_at: rate_limit_reset(&headers),
            body,
        },
        StatusCode::FORBIDDEN if exhausted => TrackerError::RateLimited {
            status: code,
            reset_at: rate_limit_reset(&headers),
            body,
        },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            TrackerError::Unauthorized { status: code, body }
        }
        StatusCode::NOT_FOUND => TrackerError::NotFound { status: code, body },
        _ => TrackerError::Api { status: code, body },
    })
}

fn rate_limit_reset(headers: &HeaderMap) -> Option<chrono::DateTime<chrono::Utc>> {
    headers
        .get("x-ratelimit-reset")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<i64>().ok())
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
}
