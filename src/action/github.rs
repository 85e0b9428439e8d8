// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! GitHub REST client.
//!
//! Project boards are the classic kind, which still sit behind the
//! "inertia" preview media type.

use crate::action::issue::{Column, Issue, IssueError, IssueTracker, Project, Result};

use reqwest::{
    header::{ACCEPT, AUTHORIZATION, USER_AGENT},
    Client, RequestBuilder, StatusCode, Url,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument};

/// Default GitHub API endpoint.
pub const GITHUB_API_URL: &str = "https://api.github.com";

const PROJECTS_PREVIEW: &str = "application/vnd.github.inertia-preview+json";
const PAGE_SIZE: usize = 100;

/// Issue tracker access through the GitHub REST API.
#[derive(Debug, Clone)]
pub struct GithubClient {
    http: Client,
    api_url: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct IssueBody {
    id: u64,
    number: u64,
    title: String,
    html_url: String,
    state: String,
    #[serde(default)]
    labels: Vec<LabelBody>,
    pull_request: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct LabelBody {
    name: String,
}

#[derive(Debug, Deserialize)]
struct NamedBody {
    id: u64,
    name: String,
}

#[derive(Debug, Deserialize)]
struct CardBody {
    content_url: Option<String>,
}

impl From<IssueBody> for Issue {
    fn from(body: IssueBody) -> Self {
        Self {
            id: body.id,
            number: body.number,
            title: body.title,
            url: body.html_url,
            open: body.state == "open",
            labels: body.labels.into_iter().map(|label| label.name).collect(),
        }
    }
}

impl GithubClient {
    /// Construct new GitHub client authenticated by a personal access token.
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_api_url(GITHUB_API_URL, token)
    }

    /// Construct new GitHub client against another API endpoint.
    pub fn with_api_url(api_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            api_url: api_url.into(),
            token: token.into(),
        }
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        let invalid = || IssueError::InvalidUrl {
            url: format!("{}/{}", self.api_url, segments.join("/")),
        };
        let mut url = Url::parse(&self.api_url).map_err(|_| invalid())?;
        url.path_segments_mut()
            .map_err(|_| invalid())?
            .pop_if_empty()
            .extend(segments);

        Ok(url)
    }

    /// Segments of `repos/{owner}/{name}/...`.
    fn repo_url(&self, repo: &str, rest: &[&str]) -> Result<Url> {
        let mut segments = vec!["repos"];
        segments.extend(repo.split('/'));
        segments.extend(rest);
        self.url(&segments)
    }

    fn request(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header(AUTHORIZATION, format!("token {}", self.token))
            .header(USER_AGENT, env!("CARGO_PKG_NAME"))
    }

    fn get(&self, url: Url) -> RequestBuilder {
        self.request(self.http.get(url))
            .header(ACCEPT, "application/vnd.github+json")
    }

    fn get_preview(&self, url: Url) -> RequestBuilder {
        self.request(self.http.get(url)).header(ACCEPT, PROJECTS_PREVIEW)
    }
}

/// Extract the issue number from a card that points at an issue of `repo`.
pub fn card_issue_number(content_url: &str, repo: &str) -> Option<u64> {
    let (prefix, number) = content_url.rsplit_once('/')?;
    prefix
        .ends_with(&format!("/repos/{repo}/issues"))
        .then(|| number.parse().ok())
        .flatten()
}

impl IssueTracker for GithubClient {
    #[instrument(skip(self), level = "debug")]
    async fn issue(&self, repo: &str, number: u64) -> Result<Option<Issue>> {
        let url = self.repo_url(repo, &["issues", &number.to_string()])?;
        let response = self.get(url).send().await?;
        if matches!(response.status(), StatusCode::NOT_FOUND | StatusCode::GONE) {
            return Ok(None);
        }

        let body: IssueBody = response.error_for_status()?.json().await?;
        Ok(body.pull_request.is_none().then(|| body.into()))
    }

    #[instrument(skip(self), level = "debug")]
    async fn issues(&self, repo: &str) -> Result<Vec<Issue>> {
        let url = self.repo_url(repo, &["issues"])?;
        let mut issues = Vec::new();

        for page in 1.. {
            let bodies: Vec<IssueBody> = self
                .get(url.clone())
                .query(&[("state", "all")])
                .query(&[("per_page", PAGE_SIZE), ("page", page)])
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            let count = bodies.len();
            debug!("received {count} issues of {repo}");
            issues.extend(
                bodies
                    .into_iter()
                    .filter(|body| body.pull_request.is_none())
                    .map(Issue::from),
            );

            if count < PAGE_SIZE {
                break;
            }
        }

        Ok(issues)
    }

    #[instrument(skip(self, body, labels), level = "debug")]
    async fn create_issue(
        &self,
        repo: &str,
        title: &str,
        body: &str,
        labels: &[String],
    ) -> Result<Issue> {
        let url = self.repo_url(repo, &["issues"])?;
        let created: IssueBody = self
            .request(self.http.post(url))
            .json(&json!({ "title": title, "body": body, "labels": labels }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(created.into())
    }

    #[instrument(skip(self), level = "debug")]
    async fn add_labels(&self, repo: &str, number: u64, labels: &[String]) -> Result<()> {
        let url = self.repo_url(repo, &["issues", &number.to_string(), "labels"])?;
        self.request(self.http.post(url))
            .json(&json!({ "labels": labels }))
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn remove_label(&self, repo: &str, number: u64, label: &str) -> Result<()> {
        let url = self.repo_url(repo, &["issues", &number.to_string(), "labels", label])?;
        self.request(self.http.delete(url))
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn projects(&self, repo: &str) -> Result<Vec<Project>> {
        let url = self.repo_url(repo, &["projects"])?;
        let projects: Vec<NamedBody> = self
            .get_preview(url)
            .query(&[("state", "open")])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(projects
            .into_iter()
            .map(|body| Project {
                id: body.id,
                name: body.name,
            })
            .collect())
    }

    #[instrument(skip(self), level = "debug")]
    async fn columns(&self, project: u64) -> Result<Vec<Column>> {
        let url = self.url(&["projects", &project.to_string(), "columns"])?;
        let columns: Vec<NamedBody> = self
            .get_preview(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(columns
            .into_iter()
            .map(|body| Column {
                id: body.id,
                name: body.name,
            })
            .collect())
    }

    #[instrument(skip(self), level = "debug")]
    async fn column_issues(&self, repo: &str, column: u64) -> Result<Vec<u64>> {
        let url = self.url(&["projects", "columns", &column.to_string(), "cards"])?;
        let mut numbers = Vec::new();

        for page in 1.. {
            let cards: Vec<CardBody> = self
                .get_preview(url.clone())
                .query(&[("per_page", PAGE_SIZE), ("page", page)])
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            let count = cards.len();
            numbers.extend(
                cards
                    .iter()
                    .filter_map(|card| card.content_url.as_deref())
                    .filter_map(|content_url| card_issue_number(content_url, repo)),
            );

            if count < PAGE_SIZE {
                break;
            }
        }

        Ok(numbers)
    }

    #[instrument(skip(self, issue), fields(issue = issue.number), level = "debug")]
    async fn add_card(&self, column: u64, issue: &Issue) -> Result<()> {
        let url = self.url(&["projects", "columns", &column.to_string(), "cards"])?;
        self.request(self.http.post(url))
            .header(ACCEPT, PROJECTS_PREVIEW)
            .json(&json!({ "content_id": issue.id, "content_type": "Issue" }))
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }
}
