// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Issue sync.
//!
//! Every dataset of a family with a GitHub repository gets one tracking
//! issue. The labels of that issue mirror the stage tags of the dataset's
//! registry records.
//!
//! # Label Ownership
//!
//! Reposync only owns labels that are stage values, i.e., values that
//! appear in a stage column of at least one registry record. Those are
//! added and removed to match the registry exactly. Any other label was
//! put there by a person and is left alone.
//!
//! # Project Board
//!
//! A family may name a project board. Open issues tagged "To Do" are put
//! in the "To Do" column of that board, unless a card for the issue already
//! sits anywhere on the board.

use crate::{action::Action, descriptor::GithubConfig};

use std::collections::BTreeSet;
use tracing::{debug, info, instrument, warn};

/// Stage tag that queues an issue on the project board.
pub const TODO_TAG: &str = "To Do";

/// Project board column new work is queued in.
pub const TODO_COLUMN: &str = "To Do";

/// Issue as far as reposync cares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
    /// Global identifier, needed to put the issue on a project board.
    pub id: u64,
    pub number: u64,
    pub title: String,
    pub url: String,
    pub open: bool,
    pub labels: Vec<String>,
}

/// Project board of a repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    pub id: u64,
    pub name: String,
}

/// Column of a project board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub id: u64,
    pub name: String,
}

/// Issue tracker access.
#[allow(async_fn_in_trait)]
pub trait IssueTracker {
    /// Fetch one issue by number, `None` if it does not exist.
    async fn issue(&self, repo: &str, number: u64) -> Result<Option<Issue>>;

    /// Fetch every open and closed issue, excluding pull requests.
    async fn issues(&self, repo: &str) -> Result<Vec<Issue>>;

    /// Open a new issue.
    async fn create_issue(
        &self,
        repo: &str,
        title: &str,
        body: &str,
        labels: &[String],
    ) -> Result<Issue>;

    async fn add_labels(&self, repo: &str, number: u64, labels: &[String]) -> Result<()>;

    async fn remove_label(&self, repo: &str, number: u64, label: &str) -> Result<()>;

    /// Project boards of a repository.
    async fn projects(&self, repo: &str) -> Result<Vec<Project>>;

    async fn columns(&self, project: u64) -> Result<Vec<Column>>;

    /// Numbers of the issues of `repo` that have a card in a column.
    async fn column_issues(&self, repo: &str, column: u64) -> Result<Vec<u64>>;

    /// Put an issue on a project board column.
    async fn add_card(&self, column: u64, issue: &Issue) -> Result<()>;
}

/// Compute the label changes that make an issue match its stage tags.
///
/// Returns labels to add, and labels to remove. Only labels inside the
/// stage vocabulary are ever touched.
pub fn plan_labels(
    current: &[String],
    wanted: &[String],
    vocabulary: &BTreeSet<String>,
) -> (Vec<String>, Vec<String>) {
    let add = wanted
        .iter()
        .filter(|label| vocabulary.contains(*label) && !current.contains(label))
        .cloned()
        .collect();
    let remove = current
        .iter()
        .filter(|label| vocabulary.contains(*label) && !wanted.contains(label))
        .cloned()
        .collect();

    (add, remove)
}

/// Render the body of a new tracking issue.
pub fn issue_body(title: &str, landing_pages: &[String], dir: &str) -> String {
    format!(
        "Transform for {title}\n\nLanding page: {}\n\nDataset directory: datasets/{dir}\n",
        landing_pages.join(", ")
    )
}

/// What issue sync needs to know about a dataset.
#[derive(Debug, Clone)]
pub struct IssueRequest<'a> {
    pub dir: &'a str,
    pub title: &'a str,
    pub landing_pages: &'a [String],

    /// Issue number already known from the descriptor or the registry.
    pub known_number: Option<u64>,

    pub stage_tags: &'a [String],
}

/// Result of syncing one dataset with the issue tracker.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IssueOutcome {
    /// Tracking issue, unless it still has to be created.
    pub issue: Option<Issue>,

    /// Planned actions, applied only under writeback.
    pub actions: Vec<Action>,
}

/// Project board state loaded once per run.
#[derive(Debug, Clone)]
struct Board {
    todo_column: u64,
    issues: BTreeSet<u64>,
}

/// Sync datasets of one family with its GitHub repository.
pub struct IssueSync<'a, I>
where
    I: IssueTracker,
{
    tracker: &'a I,
    config: &'a GithubConfig,
    vocabulary: &'a BTreeSet<String>,
    writeback: bool,

    // INVARIANT: Fetched at most once per run, then kept current with the
    // issues and cards this run creates.
    issues: Option<Vec<Issue>>,
    board: Option<Option<Board>>,
}

impl<'a, I> IssueSync<'a, I>
where
    I: IssueTracker,
{
    /// Construct new issue sync.
    pub fn new(
        tracker: &'a I,
        config: &'a GithubConfig,
        vocabulary: &'a BTreeSet<String>,
        writeback: bool,
    ) -> Self {
        Self {
            tracker,
            config,
            vocabulary,
            writeback,
            issues: None,
            board: None,
        }
    }

    /// Bring the tracking issue of a dataset in line with the registry.
    ///
    /// # Errors
    ///
    /// - Return [`IssueError`] if any tracker call fails.
    #[instrument(skip(self, request), fields(dir = request.dir), level = "debug")]
    pub async fn sync(&mut self, request: &IssueRequest<'_>) -> Result<IssueOutcome> {
        let mut outcome = IssueOutcome::default();
        let repo = self.config.repo.as_str();

        let mut issue = match self.find(request).await? {
            Some(issue) => issue,
            None => {
                let action = Action::CreateIssue {
                    repo: repo.to_string(),
                    title: request.title.to_string(),
                };
                if !self.writeback {
                    info!("would {action}");
                    outcome.actions.push(action);
                    return Ok(outcome);
                }

                let labels = request
                    .stage_tags
                    .iter()
                    .filter(|tag| self.vocabulary.contains(*tag))
                    .cloned()
                    .collect::<Vec<_>>();
                let body = issue_body(request.title, request.landing_pages, request.dir);
                let issue = self
                    .tracker
                    .create_issue(repo, request.title, &body, &labels)
                    .await?;
                info!("{action}: #{}", issue.number);
                outcome.actions.push(action);
                if let Some(issues) = self.issues.as_mut() {
                    issues.push(issue.clone());
                }
                issue
            }
        };

        let (add, remove) = plan_labels(&issue.labels, request.stage_tags, self.vocabulary);
        if !add.is_empty() {
            let action = Action::AddLabels {
                issue: issue.number,
                labels: add.clone(),
            };
            if self.writeback {
                self.tracker.add_labels(repo, issue.number, &add).await?;
                info!("{action}");
                issue.labels.extend(add);
            } else {
                info!("would {action}");
            }
            outcome.actions.push(action);
        }
        for label in remove {
            let action = Action::RemoveLabel {
                issue: issue.number,
                label: label.clone(),
            };
            if self.writeback {
                self.tracker.remove_label(repo, issue.number, &label).await?;
                info!("{action}");
                issue.labels.retain(|current| *current != label);
            } else {
                info!("would {action}");
            }
            outcome.actions.push(action);
        }

        if issue.open && request.stage_tags.iter().any(|tag| tag == TODO_TAG) {
            if let Some(action) = self.queue_on_board(&issue).await? {
                outcome.actions.push(action);
            }
        }

        outcome.issue = Some(issue);
        Ok(outcome)
    }

    async fn find(&mut self, request: &IssueRequest<'_>) -> Result<Option<Issue>> {
        let repo = self.config.repo.as_str();
        if let Some(number) = request.known_number {
            match self.tracker.issue(repo, number).await? {
                Some(issue) => return Ok(Some(issue)),
                None => warn!("issue #{number} of {:?} no longer exists", request.dir),
            }
        }

        if self.issues.is_none() {
            debug!("fetch all issues of {repo}");
            self.issues = Some(self.tracker.issues(repo).await?);
        }

        Ok(self
            .issues
            .iter()
            .flatten()
            .find(|issue| issue.title == request.title)
            .cloned())
    }

    async fn queue_on_board(&mut self, issue: &Issue) -> Result<Option<Action>> {
        let Some(project) = self.config.project.clone() else {
            return Ok(None);
        };

        if self.board.is_none() {
            self.board = Some(self.load_board(&project).await?);
        }
        let Some(board) = self.board.as_mut().and_then(Option::as_mut) else {
            return Ok(None);
        };
        if board.issues.contains(&issue.number) {
            return Ok(None);
        }

        let action = Action::AddProjectCard {
            issue: issue.number,
            project,
            column: TODO_COLUMN.to_string(),
        };
        if self.writeback {
            self.tracker.add_card(board.todo_column, issue).await?;
            info!("{action}");
            board.issues.insert(issue.number);
        } else {
            info!("would {action}");
        }

        Ok(Some(action))
    }

    async fn load_board(&self, name: &str) -> Result<Option<Board>> {
        let repo = self.config.repo.as_str();
        let projects = self.tracker.projects(repo).await?;
        let Some(project) = projects.iter().find(|project| project.name == name) else {
            warn!("project board {name:?} not found in {repo}");
            return Ok(None);
        };

        let columns = self.tracker.columns(project.id).await?;
        let Some(todo_column) = columns.iter().find(|column| column.name == TODO_COLUMN) else {
            warn!("project board {name:?} has no {TODO_COLUMN:?} column");
            return Ok(None);
        };

        let mut issues = BTreeSet::new();
        for column in &columns {
            issues.extend(self.tracker.column_issues(repo, column.id).await?);
        }

        Ok(Some(Board {
            todo_column: todo_column.id,
            issues,
        }))
    }
}

/// Issue tracker error types.
#[derive(Debug, thiserror::Error)]
pub enum IssueError {
    /// GitHub request failed.
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// GitHub URL cannot be built.
    #[error("invalid GitHub URL {url:?}")]
    InvalidUrl { url: String },
}

/// Friendly result alias :3
pub type Result<T, E = IssueError> = std::result::Result<T, E>;
