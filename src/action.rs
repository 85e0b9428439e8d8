// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Side effects on external systems.
//!
//! Once a dataset descriptor is merged, its directory may need a tracking
//! issue, a build job, and issue numbers written back to the registry. Each
//! of those is an [`Action`]. Actions are always planned and logged, but
//! only performed when the run has writeback enabled for the system they
//! touch. A dry run logs them as "would ...".
//!
//! A failing action never stops the run. Its error is collected for the
//! dataset it belongs to, and the next system or dataset is tried.

pub mod github;
pub mod issue;
pub mod jenkins;
pub mod job;

use crate::{
    action::{
        issue::{Issue, IssueError, IssueRequest, IssueSync, IssueTracker},
        job::{Confirm, JobError, JobScheduler, JobSync},
    },
    config::RegistrySettings,
    descriptor::Descriptor,
    registry::{self, RecordId, Registry, RegistryError, SourceRecord},
    store::StoreError,
};

use std::fmt::{Display, Formatter, Result as FmtResult};
use tracing::{info, warn};

/// Change to an external system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    CreateIssue { repo: String, title: String },
    AddLabels { issue: u64, labels: Vec<String> },
    RemoveLabel { issue: u64, label: String },
    AddProjectCard { issue: u64, project: String, column: String },
    UpdateRegistry { record: RecordId, issue: u64 },
    CreateJob { name: String },
    ReconfigureJob { name: String },
}

impl Display for Action {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::CreateIssue { repo, title } => write!(fmt, "create issue {title:?} in {repo}"),
            Self::AddLabels { issue, labels } => {
                write!(fmt, "add labels {labels:?} to issue #{issue}")
            }
            Self::RemoveLabel { issue, label } => {
                write!(fmt, "remove label {label:?} from issue #{issue}")
            }
            Self::AddProjectCard {
                issue,
                project,
                column,
            } => write!(
                fmt,
                "add issue #{issue} to column {column:?} of project {project:?}"
            ),
            Self::UpdateRegistry { record, issue } => {
                write!(fmt, "record issue #{issue} on registry record {record}")
            }
            Self::CreateJob { name } => write!(fmt, "create job {name:?}"),
            Self::ReconfigureJob { name } => write!(fmt, "reconfigure job {name:?}"),
        }
    }
}

/// Union of the stage tags of every record folded into a directory, in
/// first-seen order.
pub fn stage_tags(sources: &[(&RecordId, &SourceRecord)]) -> Vec<String> {
    let mut tags = Vec::new();
    for tag in sources.iter().flat_map(|(_, source)| source.stage_tags()) {
        if !tags.contains(&tag) {
            tags.push(tag);
        }
    }

    tags
}

/// Planned actions and failures of one dataset.
#[derive(Debug, Default)]
pub struct Outcome {
    pub actions: Vec<Action>,
    pub errors: Vec<ActionError>,
}

/// Run the actions of each dataset against whichever systems are available.
pub struct DatasetActions<'a, R, I, J, C>
where
    R: Registry,
    I: IssueTracker,
    J: JobScheduler,
    C: Confirm,
{
    registry: &'a R,
    settings: &'a RegistrySettings,
    registry_writeback: bool,
    issues: Option<IssueSync<'a, I>>,
    jobs: Option<JobSync<'a, J, C>>,
}

impl<'a, R, I, J, C> DatasetActions<'a, R, I, J, C>
where
    R: Registry,
    I: IssueTracker,
    J: JobScheduler,
    C: Confirm,
{
    /// Construct new action runner without issue or job sync.
    pub fn new(registry: &'a R, settings: &'a RegistrySettings, registry_writeback: bool) -> Self {
        Self {
            registry,
            settings,
            registry_writeback,
            issues: None,
            jobs: None,
        }
    }

    /// Enable issue sync.
    pub fn with_issues(mut self, issues: IssueSync<'a, I>) -> Self {
        self.issues = Some(issues);
        self
    }

    /// Enable job sync.
    pub fn with_jobs(mut self, jobs: JobSync<'a, J, C>) -> Self {
        self.jobs = Some(jobs);
        self
    }

    /// Apply every action a dataset needs.
    ///
    /// The issue number is stored in the descriptor whenever a tracking
    /// issue is known, whatever the writeback settings.
    pub async fn apply(
        &mut self,
        dir: &str,
        descriptor: &mut Descriptor,
        sources: &[(&RecordId, &SourceRecord)],
    ) -> Outcome {
        let mut outcome = Outcome::default();

        if let Some(issues) = self.issues.as_mut() {
            let title = descriptor.title.as_deref().map(str::trim).unwrap_or_default();
            if title.is_empty() {
                warn!("dataset {dir:?} has no title, skip issue sync");
            } else {
                let landing_pages = descriptor.landing_pages();
                let stage_tags = stage_tags(sources);
                let request = IssueRequest {
                    dir,
                    title,
                    landing_pages: &landing_pages,
                    known_number: descriptor
                        .main_issue()
                        .or_else(|| sources.iter().find_map(|(_, source)| source.issue_number)),
                    stage_tags: &stage_tags,
                };

                match issues.sync(&request).await {
                    Ok(result) => {
                        outcome.actions.extend(result.actions);
                        if let Some(issue) = result.issue {
                            descriptor.transform_mut().main_issue = Some(issue.number);
                            self.record_issue(sources, &issue, &mut outcome).await;
                        }
                    }
                    Err(error) => outcome.errors.push(error.into()),
                }
            }
        }

        if let Some(jobs) = &self.jobs {
            match jobs.sync(dir).await {
                Ok(action) => outcome.actions.extend(action),
                Err(error) => outcome.errors.push(error.into()),
            }
        }

        outcome
    }

    async fn record_issue(
        &self,
        sources: &[(&RecordId, &SourceRecord)],
        issue: &Issue,
        outcome: &mut Outcome,
    ) {
        for (id, source) in sources {
            if source.issue_number == Some(issue.number)
                && source.issue_url.as_deref() == Some(issue.url.as_str())
            {
                continue;
            }

            let action = Action::UpdateRegistry {
                record: id.to_string(),
                issue: issue.number,
            };
            if !self.registry_writeback {
                info!("would {action}");
                outcome.actions.push(action);
                continue;
            }

            match registry::write_issue(self.registry, self.settings, id, issue.number, &issue.url)
                .await
            {
                Ok(()) => {
                    info!("{action}");
                    outcome.actions.push(action);
                }
                Err(error) => outcome.errors.push(error.into()),
            }
        }
    }
}

/// Failure of a single dataset.
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error(transparent)]
    Issue(#[from] IssueError),

    #[error(transparent)]
    Job(#[from] JobError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Local directory or descriptor could not be written.
    #[error(transparent)]
    Store(#[from] StoreError),
}
