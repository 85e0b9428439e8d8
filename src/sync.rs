// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Family reconciliation.
//!
//! One sync run brings the dataset store of a family in line with the
//! registry:
//!
//! 1. Load a snapshot of the registry, and the local dataset store.
//! 2. Pick the family from the command line or the family descriptor.
//! 3. Fold every registry record of the family, or already linked to a
//!    directory, into the descriptor of its directory.
//! 4. Run the issue, registry, and job actions of every touched directory.
//! 5. Write the touched descriptors, then the family descriptor listing
//!    exactly the directories written.
//! 6. Copy static assets into the store.
//!
//! Failures of a single dataset are logged and counted, and never stop the
//! run. Failing to load the registry or the store aborts before anything
//! is written.

use crate::{
    action::{
        issue::{IssueSync, IssueTracker},
        job::{origin_url, Confirm, JobScheduler, JobSync},
        Action, ActionError, DatasetActions,
    },
    config::Settings,
    descriptor::{Descriptor, JenkinsConfig},
    merge::merge,
    registry::{load_snapshot, RecordId, Registry, RegistryError, SourceRecord},
    resolve::{resolve, Skip},
    schema::SchemaValidator,
    store::{DatasetStore, StoreError},
};

use indicatif::ProgressBar;
use std::{
    collections::{BTreeMap, BTreeSet},
    path::PathBuf,
};
use tracing::{debug, error, info, instrument, warn};

/// External systems a run talks to.
///
/// Issue and job sync only happen when their client is present. The job
/// scheduler is connected with the Jenkins block of the family descriptor
/// read by the run itself.
#[derive(Debug)]
pub struct Clients<'a, R, I, F> {
    pub registry: &'a R,
    pub issues: Option<&'a I>,
    pub jobs: Option<F>,
}

/// Dataset that could not be fully reconciled.
#[derive(Debug)]
pub struct DatasetFailure {
    pub dir: String,
    pub error: ActionError,
}

/// Summary of a sync run.
#[derive(Debug, Default)]
pub struct SyncReport {
    /// Family that was reconciled.
    pub family: String,

    /// Directories listed in the family descriptor.
    pub pipelines: Vec<String>,

    /// Directories created by this run.
    pub created: Vec<String>,

    /// Actions planned or performed.
    pub actions: Vec<Action>,

    /// Registry records left alone.
    pub skipped: Vec<Skip>,

    /// Directories with a descriptor that could not be read.
    pub unreadable: Vec<String>,

    pub failures: Vec<DatasetFailure>,

    /// Asset files copied into the store.
    pub assets: Vec<PathBuf>,
}

impl SyncReport {
    /// Whether any dataset failed.
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Merged descriptor of a directory, and the records folded into it.
struct Touched<'s> {
    dir: String,
    descriptor: Descriptor,
    sources: Vec<(&'s RecordId, &'s SourceRecord)>,
}

/// Reconcile the dataset store with the registry.
///
/// # Errors
///
/// - Return [`SyncError::Snapshot`] if the registry cannot be loaded.
/// - Return [`SyncError::Store`] if the dataset store cannot be scanned, or
///   the family descriptor cannot be read or written.
/// - Return [`SyncError::NoFamily`] or [`SyncError::UnknownFamily`] if the
///   family cannot be determined.
#[instrument(skip_all, level = "debug")]
pub async fn sync<R, I, F, J, C>(
    settings: &Settings,
    clients: Clients<'_, R, I, F>,
    confirm: &C,
    bar: &ProgressBar,
) -> Result<SyncReport>
where
    R: Registry,
    I: IssueTracker,
    F: FnOnce(&JenkinsConfig) -> J,
    J: JobScheduler,
    C: Confirm,
{
    bar.set_message("loading registry");
    let snapshot = load_snapshot(clients.registry, &settings.registry)
        .await
        .map_err(SyncError::Snapshot)?;
    debug!("registry holds {} source records", snapshot.sources.len());

    bar.set_message("scanning datasets");
    let store = DatasetStore::open(&settings.dataset_root);
    let mut validator = settings.validate.then(SchemaValidator::new);
    let mut state = store.load(validator.as_mut()).await?;

    let available = || {
        snapshot
            .family_names()
            .into_iter()
            .map(str::to_string)
            .collect::<Vec<_>>()
    };
    let Some(family) = settings.family.clone().or_else(|| state.family.family.clone()) else {
        return Err(SyncError::NoFamily {
            path: store.family_path(),
            available: available(),
        });
    };
    let Some(family_id) = snapshot.family_id(&family) else {
        return Err(SyncError::UnknownFamily {
            name: family,
            available: available(),
        });
    };
    info!("sync family {family:?}");

    let mut report = SyncReport {
        family: family.clone(),
        ..SyncReport::default()
    };

    // Merge phase.
    let mut touched: Vec<Touched<'_>> = Vec::new();
    let mut position = BTreeMap::new();
    let mut unreadable = BTreeSet::new();
    for (id, source) in &snapshot.sources {
        let in_family = source.families.iter().any(|candidate| candidate == family_id);
        if !in_family && state.links.dir_of(id).is_none() {
            continue;
        }

        let resolution = match resolve(id, source, &snapshot.producers, &state.links) {
            Ok(resolution) => resolution,
            Err(skip) => {
                warn!("skip: {skip}");
                report.skipped.push(skip);
                continue;
            }
        };
        let dir = resolution.dir().to_string();

        if state.unreadable.contains(&dir) {
            warn!("record {id} maps to {dir:?} whose descriptor is unreadable, leave it alone");
            unreadable.insert(dir);
            continue;
        }

        state.links.claim(id.as_str(), dir.as_str());
        let record_ids = state.links.records_of(&dir);
        match position.get(&dir) {
            Some(&index) => {
                let entry: &mut Touched<'_> = &mut touched[index];
                let existing = std::mem::take(&mut entry.descriptor);
                entry.descriptor = merge(existing, source, &snapshot, record_ids, true);
                entry.sources.push((id, source));
            }
            None => {
                let existing = state.descriptors.remove(&dir).unwrap_or_default();
                position.insert(dir.clone(), touched.len());
                touched.push(Touched {
                    descriptor: merge(existing, source, &snapshot, record_ids, false),
                    sources: vec![(id, source)],
                    dir,
                });
            }
        }
    }
    report.unreadable = unreadable.iter().cloned().collect();

    // Directories of records that no longer decode stay as they are.
    let mut kept = BTreeSet::new();
    for (id, reason) in &snapshot.rejected {
        if let Some(dir) = state.links.dir_of(id) {
            if !position.contains_key(dir) {
                warn!("keep {dir:?} unchanged until record {id} is fixed");
                kept.insert(dir.to_string());
            }
        }
        report.skipped.push(Skip::Malformed {
            record: id.clone(),
            reason: reason.clone(),
        });
    }

    // Action phase.
    let vocabulary = snapshot.stage_vocabulary();
    let scheduler = match (clients.jobs, &state.family.jenkins) {
        (Some(connect), Some(jenkins)) => Some(connect(jenkins)),
        (None, Some(_)) => {
            warn!("no Jenkins credentials, skip job sync");
            None
        }
        _ => {
            debug!("family has no Jenkins folder, skip job sync");
            None
        }
    };
    let repo_url = state
        .family
        .github
        .as_ref()
        .map(|github| github.clone_url())
        .or_else(|| origin_url(store.root()).or_else(|| origin_url(".")));

    let mut actions = DatasetActions::<R, I, J, C>::new(
        clients.registry,
        &settings.registry,
        settings.writeback.airtable,
    );
    match (clients.issues, &state.family.github) {
        (Some(tracker), Some(github)) => {
            actions = actions.with_issues(IssueSync::new(
                tracker,
                github,
                &vocabulary,
                settings.writeback.github,
            ));
        }
        (None, Some(_)) => warn!("no GitHub token, skip issue sync"),
        _ => debug!("family has no GitHub repository, skip issue sync"),
    }
    match (&scheduler, &state.family.jenkins, repo_url) {
        (Some(scheduler), Some(jenkins), Some(repo_url)) => {
            actions = actions.with_jobs(JobSync::new(
                scheduler,
                &jenkins.path,
                repo_url,
                settings.writeback.jenkins,
                confirm,
            ));
        }
        (Some(_), Some(_), None) => warn!("cannot tell the repository URL, skip job sync"),
        _ => (),
    }

    bar.set_length(touched.len() as u64);
    let mut failed = BTreeSet::new();
    for entry in &mut touched {
        bar.set_message(entry.dir.clone());

        match store.create_dir(&entry.dir) {
            Ok(true) => {
                info!("create directory {:?}", entry.dir);
                report.created.push(entry.dir.clone());
            }
            Ok(false) => (),
            Err(err) => {
                error!("{}: {err}", entry.dir);
                report.failures.push(DatasetFailure {
                    dir: entry.dir.clone(),
                    error: err.into(),
                });
                failed.insert(entry.dir.clone());
                bar.inc(1);
                continue;
            }
        }

        let outcome = actions
            .apply(&entry.dir, &mut entry.descriptor, &entry.sources)
            .await;
        report.actions.extend(outcome.actions);
        for err in outcome.errors {
            error!("{}: {err}", entry.dir);
            report.failures.push(DatasetFailure {
                dir: entry.dir.clone(),
                error: err,
            });
        }

        bar.inc(1);
    }

    // Write phase.
    bar.set_message("writing descriptors");
    let mut pipelines = BTreeSet::new();
    for entry in &touched {
        if failed.contains(&entry.dir) {
            continue;
        }

        match store.write_descriptor(&entry.dir, &entry.descriptor) {
            Ok(()) => {
                pipelines.insert(entry.dir.clone());
            }
            Err(err) => {
                error!("{}: {err}", entry.dir);
                report.failures.push(DatasetFailure {
                    dir: entry.dir.clone(),
                    error: err.into(),
                });
            }
        }
    }
    pipelines.extend(unreadable);
    pipelines.extend(kept);

    let mut family_descriptor = state.family;
    family_descriptor.family = Some(family);
    family_descriptor.pipelines = pipelines.into_iter().collect();
    store.write_family(&family_descriptor)?;
    report.pipelines = family_descriptor.pipelines;

    bar.set_message("copying assets");
    match store.copy_assets(&settings.assets_dir) {
        Ok(copied) => report.assets = copied,
        Err(err) => warn!("{err}"),
    }

    info!(
        "synced {} datasets, {} created, {} skipped, {} failed",
        report.pipelines.len(),
        report.created.len(),
        report.skipped.len(),
        report.failures.len()
    );

    Ok(report)
}

fn bullet_list(names: &[String]) -> String {
    names
        .iter()
        .map(|name| format!(" - {name}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Sync run error types.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Registry snapshot cannot be loaded.
    #[error("failed to load registry snapshot")]
    Snapshot(#[source] RegistryError),

    /// Dataset store cannot be read or the family descriptor written.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// No family given and none recorded.
    #[error(
        "no family given and none recorded in {:?}, choose one with --family:\n{}",
        path.display(),
        bullet_list(available)
    )]
    NoFamily {
        path: PathBuf,
        available: Vec<String>,
    },

    /// Family is not in the registry.
    #[error("family {name:?} does not exist, choose from:\n{}", bullet_list(available))]
    UnknownFamily { name: String, available: Vec<String> },
}

/// Friendly result alias :3
pub type Result<T, E = SyncError> = std::result::Result<T, E>;
