// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Dataset store management.
//!
//! Reposync keeps every dataset of a family together in one place called
//! the __dataset store__, usually the `datasets` directory of a family
//! repository.
//!
//! # Dataset Store Layout
//!
//! ```text
//! datasets/
//! ├── info.json              family descriptor
//! ├── index.html             static assets, copied once
//! ├── ONS-house-prices/
//! │   └── info.json          dataset descriptor
//! └── WG-affordable-housing/
//!     └── info.json
//! ```
//!
//! Descriptors are found at any depth, since a title containing `/` names
//! a nested directory. A directory without a descriptor is not a dataset.
//!
//! # Links
//!
//! Each dataset descriptor names the registry records it was built from
//! in `transform.airtable`. Reading these back yields the __link index__,
//! which maps registry records to dataset directories. The index is what
//! keeps a directory name stable once chosen, even when the title of its
//! registry record changes later.

use crate::{
    descriptor::{
        read_json, write_json, Descriptor, DescriptorError, FamilyDescriptor, DESCRIPTOR_FILE,
    },
    registry::RecordId,
    schema::SchemaValidator,
};

use serde_json::Value;
use std::{
    collections::{BTreeMap, BTreeSet},
    fs::{copy, read_dir, read_to_string},
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument, warn};

/// Two directories claiming the same registry record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkConflict {
    pub record: RecordId,

    /// Directory that keeps the link.
    pub kept: String,

    /// Directory whose claim is ignored.
    pub ignored: String,
}

/// Outcome of linking a registry record to a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    /// Record was not linked before.
    New,

    /// Record was already linked to the same directory.
    Existing,

    /// Record is linked to another directory, which keeps it.
    Conflict(LinkConflict),
}

/// Links between registry records and dataset directories.
///
/// # Invariant
///
/// - A registry record links to at most one directory. The first claim
///   wins.
/// - A directory keeps every record it claims, in discovery order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LinkIndex {
    by_record: BTreeMap<RecordId, String>,
    by_dir: BTreeMap<String, Vec<RecordId>>,
}

impl LinkIndex {
    /// Construct new empty link index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory a record links to.
    pub fn dir_of(&self, record: &str) -> Option<&str> {
        self.by_record.get(record).map(String::as_str)
    }

    /// Records a directory claims.
    pub fn records_of(&self, dir: &str) -> &[RecordId] {
        self.by_dir.get(dir).map(Vec::as_slice).unwrap_or_default()
    }

    /// Link a record to a directory.
    pub fn claim(&mut self, record: impl Into<RecordId>, dir: impl Into<String>) -> Claim {
        let record = record.into();
        let dir = dir.into();

        let claimed = self.by_dir.entry(dir.clone()).or_default();
        if !claimed.contains(&record) {
            claimed.push(record.clone());
        }

        match self.by_record.get(&record) {
            Some(kept) if *kept == dir => Claim::Existing,
            Some(kept) => Claim::Conflict(LinkConflict {
                record,
                kept: kept.clone(),
                ignored: dir,
            }),
            None => {
                self.by_record.insert(record, dir);
                Claim::New
            }
        }
    }
}

/// Everything read from the dataset store before reconciling.
#[derive(Debug, Default, Clone)]
pub struct LocalState {
    /// Family descriptor, or an empty one if missing.
    pub family: FamilyDescriptor,

    /// Parsed dataset descriptors by directory name.
    pub descriptors: BTreeMap<String, Descriptor>,

    /// Directories whose descriptor could not be parsed.
    ///
    /// These are never written during the run.
    pub unreadable: BTreeSet<String>,

    pub links: LinkIndex,

    /// Duplicate claims found while scanning.
    pub conflicts: Vec<LinkConflict>,
}

/// Dataset store on the local file system.
#[derive(Debug, Clone)]
pub struct DatasetStore {
    root: PathBuf,
}

impl DatasetStore {
    /// Open dataset store at target path.
    ///
    /// The directory is not created until something is written to it.
    pub fn open(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Path of the dataset store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the family descriptor.
    pub fn family_path(&self) -> PathBuf {
        self.root.join(DESCRIPTOR_FILE)
    }

    /// Path of the descriptor of a dataset directory.
    pub fn descriptor_path(&self, dir: &str) -> PathBuf {
        self.root.join(dir).join(DESCRIPTOR_FILE)
    }

    /// Read the family descriptor.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::Family`] if the family descriptor exists but
    ///   cannot be read or parsed.
    pub fn read_family(&self) -> Result<FamilyDescriptor> {
        let path = self.family_path();
        if !path.exists() {
            debug!("no family descriptor at {:?}", path.display());
            return Ok(FamilyDescriptor::default());
        }

        read_json(&path).map_err(StoreError::Family)
    }

    /// Scan the dataset store.
    ///
    /// Subdirectories are visited in lexicographic order, so the winner of a
    /// duplicate link is stable across runs. A descriptor that cannot be
    /// parsed is reported and left out; it never aborts the scan. Schema
    /// violations are only reported.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::Family`] if the family descriptor is broken.
    /// - Return [`StoreError::Scan`] if the store directory cannot be listed.
    #[instrument(skip(self, validator), level = "debug")]
    pub async fn load(&self, mut validator: Option<&mut SchemaValidator>) -> Result<LocalState> {
        let mut state = LocalState {
            family: self.read_family()?,
            ..LocalState::default()
        };

        for dir in self.dataset_dirs()? {
            let path = self.descriptor_path(&dir);
            let data = match read_to_string(&path) {
                Ok(data) => data,
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => {
                    warn!("cannot read {:?}: {err}", path.display());
                    state.unreadable.insert(dir);
                    continue;
                }
            };

            let value: Value = match serde_json::from_str(&data) {
                Ok(value) => value,
                Err(err) => {
                    warn!("malformed JSON in {:?}: {err}", path.display());
                    state.unreadable.insert(dir);
                    continue;
                }
            };

            if let Some(validator) = validator.as_deref_mut() {
                for violation in validator.violations(&value).await {
                    warn!("{:?} breaks its schema: {violation}", path.display());
                }
            }

            let descriptor: Descriptor = match serde_json::from_value(value) {
                Ok(descriptor) => descriptor,
                Err(err) => {
                    warn!("unexpected descriptor layout in {:?}: {err}", path.display());
                    state.unreadable.insert(dir);
                    continue;
                }
            };

            for record in descriptor.record_ids() {
                if let Claim::Conflict(conflict) = state.links.claim(record, dir.as_str()) {
                    warn!(
                        "record {} is claimed by both {:?} and {:?}, keeping {:?}",
                        conflict.record, conflict.kept, conflict.ignored, conflict.kept
                    );
                    state.conflicts.push(conflict);
                }
            }
            state.descriptors.insert(dir, descriptor);
        }

        debug!(
            "loaded {} descriptors, {} unreadable, {} links in conflict",
            state.descriptors.len(),
            state.unreadable.len(),
            state.conflicts.len()
        );

        Ok(state)
    }

    /// Directories holding a dataset descriptor, relative to the store.
    ///
    /// Titles may contain `/`, so a dataset can sit below another directory.
    /// Nested names always use `/` as separator. Hidden directories are
    /// ignored.
    fn dataset_dirs(&self) -> Result<Vec<String>> {
        if let Err(err) = read_dir(&self.root) {
            if err.kind() == ErrorKind::NotFound {
                return Ok(Vec::new());
            }
            return Err(StoreError::Scan {
                source: err,
                path: self.root.clone(),
            });
        }

        let pattern = format!(
            "{}/**/{DESCRIPTOR_FILE}",
            glob::Pattern::escape(self.root.to_string_lossy().as_ref())
        );
        let options = glob::MatchOptions {
            require_literal_leading_dot: true,
            ..glob::MatchOptions::default()
        };
        let entries = glob::glob_with(&pattern, options).map_err(|err| StoreError::Scan {
            source: std::io::Error::new(ErrorKind::InvalidInput, err),
            path: self.root.clone(),
        })?;

        let mut dirs = Vec::new();
        for entry in entries {
            let path = match entry {
                Ok(path) => path,
                Err(err) => {
                    warn!("cannot scan {:?}: {err}", err.path().display());
                    continue;
                }
            };

            // INVARIANT: The family descriptor lives at the root of the store.
            let Some(dir) = path.parent().and_then(|dir| dir.strip_prefix(&self.root).ok()) else {
                continue;
            };
            if dir.as_os_str().is_empty() {
                continue;
            }

            let name = dir
                .components()
                .map(|part| part.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            dirs.push(name);
        }
        dirs.sort();
        dirs.dedup();

        Ok(dirs)
    }

    /// Create a dataset directory.
    ///
    /// Returns `true` if the directory did not exist before.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::CreateDir`] if the directory cannot be created.
    pub fn create_dir(&self, dir: &str) -> Result<bool> {
        let path = self.root.join(dir);
        mkdirp::mkdirp(&path)
            .map(|created| created.is_some())
            .map_err(|err| StoreError::CreateDir { source: err, path })
    }

    /// Write the descriptor of a dataset directory.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::CreateDir`] if the directory cannot be created.
    /// - Return [`StoreError::Descriptor`] if the descriptor cannot be written.
    pub fn write_descriptor(&self, dir: &str, descriptor: &Descriptor) -> Result<()> {
        self.create_dir(dir)?;
        Ok(write_json(self.descriptor_path(dir), descriptor)?)
    }

    /// Write the family descriptor.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::CreateDir`] if the store cannot be created.
    /// - Return [`StoreError::Descriptor`] if the descriptor cannot be written.
    pub fn write_family(&self, family: &FamilyDescriptor) -> Result<()> {
        mkdirp::mkdirp(&self.root).map_err(|err| StoreError::CreateDir {
            source: err,
            path: self.root.clone(),
        })?;
        Ok(write_json(self.family_path(), family)?)
    }

    /// Copy static assets into the store.
    ///
    /// Files are copied recursively, keeping their relative path. A file
    /// that already exists in the store is never replaced, it may have been
    /// customized. Returns the paths that were copied.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::Assets`] if an asset cannot be listed or
    ///   copied.
    #[instrument(skip(self, assets), level = "debug")]
    pub fn copy_assets(&self, assets: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
        let assets = assets.as_ref();
        if !assets.is_dir() {
            debug!("no asset directory at {:?}", assets.display());
            return Ok(Vec::new());
        }

        let pattern = format!(
            "{}/**/*",
            glob::Pattern::escape(assets.to_string_lossy().as_ref())
        );
        let entries = glob::glob(&pattern).map_err(|err| StoreError::Assets {
            message: err.to_string(),
            path: assets.to_path_buf(),
        })?;

        let mut copied = Vec::new();
        for entry in entries {
            let source = entry.map_err(|err| StoreError::Assets {
                message: err.to_string(),
                path: assets.to_path_buf(),
            })?;
            if !source.is_file() {
                continue;
            }

            let Ok(relative) = source.strip_prefix(assets) else {
                continue;
            };
            let target = self.root.join(relative);
            if target.exists() {
                debug!("keep existing {:?}", target.display());
                continue;
            }

            let io_error = |err: std::io::Error| StoreError::Assets {
                message: err.to_string(),
                path: source.clone(),
            };
            if let Some(parent) = target.parent() {
                mkdirp::mkdirp(parent).map_err(io_error)?;
            }
            copy(&source, &target).map_err(io_error)?;
            info!("copied {:?}", target.display());
            copied.push(target);
        }

        Ok(copied)
    }
}

/// Dataset store error types.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Family descriptor exists but is unusable.
    #[error("broken family descriptor")]
    Family(#[source] DescriptorError),

    /// Dataset store cannot be listed.
    #[error("failed to scan dataset store at {:?}", path.display())]
    Scan {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Directory cannot be created.
    #[error("failed to create directory {:?}", path.display())]
    CreateDir {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Descriptor cannot be written.
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),

    /// Static asset cannot be listed or copied.
    #[error("failed to copy asset {:?}: {message}", path.display())]
    Assets { message: String, path: PathBuf },
}

/// Friendly result alias :3
pub type Result<T, E = StoreError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs::{create_dir_all, read_to_string, write};

    fn dataset(root: &Path, dir: &str, content: &str) -> anyhow::Result<()> {
        create_dir_all(root.join(dir))?;
        write(root.join(dir).join(DESCRIPTOR_FILE), content)?;
        Ok(())
    }

    #[test]
    fn first_claim_wins() {
        let mut links = LinkIndex::new();

        assert_eq!(links.claim("rec1", "a"), Claim::New);
        assert_eq!(links.claim("rec1", "a"), Claim::Existing);
        assert_eq!(
            links.claim("rec1", "b"),
            Claim::Conflict(LinkConflict {
                record: "rec1".into(),
                kept: "a".into(),
                ignored: "b".into(),
            })
        );
        assert_eq!(links.dir_of("rec1"), Some("a"));
        assert_eq!(links.records_of("b"), ["rec1".to_string()]);
    }

    #[tokio::test]
    async fn duplicate_links_are_reported_once() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        dataset(root.path(), "b-second", r#"{"transform": {"airtable": "rec123"}}"#)?;
        dataset(root.path(), "a-first", r#"{"transform": {"airtable": ["rec123", "rec9"]}}"#)?;

        let state = DatasetStore::open(root.path()).load(None).await?;

        assert_eq!(state.conflicts.len(), 1);
        assert_eq!(state.links.dir_of("rec123"), Some("a-first"));
        assert_eq!(state.links.dir_of("rec9"), Some("a-first"));

        Ok(())
    }

    #[tokio::test]
    async fn malformed_descriptors_are_skipped() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        dataset(root.path(), "broken", "{ not json")?;
        dataset(root.path(), "wrong-shape", r#"{"families": "Housing"}"#)?;
        dataset(root.path(), "fine", r#"{"title": "Fine", "transform": {"airtable": "rec1"}}"#)?;
        create_dir_all(root.path().join("no-descriptor"))?;

        let state = DatasetStore::open(root.path()).load(None).await?;

        assert_eq!(
            state.unreadable.into_iter().collect::<Vec<_>>(),
            vec!["broken".to_string(), "wrong-shape".to_string()]
        );
        assert_eq!(state.descriptors.keys().collect::<Vec<_>>(), vec!["fine"]);
        assert_eq!(state.links.dir_of("rec1"), Some("fine"));

        Ok(())
    }

    #[tokio::test]
    async fn nested_datasets_are_indexed() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        dataset(root.path(), "ONS-Income/expenditure", r#"{"transform": {"airtable": "rec9"}}"#)?;
        dataset(root.path(), ".git/hooks", r#"{"transform": {"airtable": "rec8"}}"#)?;
        write(root.path().join(DESCRIPTOR_FILE), r#"{"family": "Housing"}"#)?;

        let state = DatasetStore::open(root.path()).load(None).await?;

        assert_eq!(
            state.descriptors.keys().collect::<Vec<_>>(),
            vec!["ONS-Income/expenditure"]
        );
        assert_eq!(state.links.dir_of("rec9"), Some("ONS-Income/expenditure"));
        assert_eq!(state.links.dir_of("rec8"), None);

        Ok(())
    }

    #[tokio::test]
    async fn missing_store_loads_empty() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let state = DatasetStore::open(root.path().join("datasets")).load(None).await?;

        assert!(state.descriptors.is_empty());
        assert_eq!(state.family, FamilyDescriptor::default());

        Ok(())
    }

    #[test]
    fn assets_never_replace_existing_files() -> anyhow::Result<()> {
        let assets = tempfile::tempdir()?;
        let root = tempfile::tempdir()?;
        create_dir_all(assets.path().join("css"))?;
        write(assets.path().join("index.html"), "template")?;
        write(assets.path().join("css").join("style.css"), "body {}")?;
        write(root.path().join("index.html"), "customized")?;

        let store = DatasetStore::open(root.path());
        let copied = store.copy_assets(assets.path())?;

        assert_eq!(copied, vec![root.path().join("css").join("style.css")]);
        assert_eq!(read_to_string(root.path().join("index.html"))?, "customized");

        Ok(())
    }
}
