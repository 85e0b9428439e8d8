// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Descriptor file layout.
//!
//! Every dataset directory owns one `info.json` __descriptor__ that records
//! the reconciled registry metadata of the dataset. The dataset root itself
//! owns a __family descriptor__ listing the family name and the directory
//! name of every pipeline.
//!
//! Descriptors are shared with people and other tools, so reposync treats
//! them with care:
//!
//! - Keys reposync does not know about survive a rewrite untouched, both at
//!   the top level and inside the `extract` and `transform` blocks.
//! - Output is stable: keys are sorted at every level and indented with four
//!   spaces, so re-running with unchanged input yields identical bytes.
//! - Files are replaced atomically through a temporary sibling file.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{ser::PrettyFormatter, Map, Serializer, Value};
use std::{
    fs::read_to_string,
    io::Write,
    path::{Path, PathBuf},
    slice,
};
use tempfile::NamedTempFile;

/// File name of every descriptor.
pub const DESCRIPTOR_FILE: &str = "info.json";

/// Either a single value or a list of values.
///
/// Several descriptor fields start out as a scalar and grow into a list
/// once more than one value applies, e.g., `transform.airtable` for a
/// directory fed by several registry records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    /// Collapse a list into a scalar when it holds exactly one value.
    ///
    /// Returns `None` for an empty list.
    pub fn from_vec(mut values: Vec<T>) -> Option<Self> {
        match values.len() {
            0 => None,
            1 => values.pop().map(Self::One),
            _ => Some(Self::Many(values)),
        }
    }

    /// Iterate over contained values.
    pub fn iter(&self) -> slice::Iter<'_, T> {
        match self {
            Self::One(value) => slice::from_ref(value).iter(),
            Self::Many(values) => values.iter(),
        }
    }

    /// Convert into a list of values.
    pub fn into_vec(self) -> Vec<T> {
        match self {
            Self::One(value) => vec![value],
            Self::Many(values) => values,
        }
    }
}

/// Descriptor of a single dataset directory.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Descriptor {
    /// URL of the JSON schema describing this file.
    #[serde(rename = "$schema", skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(rename = "landingPage", skip_serializing_if = "Option::is_none")]
    pub landing_page: Option<OneOrMany<String>>,

    #[serde(rename = "datasetNotes", skip_serializing_if = "Option::is_none")]
    pub dataset_notes: Option<OneOrMany<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub published: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub families: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub extract: Option<Extract>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub transform: Option<Transform>,

    #[serde(rename = "sizingNotes", skip_serializing_if = "Option::is_none")]
    pub sizing_notes: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,

    /// Keys maintained by people or other tools.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Descriptor {
    /// Registry records this descriptor claims through `transform.airtable`.
    pub fn record_ids(&self) -> Vec<String> {
        self.transform
            .as_ref()
            .and_then(|transform| transform.airtable.clone())
            .map(OneOrMany::into_vec)
            .unwrap_or_default()
    }

    /// Issue number recorded in `transform.main_issue`.
    pub fn main_issue(&self) -> Option<u64> {
        self.transform
            .as_ref()
            .and_then(|transform| transform.main_issue)
    }

    /// Landing pages as a list, whichever form they are stored in.
    pub fn landing_pages(&self) -> Vec<String> {
        self.landing_page
            .clone()
            .map(OneOrMany::into_vec)
            .unwrap_or_default()
    }

    /// Mutable access to `extract`, created on demand.
    pub fn extract_mut(&mut self) -> &mut Extract {
        self.extract.get_or_insert_with(Extract::default)
    }

    /// Mutable access to `transform`, created on demand.
    pub fn transform_mut(&mut self) -> &mut Transform {
        self.transform.get_or_insert_with(Transform::default)
    }
}

/// Extraction block of a descriptor.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Extract {
    /// Comma separated data type names.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    /// Business analysis stage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<OneOrMany<String>>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Transformation block of a descriptor.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Transform {
    /// Registry records folded into this dataset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub airtable: Option<OneOrMany<String>>,

    /// GitHub issue tracking the transformation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub main_issue: Option<u64>,

    /// Technical stage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<OneOrMany<String>>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Descriptor of the dataset root.
///
/// The `github` and `jenkins` blocks are written by the operator. Reposync
/// reads them to decide whether issue and job sync apply, and writes them
/// back unchanged.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FamilyDescriptor {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub family: Option<String>,

    pub pipelines: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub github: Option<GithubConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub jenkins: Option<JenkinsConfig>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// GitHub settings of a family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GithubConfig {
    /// Repository in `owner/name` form.
    pub repo: String,

    /// Name of the project board new work is queued on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl GithubConfig {
    /// Clone URL of the repository.
    pub fn clone_url(&self) -> String {
        format!("https://github.com/{}.git", self.repo)
    }
}

/// Jenkins settings of a family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JenkinsConfig {
    /// Root URL of the Jenkins server.
    pub base: String,

    /// Folder path jobs of this family live under.
    #[serde(default)]
    pub path: Vec<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Render value as pretty JSON with sorted keys and four space indents.
///
/// # Errors
///
/// - Return [`DescriptorError::Serialize`] if the value cannot be
///   represented as JSON.
pub fn to_pretty_json(value: &impl Serialize) -> Result<String> {
    let value = sorted(serde_json::to_value(value).map_err(DescriptorError::Serialize)?);

    let mut buffer = Vec::new();
    let mut serializer = Serializer::with_formatter(&mut buffer, PrettyFormatter::with_indent(b"    "));
    value
        .serialize(&mut serializer)
        .map_err(DescriptorError::Serialize)?;
    buffer.push(b'\n');

    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

/// Rebuild every object with its keys in lexicographic order.
fn sorted(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries = map.into_iter().collect::<Vec<_>>();
            entries.sort_by(|(left, _), (right, _)| left.cmp(right));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(key, value)| (key, sorted(value)))
                    .collect(),
            )
        }
        Value::Array(values) => Value::Array(values.into_iter().map(sorted).collect()),
        value => value,
    }
}

/// Read and parse a JSON file.
///
/// # Errors
///
/// - Return [`DescriptorError::Read`] if the file cannot be read.
/// - Return [`DescriptorError::Parse`] if the file is not valid JSON of the
///   expected shape.
pub fn read_json<T>(path: impl AsRef<Path>) -> Result<T>
where
    T: DeserializeOwned,
{
    let path = path.as_ref();
    let data = read_to_string(path).map_err(|err| DescriptorError::Read {
        source: err,
        path: path.to_path_buf(),
    })?;

    serde_json::from_str(&data).map_err(|err| DescriptorError::Parse {
        source: err,
        path: path.to_path_buf(),
    })
}

/// Atomically replace a file with the pretty JSON form of a value.
///
/// Content goes to a temporary file in the same directory first, which is
/// then renamed over the target. Readers never observe a partial file.
///
/// # Errors
///
/// - Return [`DescriptorError::Serialize`] if the value cannot be
///   represented as JSON.
/// - Return [`DescriptorError::Write`] if any file operation fails.
pub fn write_json(path: impl AsRef<Path>, value: &impl Serialize) -> Result<()> {
    let path = path.as_ref();
    let content = to_pretty_json(value)?;
    let write_error = |err| DescriptorError::Write {
        source: err,
        path: path.to_path_buf(),
    };

    let dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut file = NamedTempFile::new_in(dir).map_err(write_error)?;
    file.write_all(content.as_bytes()).map_err(write_error)?;
    file.as_file().sync_all().map_err(write_error)?;
    file.persist(path).map_err(|err| write_error(err.error))?;

    Ok(())
}

/// Descriptor error types.
#[derive(Debug, thiserror::Error)]
pub enum DescriptorError {
    /// Descriptor cannot be read.
    #[error("failed to read {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Descriptor is not valid JSON, or has unexpected value types.
    #[error("failed to parse {:?}", path.display())]
    Parse {
        #[source]
        source: serde_json::Error,
        path: PathBuf,
    },

    /// Value cannot be rendered as JSON.
    #[error(transparent)]
    Serialize(serde_json::Error),

    /// Descriptor cannot be written.
    #[error("failed to write {:?}", path.display())]
    Write {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = DescriptorError> = std::result::Result<T, E>;
