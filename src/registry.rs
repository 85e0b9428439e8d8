// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Registry snapshot.
//!
//! The __registry__ is the Airtable base holding every candidate dataset
//! transformation. Four of its tables matter to reposync:
//!
//! - __Source Data__: one row per dataset transformation candidate.
//! - __Family__: named groupings of datasets.
//! - __Dataset Producer__: organisations publishing datasets.
//! - __Type__: kinds of source data, e.g., spreadsheets or APIs.
//!
//! Source rows refer to the other three tables through lists of record
//! identifiers. A run reads all four tables once into a [`Snapshot`], which
//! is never refreshed while the run lasts. Rows are decoded into typed
//! records straight after the fetch, so nothing past this module handles
//! raw Airtable field maps.
//!
//! The registry is only ever written through [`write_issue`], which records
//! the GitHub issue belonging to a source row.

pub mod airtable;

use crate::{config::RegistrySettings, descriptor::OneOrMany};

use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, instrument, warn};

/// Airtable record identifier, e.g., `recXXXXXXXXXXXXXX`.
pub type RecordId = String;

/// Column holding the GitHub issue number of a source row.
pub const ISSUE_NUMBER_FIELD: &str = "GitHub Issue";

/// Column holding the GitHub issue URL of a source row.
pub const ISSUE_URL_FIELD: &str = "GitHub Issue URL";

/// Untyped registry row exactly as Airtable returns it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawRecord {
    pub id: RecordId,

    #[serde(default)]
    pub fields: Map<String, Value>,
}

/// Row of the Source Data table.
#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
pub struct SourceRecord {
    #[serde(rename = "Name", default)]
    pub name: Option<String>,

    #[serde(rename = "Producer", default)]
    pub producers: Vec<RecordId>,

    #[serde(rename = "Family", default)]
    pub families: Vec<RecordId>,

    #[serde(rename = "Data type", default)]
    pub data_types: Vec<RecordId>,

    #[serde(rename = "Description", default)]
    pub description: Option<String>,

    #[serde(rename = "Landing Page", default)]
    pub landing_page: Option<String>,

    #[serde(rename = "Route from landing page to data", default)]
    pub route_to_data: Option<String>,

    #[serde(rename = "Last Published", default)]
    pub last_published: Option<String>,

    #[serde(rename = "Sizing Notes", default)]
    pub sizing_notes: Option<String>,

    #[serde(rename = "Notes", default)]
    pub notes: Option<String>,

    #[serde(rename = "BA Stage", default)]
    pub ba_stage: Option<OneOrMany<String>>,

    #[serde(rename = "Tech Stage", default)]
    pub tech_stage: Option<OneOrMany<String>>,

    #[serde(rename = "GitHub Issue", default)]
    pub issue_number: Option<u64>,

    #[serde(rename = "GitHub Issue URL", default)]
    pub issue_url: Option<String>,
}

impl SourceRecord {
    /// Trimmed title, if the row has a non-blank one.
    pub fn title(&self) -> Option<&str> {
        self.name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }

    /// Every stage value of the row, business analysis stages first.
    pub fn stage_tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = Vec::new();
        for stage in [&self.ba_stage, &self.tech_stage].into_iter().flatten() {
            for tag in stage.iter() {
                if !tags.contains(tag) {
                    tags.push(tag.clone());
                }
            }
        }

        tags
    }
}

/// Row of the Family table.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
pub struct Family {
    #[serde(rename = "Name", default)]
    pub name: String,
}

/// Row of the Dataset Producer table.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
pub struct Producer {
    /// Short name, e.g., "ONS".
    #[serde(rename = "Name", default)]
    pub name: String,

    #[serde(rename = "Full Name", default)]
    pub full_name: Option<String>,
}

impl Producer {
    /// Full name when present and non-blank, otherwise the short name.
    pub fn display_name(&self) -> &str {
        match self.full_name.as_deref().map(str::trim) {
            Some(full_name) if !full_name.is_empty() => full_name,
            _ => self.name.trim(),
        }
    }
}

/// Row of the Type table.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
pub struct DataType {
    #[serde(rename = "Name", default)]
    pub name: String,
}

/// All registry rows a run works from.
///
/// Sources keep registry order, which decides which source record gets to
/// set the baseline of a directory shared by several records.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Snapshot {
    pub sources: Vec<(RecordId, SourceRecord)>,
    pub families: BTreeMap<RecordId, Family>,
    pub producers: BTreeMap<RecordId, Producer>,
    pub types: BTreeMap<RecordId, DataType>,

    /// Source rows left out because they do not decode, with the reason.
    pub rejected: Vec<(RecordId, String)>,
}

impl Snapshot {
    /// Identifier of the family with the given name.
    pub fn family_id(&self, name: &str) -> Option<&str> {
        self.families
            .iter()
            .find(|(_, family)| family.name == name)
            .map(|(id, _)| id.as_str())
    }

    /// Names of every family, in registry identifier order.
    pub fn family_names(&self) -> Vec<&str> {
        self.families
            .values()
            .map(|family| family.name.as_str())
            .collect()
    }

    /// Every stage value seen on any source record.
    ///
    /// Labels inside this vocabulary are owned by reposync, labels outside
    /// of it are left alone.
    pub fn stage_vocabulary(&self) -> BTreeSet<String> {
        self.sources
            .iter()
            .flat_map(|(_, source)| source.stage_tags())
            .collect()
    }
}

/// Access to registry tables.
#[allow(async_fn_in_trait)]
pub trait Registry {
    /// Fetch every row of a table.
    async fn list_records(&self, table: &str) -> Result<Vec<RawRecord>>;

    /// Overwrite some fields of one row.
    async fn update_record(&self, table: &str, id: &str, fields: Map<String, Value>) -> Result<()>;
}

/// Fetch all four tables and decode them into a [`Snapshot`].
///
/// Any fetch failure aborts the load. A partial snapshot is never returned.
/// A source row that does not decode is a problem of that row alone, so it
/// is only listed in [`Snapshot::rejected`]. Family, producer, and type rows
/// name things in every descriptor and must all decode.
///
/// # Errors
///
/// - Return [`RegistryError::Decode`] if a family, producer, or type row
///   does not have the expected shape.
/// - Return whatever the registry client fails with.
#[instrument(skip(registry, settings), level = "debug")]
pub async fn load_snapshot(registry: &impl Registry, settings: &RegistrySettings) -> Result<Snapshot> {
    info!("fetch registry tables from base {}", settings.base);
    let (sources, rejected) = decode_sources(registry.list_records(&settings.sources).await?);
    let families = decode_table(&settings.families, registry.list_records(&settings.families).await?)?;
    let producers = decode_table(&settings.producers, registry.list_records(&settings.producers).await?)?;
    let types = decode_table(&settings.types, registry.list_records(&settings.types).await?)?;

    debug!(
        "registry holds {} sources, {} families, {} producers, {} types",
        sources.len(),
        families.len(),
        producers.len(),
        types.len()
    );

    Ok(Snapshot {
        sources,
        families: families.into_iter().collect(),
        producers: producers.into_iter().collect(),
        types: types.into_iter().collect(),
        rejected,
    })
}

type Rejected = Vec<(RecordId, String)>;

fn decode_sources(records: Vec<RawRecord>) -> (Vec<(RecordId, SourceRecord)>, Rejected) {
    let mut sources = Vec::with_capacity(records.len());
    let mut rejected = Vec::new();
    for RawRecord { id, fields } in records {
        match serde_json::from_value(Value::Object(fields)) {
            Ok(source) => sources.push((id, source)),
            Err(err) => {
                warn!("source record {id} does not decode: {err}");
                rejected.push((id, err.to_string()));
            }
        }
    }

    (sources, rejected)
}

fn decode_table<T>(table: &str, records: Vec<RawRecord>) -> Result<Vec<(RecordId, T)>>
where
    T: DeserializeOwned,
{
    records
        .into_iter()
        .map(|RawRecord { id, fields }| match serde_json::from_value(Value::Object(fields)) {
            Ok(decoded) => Ok((id, decoded)),
            Err(err) => Err(RegistryError::Decode {
                source: err,
                table: table.to_string(),
                id,
            }),
        })
        .collect()
}

/// Record the GitHub issue of a source row.
///
/// # Errors
///
/// - Return whatever the registry client fails with.
#[instrument(skip(registry, settings), level = "debug")]
pub async fn write_issue(
    registry: &impl Registry,
    settings: &RegistrySettings,
    id: &str,
    number: u64,
    url: &str,
) -> Result<()> {
    let mut fields = Map::new();
    fields.insert(ISSUE_NUMBER_FIELD.into(), json!(number));
    fields.insert(ISSUE_URL_FIELD.into(), json!(url));
    registry.update_record(&settings.sources, id, fields).await
}

/// Registry error types.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Airtable request failed.
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// Base URL or table name does not form a valid URL.
    #[error("invalid registry URL {url:?}")]
    InvalidUrl { url: String },

    /// Row does not match its typed layout.
    #[error("failed to decode record {id} of table {table:?}")]
    Decode {
        #[source]
        source: serde_json::Error,
        table: String,
        id: RecordId,
    },
}

/// Friendly result alias :3
pub type Result<T, E = RegistryError> = std::result::Result<T, E>;
