// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Two layers of configuration feed a sync run. The __tool configuration__
//! is an optional TOML file that names the Airtable base, its tables, and
//! the static asset directory. Every key has a default, so most operators
//! never write one. The __run settings__ combine the tool configuration with
//! command line flags, and are built exactly once before a run begins.
//!
//! Family specific configuration (GitHub repository, Jenkins folder) is not
//! part of this module. It lives in the family descriptor of the dataset
//! root, see [`FamilyDescriptor`](crate::descriptor::FamilyDescriptor).

use crate::path::default_assets_dir;

use serde::Deserialize;
use std::{
    fs::read_to_string,
    io::ErrorKind,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::debug;

/// Tool configuration layout.
///
/// # General Layout
///
/// ```toml
/// [registry]
/// base = "appb66460atpZjzMq"
/// api_url = "https://api.airtable.com/v0"
/// sources = "Source Data"
/// families = "Family"
/// producers = "Dataset Producer"
/// types = "Type"
///
/// [assets]
/// path = "$XDG_DATA_HOME/reposync/templates"
/// ```
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    /// Where registry records are fetched from.
    pub registry: RegistrySettings,

    /// Static presentation assets.
    pub assets: AssetSettings,
}

impl ToolConfig {
    /// Load tool configuration from target path.
    ///
    /// A missing file is not an error, the default configuration is used
    /// instead.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Read`] if the file exists but cannot be read.
    /// - Return [`ConfigError::Deserialize`] if the file is not valid TOML.
    /// - Return [`ConfigError::ShellExpansion`] if the asset path cannot be
    ///   expanded.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match read_to_string(path) {
            Ok(data) => data.parse(),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("no tool configuration at {:?}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(err) => Err(ConfigError::Read {
                source: err,
                path: path.to_path_buf(),
            }),
        }
    }
}

impl FromStr for ToolConfig {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut config: ToolConfig = toml::de::from_str(data).map_err(ConfigError::Deserialize)?;

        // INVARIANT: Perform shell expansion on asset directory path.
        config.assets.path = PathBuf::from(
            shellexpand::full(config.assets.path.to_string_lossy().as_ref())
                .map_err(ConfigError::ShellExpansion)?
                .into_owned(),
        );

        Ok(config)
    }
}

/// Airtable base and table names.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize)]
#[serde(default)]
pub struct RegistrySettings {
    /// Identifier of the Airtable base.
    pub base: String,

    /// Root of the Airtable REST API.
    pub api_url: String,

    /// Table of source records.
    pub sources: String,

    /// Table of dataset families.
    pub families: String,

    /// Table of dataset producers.
    pub producers: String,

    /// Table of data types.
    pub types: String,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            base: "appb66460atpZjzMq".into(),
            api_url: "https://api.airtable.com/v0".into(),
            sources: "Source Data".into(),
            families: "Family".into(),
            producers: "Dataset Producer".into(),
            types: "Type".into(),
        }
    }
}

/// Static asset settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize)]
#[serde(default)]
pub struct AssetSettings {
    /// Directory whose contents are copied into the dataset root.
    pub path: PathBuf,
}

impl Default for AssetSettings {
    fn default() -> Self {
        Self {
            path: default_assets_dir().unwrap_or_else(|_| PathBuf::from("templates")),
        }
    }
}

/// Which external systems a run may change.
///
/// Without a flag, the matching actions are only reported.
#[derive(Default, Debug, PartialEq, Eq, Clone, Copy)]
pub struct Writeback {
    /// Create issues, sync labels and project cards on GitHub.
    pub github: bool,

    /// Create and reconfigure Jenkins jobs.
    pub jenkins: bool,

    /// Write issue numbers back into Airtable.
    pub airtable: bool,
}

/// Settings of a single sync run.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Family requested on the command line.
    pub family: Option<String>,

    /// Directory holding the family descriptor and one directory per dataset.
    pub dataset_root: PathBuf,

    /// Side-effect gates for the external systems.
    pub writeback: Writeback,

    /// Validate descriptors against the schema named by their `$schema` key.
    pub validate: bool,

    /// Reconfigure jobs without asking.
    pub assume_yes: bool,

    /// Static asset directory.
    pub assets_dir: PathBuf,

    /// Airtable base and tables.
    pub registry: RegistrySettings,
}

impl Settings {
    /// Construct run settings for a dataset root with everything else taken
    /// from tool configuration.
    pub fn new(dataset_root: impl Into<PathBuf>, config: ToolConfig) -> Self {
        Self {
            family: None,
            dataset_root: dataset_root.into(),
            writeback: Writeback::default(),
            validate: false,
            assume_yes: false,
            assets_dir: config.assets.path,
            registry: config.registry,
        }
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read configuration at {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;
