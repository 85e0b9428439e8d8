// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Credential loading.
//!
//! Airtable access is mandatory for every run. GitHub and Jenkins access is
//! optional: without credentials the matching sync step quietly does
//! nothing.

use crate::path::{self, NoWayHome};

use serde::Deserialize;
use std::{
    env,
    fmt::{Debug, Formatter, Result as FmtResult},
    fs::read_to_string,
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tracing::{debug, warn};

/// Environment variable holding the Airtable API token.
pub const AIRTABLE_TOKEN_VAR: &str = "AIRTABLE_API_KEY";

/// Environment variable holding the GitHub API token.
pub const GITHUB_TOKEN_VAR: &str = "GITHUB_TOKEN";

/// Secrets for the external services.
#[derive(Clone)]
pub struct Credentials {
    /// Airtable API token.
    pub airtable: String,

    /// GitHub API token.
    pub github: Option<String>,

    /// Jenkins user name and API token.
    pub jenkins: Option<JenkinsCredentials>,
}

impl Debug for Credentials {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.debug_struct("Credentials")
            .field("airtable", &"<redacted>")
            .field("github", &self.github.as_ref().map(|_| "<redacted>"))
            .field("jenkins", &self.jenkins.as_ref().map(|jenkins| &jenkins.username))
            .finish()
    }
}

/// Jenkins user name and API token.
#[derive(Clone, Deserialize)]
pub struct JenkinsCredentials {
    pub username: String,
    pub token: String,
}

impl Debug for JenkinsCredentials {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.debug_struct("JenkinsCredentials")
            .field("username", &self.username)
            .field("token", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    /// Load credentials from the environment and `~/.config`.
    ///
    /// # Errors
    ///
    /// - Return [`CredentialsError::NoWayHome`] if the home directory
    ///   cannot be determined.
    /// - Return [`CredentialsError::MissingAirtableToken`] if no Airtable
    ///   token is available.
    /// - Return [`CredentialsError::Read`] if a token file exists but cannot
    ///   be read.
    pub fn load() -> Result<Self> {
        let token_file = path::airtable_token_file()?;
        let airtable = token_from(AIRTABLE_TOKEN_VAR, &token_file)?.ok_or(
            CredentialsError::MissingAirtableToken {
                var: AIRTABLE_TOKEN_VAR,
                path: token_file.clone(),
            },
        )?;
        let github = token_from(GITHUB_TOKEN_VAR, path::github_token_file()?)?;
        let jenkins = jenkins_from(path::jenkins_credentials_file()?)?;

        if github.is_none() {
            debug!("no GitHub token found, issue sync disabled");
        }
        if jenkins.is_none() {
            debug!("no Jenkins credentials found, job sync disabled");
        }

        Ok(Self {
            airtable,
            github,
            jenkins,
        })
    }
}

/// Read a token from an environment variable, falling back to the first
/// line of a file.
fn token_from(var: &str, path: impl AsRef<Path>) -> Result<Option<String>> {
    if let Ok(token) = env::var(var) {
        if !token.trim().is_empty() {
            return Ok(Some(token.trim().to_string()));
        }
    }

    let path = path.as_ref();
    match read_to_string(path) {
        Ok(data) => Ok(data
            .lines()
            .next()
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(str::to_string)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(CredentialsError::Read {
            source: err,
            path: path.to_path_buf(),
        }),
    }
}

fn jenkins_from(path: impl AsRef<Path>) -> Result<Option<JenkinsCredentials>> {
    let path = path.as_ref();
    let data = match read_to_string(path) {
        Ok(data) => data,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(CredentialsError::Read {
                source: err,
                path: path.to_path_buf(),
            })
        }
    };

    match serde_json::from_str(&data) {
        Ok(credentials) => Ok(Some(credentials)),
        Err(err) => {
            warn!("ignoring malformed Jenkins credentials at {:?}: {err}", path.display());
            Ok(None)
        }
    }
}

/// Credential loading error types.
#[derive(Debug, thiserror::Error)]
pub enum CredentialsError {
    /// No Airtable token in the environment or token file.
    #[error("unable to find Airtable API token, set {var} or put the token in {:?}", path.display())]
    MissingAirtableToken { var: &'static str, path: PathBuf },

    /// Token file exists but cannot be read.
    #[error("failed to read credentials at {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Home directory unknown.
    #[error(transparent)]
    NoWayHome(#[from] NoWayHome),
}

/// Friendly result alias :3
type Result<T, E = CredentialsError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;
    use std::fs::{create_dir_all, write};

    #[sealed_test(env = [("AIRTABLE_API_KEY", "keyFromEnv")])]
    fn environment_token_wins_over_file() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let file = dir.path().join("token");
        write(&file, "keyFromFile\n")?;

        assert_eq!(
            token_from(AIRTABLE_TOKEN_VAR, &file)?,
            Some("keyFromEnv".to_string())
        );

        Ok(())
    }

    #[test]
    fn token_file_first_line_is_used() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let file = dir.path().join("token");
        write(&file, "keyFromFile\nsecond line\n")?;

        assert_eq!(
            token_from("REPOSYNC_TEST_UNSET_VAR", &file)?,
            Some("keyFromFile".to_string())
        );
        assert_eq!(
            token_from("REPOSYNC_TEST_UNSET_VAR", dir.path().join("missing"))?,
            None
        );

        Ok(())
    }

    #[test]
    fn malformed_jenkins_credentials_disable_job_sync() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let file = dir.path().join("jenkins").join("token.json");
        create_dir_all(file.parent().unwrap())?;

        write(&file, "not json")?;
        assert!(jenkins_from(&file)?.is_none());

        write(&file, r#"{"username": "ci", "token": "abc"}"#)?;
        let credentials = jenkins_from(&file)?.unwrap();
        assert_eq!(credentials.username, "ci");
        assert_eq!(credentials.token, "abc");

        Ok(())
    }

    #[sealed_test(env = [("HOME", "/nonexistent/reposync-home"), ("AIRTABLE_API_KEY", "")])]
    fn missing_airtable_token_is_fatal() {
        let result = Credentials::load();
        assert!(matches!(
            result,
            Err(CredentialsError::MissingAirtableToken { .. })
        ));
    }
}
