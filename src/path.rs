// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine the fixed locations of files reposync reads but never writes:
//! credentials for the external services, the optional tool configuration
//! file, and the static assets copied into each dataset root.
//!
//! Credentials follow the layout used by the original Python tooling, i.e.,
//! one directory per service under `~/.config`:
//!
//! ```text
//! ~/.config/airtable/token
//! ~/.config/github/token
//! ~/.config/jenkins/token.json
//! ~/.config/reposync/reposync.toml
//! ```

use std::path::PathBuf;

/// Determine absolute path to user's home directory.
///
/// Does not check if the path returned actually exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().ok_or(NoWayHome)
}

/// Determine absolute path to `~/.config`.
///
/// Always rooted at the home directory rather than `$XDG_CONFIG_HOME`, so
/// token files shared with other tooling are found on every platform.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn config_dir() -> Result<PathBuf> {
    home_dir().map(|path| path.join(".config"))
}

/// Path to the Airtable API token file.
pub fn airtable_token_file() -> Result<PathBuf> {
    config_dir().map(|path| path.join("airtable").join("token"))
}

/// Path to the GitHub API token file.
pub fn github_token_file() -> Result<PathBuf> {
    config_dir().map(|path| path.join("github").join("token"))
}

/// Path to the Jenkins credentials file.
///
/// The file holds a JSON object with `username` and `token` keys.
pub fn jenkins_credentials_file() -> Result<PathBuf> {
    config_dir().map(|path| path.join("jenkins").join("token.json"))
}

/// Path to the optional reposync configuration file.
pub fn tool_config_file() -> Result<PathBuf> {
    config_dir().map(|path| path.join("reposync").join("reposync.toml"))
}

/// Determine default absolute path to the static asset directory.
///
/// Uses XDG Base Directory path `$XDG_DATA_HOME/reposync/templates`. Does
/// not check if the path returned actually exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
///
/// # See Also
///
/// - [XDG Base Directory](https://wiki.archlinux.org/title/XDG_Base_Directory)
pub fn default_assets_dir() -> Result<PathBuf> {
    dirs::data_dir()
        .map(|path| path.join("reposync").join("templates"))
        .ok_or(NoWayHome)
}

/// No way to determine user's home directory.
///
/// # See Also
///
/// - [`dirs::home_dir`](https://docs.rs/dirs/latest/dirs/fn.home_dir.html)
#[derive(Clone, Debug, thiserror::Error)]
#[error("cannot determine absolute path to user's home directory")]
pub struct NoWayHome;

/// Friendly result alias :3
pub type Result<T, E = NoWayHome> = std::result::Result<T, E>;
