// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Jenkins REST client.

use crate::{
    action::job::{JobError, JobScheduler, Result},
    credentials::JenkinsCredentials,
};

use reqwest::{header::CONTENT_TYPE, Client, StatusCode, Url};
use tracing::instrument;

/// Build server access through the Jenkins remote API.
#[derive(Debug, Clone)]
pub struct JenkinsClient {
    http: Client,
    base: String,
    credentials: JenkinsCredentials,
}

impl JenkinsClient {
    /// Construct new Jenkins client for the server at `base`.
    pub fn new(base: impl Into<String>, credentials: JenkinsCredentials) -> Self {
        Self {
            http: Client::new(),
            base: base.into(),
            credentials,
        }
    }

    /// URL of `{base}/job/{folder}/.../job/{name}/{rest}`.
    fn job_url(&self, folder: &[String], name: Option<&str>, rest: &[&str]) -> Result<Url> {
        let invalid = || JobError::InvalidUrl {
            url: self.base.clone(),
        };
        let mut url = Url::parse(&self.base).map_err(|_| invalid())?;
        {
            let mut segments = url.path_segments_mut().map_err(|_| invalid())?;
            segments.pop_if_empty();
            for part in folder.iter().map(String::as_str).chain(name) {
                segments.push("job").push(part);
            }
            segments.extend(rest);
        }

        Ok(url)
    }
}

impl JobScheduler for JenkinsClient {
    #[instrument(skip(self), level = "debug")]
    async fn job_config(&self, folder: &[String], name: &str) -> Result<Option<String>> {
        let url = self.job_url(folder, Some(name), &["config.xml"])?;
        let response = self
            .http
            .get(url)
            .basic_auth(&self.credentials.username, Some(&self.credentials.token))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        Ok(Some(response.error_for_status()?.text().await?))
    }

    #[instrument(skip(self, config), level = "debug")]
    async fn create_job(&self, folder: &[String], name: &str, config: &str) -> Result<()> {
        let url = self.job_url(folder, None, &["createItem"])?;
        self.http
            .post(url)
            .query(&[("name", name)])
            .basic_auth(&self.credentials.username, Some(&self.credentials.token))
            .header(CONTENT_TYPE, "application/xml")
            .body(config.to_string())
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }

    #[instrument(skip(self, config), level = "debug")]
    async fn reconfigure_job(&self, folder: &[String], name: &str, config: &str) -> Result<()> {
        let url = self.job_url(folder, Some(name), &["config.xml"])?;
        self.http
            .post(url)
            .basic_auth(&self.credentials.username, Some(&self.credentials.token))
            .header(CONTENT_TYPE, "application/xml")
            .body(config.to_string())
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }
}
