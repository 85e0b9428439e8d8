// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Airtable REST client.

use crate::{
    config::RegistrySettings,
    registry::{RawRecord, Registry, RegistryError, Result},
};

use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, instrument};

/// Registry access through the Airtable REST API.
#[derive(Debug, Clone)]
pub struct AirtableClient {
    http: Client,
    api_url: String,
    base: String,
    token: String,
}

/// One page of a table listing.
///
/// Airtable hands out at most 100 rows per request, plus an `offset`
/// cursor while more rows remain.
#[derive(Debug, Deserialize)]
struct Page {
    records: Vec<RawRecord>,
    offset: Option<String>,
}

impl AirtableClient {
    /// Construct new Airtable client for the configured base.
    pub fn new(settings: &RegistrySettings, token: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            api_url: settings.api_url.clone(),
            base: settings.base.clone(),
            token: token.into(),
        }
    }

    fn table_url(&self, table: &str) -> Result<Url> {
        let invalid = || RegistryError::InvalidUrl {
            url: format!("{}/{}/{}", self.api_url, self.base, table),
        };
        let mut url = Url::parse(&self.api_url).map_err(|_| invalid())?;
        url.path_segments_mut()
            .map_err(|_| invalid())?
            .pop_if_empty()
            .push(&self.base)
            .push(table);

        Ok(url)
    }
}

impl Registry for AirtableClient {
    #[instrument(skip(self), level = "debug")]
    async fn list_records(&self, table: &str) -> Result<Vec<RawRecord>> {
        let url = self.table_url(table)?;
        let mut records = Vec::new();
        let mut offset: Option<String> = None;

        loop {
            let mut request = self.http.get(url.clone()).bearer_auth(&self.token);
            if let Some(offset) = &offset {
                request = request.query(&[("offset", offset)]);
            }

            let page: Page = request.send().await?.error_for_status()?.json().await?;
            debug!("received {} rows of {table:?}", page.records.len());
            records.extend(page.records);

            match page.offset {
                Some(next) => offset = Some(next),
                None => break,
            }
        }

        Ok(records)
    }

    #[instrument(skip(self, fields), level = "debug")]
    async fn update_record(&self, table: &str, id: &str, fields: Map<String, Value>) -> Result<()> {
        let mut url = self.table_url(table)?;
        let table_url = url.to_string();
        url.path_segments_mut()
            .map_err(|_| RegistryError::InvalidUrl { url: table_url })?
            .push(id);

        self.http
            .patch(url)
            .bearer_auth(&self.token)
            .json(&json!({ "fields": fields }))
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }
}
