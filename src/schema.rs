// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Descriptor schema validation.
//!
//! Descriptors may name a published JSON schema through their `$schema`
//! key. When validation is switched on, each schema is fetched once per run
//! and every descriptor naming it is checked. Violations are reported, never
//! enforced: a descriptor that breaks its schema is still reconciled.

use jsonschema::Validator;
use reqwest::Client;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, instrument, warn};

/// Validate documents against the schema named by their `$schema` key.
#[derive(Default)]
pub struct SchemaValidator {
    http: Client,

    // INVARIANT: A schema that failed to load is cached as `None` so it is
    // only fetched (and reported) once.
    cache: HashMap<String, Option<Validator>>,
}

impl SchemaValidator {
    /// Construct new validator with an empty schema cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a schema under a URL without fetching it.
    ///
    /// # Errors
    ///
    /// - Return [`SchemaError::Compile`] if the schema itself is invalid.
    pub fn insert(&mut self, url: impl Into<String>, schema: &Value) -> Result<()> {
        let url = url.into();
        let validator = compile(&url, schema)?;
        self.cache.insert(url, Some(validator));

        Ok(())
    }

    /// List schema violations of a document.
    ///
    /// Documents without a `$schema` key, and documents whose schema cannot
    /// be loaded, yield no violations.
    #[instrument(skip(self, document), level = "debug")]
    pub async fn violations(&mut self, document: &Value) -> Vec<String> {
        let Some(url) = document.get("$schema").and_then(Value::as_str) else {
            return Vec::new();
        };

        if !self.cache.contains_key(url) {
            let validator = match self.fetch(url).await {
                Ok(validator) => Some(validator),
                Err(err) => {
                    warn!("cannot load schema {url}: {err}");
                    None
                }
            };
            self.cache.insert(url.to_string(), validator);
        }

        match self.cache.get(url) {
            Some(Some(validator)) => validator
                .iter_errors(document)
                .map(|err| err.to_string())
                .collect(),
            _ => Vec::new(),
        }
    }

    async fn fetch(&self, url: &str) -> Result<Validator> {
        debug!("fetch schema {url}");
        let schema: Value = self
            .http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        compile(url, &schema)
    }
}

fn compile(url: &str, schema: &Value) -> Result<Validator> {
    jsonschema::validator_for(schema).map_err(|err| SchemaError::Compile {
        url: url.to_string(),
        message: err.to_string(),
    })
}

/// Schema loading error types.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    /// Schema cannot be downloaded.
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// Schema is not a valid JSON schema.
    #[error("invalid schema {url}: {message}")]
    Compile { url: String, message: String },
}

/// Friendly result alias :3
type Result<T, E = SchemaError> = std::result::Result<T, E>;
