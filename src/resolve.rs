// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Dataset directory resolution.
//!
//! A registry record lands in the directory it is already linked to, if
//! any. Otherwise the directory name is derived from the short name of the
//! record's producer and the record's title, e.g., "ONS-House-prices".
//! Once linked, a directory is never renamed, whatever happens to the
//! title in the registry afterwards.

use crate::{
    registry::{Producer, RecordId, SourceRecord},
    store::LinkIndex,
};

use std::collections::BTreeMap;

/// Convert a label into something usable as a URI path segment.
///
/// Every run of characters outside `[A-Za-z0-9_/]` becomes a single hyphen,
/// and a trailing hyphen is dropped. Case is preserved.
pub fn pathify(label: &str) -> String {
    let mut path = String::with_capacity(label.len());
    for ch in label.chars() {
        if ch.is_ascii_alphanumeric() || ch == '_' || ch == '/' {
            path.push(ch);
        } else if !path.ends_with('-') {
            path.push('-');
        }
    }

    if path.ends_with('-') {
        path.pop();
    }

    path
}

/// Where a registry record goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Record is already linked to this directory.
    Linked(String),

    /// Record is new, this is its derived directory name.
    Derived(String),
}

impl Resolution {
    /// Directory name, however it was found.
    pub fn dir(&self) -> &str {
        match self {
            Self::Linked(dir) | Self::Derived(dir) => dir,
        }
    }
}

/// Resolve the dataset directory of a registry record.
///
/// # Errors
///
/// - Return [`Skip::Producers`] if an unlinked record does not name exactly
///   one producer.
/// - Return [`Skip::UnknownProducer`] if that producer is not in the
///   registry.
/// - Return [`Skip::MissingTitle`] if an unlinked record has a blank title.
pub fn resolve(
    id: &str,
    source: &SourceRecord,
    producers: &BTreeMap<RecordId, Producer>,
    links: &LinkIndex,
) -> Result<Resolution, Skip> {
    if let Some(dir) = links.dir_of(id) {
        return Ok(Resolution::Linked(dir.to_string()));
    }

    let [producer] = source.producers.as_slice() else {
        return Err(Skip::Producers {
            record: id.to_string(),
            count: source.producers.len(),
        });
    };
    let producer = producers.get(producer).ok_or_else(|| Skip::UnknownProducer {
        record: id.to_string(),
        producer: producer.clone(),
    })?;
    let title = source.title().ok_or_else(|| Skip::MissingTitle {
        record: id.to_string(),
    })?;

    Ok(Resolution::Derived(format!(
        "{}-{}",
        pathify(producer.name.trim()),
        pathify(title)
    )))
}

/// Reasons to leave a registry record alone.
///
/// These are data quality problems for people to fix in the registry, not
/// failures of the run.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Skip {
    /// Producer attribution is missing or ambiguous.
    #[error("record {record} has {count} producers, expected exactly one")]
    Producers { record: RecordId, count: usize },

    /// Producer is not in the registry.
    #[error("record {record} refers to unknown producer {producer}")]
    UnknownProducer { record: RecordId, producer: RecordId },

    /// Record has no title to derive a directory name from.
    #[error("record {record} has no title")]
    MissingTitle { record: RecordId },

    /// Record fields do not have the expected types.
    #[error("record {record} does not decode: {reason}")]
    Malformed { record: RecordId, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use simple_test_case::test_case;

    #[test_case("ONS: Housing (2021)!", "ONS-Housing-2021"; "punctuation collapses")]
    #[test_case("affordable housing", "affordable-housing"; "spaces")]
    #[test_case("a -- b", "a-b"; "hyphen runs")]
    #[test_case("key_stats/2020", "key_stats/2020"; "underscore and slash kept")]
    #[test_case("(draft) notes", "-draft-notes"; "leading hyphen kept")]
    #[test_case("Café prices", "Caf-prices"; "non ascii replaced")]
    #[test]
    fn pathify_labels(label: &str, expect: &str) {
        pretty_assertions::assert_eq!(pathify(label), expect);
    }

    fn producers() -> BTreeMap<RecordId, Producer> {
        BTreeMap::from([(
            "recP".to_string(),
            Producer {
                name: "ONS".into(),
                full_name: Some("Office for National Statistics".into()),
            },
        )])
    }

    fn source(title: &str, producers: &[&str]) -> SourceRecord {
        SourceRecord {
            name: Some(title.into()),
            producers: producers.iter().map(|id| id.to_string()).collect(),
            ..SourceRecord::default()
        }
    }

    #[test]
    fn derive_directory_from_producer_and_title() {
        let result = resolve(
            "rec1",
            &source("House prices: 2021", &["recP"]),
            &producers(),
            &LinkIndex::new(),
        );
        assert_eq!(result, Ok(Resolution::Derived("ONS-House-prices-2021".into())));
    }

    #[test]
    fn linked_directory_wins_over_title() {
        let mut links = LinkIndex::new();
        links.claim("rec1", "ONS-old-name");

        let result = resolve("rec1", &source("Renamed", &[]), &producers(), &links);
        assert_eq!(result, Ok(Resolution::Linked("ONS-old-name".into())));
    }

    #[test]
    fn ambiguous_or_untitled_records_are_skipped() {
        let links = LinkIndex::new();

        assert_eq!(
            resolve("rec1", &source("Title", &["recP", "recQ"]), &producers(), &links),
            Err(Skip::Producers {
                record: "rec1".into(),
                count: 2
            })
        );
        assert_eq!(
            resolve("rec1", &source("  ", &["recP"]), &producers(), &links),
            Err(Skip::MissingTitle {
                record: "rec1".into()
            })
        );
        assert_eq!(
            resolve("rec1", &source("Title", &["recZ"]), &producers(), &links),
            Err(Skip::UnknownProducer {
                record: "rec1".into(),
                producer: "recZ".into()
            })
        );
    }
}
