// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Descriptor merging.
//!
//! Folds a registry source record into a dataset descriptor. The registry
//! is authoritative for the fields it provides, so most of them are simply
//! overwritten. Everything else in the descriptor is left alone.
//!
//! # Landing Pages
//!
//! Several registry records may fold into one directory, e.g., one record
//! per data type of the same publication. The first record seen in a run
//! sets the landing page. Records folded in after it add their landing page
//! instead of replacing it, so a materially different page is never lost.
//! A single distinct page is stored as a string, several as a sorted list.

use crate::{
    descriptor::{Descriptor, OneOrMany},
    registry::{RecordId, Snapshot, SourceRecord},
};

use std::collections::BTreeSet;

/// Fold a source record into a descriptor.
///
/// `record_ids` lists every registry record now mapped to the directory,
/// in discovery order. `touched` tells whether another record was already
/// folded into the same descriptor during this run.
pub fn merge(
    mut descriptor: Descriptor,
    source: &SourceRecord,
    snapshot: &Snapshot,
    record_ids: &[RecordId],
    touched: bool,
) -> Descriptor {
    descriptor.title = Some(trimmed(&source.name));

    if let Some(producer) = source
        .producers
        .first()
        .and_then(|id| snapshot.producers.get(id))
    {
        descriptor.publisher = Some(producer.display_name().to_string());
    }

    descriptor.description = Some(trimmed(&source.description));
    descriptor.landing_page = merge_landing_page(
        descriptor.landing_page.take(),
        source.landing_page.as_deref(),
        touched,
    );

    if let Some(route) = &source.route_to_data {
        descriptor.dataset_notes = Some(OneOrMany::Many(
            route.lines().map(str::to_string).collect(),
        ));
    }

    descriptor.published = Some(trimmed(&source.last_published));
    descriptor.families = Some(
        source
            .families
            .iter()
            .filter_map(|id| snapshot.families.get(id))
            .map(|family| family.name.clone())
            .collect(),
    );

    let types = source
        .data_types
        .iter()
        .filter_map(|id| snapshot.types.get(id))
        .map(|data_type| data_type.name.as_str())
        .collect::<Vec<_>>();
    let extract = descriptor.extract_mut();
    extract.source = Some(types.join(", "));
    if let Some(stage) = &source.ba_stage {
        extract.stage = Some(stage.clone());
    }

    let transform = descriptor.transform_mut();
    if let Some(stage) = &source.tech_stage {
        transform.stage = Some(stage.clone());
    }
    transform.airtable = OneOrMany::from_vec(record_ids.to_vec());

    descriptor.sizing_notes = Some(trimmed(&source.sizing_notes));
    descriptor.notes = Some(trimmed(&source.notes));

    descriptor
}

fn trimmed(value: &Option<String>) -> String {
    value.as_deref().map(str::trim).unwrap_or_default().to_string()
}

fn merge_landing_page(
    existing: Option<OneOrMany<String>>,
    incoming: Option<&str>,
    touched: bool,
) -> Option<OneOrMany<String>> {
    let incoming = incoming.map(str::trim).filter(|page| !page.is_empty());

    match (existing, incoming) {
        (Some(existing), Some(incoming)) if touched => {
            let mut pages = existing.into_vec().into_iter().collect::<BTreeSet<_>>();
            pages.insert(incoming.to_string());
            OneOrMany::from_vec(pages.into_iter().collect())
        }
        (_, Some(incoming)) => Some(OneOrMany::One(incoming.to_string())),
        (existing, None) => existing,
    }
}
