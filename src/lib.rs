// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Keep a family repository of dataset pipelines in sync with its registry.
//!
//! A __family__ groups related datasets, e.g., everything about housing. Its
//! repository holds one directory per dataset under `datasets/`, each with a
//! JSON descriptor, plus a family descriptor listing all of them. The
//! __registry__ is an Airtable base cataloguing source datasets together with
//! their producers, families, and data types.
//!
//! A sync run folds the registry records of one family into the dataset
//! descriptors, keeps a GitHub tracking issue and a Jenkins build job per
//! dataset, and records issue numbers back in the registry. See [`sync`] for
//! the order of events.

pub mod action;
pub mod config;
pub mod credentials;
pub mod descriptor;
pub mod merge;
pub mod path;
pub mod registry;
pub mod resolve;
pub mod schema;
pub mod store;
pub mod sync;
