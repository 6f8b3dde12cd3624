// Copyright 2026 Review Harvest Contributors
// SPDX-License-Identifier: Apache-2.0

//! Review Harvest: structured review records from dynamically rendered
//! review listings.
//!
//! A run opens one browser [`session`], expands hidden content through the
//! [`disclosure`] loop, collects unique review [`fragments`], resolves each
//! fragment's fields with fallback chains ([`extraction`]) and assembles an
//! ordered [`aggregate::BatchResult`]. The browser sits behind the
//! [`renderer`] traits; [`pipeline::Harvester`] wires the stages together.

pub mod aggregate;
pub mod config;
pub mod deadline;
pub mod disclosure;
pub mod error;
pub mod events;
pub mod extraction;
pub mod fragments;
pub mod markup;
pub mod pipeline;
pub mod renderer;
pub mod rules;
pub mod session;
pub mod types;

pub use aggregate::{BatchResult, BatchSink, BatchSummary, Record, ReviewRow};
pub use config::HarvestConfig;
pub use deadline::Deadline;
pub use error::{HarvestError, SessionError};
pub use pipeline::Harvester;
pub use rules::RuleBook;
pub use types::{Field, FieldResult, FieldStatus, FragmentKey, ReviewFields, Target};
