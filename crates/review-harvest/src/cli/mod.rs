//! CLI subcommand implementations for the review-harvest binary.

pub mod doctor;
pub mod harvest_cmd;
pub mod logging;
pub mod output;
