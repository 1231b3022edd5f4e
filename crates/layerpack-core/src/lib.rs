//! Layer assembly: configuration, staging layout, content filtering,
//! archiving and the orchestrating [`Packager`].

#![deny(clippy::all)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate,
    clippy::module_name_repetitions
)]

mod archive;
mod config;
mod filter;
mod layout;
mod outcome;
mod pipeline;

pub use archive::{validate_layer_name, write_archive, ArchiveSummary};
pub use config::{
    ConfigOverrides, EnvSnapshot, PackagingConfig, DEFAULT_INDEX_URL, DEFAULT_MAX_SIZE_MB,
    INDEX_URL_ENV,
};
pub use filter::{apply_filters, FilterOptions, FilterReport};
pub use layout::{build_layout, LayerPackage, LayoutReport, StagedLayer};
pub use outcome::{
    analysis_outcome, human_bytes, layer_outcome, outcome_from_error, CommandStatus,
    ExecutionOutcome,
};
pub use pipeline::{AnalysisReport, AnalyzedPackage, LayerArtifact, Packager};
