//! # DRE Ledger
//!
//! A library for turning raw DRE (income statement) exports from a BI tool into
//! normalized, analysis-ready artifacts.
//!
//! ## Core Concepts
//!
//! - **Ledger Table**: The export as loaded: named columns, every cell still text
//! - **Normalization**: Locale currency text (`R$ 1.234,56`) becomes a signed number and
//!   month abbreviations (`Ago`) become the first day of that month in the reference year
//! - **Sanitization**: Ordered literal repairs for mojibake and accent-stripped labels
//! - **Category Hierarchy**: Macro-group → sorted detail categories, serialized deterministically
//! - **Narratives**: One English sentence per record, for search and model training corpora
//! - **Fail-fast**: Any unconvertible row aborts the run before anything is written
//!
//! ## Example
//!
//! ```rust,ignore
//! use dre_ledger::*;
//!
//! let config = PipelineConfig {
//!     reference_year: 2025,
//!     output_dir: "output".into(),
//!     ..PipelineConfig::default()
//! };
//!
//! match process_dre(&config)? {
//!     RunOutcome::Completed(report) => {
//!         println!("{} records", report.summary.records_processed);
//!         println!("{}", report.hierarchy.to_json()?);
//!     }
//!     RunOutcome::NoNewData => println!("nothing to do"),
//! }
//! ```

pub mod config;
pub mod currency;
pub mod error;
pub mod finetune;
pub mod hierarchy;
pub mod ingestion;
pub mod month;
pub mod narrative;
pub mod persistence;
pub mod pipeline;
pub mod sanitizer;
pub mod schema;

pub use config::{
    config_json_schema, InputSettings, MonthLocale, PipelineConfig, ReportMode, TextEncoding,
};
pub use currency::{format_amount, parse_amount, parse_amount_cell, AmountTotals, CurrencyFormat};
pub use error::{DreError, Result};
pub use finetune::{
    build_finetune_dataset, DatasetValidation, FineTuneDatasetBuilder, FineTuneResult, JsonlFormat,
    QaKind, QaPair,
};
pub use hierarchy::{extract_hierarchy, CategoryHierarchy, HierarchySummary};
pub use ingestion::*;
pub use month::{resolve_month, resolve_month_cell, MonthTable};
pub use narrative::{
    generate_narratives, synthesize, NarrativeBatch, NarrativeEntry, NarrativeSummary,
    NarrativeSynthesizer,
};
pub use persistence::{
    read_report_months, ArtifactSink, FsArtifactSink, PersistedArtifacts, RunArtifacts,
};
pub use pipeline::{DrePipeline, PipelineContext, RunOutcome, RunReport, RunSummary, Stage};
pub use sanitizer::{sanitize, SanitizeStats, Substitution, SubstitutionTable};
pub use schema::*;

use log::{debug, info};

/// Runs the whole pipeline against the configured CSV export and output directory.
pub fn process_dre(config: &PipelineConfig) -> Result<RunOutcome> {
    info!(
        "Processing DRE export {} for reference year {}",
        config.input.path.display(),
        config.reference_year
    );
    debug!(
        "Writing artifacts to {} in {:?} mode",
        config.output_dir.display(),
        config.report_mode
    );

    let pipeline = DrePipeline::from_config(config)?;
    let source = CsvSource::new(config.input.clone());
    let sink = FsArtifactSink::new(config.output_dir.clone());

    pipeline.run(&source, &sink)
}
