use crate::config::{PipelineConfig, ReportMode};
use crate::currency::{AmountTotals, CurrencyFormat};
use crate::error::{DreError, Result};
use crate::hierarchy::{extract_hierarchy, CategoryHierarchy, HierarchySummary};
use crate::ingestion::{validate_columns, RecordSource};
use crate::month::MonthTable;
use crate::narrative::{NarrativeBatch, NarrativeEntry, NarrativeSummary, NarrativeSynthesizer};
use crate::persistence::{ArtifactSink, PersistedArtifacts, RunArtifacts};
use crate::sanitizer::{SanitizeStats, SubstitutionTable};
use crate::schema::{CellValue, ColumnNames, LedgerTable};
use log::{debug, error, info};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum Stage {
    Load,
    CurrencyConversion,
    MonthConversion,
    Derivation,
    Persistence,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Load => "Load",
            Stage::CurrencyConversion => "Currency conversion",
            Stage::MonthConversion => "Month conversion",
            Stage::Derivation => "Derivation",
            Stage::Persistence => "Persistence",
        };
        f.write_str(name)
    }
}

/// Everything the stages need, resolved once per run.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    pub reference_year: i32,
    pub columns: ColumnNames,
    pub months: MonthTable,
    pub currency: CurrencyFormat,
    pub substitutions: SubstitutionTable,
    pub report_mode: ReportMode,
}

impl PipelineContext {
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            reference_year: config.reference_year,
            columns: config.columns.clone(),
            months: config.month_locale.table(),
            currency: config.currency.clone(),
            substitutions: config.substitutions.clone(),
            report_mode: config.report_mode,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RunSummary {
    pub records_processed: usize,
    pub reference_year: i32,
    pub hierarchy: HierarchySummary,
    pub narratives: NarrativeSummary,
    pub totals: AmountTotals,
    pub sanitize: SanitizeStats,
    /// Entries carried over from an existing report in append mode.
    pub previous_entries: usize,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    /// Normalized table as persisted.
    pub table: LedgerTable,
    pub hierarchy: CategoryHierarchy,
    /// This run's narratives only, without entries carried over in append mode.
    pub narratives: NarrativeBatch,
    pub summary: RunSummary,
    pub persisted: PersistedArtifacts,
}

#[derive(Debug, Clone)]
pub enum RunOutcome {
    Completed(Box<RunReport>),
    /// The source had nothing to process; nothing was written.
    NoNewData,
}

impl RunOutcome {
    pub fn report(&self) -> Option<&RunReport> {
        match self {
            RunOutcome::Completed(report) => Some(&**report),
            RunOutcome::NoNewData => None,
        }
    }
}

/// Runs load, normalization, derivation and persistence in order.
///
/// The first failing stage aborts the run. Artifacts are only handed to the
/// sink once every upstream stage has succeeded for the whole table.
pub struct DrePipeline {
    context: PipelineContext,
}

impl DrePipeline {
    pub fn new(context: PipelineContext) -> Self {
        Self { context }
    }

    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        Ok(Self::new(PipelineContext::from_config(config)?))
    }

    pub fn context(&self) -> &PipelineContext {
        &self.context
    }

    pub fn run<S, K>(&self, source: &S, sink: &K) -> Result<RunOutcome>
    where
        S: RecordSource + ?Sized,
        K: ArtifactSink + ?Sized,
    {
        info!("Starting DRE pipeline run from {}", source.describe());

        let Some((mut table, sanitize)) = self.load(source)? else {
            info!("No new data to process");
            return Ok(RunOutcome::NoNewData);
        };

        self.convert_amounts(&mut table)?;
        self.convert_months(&mut table)?;

        let (hierarchy, batch, totals) = self.derive(&table)?;

        let previous = match self.context.report_mode {
            ReportMode::Overwrite => Vec::new(),
            ReportMode::Append => self.previous_entries(sink, &batch.entries)?,
        };
        let previous_entries = previous.len();
        let mut report_entries = previous;
        report_entries.extend(batch.entries.iter().cloned());

        info!("Step 5: Persisting artifacts");
        let persisted = sink
            .persist(&RunArtifacts {
                table: &table,
                hierarchy: &hierarchy,
                narratives: &report_entries,
            })
            .map_err(|e| self.abort(e, Stage::Persistence, None))?;

        let summary = RunSummary {
            records_processed: table.len(),
            reference_year: self.context.reference_year,
            hierarchy: hierarchy.summary(),
            narratives: batch.summary.clone(),
            totals,
            sanitize,
            previous_entries,
        };

        info!(
            "Pipeline completed: {} records, {} groups, {} narratives",
            summary.records_processed, summary.hierarchy.total_groups, summary.narratives.narratives_generated
        );

        Ok(RunOutcome::Completed(Box::new(RunReport {
            table,
            hierarchy,
            narratives: batch,
            summary,
            persisted,
        })))
    }

    fn abort(&self, e: DreError, stage: Stage, row: Option<usize>) -> DreError {
        match row {
            Some(r) => error!("{} stage failed at row {}: {}", stage, r, e),
            None => error!("{} stage failed: {}", stage, e),
        }
        e.at_stage(stage, row)
    }

    fn load<S>(&self, source: &S) -> Result<Option<(LedgerTable, SanitizeStats)>>
    where
        S: RecordSource + ?Sized,
    {
        info!("Step 1: Loading data");
        let Some(mut table) = source
            .load()
            .map_err(|e| self.abort(e, Stage::Load, None))?
        else {
            return Ok(None);
        };

        let substitutions = &self.context.substitutions;
        let headers_repaired = substitutions.sanitize_headers(&mut table);

        if table.is_empty() {
            return Err(self.abort(DreError::EmptyInput, Stage::Load, None));
        }
        validate_columns(&table, &self.context.columns.required())
            .map_err(|e| self.abort(e, Stage::Load, None))?;

        let stats = SanitizeStats {
            headers_repaired,
            ..substitutions.sanitize_cells(&mut table)
        };
        debug!(
            "Sanitized {} headers and {} cells ({} non-text cells left alone)",
            stats.headers_repaired, stats.cells_repaired, stats.non_text_cells
        );

        info!("Loaded {} records", table.len());
        Ok(Some((table, stats)))
    }

    fn column(&self, table: &LedgerTable, name: &str, stage: Stage) -> Result<usize> {
        table.column_index(name).ok_or_else(|| {
            self.abort(
                DreError::MissingColumns {
                    missing: vec![name.to_string()],
                    available: table.columns().to_vec(),
                },
                stage,
                None,
            )
        })
    }

    fn convert_amounts(&self, table: &mut LedgerTable) -> Result<()> {
        info!("Step 2: Converting currency values");
        let idx = self.column(table, &self.context.columns.amount, Stage::CurrencyConversion)?;

        // Rows are 1-based in diagnostics.
        for (row, cells) in table.rows_mut().enumerate() {
            let value = self
                .context
                .currency
                .parse_cell(&cells[idx])
                .map_err(|e| self.abort(e, Stage::CurrencyConversion, Some(row + 1)))?;
            cells[idx] = CellValue::Number(value);
        }
        Ok(())
    }

    fn convert_months(&self, table: &mut LedgerTable) -> Result<()> {
        info!(
            "Step 3: Converting months with reference year {}",
            self.context.reference_year
        );
        let idx = self.column(table, &self.context.columns.month, Stage::MonthConversion)?;

        for (row, cells) in table.rows_mut().enumerate() {
            let date = self
                .context
                .months
                .resolve_cell(&cells[idx], self.context.reference_year)
                .map_err(|e| self.abort(e, Stage::MonthConversion, Some(row + 1)))?;
            cells[idx] = CellValue::Date(date);
        }
        Ok(())
    }

    fn derive(&self, table: &LedgerTable) -> Result<(CategoryHierarchy, NarrativeBatch, AmountTotals)> {
        info!("Step 4: Extracting hierarchy and generating narratives");
        let columns = &self.context.columns;

        let hierarchy = extract_hierarchy(table, &columns.group, &columns.detail)
            .map_err(|e| self.abort(e, Stage::Derivation, None))?;
        if hierarchy.is_empty() {
            return Err(self.abort(DreError::EmptyHierarchy, Stage::Derivation, None));
        }

        let records = table.records(columns, &self.context.months);
        let batch = NarrativeSynthesizer::new(self.context.currency.clone()).generate(&records);
        let totals = AmountTotals::from_amounts(records.iter().filter_map(|r| r.amount_value()));

        Ok((hierarchy, batch, totals))
    }

    /// Existing report entries, refusing months this run would write again.
    fn previous_entries<K>(&self, sink: &K, incoming: &[NarrativeEntry]) -> Result<Vec<NarrativeEntry>>
    where
        K: ArtifactSink + ?Sized,
    {
        let existing = sink
            .existing_narratives()
            .map_err(|e| self.abort(e, Stage::Persistence, None))?;

        let existing_months: BTreeSet<&str> = existing
            .iter()
            .map(|e| e.month.as_str())
            .filter(|m| !m.is_empty())
            .collect();
        let duplicates: BTreeSet<&str> = incoming
            .iter()
            .map(|e| e.month.as_str())
            .filter(|m| existing_months.contains(m))
            .collect();

        if !duplicates.is_empty() {
            let months = duplicates.into_iter().map(str::to_string).collect();
            return Err(self.abort(DreError::DuplicatePeriods(months), Stage::Persistence, None));
        }

        info!("Appending to {} existing report entries", existing.len());
        Ok(existing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MonthLocale;
    use crate::ingestion::InMemorySource;
    use crate::persistence::FsArtifactSink;
    use std::cell::RefCell;

    #[derive(Default)]
    struct RecordingSink {
        existing: Vec<NarrativeEntry>,
        written: RefCell<Option<(LedgerTable, CategoryHierarchy, Vec<NarrativeEntry>)>>,
    }

    impl ArtifactSink for RecordingSink {
        fn persist(&self, artifacts: &RunArtifacts<'_>) -> Result<PersistedArtifacts> {
            *self.written.borrow_mut() = Some((
                artifacts.table.clone(),
                artifacts.hierarchy.clone(),
                artifacts.narratives.to_vec(),
            ));
            Ok(PersistedArtifacts {
                snapshot: "snapshot".into(),
                categories: "categories".into(),
                narrative_report: "report".into(),
            })
        }

        fn existing_narratives(&self) -> Result<Vec<NarrativeEntry>> {
            Ok(self.existing.clone())
        }
    }

    fn export() -> LedgerTable {
        LedgerTable::from_text_rows(
            &["Loja", "Nome Grupo", "cc_nome", "MÃªs", "Realizado"],
            &[
                &["001", "RECEITAS", "DINHEIRO", "Ago", "R$ 1.234,56"],
                &["001", "RECEITAS", "PIX", "Ago", "R$ 500,00"],
                &["001", "( - ) DEDUES", "Vrios", "Ago", "-R$ 19.026"],
            ],
        )
    }

    fn pipeline(mode: ReportMode) -> DrePipeline {
        let config = PipelineConfig {
            report_mode: mode,
            ..PipelineConfig::default()
        };
        DrePipeline::from_config(&config).unwrap()
    }

    fn completed(outcome: RunOutcome) -> RunReport {
        match outcome {
            RunOutcome::Completed(report) => *report,
            RunOutcome::NoNewData => panic!("expected a completed run"),
        }
    }

    #[test]
    fn test_full_run() {
        let sink = RecordingSink::default();
        let report = completed(
            pipeline(ReportMode::Overwrite)
                .run(&InMemorySource::new(export()), &sink)
                .unwrap(),
        );

        assert_eq!(report.summary.records_processed, 3);
        assert_eq!(report.summary.sanitize.headers_repaired, 1);
        assert_eq!(report.summary.sanitize.cells_repaired, 2);
        assert!((report.summary.totals.positive - 1734.56).abs() < 1e-9);
        assert_eq!(report.summary.totals.negative, -19026.0);

        assert_eq!(
            report.table.cell(0, "Realizado"),
            Some(&CellValue::Number(1234.56))
        );
        assert_eq!(
            report.table.cell(0, "Mês"),
            Some(&CellValue::Date(chrono::NaiveDate::from_ymd_opt(2025, 8, 1).unwrap()))
        );

        assert_eq!(
            report.hierarchy.get("RECEITAS").unwrap(),
            &["DINHEIRO".to_string(), "PIX".to_string()]
        );
        assert_eq!(
            report.hierarchy.get("( - ) DEDUÇÕES").unwrap(),
            &["Vários".to_string()]
        );

        assert_eq!(report.narratives.entries.len(), 3);
        assert_eq!(
            report.narratives.entries[2].narrative,
            "In Ago/2025, group '( - ) DEDUÇÕES' recorded -R$ 19.026,00 for item 'Vários'."
        );

        let (_, _, written) = sink.written.borrow().clone().unwrap();
        assert_eq!(written, report.narratives.entries);
    }

    #[test]
    fn test_no_new_data() {
        let sink = RecordingSink::default();
        let outcome = pipeline(ReportMode::Overwrite)
            .run(&InMemorySource::empty(), &sink)
            .unwrap();

        assert!(matches!(outcome, RunOutcome::NoNewData));
        assert!(sink.written.borrow().is_none());
    }

    #[test]
    fn test_header_only_is_empty_input() {
        let sink = RecordingSink::default();
        let table = LedgerTable::from_text_rows(&["Nome Grupo", "cc_nome", "Mês", "Realizado"], &[]);
        let err = pipeline(ReportMode::Overwrite)
            .run(&InMemorySource::new(table), &sink)
            .unwrap_err();

        assert!(matches!(err, DreError::Stage { stage: Stage::Load, .. }));
        assert!(matches!(err.root(), DreError::EmptyInput));
    }

    #[test]
    fn test_missing_columns_fail_before_rows() {
        let sink = RecordingSink::default();
        let table = LedgerTable::from_text_rows(&["Nome Grupo", "Mês"], &[&["RECEITAS", "Ago"]]);
        let err = pipeline(ReportMode::Overwrite)
            .run(&InMemorySource::new(table), &sink)
            .unwrap_err();

        match err.root() {
            DreError::MissingColumns { missing, available } => {
                assert_eq!(missing, &vec!["cc_nome".to_string(), "Realizado".to_string()]);
                assert_eq!(available, &vec!["Nome Grupo".to_string(), "Mês".to_string()]);
            }
            other => panic!("expected MissingColumns, got {:?}", other),
        }
        assert!(sink.written.borrow().is_none());
    }

    #[test]
    fn test_bad_amount_names_stage_row_and_value() {
        let mut table = export();
        *table.cell_mut(1, "Realizado").unwrap() = CellValue::Text("R$ 12abc".to_string());

        let sink = RecordingSink::default();
        let err = pipeline(ReportMode::Overwrite)
            .run(&InMemorySource::new(table), &sink)
            .unwrap_err();

        match &err {
            DreError::Stage { stage, row, .. } => {
                assert_eq!(*stage, Stage::CurrencyConversion);
                assert_eq!(*row, Some(2));
            }
            other => panic!("expected stage error, got {:?}", other),
        }
        assert!(matches!(err.root(), DreError::InvalidFormat { value, .. } if value == "R$ 12abc"));
        assert!(err.to_string().contains("R$ 12abc"));
        assert!(sink.written.borrow().is_none());
    }

    #[test]
    fn test_unknown_month_aborts() {
        let mut table = export();
        *table.cell_mut(0, "MÃªs").unwrap() = CellValue::Text("Foo".to_string());

        let sink = RecordingSink::default();
        let err = pipeline(ReportMode::Overwrite)
            .run(&InMemorySource::new(table), &sink)
            .unwrap_err();

        assert!(matches!(
            err,
            DreError::Stage { stage: Stage::MonthConversion, row: Some(1), .. }
        ));
        assert!(matches!(err.root(), DreError::UnknownMonth { .. }));
        assert!(sink.written.borrow().is_none());
    }

    #[test]
    fn test_blank_groups_abort_before_persisting() {
        let table = LedgerTable::from_text_rows(
            &["Nome Grupo", "cc_nome", "Mês", "Realizado"],
            &[&["", "PIX", "Ago", "R$ 1,00"], &["  ", "DINHEIRO", "Ago", "R$ 2,00"]],
        );
        let dir = tempfile::tempdir().unwrap();
        let sink = FsArtifactSink::new(dir.path().join("out"));

        let err = pipeline(ReportMode::Overwrite)
            .run(&InMemorySource::new(table), &sink)
            .unwrap_err();

        assert!(matches!(err, DreError::Stage { stage: Stage::Derivation, .. }));
        assert!(matches!(err.root(), DreError::EmptyHierarchy));
        assert!(!sink.categories_path().exists());
        assert!(!sink.snapshot_path().exists());
        assert!(!sink.narrative_report_path().exists());
    }

    #[test]
    fn test_english_month_locale() {
        let table = LedgerTable::from_text_rows(
            &["Nome Grupo", "cc_nome", "Mês", "Realizado"],
            &[&["REVENUE", "CASH", "Aug", "R$ 10,00"]],
        );
        let config = PipelineConfig {
            month_locale: MonthLocale::English,
            ..PipelineConfig::default()
        };
        let sink = RecordingSink::default();
        let report = completed(
            DrePipeline::from_config(&config)
                .unwrap()
                .run(&InMemorySource::new(table), &sink)
                .unwrap(),
        );

        assert_eq!(report.narratives.entries[0].month, "2025-08-01");
        assert!(report.narratives.entries[0].narrative.starts_with("In Aug/2025,"));
    }

    #[test]
    fn test_append_keeps_existing_entries() {
        let earlier = NarrativeEntry {
            narrative: "In Jul/2025, group 'RECEITAS' recorded R$ 10,00 for item 'PIX'.".to_string(),
            month: "2025-07-01".to_string(),
            group: "RECEITAS".to_string(),
            detail: "PIX".to_string(),
            amount: Some(10.0),
        };
        let sink = RecordingSink {
            existing: vec![earlier.clone()],
            ..Default::default()
        };

        let report = completed(
            pipeline(ReportMode::Append)
                .run(&InMemorySource::new(export()), &sink)
                .unwrap(),
        );

        assert_eq!(report.summary.previous_entries, 1);
        let (_, _, written) = sink.written.borrow().clone().unwrap();
        assert_eq!(written.len(), 4);
        assert_eq!(written[0], earlier);
    }

    #[test]
    fn test_append_refuses_duplicate_months() {
        let sink = RecordingSink {
            existing: vec![NarrativeEntry {
                narrative: String::new(),
                month: "2025-08-01".to_string(),
                group: "RECEITAS".to_string(),
                detail: "PIX".to_string(),
                amount: None,
            }],
            ..Default::default()
        };

        let err = pipeline(ReportMode::Append)
            .run(&InMemorySource::new(export()), &sink)
            .unwrap_err();

        assert!(matches!(err.root(), DreError::DuplicatePeriods(months) if months == &vec!["2025-08-01".to_string()]));
        assert!(sink.written.borrow().is_none());
    }

    #[test]
    fn test_stage_display() {
        let err = DreError::EmptyMonth.at_stage(Stage::MonthConversion, Some(7));
        assert_eq!(
            err.to_string(),
            "Month conversion stage failed at row 7: Month string cannot be empty"
        );
    }
}
