use crate::currency::CurrencyFormat;
use crate::error::Result;
use crate::hierarchy::CategoryHierarchy;
use crate::narrative::NarrativeEntry;
use crate::persistence::read_narrative_report;
use log::{info, warn};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Pairs below this count make a dataset too small to tune on.
pub const MIN_RECOMMENDED_PAIRS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum QaKind {
    /// Which group a detail category belongs to.
    Classification,
    /// The amount booked for a detail in a month.
    ValueQuery,
    /// The synthesized sentence for a record.
    Narrative,
}

impl QaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QaKind::Classification => "classification",
            QaKind::ValueQuery => "value_query",
            QaKind::Narrative => "narrative",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct QaMetadata {
    pub category: String,
    pub group: String,
    pub month: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct QaPair {
    #[serde(rename = "type")]
    pub kind: QaKind,
    pub question: String,
    pub answer: String,
    pub metadata: QaMetadata,
}

/// Line layout of the exported JSONL file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum JsonlFormat {
    /// `{"text_input": ..., "output": ...}`
    #[default]
    Gemini,
    /// `{"messages": [{"role": "user", ...}, {"role": "assistant", ...}]}`
    OpenAi,
    /// The full pair including its type and metadata.
    Generic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DatasetValidation {
    pub total_pairs: usize,
    pub pairs_by_type: BTreeMap<QaKind, usize>,
    pub unique_categories: usize,
    pub unique_groups: usize,
    pub avg_answer_length: f64,
    pub min_answer_length: usize,
    pub max_answer_length: usize,
    pub is_valid: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FineTuneResult {
    pub output_path: PathBuf,
    pub validation: DatasetValidation,
    pub category_coverage: BTreeMap<String, f64>,
}

/// Turns narrative report entries into supervised question/answer pairs.
#[derive(Debug, Clone, Default)]
pub struct FineTuneDatasetBuilder {
    pairs: Vec<QaPair>,
}

impl FineTuneDatasetBuilder {
    pub fn from_entries(entries: &[NarrativeEntry]) -> Self {
        Self::with_currency(entries, &CurrencyFormat::default())
    }

    /// Entries without a group or a detail produce no pairs.
    pub fn with_currency(entries: &[NarrativeEntry], currency: &CurrencyFormat) -> Self {
        let mut pairs = Vec::new();
        let mut skipped = 0;

        for entry in entries {
            let category = entry.detail.trim();
            let group = entry.group.trim();
            let month = entry.month.trim();

            if category.is_empty() || group.is_empty() {
                skipped += 1;
                continue;
            }

            let metadata = QaMetadata {
                category: category.to_string(),
                group: group.to_string(),
                month: month.to_string(),
                value: None,
            };

            pairs.push(QaPair {
                kind: QaKind::Classification,
                question: format!("Classify the expense '{}' into a DRE group.", category),
                answer: format!("The expense '{}' belongs to the group '{}'.", category, group),
                metadata: metadata.clone(),
            });

            if let Some(value) = entry.amount.filter(|v| *v != 0.0) {
                match currency.format(value) {
                    Ok(formatted) => pairs.push(QaPair {
                        kind: QaKind::ValueQuery,
                        question: format!("What was the amount of '{}' in {}?", category, month),
                        answer: format!("The amount of '{}' in {} was {}.", category, month, formatted),
                        metadata: QaMetadata {
                            value: Some(value),
                            ..metadata.clone()
                        },
                    }),
                    Err(e) => warn!("Skipping value question for '{}': {}", category, e),
                }
            }

            if !entry.narrative.trim().is_empty() {
                pairs.push(QaPair {
                    kind: QaKind::Narrative,
                    question: format!("Describe the record of '{}' in {}.", category, month),
                    answer: entry.narrative.clone(),
                    metadata,
                });
            }
        }

        if skipped > 0 {
            warn!("Skipped {} entries without group or detail", skipped);
        }
        info!("Created {} Q&A pairs from {} entries", pairs.len(), entries.len());

        Self { pairs }
    }

    pub fn pairs(&self) -> &[QaPair] {
        &self.pairs
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Writes one JSON object per line.
    pub fn export_jsonl<W: Write>(&self, writer: W, format: JsonlFormat) -> Result<()> {
        let mut writer = BufWriter::new(writer);
        for pair in &self.pairs {
            let line = match format {
                JsonlFormat::Gemini => json!({
                    "text_input": pair.question,
                    "output": pair.answer,
                }),
                JsonlFormat::OpenAi => json!({
                    "messages": [
                        { "role": "user", "content": pair.question },
                        { "role": "assistant", "content": pair.answer },
                    ]
                }),
                JsonlFormat::Generic => serde_json::to_value(pair)?,
            };
            serde_json::to_writer(&mut writer, &line)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn export_jsonl_file(&self, path: &Path, format: JsonlFormat) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        self.export_jsonl(File::create(path)?, format)?;
        info!("Dataset exported: {} ({} records)", path.display(), self.pairs.len());
        Ok(())
    }

    pub fn validate(&self) -> DatasetValidation {
        let mut pairs_by_type = BTreeMap::new();
        let mut categories = BTreeSet::new();
        let mut groups = BTreeSet::new();
        for pair in &self.pairs {
            *pairs_by_type.entry(pair.kind).or_insert(0) += 1;
            categories.insert(pair.metadata.category.as_str());
            groups.insert(pair.metadata.group.as_str());
        }

        let lengths: Vec<usize> = self.pairs.iter().map(|p| p.answer.chars().count()).collect();
        let avg = if lengths.is_empty() {
            0.0
        } else {
            lengths.iter().sum::<usize>() as f64 / lengths.len() as f64
        };

        let validation = DatasetValidation {
            total_pairs: self.pairs.len(),
            pairs_by_type,
            unique_categories: categories.len(),
            unique_groups: groups.len(),
            avg_answer_length: (avg * 100.0).round() / 100.0,
            min_answer_length: lengths.iter().copied().min().unwrap_or(0),
            max_answer_length: lengths.iter().copied().max().unwrap_or(0),
            is_valid: self.pairs.len() >= MIN_RECOMMENDED_PAIRS,
        };

        info!(
            "Validation: {} pairs, valid={}",
            validation.total_pairs, validation.is_valid
        );
        validation
    }

    /// Share of each group's known details that the dataset mentions.
    pub fn coverage(&self, hierarchy: &CategoryHierarchy) -> BTreeMap<String, f64> {
        let seen: BTreeSet<String> = self
            .pairs
            .iter()
            .map(|p| p.metadata.category.clone())
            .collect();
        hierarchy.coverage(&seen)
    }
}

/// Reads a published narrative report and category index, then exports the
/// dataset to `output_path`.
pub fn build_finetune_dataset(
    narrative_report: &Path,
    categories: &Path,
    output_path: &Path,
    format: JsonlFormat,
) -> Result<FineTuneResult> {
    let entries = read_narrative_report(narrative_report)?;
    info!("Loaded {} narrative entries", entries.len());

    let hierarchy = if categories.exists() {
        CategoryHierarchy::load_json(categories)?
    } else {
        warn!("Categories file not found: {}", categories.display());
        CategoryHierarchy::default()
    };

    let builder = FineTuneDatasetBuilder::from_entries(&entries);
    builder.export_jsonl_file(output_path, format)?;

    Ok(FineTuneResult {
        output_path: output_path.to_path_buf(),
        validation: builder.validate(),
        category_coverage: builder.coverage(&hierarchy),
    })
}
