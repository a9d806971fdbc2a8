use crate::currency::CurrencyFormat;
use crate::error::Result;
use crate::schema::{Amount, LedgerRecord};
use log::{info, warn};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub const UNKNOWN_MONTH: &str = "N/D";
pub const UNKNOWN_GROUP: &str = "Unknown Group";
pub const UNKNOWN_DETAIL: &str = "Unknown Item";
pub const UNKNOWN_AMOUNT: &str = "0";

/// One row of the narrative report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct NarrativeEntry {
    /// Empty when synthesis failed for this record.
    pub narrative: String,
    #[schemars(description = "Resolved period as YYYY-MM-DD, or the source month label")]
    pub month: String,
    pub group: String,
    pub detail: String,
    pub amount: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct NarrativeSummary {
    pub total_records: usize,
    pub narratives_generated: usize,
    pub empty_narratives: usize,
    /// Fields rendered with an "unknown" placeholder, summed over all records.
    pub placeholder_fields: usize,
    pub avg_narrative_length: f64,
    pub unique_groups: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NarrativeBatch {
    pub entries: Vec<NarrativeEntry>,
    pub summary: NarrativeSummary,
}

struct Rendered {
    text: String,
    placeholders: usize,
}

#[derive(Debug, Clone, Default)]
pub struct NarrativeSynthesizer {
    currency: CurrencyFormat,
}

impl NarrativeSynthesizer {
    pub fn new(currency: CurrencyFormat) -> Self {
        Self { currency }
    }

    /// Never fails: missing fields get placeholders and an unrenderable record
    /// yields an empty string.
    pub fn synthesize(&self, record: &LedgerRecord) -> String {
        match self.render(record) {
            Ok(rendered) => rendered.text,
            Err(e) => {
                warn!("Error creating narrative for record: {}", e);
                String::new()
            }
        }
    }

    fn render(&self, record: &LedgerRecord) -> Result<Rendered> {
        let mut placeholders = 0;
        let mut or_placeholder = |value: Option<&str>, placeholder: &'static str| -> String {
            match value {
                Some(v) => v.to_string(),
                None => {
                    placeholders += 1;
                    placeholder.to_string()
                }
            }
        };

        let month = or_placeholder(record.month.as_deref(), UNKNOWN_MONTH);
        let group = or_placeholder(record.group.as_deref(), UNKNOWN_GROUP);
        let detail = or_placeholder(record.detail.as_deref(), UNKNOWN_DETAIL);

        let amount = match &record.amount {
            Some(Amount::Value(v)) => self.currency.format(*v)?,
            Some(Amount::Text(raw)) => raw.clone(),
            None => {
                placeholders += 1;
                UNKNOWN_AMOUNT.to_string()
            }
        };

        let mut text = format!(
            "In {}, group '{}' recorded {} for item '{}'",
            month, group, amount, detail
        );

        match record.sub_detail.as_deref() {
            Some(sub) if sub != detail => text.push_str(&format!(" (Subcategory: {}).", sub)),
            _ => text.push('.'),
        }

        Ok(Rendered { text, placeholders })
    }

    pub fn entry(&self, record: &LedgerRecord) -> (NarrativeEntry, usize) {
        let (narrative, placeholders) = match self.render(record) {
            Ok(rendered) => (rendered.text, rendered.placeholders),
            Err(e) => {
                warn!("Error creating narrative for record: {}", e);
                (String::new(), 0)
            }
        };

        let month = match (record.period, &record.month) {
            (Some(period), _) => period.format("%Y-%m-%d").to_string(),
            (None, Some(label)) => label.clone(),
            (None, None) => String::new(),
        };

        let entry = NarrativeEntry {
            narrative,
            month,
            group: record.group.clone().unwrap_or_default(),
            detail: record.detail.clone().unwrap_or_default(),
            amount: record.amount_value(),
        };
        (entry, placeholders)
    }

    pub fn generate(&self, records: &[LedgerRecord]) -> NarrativeBatch {
        info!("Generating narratives for {} records", records.len());

        let mut entries = Vec::with_capacity(records.len());
        let mut placeholder_fields = 0;
        for record in records {
            let (entry, placeholders) = self.entry(record);
            placeholder_fields += placeholders;
            entries.push(entry);
        }

        let summary = summarize(&entries, placeholder_fields);
        info!(
            "Generated {} narratives from {} records ({} empty)",
            summary.narratives_generated, summary.total_records, summary.empty_narratives
        );

        NarrativeBatch { entries, summary }
    }
}

fn summarize(entries: &[NarrativeEntry], placeholder_fields: usize) -> NarrativeSummary {
    let total_records = entries.len();
    let narratives_generated = entries.iter().filter(|e| !e.narrative.is_empty()).count();
    let total_length: usize = entries.iter().map(|e| e.narrative.chars().count()).sum();
    let unique_groups: BTreeSet<&str> = entries
        .iter()
        .filter(|e| !e.group.is_empty())
        .map(|e| e.group.as_str())
        .collect();

    NarrativeSummary {
        total_records,
        narratives_generated,
        empty_narratives: total_records - narratives_generated,
        placeholder_fields,
        avg_narrative_length: if total_records == 0 {
            0.0
        } else {
            total_length as f64 / total_records as f64
        },
        unique_groups: unique_groups.len(),
    }
}

pub fn synthesize(record: &LedgerRecord) -> String {
    NarrativeSynthesizer::default().synthesize(record)
}

pub fn generate_narratives(records: &[LedgerRecord], currency: &CurrencyFormat) -> NarrativeBatch {
    NarrativeSynthesizer::new(currency.clone()).generate(records)
}
