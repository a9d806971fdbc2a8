use crate::error::{DreError, Result};
use crate::schema::{CellValue, LedgerTable};
use log::debug;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Repairs observed in DRE exports. Applied top to bottom: accent-stripped
/// words first, then multi-character mojibake runs, then single characters.
const DEFAULT_SUBSTITUTIONS: &[(&str, &str)] = &[
    ("DEDUES", "DEDUÇÕES"),
    ("VARIVEIS", "VARIÁVEIS"),
    ("SERVIOS", "SERVIÇOS"),
    ("Servios", "Serviços"),
    ("AOUGUE", "AÇOUGUE"),
    ("CARVO", "CARVÃO"),
    ("Vrios", "Vários"),
    ("Ms", "Mês"),
    ("Ã§Ã£", "çã"),
    ("Ã‡Ã•", "ÇÕ"),
    ("Ã\u{87}Ã\u{95}", "ÇÕ"),
    ("Ã¡", "á"),
    ("Ã\u{a0}", "à"),
    ("Ã¢", "â"),
    ("Ã£", "ã"),
    ("Ã§", "ç"),
    ("Ã©", "é"),
    ("Ãª", "ê"),
    ("Ã\u{ad}", "í"),
    ("Ã³", "ó"),
    ("Ã´", "ô"),
    ("Ãµ", "õ"),
    ("Ãº", "ú"),
    ("Ã‡", "Ç"),
    ("Ã\u{87}", "Ç"),
    ("Ã‰", "É"),
    ("ÃŠ", "Ê"),
    ("Ã“", "Ó"),
    ("Ã•", "Õ"),
    ("Ã\u{95}", "Õ"),
    ("Ãš", "Ú"),
    ("Ã\u{81}", "Á"),
    ("Ã\u{8d}", "Í"),
    ("Ã‚", "Â"),
    ("Ãƒ", "Ã"),
    ("Ã\u{83}", "Ã"),
    ("Âº", "º"),
    ("Âª", "ª"),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Substitution {
    #[schemars(description = "Literal corrupted text to look for")]
    pub pattern: String,
    #[schemars(description = "Correct text written in its place")]
    pub replacement: String,
}

impl Substitution {
    pub fn new(pattern: impl Into<String>, replacement: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            replacement: replacement.into(),
        }
    }
}

/// Ordered literal replacements, validated on construction.
///
/// A table is rejected when a pattern is empty or repeated, when a pattern
/// contains an earlier pattern (the earlier one would always consume it
/// first), or when a replacement contains any pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Substitution>", into = "Vec<Substitution>")]
pub struct SubstitutionTable {
    entries: Vec<Substitution>,
}

impl Default for SubstitutionTable {
    fn default() -> Self {
        Self {
            entries: DEFAULT_SUBSTITUTIONS
                .iter()
                .map(|(pattern, replacement)| Substitution::new(*pattern, *replacement))
                .collect(),
        }
    }
}

impl TryFrom<Vec<Substitution>> for SubstitutionTable {
    type Error = DreError;

    fn try_from(entries: Vec<Substitution>) -> Result<Self> {
        Self::new(entries)
    }
}

impl From<SubstitutionTable> for Vec<Substitution> {
    fn from(table: SubstitutionTable) -> Self {
        table.entries
    }
}

impl SubstitutionTable {
    pub fn new(entries: Vec<Substitution>) -> Result<Self> {
        for (i, entry) in entries.iter().enumerate() {
            if entry.pattern.is_empty() {
                return Err(DreError::InvalidConfig(format!(
                    "substitution #{} has an empty pattern",
                    i + 1
                )));
            }

            for earlier in &entries[..i] {
                if earlier.pattern == entry.pattern {
                    return Err(DreError::InvalidConfig(format!(
                        "substitution pattern {:?} appears more than once",
                        entry.pattern
                    )));
                }
                if entry.pattern.contains(earlier.pattern.as_str()) {
                    return Err(DreError::InvalidConfig(format!(
                        "substitution pattern {:?} is shadowed by earlier pattern {:?}; list it first",
                        entry.pattern, earlier.pattern
                    )));
                }
            }
        }

        for entry in &entries {
            if let Some(hit) = entries
                .iter()
                .find(|other| entry.replacement.contains(other.pattern.as_str()))
            {
                return Err(DreError::InvalidConfig(format!(
                    "replacement {:?} reintroduces pattern {:?}",
                    entry.replacement, hit.pattern
                )));
            }
        }

        Ok(Self { entries })
    }

    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn entries(&self) -> &[Substitution] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Applies every substitution in order, then trims.
    pub fn sanitize(&self, text: &str) -> String {
        let mut cleaned = text.to_string();
        for entry in &self.entries {
            if cleaned.contains(entry.pattern.as_str()) {
                cleaned = cleaned.replace(entry.pattern.as_str(), &entry.replacement);
            }
        }
        cleaned.trim().to_string()
    }

    /// Only text cells are touched.
    pub fn sanitize_cell(&self, cell: CellValue) -> CellValue {
        match cell {
            CellValue::Text(text) => CellValue::Text(self.sanitize(&text)),
            other => other,
        }
    }

    /// Repairs column headers in place, returning how many changed.
    pub fn sanitize_headers(&self, table: &mut LedgerTable) -> usize {
        let mut repaired = 0;
        for column in table.columns_mut() {
            let cleaned = self.sanitize(column);
            if cleaned != *column {
                debug!("Repaired column header {:?} -> {:?}", column, cleaned);
                *column = cleaned;
                repaired += 1;
            }
        }
        repaired
    }

    /// Repairs every text cell in place; other cells are counted and left alone.
    pub fn sanitize_cells(&self, table: &mut LedgerTable) -> SanitizeStats {
        let mut stats = SanitizeStats::default();
        for row in table.rows_mut() {
            for cell in row.iter_mut() {
                match cell {
                    CellValue::Text(text) => {
                        let cleaned = self.sanitize(text);
                        if cleaned != *text {
                            *text = cleaned;
                            stats.cells_repaired += 1;
                        }
                    }
                    CellValue::Missing => {}
                    _ => stats.non_text_cells += 1,
                }
            }
        }
        stats
    }

    pub fn sanitize_table(&self, table: &mut LedgerTable) -> SanitizeStats {
        let headers_repaired = self.sanitize_headers(table);
        SanitizeStats {
            headers_repaired,
            ..self.sanitize_cells(table)
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SanitizeStats {
    pub headers_repaired: usize,
    pub cells_repaired: usize,
    /// Cells passed through untouched because they were not text.
    pub non_text_cells: usize,
}

pub fn sanitize(text: &str) -> String {
    SubstitutionTable::default().sanitize(text)
}
