use crate::month::MonthTable;
use chrono::NaiveDate;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A single cell as handed over by the tabular loader.
///
/// Normalization stages replace cells in place with their canonical forms:
/// amounts become `Number`, month abbreviations become `Date`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CellValue {
    Missing,
    Text(String),
    Number(f64),
    Date(NaiveDate),
}

impl CellValue {
    /// Empty or whitespace-only raw text is a missing cell.
    pub fn from_raw(raw: &str) -> Self {
        if raw.trim().is_empty() {
            CellValue::Missing
        } else {
            CellValue::Text(raw.to_string())
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, CellValue::Missing)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            CellValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Short name of the variant, used in type-mismatch diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            CellValue::Missing => "missing",
            CellValue::Text(_) => "text",
            CellValue::Number(_) => "number",
            CellValue::Date(_) => "date",
        }
    }

    pub fn describe(&self) -> String {
        match self {
            CellValue::Missing => "missing value".to_string(),
            other => format!("{}: {}", other.kind(), other.to_display_string()),
        }
    }

    /// Renders the cell the way it is written to snapshots and reports.
    pub fn to_display_string(&self) -> String {
        match self {
            CellValue::Missing => String::new(),
            CellValue::Text(s) => s.clone(),
            CellValue::Number(n) => n.to_string(),
            CellValue::Date(d) => d.format("%Y-%m-%d").to_string(),
        }
    }

    /// Non-blank textual rendering, `None` for missing or blank cells.
    pub fn to_label(&self) -> Option<String> {
        match self {
            CellValue::Missing => None,
            CellValue::Text(s) if s.trim().is_empty() => None,
            other => Some(other.to_display_string()),
        }
    }
}

/// Row-major table with named, ordered columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LedgerTable {
    columns: Vec<String>,
    rows: Vec<Vec<CellValue>>,
}

impl LedgerTable {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn from_rows(columns: Vec<String>, rows: Vec<Vec<CellValue>>) -> Self {
        let mut table = Self::new(columns);
        for row in rows {
            table.push_row(row);
        }
        table
    }

    /// Builds a table from raw strings; blank strings become `Missing`.
    pub fn from_text_rows(columns: &[&str], rows: &[&[&str]]) -> Self {
        Self::from_rows(
            columns.iter().map(|c| c.to_string()).collect(),
            rows.iter()
                .map(|row| row.iter().map(|raw| CellValue::from_raw(raw)).collect())
                .collect(),
        )
    }

    /// Appends a row, padding short rows with `Missing` and truncating long ones.
    pub fn push_row(&mut self, mut row: Vec<CellValue>) {
        row.resize(self.columns.len(), CellValue::Missing);
        self.rows.push(row);
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn columns_mut(&mut self) -> &mut [String] {
        &mut self.columns
    }

    pub fn rows(&self) -> &[Vec<CellValue>] {
        &self.rows
    }

    /// Mutable rows as fixed-width slices; cells can change, widths cannot.
    pub fn rows_mut(&mut self) -> impl Iterator<Item = &mut [CellValue]> + '_ {
        self.rows.iter_mut().map(Vec::as_mut_slice)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    pub fn cell(&self, row: usize, column: &str) -> Option<&CellValue> {
        let idx = self.column_index(column)?;
        self.rows.get(row).and_then(|r| r.get(idx))
    }

    pub fn cell_mut(&mut self, row: usize, column: &str) -> Option<&mut CellValue> {
        let idx = self.column_index(column)?;
        self.rows.get_mut(row).and_then(|r| r.get_mut(idx))
    }

    /// Drops every column for which `keep` returns false.
    pub fn retain_columns<F>(&mut self, mut keep: F)
    where
        F: FnMut(&str, &[Vec<CellValue>], usize) -> bool,
    {
        let keep_mask: Vec<bool> = (0..self.columns.len())
            .map(|idx| keep(&self.columns[idx], &self.rows, idx))
            .collect();

        let mut mask = keep_mask.iter();
        self.columns.retain(|_| *mask.next().unwrap_or(&true));
        for row in &mut self.rows {
            let mut mask = keep_mask.iter();
            row.retain(|_| *mask.next().unwrap_or(&true));
        }
    }

    /// Typed views of every row.
    pub fn records(&self, columns: &ColumnNames, months: &MonthTable) -> Vec<LedgerRecord> {
        (0..self.rows.len())
            .map(|idx| LedgerRecord::from_row(self, idx, columns, months))
            .collect()
    }
}

/// Configurable names of the export's columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ColumnNames {
    #[schemars(description = "Macro-group column, e.g. 'Nome Grupo' holding 'RECEITAS S/ VENDAS'")]
    pub group: String,

    #[schemars(description = "Detail-category column, e.g. 'cc_nome' holding 'DINHEIRO'")]
    pub detail: String,

    #[schemars(description = "Month abbreviation column, e.g. 'Mês' holding 'Ago'")]
    pub month: String,

    #[schemars(description = "Realized amount column holding locale-formatted currency, e.g. 'R$ 1.234,56'")]
    pub amount: String,

    pub store: Option<String>,
    pub cost_center_key: Option<String>,
    pub parent_cost_center: Option<String>,

    #[schemars(description = "Optional sub-detail column appended to narratives when it differs from the detail")]
    pub sub_detail: Option<String>,
}

impl Default for ColumnNames {
    fn default() -> Self {
        Self {
            group: "Nome Grupo".to_string(),
            detail: "cc_nome".to_string(),
            month: "Mês".to_string(),
            amount: "Realizado".to_string(),
            store: Some("Loja".to_string()),
            cost_center_key: Some("_key_centro_custo".to_string()),
            parent_cost_center: Some("cc_parent_nome".to_string()),
            sub_detail: Some("Camada03".to_string()),
        }
    }
}

impl ColumnNames {
    /// Columns that must be present before any row is processed.
    pub fn required(&self) -> Vec<String> {
        vec![
            self.group.clone(),
            self.detail.clone(),
            self.month.clone(),
            self.amount.clone(),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum Amount {
    Value(f64),
    /// Amount still in its source text form (not yet normalized).
    Text(String),
}

/// Explicit view of one ledger row. Every field is optional; `None` means the
/// column is absent or the cell is blank.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LedgerRecord {
    pub store: Option<String>,
    pub cost_center_key: Option<String>,
    pub parent_cost_center: Option<String>,
    pub group: Option<String>,
    pub detail: Option<String>,
    pub sub_detail: Option<String>,

    #[schemars(description = "Month as displayed: the source abbreviation, or 'Ago/2025' once resolved")]
    pub month: Option<String>,

    #[schemars(description = "First day of the resolved month")]
    pub period: Option<NaiveDate>,

    pub amount: Option<Amount>,
}

impl LedgerRecord {
    pub fn from_row(
        table: &LedgerTable,
        row: usize,
        columns: &ColumnNames,
        months: &MonthTable,
    ) -> Self {
        let label = |name: Option<&String>| -> Option<String> {
            name.and_then(|n| table.cell(row, n)).and_then(CellValue::to_label)
        };

        let (month, period) = match table.cell(row, &columns.month) {
            Some(CellValue::Date(d)) => (Some(months.label_for(*d)), Some(*d)),
            Some(cell) => (cell.to_label(), None),
            None => (None, None),
        };

        let amount = match table.cell(row, &columns.amount) {
            Some(CellValue::Number(n)) => Some(Amount::Value(*n)),
            Some(cell) => cell.to_label().map(Amount::Text),
            None => None,
        };

        Self {
            store: label(columns.store.as_ref()),
            cost_center_key: label(columns.cost_center_key.as_ref()),
            parent_cost_center: label(columns.parent_cost_center.as_ref()),
            group: label(Some(&columns.group)),
            detail: label(Some(&columns.detail)),
            sub_detail: label(columns.sub_detail.as_ref()),
            month,
            period,
            amount,
        }
    }

    pub fn amount_value(&self) -> Option<f64> {
        match self.amount {
            Some(Amount::Value(v)) => Some(v),
            _ => None,
        }
    }
}

pub fn ledger_record_json_schema() -> Result<String, serde_json::Error> {
    let schema = schemars::schema_for!(LedgerRecord);
    serde_json::to_string_pretty(&schema)
}
