use crate::error::{DreError, Result};
use crate::schema::CellValue;
use chrono::{Datelike, NaiveDate};

const PORTUGUESE_MONTHS: [&str; 12] = [
    "Jan", "Fev", "Mar", "Abr", "Mai", "Jun", "Jul", "Ago", "Set", "Out", "Nov", "Dez",
];

const ENGLISH_MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// Ordered month abbreviations; index 0 is January.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonthTable {
    abbreviations: Vec<String>,
}

impl Default for MonthTable {
    fn default() -> Self {
        Self::portuguese()
    }
}

impl MonthTable {
    pub fn new(abbreviations: Vec<String>) -> Result<Self> {
        if abbreviations.len() != 12 {
            return Err(DreError::InvalidConfig(format!(
                "month table needs exactly 12 entries, got {}",
                abbreviations.len()
            )));
        }

        for (i, abbrev) in abbreviations.iter().enumerate() {
            if abbrev.trim().is_empty() {
                return Err(DreError::InvalidConfig(format!(
                    "month table entry #{} is empty",
                    i + 1
                )));
            }
            if abbreviations[..i]
                .iter()
                .any(|prev| prev.to_lowercase() == abbrev.to_lowercase())
            {
                return Err(DreError::InvalidConfig(format!(
                    "month abbreviation '{}' appears more than once",
                    abbrev
                )));
            }
        }

        Ok(Self { abbreviations })
    }

    pub fn portuguese() -> Self {
        Self {
            abbreviations: PORTUGUESE_MONTHS.iter().map(|m| m.to_string()).collect(),
        }
    }

    pub fn english() -> Self {
        Self {
            abbreviations: ENGLISH_MONTHS.iter().map(|m| m.to_string()).collect(),
        }
    }

    pub fn abbreviations(&self) -> &[String] {
        &self.abbreviations
    }

    /// 1-based month number; exact match wins over a case-insensitive one.
    pub fn month_number(&self, abbrev: &str) -> Option<u32> {
        let position = self
            .abbreviations
            .iter()
            .position(|m| m == abbrev)
            .or_else(|| {
                let lowered = abbrev.to_lowercase();
                self.abbreviations
                    .iter()
                    .position(|m| m.to_lowercase() == lowered)
            })?;
        Some(position as u32 + 1)
    }

    pub fn resolve(&self, abbrev: &str, reference_year: i32) -> Result<NaiveDate> {
        let trimmed = abbrev.trim();

        if trimmed.is_empty() {
            return Err(DreError::EmptyMonth);
        }

        let month = self
            .month_number(trimmed)
            .ok_or_else(|| DreError::UnknownMonth {
                value: trimmed.to_string(),
                valid: self.abbreviations.clone(),
            })?;

        NaiveDate::from_ymd_opt(reference_year, month, 1).ok_or_else(|| {
            DreError::InvalidDate(format!(
                "could not create date for month '{}' and year {}",
                trimmed, reference_year
            ))
        })
    }

    /// A missing cell means the month was lost upstream, unlike a typo.
    pub fn resolve_cell(&self, cell: &CellValue, reference_year: i32) -> Result<NaiveDate> {
        match cell {
            CellValue::Missing => Err(DreError::InvalidMonth),
            CellValue::Text(text) => self.resolve(text, reference_year),
            other => Err(DreError::TypeMismatch {
                expected: "month abbreviation text",
                found: other.describe(),
            }),
        }
    }

    /// `2025-08-01` renders as `Ago/2025`.
    pub fn label_for(&self, date: NaiveDate) -> String {
        let idx = date.month0() as usize;
        format!("{}/{}", self.abbreviations[idx], date.year())
    }
}

pub fn resolve_month(abbrev: &str, reference_year: i32) -> Result<NaiveDate> {
    MonthTable::default().resolve(abbrev, reference_year)
}

pub fn resolve_month_cell(cell: &CellValue, reference_year: i32) -> Result<NaiveDate> {
    MonthTable::default().resolve_cell(cell, reference_year)
}
