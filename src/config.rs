use crate::currency::CurrencyFormat;
use crate::error::{DreError, Result};
use crate::month::MonthTable;
use crate::sanitizer::{Substitution, SubstitutionTable};
use crate::schema::ColumnNames;
use chrono::NaiveDate;
use log::{debug, info};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const ENV_REFERENCE_YEAR: &str = "DRE_REFERENCE_YEAR";
pub const ENV_INPUT_PATH: &str = "DRE_INPUT_PATH";
pub const ENV_OUTPUT_DIR: &str = "DRE_OUTPUT_DIR";
pub const ENV_GROUP_COLUMN: &str = "DRE_GROUP_COLUMN";
pub const ENV_DETAIL_COLUMN: &str = "DRE_DETAIL_COLUMN";
pub const ENV_MONTH_COLUMN: &str = "DRE_MONTH_COLUMN";
pub const ENV_AMOUNT_COLUMN: &str = "DRE_AMOUNT_COLUMN";
pub const ENV_REPORT_MODE: &str = "DRE_REPORT_MODE";
pub const ENV_MONTH_LOCALE: &str = "DRE_MONTH_LOCALE";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub enum TextEncoding {
    #[schemars(description = "ISO-8859-1: every byte maps to the code point of the same value")]
    Latin1,
    #[schemars(description = "Windows-1252: Latin-1 with printable characters such as € in 0x80-0x9F")]
    Windows1252,
    #[schemars(description = "UTF-8, with or without a byte-order mark")]
    Utf8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub enum ReportMode {
    #[default]
    #[schemars(description = "Replace the narrative report with this run's entries")]
    Overwrite,
    #[schemars(
        description = "Keep the existing narrative report and append this run's entries. The run is refused if any of its months already exist in the report."
    )]
    Append,
}

impl FromStr for ReportMode {
    type Err = DreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "overwrite" => Ok(ReportMode::Overwrite),
            "append" => Ok(ReportMode::Append),
            other => Err(DreError::InvalidConfig(format!(
                "unknown report mode '{}', expected 'overwrite' or 'append'",
                other
            ))),
        }
    }
}

/// Language of the month abbreviations in the export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub enum MonthLocale {
    #[default]
    #[schemars(description = "Jan Fev Mar Abr Mai Jun Jul Ago Set Out Nov Dez")]
    Portuguese,
    #[schemars(description = "Jan Feb Mar Apr May Jun Jul Aug Sep Oct Nov Dec")]
    English,
}

impl MonthLocale {
    pub fn table(&self) -> MonthTable {
        match self {
            MonthLocale::Portuguese => MonthTable::portuguese(),
            MonthLocale::English => MonthTable::english(),
        }
    }
}

impl FromStr for MonthLocale {
    type Err = DreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "portuguese" | "pt" | "pt-br" => Ok(MonthLocale::Portuguese),
            "english" | "en" => Ok(MonthLocale::English),
            other => Err(DreError::InvalidConfig(format!(
                "unknown month locale '{}', expected 'portuguese' or 'english'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct InputSettings {
    pub path: PathBuf,

    #[schemars(description = "Field delimiter, ';' for the source exports")]
    pub separator: char,

    #[schemars(
        description = "0-based index of the header among non-blank lines; earlier lines are export metadata and blank lines are not counted"
    )]
    pub header_row: usize,

    pub encoding: TextEncoding,
}

impl Default for InputSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("DRE_BI(BaseDRE).csv"),
            separator: ';',
            header_row: 4,
            encoding: TextEncoding::Latin1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct PipelineConfig {
    #[schemars(description = "Year attached to the month abbreviations, which carry no year of their own")]
    pub reference_year: i32,

    pub month_locale: MonthLocale,

    pub columns: ColumnNames,

    pub input: InputSettings,

    pub currency: CurrencyFormat,

    #[schemars(
        with = "Vec<Substitution>",
        description = "Ordered text repairs. More specific patterns must come before the patterns they contain."
    )]
    pub substitutions: SubstitutionTable,

    pub output_dir: PathBuf,

    pub report_mode: ReportMode,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            reference_year: 2025,
            month_locale: MonthLocale::Portuguese,
            columns: ColumnNames::default(),
            input: InputSettings::default(),
            currency: CurrencyFormat::default(),
            substitutions: SubstitutionTable::default(),
            output_dir: PathBuf::from("output"),
            report_mode: ReportMode::Overwrite,
        }
    }
}

impl PipelineConfig {
    /// Defaults, then the optional JSON file, then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(p) => Self::from_json_file(p)?,
            None => Self::default(),
        };
        let config = config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        info!("Loading pipeline configuration from {}", path.display());
        let content = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_env() -> Result<Self> {
        let config = Self::default().apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Overrides fields from `lookup`, which maps variable names to values.
    pub fn apply_env<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(year) = lookup(ENV_REFERENCE_YEAR) {
            self.reference_year = year.trim().parse().map_err(|_| {
                DreError::InvalidConfig(format!("{} must be an integer, got '{}'", ENV_REFERENCE_YEAR, year))
            })?;
        }
        if let Some(path) = lookup(ENV_INPUT_PATH) {
            self.input.path = PathBuf::from(path);
        }
        if let Some(dir) = lookup(ENV_OUTPUT_DIR) {
            self.output_dir = PathBuf::from(dir);
        }
        if let Some(column) = lookup(ENV_GROUP_COLUMN) {
            self.columns.group = column;
        }
        if let Some(column) = lookup(ENV_DETAIL_COLUMN) {
            self.columns.detail = column;
        }
        if let Some(column) = lookup(ENV_MONTH_COLUMN) {
            self.columns.month = column;
        }
        if let Some(column) = lookup(ENV_AMOUNT_COLUMN) {
            self.columns.amount = column;
        }
        if let Some(mode) = lookup(ENV_REPORT_MODE) {
            self.report_mode = mode.parse()?;
        }
        if let Some(locale) = lookup(ENV_MONTH_LOCALE) {
            self.month_locale = locale.parse()?;
        }

        debug!("Effective configuration: {:?}", self);
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if NaiveDate::from_ymd_opt(self.reference_year, 1, 1).is_none() {
            return Err(DreError::InvalidConfig(format!(
                "reference year {} is out of range",
                self.reference_year
            )));
        }

        let required = self.columns.required();
        for (i, column) in required.iter().enumerate() {
            if column.trim().is_empty() {
                return Err(DreError::InvalidConfig(
                    "required column names cannot be empty".to_string(),
                ));
            }
            if required[..i].contains(column) {
                return Err(DreError::InvalidConfig(format!(
                    "column '{}' is mapped to more than one required field",
                    column
                )));
            }
        }

        if self.currency.symbol.trim().is_empty() {
            return Err(DreError::InvalidConfig(
                "currency symbol cannot be empty".to_string(),
            ));
        }

        if !self.input.separator.is_ascii() {
            return Err(DreError::InvalidConfig(format!(
                "separator {:?} must be a single ASCII character",
                self.input.separator
            )));
        }

        Ok(())
    }
}

pub fn config_json_schema() -> Result<String> {
    let schema = schemars::schema_for!(PipelineConfig);
    Ok(serde_json::to_string_pretty(&schema)?)
}
