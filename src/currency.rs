use crate::error::{DreError, Result};
use crate::schema::CellValue;
use log::warn;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Brazilian-style currency text: optional sign, symbol, `.` thousands, `,` decimals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CurrencyFormat {
    #[schemars(description = "Currency symbol stripped on parse and prepended on format, e.g. 'R$'")]
    pub symbol: String,
}

impl Default for CurrencyFormat {
    fn default() -> Self {
        Self {
            symbol: "R$".to_string(),
        }
    }
}

impl CurrencyFormat {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
        }
    }

    /// Parses `"R$ 1.234,56"`, `"-R$ 19.026"` or `"R$ -5"` into a signed amount.
    ///
    /// Blank input is treated as zero. The sign may sit before or after the
    /// symbol; anything besides digits, dots and commas is rejected.
    pub fn parse(&self, text: &str) -> Result<f64> {
        let mut value = text.trim();

        if value.is_empty() {
            warn!("Received empty currency string, returning 0.0");
            return Ok(0.0);
        }

        let mut is_negative = false;
        if let Some(rest) = value.strip_prefix('-') {
            is_negative = true;
            value = rest.trim();
        }

        let without_symbol = if self.symbol.is_empty() {
            value.to_string()
        } else {
            value.replace(self.symbol.as_str(), "")
        };
        let mut value = without_symbol.trim();

        if let Some(rest) = value.strip_prefix('-') {
            is_negative = true;
            value = rest.trim();
        }

        if value.is_empty() || !value.chars().all(|c| c.is_ascii_digit() || c == '.' || c == ',') {
            return Err(DreError::InvalidFormat {
                value: text.to_string(),
                reason: format!("value contains invalid characters: '{}'", value),
            });
        }

        let normalized = value.replace('.', "").replace(',', ".");
        let parsed: f64 = normalized.parse().map_err(|_| DreError::InvalidFormat {
            value: text.to_string(),
            reason: format!("could not convert '{}' to a number", normalized),
        })?;

        Ok(if is_negative { -parsed } else { parsed })
    }

    /// Missing cells are zero; non-text cells are a type mismatch.
    pub fn parse_cell(&self, cell: &CellValue) -> Result<f64> {
        match cell {
            CellValue::Missing => {
                warn!("Received missing currency value, returning 0.0");
                Ok(0.0)
            }
            CellValue::Text(text) => self.parse(text),
            other => Err(DreError::TypeMismatch {
                expected: "currency text",
                found: other.describe(),
            }),
        }
    }

    /// Renders `1234.5` as `"R$ 1.234,50"` and `-19026.0` as `"-R$ 19.026,00"`.
    pub fn format(&self, value: f64) -> Result<String> {
        if !value.is_finite() {
            return Err(DreError::InvalidFormat {
                value: value.to_string(),
                reason: "amount is not a finite number".to_string(),
            });
        }

        let fixed = format!("{:.2}", value.abs());
        let (int_part, dec_part) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));

        let digits: Vec<char> = int_part.chars().collect();
        let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
        for (i, digit) in digits.iter().enumerate() {
            if i > 0 && (digits.len() - i) % 3 == 0 {
                grouped.push('.');
            }
            grouped.push(*digit);
        }

        let sign = if value < 0.0 && fixed != "0.00" { "-" } else { "" };
        Ok(format!("{}{} {},{}", sign, self.symbol, grouped, dec_part))
    }
}

/// Parses with the default `R$` format.
pub fn parse_amount(text: &str) -> Result<f64> {
    CurrencyFormat::default().parse(text)
}

pub fn parse_amount_cell(cell: &CellValue) -> Result<f64> {
    CurrencyFormat::default().parse_cell(cell)
}

pub fn format_amount(value: f64) -> Result<String> {
    CurrencyFormat::default().format(value)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AmountTotals {
    pub total: f64,
    pub positive: f64,
    pub negative: f64,
}

impl AmountTotals {
    pub fn from_amounts<I: IntoIterator<Item = f64>>(amounts: I) -> Self {
        amounts
            .into_iter()
            .fold(AmountTotals::default(), |mut acc, amount| {
                acc.total += amount;
                if amount > 0.0 {
                    acc.positive += amount;
                } else if amount < 0.0 {
                    acc.negative += amount;
                }
                acc
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_documented_values() {
        assert_eq!(parse_amount("R$ 1.234,56").unwrap(), 1234.56);
        assert_eq!(parse_amount("-R$ 19.026").unwrap(), -19026.0);
        assert_eq!(parse_amount("R$ 0,00").unwrap(), 0.0);
        assert_eq!(parse_amount("").unwrap(), 0.0);
        assert_eq!(parse_amount("   ").unwrap(), 0.0);
    }

    #[test]
    fn test_parse_variants() {
        assert_eq!(parse_amount("R$ 63.713").unwrap(), 63713.0);
        assert_eq!(parse_amount("-R$ 1.234,56").unwrap(), -1234.56);
        assert_eq!(parse_amount("R$ -1.234,56").unwrap(), -1234.56);
        assert_eq!(parse_amount("  R$ 1.234,56  ").unwrap(), 1234.56);
        assert_eq!(parse_amount("R$ 1.234.567,89").unwrap(), 1234567.89);
        assert_eq!(parse_amount("R$ 5").unwrap(), 5.0);
        assert_eq!(parse_amount("12,5").unwrap(), 12.5);
    }

    #[test]
    fn test_parse_rejects_invalid_characters() {
        for bad in ["R$ abc", "R$ 12a,00", "US$ 10,00", "R$", "R$ 1,2,3"] {
            let err = parse_amount(bad).unwrap_err();
            assert!(
                matches!(err, DreError::InvalidFormat { .. }),
                "expected InvalidFormat for {:?}, got {:?}",
                bad,
                err
            );
        }
    }

    #[test]
    fn test_parse_cell() {
        assert_eq!(parse_amount_cell(&CellValue::Missing).unwrap(), 0.0);
        assert_eq!(
            parse_amount_cell(&CellValue::Text("R$ 10,00".to_string())).unwrap(),
            10.0
        );
        assert!(matches!(
            parse_amount_cell(&CellValue::Number(10.0)),
            Err(DreError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(1000.5).unwrap(), "R$ 1.000,50");
        assert_eq!(format_amount(-19026.0).unwrap(), "-R$ 19.026,00");
        assert_eq!(format_amount(0.0).unwrap(), "R$ 0,00");
        assert_eq!(format_amount(-0.001).unwrap(), "R$ 0,00");
        assert_eq!(format_amount(1234567.891).unwrap(), "R$ 1.234.567,89");
        assert_eq!(format_amount(999.0).unwrap(), "R$ 999,00");
        assert!(format_amount(f64::NAN).is_err());
    }

    #[test]
    fn test_parse_format_round_trip_on_value() {
        for text in ["R$ 1.234,56", "-R$ 19.026", "R$ 0,00", "R$ 63.713", "R$ -7,05"] {
            let value = parse_amount(text).unwrap();
            let again = parse_amount(&format_amount(value).unwrap()).unwrap();
            assert!((value - again).abs() < 1e-9, "{} -> {} -> {}", text, value, again);
        }
    }

    #[test]
    fn test_custom_symbol() {
        let usd = CurrencyFormat::new("US$");
        assert_eq!(usd.parse("-US$ 2.000,10").unwrap(), -2000.1);
        assert_eq!(usd.format(2000.1).unwrap(), "US$ 2.000,10");
    }

    #[test]
    fn test_amount_totals() {
        let totals = AmountTotals::from_amounts([100.0, -40.0, 0.0, 10.0]);
        assert_eq!(totals.total, 70.0);
        assert_eq!(totals.positive, 110.0);
        assert_eq!(totals.negative, -40.0);
    }
}
