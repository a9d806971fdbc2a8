use crate::config::{InputSettings, TextEncoding};
use crate::error::{DreError, Result};
use crate::schema::{CellValue, LedgerTable};
use encoding_rs::{UTF_8, WINDOWS_1252};
use log::{info, warn};
use std::fs;
use std::io;

/// Where raw ledger rows come from.
pub trait RecordSource {
    /// `Ok(None)` means there is no new data; it is not an error.
    fn load(&self) -> Result<Option<LedgerTable>>;

    fn describe(&self) -> String;
}

/// Reads the reporting tool's CSV export.
#[derive(Debug, Clone)]
pub struct CsvSource {
    settings: InputSettings,
}

impl CsvSource {
    pub fn new(settings: InputSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &InputSettings {
        &self.settings
    }

    fn decode(&self, bytes: Vec<u8>) -> Result<String> {
        let text: String = match self.settings.encoding {
            TextEncoding::Latin1 => encoding_rs::mem::decode_latin1(&bytes).into_owned(),
            TextEncoding::Windows1252 => {
                let (text, had_errors) = WINDOWS_1252.decode_without_bom_handling(&bytes);
                if had_errors {
                    warn!("Replaced undecodable Windows-1252 bytes in the export");
                }
                text.into_owned()
            }
            TextEncoding::Utf8 => UTF_8
                .decode_without_bom_handling_and_without_replacement(&bytes)
                .map(|text| text.into_owned())
                .ok_or_else(|| {
                    io::Error::new(io::ErrorKind::InvalidData, "export is not valid UTF-8")
                })?,
        };
        Ok(text
            .strip_prefix('\u{feff}')
            .map(str::to_string)
            .unwrap_or(text))
    }

    /// Parses decoded export text: skips the metadata lines, reads the header
    /// and turns blank cells into `Missing`. Blank lines never count towards
    /// `header_row`.
    pub fn parse_str(&self, content: &str) -> Result<LedgerTable> {
        let mut rest = content;
        let mut skipped = 0;
        while skipped < self.settings.header_row {
            let (line, tail) = match rest.find('\n') {
                Some(pos) => (&rest[..pos], &rest[pos + 1..]),
                None => return Err(DreError::EmptyInput),
            };
            if !line.trim().is_empty() {
                skipped += 1;
            }
            rest = tail;
        }
        rest = rest.trim_start_matches(|c| c == '\r' || c == '\n');

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(self.settings.separator as u8)
            .has_headers(true)
            .flexible(true)
            .from_reader(rest.as_bytes());

        let columns: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        if columns.iter().all(|c| c.trim().is_empty()) {
            return Err(DreError::EmptyInput);
        }

        let mut table = LedgerTable::new(columns);
        for (line, record) in reader.records().enumerate() {
            let record = record?;
            let row: Vec<CellValue> = record.iter().map(CellValue::from_raw).collect();
            if row.iter().all(CellValue::is_missing) {
                warn!("Skipping blank line {} after the header", line + 1);
                continue;
            }
            table.push_row(row);
        }

        table.retain_columns(|name, rows, idx| {
            !name.trim().is_empty() || rows.iter().any(|row| !row[idx].is_missing())
        });

        Ok(table)
    }
}

impl RecordSource for CsvSource {
    fn load(&self) -> Result<Option<LedgerTable>> {
        let path = &self.settings.path;

        if !path.exists() {
            info!("Input file {} not found, nothing to process", path.display());
            return Ok(None);
        }
        if !path.is_file() {
            return Err(DreError::IoError(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Path is not a valid file: {}", path.display()),
            )));
        }

        info!("Loading DRE CSV from: {}", path.display());
        let content = self.decode(fs::read(path)?)?;
        let table = self.parse_str(&content)?;

        info!(
            "Loaded {} records with {} columns",
            table.len(),
            table.columns().len()
        );
        Ok(Some(table))
    }

    fn describe(&self) -> String {
        format!("csv:{}", self.settings.path.display())
    }
}

/// A table already held in memory; `None` reports no new data.
#[derive(Debug, Clone, Default)]
pub struct InMemorySource {
    table: Option<LedgerTable>,
}

impl InMemorySource {
    pub fn new(table: LedgerTable) -> Self {
        Self { table: Some(table) }
    }

    pub fn empty() -> Self {
        Self { table: None }
    }
}

impl RecordSource for InMemorySource {
    fn load(&self) -> Result<Option<LedgerTable>> {
        Ok(self.table.clone())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

/// Fails with every missing column and every available one.
pub fn validate_columns(table: &LedgerTable, required: &[String]) -> Result<()> {
    let missing: Vec<String> = required
        .iter()
        .filter(|c| !table.has_column(c))
        .cloned()
        .collect();

    if !missing.is_empty() {
        return Err(DreError::MissingColumns {
            missing,
            available: table.columns().to_vec(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const EXPORT: &str = "Relatorio DRE\nEmpresa;X\n\nPeriodo;2025\nGerado em;01/09/2025\n\nLoja;Nome Grupo;cc_nome;Mês;Realizado;\n\
        001;RECEITAS;PIX;Ago;R$ 1.234,56;\n\
        ;;;;;\n\
        001;CUSTOS;CARVÃO;Ago;-R$ 19.026;\n";

    fn latin1(text: &str) -> Vec<u8> {
        text.chars().map(|c| c as u32 as u8).collect()
    }

    fn settings(path: PathBuf, encoding: TextEncoding) -> InputSettings {
        InputSettings {
            path,
            encoding,
            ..InputSettings::default()
        }
    }

    #[test]
    fn test_load_latin1_export() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dre.csv");
        fs::write(&path, latin1(EXPORT)).unwrap();

        let source = CsvSource::new(settings(path, TextEncoding::Latin1));
        let table = source.load().unwrap().unwrap();

        assert_eq!(
            table.columns(),
            &["Loja", "Nome Grupo", "cc_nome", "Mês", "Realizado"]
        );
        assert_eq!(table.len(), 2);
        assert_eq!(table.cell(1, "cc_nome"), Some(&CellValue::Text("CARVÃO".to_string())));
        assert_eq!(
            table.cell(0, "Realizado"),
            Some(&CellValue::Text("R$ 1.234,56".to_string()))
        );
    }

    #[test]
    fn test_load_utf8_with_bom() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dre.csv");
        fs::write(&path, format!("\u{feff}{}", EXPORT)).unwrap();

        let source = CsvSource::new(settings(path, TextEncoding::Utf8));
        let table = source.load().unwrap().unwrap();
        assert!(table.has_column("Mês"));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_missing_file_is_no_new_data() {
        let dir = tempfile::tempdir().unwrap();
        let source = CsvSource::new(settings(dir.path().join("absent.csv"), TextEncoding::Latin1));
        assert!(source.load().unwrap().is_none());
    }

    #[test]
    fn test_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let source = CsvSource::new(settings(dir.path().to_path_buf(), TextEncoding::Latin1));
        assert!(matches!(source.load(), Err(DreError::IoError(_))));
    }

    #[test]
    fn test_metadata_only_is_empty_input() {
        let source = CsvSource::new(InputSettings::default());
        assert!(matches!(source.parse_str("a\nb\n"), Err(DreError::EmptyInput)));
    }

    #[test]
    fn test_blank_lines_do_not_count_as_metadata() {
        let source = CsvSource::new(InputSettings {
            header_row: 2,
            ..InputSettings::default()
        });
        let table = source
            .parse_str("\nRelatorio DRE\n\r\n\nEmpresa;X\n\nNome Grupo;Realizado\nRECEITAS;10\n")
            .unwrap();

        assert_eq!(table.columns(), &["Nome Grupo", "Realizado"]);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_windows1252_decodes_euro_sign() {
        let bytes = b"Nome Grupo;Realizado\nRECEITAS;\x80 10\n".to_vec();
        let decode = |encoding| {
            CsvSource::new(InputSettings {
                encoding,
                header_row: 0,
                ..InputSettings::default()
            })
            .decode(bytes.clone())
            .unwrap()
        };

        assert!(decode(TextEncoding::Windows1252).contains("€ 10"));
        assert!(decode(TextEncoding::Latin1).contains("\u{80} 10"));
    }

    #[test]
    fn test_invalid_utf8_is_an_error() {
        let source = CsvSource::new(settings(PathBuf::from("x.csv"), TextEncoding::Utf8));
        assert!(matches!(
            source.decode(vec![0x4d, 0xea, 0x73]),
            Err(DreError::IoError(_))
        ));
    }

    #[test]
    fn test_validate_columns() {
        let table = LedgerTable::from_text_rows(&["Nome Grupo", "cc_nome"], &[]);
        let required = vec!["Nome Grupo".to_string(), "Mês".to_string(), "Realizado".to_string()];

        match validate_columns(&table, &required).unwrap_err() {
            DreError::MissingColumns { missing, available } => {
                assert_eq!(missing, vec!["Mês".to_string(), "Realizado".to_string()]);
                assert_eq!(available.len(), 2);
            }
            other => panic!("expected MissingColumns, got {:?}", other),
        }

        assert!(validate_columns(&table, &required[..1]).is_ok());
    }
}
