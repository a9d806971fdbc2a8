use crate::error::{DreError, Result};
use crate::schema::LedgerTable;
use log::info;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

/// Macro-group → sorted, duplicate-free detail labels.
///
/// Keys and lists are always sorted, so serializing the same data twice
/// yields identical bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct CategoryHierarchy(BTreeMap<String, Vec<String>>);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct HierarchySummary {
    pub total_groups: usize,
    pub total_details: usize,
    pub groups: Vec<String>,
    pub details_per_group: BTreeMap<String, usize>,
}

impl CategoryHierarchy {
    /// Sorts and deduplicates every list.
    pub fn from_map(map: BTreeMap<String, Vec<String>>) -> Self {
        Self(
            map.into_iter()
                .map(|(group, details)| {
                    let unique: BTreeSet<String> = details.into_iter().collect();
                    (group, unique.into_iter().collect())
                })
                .collect(),
        )
    }

    pub fn as_map(&self) -> &BTreeMap<String, Vec<String>> {
        &self.0
    }

    pub fn get(&self, group: &str) -> Option<&[String]> {
        self.0.get(group).map(|v| v.as_slice())
    }

    pub fn groups(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn summary(&self) -> HierarchySummary {
        HierarchySummary {
            total_groups: self.0.len(),
            total_details: self.0.values().map(Vec::len).sum(),
            groups: self.0.keys().cloned().collect(),
            details_per_group: self
                .0
                .iter()
                .map(|(group, details)| (group.clone(), details.len()))
                .collect(),
        }
    }

    /// Share of each group's details that appear in `seen`; groups without
    /// details report 0.0.
    pub fn coverage(&self, seen: &BTreeSet<String>) -> BTreeMap<String, f64> {
        self.0
            .iter()
            .map(|(group, details)| {
                let ratio = if details.is_empty() {
                    0.0
                } else {
                    details.iter().filter(|d| seen.contains(*d)).count() as f64
                        / details.len() as f64
                };
                (group.clone(), ratio)
            })
            .collect()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn save_json(&self, path: &Path) -> Result<()> {
        if self.is_empty() {
            return Err(DreError::EmptyHierarchy);
        }

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        info!("Saving categories to: {}", path.display());
        let mut json = self.to_json()?;
        json.push('\n');
        fs::write(path, json)?;

        info!("Saved {} categories to {}", self.len(), path.display());
        Ok(())
    }

    pub fn load_json(path: &Path) -> Result<Self> {
        info!("Loading categories from: {}", path.display());
        let content = fs::read_to_string(path)?;
        let map: BTreeMap<String, Vec<String>> = serde_json::from_str(&content)?;
        let hierarchy = Self::from_map(map);
        info!("Loaded {} categories from {}", hierarchy.len(), path.display());
        Ok(hierarchy)
    }
}

/// Groups rows by `group_field` and collects the distinct `detail_field`
/// labels of each group.
///
/// Rows with a missing or blank group are skipped. A group whose details are
/// all missing is kept with an empty list.
pub fn extract_hierarchy(
    table: &LedgerTable,
    group_field: &str,
    detail_field: &str,
) -> Result<CategoryHierarchy> {
    let group_idx = table.column_index(group_field);
    let detail_idx = table.column_index(detail_field);

    let (group_idx, detail_idx) = match (group_idx, detail_idx) {
        (Some(g), Some(d)) => (g, d),
        _ => {
            let missing = [(group_field, group_idx), (detail_field, detail_idx)]
                .iter()
                .filter(|(_, idx)| idx.is_none())
                .map(|(name, _)| name.to_string())
                .collect();
            return Err(DreError::MissingColumns {
                missing,
                available: table.columns().to_vec(),
            });
        }
    };

    info!("Extracting category hierarchy from {} rows", table.len());

    let mut grouped: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for row in table.rows() {
        let Some(group) = row[group_idx].to_label() else {
            continue;
        };
        let details = grouped.entry(group).or_default();
        if let Some(detail) = row[detail_idx].to_label() {
            details.insert(detail);
        }
    }

    let hierarchy = CategoryHierarchy(
        grouped
            .into_iter()
            .map(|(group, details)| (group, details.into_iter().collect()))
            .collect(),
    );

    info!(
        "Extracted {} macro categories with {} unique detail categories",
        hierarchy.len(),
        hierarchy.summary().total_details
    );

    Ok(hierarchy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::CellValue;

    fn sample_table() -> LedgerTable {
        LedgerTable::from_text_rows(
            &["Nome Grupo", "cc_nome"],
            &[
                &["RECEITAS S/ VENDAS", "PIX"],
                &["RECEITAS S/ VENDAS", "DINHEIRO"],
                &["( - ) CUSTOS VARIÁVEIS", "CARVÃO"],
                &["RECEITAS S/ VENDAS", "IFOOD"],
                &["( - ) CUSTOS VARIÁVEIS", "AÇOUGUE"],
                &["RECEITAS S/ VENDAS", "PIX"],
            ],
        )
    }

    #[test]
    fn test_extract_sorted_unique() {
        let hierarchy = extract_hierarchy(&sample_table(), "Nome Grupo", "cc_nome").unwrap();

        assert_eq!(hierarchy.len(), 2);
        assert_eq!(
            hierarchy.get("RECEITAS S/ VENDAS").unwrap(),
            &["DINHEIRO", "IFOOD", "PIX"]
        );
        assert_eq!(
            hierarchy.get("( - ) CUSTOS VARIÁVEIS").unwrap(),
            &["AÇOUGUE", "CARVÃO"]
        );
        let keys: Vec<&String> = hierarchy.groups().collect();
        assert_eq!(keys, vec!["( - ) CUSTOS VARIÁVEIS", "RECEITAS S/ VENDAS"]);
    }

    #[test]
    fn test_duplicates_collapse() {
        let table = LedgerTable::from_text_rows(
            &["group", "detail"],
            &[&["A", "X"], &["A", "X"], &["A", "Y"]],
        );
        let hierarchy = extract_hierarchy(&table, "group", "detail").unwrap();
        let expected: BTreeMap<String, Vec<String>> =
            [("A".to_string(), vec!["X".to_string(), "Y".to_string()])].into();
        assert_eq!(hierarchy.as_map(), &expected);
    }

    #[test]
    fn test_idempotent_serialization() {
        let first = extract_hierarchy(&sample_table(), "Nome Grupo", "cc_nome").unwrap();
        let second = extract_hierarchy(&sample_table(), "Nome Grupo", "cc_nome").unwrap();
        assert_eq!(first, second);
        assert_eq!(first.to_json().unwrap(), second.to_json().unwrap());
    }

    #[test]
    fn test_missing_columns_lists_available() {
        let err = extract_hierarchy(&sample_table(), "Grupo", "cc_nome").unwrap_err();
        match err {
            DreError::MissingColumns { missing, available } => {
                assert_eq!(missing, vec!["Grupo".to_string()]);
                assert_eq!(available, vec!["Nome Grupo".to_string(), "cc_nome".to_string()]);
            }
            other => panic!("expected MissingColumns, got {:?}", other),
        }

        let err = extract_hierarchy(&sample_table(), "a", "b").unwrap_err();
        assert!(matches!(err, DreError::MissingColumns { ref missing, .. } if missing.len() == 2));
    }

    #[test]
    fn test_empty_table_yields_empty_map() {
        let table = LedgerTable::new(vec!["g".to_string(), "d".to_string()]);
        let hierarchy = extract_hierarchy(&table, "g", "d").unwrap();
        assert!(hierarchy.is_empty());
    }

    #[test]
    fn test_null_details_and_groups() {
        let mut table = LedgerTable::from_text_rows(
            &["g", "d"],
            &[&["ONLY NULLS", ""], &["", "ORPHAN"], &["MIXED", "X"], &["MIXED", ""]],
        );
        table.push_row(vec![CellValue::Text("NUMERIC".to_string()), CellValue::Number(42.0)]);

        let hierarchy = extract_hierarchy(&table, "g", "d").unwrap();

        assert_eq!(hierarchy.get("ONLY NULLS").unwrap().len(), 0);
        assert_eq!(hierarchy.get("MIXED").unwrap(), &["X"]);
        assert_eq!(hierarchy.get("NUMERIC").unwrap(), &["42"]);
        assert_eq!(hierarchy.len(), 3);
    }

    #[test]
    fn test_summary_and_coverage() {
        let hierarchy = extract_hierarchy(&sample_table(), "Nome Grupo", "cc_nome").unwrap();
        let summary = hierarchy.summary();

        assert_eq!(summary.total_groups, 2);
        assert_eq!(summary.total_details, 5);
        assert_eq!(summary.details_per_group["RECEITAS S/ VENDAS"], 3);

        let seen: BTreeSet<String> = ["PIX".to_string(), "CARVÃO".to_string()].into();
        let coverage = hierarchy.coverage(&seen);
        assert!((coverage["RECEITAS S/ VENDAS"] - 1.0 / 3.0).abs() < 1e-9);
        assert!((coverage["( - ) CUSTOS VARIÁVEIS"] - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_save_and_load_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("categories.json");
        let hierarchy = extract_hierarchy(&sample_table(), "Nome Grupo", "cc_nome").unwrap();

        hierarchy.save_json(&path).unwrap();
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("CARVÃO"));

        let loaded = CategoryHierarchy::load_json(&path).unwrap();
        assert_eq!(loaded, hierarchy);

        let empty = CategoryHierarchy::default();
        assert!(matches!(empty.save_json(&path), Err(DreError::EmptyHierarchy)));
    }
}
