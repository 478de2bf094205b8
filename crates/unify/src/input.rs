//! Source text → `RawRecord`s.
//!
//! Applies the per-source adapter from `[sources.<id>]`: which column holds the
//! display name, where the collection id comes from, and how source columns
//! are renamed into the attribute names the precedence table expects. Reading
//! files is left to the caller.

use serde_json::Value;

use crate::config::SourceConfig;
use crate::error::UnifyError;
use crate::model::RawRecord;

/// Parse CSV text (with a header row) into records for `source_id`.
pub fn load_csv_records(
    source_id: &str,
    csv_data: &str,
    source: &SourceConfig,
) -> Result<Vec<RawRecord>, UnifyError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(csv_data.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| parse_err(source_id, e))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let idx = |name: &str| -> Result<usize, UnifyError> {
        headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| missing(source_id, name))
    };

    let name_idx = idx(&source.name_column)?;
    let collection_idx = match (&source.collection, &source.collection_column) {
        (Some(_), _) => None,
        (None, Some(column)) => Some(idx(column)?),
        (None, None) => return Err(no_collection(source_id)),
    };

    let adapter = Adapter::new(source_id, source);
    let mut records = Vec::new();

    for (row, result) in reader.records().enumerate() {
        let row = row + 1;
        let line = result.map_err(|e| parse_err(source_id, e))?;

        let collection_id = match collection_idx {
            Some(i) => line.get(i).unwrap_or("").trim().to_string(),
            None => adapter.fixed_collection().to_string(),
        };
        let display_name = line.get(name_idx).unwrap_or("").to_string();

        let mut record = adapter.record(row, collection_id, display_name)?;
        for (i, value) in line.iter().enumerate() {
            if i == name_idx || Some(i) == collection_idx {
                continue;
            }
            adapter.set_attr(&mut record, &headers[i], value);
        }
        records.push(record);
    }

    Ok(records)
}

/// Parse a JSON array of flat objects into records for `source_id`.
///
/// Strings are taken as-is, numbers and booleans are stringified, nulls are
/// skipped and nested values are kept as compact JSON text. A row whose name
/// is null, absent or nested gets an empty display name and is rejected by
/// normalization downstream; `MissingColumn` is raised only when no row
/// carries the name column at all.
pub fn load_json_records(
    source_id: &str,
    json_data: &str,
    source: &SourceConfig,
) -> Result<Vec<RawRecord>, UnifyError> {
    let rows: Vec<serde_json::Map<String, Value>> =
        serde_json::from_str(json_data).map_err(|e| parse_err(source_id, e))?;

    let collection_column = match (&source.collection, &source.collection_column) {
        (Some(_), _) => None,
        (None, Some(column)) => Some(column.as_str()),
        (None, None) => return Err(no_collection(source_id)),
    };

    if !rows.is_empty() && !rows.iter().any(|o| o.contains_key(&source.name_column)) {
        return Err(missing(source_id, &source.name_column));
    }

    let adapter = Adapter::new(source_id, source);
    let mut records = Vec::with_capacity(rows.len());

    for (row, object) in rows.iter().enumerate() {
        let row = row + 1;
        let field = |column: &str| -> Result<String, UnifyError> {
            object
                .get(column)
                .and_then(scalar_text)
                .ok_or_else(|| missing(source_id, column))
        };

        let display_name = object
            .get(&source.name_column)
            .and_then(name_text)
            .unwrap_or_default();
        let collection_id = match collection_column {
            Some(column) => field(column)?.trim().to_string(),
            None => adapter.fixed_collection().to_string(),
        };

        let mut record = adapter.record(row, collection_id, display_name)?;
        for (column, value) in object {
            if *column == source.name_column || Some(column.as_str()) == collection_column {
                continue;
            }
            if let Some(text) = scalar_text(value) {
                adapter.set_attr(&mut record, column, &text);
            }
        }
        records.push(record);
    }

    Ok(records)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct Adapter<'a> {
    source_id: &'a str,
    source: &'a SourceConfig,
}

impl<'a> Adapter<'a> {
    fn new(source_id: &'a str, source: &'a SourceConfig) -> Self {
        Self { source_id, source }
    }

    fn fixed_collection(&self) -> &str {
        self.source.collection.as_deref().unwrap_or("")
    }

    fn record(
        &self,
        row: usize,
        collection_id: String,
        display_name: String,
    ) -> Result<RawRecord, UnifyError> {
        if collection_id.is_empty() {
            return Err(UnifyError::Parse {
                source_id: self.source_id.into(),
                message: format!("row {row}: empty collection id"),
            });
        }
        Ok(RawRecord::new(self.source_id, collection_id, display_name))
    }

    /// Store a non-blank value under its renamed attribute name.
    fn set_attr(&self, record: &mut RawRecord, column: &str, value: &str) {
        if value.trim().is_empty() {
            return;
        }
        let field = self
            .source
            .rename
            .get(column)
            .map(String::as_str)
            .unwrap_or(column);
        record.attributes.insert(field.to_string(), value.to_string());
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(_) | Value::Object(_) => Some(value.to_string()),
    }
}

fn name_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(_) | Value::Number(_) => scalar_text(value),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn parse_err(source_id: &str, e: impl std::fmt::Display) -> UnifyError {
    UnifyError::Parse {
        source_id: source_id.into(),
        message: e.to_string(),
    }
}

fn missing(source_id: &str, column: &str) -> UnifyError {
    UnifyError::MissingColumn {
        source_id: source_id.into(),
        column: column.into(),
    }
}

fn no_collection(source_id: &str) -> UnifyError {
    UnifyError::ConfigValidation(format!(
        "[sources.{source_id}] needs `collection` or `collection_column`"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourceFormat;
    use std::collections::BTreeMap;

    fn source(collection: Option<&str>, collection_column: Option<&str>) -> SourceConfig {
        SourceConfig {
            file: "unused".into(),
            format: SourceFormat::Csv,
            collection: collection.map(String::from),
            collection_column: collection_column.map(String::from),
            name_column: "name".into(),
            rename: BTreeMap::new(),
        }
    }

    #[test]
    fn csv_with_collection_column_and_rename() {
        let mut cfg = source(None, Some("brand"));
        cfg.rename.insert("Retail Price".into(), "price".into());
        let data = "brand,name,Retail Price,sku,notes\n\
                    roland,FP-30X,699,R-1,\n\
                    boss,DS-1 Distortion,59,B-1,classic\n";
        let records = load_csv_records("inventory", data, &cfg).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].collection_id, "roland");
        assert_eq!(records[0].display_name, "FP-30X");
        assert_eq!(records[0].attr("price"), Some("699"));
        assert_eq!(records[0].attr("sku"), Some("R-1"));
        assert!(!records[0].attributes.contains_key("notes"));
        assert!(!records[0].attributes.contains_key("brand"));
        assert_eq!(records[1].attr("notes"), Some("classic"));
        assert_eq!(records[1].source_id, "inventory");
    }

    #[test]
    fn csv_fixed_collection() {
        let cfg = source(Some("roland"), None);
        let records = load_csv_records("site", "name,image\nFP 30 X,fp30x.jpg\n", &cfg).unwrap();
        assert_eq!(records[0].collection_id, "roland");
        assert_eq!(records[0].attr("image"), Some("fp30x.jpg"));
    }

    #[test]
    fn csv_missing_name_column() {
        let cfg = source(Some("roland"), None);
        let err = load_csv_records("site", "title\nFP-30X\n", &cfg).unwrap_err();
        assert!(matches!(
            err,
            UnifyError::MissingColumn { ref column, .. } if column == "name"
        ));
    }

    #[test]
    fn csv_needs_a_collection_source() {
        let err = load_csv_records("site", "name\nFP-30X\n", &source(None, None)).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn csv_empty_collection_cell() {
        let cfg = source(None, Some("brand"));
        let err = load_csv_records("inventory", "brand,name\n,FP-30X\n", &cfg).unwrap_err();
        assert!(err.to_string().contains("row 1"));
    }

    #[test]
    fn json_values_are_stringified() {
        let mut cfg = source(None, Some("brand"));
        cfg.rename.insert("desc".into(), "description".into());
        let data = r#"[
            {"brand": "roland", "name": "FP 30 X", "desc": "Portable piano",
             "price": 699.5, "in_stock": true, "image": null, "tags": ["piano"]}
        ]"#;
        let records = load_json_records("site", data, &cfg).unwrap();
        let r = &records[0];
        assert_eq!(r.collection_id, "roland");
        assert_eq!(r.attr("description"), Some("Portable piano"));
        assert_eq!(r.attr("price"), Some("699.5"));
        assert_eq!(r.attr("in_stock"), Some("true"));
        assert_eq!(r.attr("tags"), Some(r#"["piano"]"#));
        assert!(!r.attributes.contains_key("image"));
        assert!(!r.attributes.contains_key("brand"));
    }

    #[test]
    fn json_missing_name_is_reported() {
        let cfg = source(Some("roland"), None);
        let err = load_json_records("site", r#"[{"title": "FP-30X"}]"#, &cfg).unwrap_err();
        assert!(matches!(err, UnifyError::MissingColumn { .. }));
    }

    #[test]
    fn json_null_or_absent_name_becomes_empty_record() {
        let cfg = source(Some("roland"), None);
        let data = r#"[
            {"name": "FP 30 X", "price": 1},
            {"name": null, "price": 2},
            {"price": 3},
            {"name": ["nested"], "price": 4}
        ]"#;
        let records = load_json_records("vendor", data, &cfg).unwrap();
        assert_eq!(records.len(), 4);
        assert_eq!(records[0].display_name, "FP 30 X");
        assert!(records[1..].iter().all(|r| r.display_name.is_empty()));
        assert_eq!(records[2].attr("price"), Some("3"));
    }

    #[test]
    fn json_empty_array_is_ok() {
        let cfg = source(Some("roland"), None);
        assert!(load_json_records("vendor", "[]", &cfg).unwrap().is_empty());
    }

    #[test]
    fn json_malformed() {
        let cfg = source(Some("roland"), None);
        let err = load_json_records("site", "{not json", &cfg).unwrap_err();
        assert!(matches!(err, UnifyError::Parse { .. }));
    }
}
