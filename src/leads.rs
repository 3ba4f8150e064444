//! Lead files
//!
//! A JSON document holds an array of lead objects. A CSV file holds one lead
//! per row; dotted headers (`project.zip`) build nested objects. The lead id
//! comes from an `id` field when present, otherwise from the row position.

use std::fs;
use std::path::Path;

use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LeadError {
    #[error("Failed to read leads from {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON lead file {path}: {reason}")]
    Json { path: String, reason: String },

    #[error("Invalid CSV lead file {path}: {source}")]
    Csv {
        path: String,
        #[source]
        source: csv::Error,
    },

    #[error("Unsupported lead file {0}: expected .json or .csv")]
    UnsupportedFormat(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Lead {
    pub id: String,
    pub data: Value,
}

impl Lead {
    fn from_value(index: usize, data: Value) -> Self {
        let id = match data.get("id") {
            Some(Value::String(id)) if !id.is_empty() => id.clone(),
            Some(Value::Number(id)) => id.to_string(),
            _ => index.to_string(),
        };
        Self { id, data }
    }

    pub fn into_pair(self) -> (String, Value) {
        (self.id, self.data)
    }
}

pub fn load_leads(path: &Path) -> Result<Vec<Lead>, LeadError> {
    let shown = path.display().to_string();
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => {
            let text = fs::read_to_string(path).map_err(|source| LeadError::Io {
                path: shown.clone(),
                source,
            })?;
            parse_json(&text).map_err(|reason| LeadError::Json {
                path: shown,
                reason,
            })
        }
        Some("csv") => {
            let reader = csv::Reader::from_path(path).map_err(|source| LeadError::Csv {
                path: shown.clone(),
                source,
            })?;
            parse_csv(reader).map_err(|source| LeadError::Csv {
                path: shown,
                source,
            })
        }
        _ => Err(LeadError::UnsupportedFormat(shown)),
    }
}

pub fn parse_json(text: &str) -> Result<Vec<Lead>, String> {
    let document: Value = serde_json::from_str(text).map_err(|err| err.to_string())?;
    let Value::Array(rows) = document else {
        return Err("top-level value must be an array of leads".to_string());
    };
    rows.into_iter()
        .enumerate()
        .map(|(index, row)| match row {
            Value::Object(_) => Ok(Lead::from_value(index, row)),
            other => Err(format!("lead {index} is not an object: {other}")),
        })
        .collect()
}

pub fn parse_csv<R: std::io::Read>(mut reader: csv::Reader<R>) -> Result<Vec<Lead>, csv::Error> {
    let headers = reader.headers()?.clone();
    let mut leads = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record?;
        let mut row = Map::new();
        for (header, cell) in headers.iter().zip(record.iter()) {
            insert_dotted(&mut row, header.trim(), Value::String(cell.to_string()));
        }
        leads.push(Lead::from_value(index, Value::Object(row)));
    }
    Ok(leads)
}

fn insert_dotted(target: &mut Map<String, Value>, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            target.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let child = target
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !child.is_object() {
                *child = Value::Object(Map::new());
            }
            if let Value::Object(child) = child {
                insert_dotted(child, rest, value);
            }
        }
    }
}
