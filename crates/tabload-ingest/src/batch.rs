//! Lazy, fixed-size batches over the canonical artifact

use crate::error::{IngestError, Result};
use crate::schema::{ColumnDef, ColumnType, TableSchema, TypeOrigin};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use csv::StringRecord;
use std::fs::File;
use std::io::Read;
use std::iter::FusedIterator;
use std::path::Path;
use std::sync::Arc;

const MAX_PREALLOCATED_ROWS: usize = 1 << 16;

const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%m/%d/%Y %I:%M:%S %p",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

/// One typed cell
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Text(String),
    BigInt(i64),
    Double(f64),
    Boolean(bool),
    Timestamp(NaiveDateTime),
}

/// A bounded slice of the artifact's rows, already coerced
#[derive(Debug, Clone, PartialEq)]
pub struct RowBatch {
    /// 1-based position in the sequence
    pub index: usize,
    pub columns: Arc<[String]>,
    pub rows: Vec<Vec<CellValue>>,
}

impl RowBatch {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Convert a raw CSV field. Empty fields are `Null` for every type.
pub fn coerce_value(raw: &str, target: ColumnType) -> Option<CellValue> {
    if raw.is_empty() {
        return Some(CellValue::Null);
    }

    match target {
        ColumnType::Text => Some(CellValue::Text(raw.to_string())),
        ColumnType::BigInt => parse_bigint(raw).map(CellValue::BigInt),
        ColumnType::Double => raw.trim().parse::<f64>().ok().map(CellValue::Double),
        ColumnType::Boolean => parse_bool(raw).map(CellValue::Boolean),
        ColumnType::Timestamp => parse_timestamp(raw).map(CellValue::Timestamp),
    }
}

/// Integers, plus floats with no fractional part (`"1.0"`)
fn parse_bigint(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if let Ok(v) = raw.parse::<i64>() {
        return Some(v);
    }
    let v = raw.parse::<f64>().ok()?;
    let in_range = v >= i64::MIN as f64 && v < i64::MAX as f64;
    (v.fract() == 0.0 && in_range).then_some(v as i64)
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "1" => Some(true),
        "false" | "f" | "0" => Some(false),
        _ => None,
    }
}

/// Parse the timestamp layouts seen in trip record files
///
/// Offsets are converted to UTC before the zone is dropped.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();

    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.naive_utc()))
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// Forward-only reader yielding [`RowBatch`]es of at most `chunk_size` rows
///
/// Stops for good after the last batch or after the first error.
pub struct BatchReader<R: Read = File> {
    reader: csv::Reader<R>,
    schema: Arc<TableSchema>,
    columns: Arc<[String]>,
    chunk_size: usize,
    next_index: usize,
    record: StringRecord,
    exhausted: bool,
}

impl BatchReader<File> {
    pub fn open(path: &Path, schema: Arc<TableSchema>, chunk_size: usize) -> Result<Self> {
        Self::from_reader(File::open(path)?, schema, chunk_size)
    }
}

impl<R: Read> BatchReader<R> {
    pub fn from_reader(reader: R, schema: Arc<TableSchema>, chunk_size: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(IngestError::Config("chunk size must be greater than 0".to_string()));
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);

        let header: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        let columns: Arc<[String]> = schema.column_names().into();
        if header.as_slice() != &columns[..] {
            return Err(IngestError::SchemaMismatch(format!(
                "artifact header [{}] does not match table columns [{}]",
                header.join(", "),
                columns.join(", ")
            )));
        }

        Ok(BatchReader {
            reader,
            schema,
            columns,
            chunk_size,
            next_index: 1,
            record: StringRecord::new(),
            exhausted: false,
        })
    }

    fn read_batch(&mut self) -> Result<Option<RowBatch>> {
        let index = self.next_index;
        let mut rows = Vec::with_capacity(self.chunk_size.min(MAX_PREALLOCATED_ROWS));

        while rows.len() < self.chunk_size {
            if !self.reader.read_record(&mut self.record)? {
                self.exhausted = true;
                break;
            }

            let row = rows.len() + 1;
            if self.record.len() != self.columns.len() {
                return Err(IngestError::SchemaMismatch(format!(
                    "batch {}, row {}: expected {} fields, found {}",
                    index,
                    row,
                    self.columns.len(),
                    self.record.len()
                )));
            }

            rows.push(coerce_record(&self.record, &self.schema.columns, index, row)?);
        }

        if rows.is_empty() {
            return Ok(None);
        }

        self.next_index += 1;
        Ok(Some(RowBatch {
            index,
            columns: Arc::clone(&self.columns),
            rows,
        }))
    }
}

impl<R: Read> Iterator for BatchReader<R> {
    type Item = Result<RowBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted {
            return None;
        }

        match self.read_batch() {
            Ok(Some(batch)) => Some(Ok(batch)),
            Ok(None) => {
                self.exhausted = true;
                None
            },
            Err(e) => {
                self.exhausted = true;
                Some(Err(e))
            },
        }
    }
}

impl<R: Read> FusedIterator for BatchReader<R> {}

fn coerce_record(
    record: &StringRecord,
    columns: &[ColumnDef],
    batch: usize,
    row: usize,
) -> Result<Vec<CellValue>> {
    record
        .iter()
        .zip(columns)
        .map(|(raw, column)| {
            coerce_value(raw, column.column_type)
                .ok_or_else(|| coercion_failure(raw, column, batch, row))
        })
        .collect()
}

fn coercion_failure(raw: &str, column: &ColumnDef, batch: usize, row: usize) -> IngestError {
    match column.origin {
        TypeOrigin::Inferred => IngestError::SchemaMismatch(format!(
            "column '{}' was inferred as {} but batch {}, row {} holds {:?}",
            column.name, column.column_type, batch, row, raw
        )),
        TypeOrigin::Declared | TypeOrigin::Default => IngestError::Coercion {
            batch,
            row,
            column: column.name.clone(),
            value: raw.to_string(),
            target: column.column_type,
        },
    }
}
