use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use arrow::array::{
    Array, AsArray, BooleanArray, Float32Array, Float64Array, Int32Array, Int64Array,
    StringArray,
};
use arrow::datatypes::{
    DataType, Date32Type, Date64Type, TimeUnit, TimestampMicrosecondType,
    TimestampMillisecondType, TimestampNanosecondType, TimestampSecondType,
};
use arrow::util::display::{ArrayFormatter, FormatOptions};
use chrono::{NaiveDate, NaiveDateTime};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde_json::{Map, Value as JsonValue};

use super::model::{CellValue, Dataset, Row};

// ---------------------------------------------------------------------------
// Public entry-points
// ---------------------------------------------------------------------------

/// Load a tabular dataset from a file.  Dispatch by extension.
///
/// Supported formats:
/// * `.csv`     – header row, one record per line (cell types are guessed)
/// * `.json`    – `[{ "Caudal": 12.5, "status": "success", ... }, ...]`
/// * `.parquet` – flat scalar columns (strings, ints, floats, bools)
pub fn load_file(path: &Path) -> Result<Dataset> {
    let ext = extension_of(path);
    let dataset = match ext.as_str() {
        "csv" => load_csv(path),
        "json" => load_json(path),
        "parquet" | "pq" => load_parquet(path),
        other => bail!("Unsupported file extension: .{other}"),
    }?;
    log::info!(
        "Loaded {} rows × {} columns from {}",
        dataset.len(),
        dataset.column_names.len(),
        path.display()
    );
    Ok(dataset)
}

/// Write a dataset to a file.  Dispatch by extension (`.csv` or `.json`).
pub fn save_file(dataset: &Dataset, path: &Path) -> Result<()> {
    match extension_of(path).as_str() {
        "csv" => save_csv(dataset, path),
        "json" => save_json(dataset, path),
        other => bail!("Unsupported output extension: .{other}"),
    }
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase()
}

// ---------------------------------------------------------------------------
// JSON
// ---------------------------------------------------------------------------

/// Expected JSON schema (records-oriented, `df.to_json(orient='records')`):
///
/// ```json
/// [
///   { "Día": "2025-01-03", "Caudal": 12.5, "thermal_agua_ratio": 0.31 },
///   ...
/// ]
/// ```
fn load_json(path: &Path) -> Result<Dataset> {
    let text = std::fs::read_to_string(path).context("reading JSON file")?;
    let root: JsonValue = serde_json::from_str(&text).context("parsing JSON")?;

    let records = root.as_array().context("Expected top-level JSON array")?;

    let mut rows = Vec::with_capacity(records.len());
    for (i, rec) in records.iter().enumerate() {
        let obj = rec
            .as_object()
            .with_context(|| format!("Row {i} is not a JSON object"))?;
        let row: Row = obj
            .iter()
            .map(|(key, val)| (key.clone(), json_to_cell(val)))
            .collect();
        rows.push(row);
    }

    Ok(Dataset::from_rows(rows))
}

fn json_to_cell(val: &JsonValue) -> CellValue {
    match val {
        JsonValue::String(s) => CellValue::String(s.clone()),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                CellValue::Integer(i)
            } else if let Some(f) = n.as_f64() {
                CellValue::Float(f)
            } else {
                CellValue::String(n.to_string())
            }
        }
        JsonValue::Bool(b) => CellValue::Bool(*b),
        JsonValue::Null => CellValue::Null,
        other => CellValue::String(other.to_string()),
    }
}

pub(crate) fn cell_to_json(val: &CellValue) -> JsonValue {
    match val {
        CellValue::String(s) | CellValue::Date(s) => JsonValue::String(s.clone()),
        CellValue::Integer(i) => JsonValue::from(*i),
        // Non-finite floats have no JSON representation.
        CellValue::Float(f) => serde_json::Number::from_f64(*f)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        CellValue::Bool(b) => JsonValue::Bool(*b),
        CellValue::Null => JsonValue::Null,
    }
}

/// Convert a dataset row into a JSON object, following the column order.
pub fn row_to_json(dataset: &Dataset, row: usize) -> Map<String, JsonValue> {
    dataset
        .column_names
        .iter()
        .map(|col| (col.clone(), cell_to_json(dataset.get(row, col))))
        .collect()
}

fn save_json(dataset: &Dataset, path: &Path) -> Result<()> {
    let records: Vec<JsonValue> = (0..dataset.len())
        .map(|i| JsonValue::Object(row_to_json(dataset, i)))
        .collect();
    let text = serde_json::to_string_pretty(&records).context("serializing JSON")?;
    std::fs::write(path, text).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// CSV
// ---------------------------------------------------------------------------

/// CSV layout: header row with column names, one record per line.
/// Empty cells become `Null`; other cells are typed by [`guess_cell_type`].
fn load_csv(path: &Path) -> Result<Dataset> {
    let mut reader = csv::Reader::from_path(path).context("opening CSV")?;
    let headers: Vec<String> = reader
        .headers()
        .context("reading CSV headers")?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut rows = Vec::new();
    for (row_no, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("CSV row {row_no}"))?;
        let row: Row = headers
            .iter()
            .enumerate()
            .map(|(col_idx, col_name)| {
                let cell = record.get(col_idx).unwrap_or("");
                (col_name.clone(), guess_cell_type(cell))
            })
            .collect();
        rows.push(row);
    }

    Ok(Dataset::with_columns(headers, rows))
}

pub(crate) fn guess_cell_type(s: &str) -> CellValue {
    let s = s.trim();
    if s.is_empty() {
        return CellValue::Null;
    }
    if let Ok(i) = s.parse::<i64>() {
        return CellValue::Integer(i);
    }
    if let Ok(f) = s.parse::<f64>() {
        return CellValue::from(f);
    }
    if s == "true" || s == "false" || s == "True" || s == "False" {
        return CellValue::Bool(s.eq_ignore_ascii_case("true"));
    }
    CellValue::String(s.to_string())
}

fn save_csv(dataset: &Dataset, path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("creating {}", path.display()))?;
    write_csv(dataset, &mut writer)?;
    writer.flush().context("flushing CSV")?;
    Ok(())
}

/// Write a dataset as CSV to any writer. Nulls become empty cells.
pub fn write_csv<W: std::io::Write>(dataset: &Dataset, writer: &mut csv::Writer<W>) -> Result<()> {
    writer
        .write_record(&dataset.column_names)
        .context("writing CSV header")?;
    for i in 0..dataset.len() {
        let record: Vec<String> = dataset
            .column_names
            .iter()
            .map(|col| dataset.get(i, col).to_string())
            .collect();
        writer
            .write_record(&record)
            .with_context(|| format!("writing CSV row {i}"))?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Parquet loader
// ---------------------------------------------------------------------------

/// Load a Parquet file containing a flat historical dataset.
///
/// Every column is read as a scalar cell (strings, ints, floats, bools).
/// Date and timestamp columns become ISO-8601 [`CellValue::Date`] cells;
/// anything else is kept as arrow's display text of the value.
///
/// Works with files written by both **Pandas** (`df.to_parquet()`) and
/// **Polars** (`df.write_parquet()`).
fn load_parquet(path: &Path) -> Result<Dataset> {
    let file = std::fs::File::open(path).context("opening parquet file")?;
    let builder =
        ParquetRecordBatchReaderBuilder::try_new(file).context("reading parquet metadata")?;
    let column_names: Vec<String> = builder
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .collect();
    let reader = builder.build().context("building parquet reader")?;

    let mut rows = Vec::new();
    for batch_result in reader {
        let batch = batch_result.context("reading parquet record batch")?;
        let schema = batch.schema();
        for row in 0..batch.num_rows() {
            let cells: Row = schema
                .fields()
                .iter()
                .enumerate()
                .map(|(col_idx, field)| {
                    (
                        field.name().clone(),
                        extract_cell_value(batch.column(col_idx), row),
                    )
                })
                .collect();
            rows.push(cells);
        }
    }

    Ok(Dataset::with_columns(column_names, rows))
}

/// Extract a single cell from an Arrow column at a given row.
fn extract_cell_value(col: &Arc<dyn Array>, row: usize) -> CellValue {
    if col.is_null(row) {
        return CellValue::Null;
    }
    let any = col.as_any();
    match col.data_type() {
        DataType::Utf8 => any
            .downcast_ref::<StringArray>()
            .map(|s| CellValue::String(s.value(row).to_string()))
            .unwrap_or(CellValue::Null),
        DataType::LargeUtf8 => CellValue::String(col.as_string::<i64>().value(row).to_string()),
        DataType::Int32 => any
            .downcast_ref::<Int32Array>()
            .map(|a| CellValue::Integer(a.value(row) as i64))
            .unwrap_or(CellValue::Null),
        DataType::Int64 => any
            .downcast_ref::<Int64Array>()
            .map(|a| CellValue::Integer(a.value(row)))
            .unwrap_or(CellValue::Null),
        DataType::Float32 => any
            .downcast_ref::<Float32Array>()
            .map(|a| CellValue::from(a.value(row) as f64))
            .unwrap_or(CellValue::Null),
        DataType::Float64 => any
            .downcast_ref::<Float64Array>()
            .map(|a| CellValue::from(a.value(row)))
            .unwrap_or(CellValue::Null),
        DataType::Boolean => any
            .downcast_ref::<BooleanArray>()
            .map(|a| CellValue::Bool(a.value(row)))
            .unwrap_or(CellValue::Null),
        DataType::Date32 => date_cell(col.as_primitive::<Date32Type>().value_as_date(row)),
        DataType::Date64 => date_cell(col.as_primitive::<Date64Type>().value_as_date(row)),
        DataType::Timestamp(unit, _) => {
            let datetime = match unit {
                TimeUnit::Second => col.as_primitive::<TimestampSecondType>().value_as_datetime(row),
                TimeUnit::Millisecond => col
                    .as_primitive::<TimestampMillisecondType>()
                    .value_as_datetime(row),
                TimeUnit::Microsecond => col
                    .as_primitive::<TimestampMicrosecondType>()
                    .value_as_datetime(row),
                TimeUnit::Nanosecond => col
                    .as_primitive::<TimestampNanosecondType>()
                    .value_as_datetime(row),
            };
            datetime_cell(datetime)
        }
        _ => display_cell(col, row),
    }
}

fn date_cell(date: Option<NaiveDate>) -> CellValue {
    date.map_or(CellValue::Null, |d| {
        CellValue::Date(d.format("%Y-%m-%d").to_string())
    })
}

// Timezone-aware timestamps are read as their UTC wall time.
fn datetime_cell(datetime: Option<NaiveDateTime>) -> CellValue {
    datetime.map_or(CellValue::Null, |dt| {
        CellValue::Date(dt.format("%Y-%m-%dT%H:%M:%S").to_string())
    })
}

fn display_cell(col: &Arc<dyn Array>, row: usize) -> CellValue {
    let options = FormatOptions::default();
    match ArrayFormatter::try_new(col.as_ref(), &options) {
        Ok(formatter) => CellValue::String(formatter.value(row).to_string()),
        Err(e) => {
            log::warn!("Cannot display {} cell: {e}", col.data_type());
            CellValue::Null
        }
    }
}
