use std::fs;
use std::path::Path;

use arrow::array::{Array, Float64Array, Int64Array};
use arrow::compute::cast;
use arrow::datatypes::DataType;
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

use sl_types::{DataError, Dataset, SweepResult};

/// Loads feature/label tables from Parquet or CSV files.
#[derive(Debug)]
pub struct DatasetLoader {
    batch_size: usize,
}

impl Default for DatasetLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl DatasetLoader {
    pub fn new() -> Self {
        Self {
            batch_size: 8192, // Rows per Arrow batch
        }
    }

    pub fn with_batch_size(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
        }
    }

    /// Load `feature_columns` (in order) and `label_column`, choosing the
    /// reader from the file extension.
    pub fn load<P: AsRef<Path>>(
        &self,
        path: P,
        feature_columns: &[String],
        label_column: &str,
    ) -> SweepResult<Dataset> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(DataError::SourceNotFound(path.display().to_string()).into());
        }
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match extension.as_deref() {
            Some("parquet") | Some("pq") => self.load_parquet(path, feature_columns, label_column),
            Some("csv") => self.load_csv(path, feature_columns, label_column),
            other => Err(DataError::UnsupportedFormat {
                message: format!("{}: unsupported extension {:?}", path.display(), other),
            }
            .into()),
        }
    }

    /// Load a Parquet file through Arrow record batches.
    pub fn load_parquet(
        &self,
        path: &Path,
        feature_columns: &[String],
        label_column: &str,
    ) -> SweepResult<Dataset> {
        tracing::info!("Loading Parquet data from: {}", path.display());

        let file = fs::File::open(path)?;
        let reader = ParquetRecordBatchReaderBuilder::try_new(file)
            .map_err(|e| DataError::LoadingFailed {
                message: format!("Failed to create Parquet reader for {}: {}", path.display(), e),
            })?
            .with_batch_size(self.batch_size)
            .build()
            .map_err(|e| DataError::LoadingFailed {
                message: format!("Failed to build Parquet reader: {}", e),
            })?;

        let mut rows: Vec<Vec<f64>> = Vec::new();
        let mut labels: Vec<i64> = Vec::new();

        for batch_result in reader {
            let batch = batch_result.map_err(|e| DataError::LoadingFailed {
                message: format!("Failed to read Parquet batch: {}", e),
            })?;
            let offset = labels.len();

            let columns = feature_columns
                .iter()
                .map(|name| Self::float_column(&batch, name, path, offset))
                .collect::<SweepResult<Vec<_>>>()?;
            labels.extend(Self::label_column(&batch, label_column, path, offset)?);

            for i in 0..batch.num_rows() {
                rows.push(columns.iter().map(|col| col[i]).collect());
            }
        }

        tracing::info!("Loaded {} rows from Parquet file: {}", labels.len(), path.display());
        Dataset::new(feature_columns.to_vec(), rows, labels)
    }

    fn float_column(
        batch: &RecordBatch,
        name: &str,
        path: &Path,
        row_offset: usize,
    ) -> SweepResult<Vec<f64>> {
        let column = batch
            .column_by_name(name)
            .ok_or_else(|| DataError::ColumnNotFound {
                column: name.to_string(),
                path: path.display().to_string(),
            })?;
        let casted = cast(column.as_ref(), &DataType::Float64).map_err(|e| {
            DataError::UnsupportedFormat {
                message: format!("column {name} is not numeric: {e}"),
            }
        })?;
        let values = casted
            .as_any()
            .downcast_ref::<Float64Array>()
            .ok_or_else(|| DataError::InvalidFormat {
                message: format!("column {name} did not cast to Float64"),
            })?;

        (0..values.len())
            .map(|i| {
                if values.is_null(i) {
                    Err(DataError::NullValue {
                        column: name.to_string(),
                        row: row_offset + i,
                    }
                    .into())
                } else {
                    Ok(values.value(i))
                }
            })
            .collect()
    }

    fn label_column(
        batch: &RecordBatch,
        name: &str,
        path: &Path,
        row_offset: usize,
    ) -> SweepResult<Vec<i64>> {
        let column = batch
            .column_by_name(name)
            .ok_or_else(|| DataError::ColumnNotFound {
                column: name.to_string(),
                path: path.display().to_string(),
            })?;
        let casted = cast(column.as_ref(), &DataType::Int64).map_err(|e| {
            DataError::UnsupportedFormat {
                message: format!("label column {name} is not integral: {e}"),
            }
        })?;
        let values = casted
            .as_any()
            .downcast_ref::<Int64Array>()
            .ok_or_else(|| DataError::InvalidFormat {
                message: format!("label column {name} did not cast to Int64"),
            })?;

        (0..values.len())
            .map(|i| {
                if values.is_null(i) {
                    Err(DataError::NullValue {
                        column: name.to_string(),
                        row: row_offset + i,
                    }
                    .into())
                } else {
                    Ok(values.value(i))
                }
            })
            .collect()
    }

    /// Load a CSV file with a header row.
    pub fn load_csv(
        &self,
        path: &Path,
        feature_columns: &[String],
        label_column: &str,
    ) -> SweepResult<Dataset> {
        use csv::ReaderBuilder;

        tracing::info!("Loading CSV data from: {}", path.display());

        let mut rdr = ReaderBuilder::new()
            .has_headers(true)
            .from_path(path)
            .map_err(|e| DataError::LoadingFailed {
                message: format!("Failed to open CSV file {}: {}", path.display(), e),
            })?;
        let headers = rdr
            .headers()
            .map_err(|e| DataError::ParseError {
                message: format!("Failed to read CSV headers: {}", e),
            })?
            .clone();

        let index_of = |name: &str| {
            headers
                .iter()
                .position(|h| h.trim() == name)
                .ok_or_else(|| DataError::ColumnNotFound {
                    column: name.to_string(),
                    path: path.display().to_string(),
                })
        };
        let feature_idx = feature_columns
            .iter()
            .map(|name| index_of(name))
            .collect::<Result<Vec<_>, _>>()?;
        let label_idx = index_of(label_column)?;

        let mut rows = Vec::new();
        let mut labels = Vec::new();
        for (row, result) in rdr.records().enumerate() {
            let record = result.map_err(|e| DataError::ParseError {
                message: format!("Failed to read CSV record {}: {}", row, e),
            })?;

            let values = feature_idx
                .iter()
                .zip(feature_columns)
                .map(|(&idx, name)| Self::parse_cell(record.get(idx), name, row))
                .collect::<SweepResult<Vec<f64>>>()?;
            let label = Self::parse_label(record.get(label_idx), label_column, row)?;

            rows.push(values);
            labels.push(label);
        }

        tracing::info!("Loaded {} rows from CSV file: {}", labels.len(), path.display());
        Dataset::new(feature_columns.to_vec(), rows, labels)
    }

    fn parse_cell(cell: Option<&str>, column: &str, row: usize) -> SweepResult<f64> {
        let raw = cell.map(str::trim).unwrap_or("");
        if raw.is_empty() {
            return Err(DataError::NullValue {
                column: column.to_string(),
                row,
            }
            .into());
        }
        raw.parse::<f64>().map_err(|e| {
            DataError::ParseError {
                message: format!("column {column}, row {row}: {raw:?}: {e}"),
            }
            .into()
        })
    }

    fn parse_label(cell: Option<&str>, column: &str, row: usize) -> SweepResult<i64> {
        let raw = cell.map(str::trim).unwrap_or("");
        if let Ok(label) = raw.parse::<i64>() {
            return Ok(label);
        }
        let value = Self::parse_cell(cell, column, row)?;
        if value.fract() != 0.0 {
            return Err(DataError::ParseError {
                message: format!("label {value} in row {row} is not an integer class"),
            }
            .into());
        }
        Ok(value as i64)
    }
}

/// Write a dataset as CSV with the feature columns followed by `label_column`.
pub fn write_csv_dataset(dataset: &Dataset, label_column: &str, path: &Path) -> SweepResult<()> {
    let mut writer = csv::Writer::from_path(path).map_err(|e| DataError::LoadingFailed {
        message: format!("Failed to create CSV file {}: {}", path.display(), e),
    })?;
    let mut header: Vec<&str> = dataset.feature_names().iter().map(String::as_str).collect();
    header.push(label_column);
    let write_err = |e: csv::Error| DataError::InvalidFormat {
        message: format!("Failed to write CSV {}: {}", path.display(), e),
    };
    writer.write_record(&header).map_err(write_err)?;
    for (row, label) in dataset.rows().iter().zip(dataset.labels()) {
        let mut fields: Vec<String> = row.iter().map(f64::to_string).collect();
        fields.push(label.to_string());
        writer.write_record(&fields).map_err(write_err)?;
    }
    writer.flush()?;
    Ok(())
}
