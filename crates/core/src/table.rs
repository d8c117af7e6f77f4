//! CSV products exchanged between tasks.
//!
//! Every table is numeric. The shared x-axis is always the `t` column;
//! single-stream tables carry the signal in `f`, multi-stream tables carry
//! one column per stream, and area tables hold a single `area` row.

use std::path::{Path, PathBuf};

/// Shared x-axis column
pub const T_COLUMN: &str = "t";
/// Signal column of a single-stream table
pub const F_COLUMN: &str = "f";
/// Column of an area table
pub const AREA_COLUMN: &str = "area";

pub type TableResult<T> = Result<T, TableError>;

#[derive(Debug, thiserror::Error)]
pub enum TableError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("missing column '{0}'")]
    MissingColumn(String),

    #[error("row {row}, column '{column}': cannot parse '{value}' as a number")]
    Parse {
        row: usize,
        column: String,
        value: String,
    },

    #[error("row {row} has {found} fields, header has {expected}")]
    RaggedRow {
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("{0} has no rows")]
    Empty(PathBuf),

    #[error("column lengths differ: t has {t} values, f has {f}")]
    LengthMismatch { t: usize, f: usize },

    #[error("total is not a number: '{0}'")]
    Total(String),
}

/// A single `t`, `f` stream
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Series {
    pub t: Vec<f64>,
    pub f: Vec<f64>,
}

impl Series {
    pub fn new(t: Vec<f64>, f: Vec<f64>) -> TableResult<Self> {
        if t.len() != f.len() {
            return Err(TableError::LengthMismatch {
                t: t.len(),
                f: f.len(),
            });
        }
        Ok(Self { t, f })
    }

    pub fn len(&self) -> usize {
        self.t.len()
    }

    pub fn is_empty(&self) -> bool {
        self.t.is_empty()
    }
}

/// One named stream column
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub values: Vec<f64>,
}

/// `t` plus one column per stream, all on the same sampling grid
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MultiStreamTable {
    pub t: Vec<f64>,
    pub streams: Vec<Column>,
}

impl MultiStreamTable {
    pub fn stream_names(&self) -> Vec<&str> {
        self.streams.iter().map(|c| c.name.as_str()).collect()
    }

    /// Select one stream, renamed to `f`
    pub fn extract(&self, name: &str) -> TableResult<Series> {
        let column = self
            .streams
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| TableError::MissingColumn(name.to_string()))?;
        Series::new(self.t.clone(), column.values.clone())
    }
}

/// Column-major contents of a CSV file
struct RawTable {
    headers: Vec<String>,
    columns: Vec<Vec<f64>>,
}

impl RawTable {
    fn take(&mut self, name: &str) -> TableResult<Vec<f64>> {
        let idx = self
            .headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| TableError::MissingColumn(name.to_string()))?;
        Ok(std::mem::take(&mut self.columns[idx]))
    }
}

fn read_raw(path: &Path) -> TableResult<RawTable> {
    // Row widths are checked below so a short row is reported by index
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut columns = vec![Vec::new(); headers.len()];
    for (row, record) in reader.records().enumerate() {
        let record = record?;
        if record.len() != headers.len() {
            return Err(TableError::RaggedRow {
                row,
                expected: headers.len(),
                found: record.len(),
            });
        }
        for (idx, field) in record.iter().enumerate() {
            let value = field.trim().parse::<f64>().map_err(|_| TableError::Parse {
                row,
                column: headers[idx].clone(),
                value: field.to_string(),
            })?;
            columns[idx].push(value);
        }
    }

    Ok(RawTable { headers, columns })
}

fn write_columns(path: &Path, headers: &[&str], columns: &[&[f64]]) -> TableResult<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(headers)?;

    let rows = columns.first().map(|c| c.len()).unwrap_or(0);
    for row in 0..rows {
        writer.write_record(columns.iter().map(|c| c[row].to_string()))?;
    }

    writer.flush().map_err(|source| TableError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

pub fn read_series(path: &Path) -> TableResult<Series> {
    let mut raw = read_raw(path)?;
    let t = raw.take(T_COLUMN)?;
    let f = raw.take(F_COLUMN)?;
    Series::new(t, f)
}

pub fn write_series(path: &Path, series: &Series) -> TableResult<()> {
    write_columns(
        path,
        &[T_COLUMN, F_COLUMN],
        &[series.t.as_slice(), series.f.as_slice()],
    )
}

/// Every column other than `t` is read as a stream, in file order
pub fn read_multi_stream(path: &Path) -> TableResult<MultiStreamTable> {
    let mut raw = read_raw(path)?;
    let t = raw.take(T_COLUMN)?;

    let streams = raw
        .headers
        .iter()
        .zip(raw.columns)
        .filter(|(name, _)| name.as_str() != T_COLUMN)
        .map(|(name, values)| Column {
            name: name.clone(),
            values,
        })
        .collect();

    Ok(MultiStreamTable { t, streams })
}

pub fn write_multi_stream(path: &Path, table: &MultiStreamTable) -> TableResult<()> {
    let mut headers = vec![T_COLUMN];
    headers.extend(table.streams.iter().map(|c| c.name.as_str()));

    let mut columns: Vec<&[f64]> = vec![table.t.as_slice()];
    columns.extend(table.streams.iter().map(|c| c.values.as_slice()));

    write_columns(path, &headers, &columns)
}

/// First `area` value of an area table
pub fn read_area(path: &Path) -> TableResult<f64> {
    let mut raw = read_raw(path)?;
    raw.take(AREA_COLUMN)?
        .first()
        .copied()
        .ok_or_else(|| TableError::Empty(path.to_path_buf()))
}

pub fn write_area(path: &Path, area: f64) -> TableResult<()> {
    let values = [area];
    write_columns(path, &[AREA_COLUMN], &[&values[..]])
}

pub fn read_total(path: &Path) -> TableResult<f64> {
    let text = std::fs::read_to_string(path).map_err(|source| TableError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let trimmed = text.trim();
    trimmed
        .parse()
        .map_err(|_| TableError::Total(trimmed.to_string()))
}

/// Write an already formatted total, without a trailing newline
pub fn write_total(path: &Path, total: &str) -> TableResult<()> {
    std::fs::write(path, total).map_err(|source| TableError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_table() -> MultiStreamTable {
        MultiStreamTable {
            t: vec![0.0, 50.0, 100.0],
            streams: vec![
                Column {
                    name: "stream-000".to_string(),
                    values: vec![1.0, 2.0, 3.0],
                },
                Column {
                    name: "stream-001".to_string(),
                    values: vec![0.5, 0.25, 0.125],
                },
            ],
        }
    }

    #[test]
    fn test_multi_stream_file_layout() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("input_data.csv");

        write_multi_stream(&path, &sample_table()).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("t,stream-000,stream-001"));
        assert_eq!(lines.next(), Some("0,1,0.5"));

        let read = read_multi_stream(&path).unwrap();
        assert_eq!(read, sample_table());
        assert_eq!(read.stream_names(), vec!["stream-000", "stream-001"]);
    }

    #[test]
    fn test_extract_renames_to_f() {
        let table = sample_table();
        let series = table.extract("stream-001").unwrap();

        assert_eq!(series.t, table.t);
        assert_eq!(series.f, vec![0.5, 0.25, 0.125]);
    }

    #[test]
    fn test_extract_missing_stream() {
        let err = sample_table().extract("stream-009").unwrap_err();
        assert!(matches!(err, TableError::MissingColumn(name) if name == "stream-009"));
    }

    #[test]
    fn test_read_series_requires_f() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bad.csv");
        std::fs::write(&path, "t,g\n0,1\n").unwrap();

        let err = read_series(&path).unwrap_err();
        assert!(matches!(err, TableError::MissingColumn(name) if name == "f"));
    }

    #[test]
    fn test_unparseable_value() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bad.csv");
        std::fs::write(&path, "t,f\n0,1\n1,abc\n").unwrap();

        let err = read_series(&path).unwrap_err();
        match err {
            TableError::Parse { row, column, value } => {
                assert_eq!(row, 1);
                assert_eq!(column, "f");
                assert_eq!(value, "abc");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_ragged_row() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("ragged.csv");
        std::fs::write(&path, "t,stream-000,stream-001\n0,1,2\n1,3\n").unwrap();

        let err = read_multi_stream(&path).unwrap_err();
        assert!(matches!(
            err,
            TableError::RaggedRow {
                row: 1,
                expected: 3,
                found: 2
            }
        ));
    }

    #[test]
    fn test_area_table() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("stream-000_area.csv");

        write_area(&path, 12.5).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "area\n12.5\n");
        assert_eq!(read_area(&path).unwrap(), 12.5);
    }

    #[test]
    fn test_empty_area_table() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("empty_area.csv");
        std::fs::write(&path, "area\n").unwrap();

        assert!(matches!(read_area(&path), Err(TableError::Empty(_))));
    }

    #[test]
    fn test_total_has_no_trailing_newline() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("total.txt");

        write_total(&path, "42.125").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "42.125");
        assert_eq!(read_total(&path).unwrap(), 42.125);
    }

    #[test]
    fn test_series_length_mismatch() {
        let err = Series::new(vec![0.0, 1.0], vec![1.0]).unwrap_err();
        assert!(matches!(err, TableError::LengthMismatch { t: 2, f: 1 }));
    }
}
