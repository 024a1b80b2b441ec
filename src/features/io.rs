//! Feature CSV files: one row per non-empty window, ascending `ts_start`.

use std::fs::File;
use std::io;
use std::path::Path;

use csv::{ReaderBuilder, StringRecord, Trim, WriterBuilder};
use serde::Deserialize;
use tracing::info;

use super::{FeatureVector, FEATURE_NAMES};
use crate::traffic::{check_timestamp, InputError};

const TS_COLUMN: &str = "ts_start";

/// Row as stored on disk; numeric cells may be empty.
#[derive(Debug, Deserialize)]
struct FeatureRow {
    ts_start: f64,
    packets_per_sec: Option<f64>,
    bytes_per_sec: Option<f64>,
    entropy_src_ip: Option<f64>,
    entropy_dst_ip: Option<f64>,
    syn_ratio: Option<f64>,
}

impl From<FeatureRow> for FeatureVector {
    fn from(row: FeatureRow) -> Self {
        let missing = f64::NAN;
        FeatureVector {
            window_start: row.ts_start,
            packets_per_sec: row.packets_per_sec.unwrap_or(missing),
            bytes_per_sec: row.bytes_per_sec.unwrap_or(missing),
            entropy_src_addr: row.entropy_src_ip.unwrap_or(missing),
            entropy_dst_addr: row.entropy_dst_ip.unwrap_or(missing),
            syn_ratio: row.syn_ratio.unwrap_or(missing),
        }
    }
}

impl FeatureRow {
    /// Empty cells are fine; infinite ones are not.
    fn check_finite(&self, line: u64) -> Result<(), InputError> {
        let cells = [
            self.packets_per_sec,
            self.bytes_per_sec,
            self.entropy_src_ip,
            self.entropy_dst_ip,
            self.syn_ratio,
        ];
        for (cell, field) in cells.into_iter().zip(FEATURE_NAMES) {
            if let Some(v) = cell.filter(|v| v.is_infinite()) {
                return Err(InputError::Field {
                    line,
                    field,
                    reason: format!("{} is not a finite number", v),
                });
            }
        }
        Ok(())
    }
}

fn required_columns() -> impl Iterator<Item = &'static str> {
    std::iter::once(TS_COLUMN).chain(FEATURE_NAMES)
}

fn missing_columns(headers: &StringRecord) -> Vec<String> {
    required_columns()
        .filter(|c| !headers.iter().any(|h| h == *c))
        .map(str::to_string)
        .collect()
}

/// Write feature vectors with the standard header.
pub fn write_features_csv(path: &Path, features: &[FeatureVector]) -> io::Result<()> {
    let mut wtr = WriterBuilder::new().has_headers(true).from_path(path)?;
    for f in features {
        wtr.serialize(f)?;
    }
    if features.is_empty() {
        // serialize() emits the header lazily; keep the file well-formed.
        wtr.write_record(required_columns())?;
    }
    wtr.flush()?;
    info!(path = %path.display(), windows = features.len(), "wrote feature vectors");
    Ok(())
}

/// Load feature vectors. Columns are matched by name; empty numeric cells
/// load as NaN and are imputed by the scorer. Infinite cells are rejected.
pub fn read_features_csv(path: &Path) -> Result<Vec<FeatureVector>, InputError> {
    let name = path.display().to_string();
    let file = File::open(path).map_err(|source| InputError::Io {
        path: name.clone(),
        source,
    })?;
    let features = read_features(file, &name)?;
    info!(path = %name, windows = features.len(), "loaded feature vectors");
    Ok(features)
}

pub fn read_features<R: io::Read>(input: R, name: &str) -> Result<Vec<FeatureVector>, InputError> {
    let csv_err = |source| InputError::Csv {
        path: name.to_string(),
        source,
    };
    let mut rdr = ReaderBuilder::new().trim(Trim::All).from_reader(input);

    let missing = missing_columns(rdr.headers().map_err(csv_err)?);
    if !missing.is_empty() {
        return Err(InputError::MissingColumns {
            path: name.to_string(),
            missing,
        });
    }

    let mut features = Vec::new();
    for row in rdr.deserialize::<FeatureRow>() {
        let row = row.map_err(csv_err)?;
        let line = features.len() as u64 + 2;
        check_timestamp(row.ts_start).map_err(|reason| InputError::Field {
            line,
            field: TS_COLUMN,
            reason,
        })?;
        row.check_finite(line)?;
        features.push(FeatureVector::from(row));
    }

    if features.is_empty() {
        return Err(InputError::Empty {
            path: name.to_string(),
        });
    }
    Ok(features)
}

/// Inspect a feature file and report every problem found, rather than
/// stopping at the first one. An empty list means the file is usable.
pub fn validate_features_csv(path: &Path) -> Vec<String> {
    let mut rdr = match ReaderBuilder::new().trim(Trim::All).from_path(path) {
        Ok(r) => r,
        Err(e) => return vec![format!("Unable to open {}: {}", path.display(), e)],
    };
    let headers = match rdr.headers() {
        Ok(h) => h.clone(),
        Err(e) => return vec![format!("Unable to read header: {}", e)],
    };

    let mut problems = Vec::new();
    let missing = missing_columns(&headers);
    if !missing.is_empty() {
        problems.push(format!("Missing columns: {:?}", missing));
    }

    let present: Vec<(usize, &'static str)> = required_columns()
        .filter_map(|c| headers.iter().position(|h| h == c).map(|idx| (idx, c)))
        .collect();
    let mut bad_columns: Vec<&'static str> = Vec::new();
    let mut infinite_columns: Vec<&'static str> = Vec::new();
    let mut rows = 0usize;

    for record in rdr.records() {
        let record = match record {
            Ok(r) => r,
            Err(e) => {
                problems.push(format!("Malformed row: {}", e));
                break;
            }
        };
        rows += 1;
        for &(idx, column) in &present {
            let cell = record.get(idx).unwrap_or("");
            // Empty numeric cells are imputed later; only ts_start is mandatory.
            let ok = if cell.is_empty() {
                column != TS_COLUMN
            } else {
                match cell.parse::<f64>() {
                    Ok(v) if v.is_infinite() => {
                        if !infinite_columns.contains(&column) {
                            infinite_columns.push(column);
                        }
                        true
                    }
                    Ok(_) => true,
                    Err(_) => false,
                }
            };
            if !ok && !bad_columns.contains(&column) {
                bad_columns.push(column);
            }
        }
    }

    if rows == 0 {
        problems.push("No rows in features file".to_string());
    }
    for column in bad_columns {
        if column == TS_COLUMN {
            problems.push("Column ts_start is not numeric (epoch seconds expected)".to_string());
        } else {
            problems.push(format!("Column {} is not numeric", column));
        }
    }
    for column in infinite_columns {
        problems.push(format!("Column {} contains infinite values", column));
    }
    problems
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<FeatureVector> {
        vec![
            FeatureVector {
                window_start: 1_700_000_000.0,
                packets_per_sec: 50.0,
                bytes_per_sec: 39_000.5,
                entropy_src_addr: 5.64,
                entropy_dst_addr: 5.4,
                syn_ratio: 0.2,
            },
            FeatureVector {
                window_start: 1_700_000_001.0,
                packets_per_sec: 2500.0,
                bytes_per_sec: 125_000.0,
                entropy_src_addr: 0.0,
                entropy_dst_addr: 7.9,
                syn_ratio: 1.0,
            },
        ]
    }

    #[test]
    fn test_write_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("features.csv");
        write_features_csv(&path, &sample()).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with(
            "ts_start,packets_per_sec,bytes_per_sec,entropy_src_ip,entropy_dst_ip,syn_ratio"
        ));

        let loaded = read_features_csv(&path).unwrap();
        assert_eq!(loaded, sample());
    }

    #[test]
    fn test_empty_cells_load_as_missing() {
        let body = "ts_start,packets_per_sec,bytes_per_sec,entropy_src_ip,entropy_dst_ip,syn_ratio
1700000000,50,,5.6,5.4,0.2
";
        let loaded = read_features(body.as_bytes(), "mem").unwrap();
        assert!(loaded[0].bytes_per_sec.is_nan());
        assert_eq!(loaded[0].to_array()[1], 0.0);
    }

    #[test]
    fn test_infinite_cell_is_rejected() {
        let body = "ts_start,packets_per_sec,bytes_per_sec,entropy_src_ip,entropy_dst_ip,syn_ratio
1700000000,50,39000,5.6,5.4,0.2
1700000001,50,inf,5.6,5.4,0.2
";
        match read_features(body.as_bytes(), "mem").unwrap_err() {
            InputError::Field { line, field, .. } => {
                assert_eq!(line, 3);
                assert_eq!(field, "bytes_per_sec");
            }
            other => panic!("unexpected error: {other}"),
        }

        let negative = body.replace("inf", "-inf");
        assert!(matches!(
            read_features(negative.as_bytes(), "mem"),
            Err(InputError::Field { field: "bytes_per_sec", .. })
        ));
    }

    #[test]
    fn test_missing_column_is_rejected() {
        let body = "ts_start,packets_per_sec,bytes_per_sec\n1,2,3\n";
        let err = read_features(body.as_bytes(), "mem").unwrap_err();
        match err {
            InputError::MissingColumns { missing, .. } => {
                assert!(missing.contains(&"syn_ratio".to_string()));
                assert!(!missing.contains(&"ts_start".to_string()));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_validate_ok() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("features.csv");
        write_features_csv(&path, &sample()).unwrap();
        assert!(validate_features_csv(&path).is_empty());
    }

    #[test]
    fn test_validate_reports_missing_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.csv");
        std::fs::write(&path, "packets_per_sec,bytes_per_sec\n1.0,100\n").unwrap();
        let problems = validate_features_csv(&path);
        assert!(problems.iter().any(|p| p.contains("Missing columns")));
    }

    #[test]
    fn test_validate_reports_bad_types() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        std::fs::write(
            &path,
            "packets_per_sec,bytes_per_sec,entropy_src_ip,entropy_dst_ip,syn_ratio,ts_start
a,100,1.0,0.9,0.0,notanumber
b,200,1.2,1.1,1.0,also
",
        )
        .unwrap();
        let problems = validate_features_csv(&path);
        assert!(problems.iter().any(|p| p.contains("packets_per_sec is not numeric")));
        assert!(problems.iter().any(|p| p.contains("ts_start")));
    }

    #[test]
    fn test_validate_reports_infinite_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inf.csv");
        std::fs::write(
            &path,
            "ts_start,packets_per_sec,bytes_per_sec,entropy_src_ip,entropy_dst_ip,syn_ratio
1700000000,inf,100,1.0,0.9,0.0
",
        )
        .unwrap();
        let problems = validate_features_csv(&path);
        assert_eq!(
            problems,
            vec!["Column packets_per_sec contains infinite values".to_string()]
        );
    }

    #[test]
    fn test_validate_reports_no_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.csv");
        write_features_csv(&path, &[]).unwrap();
        let problems = validate_features_csv(&path);
        assert_eq!(problems, vec!["No rows in features file".to_string()]);
    }
}
