//! Traffic CSV ingestion and export.

use std::fs::File;
use std::io;
use std::path::Path;

use csv::{ReaderBuilder, StringRecord, Trim, WriterBuilder};
use tracing::{debug, info};

use super::{check_timestamp, InputError, TcpFlags, TrafficRecord, TRAFFIC_HEADER};

/// Read a traffic CSV file. The header row is mandatory and must list the
/// columns in `TRAFFIC_HEADER` order. A file without data rows is an error.
pub fn read_traffic_csv(path: &Path) -> Result<Vec<TrafficRecord>, InputError> {
    let name = path.display().to_string();
    let file = File::open(path).map_err(|source| InputError::Io {
        path: name.clone(),
        source,
    })?;
    let records = read_traffic(file, &name)?;
    info!(path = %name, records = records.len(), "loaded traffic records");
    Ok(records)
}

/// Read traffic records from any reader; `name` is used in error messages.
pub fn read_traffic<R: io::Read>(input: R, name: &str) -> Result<Vec<TrafficRecord>, InputError> {
    let csv_err = |source| InputError::Csv {
        path: name.to_string(),
        source,
    };

    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .trim(Trim::All)
        .from_reader(input);

    let headers = rdr.headers().map_err(csv_err)?.clone();
    if !headers.iter().eq(TRAFFIC_HEADER.iter().copied()) {
        return Err(InputError::Header {
            path: name.to_string(),
            expected: TRAFFIC_HEADER.iter().map(|s| s.to_string()).collect(),
            found: headers.iter().map(|s| s.to_string()).collect(),
        });
    }

    let mut records = Vec::new();
    for row in rdr.records() {
        let row = row.map_err(csv_err)?;
        records.push(parse_row(&row)?);
    }

    if records.is_empty() {
        return Err(InputError::Empty {
            path: name.to_string(),
        });
    }
    debug!(path = %name, records = records.len(), "parsed traffic CSV");
    Ok(records)
}

fn parse_row(row: &StringRecord) -> Result<TrafficRecord, InputError> {
    let line = row.position().map(|p| p.line()).unwrap_or(0);
    let field = |idx: usize, name: &'static str| column(row, idx, name, line);
    let invalid = |name: &'static str, reason: String| InputError::Field {
        line,
        field: name,
        reason,
    };

    let ts_raw = field(0, "ts")?;
    let timestamp: f64 = ts_raw
        .parse()
        .map_err(|_| invalid("ts", format!("{:?} is not a decimal epoch value", ts_raw)))?;
    check_timestamp(timestamp).map_err(|reason| invalid("ts", reason))?;

    let src_addr = field(1, "src_ip")?
        .parse()
        .map_err(|e| invalid("src_ip", format!("{}", e)))?;
    let dst_addr = field(2, "dst_ip")?
        .parse()
        .map_err(|e| invalid("dst_ip", format!("{}", e)))?;
    let src_port = field(3, "src_port")?
        .parse()
        .map_err(|e| invalid("src_port", format!("{}", e)))?;
    let dst_port = field(4, "dst_port")?
        .parse()
        .map_err(|e| invalid("dst_port", format!("{}", e)))?;
    let flags: TcpFlags = field(5, "flags")?
        .parse()
        .map_err(|e| invalid("flags", format!("{}", e)))?;

    let length_raw = field(6, "length")?;
    let length = if length_raw.is_empty() {
        0
    } else {
        length_raw
            .parse()
            .map_err(|e| invalid("length", format!("{}", e)))?
    };

    Ok(TrafficRecord {
        timestamp,
        src_addr,
        dst_addr,
        src_port,
        dst_port,
        flags,
        length,
    })
}

fn column<'a>(
    row: &'a StringRecord,
    idx: usize,
    name: &'static str,
    line: u64,
) -> Result<&'a str, InputError> {
    row.get(idx).ok_or_else(|| InputError::Field {
        line,
        field: name,
        reason: "missing column".to_string(),
    })
}

/// Write records as traffic CSV (header included).
pub fn write_traffic_csv(path: &Path, records: &[TrafficRecord]) -> io::Result<()> {
    let mut wtr = WriterBuilder::new().from_path(path)?;
    wtr.write_record(TRAFFIC_HEADER)?;
    for r in records {
        wtr.write_record([
            format!("{:.6}", r.timestamp),
            r.src_addr.to_string(),
            r.dst_addr.to_string(),
            r.src_port.to_string(),
            r.dst_port.to_string(),
            r.flags.to_string(),
            r.length.to_string(),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}
