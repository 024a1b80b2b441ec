//! Traffic records: the typed input of the windowing engine.

pub mod generator;
pub mod reader;

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use thiserror::Error;

pub use reader::{read_traffic_csv, write_traffic_csv};

/// Column order required in traffic CSV files.
pub const TRAFFIC_HEADER: [&str; 7] = [
    "ts", "src_ip", "dst_ip", "src_port", "dst_port", "flags", "length",
];

#[derive(Debug, Error)]
pub enum InputError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed CSV in {path}: {source}")]
    Csv {
        path: String,
        #[source]
        source: csv::Error,
    },

    #[error("{path}: unexpected header {found:?}, expected {expected:?}")]
    Header {
        path: String,
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[error("{path}: missing columns {missing:?}")]
    MissingColumns { path: String, missing: Vec<String> },

    #[error("{path}: no records")]
    Empty { path: String },

    #[error("line {line}: invalid {field}: {reason}")]
    Field {
        line: u64,
        field: &'static str,
        reason: String,
    },

    #[error("invalid TCP flag {0:?} (expected a subset of SAPFRU)")]
    Flag(char),

    #[error("window size must be a positive finite number of seconds, got {0}")]
    WindowSize(f64),
}

/// Set of TCP flags observed on a record.
///
/// Bounded to `S`, `A`, `P`, `F`, `R`, `U`; the empty set is valid.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct TcpFlags(u8);

impl TcpFlags {
    pub const SYN: TcpFlags = TcpFlags(1 << 0);
    pub const ACK: TcpFlags = TcpFlags(1 << 1);
    pub const PSH: TcpFlags = TcpFlags(1 << 2);
    pub const FIN: TcpFlags = TcpFlags(1 << 3);
    pub const RST: TcpFlags = TcpFlags(1 << 4);
    pub const URG: TcpFlags = TcpFlags(1 << 5);

    // Canonical rendering order.
    const LETTERS: [(char, TcpFlags); 6] = [
        ('S', Self::SYN),
        ('A', Self::ACK),
        ('P', Self::PSH),
        ('F', Self::FIN),
        ('R', Self::RST),
        ('U', Self::URG),
    ];

    pub const fn empty() -> Self {
        TcpFlags(0)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, other: TcpFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: TcpFlags) -> Self {
        TcpFlags(self.0 | other.0)
    }

    pub const fn is_syn(self) -> bool {
        self.contains(Self::SYN)
    }
}

impl FromStr for TcpFlags {
    type Err = InputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut flags = TcpFlags::empty();
        for c in s.trim().chars() {
            let (_, bit) = Self::LETTERS
                .iter()
                .find(|(letter, _)| *letter == c)
                .ok_or(InputError::Flag(c))?;
            flags = flags.union(*bit);
        }
        Ok(flags)
    }
}

impl fmt::Display for TcpFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (letter, bit) in Self::LETTERS {
            if self.contains(bit) {
                write!(f, "{}", letter)?;
            }
        }
        Ok(())
    }
}

/// One observed packet (or connection attempt).
#[derive(Debug, Clone, PartialEq)]
pub struct TrafficRecord {
    /// Epoch seconds.
    pub timestamp: f64,
    pub src_addr: IpAddr,
    pub dst_addr: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
    pub flags: TcpFlags,
    pub length: u32,
}

/// Check that `ts` can be used as a window boundary and rendered as a UTC
/// timestamp later on.
pub(crate) fn check_timestamp(ts: f64) -> Result<(), String> {
    if !ts.is_finite() || ts < 0.0 {
        return Err(format!("{} is not a non-negative finite epoch value", ts));
    }
    if crate::alert::epoch_to_utc(ts).is_none() {
        return Err(format!("{} is outside the representable date range", ts));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_parse_subsets() {
        let f: TcpFlags = "PA".parse().unwrap();
        assert!(f.contains(TcpFlags::PSH));
        assert!(f.contains(TcpFlags::ACK));
        assert!(!f.is_syn());

        let empty: TcpFlags = "".parse().unwrap();
        assert!(empty.is_empty());

        let syn: TcpFlags = "S".parse().unwrap();
        assert!(syn.is_syn());
    }

    #[test]
    fn test_flags_reject_unknown_letter() {
        let err = "SX".parse::<TcpFlags>().unwrap_err();
        assert!(matches!(err, InputError::Flag('X')));
    }

    #[test]
    fn test_flags_display_is_canonical() {
        let f: TcpFlags = "AS".parse().unwrap();
        assert_eq!(f.to_string(), "SA");
        assert_eq!(TcpFlags::empty().to_string(), "");
    }

    #[test]
    fn test_check_timestamp() {
        assert!(check_timestamp(1_700_000_000.25).is_ok());
        assert!(check_timestamp(f64::NAN).is_err());
        assert!(check_timestamp(-1.0).is_err());
        assert!(check_timestamp(f64::INFINITY).is_err());
        assert!(check_timestamp(1e300).is_err());
    }
}
