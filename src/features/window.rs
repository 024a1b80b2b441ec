//! Fixed-width, half-open time windows over a traffic trace.

use tracing::debug;

use super::calc::{entropy, per_second};
use super::{FeatureVector, WindowSize};
use crate::traffic::TrafficRecord;

/// Records with `start <= timestamp < end`, in timestamp order.
#[derive(Debug, Clone)]
pub struct Window<'a> {
    pub index: u64,
    pub start: f64,
    pub end: f64,
    pub records: Vec<&'a TrafficRecord>,
}

impl Window<'_> {
    /// Compute the feature vector for this window.
    pub fn features(&self, size: WindowSize) -> FeatureVector {
        let count = self.records.len();
        let bytes: f64 = self.records.iter().map(|r| f64::from(r.length)).sum();
        let syns = self.records.iter().filter(|r| r.flags.is_syn()).count();
        let syn_ratio = if count > 0 {
            syns as f64 / count as f64
        } else {
            0.0
        };

        FeatureVector {
            window_start: self.start,
            packets_per_sec: per_second(count as f64, size),
            bytes_per_sec: per_second(bytes, size),
            entropy_src_addr: entropy(self.records.iter().map(|r| r.src_addr)),
            entropy_dst_addr: entropy(self.records.iter().map(|r| r.dst_addr)),
            syn_ratio,
        }
    }
}

/// Bucket `records` into windows anchored at the earliest timestamp.
///
/// Input order does not matter: records are stable-sorted by timestamp first.
/// Only non-empty windows are returned, in increasing start order.
pub fn windows(records: &[TrafficRecord], size: WindowSize) -> Vec<Window<'_>> {
    let mut sorted: Vec<&TrafficRecord> = records.iter().collect();
    sorted.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));

    let Some(first) = sorted.first() else {
        return Vec::new();
    };
    let t0 = first.timestamp;
    let width = size.secs();

    let mut out: Vec<Window<'_>> = Vec::new();
    for record in sorted {
        let index = ((record.timestamp - t0) / width).floor() as u64;
        match out.last_mut() {
            Some(w) if w.index == index => w.records.push(record),
            _ => {
                let start = t0 + index as f64 * width;
                out.push(Window {
                    index,
                    start,
                    end: start + width,
                    records: vec![record],
                });
            }
        }
    }
    out
}

/// One feature vector per non-empty window, ordered by window start.
pub fn aggregate(records: &[TrafficRecord], size: WindowSize) -> Vec<FeatureVector> {
    let buckets = windows(records, size);
    debug!(
        records = records.len(),
        windows = buckets.len(),
        window_secs = size.secs(),
        "aggregated traffic into windows"
    );
    buckets.iter().map(|w| w.features(size)).collect()
}
