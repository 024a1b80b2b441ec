//! Synthetic traffic fixtures: steady background traffic with optional
//! SYN-flood bursts. Used by the demo command and by the test-suite.

use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::str::FromStr;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{TcpFlags, TrafficRecord};

/// Fixed source used by single-source floods.
pub const ATTACKER_ADDR: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 99);

const SERVICE_PORTS: [u16; 5] = [80, 443, 53, 22, 8080];
const BACKGROUND_FLAGS: [&str; 5] = ["", "A", "P", "PA", "S"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AttackKind {
    /// One attacker, `pps * 50` SYNs per second.
    SynSingleSrc,
    /// Random spoofed sources, `pps * 40` SYNs per second.
    SynManySrc,
}

impl FromStr for AttackKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.replace('_', "-").as_str() {
            "syn-single-src" => Ok(AttackKind::SynSingleSrc),
            "syn-many-src" => Ok(AttackKind::SynManySrc),
            other => Err(format!(
                "unknown attack kind '{}' (expected syn-single-src or syn-many-src)",
                other
            )),
        }
    }
}

/// Burst covering seconds `[start_sec, start_sec + duration_secs)` of a trace.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AttackWindow {
    pub start_sec: u32,
    pub duration_secs: u32,
    pub kind: AttackKind,
}

impl AttackWindow {
    fn covers(&self, second: u32) -> bool {
        second >= self.start_sec && second < self.start_sec.saturating_add(self.duration_secs)
    }
}

/// Parses `START:DURATION:KIND`, e.g. `40:40:syn-single-src`.
impl FromStr for AttackWindow {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.splitn(3, ':').collect();
        if parts.len() != 3 {
            return Err(format!("invalid attack '{}'. Expected START:DURATION:KIND", s));
        }
        let start_sec = parts[0]
            .parse()
            .map_err(|e| format!("invalid attack start '{}': {}", parts[0], e))?;
        let duration_secs = parts[1]
            .parse()
            .map_err(|e| format!("invalid attack duration '{}': {}", parts[1], e))?;
        Ok(AttackWindow {
            start_sec,
            duration_secs,
            kind: parts[2].parse()?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct TrafficProfile {
    pub duration_secs: u32,
    /// Background packets per second.
    pub pps: u32,
    /// Epoch seconds of the first record.
    pub start_epoch: f64,
    pub attacks: Vec<AttackWindow>,
    pub seed: u64,
}

impl Default for TrafficProfile {
    fn default() -> Self {
        Self {
            duration_secs: 120,
            pps: 50,
            start_epoch: chrono::Utc::now().timestamp() as f64,
            attacks: Vec::new(),
            seed: 42,
        }
    }
}

/// Generate a trace for `profile`. Deterministic for a given seed.
pub fn generate(profile: &TrafficProfile) -> Vec<TrafficRecord> {
    let mut rng = StdRng::seed_from_u64(profile.seed);
    let mut records = Vec::new();

    for second in 0..profile.duration_secs {
        let base = profile.start_epoch + f64::from(second);
        let attack = profile.attacks.iter().find(|a| a.covers(second));

        let count = match attack.map(|a| a.kind) {
            None => profile.pps,
            Some(AttackKind::SynSingleSrc) => profile.pps.saturating_mul(50),
            Some(AttackKind::SynManySrc) => profile.pps.saturating_mul(40),
        };

        for i in 0..count {
            // Spread evenly inside the second so every record stays in [base, base + 1).
            let timestamp = base + f64::from(i) / f64::from(count);
            let record = match attack.map(|a| a.kind) {
                None => background_record(&mut rng, timestamp),
                Some(kind) => flood_record(&mut rng, timestamp, kind),
            };
            records.push(record);
        }
    }
    records
}

/// Generate a trace and write it as traffic CSV.
pub fn generate_to_csv(path: &Path, profile: &TrafficProfile) -> anyhow::Result<usize> {
    let records = generate(profile);
    super::write_traffic_csv(path, &records)?;
    info!(
        path = %path.display(),
        records = records.len(),
        attacks = profile.attacks.len(),
        "generated synthetic traffic"
    );
    Ok(records.len())
}

fn random_private_source(rng: &mut StdRng) -> IpAddr {
    IpAddr::V4(Ipv4Addr::from(rng.gen_range(0x0A00_0000u32..=0x0AFF_FFFF)))
}

fn random_lan_host(rng: &mut StdRng) -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(192, 168, 0, rng.gen_range(1..=254)))
}

fn background_record(rng: &mut StdRng, timestamp: f64) -> TrafficRecord {
    let flags = BACKGROUND_FLAGS
        .choose(rng)
        .and_then(|f| f.parse().ok())
        .unwrap_or_default();
    TrafficRecord {
        timestamp,
        src_addr: random_private_source(rng),
        dst_addr: random_lan_host(rng),
        src_port: rng.gen_range(1024..=65535),
        dst_port: *SERVICE_PORTS.choose(rng).unwrap_or(&80),
        flags,
        length: rng.gen_range(60..=1500),
    }
}

fn flood_record(rng: &mut StdRng, timestamp: f64, kind: AttackKind) -> TrafficRecord {
    let src_addr = match kind {
        AttackKind::SynSingleSrc => IpAddr::V4(ATTACKER_ADDR),
        AttackKind::SynManySrc => random_private_source(rng),
    };
    TrafficRecord {
        timestamp,
        src_addr,
        dst_addr: random_lan_host(rng),
        src_port: rng.gen_range(1024..=65535),
        dst_port: 80,
        flags: TcpFlags::SYN,
        length: rng.gen_range(40..=60),
    }
}
