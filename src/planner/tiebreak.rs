//! Deterministic tie-break ranking.
//!
//! A daily seed is derived from the install id and the local date; each
//! volume's rank hashes that seed with the volume's stable identity. The same
//! install on the same date always produces the same ordering.

use chrono::NaiveDate;
use sha2::{Digest, Sha256};

use crate::domain::TieBreak;

const SEED_DOMAIN: &[u8] = b"revenant-tie1";

/// Seed for one local calendar day
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailySeed {
    pub date: NaiveDate,
    pub bytes: [u8; 8],
}

impl DailySeed {
    /// First 8 bytes of SHA-256(domain || install id || YYYYMMDD)
    pub fn derive(install_id: &[u8], date: NaiveDate) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(SEED_DOMAIN);
        hasher.update(install_id);
        hasher.update(date.format("%Y%m%d").to_string().as_bytes());
        let digest = hasher.finalize();
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        Self { date, bytes }
    }

    pub fn epoch(&self) -> String {
        self.date.format("%Y-%m-%d").to_string()
    }

    pub fn hex(&self) -> String {
        hex::encode(self.bytes)
    }

    /// Little-endian u64 from SHA-256(seed || identity)
    pub fn rank(&self, identity: &str) -> u64 {
        let mut hasher = Sha256::new();
        hasher.update(self.bytes);
        hasher.update(identity.as_bytes());
        let digest = hasher.finalize();
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        u64::from_le_bytes(head)
    }
}

/// Holds the current daily seed and re-derives it when the date changes
#[derive(Debug, Clone)]
pub struct TieBreaker {
    install_id: Vec<u8>,
    seed: DailySeed,
}

impl TieBreaker {
    pub fn new(install_id: &str, date: NaiveDate) -> Self {
        let install_id = install_id_bytes(install_id);
        let seed = DailySeed::derive(&install_id, date);
        Self { install_id, seed }
    }

    pub fn seed(&self) -> &DailySeed {
        &self.seed
    }

    /// Re-derive the seed if `date` differs. Returns true on rollover.
    pub fn roll(&mut self, date: NaiveDate) -> bool {
        if self.seed.date == date {
            return false;
        }
        self.seed = DailySeed::derive(&self.install_id, date);
        tracing::info!(epoch = %self.seed.epoch(), seed = %self.seed.hex(), "Tie-break seed rolled over");
        true
    }

    pub fn rank(&self, identity: &str) -> u64 {
        self.seed.rank(identity)
    }

    pub fn telemetry(&self, identity: &str) -> TieBreak {
        TieBreak {
            epoch: self.seed.epoch(),
            rank: self.rank(identity),
            seed_hex: self.seed.hex(),
        }
    }
}

/// UUID bytes when the id parses, raw text otherwise
fn install_id_bytes(install_id: &str) -> Vec<u8> {
    match uuid::Uuid::parse_str(install_id) {
        Ok(id) => id.as_bytes().to_vec(),
        Err(_) => install_id.as_bytes().to_vec(),
    }
}
