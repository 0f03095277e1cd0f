//! Id minting and process fingerprinting

use rand::Rng;
use sha2::{Digest, Sha256};
use std::io::Read;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::domain::{HashId, UnixTime};

/// Mints opaque, collision-resistant ids for runs and observations.
///
/// Each id hashes the current time, a random draw and a per-generator counter,
/// so two ids minted in the same second on the same thread still differ.
#[derive(Debug, Default)]
pub struct IdGenerator {
    next: AtomicU64,
}

impl IdGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> HashId {
        let n = self.next.fetch_add(1, Ordering::Relaxed) + 1;
        let entropy: u32 = rand::thread_rng().gen_range(0..1_000_000_000);
        HashId::digest([
            UnixTime::now().as_secs().to_string(),
            entropy.to_string(),
            n.to_string(),
        ])
    }

    /// Number of ids minted so far
    #[must_use]
    pub fn issued(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }
}

/// SHA-256 of the running executable, or an empty string if it can't be read
#[must_use]
pub fn build_id() -> String {
    std::env::current_exe()
        .and_then(std::fs::File::open)
        .and_then(|mut file| {
            let mut hasher = Sha256::new();
            let mut buf = [0u8; 64 * 1024];
            loop {
                let read = file.read(&mut buf)?;
                if read == 0 {
                    break;
                }
                hasher.update(&buf[..read]);
            }
            Ok(hex::encode(hasher.finalize()))
        })
        .unwrap_or_default()
}
