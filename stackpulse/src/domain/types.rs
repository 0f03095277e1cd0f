//! Domain types providing compile-time safety and self-documentation

use sha2::{Digest, Sha256};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock time in whole seconds since the Unix epoch
///
/// Used for `added_at` on queued messages, measurement timestamps and the
/// run timestamp. Only ordering and subtraction matter, so second resolution
/// matches what the collector stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnixTime(pub u64);

impl UnixTime {
    /// Current wall-clock time (0 if the clock is before the epoch)
    #[must_use]
    pub fn now() -> Self {
        let secs = SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |d| d.as_secs());
        UnixTime(secs)
    }

    /// This time shifted back by `secs`, clamped at the epoch
    #[must_use]
    pub fn minus_secs(self, secs: u64) -> Self {
        UnixTime(self.0.saturating_sub(secs))
    }

    #[must_use]
    pub fn as_secs(self) -> u64 {
        self.0
    }
}

impl fmt::Display for UnixTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}s", self.0)
    }
}

/// Hex-encoded SHA-256 digest
///
/// Identifies metrics (stable hash over their labels), runs and individual
/// observations (hash over counter + entropy + time).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HashId(String);

impl HashId {
    /// Hash the concatenation of `parts`
    #[must_use]
    pub fn digest<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part.as_ref());
        }
        HashId(hex::encode(hasher.finalize()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for HashId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
