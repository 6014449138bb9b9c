//! Content-hash duplicate detection backed by the action ledger.

use vsort_ledger::Ledger;

use crate::fingerprint::Fingerprint;

#[derive(Clone)]
pub struct DedupLedger {
    ledger: Ledger,
    enabled: bool,
}

impl DedupLedger {
    pub fn new(ledger: Ledger, enabled: bool) -> Self {
        Self { ledger, enabled }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// True when checking is on, the hash is known, and a previous
    /// successful action carried the same hash.
    pub fn is_duplicate(&self, fingerprint: &Fingerprint) -> vsort_ledger::Result<bool> {
        if !self.enabled {
            return Ok(false);
        }
        match fingerprint.as_hex() {
            Some(hash) => self.ledger.hash_exists(hash),
            None => Ok(false),
        }
    }
}
