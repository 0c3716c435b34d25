//! Key schedules: document seed → cipher key
//!
//! Derivation is pluggable. Legacy files derive the key from the document's
//! root title; callers embedding the engine elsewhere can supply their own.

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

/// Ordered sequence of small integers driving the cipher keystream.
/// Zeroized on drop.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CipherKey {
    schedule: Vec<u8>,
}

impl CipherKey {
    pub fn new(schedule: Vec<u8>) -> Self {
        Self { schedule }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.schedule
    }

    pub fn len(&self) -> usize {
        self.schedule.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schedule.is_empty()
    }
}

impl Drop for CipherKey {
    fn drop(&mut self) {
        self.schedule.zeroize();
    }
}

impl std::fmt::Debug for CipherKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CipherKey")
            .field("len", &self.schedule.len())
            .field("schedule", &"[REDACTED]")
            .finish()
    }
}

/// Derives a document's cipher key from its seed.
///
/// Implementations must be deterministic: the same seed always yields the
/// same key, otherwise a decoded document cannot be decrypted.
pub trait KeySchedule: Send + Sync {
    fn derive(&self, seed: &str) -> CipherKey;
}

/// The legacy derivation: each title byte is offset by the repeating mask
/// `"key"` XOR `(i + 40)` and folded back below 128.
#[derive(Debug, Clone, Copy, Default)]
pub struct TitleKeySchedule;

const MASK: &[u8; 3] = b"key";

impl KeySchedule for TitleKeySchedule {
    fn derive(&self, seed: &str) -> CipherKey {
        let schedule = seed
            .bytes()
            .enumerate()
            .map(|(i, b)| {
                let mut k = u32::from(b) + (u32::from(MASK[i % MASK.len()]) ^ (i as u32 + 40));
                while k > 127 {
                    k -= 96;
                }
                k as u8
            })
            .collect();
        CipherKey::new(schedule)
    }
}

/// Ignores the seed and always yields the same key.
#[derive(Debug, Clone)]
pub struct FixedKeySchedule {
    key: CipherKey,
}

impl FixedKeySchedule {
    pub fn new(key: CipherKey) -> Self {
        Self { key }
    }
}

impl KeySchedule for FixedKeySchedule {
    fn derive(&self, _seed: &str) -> CipherKey {
        self.key.clone()
    }
}
