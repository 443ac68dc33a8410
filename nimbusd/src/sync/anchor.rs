use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use super::paging::TokenError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SyncAnchor(u64);

impl SyncAnchor {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    pub fn encode(&self) -> Vec<u8> {
        self.0.to_string().into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, TokenError> {
        if bytes.is_empty() {
            return Err(TokenError::Empty);
        }
        let text = std::str::from_utf8(bytes).map_err(|_| TokenError::NotUtf8)?;
        if !text.bytes().all(|b| b.is_ascii_digit()) {
            return Err(TokenError::InvalidAnchor(text.to_string()));
        }
        text.parse::<u64>()
            .map(SyncAnchor)
            .map_err(|_| TokenError::InvalidAnchor(text.to_string()))
    }
}

impl fmt::Display for SyncAnchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Default)]
pub struct AnchorManager {
    counter: AtomicU64,
}

impl AnchorManager {
    pub fn new(start: u64) -> Self {
        Self {
            counter: AtomicU64::new(start),
        }
    }

    pub fn current(&self) -> SyncAnchor {
        SyncAnchor(self.counter.load(Ordering::SeqCst))
    }

    pub fn advance(&self) -> SyncAnchor {
        SyncAnchor(self.counter.fetch_add(1, Ordering::SeqCst) + 1)
    }

    // Raises the counter to an anchor a host already holds; never lowers it.
    pub fn observe(&self, seen: SyncAnchor) -> SyncAnchor {
        let previous = self.counter.fetch_max(seen.0, Ordering::SeqCst);
        SyncAnchor(previous.max(seen.0))
    }
}
