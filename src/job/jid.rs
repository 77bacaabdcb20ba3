//! Job identifier generation.

use std::sync::atomic::{AtomicU64, Ordering};

use uuid::Uuid;

/// Produces identifiers for jobs created on the client side.
pub trait JidGenerator: Send + Sync {
    fn generate(&self) -> String;
}

/// Random identifiers: a v4 UUID as 32 lowercase hex digits.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidJidGenerator;

impl JidGenerator for UuidJidGenerator {
    fn generate(&self) -> String {
        Uuid::new_v4().simple().to_string()
    }
}

/// Deterministic identifiers `<prefix>-1`, `<prefix>-2`, ...
#[derive(Debug)]
pub struct SequentialJidGenerator {
    prefix: String,
    next: AtomicU64,
}

impl SequentialJidGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: AtomicU64::new(1),
        }
    }
}

impl JidGenerator for SequentialJidGenerator {
    fn generate(&self) -> String {
        let n = self.next.fetch_add(1, Ordering::SeqCst);
        format!("{}-{}", self.prefix, n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_uuid_jids_are_hex_and_unique() {
        let generator = UuidJidGenerator;
        let jids: HashSet<String> = (0..100).map(|_| generator.generate()).collect();

        assert_eq!(jids.len(), 100);
        for jid in &jids {
            assert_eq!(jid.len(), 32);
            assert!(jid.chars().all(|c| c.is_ascii_hexdigit()));
        }
    }

    #[test]
    fn test_sequential_jids() {
        let generator = SequentialJidGenerator::new("job");
        assert_eq!(generator.generate(), "job-1");
        assert_eq!(generator.generate(), "job-2");
    }
}
