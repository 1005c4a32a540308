//! Correlation id generation.
//!
//! Ids combine three components so that bursty concurrent calls never collide:
//!
//! ```text
//! <unix millis, hex>-<per-generator counter, hex>-<32 random bits, hex>
//! ```
//!
//! The counter alone guarantees uniqueness within one generator; the time and
//! random parts keep ids from two peers (or a restarted peer) apart.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Collision-resistant correlation id source.
#[derive(Debug, Default)]
pub struct CidGenerator {
    counter: AtomicU64,
}

impl CidGenerator {
    /// Create a new generator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Produce the next id.
    pub fn next_id(&self) -> String {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        let salt: u32 = rand::random();

        format!("{:x}-{:x}-{:08x}", millis, seq, salt)
    }

    /// Number of ids handed out so far.
    #[inline]
    pub fn issued(&self) -> u64 {
        self.counter.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_id_format() {
        let generator = CidGenerator::new();
        let id = generator.next_id();

        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert!(parts
            .iter()
            .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_hexdigit())));
        assert_eq!(parts[1], "0");
        assert_eq!(parts[2].len(), 8);
    }

    #[test]
    fn test_ids_unique_under_burst() {
        let generator = CidGenerator::new();
        let ids: HashSet<String> = (0..10_000).map(|_| generator.next_id()).collect();

        assert_eq!(ids.len(), 10_000);
        assert_eq!(generator.issued(), 10_000);
    }

    #[test]
    fn test_ids_unique_across_threads() {
        let generator = Arc::new(CidGenerator::new());

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let generator = generator.clone();
                std::thread::spawn(move || {
                    (0..1_000).map(|_| generator.next_id()).collect::<Vec<_>>()
                })
            })
            .collect();

        let mut all = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(all.insert(id), "duplicate id");
            }
        }
        assert_eq!(all.len(), 4_000);
    }
}
