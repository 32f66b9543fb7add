use std::sync::atomic::{AtomicU64, Ordering};

/// Number of rows written during one table pass.
///
/// Each pass owns its own counter, so passes running on different pool
/// threads never observe each other's counts. A progress reporter may read
/// it from another thread while the writer increments it.
#[derive(Debug, Default)]
pub struct RowCounter {
    count: AtomicU64,
}

impl RowCounter {
    pub fn increment(&self) {
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn read(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.count.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_increment_read_reset() {
        let counter = RowCounter::default();
        assert_eq!(counter.read(), 0);
        counter.increment();
        counter.increment();
        assert_eq!(counter.read(), 2);
        counter.reset();
        assert_eq!(counter.read(), 0);
    }

    #[test]
    fn test_concurrent_increments() {
        let counter = RowCounter::default();
        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..1000 {
                        counter.increment();
                    }
                });
            }
            s.spawn(|| {
                let seen = counter.read();
                assert!(seen <= 8000);
            });
        });
        assert_eq!(counter.read(), 8000);
    }
}
