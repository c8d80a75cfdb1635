//! Monthly notification counters

use std::sync::Arc;

use super::engine::{Database, StorageError};
use crate::data::{Channel, CounterKey, NotificationCounter};

#[derive(Debug, Clone)]
pub struct CounterRepository {
    db: Arc<Database>,
}

impl CounterRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Current counter for `key`, created at zero if missing
    pub fn fetch_or_create(&self, key: CounterKey) -> Result<NotificationCounter, StorageError> {
        self.db.transaction(|tx| {
            if let Some(counter) = tx.counter(&key) {
                return Ok(counter.clone());
            }
            let counter = NotificationCounter::new(key);
            tx.put_counter(counter.clone());
            Ok(counter)
        })
    }

    /// Bump one channel by one, creating the row if needed
    pub fn increment(
        &self,
        key: CounterKey,
        channel: Channel,
    ) -> Result<NotificationCounter, StorageError> {
        self.db.transaction(|tx| {
            let mut counter = tx
                .counter(&key)
                .cloned()
                .unwrap_or_else(|| NotificationCounter::new(key));
            counter.increment(channel);
            tx.put_counter(counter.clone());
            Ok(counter)
        })
    }

    pub fn get(&self, key: &CounterKey) -> Option<NotificationCounter> {
        self.db.read(|tables| tables.counter(key).cloned())
    }

    /// Overwrite a counter. Used when importing usage from elsewhere.
    pub fn put(&self, counter: NotificationCounter) -> Result<(), StorageError> {
        self.db.transaction(|tx| {
            tx.put_counter(counter);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lazy_creation() {
        let repo = CounterRepository::new(Arc::new(Database::new()));
        let key = CounterKey::new(1, 2024, 2);

        assert!(repo.get(&key).is_none());
        let counter = repo.fetch_or_create(key).unwrap();
        assert_eq!(counter.email, 0);
        assert!(repo.get(&key).is_some());
    }

    #[test]
    fn test_increment_creates_and_accumulates() {
        let repo = CounterRepository::new(Arc::new(Database::new()));
        let key = CounterKey::new(1, 2024, 2);

        repo.increment(key, Channel::Push).unwrap();
        let counter = repo.increment(key, Channel::Push).unwrap();
        assert_eq!(counter.push, 2);
        assert_eq!(counter.email, 0);

        let other_month = CounterKey::new(1, 2024, 3);
        assert!(repo.get(&other_month).is_none());
    }

    #[test]
    fn test_concurrent_increments_are_not_lost() {
        let repo = CounterRepository::new(Arc::new(Database::new()));
        let key = CounterKey::new(7, 2024, 2);

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..25 {
                        repo.increment(key, Channel::Email).unwrap();
                    }
                });
            }
        });

        assert_eq!(repo.get(&key).unwrap().email, 200);
    }
}
