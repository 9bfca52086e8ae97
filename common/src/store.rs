use std::collections::BTreeSet;

use crate::message::Value;

/// Every distinct broadcast value this node has seen. Never shrinks.
#[derive(Debug, Default, Clone)]
pub struct ValueStore {
    values: BTreeSet<Value>,
}

impl ValueStore {
    /// Returns `true` if `value` was not stored before.
    pub fn insert(&mut self, value: Value) -> bool {
        self.values.insert(value)
    }

    /// Merges `values` in and returns the ones that were new.
    pub fn merge<I>(&mut self, values: I) -> Vec<Value>
    where
        I: IntoIterator<Item = Value>,
    {
        values
            .into_iter()
            .filter(|value| self.values.insert(*value))
            .collect()
    }

    pub fn contains(&self, value: Value) -> bool {
        self.values.contains(&value)
    }

    pub fn snapshot(&self) -> Vec<Value> {
        self.values.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_deduplicates() {
        let mut store = ValueStore::default();

        assert!(store.insert(42));
        assert!(!store.insert(42));
        assert!(store.insert(7));
        assert!(!store.insert(42));

        assert_eq!(store.len(), 2);
        assert_eq!(store.snapshot(), vec![7, 42]);
    }

    #[test]
    fn merge_reports_only_new_values() {
        let mut store = ValueStore::default();
        store.insert(1);

        let fresh = store.merge([1, 2, 2, 3]);

        assert_eq!(fresh, vec![2, 3]);
        assert_eq!(store.snapshot(), vec![1, 2, 3]);
    }
}
