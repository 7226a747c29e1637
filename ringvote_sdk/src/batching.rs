use crate::error::{Result, VoteError};
use std::ops::Range;

/// Position of one key inside the batched key set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyLocation {
    pub batch_index: usize,
    pub offset: usize,
}

/// Partition of `key_count` ordered keys into contiguous batches of at most
/// `batch_size` keys; only the last batch may be short.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPlan {
    key_count: usize,
    batch_size: usize,
}

impl BatchPlan {
    pub fn new(key_count: usize, batch_size: usize) -> Result<Self> {
        if batch_size == 0 || batch_size > u16::MAX as usize {
            return Err(VoteError::Validation(format!(
                "batch size must be within 1..={}, got {}",
                u16::MAX,
                batch_size
            )));
        }
        Ok(Self {
            key_count,
            batch_size,
        })
    }

    pub fn key_count(&self) -> usize {
        self.key_count
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn batch_count(&self) -> usize {
        self.key_count.div_ceil(self.batch_size)
    }

    /// Global key range covered by a batch.
    pub fn batch_range(&self, batch_index: usize) -> Option<Range<usize>> {
        if batch_index >= self.batch_count() {
            return None;
        }
        let start = batch_index * self.batch_size;
        Some(start..(start + self.batch_size).min(self.key_count))
    }

    pub fn batch_len(&self, batch_index: usize) -> usize {
        self.batch_range(batch_index).map_or(0, |r| r.len())
    }

    pub fn ranges(&self) -> impl Iterator<Item = Range<usize>> + '_ {
        (0..self.batch_count()).filter_map(move |i| self.batch_range(i))
    }

    /// Batch and offset of a global key index, without scanning batches.
    pub fn locate(&self, key_index: usize) -> Option<KeyLocation> {
        if key_index >= self.key_count {
            return None;
        }
        Some(KeyLocation {
            batch_index: key_index / self.batch_size,
            offset: key_index % self.batch_size,
        })
    }

    pub fn global_index(&self, location: KeyLocation) -> Option<usize> {
        let index = location.batch_index * self.batch_size + location.offset;
        (location.offset < self.batch_size && index < self.key_count).then_some(index)
    }

    /// Borrow `items` as consecutive batches following this plan.
    pub fn split<'a, T>(&self, items: &'a [T]) -> Result<Vec<&'a [T]>> {
        if items.len() != self.key_count {
            return Err(VoteError::Validation(format!(
                "plan covers {} keys, got {}",
                self.key_count,
                items.len()
            )));
        }
        Ok(items.chunks(self.batch_size).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uneven_split() {
        let plan = BatchPlan::new(601, 600).unwrap();
        assert_eq!(plan.batch_count(), 2);
        assert_eq!(plan.batch_len(0), 600);
        assert_eq!(plan.batch_len(1), 1);
        assert_eq!(
            plan.locate(600),
            Some(KeyLocation { batch_index: 1, offset: 0 })
        );
        assert_eq!(plan.locate(601), None);
    }

    #[test]
    fn test_even_split_and_empty() {
        let plan = BatchPlan::new(1200, 600).unwrap();
        assert_eq!(plan.batch_count(), 2);
        assert_eq!(plan.batch_len(1), 600);

        let empty = BatchPlan::new(0, 600).unwrap();
        assert_eq!(empty.batch_count(), 0);
        assert_eq!(empty.ranges().count(), 0);
    }

    #[test]
    fn test_locate_matches_split() {
        let keys: Vec<usize> = (0..1013).collect();
        for batch_size in [1, 7, 450, 600, 2000] {
            let plan = BatchPlan::new(keys.len(), batch_size).unwrap();
            let batches = plan.split(&keys).unwrap();
            assert_eq!(batches.len(), plan.batch_count());
            assert_eq!(batches.iter().map(|b| b.len()).sum::<usize>(), keys.len());
            for key in &keys {
                let loc = plan.locate(*key).unwrap();
                assert_eq!(batches[loc.batch_index][loc.offset], *key);
                assert_eq!(plan.global_index(loc), Some(*key));
            }
        }
    }

    #[test]
    fn test_invalid_batch_size() {
        assert!(BatchPlan::new(10, 0).is_err());
        assert!(BatchPlan::new(10, 70_000).is_err());
    }
}
