//! Property-based test generators using proptest.
//!
//! Provides strategies for generating writer workloads.

use proptest::prelude::*;

/// One step of a writer workload.
#[derive(Debug, Clone)]
pub enum WriterOp {
    /// Append these bytes.
    Append(Vec<u8>),
    /// Start a new segment.
    Rollover,
    /// Make appended bytes durable.
    Sync,
}

/// Strategy for generating record payloads (arbitrary bytes, possibly empty).
pub fn record_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..512)
}

/// Strategy for generating a batch of records.
pub fn record_batch_strategy(
    min_records: usize,
    max_records: usize,
) -> impl Strategy<Value = Vec<Vec<u8>>> {
    prop::collection::vec(record_strategy(), min_records..max_records)
}

/// Strategy for generating writer operations, mostly appends.
pub fn writer_op_strategy() -> impl Strategy<Value = WriterOp> {
    prop_oneof![
        8 => record_strategy().prop_map(WriterOp::Append),
        1 => Just(WriterOp::Rollover),
        1 => Just(WriterOp::Sync),
    ]
}

/// Strategy for generating a sequence of writer operations.
pub fn writer_op_sequence_strategy(
    min_ops: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<WriterOp>> {
    prop::collection::vec(writer_op_strategy(), min_ops..max_ops)
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    ///
    /// Every case touches the file system, so this is what most storage
    /// property tests use.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn records_stay_small(record in record_strategy()) {
            prop_assert!(record.len() < 512);
        }

        #[test]
        fn batches_respect_bounds(batch in record_batch_strategy(2, 5)) {
            prop_assert!((2..5).contains(&batch.len()));
        }

        #[test]
        fn sequences_respect_bounds(ops in writer_op_sequence_strategy(1, 20)) {
            prop_assert!(!ops.is_empty());
            prop_assert!(ops.len() < 20);
        }
    }
}
