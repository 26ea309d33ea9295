//! Integration tests for the file storage provider.

use proptest::prelude::*;
use segdir_storage::{
    dir, ErrorKind, FileStorageProvider, SegmentReader, StorageError, StorageProvider,
};
use segdir_testkit::prelude::*;
use std::fs;

#[test]
fn three_records_survive_reopen_as_reader() {
    init_test_logging();
    let storage = TestStorage::new();
    let config = buffered_config();

    let records: Vec<Vec<u8>> = (0..3).map(|i| record(i, 100)).collect();
    {
        let (_reader, mut writer) = storage.open_pair(&config);
        for (i, rec) in records.iter().enumerate() {
            assert_eq!(writer.append(rec).unwrap(), (0, i as u64 * 100));
        }
        writer.close().unwrap();
    }

    let reader = storage.open_reader(&config);
    assert_eq!(reader.read_at(0, 0, 300).unwrap(), records.concat());
    assert_eq!(reader.list_segments().unwrap(), vec![0]);
}

#[test]
fn lock_identifier_does_not_bypass_exclusivity() {
    let storage = TestStorage::new();

    let (_reader, mut first) = storage.open_pair(&buffered_config().lock_id(7));
    let second = FileStorageProvider.open(storage.path(), &buffered_config().lock_id(9));

    let err = second.err().expect("second writer must be refused");
    assert!(matches!(err, StorageError::LockHeld { .. }));
    assert_eq!(err.kind(), ErrorKind::Contention);

    first.close().unwrap();
    let (_reader, mut reopened) = storage.open_pair(&buffered_config().lock_id(9));
    assert_eq!(reopened.lock_id(), Some(9));
    reopened.close().unwrap();
}

#[test]
fn failed_open_leaves_lock_with_first_writer() {
    let storage = TestStorage::new();
    let (reader, mut writer) = storage.open_pair(&buffered_config());

    assert!(FileStorageProvider
        .open(storage.path(), &buffered_config())
        .is_err());

    // The refused open must not disturb the live pair.
    let (segment, offset) = writer.append(b"still mine").unwrap();
    assert_eq!(reader.read_at(segment, offset, 10).unwrap(), b"still mine");
}

#[test]
fn regular_file_location_is_rejected_untouched() {
    let storage = TestStorage::new();
    fs::write(storage.path(), b"not a directory").unwrap();

    let err = FileStorageProvider
        .open(storage.path(), &StorageConfig::default())
        .err()
        .expect("file location must be rejected");
    assert!(matches!(err, StorageError::InvalidLocation { .. }));
    assert_eq!(err.kind(), ErrorKind::Location);
    assert_eq!(fs::read(storage.path()).unwrap(), b"not a directory");
}

#[test]
fn ensure_twice_is_noop() {
    let storage = TestStorage::new();
    let first = dir::ensure(storage.path()).unwrap();
    let second = dir::ensure(storage.path()).unwrap();
    assert_eq!(first, second);
    assert_eq!(fs::read_dir(storage.path()).unwrap().count(), 0);
}

#[test]
fn extra_readers_coexist_with_writer() {
    let storage = TestStorage::new();
    let config = buffered_config();
    let (_reader, mut writer) = storage.open_pair(&config);
    let observer = storage.open_reader(&config);

    writer.append(b"abc").unwrap();
    writer.rollover().unwrap();
    writer.append(b"de").unwrap();

    assert_eq!(observer.list_segments().unwrap(), vec![0, 1]);
    assert_eq!(observer.read_at(1, 0, 2).unwrap(), b"de");
}

#[test]
fn mapped_and_buffered_reads_agree() {
    let storage = TestStorage::new();
    let (_reader, mut writer) = storage.open_pair(&buffered_config());

    let mut positions = Vec::new();
    for i in 0..50 {
        let rec = record(i, 37 + i as usize * 13);
        let (segment, offset) = writer.append(&rec).unwrap();
        positions.push((segment, offset, rec.len()));
        if i % 20 == 19 {
            writer.rollover().unwrap();
        }
    }
    writer.sync().unwrap();

    let location = dir::ensure(storage.path()).unwrap();
    let mapped = SegmentReader::open(location.clone(), mapped_config().cache_policy());
    let buffered = SegmentReader::open(location, buffered_config().cache_policy());

    for (segment, offset, len) in positions {
        assert_eq!(
            mapped.read_at(segment, offset, len).unwrap(),
            buffered.read_at(segment, offset, len).unwrap()
        );
    }
    assert_eq!(buffered.cache_stats().mapped_reads(), 0);
}

#[test]
fn published_segments_are_complete() {
    let storage = TestStorage::new();
    let result = stress_readers_during_appends(
        &storage,
        &buffered_config(),
        &StressConfig {
            records: 500,
            rollover_every: 25,
            ..StressConfig::default()
        },
    );
    assert_eq!(result.failed_ops, 0);
}

#[test]
fn dropped_writer_releases_lock() {
    let storage = TestStorage::new();
    {
        let (_reader, mut writer) = storage.open_pair(&buffered_config());
        writer.append(b"unsynced").unwrap();
    }

    let (reader, mut writer) = storage.open_pair(&buffered_config());
    assert_eq!(reader.read_at(0, 0, 8).unwrap(), b"unsynced");
    assert_eq!(writer.append(b"!").unwrap(), (0, 8));
}

#[test]
fn size_triggered_rollover_from_config() {
    let storage = TestStorage::new();
    let config = buffered_config().max_segment_size(250);
    let (reader, mut writer) = storage.open_pair(&config);

    for i in 0..5 {
        writer.append(&record(i, 100)).unwrap();
    }

    assert_eq!(reader.list_segments().unwrap(), vec![0, 1, 2]);
    assert_eq!(reader.segment_len(0).unwrap(), Some(200));
    assert_eq!(reader.segment_len(2).unwrap(), Some(100));
}

proptest! {
    #![proptest_config(PropTestConfig::quick().to_proptest_config())]

    #[test]
    fn appended_bytes_read_back(ops in writer_op_sequence_strategy(1, 40)) {
        let storage = TestStorage::new();
        let (reader, mut writer) = storage.open_pair(&mapped_config());

        let mut written = Vec::new();
        for op in ops {
            match op {
                WriterOp::Append(bytes) => {
                    let (segment, offset) = writer.append(&bytes).unwrap();
                    written.push((segment, offset, bytes));
                }
                WriterOp::Rollover => {
                    writer.rollover().unwrap();
                }
                WriterOp::Sync => writer.sync().unwrap(),
            }
        }

        for (segment, offset, bytes) in &written {
            prop_assert_eq!(&reader.read_at(*segment, *offset, bytes.len()).unwrap(), bytes);
        }

        let listed = reader.list_segments().unwrap();
        prop_assert!(listed.windows(2).all(|w| w[0] < w[1]));
        writer.close().unwrap();
    }

    #[test]
    fn reads_past_end_are_out_of_range(batch in record_batch_strategy(1, 8), extra in 1usize..64) {
        let storage = TestStorage::new();
        let (reader, mut writer) = storage.open_pair(&buffered_config());

        let mut total = 0u64;
        for rec in &batch {
            writer.append(rec).unwrap();
            total += rec.len() as u64;
        }

        let result = reader.read_at(0, total, extra);
        prop_assert!(matches!(result, Err(StorageError::OutOfRange { .. })), "expected OutOfRange");
    }
}
