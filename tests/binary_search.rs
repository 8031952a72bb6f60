//! Binary search over records whose first 8 bytes carry a native-endian
//! sorted key: point lookups, insertion points, and duplicate-run ranges,
//! including probes that land on padding entries.

use std::cmp::Ordering;

use chronolog::{Excerpt, Store, StoreConfig};
use tempfile::tempdir;

fn key_compare(target: i64) -> impl FnMut(&Excerpt<'_>) -> Ordering {
    move |excerpt| excerpt.read_i64_at(0).cmp(&target)
}

/// Keys 1000.. with an 11-record duplicate run of 5000 at indices
/// 4000..=4010, then strictly increasing again.
fn duplicate_run_key(i: i64) -> i64 {
    match i {
        0..=3999 => 1000 + i,
        4000..=4010 => 5000,
        _ => 5001 + (i - 4011),
    }
}

#[test]
fn find_range_over_a_duplicate_run() {
    let dir = tempdir().unwrap();
    // Large data blocks: all records stay in one block, so sequence numbers
    // equal record indices with no padding entries in between.
    let config = StoreConfig {
        data_block_size: 64 * 1024,
        index_block_size: 4096,
        cache_line_size: 64,
        message_capacity: 1024,
        synchronous_mode: false,
    };
    let store = Store::open(dir.path().join("q"), config).unwrap();

    let total = 4100i64;
    let mut appender = store.appender().unwrap();
    for i in 0..total {
        appender.start_excerpt(8).unwrap();
        appender.write_i64(duplicate_run_key(i));
        appender.finish().unwrap();
    }
    drop(appender);

    let mut excerpt = store.excerpt().unwrap();

    assert_eq!(excerpt.find_range(key_compare(5000)).unwrap(), (4000, 4011));

    // A unique key: a one-record range, and find_match lands on it.
    assert_eq!(excerpt.find_range(key_compare(1005)).unwrap(), (5, 6));
    assert_eq!(excerpt.find_match(key_compare(1005)).unwrap(), 5);

    // A match inside the run comes from the run.
    let hit = excerpt.find_match(key_compare(5000)).unwrap();
    assert!((4000..=4010).contains(&hit), "hit {hit} outside the run");

    // Missing keys encode their insertion point.
    assert_eq!(excerpt.find_match(key_compare(999)).unwrap(), !0);
    assert_eq!(excerpt.find_match(key_compare(999_999)).unwrap(), !total);
    let missing = excerpt.find_range(key_compare(999_999)).unwrap();
    assert_eq!(missing, (total, total));
}

#[test]
fn probes_step_back_over_padding_entries() {
    let dir = tempdir().unwrap();
    let config = StoreConfig {
        data_block_size: 4096,
        index_block_size: 4096,
        cache_line_size: 64,
        message_capacity: 1024,
        synchronous_mode: false,
    };
    let store = Store::open(dir.path().join("q"), config).unwrap();

    // 1000 8-byte records; block 0 holds records 0..511, then one padding
    // entry at sequence 512 shifts every later record by one.
    let mut appender = store.appender().unwrap();
    for i in 0..1000i64 {
        appender.start_excerpt(8).unwrap();
        appender.write_i64(2 * i);
        appender.finish().unwrap();
    }
    drop(appender);
    assert_eq!(store.size(), 1001);

    let mut excerpt = store.excerpt().unwrap();
    assert!(!excerpt.index(512).unwrap());
    assert!(excerpt.was_padding());

    // Records before and after the roll are found at their shifted seqs.
    assert_eq!(excerpt.find_match(key_compare(2 * 511)).unwrap(), 511);
    assert_eq!(excerpt.find_match(key_compare(2 * 512)).unwrap(), 513);
    assert_eq!(excerpt.find_match(key_compare(2 * 600)).unwrap(), 601);
    assert_eq!(excerpt.find_range(key_compare(2 * 600)).unwrap(), (601, 602));

    // Odd keys are absent; the complement encodes where they would go.
    let missing = excerpt.find_match(key_compare(1199)).unwrap();
    assert!(missing < 0);
    assert_eq!(excerpt.find_match(key_compare(1201)).unwrap(), 601);
}
