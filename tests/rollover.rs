//! Data-block rollover: padding entries, the tailer's padding transition,
//! forced rolls, and the slot monotonicity the cumulative encoding keeps.

use chronolog::{Store, StoreConfig};
use tempfile::tempdir;

fn config() -> StoreConfig {
    StoreConfig {
        data_block_size: 4096,
        index_block_size: 4096,
        cache_line_size: 64,
        message_capacity: 1024,
        synchronous_mode: false,
    }
}

fn read_i32_at(bytes: &[u8], offset: usize) -> i32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[offset..offset + 4]);
    i32::from_ne_bytes(buf)
}

#[test]
fn record_that_does_not_fit_rolls_the_data_block() {
    let dir = tempdir().unwrap();
    let store = Store::open(dir.path().join("q"), config()).unwrap();

    let mut appender = store.appender().unwrap();
    appender.start_excerpt(3000).unwrap();
    appender.write(&[0xAA; 3000]);
    appender.finish().unwrap();

    let mut tailer = store.tailer().unwrap();
    assert!(tailer.next_index().unwrap());
    assert_eq!(tailer.bytes(), &[0xAA; 3000][..]);
    assert!(!tailer.was_padding());
    assert!(!tailer.next_index().unwrap());
    assert!(!tailer.was_padding());

    // Reserving 2000 bytes cannot fit in the 1096-byte tail: the padding
    // entry is committed as part of starting the excerpt.
    appender.start_excerpt(2000).unwrap();
    assert!(!tailer.next_index().unwrap());
    assert!(tailer.was_padding());

    appender.write(&[0xBB; 2000]);
    appender.finish().unwrap();

    assert!(tailer.next_index().unwrap());
    assert_eq!(tailer.bytes(), &[0xBB; 2000][..]);
    assert!(!tailer.was_padding());
    assert_eq!(tailer.seq(), 2);

    // Padding counts: sequence 1 is the padding entry.
    assert_eq!(store.last_written_index(), 2);

    let mut excerpt = store.excerpt().unwrap();
    assert!(excerpt.index(0).unwrap());
    assert_eq!(excerpt.len(), 3000);
    assert!(!excerpt.index(1).unwrap());
    assert!(excerpt.was_padding());
    assert!(excerpt.index(2).unwrap());
    assert_eq!(excerpt.bytes(), &[0xBB; 2000][..]);

    drop(appender);
    drop(tailer);
    drop(excerpt);
    store.close().unwrap();

    // Slots are cumulative ends from the line base: 3000 for the record,
    // -(block end) for the padding, 6096 for the record after the roll.
    let index = std::fs::read(dir.path().join("q.index")).unwrap();
    assert_eq!(read_i32_at(&index, 8), 3000);
    assert_eq!(read_i32_at(&index, 12), -4096);
    assert_eq!(read_i32_at(&index, 16), 6096);

    // The second record starts at the second data block.
    let data = std::fs::read(dir.path().join("q.data")).unwrap();
    assert_eq!(data[4095], 0);
    assert_eq!(&data[4096..4106], &[0xBB; 10][..]);
}

#[test]
fn add_padded_entry_forces_a_roll() {
    let dir = tempdir().unwrap();
    let store = Store::open(dir.path().join("q"), config()).unwrap();

    let mut appender = store.appender().unwrap();
    appender.start_excerpt(10).unwrap();
    appender.write(&[1u8; 10]);
    appender.finish().unwrap();

    appender.add_padded_entry().unwrap();
    assert_eq!(store.last_written_index(), 1);

    appender.start_excerpt(10).unwrap();
    appender.write(&[2u8; 10]);
    appender.finish().unwrap();
    assert_eq!(store.last_written_index(), 2);

    let mut tailer = store.tailer().unwrap();
    assert!(tailer.next_index().unwrap());
    assert_eq!(tailer.bytes(), &[1u8; 10][..]);
    assert!(tailer.next_index().unwrap());
    assert_eq!(tailer.bytes(), &[2u8; 10][..]);
    assert_eq!(tailer.seq(), 2);

    drop(appender);
    drop(tailer);
    store.close().unwrap();

    let data = std::fs::read(dir.path().join("q.data")).unwrap();
    assert_eq!(&data[4096..4106], &[2u8; 10][..]);
}

#[test]
fn exactly_filled_block_still_emits_a_padding_entry() {
    let dir = tempdir().unwrap();
    let store = Store::open(dir.path().join("q"), config()).unwrap();

    // Four 1024-byte records fill block 0 exactly.
    let mut appender = store.appender().unwrap();
    for i in 0..4u8 {
        appender.start_excerpt(1024).unwrap();
        appender.write(&[i; 1024]);
        appender.finish().unwrap();
    }
    assert_eq!(store.last_written_index(), 3);

    // The next record cannot fit in the zero-byte tail; the roll consumes
    // one sequence number for a zero-length padding entry.
    appender.start_excerpt(1024).unwrap();
    appender.write(&[9u8; 1024]);
    appender.finish().unwrap();

    assert_eq!(store.last_written_index(), 5);

    let mut tailer = store.tailer().unwrap();
    let mut payloads = 0;
    while tailer.next_index().unwrap() {
        payloads += 1;
    }
    assert_eq!(payloads, 5);
    assert_eq!(tailer.seq(), 5);
}

#[test]
fn slot_magnitudes_increase_within_every_line() {
    let dir = tempdir().unwrap();
    let store = Store::open(dir.path().join("q"), config()).unwrap();

    let mut appender = store.appender().unwrap();
    // Uneven sizes force several rollovers at uneven points.
    for i in 0..40u64 {
        let len = 300 + (i % 7) * 111;
        appender.start_excerpt(len).unwrap();
        appender.write(&vec![i as u8; len as usize]);
        appender.finish().unwrap();
    }
    drop(appender);
    store.close().unwrap();

    let index = std::fs::read(dir.path().join("q.index")).unwrap();
    let mut line_off = 0;
    while line_off + 64 <= index.len() {
        let mut prev = 0i64;
        for slot in 0..14 {
            let value = read_i32_at(&index, line_off + 8 + slot * 4);
            if value == 0 {
                break;
            }
            let magnitude = i64::from(value).abs();
            assert!(
                magnitude > prev,
                "slot {slot} at line offset {line_off}: {magnitude} <= {prev}"
            );
            prev = magnitude;
        }
        line_off += 64;
    }
}

#[test]
fn tailer_crosses_many_blocks() {
    let dir = tempdir().unwrap();
    let store = Store::open(dir.path().join("q"), config()).unwrap();

    let mut appender = store.appender().unwrap();
    let mut expected = Vec::new();
    for i in 0..50u64 {
        let len = 1000 + (i % 5) * 500;
        let payload = vec![(i % 251) as u8; len as usize];
        appender.start_excerpt(len).unwrap();
        appender.write(&payload);
        appender.finish().unwrap();
        expected.push(payload);
    }

    let mut tailer = store.tailer().unwrap();
    let mut seen = Vec::new();
    let mut paddings = 0;
    loop {
        if tailer.next_index().unwrap() {
            seen.push(tailer.bytes().to_vec());
        } else if tailer.was_padding() {
            // A padding transition with the next record unready cannot
            // happen here: everything is already committed.
            paddings += 1;
        } else {
            break;
        }
    }
    assert_eq!(seen, expected);
    assert_eq!(paddings, 0);
    assert_eq!(tailer.seq() + 1, store.size());
}
