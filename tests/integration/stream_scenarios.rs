//! Tiny-chunk stream scenarios driven through a heap-backed test pool.

use std::sync::Arc;

use chunkstream::{ChunkStream, SpanWriter, Utf16Writer};

use crate::support::TestPool;

#[test]
fn byte_by_byte_write_and_read() {
    let pool = Arc::new(TestPool::new(2));
    let mut stream = ChunkStream::new(pool.clone());

    for b in 0u8..10 {
        stream.write_byte(b).unwrap();
    }
    assert_eq!(stream.len(), 10);
    assert_eq!(pool.lent_chunks(), 5);

    stream.set_position(0).unwrap();
    for b in 0u8..10 {
        assert_eq!(stream.read_byte().unwrap(), Some(b));
    }
    assert_eq!(stream.read_byte().unwrap(), None);

    stream.dispose();
    assert_eq!(pool.lent_chunks(), 0);
}

#[test]
fn sparse_write_past_the_end() {
    let pool = Arc::new(TestPool::new(2));
    let mut stream = ChunkStream::new(pool);

    stream.set_len(4).unwrap();
    stream.set_position(6).unwrap();
    stream.write(&[99, 99]).unwrap();

    assert_eq!(stream.len(), 8);
    assert_eq!(stream.to_vec().unwrap(), [0, 0, 0, 0, 0, 0, 99, 99]);
}

#[test]
fn set_len_variants_on_five_bytes() {
    let cases: &[(u64, &[u8])] = &[
        (4, &[0, 1, 2, 3]),
        (0, &[]),
        (6, &[0, 1, 2, 3, 4, 0]),
        (10, &[0, 1, 2, 3, 4, 0, 0, 0, 0, 0]),
    ];
    for &(new_len, expected) in cases {
        let pool = Arc::new(TestPool::new(3));
        let mut stream = ChunkStream::new(pool);
        stream.write(&[0, 1, 2, 3, 4]).unwrap();
        stream.set_len(new_len).unwrap();
        assert_eq!(stream.to_vec().unwrap(), expected, "set_len({new_len})");
    }
}

#[test]
fn move_to_from_mid_stream() {
    let pool = Arc::new(TestPool::new(2));
    let mut stream = ChunkStream::new(pool);
    stream.write(&[0, 1, 2, 3, 4, 5]).unwrap();
    stream.set_position(3).unwrap();

    let mut sink = Vec::new();
    stream.move_to(&mut sink).unwrap();
    assert_eq!(sink, [3, 4, 5]);
    assert_eq!(stream.len(), 3);
    assert_eq!(stream.to_vec().unwrap(), [0, 1, 2]);
}

#[test]
fn span_writer_round_trip_over_tiny_chunks() {
    let pool = Arc::new(TestPool::new(2));
    let mut stream = ChunkStream::new(pool);

    {
        let mut writer = SpanWriter::new(&mut stream);
        let span = writer.get_span(0).unwrap();
        assert_eq!(span.len(), 2);
        span.copy_from_slice(&[10, 11]);
        writer.advance(2).unwrap();

        let span = writer.get_span(5).unwrap();
        span.copy_from_slice(&[12, 13, 14, 15, 16]);
        writer.advance(5).unwrap();
    }
    assert_eq!(stream.to_vec().unwrap(), [10, 11, 12, 13, 14, 15, 16]);
}

#[test]
fn utf16_text_lands_in_stream_bytes() {
    let pool = Arc::new(TestPool::new(3));
    let mut stream = ChunkStream::new(pool);
    Utf16Writer::new(&mut stream).write_str("ok").unwrap();
    assert_eq!(stream.to_vec().unwrap(), [0x6F, 0x00, 0x6B, 0x00]);
}

#[test]
fn forward_read_drains_tiny_chunks_eagerly() {
    let pool = Arc::new(TestPool::new(2));
    let mut stream = ChunkStream::new(pool.clone());
    stream.write(&[0, 1, 2, 3, 4, 5]).unwrap();
    assert_eq!(pool.lent_chunks(), 3);

    stream.begin_forward_read(0).unwrap();
    let mut buf = [0u8; 2];
    assert_eq!(stream.read(&mut buf).unwrap(), 2);
    assert_eq!(pool.lent_chunks(), 2);
    assert_eq!(stream.read(&mut buf).unwrap(), 2);
    assert_eq!(pool.lent_chunks(), 1);
    assert_eq!(stream.read(&mut buf).unwrap(), 2);
    assert_eq!(pool.lent_chunks(), 0);
    assert_eq!(stream.read(&mut buf).unwrap(), 0);
}
