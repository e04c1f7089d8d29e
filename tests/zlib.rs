use embra::prelude::*;

use quickcheck_macros::quickcheck;
use rand::{Rng, SeedableRng};

use std::cell::RefCell;
use std::rc::Rc;

fn byte_channel(name: &str) -> Rc<RefCell<ByteChannel>> {
    Rc::new(RefCell::new(ByteChannel::new(name)))
}

fn read_all(chan: &mut dyn Channel) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = [0u8; 37];
    loop {
        match chan.read(&mut buf).expect("read") {
            ReadOutcome::Data(n) => out.extend_from_slice(&buf[..n]),
            ReadOutcome::WouldBlock | ReadOutcome::Eof => break,
        }
    }
    out
}

fn write_all(chan: &mut dyn Channel, mut data: &[u8]) {
    while !data.is_empty() {
        let n = chan.write(data).expect("write");
        data = &data[n..];
    }
}

/// Compress `data` through a transform stacked on a fresh channel and
/// return the wire bytes.
fn compress_to_bytes(data: &[u8], format: Format, options: TransformOptions) -> Vec<u8> {
    let parent = byte_channel("wire");
    let mut out = push_transform("deflate", parent.clone(), Mode::Compress, format, options)
        .expect("push compress");
    write_all(&mut out, data);
    out.close_write().expect("close write");
    let bytes = parent.borrow_mut().take_all();
    bytes
}

fn decompress_bytes(wire: &[u8], format: Format, options: TransformOptions) -> Vec<u8> {
    let parent = byte_channel("wire");
    parent.borrow_mut().write(wire).expect("seed");
    parent.borrow_mut().close_write().expect("close");
    let mut input = push_transform("inflate", parent, Mode::Decompress, format, options)
        .expect("push decompress");
    read_all(&mut input)
}

#[test]
fn gzip_round_trip_with_header() {
    let payload = b"Hello, World!";
    let header = GzipHeader::from_dict(&Value::string("type binary filename greeting.txt"))
        .expect("header dict");
    let wire = compress_to_bytes(
        payload,
        Format::Gzip,
        TransformOptions {
            header: Some(header),
            ..TransformOptions::default()
        },
    );

    let parent = byte_channel("wire");
    parent.borrow_mut().write(&wire).expect("seed");
    parent.borrow_mut().close_write().expect("close");
    let mut input = push_transform(
        "inflate",
        parent,
        Mode::Decompress,
        Format::Auto,
        TransformOptions::default(),
    )
    .expect("push decompress");

    assert_eq!(read_all(&mut input), payload);

    let dict = input.get_option("-header").expect("-header");
    let text = dict.get_string().to_string();
    assert!(text.contains("type binary"), "header was {text}");
    assert!(text.contains("filename greeting.txt"), "header was {text}");
    assert!(text.contains("size 13"), "header was {text}");
}

#[test]
fn zlib_round_trip_auto_detected() {
    let payload: Vec<u8> = (0..2048u32).map(|i| (i * 31 % 251) as u8).collect();
    let wire = compress_to_bytes(&payload, Format::Zlib, TransformOptions::default());
    assert_eq!(
        decompress_bytes(&wire, Format::Auto, TransformOptions::default()),
        payload
    );
}

#[test]
fn raw_round_trip() {
    let payload = b"raw deflate has no framing at all".repeat(20);
    let wire = compress_to_bytes(&payload, Format::Raw, TransformOptions::default());
    assert_eq!(
        decompress_bytes(&wire, Format::Raw, TransformOptions::default()),
        payload
    );
}

#[test]
fn compression_levels_accepted() {
    let payload = vec![7u8; 4096];
    for level in [0, 1, 9] {
        let wire = compress_to_bytes(
            &payload,
            Format::Zlib,
            TransformOptions {
                level: Some(level),
                ..TransformOptions::default()
            },
        );
        assert_eq!(
            decompress_bytes(&wire, Format::Zlib, TransformOptions::default()),
            payload,
            "level {level}"
        );
    }
}

#[test]
fn dictionary_round_trip_and_need_dict() {
    let dict = b"the quick brown fox jumps over the lazy dog".to_vec();
    let payload = b"the quick brown fox jumps over the lazy dog again and again";
    let wire = compress_to_bytes(
        payload,
        Format::Zlib,
        TransformOptions {
            dictionary: Some(dict.clone()),
            ..TransformOptions::default()
        },
    );

    // Without the dictionary the decoder reports that it needs one.
    let parent = byte_channel("wire");
    parent.borrow_mut().write(&wire).expect("seed");
    parent.borrow_mut().close_write().expect("close");
    let mut bare = push_transform(
        "inflate",
        parent,
        Mode::Decompress,
        Format::Zlib,
        TransformOptions::default(),
    )
    .expect("push");
    let mut buf = [0u8; 64];
    let err = bare.read(&mut buf).expect_err("dictionary required");
    assert!(matches!(err, RuntimeError::CompressNeedDict { .. }));

    // With it, the stream inflates to the original.
    assert_eq!(
        decompress_bytes(
            &wire,
            Format::Zlib,
            TransformOptions {
                dictionary: Some(dict),
                ..TransformOptions::default()
            }
        ),
        payload
    );
}

#[test]
fn gzip_rejects_dictionary() {
    let err = push_transform(
        "deflate",
        byte_channel("wire"),
        Mode::Compress,
        Format::Gzip,
        TransformOptions {
            dictionary: Some(b"dict".to_vec()),
            ..TransformOptions::default()
        },
    )
    .expect_err("gzip has no dictionary slot");
    assert!(matches!(err, RuntimeError::BadArgument(_)));
}

#[test]
fn checksum_option_tracks_uncompressed_data() {
    let parent = byte_channel("wire");
    let mut out = push_transform(
        "deflate",
        parent.clone(),
        Mode::Compress,
        Format::Zlib,
        TransformOptions::default(),
    )
    .expect("push");
    write_all(&mut out, b"abc");
    // RFC 1950 Adler-32 of "abc".
    assert_eq!(
        out.get_option("-checksum").expect("-checksum").get_int().expect("int"),
        0x024D_0127
    );

    let mut gz = push_transform(
        "deflate",
        byte_channel("wire2"),
        Mode::Compress,
        Format::Gzip,
        TransformOptions::default(),
    )
    .expect("push");
    write_all(&mut gz, b"abc");
    // CRC-32 of "abc".
    assert_eq!(
        gz.get_option("-checksum").expect("-checksum").get_int().expect("int"),
        0x3524_41C2
    );
}

#[test]
fn sync_flush_keeps_stream_decodable() {
    let parent = byte_channel("wire");
    let mut out = push_transform(
        "deflate",
        parent.clone(),
        Mode::Compress,
        Format::Zlib,
        TransformOptions::default(),
    )
    .expect("push");
    write_all(&mut out, b"first half ");
    out.set_option("-flush", &Value::string("sync")).expect("sync flush");
    let mid = parent.borrow().len();
    assert!(mid > 0, "sync flush must emit buffered output");
    write_all(&mut out, b"second half");
    out.close_write().expect("finish");

    let wire = parent.borrow_mut().take_all();
    assert_eq!(
        decompress_bytes(&wire, Format::Zlib, TransformOptions::default()),
        b"first half second half"
    );
}

#[test]
fn compressed_prefix_never_corrupts() {
    let payload = b"a body long enough to span several deflate blocks ".repeat(40);
    let wire = compress_to_bytes(&payload, Format::Zlib, TransformOptions::default());

    for cut in [1, 2, wire.len() / 3, wire.len() / 2, wire.len() - 1] {
        let got = decompress_bytes(&wire[..cut], Format::Zlib, TransformOptions::default());
        assert!(
            payload.starts_with(&got),
            "prefix of len {cut} produced non-prefix output"
        );
    }
}

#[test]
fn nonblocking_read_reports_would_block() {
    let parent = byte_channel("wire");
    let mut input = push_transform(
        "inflate",
        parent.clone(),
        Mode::Decompress,
        Format::Zlib,
        TransformOptions::default(),
    )
    .expect("push");
    input.set_blocking(false);

    let mut buf = [0u8; 16];
    assert_eq!(input.read(&mut buf).expect("read"), ReadOutcome::WouldBlock);

    // Once bytes arrive the same call makes progress.
    let wire = compress_to_bytes(b"late data", Format::Zlib, TransformOptions::default());
    parent.borrow_mut().write(&wire).expect("seed");
    parent.borrow_mut().close_write().expect("close");
    assert_eq!(read_all(&mut input), b"late data");
}

#[test]
fn close_read_ungets_trailing_bytes() {
    let payload = b"compressed part";
    let mut wire = compress_to_bytes(payload, Format::Gzip, TransformOptions::default());
    wire.extend_from_slice(b"PLAIN-TRAILER");

    let parent = byte_channel("wire");
    parent.borrow_mut().write(&wire).expect("seed");
    parent.borrow_mut().close_write().expect("close");
    let mut input = push_transform(
        "inflate",
        parent.clone(),
        Mode::Decompress,
        Format::Gzip,
        TransformOptions::default(),
    )
    .expect("push");
    assert_eq!(read_all(&mut input), payload);
    input.close_read().expect("close read");

    // Bytes beyond the compressed stream stay readable on the parent.
    let mut rest = Vec::new();
    let mut buf = [0u8; 32];
    loop {
        match parent.borrow_mut().read(&mut buf).expect("read parent") {
            ReadOutcome::Data(n) => rest.extend_from_slice(&buf[..n]),
            _ => break,
        }
    }
    assert_eq!(rest, b"PLAIN-TRAILER");
}

#[test]
fn read_ahead_limit_is_validated() {
    for bad in [0usize, 65537] {
        let err = push_transform(
            "inflate",
            byte_channel("wire"),
            Mode::Decompress,
            Format::Zlib,
            TransformOptions {
                limit: Some(bad),
                ..TransformOptions::default()
            },
        )
        .expect_err("limit out of range");
        assert!(matches!(err, RuntimeError::IoBadOption(_)));
    }

    let parent = byte_channel("wire");
    let wire = compress_to_bytes(&[9u8; 10000], Format::Zlib, TransformOptions::default());
    parent.borrow_mut().write(&wire).expect("seed");
    parent.borrow_mut().close_write().expect("close");
    let mut input = push_transform(
        "inflate",
        parent,
        Mode::Decompress,
        Format::Zlib,
        TransformOptions {
            limit: Some(1),
            ..TransformOptions::default()
        },
    )
    .expect("push");
    // A one-byte read-ahead still decodes the whole stream.
    assert_eq!(read_all(&mut input), vec![9u8; 10000]);
}

#[test]
fn direction_constraints() {
    let parent = byte_channel("wire");
    parent.borrow_mut().close_write().expect("close write side");
    let err = push_transform(
        "deflate",
        parent.clone(),
        Mode::Compress,
        Format::Zlib,
        TransformOptions::default(),
    )
    .expect_err("compression needs a writable parent");
    assert!(matches!(err, RuntimeError::IoNotWritable(_)));

    parent.borrow_mut().close_read().expect("close read side");
    let err = push_transform(
        "inflate",
        parent,
        Mode::Decompress,
        Format::Zlib,
        TransformOptions::default(),
    )
    .expect_err("decompression needs a readable parent");
    assert!(matches!(err, RuntimeError::IoNotReadable(_)));
}

#[quickcheck]
fn any_payload_round_trips(seed: u64, len: u16) -> bool {
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    let payload: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
    for format in [Format::Raw, Format::Zlib, Format::Gzip] {
        let wire = compress_to_bytes(&payload, format, TransformOptions::default());
        if decompress_bytes(&wire, format, TransformOptions::default()) != payload {
            return false;
        }
    }
    true
}
