use embra::prelude::*;

use std::env;
use std::fs;
use std::path::PathBuf;

/// Build a single-byte table descriptor with the given byte → code point
/// entries on page zero.
fn table_descriptor(entries: &[(u8, u16)], fallback: u16) -> String {
    let mut page = [0u16; 256];
    for (byte, ch) in entries {
        page[*byte as usize] = *ch;
    }
    let mut text = String::from("# generated for tests\nS\n");
    text.push_str(&format!("{fallback:04X} 0 1\n00\n"));
    for row in 0..16 {
        for col in 0..16 {
            text.push_str(&format!("{:04X}", page[row * 16 + col]));
        }
        text.push('\n');
    }
    text
}

fn ascii_entries() -> Vec<(u8, u16)> {
    (0x01..=0x7F).map(|b| (b, b as u16)).collect()
}

#[test]
fn utf8_passes_canonical_bytes() {
    let utf8 = get_encoding("utf-8").expect("utf-8");
    let euro = [0xE2, 0x82, 0xAC];
    let mut dst = [0u8; 16];
    let mut state = ConvState::default();
    let res = utf8.to_canonical(&euro, &mut state, ConvFlags::WHOLE, &mut dst);
    assert_eq!(res.status, ConvStatus::Ok);
    assert_eq!(res.src_read, 3);
    assert_eq!(res.chars, 1);
    assert_eq!(&dst[..res.dst_wrote], &euro);
}

#[test]
fn latin1_rejects_or_substitutes() {
    let latin1 = get_encoding("iso8859-1").expect("latin1");

    let err = latin1
        .encode("\u{20AC}", ConvFlags::STRICT)
        .expect_err("euro is not latin1");
    assert!(matches!(err, RuntimeError::ConvertUnknown(0)));

    let replaced = latin1
        .encode("\u{20AC}", ConvFlags::NO_COMPLAIN)
        .expect("fallback");
    assert_eq!(replaced, b"?");
}

#[test]
fn latin1_round_trip() {
    let latin1 = get_encoding("iso8859-1").expect("latin1");
    let bytes: Vec<u8> = (1..=255u8).collect();
    let s = latin1.decode(&bytes, ConvFlags::empty()).expect("decode");
    assert_eq!(s.chars().count(), 255);
    let back = latin1.encode(&s, ConvFlags::empty()).expect("encode");
    assert_eq!(back, bytes);
}

#[test]
fn modified_utf8_nul_forms() {
    let utf8 = get_encoding("utf-8").expect("utf-8");

    // External two-byte NUL decodes to a real NUL in the canonical form.
    let decoded = utf8
        .decode(&[b'a', 0xC0, 0x80, b'b'], ConvFlags::MODIFIED)
        .expect("decode");
    assert_eq!(decoded, "a\0b");

    // And the canonical NUL re-encodes as the two-byte form.
    let encoded = utf8.encode("a\0b", ConvFlags::MODIFIED).expect("encode");
    assert_eq!(encoded, vec![b'a', 0xC0, 0x80, b'b']);

    // Strict mode treats the overlong form as a syntax error.
    let err = utf8
        .decode(&[0xC0, 0x80], ConvFlags::MODIFIED | ConvFlags::STRICT)
        .expect_err("strict rejects C0 80");
    assert!(matches!(err, RuntimeError::ConvertSyntax(_)));
}

#[test]
fn utf16_both_orders() {
    let cases = vec![
        ("utf-16le", "A\u{20AC}", vec![0x41, 0x00, 0xAC, 0x20]),
        ("utf-16be", "A\u{20AC}", vec![0x00, 0x41, 0x20, 0xAC]),
    ];
    for (name, text, expected) in cases {
        let enc = get_encoding(name).expect(name);
        let bytes = enc.encode(text, ConvFlags::empty()).expect("encode");
        assert_eq!(bytes, expected, "{name}");
        let back = enc.decode(&bytes, ConvFlags::empty()).expect("decode");
        assert_eq!(back, text, "{name}");
    }
}

#[test]
fn utf16_surrogate_pairs() {
    let utf16 = get_encoding("utf-16le").expect("utf-16le");
    let text = "\u{1F600}";
    let bytes = utf16.encode(text, ConvFlags::empty()).expect("encode");
    assert_eq!(bytes, vec![0x3D, 0xD8, 0x00, 0xDE]);
    assert_eq!(utf16.decode(&bytes, ConvFlags::empty()).expect("decode"), text);

    // A lone high surrogate at the window tail is retryable, not an error.
    let mut dst = [0u8; 16];
    let mut state = ConvState::default();
    let res = utf16.to_canonical(&bytes[..2], &mut state, ConvFlags::START, &mut dst);
    assert_eq!(res.status, ConvStatus::MultibyteIncomplete);
    assert_eq!(res.src_read, 0);
}

#[test]
fn ucs2_substitutes_astral_chars() {
    let ucs2 = get_encoding("ucs-2le").expect("ucs-2le");
    let err = ucs2
        .encode("\u{1F600}", ConvFlags::STRICT)
        .expect_err("no astral chars in ucs-2");
    assert!(matches!(err, RuntimeError::ConvertUnknown(_)));
    let replaced = ucs2
        .encode("\u{1F600}", ConvFlags::NO_COMPLAIN)
        .expect("fallback");
    assert_eq!(replaced, vec![0x3F, 0x00]);
}

#[test]
fn utf32_round_trip() {
    let utf32 = get_encoding("utf-32be").expect("utf-32be");
    let text = "a\u{1F600}z";
    let bytes = utf32.encode(text, ConvFlags::empty()).expect("encode");
    assert_eq!(bytes.len(), 12);
    assert_eq!(utf32.decode(&bytes, ConvFlags::empty()).expect("decode"), text);
}

#[test]
fn incremental_conversion_shifts_unread_bytes() {
    let utf8 = get_encoding("utf-8").expect("utf-8");
    let text = "a\u{20AC}b\u{00E9}".as_bytes();

    // Feed one byte at a time, retrying partial tails exactly as the
    // src_read contract prescribes.
    let mut out = Vec::new();
    let mut carry: Vec<u8> = Vec::new();
    let mut state = ConvState::default();
    for (i, &byte) in text.iter().enumerate() {
        carry.push(byte);
        let mut flags = ConvFlags::empty();
        if i == 0 {
            flags |= ConvFlags::START;
        }
        if i == text.len() - 1 {
            flags |= ConvFlags::END;
        }
        let mut dst = [0u8; 8];
        let res = utf8.to_canonical(&carry, &mut state, flags, &mut dst);
        assert_ne!(res.status, ConvStatus::Syntax);
        out.extend_from_slice(&dst[..res.dst_wrote]);
        carry.drain(..res.src_read);
    }
    assert!(carry.is_empty());
    assert_eq!(out, text);
}

#[test]
fn no_space_requests_larger_buffer() {
    let latin1 = get_encoding("iso8859-1").expect("latin1");
    let mut dst = [0u8; 2];
    let mut state = ConvState::default();
    let res = latin1.to_canonical(b"abcdef", &mut state, ConvFlags::WHOLE, &mut dst);
    assert_eq!(res.status, ConvStatus::NoSpace);
    assert_eq!(res.src_read, 2);
    assert_eq!(res.dst_wrote, 2);
    // The whole-buffer helper absorbs the retries.
    assert_eq!(latin1.decode(b"abcdef", ConvFlags::empty()).expect("decode"), "abcdef");
}

#[test]
fn table_descriptor_registration() {
    let mut entries = ascii_entries();
    entries.push((0xE4, 0x03B1)); // alpha
    let enc = register_descriptor("table-alpha", &table_descriptor(&entries, 0x3F))
        .expect("register");

    assert_eq!(enc.decode(&[0x61, 0xE4], ConvFlags::empty()).expect("decode"), "a\u{03B1}");
    assert_eq!(
        enc.encode("a\u{03B1}", ConvFlags::empty()).expect("encode"),
        vec![0x61, 0xE4]
    );

    // Unmapped byte: strict errors, permissive passes it through.
    let err = enc
        .decode(&[0x90], ConvFlags::STRICT)
        .expect_err("unmapped byte");
    assert!(matches!(err, RuntimeError::ConvertSyntax(_)));
    assert_eq!(enc.decode(&[0x90], ConvFlags::empty()).expect("decode"), "\u{90}");

    // Unrepresentable character: fallback substitution.
    assert_eq!(
        enc.encode("\u{4E2D}", ConvFlags::NO_COMPLAIN).expect("encode"),
        b"?"
    );
}

#[test]
fn reverse_override_section() {
    let mut text = table_descriptor(&ascii_entries(), 0x3F);
    // Map U+2019 onto the ASCII apostrophe when encoding.
    text.push_str("R\n0027 2019 0000\n");
    let enc = register_descriptor("table-quote", &text).expect("register");
    assert_eq!(enc.encode("\u{2019}", ConvFlags::empty()).expect("encode"), b"'");
}

#[test]
fn escape_encoding_switches_sub_tables() {
    register_descriptor("esc-ascii", &table_descriptor(&ascii_entries(), 0x3F))
        .expect("register ascii");
    register_descriptor(
        "esc-greek",
        &table_descriptor(&[(0x61, 0x03B1), (0x62, 0x03B2)], 0x3F),
    )
    .expect("register greek");

    let escape_text = "\
# escape set for tests
E
name\ttest-escape
init\t{}
final\t{}
esc-ascii\t\\x1b(B
esc-greek\t\\x1b(G
";
    let enc = register_descriptor("test-escape", escape_text).expect("register escape");

    let encoded = enc.encode("a\u{03B1}a", ConvFlags::empty()).expect("encode");
    assert_eq!(
        encoded,
        vec![0x61, 0x1B, b'(', b'G', 0x61, 0x1B, b'(', b'B', 0x61]
    );

    let decoded = enc.decode(&encoded, ConvFlags::empty()).expect("decode");
    assert_eq!(decoded, "a\u{03B1}a");
}

#[test]
fn escape_state_carries_across_chunks() {
    register_descriptor("esc2-ascii", &table_descriptor(&ascii_entries(), 0x3F))
        .expect("register ascii");
    register_descriptor("esc2-greek", &table_descriptor(&[(0x61, 0x03B1)], 0x3F))
        .expect("register greek");
    let enc = register_descriptor(
        "test-escape-2",
        "E\nname\tx\nesc2-ascii\t\\x1b(B\nesc2-greek\t\\x1b(G\n",
    )
    .expect("register escape");

    let encoded = enc.encode("a\u{03B1}", ConvFlags::empty()).expect("encode");

    // Split right after the escape sequence: the second chunk must decode
    // through the sub-table selected by the first.
    let split = 4;
    let mut state = ConvState::default();
    let mut dst = [0u8; 32];
    let first = enc.to_canonical(&encoded[..split], &mut state, ConvFlags::START, &mut dst);
    assert_eq!(first.status, ConvStatus::Ok);
    let mut dst2 = [0u8; 32];
    let second = enc.to_canonical(&encoded[split..], &mut state, ConvFlags::END, &mut dst2);
    assert_eq!(second.status, ConvStatus::Ok);

    let mut all = dst[..first.dst_wrote].to_vec();
    all.extend_from_slice(&dst2[..second.dst_wrote]);
    assert_eq!(String::from_utf8(all).expect("utf8"), "a\u{03B1}");
}

#[test]
fn descriptors_load_from_search_path() {
    let dir: PathBuf = env::temp_dir().join(format!("embra-enc-{}", std::process::id()));
    fs::create_dir_all(&dir).expect("mkdir");
    fs::write(
        dir.join("disk-test.enc"),
        table_descriptor(&ascii_entries(), 0x3F),
    )
    .expect("write descriptor");

    set_encoding_search_path(vec![dir.clone()]);
    let enc = get_encoding("disk-test").expect("load from disk");
    assert_eq!(enc.decode(b"hi", ConvFlags::empty()).expect("decode"), "hi");
    assert!(encoding_names().iter().any(|n| n == "disk-test"));

    let err = get_encoding("no-such-encoding").expect_err("unknown");
    assert!(matches!(err, RuntimeError::EncodingUnknown(_)));

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn system_encoding_defaults_to_utf8() {
    assert_eq!(system_encoding().name(), "utf-8");
    set_system_encoding("iso8859-1").expect("set system");
    assert_eq!(system_encoding().name(), "iso8859-1");
    set_system_encoding("utf-8").expect("restore");
}

#[test]
fn binary_identity() {
    let identity = get_encoding("identity").expect("identity");
    let data: Vec<u8> = (0..=255).collect();
    let mut dst = vec![0u8; 256];
    let mut state = ConvState::default();
    let res = identity.to_canonical(&data, &mut state, ConvFlags::WHOLE, &mut dst);
    assert_eq!(res.status, ConvStatus::Ok);
    assert_eq!(&dst[..res.dst_wrote], data.as_slice());
}
