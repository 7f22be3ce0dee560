//! Conversion between raw IRC bytes and text in a configurable character set.
//!
//! Every operation falls back to UTF-8 instead of failing: an unknown name, a
//! malformed byte sequence or an unmappable character all produce the UTF-8
//! reading of the same data.
use encoding_rs::Encoding;

/// Names always accepted by [`is_supported`], independent of the label registry
const BUILTIN: &[&str] = &[
    "utf8",
    "utf-8",
    "latin1",
    "iso-8859-1",
    "iso-8859-15",
    "windows-1252",
    "windows-1251",
    "koi8-r",
    "cp1252",
    "cp1251",
];

fn is_utf8(name: &str) -> bool {
    name.eq_ignore_ascii_case("utf8") || name.eq_ignore_ascii_case("utf-8")
}

fn lookup(name: &str) -> Option<&'static Encoding> {
    Encoding::for_label_no_replacement(name.trim().as_bytes())
}

/// Decode `bytes` read from the IRC server
///
/// Names are WHATWG labels, so `latin1` and `iso-8859-1` select windows-1252:
/// byte 0x80 decodes to `€`, not U+0080.
pub fn decode(bytes: &[u8], name: &str) -> String {
    if !is_utf8(name) {
        if let Some(encoding) = lookup(name) {
            let (text, had_errors) = encoding.decode_without_bom_handling(bytes);
            if !had_errors {
                return text.into_owned();
            }
        }
    }
    String::from_utf8_lossy(bytes).into_owned()
}

/// Encode `text` for writing to the IRC server
pub fn encode(text: &str, name: &str) -> Vec<u8> {
    if !is_utf8(name) {
        // encoding_rs encoders for UTF-16 labels emit UTF-8 anyway
        if let Some(encoding) = lookup(name) {
            let (bytes, _, had_errors) = encoding.encode(text);
            if !had_errors {
                return bytes.into_owned();
            }
        }
    }
    text.as_bytes().to_vec()
}

pub fn is_supported(name: &str) -> bool {
    let name = name.trim();
    if name.is_empty() {
        return false;
    }
    BUILTIN.iter().any(|builtin| builtin.eq_ignore_ascii_case(name)) || lookup(name).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utf8_fast_path() {
        assert_eq!(decode("héllo".as_bytes(), "utf8"), "héllo");
        assert_eq!(decode("héllo".as_bytes(), "UTF-8"), "héllo");
        assert_eq!(encode("héllo", "utf-8"), "héllo".as_bytes());
    }

    #[test]
    fn test_latin1_round_trip_all_bytes() {
        let bytes: Vec<u8> = (0u8..=255).collect();
        let text = decode(&bytes, "latin1");
        assert_eq!(encode(&text, "latin1"), bytes);
    }

    #[test]
    fn test_latin1_decodes_high_bytes() {
        assert_eq!(decode(&[0x63, 0x61, 0x66, 0xe9], "latin1"), "café");
        assert_eq!(encode("café", "iso-8859-1"), vec![0x63, 0x61, 0x66, 0xe9]);
    }

    #[test]
    fn test_latin1_label_is_windows_1252() {
        assert_eq!(decode(&[0x80], "latin1"), "\u{20ac}");
        assert_eq!(encode("\u{20ac}", "latin1"), vec![0x80]);
    }

    #[test]
    fn test_unknown_encoding_falls_back_to_utf8() {
        assert_eq!(decode("żółw".as_bytes(), "not-a-real-encoding"), "żółw");
        assert_eq!(encode("żółw", "not-a-real-encoding"), "żółw".as_bytes());
    }

    #[test]
    fn test_unmappable_character_falls_back_to_utf8() {
        // U+4E2D has no windows-1252 representation
        assert_eq!(encode("中", "latin1"), "中".as_bytes());
    }

    #[test]
    fn test_invalid_utf8_is_lossy() {
        assert_eq!(decode(&[0x66, 0xff, 0x6f], "utf8"), "f\u{fffd}o");
    }

    #[test]
    fn test_is_supported() {
        assert!(is_supported("utf8"));
        assert!(is_supported("Latin1"));
        assert!(is_supported("shift_jis"));
        assert!(is_supported("koi8-r"));
        assert!(!is_supported("not-a-real-encoding"));
        assert!(!is_supported(""));
    }
}
