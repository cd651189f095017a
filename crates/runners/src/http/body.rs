//! Post-processing of response bodies: content decoding, truncation and
//! charset decoding.

use encoding_rs::{Encoding, UTF_8};
use flate2::read::{DeflateDecoder, MultiGzDecoder, ZlibDecoder};
use std::io::{self, Read};

/// Undo the `content-encoding` of a body. Unknown codings pass through.
pub fn decompress(content_encoding: Option<&str>, body: Vec<u8>) -> io::Result<Vec<u8>> {
    let coding = content_encoding
        .map(|coding| coding.trim().to_ascii_lowercase())
        .unwrap_or_default();
    if body.is_empty() {
        return Ok(body);
    }

    let mut out = Vec::new();
    match coding.as_str() {
        "gzip" | "x-gzip" => {
            MultiGzDecoder::new(body.as_slice()).read_to_end(&mut out)?;
        }
        // Servers disagree on whether deflate means zlib-wrapped or raw.
        "deflate" => {
            if ZlibDecoder::new(body.as_slice()).read_to_end(&mut out).is_err() {
                out.clear();
                DeflateDecoder::new(body.as_slice()).read_to_end(&mut out)?;
            }
        }
        "br" => {
            brotli::Decompressor::new(body.as_slice(), 4096).read_to_end(&mut out)?;
        }
        _ => return Ok(body),
    }
    Ok(out)
}

/// Byte budget for a body, or `None` when it is returned whole.
///
/// `max_content_length` is the agent-wide budget in KB, `-1` disables
/// truncation. A per-request `max_content_size` (KB) overrides it. Bodies
/// whose content type starts with an allow-listed MIME are never cut.
pub fn content_budget(
    max_content_size: Option<u64>,
    max_content_length: i64,
    content_type: Option<&str>,
    whitelist_mimes: &[String],
) -> Option<usize> {
    if max_content_length < 0 {
        return None;
    }
    if let Some(content_type) = content_type {
        let content_type = content_type.trim().to_ascii_lowercase();
        if whitelist_mimes
            .iter()
            .any(|mime| content_type.starts_with(&mime.to_ascii_lowercase()))
        {
            return None;
        }
    }

    let kilobytes = max_content_size.unwrap_or(max_content_length as u64);
    Some(usize::try_from(kilobytes.saturating_mul(1024)).unwrap_or(usize::MAX))
}

pub fn truncate(mut body: Vec<u8>, budget: Option<usize>) -> Vec<u8> {
    if let Some(budget) = budget {
        body.truncate(budget);
    }
    body
}

/// `charset` parameter of a content type.
pub fn charset(content_type: &str) -> Option<&str> {
    content_type.split(';').skip(1).find_map(|param| {
        let (name, value) = param.split_once('=')?;
        name.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches('"'))
    })
}

/// Decode with the override label, else the declared charset, else UTF-8.
/// Returns the text and the name of the encoding actually used.
pub fn decode(body: &[u8], override_label: Option<&str>, content_type: Option<&str>) -> (String, String) {
    let encoding = override_label
        .or_else(|| content_type.and_then(charset))
        .and_then(|label| Encoding::for_label(label.trim().as_bytes()))
        .unwrap_or(UTF_8);
    let (text, used, _) = encoding.decode(body);
    (text.into_owned(), used.name().to_ascii_lowercase())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use flate2::write::{GzEncoder, ZlibEncoder};
    use flate2::Compression;
    use proptest::prelude::*;
    use std::io::Write;

    fn mimes() -> Vec<String> {
        vec!["text/".to_string(), "application/json".to_string()]
    }

    #[test]
    fn test_gzip_and_deflate_round_trip() {
        let mut gz = GzEncoder::new(Vec::new(), Compression::default());
        gz.write_all(b"compressed payload").unwrap();
        assert_eq!(decompress(Some("gzip"), gz.finish().unwrap()).unwrap(), b"compressed payload");

        let mut zlib = ZlibEncoder::new(Vec::new(), Compression::default());
        zlib.write_all(b"zlib payload").unwrap();
        assert_eq!(decompress(Some("Deflate"), zlib.finish().unwrap()).unwrap(), b"zlib payload");
    }

    #[test]
    fn test_brotli_body() {
        let mut compressed = Vec::new();
        {
            let mut writer = brotli::CompressorWriter::new(&mut compressed, 4096, 5, 22);
            writer.write_all(b"brotli payload").unwrap();
        }
        assert_eq!(decompress(Some("br"), compressed).unwrap(), b"brotli payload");
    }

    #[test]
    fn test_corrupt_gzip_is_an_error() {
        assert!(decompress(Some("gzip"), b"not gzip".to_vec()).is_err());
    }

    #[test]
    fn test_one_kilobyte_budget_cuts_at_1024_bytes() {
        let budget = content_budget(None, 1, Some("application/octet-stream"), &mimes());
        let body = truncate(vec![b'a'; 1025], budget);
        assert_eq!(body.len(), 1024);
    }

    #[test]
    fn test_allow_listed_prefix_keeps_full_body() {
        let budget = content_budget(None, 1, Some("text/html; charset=utf-8"), &mimes());
        assert_eq!(budget, None);
        assert_eq!(truncate(vec![b'a'; 1025], budget).len(), 1025);
    }

    #[test]
    fn test_disabled_and_overridden_budgets() {
        assert_eq!(content_budget(Some(1), -1, None, &mimes()), None);
        assert_eq!(content_budget(Some(2), 100, None, &mimes()), Some(2048));
        assert_eq!(content_budget(None, 0, None, &mimes()), Some(0));
    }

    #[test]
    fn test_decode_uses_declared_charset() {
        let (text, used) = decode(&[0x63, 0x61, 0x66, 0xe9], None, Some("text/plain; charset=\"ISO-8859-1\""));
        assert_eq!(text, "café");
        assert_eq!(used, "windows-1252");
    }

    #[test]
    fn test_decode_override_wins_and_unknown_falls_back() {
        let (text, used) = decode("é".as_bytes(), Some("utf-8"), Some("text/plain; charset=latin1"));
        assert_eq!(text, "é");
        assert_eq!(used, "utf-8");

        let (_, used) = decode(b"x", Some("no-such-charset"), None);
        assert_eq!(used, "utf-8");
    }

    proptest! {
        #[test]
        fn prop_truncated_body_never_exceeds_budget(len in 0usize..5000, kb in 0u64..4) {
            let budget = content_budget(Some(kb), 100, Some("image/png"), &mimes());
            let body = truncate(vec![0u8; len], budget);
            prop_assert_eq!(body.len(), len.min(kb as usize * 1024));
        }
    }
}
