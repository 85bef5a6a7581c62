//! JSON compression and a cheap content fingerprint.

use crate::error::CodecError;
use bytes::Bytes;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::io::{Read, Write};

/// Memoized compressions kept by [`Codec`] before the memo is reset.
const MEMO_CAPACITY: usize = 64;

/// Serialize `data` to JSON and DEFLATE it.
pub fn compress_json<T: Serialize + ?Sized>(data: &T) -> Result<Bytes, CodecError> {
    let text = serde_json::to_string(data).map_err(CodecError::Serialize)?;
    deflate(text.as_bytes())
}

/// Inverse of [`compress_json`].
pub fn decompress_json<T: DeserializeOwned>(compressed: &[u8]) -> Result<T, CodecError> {
    let mut text = Vec::new();
    DeflateDecoder::new(compressed)
        .read_to_end(&mut text)
        .map_err(|source| CodecError::Corrupt {
            len: compressed.len(),
            source,
        })?;
    serde_json::from_slice(&text).map_err(CodecError::Deserialize)
}

fn deflate(input: &[u8]) -> Result<Bytes, CodecError> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(input).map_err(CodecError::Compress)?;
    let out = encoder.finish().map_err(CodecError::Compress)?;
    Ok(Bytes::from(out))
}

/// 32-bit rolling hash (`h * 31 + unit` over UTF-16 units), as signed decimal.
///
/// Not collision resistant; only used to key the compression memo.
pub fn hash_string(s: &str) -> String {
    let hash = s
        .encode_utf16()
        .fold(0i32, |h, unit| h.wrapping_shl(5).wrapping_sub(h).wrapping_add(i32::from(unit)));
    hash.to_string()
}

/// Compressor that remembers recent results keyed by content hash.
///
/// The hash only picks the slot. A hit also needs the stored plaintext to
/// equal the input, so colliding texts never share compressed bytes.
#[derive(Debug, Default)]
pub struct Codec {
    memo: HashMap<String, (String, Bytes)>,
}

impl Codec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compress the JSON text of `data`, reusing a memoized result for
    /// identical text.
    pub fn compress<T: Serialize + ?Sized>(&mut self, data: &T) -> Result<Bytes, CodecError> {
        let text = serde_json::to_string(data).map_err(CodecError::Serialize)?;
        self.compress_text(&text)
    }

    pub fn compress_text(&mut self, text: &str) -> Result<Bytes, CodecError> {
        let key = hash_string(text);
        if let Some((seen, bytes)) = self.memo.get(&key) {
            if seen == text {
                return Ok(bytes.clone());
            }
        }

        let bytes = deflate(text.as_bytes())?;
        if self.memo.len() >= MEMO_CAPACITY {
            self.memo.clear();
        }
        self.memo.insert(key, (text.to_string(), bytes.clone()));
        Ok(bytes)
    }

    pub fn decompress<T: DeserializeOwned>(&self, compressed: &[u8]) -> Result<T, CodecError> {
        decompress_json(compressed)
    }

    pub fn memo_len(&self) -> usize {
        self.memo.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};

    #[test]
    fn round_trips_object() {
        let original = json!({"a": 1, "b": "x"});
        let packed = compress_json(&original).unwrap();
        let back: Value = decompress_json(&packed).unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn round_trips_nested_and_unicode() {
        let original = json!({
            "hospitals": [
                {"id": "1", "name": "Hôpital Saint-Louis", "status": "Deployed"},
                {"id": "2", "name": "東京病院", "status": "Signed", "beds": null},
            ],
            "total": 2.5,
        });
        let back: Value = decompress_json(&compress_json(&original).unwrap()).unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn large_repetitive_payload_shrinks() {
        let rows: Vec<_> = (0..200).map(|i| json!({"id": i, "status": "In Progress"})).collect();
        let text = serde_json::to_string(&rows).unwrap();
        let packed = compress_json(&rows).unwrap();
        assert!(packed.len() < text.len() / 3);
    }

    #[test]
    fn corrupt_input_is_an_error() {
        // a final block with the reserved block type
        let err = decompress_json::<Value>(&[0xff, 0xff, 0xff, 0xff]).unwrap_err();
        assert!(matches!(err, CodecError::Corrupt { len: 4, .. }), "{err}");
    }

    #[test]
    fn wrong_type_is_an_error() {
        let packed = compress_json(&json!({"a": 1})).unwrap();
        let err = decompress_json::<Vec<u32>>(&packed).unwrap_err();
        assert!(matches!(err, CodecError::Deserialize(_)));
    }

    #[test]
    fn hash_matches_rolling_formula() {
        assert_eq!(hash_string(""), "0");
        assert_eq!(hash_string("a"), "97");
        assert_eq!(hash_string("ab"), (97 * 31 + 98).to_string());
        // long inputs wrap instead of overflowing
        let long = "hospital".repeat(1000);
        assert_eq!(hash_string(&long), hash_string(&long));
    }

    #[test]
    fn codec_memoizes_by_content() {
        let mut codec = Codec::new();
        let a = codec.compress(&json!({"id": 1})).unwrap();
        let b = codec.compress(&json!({"id": 1})).unwrap();
        assert_eq!(a, b);
        assert_eq!(codec.memo_len(), 1);
        let back: Value = codec.decompress(&a).unwrap();
        assert_eq!(back, json!({"id": 1}));
    }

    #[test]
    fn colliding_texts_get_their_own_bytes() {
        // "Aa" and "BB" hash alike, and so does any shared prefix plus either
        let prefix = "x".repeat(1100);
        let a = format!("{prefix}Aa");
        let b = format!("{prefix}BB");
        assert_eq!(hash_string(&a), hash_string(&b));

        let mut codec = Codec::new();
        let packed_a = codec.compress(&a).unwrap();
        let packed_b = codec.compress(&b).unwrap();
        assert_eq!(codec.decompress::<String>(&packed_a).unwrap(), a);
        assert_eq!(codec.decompress::<String>(&packed_b).unwrap(), b);
    }
}
