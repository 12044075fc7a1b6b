//! Length-prefixed byte string and UTF-8 string codecs.
//!
//! Format: `[len: u32 big-endian][payload: len bytes]`. Keys order by their
//! payload bytes, which for strings is the same as `str` ordering.

use super::{Codec, KeyCodec};
use crate::error::{Error, Result};
use bytes::BufMut;
use std::cmp::Ordering;

const LEN_PREFIX: usize = 4;

fn payload(buf: &[u8]) -> Result<&[u8]> {
    let prefix = buf
        .get(..LEN_PREFIX)
        .ok_or_else(|| Error::corruption("length prefix truncated"))?;
    let len = u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
    buf.get(LEN_PREFIX..LEN_PREFIX + len).ok_or_else(|| {
        Error::corruption(format!(
            "payload truncated: need {} bytes, have {}",
            len,
            buf.len().saturating_sub(LEN_PREFIX)
        ))
    })
}

fn put_payload<B: BufMut>(data: &[u8], buf: &mut B) -> Result<()> {
    let len = u32::try_from(data.len())
        .map_err(|_| Error::invalid_argument("payload longer than u32::MAX bytes"))?;
    buf.put_u32(len);
    buf.put_slice(data);
    Ok(())
}

/// Length of the shortest prefix of `high` that is strictly greater than `low`.
///
/// Falls back to the whole of `high` when `high <= low`.
fn shortest_separator_len(low: &[u8], high: &[u8]) -> usize {
    let common = low.iter().zip(high).take_while(|(a, b)| a == b).count();
    if common >= high.len() {
        high.len()
    } else {
        common + 1
    }
}

fn byte_compare_payloads(a: &[u8], b: &[u8]) -> Option<Ordering> {
    Some(payload(a).ok()?.cmp(payload(b).ok()?))
}

/// Codec for arbitrary byte strings (`Vec<u8>`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BytesCodec;

impl Codec for BytesCodec {
    type Item = Vec<u8>;

    fn encoded_size(&self, item: &Vec<u8>) -> Result<usize> {
        Ok(LEN_PREFIX + item.len())
    }

    fn encoded_size_at(&self, buf: &[u8]) -> Result<usize> {
        payload(buf).map(|p| LEN_PREFIX + p.len())
    }

    fn encode<B: BufMut>(&self, item: &Vec<u8>, buf: &mut B) -> Result<()> {
        put_payload(item, buf)
    }

    fn decode(&self, buf: &[u8]) -> Result<Vec<u8>> {
        payload(buf).map(<[u8]>::to_vec)
    }
}

impl KeyCodec for BytesCodec {
    fn compare(&self, a: &Vec<u8>, b: &Vec<u8>) -> Ordering {
        a.cmp(b)
    }

    fn byte_compare(&self, a: &[u8], b: &[u8]) -> Option<Ordering> {
        byte_compare_payloads(a, b)
    }

    fn separate(&self, low: &[u8], high: &[u8]) -> Result<Vec<u8>> {
        let (low, high) = (payload(low)?, payload(high)?);
        let len = shortest_separator_len(low, high);
        let mut out = Vec::with_capacity(LEN_PREFIX + len);
        put_payload(&high[..len], &mut out)?;
        Ok(out)
    }
}

/// Codec for UTF-8 strings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StringCodec;

impl Codec for StringCodec {
    type Item = String;

    fn encoded_size(&self, item: &String) -> Result<usize> {
        Ok(LEN_PREFIX + item.len())
    }

    fn encoded_size_at(&self, buf: &[u8]) -> Result<usize> {
        payload(buf).map(|p| LEN_PREFIX + p.len())
    }

    fn encode<B: BufMut>(&self, item: &String, buf: &mut B) -> Result<()> {
        put_payload(item.as_bytes(), buf)
    }

    fn decode(&self, buf: &[u8]) -> Result<String> {
        let bytes = payload(buf)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|e| Error::corruption(format!("invalid UTF-8 key: {}", e)))
    }
}

impl KeyCodec for StringCodec {
    fn compare(&self, a: &String, b: &String) -> Ordering {
        a.cmp(b)
    }

    fn byte_compare(&self, a: &[u8], b: &[u8]) -> Option<Ordering> {
        byte_compare_payloads(a, b)
    }

    fn separate(&self, low: &[u8], high: &[u8]) -> Result<Vec<u8>> {
        let high_str = std::str::from_utf8(payload(high)?)
            .map_err(|e| Error::corruption(format!("invalid UTF-8 key: {}", e)))?;
        let mut len = shortest_separator_len(payload(low)?, high_str.as_bytes());
        // Never cut a multi-byte character in half.
        while !high_str.is_char_boundary(len) {
            len += 1;
        }
        let mut out = Vec::with_capacity(LEN_PREFIX + len);
        put_payload(&high_str.as_bytes()[..len], &mut out)?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enc_str(s: &str) -> Vec<u8> {
        StringCodec.encode_to_vec(&s.to_string()).unwrap()
    }

    #[test]
    fn test_bytes_codec_layout() {
        let encoded = BytesCodec.encode_to_vec(&b"abc".to_vec()).unwrap();
        assert_eq!(encoded, vec![0, 0, 0, 3, b'a', b'b', b'c']);

        let mut with_tail = encoded.clone();
        with_tail.extend_from_slice(b"tail");
        assert_eq!(BytesCodec.encoded_size_at(&with_tail).unwrap(), 7);
        assert_eq!(BytesCodec.decode(&with_tail).unwrap(), b"abc".to_vec());
    }

    #[test]
    fn test_byte_compare_ignores_length_prefix() {
        // "b" is shorter than "aaaa" but must sort after it.
        let a = enc_str("aaaa");
        let b = enc_str("b");
        assert_eq!(StringCodec.byte_compare(&a, &b), Some(Ordering::Less));
        assert_eq!(StringCodec.byte_compare(&b, &b), Some(Ordering::Equal));

        let prefix = enc_str("ab");
        let longer = enc_str("abc");
        assert_eq!(StringCodec.byte_compare(&prefix, &longer), Some(Ordering::Less));
    }

    #[test]
    fn test_string_separator_is_shortest_prefix() {
        let sep = StringCodec.separate(&enc_str("apple"), &enc_str("banana")).unwrap();
        assert_eq!(StringCodec.decode(&sep).unwrap(), "b");

        let sep = StringCodec
            .separate(&enc_str("user:1041"), &enc_str("user:1100"))
            .unwrap();
        assert_eq!(StringCodec.decode(&sep).unwrap(), "user:11");

        // low is a prefix of high
        let sep = StringCodec.separate(&enc_str("ab"), &enc_str("abzz")).unwrap();
        assert_eq!(StringCodec.decode(&sep).unwrap(), "abz");
    }

    #[test]
    fn test_string_separator_keeps_char_boundaries() {
        let low = enc_str("caf");
        let high = enc_str("café");
        let sep = StringCodec.separate(&low, &high).unwrap();
        assert_eq!(StringCodec.decode(&sep).unwrap(), "café");
    }

    #[test]
    fn test_bytes_separator_bounds() {
        let low = BytesCodec.encode_to_vec(&vec![1, 2, 3, 200]).unwrap();
        let high = BytesCodec.encode_to_vec(&vec![1, 2, 4, 0, 0]).unwrap();
        let sep = BytesCodec.separate(&low, &high).unwrap();
        assert_eq!(BytesCodec.decode(&sep).unwrap(), vec![1, 2, 4]);
        assert_eq!(BytesCodec.byte_compare(&low, &sep), Some(Ordering::Less));
        assert_ne!(BytesCodec.byte_compare(&sep, &high), Some(Ordering::Greater));
    }

    #[test]
    fn test_truncated_payload() {
        assert!(matches!(BytesCodec.decode(&[0, 0, 0, 9, 1]), Err(Error::Corruption(_))));
        assert!(BytesCodec.encoded_size_at(&[0, 0]).is_err());
        assert!(StringCodec.decode(&[0, 0, 0, 1, 0xff]).is_err());
    }
}
