//! Key and value codecs.
//!
//! A codec turns a typed value into a byte span and back. The tree never
//! looks inside the bytes itself; it only asks the codec how long an encoded
//! value is, how two encoded keys compare, and which short key separates two
//! blocks.
//!
//! ## Capabilities
//!
//! - [`Codec`]: size, encode, decode. Enough for values.
//! - [`KeyCodec`]: adds ordering, an optional byte-level comparison that
//!   avoids decoding, and an optional shortest-separator rule.
//!
//! Encoded values must be self-delimiting: [`Codec::encoded_size_at`] has to
//! work from the first few bytes of a buffer that may continue with other data.

mod int;
mod serialized;
mod varlen;

pub use self::int::{I32Codec, I64Codec, U32Codec, U64Codec};
pub use self::serialized::BincodeCodec;
pub use self::varlen::{BytesCodec, StringCodec};

use crate::error::Result;
use bytes::BufMut;
use std::cmp::Ordering;

/// Encoding, decoding and sizing of one value type.
pub trait Codec: Clone {
    /// The decoded value type.
    type Item;

    /// Number of bytes `item` occupies once encoded.
    fn encoded_size(&self, item: &Self::Item) -> Result<usize>;

    /// Number of bytes of the encoded value starting at `buf[0]`.
    ///
    /// Must only look at a prefix of `buf`; anything after the value is
    /// unrelated data.
    fn encoded_size_at(&self, buf: &[u8]) -> Result<usize>;

    /// Appends the encoding of `item` to `buf`.
    fn encode<B: BufMut>(&self, item: &Self::Item, buf: &mut B) -> Result<()>;

    /// Decodes the value starting at `buf[0]`.
    fn decode(&self, buf: &[u8]) -> Result<Self::Item>;

    /// The encoded size when every value has the same size.
    fn fixed_size(&self) -> Option<usize> {
        None
    }

    /// Whether every encoded value has the same size.
    fn is_fixed_size(&self) -> bool {
        self.fixed_size().is_some()
    }

    /// Encodes `item` into a fresh buffer.
    fn encode_to_vec(&self, item: &Self::Item) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.encoded_size(item)?);
        self.encode(item, &mut buf)?;
        Ok(buf)
    }
}

/// Ordering capabilities required from key codecs.
pub trait KeyCodec: Codec {
    /// Compares two decoded keys.
    fn compare(&self, a: &Self::Item, b: &Self::Item) -> Ordering;

    /// Compares two encoded keys without decoding them.
    ///
    /// `a` and `b` start at an encoded key and may continue with other data.
    /// Returns `None` when the codec has no byte-level ordering, in which case
    /// callers decode and use [`KeyCodec::compare`].
    fn byte_compare(&self, _a: &[u8], _b: &[u8]) -> Option<Ordering> {
        None
    }

    /// Returns the encoding of the shortest key `s` with `low < s <= high`.
    ///
    /// Both arguments are exact encoded keys and `low < high`. The default
    /// copies `high`.
    fn separate(&self, _low: &[u8], high: &[u8]) -> Result<Vec<u8>> {
        Ok(high.to_vec())
    }

    /// Compares two encoded keys, decoding only when the codec has no
    /// byte-level ordering.
    fn compare_encoded(&self, a: &[u8], b: &[u8]) -> Result<Ordering> {
        match self.byte_compare(a, b) {
            Some(ordering) => Ok(ordering),
            None => Ok(self.compare(&self.decode(a)?, &self.decode(b)?)),
        }
    }
}
