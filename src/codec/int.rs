//! Fixed-width integer codecs.
//!
//! Integers are stored big-endian. Signed integers have their sign bit
//! flipped so that unsigned byte comparison matches numeric order.

use super::{Codec, KeyCodec};
use crate::error::{Error, Result};
use bytes::BufMut;
use std::cmp::Ordering;

macro_rules! int_codec {
    ($(#[$doc:meta])* $name:ident, $int:ty, $bits:ty, $flip:expr) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
        pub struct $name;

        impl $name {
            const SIZE: usize = std::mem::size_of::<$int>();

            fn prefix<'a>(&self, buf: &'a [u8]) -> Result<&'a [u8]> {
                buf.get(..Self::SIZE).ok_or_else(|| {
                    Error::corruption(format!(
                        "{}: need {} bytes, have {}",
                        stringify!($name),
                        Self::SIZE,
                        buf.len()
                    ))
                })
            }
        }

        impl Codec for $name {
            type Item = $int;

            fn encoded_size(&self, _item: &$int) -> Result<usize> {
                Ok(Self::SIZE)
            }

            fn encoded_size_at(&self, buf: &[u8]) -> Result<usize> {
                self.prefix(buf).map(<[u8]>::len)
            }

            fn encode<B: BufMut>(&self, item: &$int, buf: &mut B) -> Result<()> {
                buf.put_slice(&((*item as $bits) ^ $flip).to_be_bytes());
                Ok(())
            }

            fn decode(&self, buf: &[u8]) -> Result<$int> {
                let bytes = self.prefix(buf)?;
                let raw = <$bits>::from_be_bytes(
                    bytes.try_into().map_err(|_| Error::internal("integer width"))?,
                );
                Ok((raw ^ $flip) as $int)
            }

            fn fixed_size(&self) -> Option<usize> {
                Some(Self::SIZE)
            }
        }

        impl KeyCodec for $name {
            fn compare(&self, a: &$int, b: &$int) -> Ordering {
                a.cmp(b)
            }

            fn byte_compare(&self, a: &[u8], b: &[u8]) -> Option<Ordering> {
                Some(a.get(..Self::SIZE)?.cmp(b.get(..Self::SIZE)?))
            }
        }
    };
}

int_codec!(
    /// Codec for `u32` keys and values (4 bytes). Also used for child pointers.
    U32Codec,
    u32,
    u32,
    0u32
);
int_codec!(
    /// Codec for `u64` keys and values (8 bytes).
    U64Codec,
    u64,
    u64,
    0u64
);
int_codec!(
    /// Codec for `i32` keys and values (4 bytes, sign bit flipped).
    I32Codec,
    i32,
    u32,
    1u32 << 31
);
int_codec!(
    /// Codec for `i64` keys and values (8 bytes, sign bit flipped).
    I64Codec,
    i64,
    u64,
    1u64 << 63
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_u32_layout() {
        let encoded = U32Codec.encode_to_vec(&0x0102_0304).unwrap();
        assert_eq!(encoded, vec![1, 2, 3, 4]);
        assert_eq!(U32Codec.decode(&[1, 2, 3, 4, 99]).unwrap(), 0x0102_0304);
        assert_eq!(U32Codec.encoded_size_at(&encoded).unwrap(), 4);
        assert_eq!(U32Codec.fixed_size(), Some(4));
    }

    #[test]
    fn test_signed_byte_order_matches_numeric_order() {
        let values = [i64::MIN, -1_000, -1, 0, 1, 42, i64::MAX];
        for pair in values.windows(2) {
            let a = I64Codec.encode_to_vec(&pair[0]).unwrap();
            let b = I64Codec.encode_to_vec(&pair[1]).unwrap();
            assert_eq!(I64Codec.byte_compare(&a, &b), Some(Ordering::Less));
            assert_eq!(I64Codec.decode(&a).unwrap(), pair[0]);
        }

        let a = I32Codec.encode_to_vec(&-5).unwrap();
        let b = I32Codec.encode_to_vec(&3).unwrap();
        assert_eq!(I32Codec.compare_encoded(&a, &b).unwrap(), Ordering::Less);
    }

    #[test]
    fn test_truncated_input() {
        assert!(matches!(U64Codec.decode(&[0, 1, 2]), Err(Error::Corruption(_))));
        assert!(U64Codec.encoded_size_at(&[0; 7]).is_err());
        assert_eq!(U64Codec.byte_compare(&[0; 3], &[0; 8]), None);
    }
}
