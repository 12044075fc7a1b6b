//! Value codec for any `serde` type, backed by bincode.

use super::Codec;
use crate::error::{Error, Result};
use bytes::BufMut;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::marker::PhantomData;

const LEN_PREFIX: usize = 4;

/// Stores values as `[len: u32 big-endian][bincode bytes]`.
///
/// Bincode output is not order-preserving, so this codec only implements
/// [`Codec`] and is meant for values, not keys.
pub struct BincodeCodec<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> BincodeCodec<T> {
    /// Creates a new codec.
    pub fn new() -> Self {
        Self { _marker: PhantomData }
    }
}

impl<T> Default for BincodeCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for BincodeCodec<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for BincodeCodec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BincodeCodec<{}>", std::any::type_name::<T>())
    }
}

fn body(buf: &[u8]) -> Result<&[u8]> {
    let prefix = buf
        .get(..LEN_PREFIX)
        .ok_or_else(|| Error::corruption("length prefix truncated"))?;
    let len = u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
    buf.get(LEN_PREFIX..LEN_PREFIX + len)
        .ok_or_else(|| Error::corruption("bincode payload truncated"))
}

impl<T: Serialize + DeserializeOwned> Codec for BincodeCodec<T> {
    type Item = T;

    fn encoded_size(&self, item: &T) -> Result<usize> {
        Ok(LEN_PREFIX + bincode::serialized_size(item)? as usize)
    }

    fn encoded_size_at(&self, buf: &[u8]) -> Result<usize> {
        body(buf).map(|b| LEN_PREFIX + b.len())
    }

    fn encode<B: BufMut>(&self, item: &T, buf: &mut B) -> Result<()> {
        let bytes = bincode::serialize(item)?;
        let len = u32::try_from(bytes.len())
            .map_err(|_| Error::invalid_argument("serialized value longer than u32::MAX"))?;
        buf.put_u32(len);
        buf.put_slice(&bytes);
        Ok(())
    }

    fn decode(&self, buf: &[u8]) -> Result<T> {
        Ok(bincode::deserialize(body(buf)?)?)
    }
}
