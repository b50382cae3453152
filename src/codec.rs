//! Wire and disk serialization.
//!
//! The format is plain concatenation: fixed-width little-endian
//! primitives, a space-optimized varint for sizes, varint-prefixed
//! strings and containers. Every record the wallet persists and every
//! transaction it hashes goes through this module, so encoding is
//! infallible and decoding never panics on arbitrary bytes.
//!
//! Varint layout: a single tag byte `b`. `b < 0xFD` is the value itself;
//! `0xFD` is followed by a u16, `0xFE` by a u32, `0xFF` by a u64, all
//! little-endian.

use crate::Hash;

/// Errors from decoding.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("input truncated")]
    Truncated,
    #[error("varint-declared size exceeds remaining input")]
    VarintOversize,
}

/// Cursor over a byte slice being decoded.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Reader { buf, pos: 0 }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.remaining() < n {
            return Err(CodecError::Truncated);
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn take_byte(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }
}

/// A value that serializes by appending to a byte buffer.
pub trait Encodable {
    fn encode(&self, out: &mut Vec<u8>);
}

/// A value that deserializes from a [`Reader`].
pub trait Decodable: Sized {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError>;
}

/// Serialize a value to a fresh buffer.
pub fn serialize<T: Encodable + ?Sized>(value: &T) -> Vec<u8> {
    let mut out = Vec::new();
    value.encode(&mut out);
    out
}

/// Deserialize a value from the front of `bytes`. Trailing bytes are
/// permitted; concatenated records read each other's tails.
pub fn deserialize<T: Decodable>(bytes: &[u8]) -> Result<T, CodecError> {
    let mut r = Reader::new(bytes);
    T::decode(&mut r)
}

pub fn write_varint(out: &mut Vec<u8>, value: u64) {
    if value < 0xFD {
        out.push(value as u8);
    } else if value <= 0xFFFF {
        out.push(0xFD);
        out.extend_from_slice(&(value as u16).to_le_bytes());
    } else if value <= 0xFFFF_FFFF {
        out.push(0xFE);
        out.extend_from_slice(&(value as u32).to_le_bytes());
    } else {
        out.push(0xFF);
        out.extend_from_slice(&value.to_le_bytes());
    }
}

pub fn read_varint(r: &mut Reader<'_>) -> Result<u64, CodecError> {
    let tag = r.take_byte()?;
    Ok(match tag {
        0xFD => u16::decode(r)? as u64,
        0xFE => u32::decode(r)? as u64,
        0xFF => u64::decode(r)?,
        b => b as u64,
    })
}

/// Read a varint that declares a size of following input. Fails with
/// [`CodecError::VarintOversize`] when the declared size cannot fit in
/// what is left, which also bounds allocations on hostile input.
fn read_size(r: &mut Reader<'_>) -> Result<usize, CodecError> {
    let size = read_varint(r)?;
    if size > r.remaining() as u64 {
        return Err(CodecError::VarintOversize);
    }
    Ok(size as usize)
}

macro_rules! impl_le_int {
    ($($t:ty),*) => {
        $(
            impl Encodable for $t {
                fn encode(&self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_le_bytes());
                }
            }
            impl Decodable for $t {
                fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
                    let bytes = r.take(std::mem::size_of::<$t>())?;
                    Ok(<$t>::from_le_bytes(bytes.try_into().expect("sized read")))
                }
            }
        )*
    };
}

impl_le_int!(u8, u16, u32, u64, i32, i64);

impl Encodable for bool {
    fn encode(&self, out: &mut Vec<u8>) {
        out.push(*self as u8);
    }
}

impl Decodable for bool {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(r.take_byte()? != 0)
    }
}

impl Encodable for Hash {
    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self);
    }
}

impl Decodable for Hash {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(r.take(32)?.try_into().expect("sized read"))
    }
}

/// Strings are varstr: varint length then raw bytes. Decoding does not
/// validate UTF-8 strictly; invalid bytes are replaced, matching the
/// address-book contract of unvalidated labels.
impl Encodable for String {
    fn encode(&self, out: &mut Vec<u8>) {
        self.as_str().encode(out);
    }
}

impl Encodable for str {
    fn encode(&self, out: &mut Vec<u8>) {
        write_varint(out, self.len() as u64);
        out.extend_from_slice(self.as_bytes());
    }
}

impl Decodable for String {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        let len = read_size(r)?;
        let bytes = r.take(len)?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }
}

/// Containers are a varint count followed by elements back to back.
/// `Vec<u8>` falls out as exactly the varstr layout.
impl<T: Encodable> Encodable for Vec<T> {
    fn encode(&self, out: &mut Vec<u8>) {
        write_varint(out, self.len() as u64);
        for item in self {
            item.encode(out);
        }
    }
}

impl<T: Decodable> Decodable for Vec<T> {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        let len = read_size(r)?;
        let mut items = Vec::with_capacity(len.min(r.remaining()));
        for _ in 0..len {
            items.push(T::decode(r)?);
        }
        Ok(items)
    }
}
