//! Binary encoding for keys, values and element records.
//!
//! The disk store never relies on a platform serialization mechanism. Keys and
//! values implement [`Codec`], and an element is framed as a versioned,
//! length-prefixed, checksummed record:
//!
//! ```text
//! +---------------+---------+----------------------------------------+
//! | version       | u8      | RECORD_VERSION                         |
//! | flags         | u8      | bit 0: eternal                         |
//! | creation_time | u64 LE  | ms since epoch                         |
//! | last_access   | u64 LE  | ms since epoch, 0 if never read        |
//! | hit_count     | u64 LE  |                                        |
//! | time_to_live  | u64 LE  | ms, 0 = unlimited                      |
//! | time_to_idle  | u64 LE  | ms, 0 = unlimited                      |
//! | key_len       | u32 LE  |                                        |
//! | key           | key_len |                                        |
//! | value_len     | u32 LE  |                                        |
//! | value         | val_len |                                        |
//! | crc32c        | u32 LE  | over every preceding byte              |
//! +---------------+---------+----------------------------------------+
//! ```
//!
//! Records carry no delimiters inside the data file; the disk index addresses
//! them by `(offset, used_size)`.

use crate::element::{Element, ElementParts};
use crate::error::CodecError;

/// Current element record format version.
pub const RECORD_VERSION: u8 = 1;

const FLAG_ETERNAL: u8 = 0b0000_0001;

/// Conversion of a key or value to and from bytes.
///
/// Implementations must be deterministic: `decode(encode(x)) == x`. An
/// `encode` failure is treated as a transient serialization failure by the
/// disk store and retried before the write is dropped.
///
/// # Examples
///
/// ```
/// use spoolcache::codec::Codec;
///
/// let mut buf = Vec::new();
/// "hello".to_string().encode(&mut buf).unwrap();
/// assert_eq!(String::decode(&buf).unwrap(), "hello");
/// ```
pub trait Codec: Sized {
    /// Appends the encoded form of `self` to `out`.
    fn encode(&self, out: &mut Vec<u8>) -> Result<(), CodecError>;

    /// Decodes a value from exactly `bytes`.
    fn decode(bytes: &[u8]) -> Result<Self, CodecError>;
}

impl Codec for String {
    fn encode(&self, out: &mut Vec<u8>) -> Result<(), CodecError> {
        out.extend_from_slice(self.as_bytes());
        Ok(())
    }

    fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidUtf8)
    }
}

impl Codec for Vec<u8> {
    fn encode(&self, out: &mut Vec<u8>) -> Result<(), CodecError> {
        out.extend_from_slice(self);
        Ok(())
    }

    fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        Ok(bytes.to_vec())
    }
}

macro_rules! impl_codec_for_int {
    ($($ty:ty),*) => {
        $(
            impl Codec for $ty {
                fn encode(&self, out: &mut Vec<u8>) -> Result<(), CodecError> {
                    out.extend_from_slice(&self.to_le_bytes());
                    Ok(())
                }

                fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
                    let raw: [u8; core::mem::size_of::<$ty>()] = bytes.try_into().map_err(|_| {
                        CodecError::Invalid(format!(
                            "expected {} bytes for {}, found {}",
                            core::mem::size_of::<$ty>(),
                            stringify!($ty),
                            bytes.len()
                        ))
                    })?;
                    Ok(<$ty>::from_le_bytes(raw))
                }
            }
        )*
    };
}

impl_codec_for_int!(u8, u16, u32, u64, u128, i8, i16, i32, i64, i128);

// Always eight bytes, so data files move between 32 and 64 bit hosts.
impl Codec for usize {
    fn encode(&self, out: &mut Vec<u8>) -> Result<(), CodecError> {
        (*self as u64).encode(out)
    }

    fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let wide = u64::decode(bytes)?;
        usize::try_from(wide)
            .map_err(|_| CodecError::Invalid(format!("{} does not fit in usize", wide)))
    }
}

/// Sequential little-endian reader over a byte slice.
pub(crate) struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub(crate) fn take(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        if self.remaining() < len {
            return Err(CodecError::Truncated {
                needed: len,
                available: self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let mut raw = [0u8; N];
        raw.copy_from_slice(self.take(N)?);
        Ok(raw)
    }

    pub(crate) fn u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn u16(&mut self) -> Result<u16, CodecError> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    pub(crate) fn u32(&mut self) -> Result<u32, CodecError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    pub(crate) fn u64(&mut self) -> Result<u64, CodecError> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    /// Reads a `u32` length prefix followed by that many bytes.
    pub(crate) fn prefixed(&mut self) -> Result<&'a [u8], CodecError> {
        let len = self.u32()? as usize;
        self.take(len)
    }
}

/// Appends `T`'s encoding preceded by its `u32` length.
pub(crate) fn encode_prefixed<T: Codec>(value: &T, out: &mut Vec<u8>) -> Result<(), CodecError> {
    let len_at = out.len();
    out.extend_from_slice(&[0u8; 4]);
    value.encode(out)?;
    let len = out.len() - len_at - 4;
    let len = u32::try_from(len).map_err(|_| CodecError::TooLarge(len))?;
    out[len_at..len_at + 4].copy_from_slice(&len.to_le_bytes());
    Ok(())
}

/// Splits the trailing crc32c off `bytes` and verifies it.
pub(crate) fn verify_checksum(bytes: &[u8]) -> Result<&[u8], CodecError> {
    if bytes.len() < 4 {
        return Err(CodecError::Truncated {
            needed: 4,
            available: bytes.len(),
        });
    }
    let (body, tail) = bytes.split_at(bytes.len() - 4);
    let mut raw = [0u8; 4];
    raw.copy_from_slice(tail);
    let stored = u32::from_le_bytes(raw);
    let computed = crc32c::crc32c(body);
    if stored != computed {
        return Err(CodecError::ChecksumMismatch { stored, computed });
    }
    Ok(body)
}

/// Appends the crc32c of everything currently in `out`.
pub(crate) fn append_checksum(out: &mut Vec<u8>) {
    let crc = crc32c::crc32c(out);
    out.extend_from_slice(&crc.to_le_bytes());
}

/// Encodes `element` as a complete record into `out`, which is cleared first.
pub fn encode_element<K: Codec, V: Codec>(
    element: &Element<K, V>,
    out: &mut Vec<u8>,
) -> Result<(), CodecError> {
    out.clear();
    let parts = element.parts();
    out.push(RECORD_VERSION);
    out.push(if parts.eternal { FLAG_ETERNAL } else { 0 });
    for field in [
        parts.creation_time,
        parts.last_access_time,
        parts.hit_count,
        parts.time_to_live,
        parts.time_to_idle,
    ] {
        out.extend_from_slice(&field.to_le_bytes());
    }
    encode_prefixed(&element.key, out)?;
    encode_prefixed(&element.value, out)?;
    append_checksum(out);
    Ok(())
}

/// Decodes a record produced by [`encode_element`].
pub fn decode_element<K: Codec, V: Codec>(bytes: &[u8]) -> Result<Element<K, V>, CodecError> {
    let body = verify_checksum(bytes)?;
    let mut reader = ByteReader::new(body);

    let version = reader.u8()?;
    if version != RECORD_VERSION {
        return Err(CodecError::UnsupportedVersion(version));
    }
    let flags = reader.u8()?;
    let parts = ElementParts {
        creation_time: reader.u64()?,
        last_access_time: reader.u64()?,
        hit_count: reader.u64()?,
        eternal: flags & FLAG_ETERNAL != 0,
        time_to_live: reader.u64()?,
        time_to_idle: reader.u64()?,
    };
    let key = K::decode(reader.prefixed()?)?;
    let value = V::decode(reader.prefixed()?)?;
    if reader.remaining() != 0 {
        return Err(CodecError::Invalid(format!(
            "{} trailing bytes after element record",
            reader.remaining()
        )));
    }
    Ok(Element::from_parts(key, value, parts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    // version, flags, five u64 fields, two length prefixes, crc32c
    const RECORD_OVERHEAD: usize = 1 + 1 + 8 * 5 + 4 + 4 + 4;

    #[test]
    fn test_element_record_preserves_bookkeeping() {
        let mut element = Element::new("user:1".to_string(), vec![7u8; 32])
            .with_time_to_live(Duration::from_secs(5))
            .with_time_to_idle(Duration::from_secs(2));
        element.update_access_statistics();

        let mut buf = Vec::new();
        encode_element(&element, &mut buf).unwrap();
        assert_eq!(buf.len(), RECORD_OVERHEAD + "user:1".len() + 32);

        let decoded: Element<String, Vec<u8>> = decode_element(&buf).unwrap();
        assert_eq!(decoded, element);
        assert_eq!(decoded.hit_count(), 1);
        assert_eq!(decoded.creation_time(), element.creation_time());
        assert_eq!(decoded.last_access_time(), element.last_access_time());
        assert_eq!(decoded.expiration_time(), element.expiration_time());
    }

    #[test]
    fn test_eternal_flag_survives_encoding() {
        let element = Element::new(1u64, 2u64).with_eternal(true);
        let mut buf = Vec::new();
        encode_element(&element, &mut buf).unwrap();
        let decoded: Element<u64, u64> = decode_element(&buf).unwrap();
        assert!(decoded.is_eternal());
    }

    #[test]
    fn test_corrupted_record_is_rejected() {
        let element = Element::new("k".to_string(), "v".to_string());
        let mut buf = Vec::new();
        encode_element(&element, &mut buf).unwrap();
        buf[12] ^= 0xFF;
        let err = decode_element::<String, String>(&buf).unwrap_err();
        assert!(matches!(err, CodecError::ChecksumMismatch { .. }));
    }

    #[test]
    fn test_unknown_version_is_rejected() {
        let element = Element::new("k".to_string(), "v".to_string());
        let mut buf = Vec::new();
        encode_element(&element, &mut buf).unwrap();
        buf[0] = 99;
        buf.truncate(buf.len() - 4);
        append_checksum(&mut buf);
        let err = decode_element::<String, String>(&buf).unwrap_err();
        assert_eq!(err, CodecError::UnsupportedVersion(99));
    }

    #[test]
    fn test_truncated_record_is_rejected() {
        let err = decode_element::<String, String>(&[1, 2]).unwrap_err();
        assert!(matches!(err, CodecError::Truncated { .. }));
    }

    #[test]
    fn test_integer_codec_checks_width() {
        let mut buf = Vec::new();
        0xDEAD_BEEFu32.encode(&mut buf).unwrap();
        assert_eq!(u32::decode(&buf).unwrap(), 0xDEAD_BEEF);
        assert!(u64::decode(&buf).is_err());
    }

    #[test]
    fn test_usize_is_encoded_as_eight_bytes() {
        let mut buf = Vec::new();
        42usize.encode(&mut buf).unwrap();
        assert_eq!(buf.len(), 8);
        assert_eq!(usize::decode(&buf).unwrap(), 42);
    }

    #[test]
    fn test_string_codec_rejects_invalid_utf8() {
        assert_eq!(String::decode(&[0xFF, 0xFE]), Err(CodecError::InvalidUtf8));
    }
}
