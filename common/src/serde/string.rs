//! Length-prefixed UTF-8 string serialization.
//!
//! A string is a [`var_u32`](crate::serde::varint::var_u32) byte length
//! followed by that many UTF-8 bytes. Decoders cap the length at
//! [`MAX_BYTE_LEN`] so a corrupt prefix cannot trigger an unbounded
//! allocation.

use std::io::Read;

use bytes::{BufMut, BytesMut};

use crate::serde::DeserializeError;
use crate::serde::varint::var_u32;

/// Upper bound accepted for a single string (16 MiB).
pub const MAX_BYTE_LEN: u32 = 16 * 1024 * 1024;

/// Serializes a string as varint length + UTF-8 bytes.
pub fn serialize(value: &str, buf: &mut BytesMut) {
    var_u32::serialize(value.len() as u32, buf);
    buf.put_slice(value.as_bytes());
}

/// Deserializes a string from a slice, advancing past the consumed bytes.
pub fn deserialize(buf: &mut &[u8]) -> Result<String, DeserializeError> {
    let len = var_u32::deserialize(buf)?;
    if len > MAX_BYTE_LEN {
        return Err(DeserializeError::new(format!(
            "string length {} exceeds the {} byte cap",
            len, MAX_BYTE_LEN
        )));
    }
    let len = len as usize;
    let data: &[u8] = *buf;
    if data.len() < len {
        return Err(DeserializeError::incomplete(format!(
            "unexpected end of input: string needs {} bytes, got {}",
            len,
            data.len()
        )));
    }
    let (bytes, rest) = data.split_at(len);
    let value = std::str::from_utf8(bytes)
        .map_err(|e| DeserializeError::new(format!("invalid UTF-8 in string: {}", e)))?
        .to_string();
    *buf = rest;
    Ok(value)
}

/// Deserializes a string from a reader, consuming exactly the encoded bytes.
pub fn read_from(reader: &mut impl Read) -> Result<String, DeserializeError> {
    let len = var_u32::read_from(reader)?;
    if len > MAX_BYTE_LEN {
        return Err(DeserializeError::new(format!(
            "string length {} exceeds the {} byte cap",
            len, MAX_BYTE_LEN
        )));
    }
    let mut bytes = vec![0u8; len as usize];
    reader.read_exact(&mut bytes)?;
    String::from_utf8(bytes)
        .map_err(|e| DeserializeError::new(format!("invalid UTF-8 in string: {}", e)))
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    proptest! {
        #[test]
        fn should_roundtrip_any_string(value: String) {
            let mut buf = BytesMut::new();
            serialize(&value, &mut buf);

            let mut slice = buf.as_ref();
            let decoded = deserialize(&mut slice).unwrap();

            prop_assert_eq!(decoded, value);
            prop_assert!(slice.is_empty());
        }

        #[test]
        fn should_decode_the_same_from_slice_and_reader(value: String) {
            let mut buf = BytesMut::new();
            serialize(&value, &mut buf);

            let from_slice = deserialize(&mut buf.as_ref()).unwrap();
            let from_reader = read_from(&mut buf.as_ref()).unwrap();

            prop_assert_eq!(from_slice, from_reader);
        }
    }

    #[test]
    fn should_encode_empty_string_as_single_zero_byte() {
        let mut buf = BytesMut::new();
        serialize("", &mut buf);
        assert_eq!(buf.as_ref(), &[0x00]);
    }

    #[test]
    fn should_fail_deserialize_truncated_payload() {
        // Length 5 but only 2 payload bytes
        let data = &[0x05, b'a', b'b'];
        let mut slice = &data[..];
        assert!(deserialize(&mut slice).is_err());
    }

    #[test]
    fn should_fail_deserialize_invalid_utf8() {
        let data = &[0x02, 0xFF, 0xFE];
        let mut slice = &data[..];
        assert!(deserialize(&mut slice).is_err());
    }

    #[test]
    fn should_reject_absurd_length_prefix() {
        // 1 GiB length prefix with no payload
        let mut buf = BytesMut::new();
        var_u32::serialize(1 << 30, &mut buf);
        let mut slice = buf.as_ref();
        assert!(deserialize(&mut slice).is_err());
    }
}
