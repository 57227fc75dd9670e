//! Variable-length integer serialization for the entry stream.
//!
//! Unsigned integers are encoded in 7-bit groups, least significant group
//! first, with the high bit of each byte flagging a continuation. Small
//! values (string lengths, group depths, line numbers) dominate the stream,
//! so most of them fit in a single byte.
//!
//! | Value range       | Encoded bytes |
//! |-------------------|---------------|
//! | 0 – 127           | 1             |
//! | 128 – 16,383      | 2             |
//! | 16,384 – 2,097,151| 3             |
//! | …                 | up to 5 (u32) / 10 (u64) |
//!
//! Decoding is offered both over an advancing byte slice (in-memory parsing)
//! and over an [`std::io::Read`] (streaming parsing); the two accept exactly
//! the same bytes.

/// Variable-length u32 serialization (at most 5 bytes).
pub mod var_u32 {
    use std::io::Read;

    use bytes::{BufMut, BytesMut};

    use crate::serde::DeserializeError;

    /// Maximum encoded size of a u32.
    pub const MAX_BYTES: usize = 5;

    /// Serializes a u32 in 7-bit continuation groups.
    pub fn serialize(value: u32, buf: &mut BytesMut) {
        let mut v = value;
        loop {
            let byte = (v & 0x7F) as u8;
            v >>= 7;
            if v == 0 {
                buf.put_u8(byte);
                return;
            }
            buf.put_u8(byte | 0x80);
        }
    }

    /// Deserializes a var_u32 from a slice, advancing past the consumed bytes.
    ///
    /// # Errors
    ///
    /// Returns an error when the input ends inside a value, when more than 5
    /// bytes carry a continuation bit, or when the decoded value overflows
    /// u32.
    pub fn deserialize(buf: &mut &[u8]) -> Result<u32, DeserializeError> {
        let mut value: u32 = 0;
        for i in 0..MAX_BYTES {
            let Some(&byte) = buf.get(i) else {
                return Err(DeserializeError::incomplete(
                    "unexpected end of input inside var_u32",
                ));
            };
            let group = (byte & 0x7F) as u32;
            value |= group
                .checked_shl(7 * i as u32)
                .filter(|_| i < 4 || byte & 0x7F <= 0x0F)
                .ok_or_else(|| DeserializeError::new("var_u32 value overflows u32"))?;
            if byte & 0x80 == 0 {
                *buf = &buf[i + 1..];
                return Ok(value);
            }
        }
        Err(DeserializeError::new("var_u32 longer than 5 bytes"))
    }

    /// Deserializes a var_u32 from a reader, consuming exactly the encoded
    /// bytes.
    pub fn read_from(reader: &mut impl Read) -> Result<u32, DeserializeError> {
        let mut value: u32 = 0;
        for i in 0..MAX_BYTES {
            let mut byte = [0u8; 1];
            reader.read_exact(&mut byte)?;
            let byte = byte[0];
            let group = (byte & 0x7F) as u32;
            value |= group
                .checked_shl(7 * i as u32)
                .filter(|_| i < 4 || byte & 0x7F <= 0x0F)
                .ok_or_else(|| DeserializeError::new("var_u32 value overflows u32"))?;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(DeserializeError::new("var_u32 longer than 5 bytes"))
    }

}

/// Variable-length u64 serialization (at most 10 bytes).
pub mod var_u64 {
    use std::io::Read;

    use bytes::{BufMut, BytesMut};

    use crate::serde::DeserializeError;

    /// Maximum encoded size of a u64.
    pub const MAX_BYTES: usize = 10;

    /// Serializes a u64 in 7-bit continuation groups.
    pub fn serialize(value: u64, buf: &mut BytesMut) {
        let mut v = value;
        loop {
            let byte = (v & 0x7F) as u8;
            v >>= 7;
            if v == 0 {
                buf.put_u8(byte);
                return;
            }
            buf.put_u8(byte | 0x80);
        }
    }

    /// Deserializes a var_u64 from a slice, advancing past the consumed bytes.
    pub fn deserialize(buf: &mut &[u8]) -> Result<u64, DeserializeError> {
        let mut value: u64 = 0;
        for i in 0..MAX_BYTES {
            let Some(&byte) = buf.get(i) else {
                return Err(DeserializeError::incomplete(
                    "unexpected end of input inside var_u64",
                ));
            };
            let group = (byte & 0x7F) as u64;
            value |= group
                .checked_shl(7 * i as u32)
                .filter(|_| i < 9 || byte & 0x7F <= 0x01)
                .ok_or_else(|| DeserializeError::new("var_u64 value overflows u64"))?;
            if byte & 0x80 == 0 {
                *buf = &buf[i + 1..];
                return Ok(value);
            }
        }
        Err(DeserializeError::new("var_u64 longer than 10 bytes"))
    }

    /// Deserializes a var_u64 from a reader, consuming exactly the encoded
    /// bytes.
    pub fn read_from(reader: &mut impl Read) -> Result<u64, DeserializeError> {
        let mut value: u64 = 0;
        for i in 0..MAX_BYTES {
            let mut byte = [0u8; 1];
            reader.read_exact(&mut byte)?;
            let byte = byte[0];
            let group = (byte & 0x7F) as u64;
            value |= group
                .checked_shl(7 * i as u32)
                .filter(|_| i < 9 || byte & 0x7F <= 0x01)
                .ok_or_else(|| DeserializeError::new("var_u64 value overflows u64"))?;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(DeserializeError::new("var_u64 longer than 10 bytes"))
    }

    #[cfg(test)]
    mod tests {
        use proptest::prelude::*;

        use super::*;

        proptest! {
            #[test]
            fn should_roundtrip_any_value(value: u64) {
                let mut buf = BytesMut::new();
                serialize(value, &mut buf);

                let mut slice = buf.as_ref();
                let decoded = deserialize(&mut slice).unwrap();

                prop_assert_eq!(decoded, value);
                prop_assert!(slice.is_empty());
            }

            #[test]
            fn should_decode_the_same_from_slice_and_reader(value: u64) {
                let mut buf = BytesMut::new();
                serialize(value, &mut buf);

                let from_slice = deserialize(&mut buf.as_ref()).unwrap();
                let from_reader = read_from(&mut buf.as_ref()).unwrap();

                prop_assert_eq!(from_slice, from_reader);
            }
        }

        #[test]
        fn should_encode_boundary_values_correctly() {
            let cases: &[(u64, &[u8])] = &[
                (0, &[0x00]),
                (127, &[0x7F]),
                (128, &[0x80, 0x01]),
                (16_384, &[0x80, 0x80, 0x01]),
                (
                    u64::MAX,
                    &[0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x01],
                ),
            ];

            for &(value, expected) in cases {
                let mut buf = BytesMut::new();
                serialize(value, &mut buf);
                assert_eq!(buf.as_ref(), expected, "encoding mismatch for {value:#x}");
            }
        }

        #[test]
        fn should_fail_deserialize_truncated_value() {
            let data = &[0x80, 0x80];
            let mut slice = &data[..];
            assert!(deserialize(&mut slice).is_err());
        }

        #[test]
        fn should_fail_deserialize_overlong_value() {
            let data = &[0x80; 11];
            let mut slice = &data[..];
            assert!(deserialize(&mut slice).is_err());
        }

        #[test]
        fn should_advance_buffer_past_consumed_bytes() {
            let data = &[0x81, 0x01, 0xBE, 0xEF];
            let mut slice = &data[..];

            let decoded = deserialize(&mut slice).unwrap();

            assert_eq!(decoded, 129);
            assert_eq!(slice, &[0xBE, 0xEF]);
        }
    }
}
