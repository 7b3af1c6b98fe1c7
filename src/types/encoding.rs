//! Binary encoding and decoding traits for deterministic serialization.
//!
//! This module provides the serialization infrastructure for every record
//! the chain persists or hashes. All encoded integers use big-endian byte
//! order so that encoded keys and values sort in numeric order inside the
//! byte-keyed store.
//!
//! # Binary Format
//!
//! - Integers: big-endian, fixed-width
//! - `usize`: encoded as `u64` for portability
//! - `bool`: single byte (0 = false, 1 = true)
//! - `U256`: 32 bytes, big-endian
//! - `Vec<T>`/`String`: 8-byte length prefix followed by elements
//! - `Option<T>`: 1-byte tag (0 = None, 1 = Some) followed by the value
//! - Arrays `[T; N]`: elements serialized sequentially without a prefix
//! - Enums: 1-byte discriminant followed by the variant fields

use chaincore_derive::Error;
use primitive_types::U256;

/// Sink for writing encoded bytes.
///
/// Implemented by byte buffers and hashers so encodable types can be hashed
/// directly without intermediate allocations.
pub trait EncodeSink {
    /// Writes the given bytes to the sink.
    fn write(&mut self, bytes: &[u8]);
}

/// Counter for computing encoded size without allocating memory.
///
/// Used by [`Encode::to_bytes`] to pre-allocate exact capacity, and by the
/// length-prefix envelope generated for `#[binary_codec(max_size = ...)]`
/// types.
pub struct SizeCounter {
    len: usize,
}

impl SizeCounter {
    /// Creates a new counter initialized to zero.
    pub fn new() -> Self {
        Self { len: 0 }
    }

    /// Returns the total number of bytes counted.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if nothing has been counted yet.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Default for SizeCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl EncodeSink for SizeCounter {
    fn write(&mut self, bytes: &[u8]) {
        self.len += bytes.len();
    }
}

impl EncodeSink for Vec<u8> {
    fn write(&mut self, bytes: &[u8]) {
        self.extend_from_slice(bytes);
    }
}

/// Trait for types that can be serialized to the binary format.
pub trait Encode {
    /// Writes the binary representation to the given sink.
    fn encode<S: EncodeSink>(&self, out: &mut S);

    /// Serializes to a new byte buffer with exact capacity.
    ///
    /// Performs two passes: first to count bytes, then to encode.
    fn to_bytes(&self) -> Vec<u8> {
        let mut counter = SizeCounter::new();
        self.encode(&mut counter);

        let mut out = Vec::with_capacity(counter.len());
        self.encode(&mut out);
        out
    }
}

/// Errors that can occur during decoding.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// Input ended before expected data was read.
    #[error("unexpected end of input")]
    UnexpectedEof,
    /// Data does not represent a valid value for the target type.
    #[error("invalid value for target type")]
    InvalidValue,
    /// Length prefix exceeds the maximum allowed size for the type.
    #[error("length prefix exceeds maximum size of {type_name}")]
    LengthOverflow { type_name: &'static str },
}

/// Trait for types that can be deserialized from the binary format.
pub trait Decode: Sized {
    /// Reads and decodes a value from the input buffer.
    ///
    /// Advances the input slice past the consumed bytes.
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError>;

    /// Decodes a value from a byte slice, requiring all bytes to be consumed.
    ///
    /// Returns `InvalidValue` if trailing bytes remain after decoding.
    fn from_bytes(data: &[u8]) -> Result<Self, DecodeError> {
        let mut input = data;
        let value = Self::decode(&mut input)?;

        if !input.is_empty() {
            return Err(DecodeError::InvalidValue);
        }

        Ok(value)
    }
}

/// Reads exactly `n` bytes from the input, advancing the slice.
fn read_bytes<'a>(input: &mut &'a [u8], n: usize) -> Result<&'a [u8], DecodeError> {
    if input.len() < n {
        return Err(DecodeError::UnexpectedEof);
    }
    let (bytes, rest) = input.split_at(n);
    *input = rest;
    Ok(bytes)
}

impl Encode for u8 {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        out.write(&[*self]);
    }
}

impl Decode for u8 {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let bytes = read_bytes(input, 1)?;
        Ok(bytes[0])
    }
}

// Macro for fixed-size integer types
macro_rules! impl_int {
    ($($t:ty),*) => {
        $(
            impl Encode for $t {
                fn encode<S: EncodeSink>(&self, out: &mut S) {
                    out.write(&self.to_be_bytes());
                }
            }

            impl Decode for $t {
                fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
                    let bytes = read_bytes(input, std::mem::size_of::<$t>())?;
                    Ok(<$t>::from_be_bytes(bytes.try_into().unwrap()))
                }
            }
        )*
    };
}

impl_int!(u16, u32, u64, u128, i16, i32, i64, i128);

// usize as u64
impl Encode for usize {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        (*self as u64).encode(out);
    }
}

impl Decode for usize {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let v = u64::decode(input)?;
        usize::try_from(v).map_err(|_| DecodeError::InvalidValue)
    }
}

// bool
impl Encode for bool {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        out.write(&[*self as u8]);
    }
}

impl Decode for bool {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let b = u8::decode(input)?;
        match b {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(DecodeError::InvalidValue),
        }
    }
}

// U256 as a fixed 32-byte big-endian word
impl Encode for U256 {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        let mut buf = [0u8; 32];
        self.to_big_endian(&mut buf);
        out.write(&buf);
    }
}

impl Decode for U256 {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let bytes = read_bytes(input, 32)?;
        Ok(U256::from_big_endian(bytes))
    }
}

/// Maximum allowed element count for decoded sequences, bounding
/// allocations driven by hostile length prefixes.
const MAX_SEQ_LEN: usize = 1_000_000;

// Vec<T>
impl<T: Encode> Encode for Vec<T> {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        self.len().encode(out);
        for item in self {
            item.encode(out);
        }
    }
}

impl<T: Decode> Decode for Vec<T> {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let len = usize::decode(input)?;
        if len > MAX_SEQ_LEN {
            return Err(DecodeError::InvalidValue);
        }

        let mut vec = Vec::with_capacity(len.min(1024));
        for _ in 0..len {
            vec.push(T::decode(input)?);
        }
        Ok(vec)
    }
}

// String
impl Encode for String {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        self.len().encode(out);
        out.write(self.as_bytes());
    }
}

impl Decode for String {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let bytes = Vec::<u8>::decode(input)?;
        String::from_utf8(bytes).map_err(|_| DecodeError::InvalidValue)
    }
}

// &str (encode only)
impl Encode for &str {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        let bytes = self.as_bytes();
        bytes.len().encode(out);
        out.write(bytes);
    }
}

// Option<T>
impl<T: Encode> Encode for Option<T> {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        match self {
            None => 0u8.encode(out),
            Some(v) => {
                1u8.encode(out);
                v.encode(out);
            }
        }
    }
}

impl<T: Decode> Decode for Option<T> {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let tag = u8::decode(input)?;
        match tag {
            0 => Ok(None),
            1 => Ok(Some(T::decode(input)?)),
            _ => Err(DecodeError::InvalidValue),
        }
    }
}

// Fixed-size arrays [T; N]
impl<T: Encode, const N: usize> Encode for [T; N] {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        for item in self {
            item.encode(out);
        }
    }
}

impl<T: Decode, const N: usize> Decode for [T; N] {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let mut vec = Vec::with_capacity(N);
        for _ in 0..N {
            vec.push(T::decode(input)?);
        }
        vec.try_into().map_err(|_| DecodeError::InvalidValue)
    }
}

// Tuples
impl<A: Encode, B: Encode> Encode for (A, B) {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        self.0.encode(out);
        self.1.encode(out);
    }
}

impl<A: Decode, B: Decode> Decode for (A, B) {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok((A::decode(input)?, B::decode(input)?))
    }
}

impl<A: Encode, B: Encode, C: Encode> Encode for (A, B, C) {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        self.0.encode(out);
        self.1.encode(out);
        self.2.encode(out);
    }
}

impl<A: Decode, B: Decode, C: Decode> Decode for (A, B, C) {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok((A::decode(input)?, B::decode(input)?, C::decode(input)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_counter_accumulates() {
        let mut counter = SizeCounter::new();
        assert_eq!(counter.len(), 0);

        counter.write(&[1, 2, 3]);
        assert_eq!(counter.len(), 3);

        counter.write(&[4, 5]);
        assert_eq!(counter.len(), 5);
    }

    #[test]
    fn to_bytes_preallocates_exact_capacity() {
        let data: Vec<u8> = vec![1, 2, 3, 4, 5];
        let bytes = data.to_bytes();
        // Vec encodes as: 8-byte length + elements
        assert_eq!(bytes.len(), 8 + 5);
        assert_eq!(bytes.capacity(), bytes.len());
    }

    #[test]
    fn integers_are_big_endian() {
        let value: u32 = 0x12345678;
        assert_eq!(value.to_bytes(), vec![0x12, 0x34, 0x56, 0x78]);

        let value: u64 = 1;
        assert_eq!(value.to_bytes(), vec![0, 0, 0, 0, 0, 0, 0, 1]);
    }

    #[test]
    fn integer_roundtrips() {
        for val in [0u64, 1, 0xFF, u64::MAX] {
            assert_eq!(u64::from_bytes(&val.to_bytes()).unwrap(), val);
        }
        for val in [0u128, 42, u128::MAX] {
            assert_eq!(u128::from_bytes(&val.to_bytes()).unwrap(), val);
        }
    }

    #[test]
    fn u256_roundtrip_and_width() {
        for val in [U256::zero(), U256::from(10u64), U256::MAX] {
            let bytes = val.to_bytes();
            assert_eq!(bytes.len(), 32);
            assert_eq!(U256::from_bytes(&bytes).unwrap(), val);
        }
    }

    #[test]
    fn u256_encoding_sorts_numerically() {
        let small = U256::from(5u64).to_bytes();
        let large = U256::from(1u64 << 40).to_bytes();
        assert!(small < large);
    }

    #[test]
    fn bool_rejects_invalid_byte() {
        assert!(!bool::from_bytes(&[0]).unwrap());
        assert!(bool::from_bytes(&[1]).unwrap());
        assert_eq!(bool::from_bytes(&[2]), Err(DecodeError::InvalidValue));
    }

    #[test]
    fn vec_roundtrip() {
        let data: Vec<u32> = vec![1, 2, 3, 0xFFFF_FFFF];
        let decoded = Vec::<u32>::from_bytes(&data.to_bytes()).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn vec_rejects_hostile_length_prefix() {
        // Length prefix claims 2^63 elements with no payload behind it.
        let mut bytes = Vec::new();
        (1u64 << 63).encode(&mut bytes);
        assert!(Vec::<u8>::from_bytes(&bytes).is_err());
    }

    #[test]
    fn option_roundtrip() {
        let none: Option<u64> = None;
        let some: Option<u64> = Some(7);
        assert_eq!(Option::<u64>::from_bytes(&none.to_bytes()).unwrap(), none);
        assert_eq!(Option::<u64>::from_bytes(&some.to_bytes()).unwrap(), some);
    }

    #[test]
    fn string_roundtrip() {
        let s = String::from("chain state");
        assert_eq!(String::from_bytes(&s.to_bytes()).unwrap(), s);
    }

    #[test]
    fn from_bytes_rejects_trailing_data() {
        let mut bytes = 7u32.to_bytes();
        bytes.push(0xAA);
        assert_eq!(u32::from_bytes(&bytes), Err(DecodeError::InvalidValue));
    }

    #[test]
    fn decode_fails_on_truncated_input() {
        let bytes = 0x1122_3344u32.to_bytes();
        assert_eq!(u32::from_bytes(&bytes[..3]), Err(DecodeError::UnexpectedEof));
    }

    #[test]
    fn array_roundtrip_has_no_prefix() {
        let arr = [1u8, 2, 3, 4];
        let bytes = arr.to_bytes();
        assert_eq!(bytes.len(), 4);
        assert_eq!(<[u8; 4]>::from_bytes(&bytes).unwrap(), arr);
    }

    #[test]
    fn tuple_roundtrip() {
        let value = (3u64, 9u32);
        assert_eq!(<(u64, u32)>::from_bytes(&value.to_bytes()).unwrap(), value);

        let value = (1u8, 2u16, 3u32);
        assert_eq!(
            <(u8, u16, u32)>::from_bytes(&value.to_bytes()).unwrap(),
            value
        );
    }
}
