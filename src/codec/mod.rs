//! Compact binary wire format.
//!
//! The layout is fixed and versionless:
//! - sums: unsigned LEB128 tag index, then the payload of that variant
//! - products: member encodings concatenated in declaration order
//! - sequences: unsigned LEB128 length, then that many elements
//! - optionals: tag `0` followed by the payload when present, tag `1` when absent
//!
//! Integers use signed LEB128, strings and binaries are length-prefixed bytes.

mod error;
mod primitive;

pub use error::DecodeError;
pub use primitive::{read_bytes, read_tag, read_varint, write_bytes, write_tag, write_varint};

/// A type with a wire encoding.
///
/// Implementations must satisfy the round-trip law:
/// `T::decode(&v.to_bytes(), 0) == Ok((v, v.to_bytes().len()))`.
pub trait Codec: Sized {
  /// Append the encoding of `self` to `out`.
  fn encode(&self, out: &mut Vec<u8>);

  /// Decode a value starting at `offset`, returning it together with the
  /// offset of the first byte after it.
  fn decode(bytes: &[u8], offset: usize) -> Result<(Self, usize), DecodeError>;

  fn to_bytes(&self) -> Vec<u8> {
    let mut out = Vec::new();
    self.encode(&mut out);
    out
  }

  /// Decode a complete message. Bytes left over after the value are an error.
  fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
    let (value, next) = Self::decode(bytes, 0)?;
    if next != bytes.len() {
      return Err(DecodeError::TrailingBytes {
        offset: next,
        remaining: bytes.len() - next,
      });
    }
    Ok(value)
  }
}

/// Implement [`Codec`] for a struct by encoding its fields in the listed order.
#[macro_export]
macro_rules! product_codec {
  ($ty:ident { $($field:ident),+ $(,)? }) => {
    impl $crate::codec::Codec for $ty {
      fn encode(&self, out: &mut Vec<u8>) {
        $( $crate::codec::Codec::encode(&self.$field, out); )+
      }

      fn decode(
        bytes: &[u8],
        offset: usize,
      ) -> Result<(Self, usize), $crate::codec::DecodeError> {
        let next = offset;
        $( let ($field, next) = $crate::codec::Codec::decode(bytes, next)?; )+
        Ok((Self { $($field),+ }, next))
      }
    }
  };
}
