use thiserror::Error;

/// Failure to decode a value from the wire format.
///
/// Every variant records the offset of the byte that could not be decoded:
/// the missing byte for `UnexpectedEnd`, the length prefix for
/// `LengthOutOfRange`, the tag for `InvalidTag`, the first byte past the
/// value for `TrailingBytes`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
  #[error("unexpected end of input at byte {offset}")]
  UnexpectedEnd { offset: usize },

  #[error("varint byte {offset} overflows {bits} bits")]
  Overflow { offset: usize, bits: u32 },

  #[error("length {length} at byte {offset} exceeds the {remaining} remaining bytes")]
  LengthOutOfRange {
    offset: usize,
    length: u64,
    remaining: usize,
  },

  #[error("invalid tag {tag} for {type_name} at byte {offset}")]
  InvalidTag {
    offset: usize,
    tag: u32,
    type_name: &'static str,
  },

  #[error("invalid UTF-8 in string at byte {offset}")]
  InvalidUtf8 { offset: usize },

  #[error("{remaining} trailing bytes after value ending at byte {offset}")]
  TrailingBytes { offset: usize, remaining: usize },
}

impl DecodeError {
  /// Byte offset where decoding failed.
  pub fn offset(&self) -> usize {
    match self {
      Self::UnexpectedEnd { offset }
      | Self::Overflow { offset, .. }
      | Self::LengthOutOfRange { offset, .. }
      | Self::InvalidTag { offset, .. }
      | Self::InvalidUtf8 { offset }
      | Self::TrailingBytes { offset, .. } => *offset,
    }
  }
}
