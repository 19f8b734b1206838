use super::{Codec, DecodeError};

/// Append `value` as unsigned LEB128.
pub fn write_varint(mut value: u64, out: &mut Vec<u8>) {
  loop {
    let byte = (value & 0x7f) as u8;
    value >>= 7;
    if value == 0 {
      out.push(byte);
      return;
    }
    out.push(byte | 0x80);
  }
}

/// Read an unsigned LEB128 value that must fit in `bits` bits.
pub fn read_varint(bytes: &[u8], offset: usize, bits: u32) -> Result<(u64, usize), DecodeError> {
  let mut result: u64 = 0;
  let mut shift = 0u32;
  let mut index = offset;
  loop {
    let byte = *bytes
      .get(index)
      .ok_or(DecodeError::UnexpectedEnd { offset: index })?;
    index += 1;
    let chunk = u64::from(byte & 0x7f);
    if shift >= bits || (bits - shift < 7 && chunk >> (bits - shift) != 0) {
      return Err(DecodeError::Overflow {
        offset: index - 1,
        bits,
      });
    }
    result |= chunk << shift;
    if byte & 0x80 == 0 {
      return Ok((result, index));
    }
    shift += 7;
  }
}

fn write_signed(mut value: i64, out: &mut Vec<u8>) {
  loop {
    let byte = (value & 0x7f) as u8;
    value >>= 7;
    let done = (value == 0 && byte & 0x40 == 0) || (value == -1 && byte & 0x40 != 0);
    if done {
      out.push(byte);
      return;
    }
    out.push(byte | 0x80);
  }
}

fn read_signed(bytes: &[u8], offset: usize, bits: u32) -> Result<(i64, usize), DecodeError> {
  let mut result: i64 = 0;
  let mut shift = 0u32;
  let mut index = offset;
  loop {
    let byte = *bytes
      .get(index)
      .ok_or(DecodeError::UnexpectedEnd { offset: index })?;
    index += 1;
    if shift >= 64 {
      return Err(DecodeError::Overflow {
        offset: index - 1,
        bits,
      });
    }
    result |= i64::from(byte & 0x7f) << shift;
    shift += 7;
    if byte & 0x80 == 0 {
      if shift < 64 && byte & 0x40 != 0 {
        result |= -1i64 << shift;
      }
      if bits < 64 {
        let min = -(1i64 << (bits - 1));
        let max = (1i64 << (bits - 1)) - 1;
        if result < min || result > max {
          return Err(DecodeError::Overflow {
            offset: index - 1,
            bits,
          });
        }
      }
      return Ok((result, index));
    }
  }
}

/// Append a sum tag index.
pub fn write_tag(tag: u32, out: &mut Vec<u8>) {
  write_varint(u64::from(tag), out);
}

/// Read a sum tag index.
pub fn read_tag(bytes: &[u8], offset: usize) -> Result<(u32, usize), DecodeError> {
  let (tag, next) = read_varint(bytes, offset, 32)?;
  Ok((tag as u32, next))
}

/// Read a length prefix and check that at least `length * min_item_size`
/// bytes remain after it.
fn read_length(
  bytes: &[u8],
  offset: usize,
  min_item_size: usize,
) -> Result<(usize, usize), DecodeError> {
  let (length, next) = read_varint(bytes, offset, 32)?;
  let remaining = bytes.len().saturating_sub(next);
  if (length as usize).saturating_mul(min_item_size) > remaining {
    return Err(DecodeError::LengthOutOfRange {
      offset,
      length,
      remaining,
    });
  }
  Ok((length as usize, next))
}

/// Read `length`-prefixed raw bytes.
pub fn read_bytes(bytes: &[u8], offset: usize) -> Result<(&[u8], usize), DecodeError> {
  let (length, start) = read_length(bytes, offset, 1)?;
  let end = start + length;
  Ok((&bytes[start..end], end))
}

pub fn write_bytes(value: &[u8], out: &mut Vec<u8>) {
  write_varint(value.len() as u64, out);
  out.extend_from_slice(value);
}

impl Codec for () {
  fn encode(&self, _out: &mut Vec<u8>) {}

  fn decode(_bytes: &[u8], offset: usize) -> Result<(Self, usize), DecodeError> {
    Ok(((), offset))
  }
}

impl Codec for bool {
  fn encode(&self, out: &mut Vec<u8>) {
    out.push(u8::from(*self));
  }

  fn decode(bytes: &[u8], offset: usize) -> Result<(Self, usize), DecodeError> {
    match bytes.get(offset) {
      Some(0) => Ok((false, offset + 1)),
      Some(1) => Ok((true, offset + 1)),
      Some(other) => Err(DecodeError::InvalidTag {
        offset,
        tag: u32::from(*other),
        type_name: "bool",
      }),
      None => Err(DecodeError::UnexpectedEnd { offset }),
    }
  }
}

impl Codec for i32 {
  fn encode(&self, out: &mut Vec<u8>) {
    write_signed(i64::from(*self), out);
  }

  fn decode(bytes: &[u8], offset: usize) -> Result<(Self, usize), DecodeError> {
    let (value, next) = read_signed(bytes, offset, 32)?;
    Ok((value as i32, next))
  }
}

impl Codec for i64 {
  fn encode(&self, out: &mut Vec<u8>) {
    write_signed(*self, out);
  }

  fn decode(bytes: &[u8], offset: usize) -> Result<(Self, usize), DecodeError> {
    read_signed(bytes, offset, 64)
  }
}

impl Codec for String {
  fn encode(&self, out: &mut Vec<u8>) {
    write_bytes(self.as_bytes(), out);
  }

  fn decode(bytes: &[u8], offset: usize) -> Result<(Self, usize), DecodeError> {
    let (raw, next) = read_bytes(bytes, offset)?;
    let start = next - raw.len();
    let text = std::str::from_utf8(raw).map_err(|e| DecodeError::InvalidUtf8 {
      offset: start + e.valid_up_to(),
    })?;
    Ok((text.to_owned(), next))
  }
}

impl<T: Codec> Codec for Vec<T> {
  fn encode(&self, out: &mut Vec<u8>) {
    write_varint(self.len() as u64, out);
    for item in self {
      item.encode(out);
    }
  }

  fn decode(bytes: &[u8], offset: usize) -> Result<(Self, usize), DecodeError> {
    // Zero-sized elements occupy no bytes.
    let min_item_size = if std::mem::size_of::<T>() == 0 { 0 } else { 1 };
    let (length, mut next) = read_length(bytes, offset, min_item_size)?;
    let mut items = Vec::with_capacity(length.min(1024));
    for _ in 0..length {
      let (item, after) = T::decode(bytes, next)?;
      items.push(item);
      next = after;
    }
    Ok((items, next))
  }
}

const PRESENT: u32 = 0;
const ABSENT: u32 = 1;

impl<T: Codec> Codec for Option<T> {
  fn encode(&self, out: &mut Vec<u8>) {
    match self {
      Some(value) => {
        write_tag(PRESENT, out);
        value.encode(out);
      }
      None => write_tag(ABSENT, out),
    }
  }

  fn decode(bytes: &[u8], offset: usize) -> Result<(Self, usize), DecodeError> {
    let (tag, next) = read_tag(bytes, offset)?;
    match tag {
      PRESENT => {
        let (value, next) = T::decode(bytes, next)?;
        Ok((Some(value), next))
      }
      ABSENT => Ok((None, next)),
      tag => Err(DecodeError::InvalidTag {
        offset,
        tag,
        type_name: "Option",
      }),
    }
  }
}
