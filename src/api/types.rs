//! Data model shared with the server.

use std::fmt;

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::codec::{read_tag, write_tag, Codec, DecodeError};
use crate::product_codec;

macro_rules! string_id {
  ($(#[$meta:meta])* $name:ident) => {
    $(#[$meta])*
    #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
    #[serde(transparent)]
    pub struct $name(String);

    impl $name {
      pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
      }

      pub fn as_str(&self) -> &str {
        &self.0
      }
    }

    impl fmt::Display for $name {
      fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
      }
    }

    impl Codec for $name {
      fn encode(&self, out: &mut Vec<u8>) {
        self.0.encode(out);
      }

      fn decode(bytes: &[u8], offset: usize) -> Result<(Self, usize), DecodeError> {
        let (value, next) = String::decode(bytes, offset)?;
        Ok((Self(value), next))
      }
    }
  };
}

string_id!(
  /// Identifier of a project.
  ProjectId
);
string_id!(
  /// Identifier of an account.
  AccountId
);
string_id!(
  /// Identifier of a type part.
  TypePartId
);
string_id!(
  /// Hex-encoded SHA-256 of an image's bytes.
  ImageHash
);

impl ImageHash {
  /// Hash of the given image bytes.
  pub fn of(bytes: &[u8]) -> Self {
    Self(hex::encode(Sha256::digest(bytes)))
  }

  /// Whether `bytes` hash to this value.
  pub fn matches(&self, bytes: &[u8]) -> bool {
    Self::of(bytes).0.eq_ignore_ascii_case(&self.0)
  }
}

/// Credential carried in the request header. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct AccountToken(String);

impl AccountToken {
  pub fn new(value: impl Into<String>) -> Self {
    Self(value.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Debug for AccountToken {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str("AccountToken(..)")
  }
}

impl Codec for AccountToken {
  fn encode(&self, out: &mut Vec<u8>) {
    self.0.encode(out);
  }

  fn decode(bytes: &[u8], offset: usize) -> Result<(Self, usize), DecodeError> {
    let (value, next) = String::decode(bytes, offset)?;
    Ok((Self(value), next))
  }
}

/// Server-supplied time, in milliseconds since the Unix epoch.
///
/// Only used to compare freshness: larger is newer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
  pub const fn from_millis(millis: i64) -> Self {
    Self(millis)
  }

  pub fn now() -> Self {
    Self(Utc::now().timestamp_millis())
  }

  pub const fn as_millis(&self) -> i64 {
    self.0
  }

  pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(self.0).single()
  }

  /// Whether more than `horizon` has passed between this timestamp and `now`.
  pub fn is_older_than(&self, horizon: Duration, now: Timestamp) -> bool {
    now.0.saturating_sub(self.0) > horizon.num_milliseconds()
  }
}

impl fmt::Display for Timestamp {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.to_datetime() {
      Some(dt) => write!(f, "{}", dt.to_rfc3339()),
      None => write!(f, "{}ms", self.0),
    }
  }
}

impl Codec for Timestamp {
  fn encode(&self, out: &mut Vec<u8>) {
    self.0.encode(out);
  }

  fn decode(bytes: &[u8], offset: usize) -> Result<(Self, usize), DecodeError> {
    let (millis, next) = i64::decode(bytes, offset)?;
    Ok((Self(millis), next))
  }
}

/// A value paired with the time the server produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Timestamped<T> {
  pub value: T,
  pub observed_at: Timestamp,
}

impl<T> Timestamped<T> {
  pub fn new(value: T, observed_at: Timestamp) -> Self {
    Self { value, observed_at }
  }

  pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Timestamped<U> {
    Timestamped {
      value: f(self.value),
      observed_at: self.observed_at,
    }
  }
}

impl<T: Codec> Codec for Timestamped<T> {
  fn encode(&self, out: &mut Vec<u8>) {
    self.value.encode(out);
    self.observed_at.encode(out);
  }

  fn decode(bytes: &[u8], offset: usize) -> Result<(Self, usize), DecodeError> {
    let (value, next) = T::decode(bytes, offset)?;
    let (observed_at, next) = Timestamp::decode(bytes, next)?;
    Ok((Self { value, observed_at }, next))
  }
}

/// What is known about one entity at one point in time. `value` is `None`
/// when the server reported that the entity does not exist.
pub type Snapshot<T> = Timestamped<Option<T>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdAndData<I, D> {
  pub id: I,
  pub data: D,
}

impl<I: Codec, D: Codec> Codec for IdAndData<I, D> {
  fn encode(&self, out: &mut Vec<u8>) {
    self.id.encode(out);
    self.data.encode(out);
  }

  fn decode(bytes: &[u8], offset: usize) -> Result<(Self, usize), DecodeError> {
    let (id, next) = I::decode(bytes, offset)?;
    let (data, next) = D::decode(bytes, next)?;
    Ok((Self { id, data }, next))
  }
}

/// Raw bytes, such as an image file.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct Binary(pub Vec<u8>);

impl fmt::Debug for Binary {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "Binary({} bytes)", self.0.len())
  }
}

impl Codec for Binary {
  fn encode(&self, out: &mut Vec<u8>) {
    crate::codec::write_bytes(&self.0, out);
  }

  fn decode(bytes: &[u8], offset: usize) -> Result<(Self, usize), DecodeError> {
    let (raw, next) = crate::codec::read_bytes(bytes, offset)?;
    Ok((Self(raw.to_vec()), next))
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Project {
  pub name: String,
  pub icon_hash: ImageHash,
  pub image_hash: ImageHash,
  pub created_at: Timestamp,
  pub updated_at: Timestamp,
  pub created_by: AccountId,
}

product_codec!(Project {
  name,
  icon_hash,
  image_hash,
  created_at,
  updated_at,
  created_by
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Account {
  pub name: String,
  pub image_hash: ImageHash,
  pub introduction: String,
  pub created_at: Timestamp,
}

product_codec!(Account {
  name,
  image_hash,
  introduction,
  created_at
});

/// A named piece of a type definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypePart {
  pub name: String,
  pub description: String,
  pub project_id: ProjectId,
  pub type_parameter_list: Vec<TypeParameter>,
  pub body: TypePartBody,
}

product_codec!(TypePart {
  name,
  description,
  project_id,
  type_parameter_list,
  body
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeParameter {
  pub name: String,
  pub type_part_id: TypePartId,
}

product_codec!(TypeParameter { name, type_part_id });

/// Reference to a type part applied to type arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Type {
  pub type_part_id: TypePartId,
  pub parameter: Vec<Type>,
}

product_codec!(Type {
  type_part_id,
  parameter
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Member {
  pub name: String,
  pub description: String,
  pub r#type: Type,
}

product_codec!(Member {
  name,
  description,
  r#type
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Pattern {
  pub name: String,
  pub description: String,
  pub parameter: Option<Type>,
}

product_codec!(Pattern {
  name,
  description,
  parameter
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "content")]
pub enum TypePartBody {
  Product(Vec<Member>),
  Sum(Vec<Pattern>),
  Kernel(Kernel),
}

impl Codec for TypePartBody {
  fn encode(&self, out: &mut Vec<u8>) {
    match self {
      Self::Product(members) => {
        write_tag(0, out);
        members.encode(out);
      }
      Self::Sum(patterns) => {
        write_tag(1, out);
        patterns.encode(out);
      }
      Self::Kernel(kernel) => {
        write_tag(2, out);
        kernel.encode(out);
      }
    }
  }

  fn decode(bytes: &[u8], offset: usize) -> Result<(Self, usize), DecodeError> {
    let (tag, next) = read_tag(bytes, offset)?;
    match tag {
      0 => Vec::decode(bytes, next).map(|(members, next)| (Self::Product(members), next)),
      1 => Vec::decode(bytes, next).map(|(patterns, next)| (Self::Sum(patterns), next)),
      2 => Kernel::decode(bytes, next).map(|(kernel, next)| (Self::Kernel(kernel), next)),
      tag => Err(DecodeError::InvalidTag {
        offset,
        tag,
        type_name: "TypePartBody",
      }),
    }
  }
}

/// Built-in types provided by the language rather than defined by users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Kernel {
  Int32,
  String,
  Binary,
  Id,
  Token,
  List,
  Dict,
}

impl Kernel {
  const ALL: [Kernel; 7] = [
    Kernel::Int32,
    Kernel::String,
    Kernel::Binary,
    Kernel::Id,
    Kernel::Token,
    Kernel::List,
    Kernel::Dict,
  ];
}

impl Codec for Kernel {
  fn encode(&self, out: &mut Vec<u8>) {
    write_tag(*self as u32, out);
  }

  fn decode(bytes: &[u8], offset: usize) -> Result<(Self, usize), DecodeError> {
    let (tag, next) = read_tag(bytes, offset)?;
    Kernel::ALL
      .get(tag as usize)
      .map(|kernel| (*kernel, next))
      .ok_or(DecodeError::InvalidTag {
        offset,
        tag,
        type_name: "Kernel",
      })
  }
}

/// Identity provider used for logging in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OpenIdConnectProvider {
  Google,
  GitHub,
}

impl std::str::FromStr for OpenIdConnectProvider {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "google" => Ok(Self::Google),
      "github" => Ok(Self::GitHub),
      other => Err(format!("unknown provider: {}", other)),
    }
  }
}

impl Codec for OpenIdConnectProvider {
  fn encode(&self, out: &mut Vec<u8>) {
    write_tag(*self as u32, out);
  }

  fn decode(bytes: &[u8], offset: usize) -> Result<(Self, usize), DecodeError> {
    let (tag, next) = read_tag(bytes, offset)?;
    match tag {
      0 => Ok((Self::Google, next)),
      1 => Ok((Self::GitHub, next)),
      tag => Err(DecodeError::InvalidTag {
        offset,
        tag,
        type_name: "OpenIdConnectProvider",
      }),
    }
  }
}

/// Request for a provider login URL. `location` is where the client wants to
/// land after the provider redirects back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogInUrlRequest {
  pub provider: OpenIdConnectProvider,
  pub location: String,
}

product_codec!(LogInUrlRequest { provider, location });
