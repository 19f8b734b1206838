//! The operation table: each remote operation's name and its request and
//! response types. Names map to `POST /api/{name}`.

use crate::codec::Codec;

use super::types::{
  Account, AccountId, AccountToken, Binary, IdAndData, ImageHash, LogInUrlRequest, Project,
  ProjectId, Timestamped, TypePart, TypePartId,
};

/// A remote operation with a fixed request/response codec pair.
pub trait Operation {
  const NAME: &'static str;
  type Request: Codec + Send + Sync;
  type Response: Codec + Send;
}

macro_rules! operations {
  ($( $(#[$meta:meta])* $name:ident = $wire:literal : $req:ty => $res:ty; )+) => {
    $(
      $(#[$meta])*
      pub struct $name;

      impl Operation for $name {
        const NAME: &'static str = $wire;
        type Request = $req;
        type Response = $res;
      }
    )+

    /// Wire names of every operation, in declaration order.
    pub const OPERATION_NAMES: &[&str] = &[$($wire),+];
  };
}

operations! {
  /// Ask the server for the provider URL that starts a login.
  RequestLogInUrl = "requestLogInUrl": LogInUrlRequest => String;

  /// Resolve a credential token to the account it belongs to. The server
  /// still calls accounts users on the wire.
  GetAccountByAccountToken = "getUserByAccountToken":
    AccountToken => Option<IdAndData<AccountId, Account>>;

  GetAccount = "getUser": AccountId => Timestamped<Option<Account>>;

  GetImageFile = "getImageFile": ImageHash => Binary;

  /// The pseudo-id bulk query behind the home page project list.
  GetTop50Project = "getTop50Project":
    () => Timestamped<Vec<IdAndData<ProjectId, Project>>>;

  GetProject = "getProject": ProjectId => Timestamped<Option<Project>>;

  GetTypePart = "getTypePart": TypePartId => Timestamped<Option<TypePart>>;

  /// Every type part of a project. `None` when the project does not exist.
  GetTypePartByProjectId = "getTypePartByProjectId":
    ProjectId => Timestamped<Option<Vec<IdAndData<TypePartId, TypePart>>>>;
}
