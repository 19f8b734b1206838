//! Test doubles shared by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::marker::PhantomData;
use std::sync::Mutex;

use futures::future::{BoxFuture, FutureExt};
use tokio::sync::oneshot;

use crate::api::operations::Operation;
use crate::api::transport::{Transport, TransportError};
use crate::api::types::{
  Account, AccountId, AccountToken, ImageHash, Kernel, Project, ProjectId, Timestamp, TypePart,
  TypePartBody,
};
use crate::codec::Codec;

enum Reply {
  Bytes(Vec<u8>),
  Fail,
  Gated(oneshot::Receiver<Vec<u8>>),
}

/// A [`Transport`] answering from a script keyed by operation and request
/// bytes. Unscripted calls fail with HTTP 404.
#[derive(Default)]
pub struct ScriptedTransport {
  routes: Mutex<HashMap<(&'static str, Vec<u8>), VecDeque<Reply>>>,
  calls: Mutex<Vec<(&'static str, Option<String>)>>,
}

/// A reply held back until the test releases it.
pub struct Gate<O: Operation> {
  sender: oneshot::Sender<Vec<u8>>,
  _operation: PhantomData<O>,
}

impl<O: Operation> Gate<O> {
  pub fn release(self, response: &O::Response) {
    let _ = self.sender.send(response.to_bytes());
  }

  /// Drop the reply; the call fails as a broken connection.
  pub fn fail(self) {}
}

impl ScriptedTransport {
  pub fn new() -> Self {
    Self::default()
  }

  fn push<O: Operation>(&self, request: &O::Request, reply: Reply) {
    self
      .routes
      .lock()
      .unwrap()
      .entry((O::NAME, request.to_bytes()))
      .or_default()
      .push_back(reply);
  }

  pub fn reply<O: Operation>(&self, request: &O::Request, response: &O::Response) {
    self.push::<O>(request, Reply::Bytes(response.to_bytes()));
  }

  pub fn reply_raw<O: Operation>(&self, request: &O::Request, body: Vec<u8>) {
    self.push::<O>(request, Reply::Bytes(body));
  }

  pub fn fail<O: Operation>(&self, request: &O::Request) {
    self.push::<O>(request, Reply::Fail);
  }

  pub fn gate<O: Operation>(&self, request: &O::Request) -> Gate<O> {
    let (sender, receiver) = oneshot::channel();
    self.push::<O>(request, Reply::Gated(receiver));
    Gate {
      sender,
      _operation: PhantomData,
    }
  }

  pub fn calls(&self, operation: &str) -> usize {
    self
      .calls
      .lock()
      .unwrap()
      .iter()
      .filter(|(name, _)| *name == operation)
      .count()
  }

  pub fn last_token(&self) -> Option<String> {
    self.calls.lock().unwrap().last().and_then(|(_, t)| t.clone())
  }

  /// Token sent with the most recent call to `operation`.
  pub fn last_token_for(&self, operation: &str) -> Option<String> {
    self
      .calls
      .lock()
      .unwrap()
      .iter()
      .rev()
      .find(|(name, _)| *name == operation)
      .and_then(|(_, t)| t.clone())
  }
}

impl Transport for ScriptedTransport {
  fn post(
    &self,
    operation: &'static str,
    body: Vec<u8>,
    token: Option<&AccountToken>,
  ) -> BoxFuture<'static, Result<Vec<u8>, TransportError>> {
    self
      .calls
      .lock()
      .unwrap()
      .push((operation, token.map(|t| t.as_str().to_string())));

    let reply = self
      .routes
      .lock()
      .unwrap()
      .get_mut(&(operation, body))
      .and_then(VecDeque::pop_front);

    let broken = move || TransportError::Connect {
      operation,
      message: "scripted failure".to_string(),
    };
    match reply {
      Some(Reply::Bytes(bytes)) => async move { Ok(bytes) }.boxed(),
      Some(Reply::Fail) => async move { Err(broken()) }.boxed(),
      Some(Reply::Gated(receiver)) => async move { receiver.await.map_err(|_| broken()) }.boxed(),
      None => async move {
        Err(TransportError::Status {
          operation,
          status: 404,
        })
      }
      .boxed(),
    }
  }
}

pub fn project(name: &str) -> Project {
  Project {
    name: name.to_string(),
    icon_hash: ImageHash::of(b"icon"),
    image_hash: ImageHash::of(b"image"),
    created_at: Timestamp::from_millis(0),
    updated_at: Timestamp::from_millis(0),
    created_by: AccountId::new("creator"),
  }
}

pub fn account(name: &str) -> Account {
  Account {
    name: name.to_string(),
    image_hash: ImageHash::of(b"face"),
    introduction: String::new(),
    created_at: Timestamp::from_millis(0),
  }
}

pub fn type_part(name: &str, project_id: &ProjectId) -> TypePart {
  TypePart {
    name: name.to_string(),
    description: String::new(),
    project_id: project_id.clone(),
    type_parameter_list: Vec::new(),
    body: TypePartBody::Kernel(Kernel::String),
  }
}
