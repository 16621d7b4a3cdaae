//! Error taxonomy for the client core.
//!
//! Lower layers never swallow errors: they attach the status code and body
//! (or the underlying cause) and hand them upward. The CLI maps each error to
//! an [`ErrorKind`] to decide how to present it.

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors produced by the session, HTTP, cache and auth layers.
///
/// `Clone` so a single in-flight fetch can hand its outcome to every waiter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
  #[error("could not reach the server: {0}")]
  Connectivity(String),

  #[error("request timed out after {0}s")]
  Timeout(u64),

  #[error("server responded with {status}: {body}")]
  Http { status: u16, body: String },

  #[error("no active session")]
  NoSession,

  #[error("invalid access token: {0}")]
  InvalidToken(String),

  #[error("access token has expired")]
  TokenExpired,

  #[error("invalid todo id '{0}'")]
  InvalidId(String),

  #[error("failed to decode response: {0}")]
  Decode(String),

  #[error("storage error: {0}")]
  Storage(String),

  #[error("internal error: {0}")]
  Internal(String),
}

/// How an error should be surfaced at the user-facing boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
  /// Network unreachable or timed out; the user may retry.
  Retry,
  /// A 4xx other than 401: the request itself was rejected.
  User,
  /// A 5xx: the server failed, probably temporarily.
  Transient,
  /// The session is missing or was rejected; the user must log in.
  Session,
  /// Local failure (storage, decoding, malformed token).
  Local,
}

impl Error {
  pub fn status(&self) -> Option<u16> {
    match self {
      Error::Http { status, .. } => Some(*status),
      _ => None,
    }
  }

  pub fn is_unauthorized(&self) -> bool {
    self.status() == Some(401)
  }

  /// Whether repeating the same request could plausibly succeed.
  pub fn is_transient(&self) -> bool {
    match self {
      Error::Connectivity(_) | Error::Timeout(_) => true,
      Error::Http { status, .. } => *status >= 500,
      _ => false,
    }
  }

  pub fn kind(&self) -> ErrorKind {
    match self {
      Error::Connectivity(_) | Error::Timeout(_) => ErrorKind::Retry,
      Error::Http { status: 401, .. } => ErrorKind::Session,
      Error::Http { status, .. } if *status >= 500 => ErrorKind::Transient,
      Error::Http { .. } | Error::InvalidId(_) => ErrorKind::User,
      Error::NoSession | Error::TokenExpired => ErrorKind::Session,
      Error::InvalidToken(_) | Error::Decode(_) | Error::Storage(_) | Error::Internal(_) => {
        ErrorKind::Local
      }
    }
  }

  /// Short message suitable for showing to a user.
  pub fn user_message(&self) -> String {
    match self.kind() {
      ErrorKind::Retry => format!("{}. Check your connection and try again.", self),
      ErrorKind::Session => format!("{}. Run `todoq login` to sign in.", self),
      ErrorKind::Transient => "The server had a problem handling the request. Try again shortly."
        .to_string(),
      ErrorKind::User | ErrorKind::Local => self.to_string(),
    }
  }
}
