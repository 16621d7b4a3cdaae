//! Local inspection of bearer access tokens.
//!
//! The client never verifies signatures (it has no key); it only checks that
//! the token is a well-formed JWT whose embedded expiry is still ahead, so
//! that obviously dead tokens are rejected without a round-trip.

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{DecodingKey, Validation};
use serde::Deserialize;

use crate::error::{Error, Result};

/// Claims the client cares about.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct AccessClaims {
  /// Subject, usually the user id
  #[serde(default)]
  pub sub: Option<String>,
  /// Expiration (Unix timestamp)
  pub exp: i64,
}

fn validation() -> Validation {
  let mut validation = Validation::default();
  validation.insecure_disable_signature_validation();
  validation.validate_exp = true;
  validation.validate_aud = false;
  validation.leeway = 0;
  validation.set_required_spec_claims(&["exp"]);
  validation
}

/// Decode `token` and reject it if its expiry has passed.
pub fn validate(token: &str) -> Result<AccessClaims> {
  jsonwebtoken::decode::<AccessClaims>(token, &DecodingKey::from_secret(&[]), &validation())
    .map(|data| data.claims)
    .map_err(|e| match e.kind() {
      ErrorKind::ExpiredSignature => Error::TokenExpired,
      _ => Error::InvalidToken(e.to_string()),
    })
}

#[cfg(test)]
pub(crate) fn make_token(sub: &str, exp: i64) -> String {
  encode_claims(&serde_json::json!({ "sub": sub, "exp": exp }))
}

#[cfg(test)]
fn encode_claims(claims: &serde_json::Value) -> String {
  use jsonwebtoken::{EncodingKey, Header};
  jsonwebtoken::encode(&Header::default(), claims, &EncodingKey::from_secret(b"server-only")).unwrap()
}
