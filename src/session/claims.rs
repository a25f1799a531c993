//! Unverified decoding of access token claims.
//!
//! The client never holds the signing key, so it reads the JWT payload for
//! display and expiry checks only. Signature verification is the server's job.

use crate::error::{Error, Result};
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// base64url that tolerates both padded and unpadded segments.
const JWT_SEGMENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Claims carried by an access token.
///
/// # Examples
///
/// ```
/// use taskdeck::session::Claims;
///
/// // {"alg":"none"} . {"exp":4102444800,"user_id":7} . (empty signature)
/// let token = "eyJhbGciOiJub25lIn0.eyJleHAiOjQxMDI0NDQ4MDAsInVzZXJfaWQiOjd9.";
/// let claims = Claims::decode(token).unwrap();
/// assert_eq!(claims.exp, Some(4102444800));
/// assert_eq!(claims.user_id(), Some("7".to_string()));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Expiry instant, seconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,

    /// Every other claim, verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Claims {
    /// Decode the payload segment of a compact JWT.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Authentication`] if the token is not three dot-separated
    /// segments or the payload is not base64url-encoded JSON.
    pub fn decode(token: &str) -> Result<Self> {
        let mut segments = token.split('.');
        let payload = match (segments.next(), segments.next(), segments.next(), segments.next()) {
            (Some(_header), Some(payload), Some(_signature), None) if !payload.is_empty() => {
                payload
            },
            _ => return Err(Error::authentication("malformed token: expected three segments")),
        };

        let bytes = JWT_SEGMENT
            .decode(payload)
            .map_err(|e| Error::authentication(format!("malformed token payload: {e}")))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| Error::authentication(format!("malformed token claims: {e}")))
    }

    /// Whether the token is still valid at `now` (seconds since epoch).
    ///
    /// A token without `exp` is never considered valid.
    pub fn is_valid_at(&self, now: i64) -> bool {
        self.exp.is_some_and(|exp| exp > now)
    }

    /// Whether the token is still valid right now.
    pub fn is_valid(&self) -> bool {
        self.is_valid_at(chrono::Utc::now().timestamp())
    }

    /// Raw claim by name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.extra.get(name)
    }

    /// The `user_id` claim rendered as text (backends emit numbers or strings).
    pub fn user_id(&self) -> Option<String> {
        match self.get("user_id")? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// The `username` claim, when present.
    pub fn username(&self) -> Option<&str> {
        self.get("username").and_then(Value::as_str)
    }
}

/// Build an unsigned compact token around `claims`. Test helper.
#[cfg(test)]
pub(crate) fn unsigned_token(claims: &Value) -> String {
    let header = JWT_SEGMENT.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = JWT_SEGMENT.encode(claims.to_string());
    format!("{header}.{payload}.sig")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[test]
    fn decodes_exp_and_extra_claims() {
        let token = unsigned_token(&json!({"exp": 2_000_000_000, "username": "ada", "user_id": 3}));
        let claims = Claims::decode(&token).unwrap();
        assert_eq!(claims.exp, Some(2_000_000_000));
        assert_eq!(claims.username(), Some("ada"));
        assert_eq!(claims.user_id(), Some("3".to_string()));
    }

    #[test]
    fn validity_is_strictly_after_now() {
        let claims = Claims::decode(&unsigned_token(&json!({"exp": 100}))).unwrap();
        assert!(claims.is_valid_at(99));
        assert!(!claims.is_valid_at(100));
        assert!(!claims.is_valid_at(101));

        let no_exp = Claims::decode(&unsigned_token(&json!({"sub": "x"}))).unwrap();
        assert!(!no_exp.is_valid_at(0));
    }

    #[test]
    fn accepts_padded_segments() {
        let payload = base64::engine::general_purpose::URL_SAFE.encode(r#"{"exp":50}"#);
        assert!(payload.ends_with('='));
        let claims = Claims::decode(&format!("h.{payload}.s")).unwrap();
        assert_eq!(claims.exp, Some(50));
    }

    #[rstest]
    #[case("")]
    #[case("only-one-segment")]
    #[case("a.b")]
    #[case("a..c")]
    #[case("a.b.c.d")]
    #[case("a.!!!.c")]
    #[case("a.bm90LWpzb24.c")]
    fn rejects_malformed_tokens(#[case] token: &str) {
        assert!(matches!(
            Claims::decode(token),
            Err(Error::Authentication(_))
        ));
    }
}
