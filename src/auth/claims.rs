//! Access token claim decoding and validity checks.
//!
//! Tokens are JWTs issued by the identity provider. Only the payload segment
//! is read here - the signature is NOT verified, matching the trust model of
//! a client that received the token over TLS from the provider itself.
//! Anything that fails to decode is treated as "not authenticated", never as
//! an error that propagates to callers.

use std::collections::HashSet;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;

/// Claims extracted from the access token payload.
///
/// Recomputed from the raw token on demand; never cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionClaims {
    pub subject: String,
    pub username: String,
    pub email: String,
    pub given_name: String,
    pub family_name: String,
    pub roles: HashSet<String>,
    pub expiry: DateTime<Utc>,
}

impl SessionClaims {
    /// Set-membership check against the realm roles claim.
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiry <= now
    }
}

/// Payload shape as the provider emits it. A token with no roles claim is a
/// token with the empty role set, not an error.
#[derive(Debug, Deserialize)]
struct RawClaims {
    #[serde(default)]
    sub: String,
    #[serde(default)]
    preferred_username: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    given_name: String,
    #[serde(default)]
    family_name: String,
    #[serde(default)]
    roles: Vec<String>,
    exp: i64,
}

/// Decode the payload segment of an access token.
///
/// Returns `None` for anything that is not three dot-separated segments with
/// a base64url-encoded JSON payload carrying an `exp` claim.
pub fn decode(access_token: &str) -> Option<SessionClaims> {
    let mut segments = access_token.split('.');
    let _header = segments.next()?;
    let payload = segments.next()?;
    let _signature = segments.next()?;
    if segments.next().is_some() {
        return None;
    }

    let bytes = URL_SAFE_NO_PAD.decode(payload).ok()?;
    let raw: RawClaims = serde_json::from_slice(&bytes).ok()?;
    let expiry = Utc.timestamp_opt(raw.exp, 0).single()?;

    Some(SessionClaims {
        subject: raw.sub,
        username: raw.preferred_username,
        email: raw.email,
        given_name: raw.given_name,
        family_name: raw.family_name,
        roles: raw.roles.into_iter().collect(),
        expiry,
    })
}

/// Whether the token decodes and has not expired as of `now`.
/// Pure function of its inputs.
pub fn is_valid_at(access_token: &str, now: DateTime<Utc>) -> bool {
    decode(access_token).map(|c| !c.is_expired_at(now)).unwrap_or(false)
}

/// Whether the token decodes and has not expired as of the current wall clock.
pub fn is_valid(access_token: &str) -> bool {
    is_valid_at(access_token, Utc::now())
}

/// Build an unsigned test token from a claims JSON value. Test fixture only -
/// production tokens always come from the provider.
#[cfg(test)]
pub(crate) fn encode_token(claims: &serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims).expect("claims serialize"));
    format!("{}.{}.sig", header, payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn token_expiring_in(seconds: i64) -> String {
        encode_token(&json!({
            "sub": "f3b2a1",
            "preferred_username": "user1",
            "email": "user1@example.com",
            "given_name": "Dana",
            "family_name": "Reyes",
            "roles": ["admin", "user"],
            "exp": (Utc::now() + Duration::seconds(seconds)).timestamp(),
        }))
    }

    #[test]
    fn test_decode_valid_token() {
        let claims = decode(&token_expiring_in(300)).expect("token should decode");
        assert_eq!(claims.subject, "f3b2a1");
        assert_eq!(claims.username, "user1");
        assert_eq!(claims.email, "user1@example.com");
        assert_eq!(claims.given_name, "Dana");
        assert_eq!(claims.family_name, "Reyes");
        assert!(claims.has_role("admin"));
        assert!(claims.has_role("user"));
        assert!(!claims.has_role("owner"));
    }

    #[test]
    fn test_valid_and_expired() {
        assert!(is_valid(&token_expiring_in(300)));
        // Expired a second ago: present but invalid
        assert!(!is_valid(&token_expiring_in(-1)));
    }

    #[test]
    fn test_is_valid_at_is_pure() {
        let token = token_expiring_in(300);
        let later = Utc::now() + Duration::seconds(600);
        assert!(is_valid_at(&token, Utc::now()));
        assert!(!is_valid_at(&token, later));
    }

    #[test]
    fn test_malformed_tokens_never_panic() {
        for s in [
            "",
            "not-a-token",
            "a.b",
            "a.b.c.d",
            "!!!.###.$$$",
            "a.%%%.c",
            "a.bm90IGpzb24.c", // decodes but is not JSON
        ] {
            assert!(decode(s).is_none(), "{:?} should not decode", s);
            assert!(!is_valid(s));
        }
    }

    #[test]
    fn test_missing_roles_is_empty_set() {
        let token = encode_token(&json!({
            "sub": "x",
            "exp": (Utc::now() + Duration::seconds(60)).timestamp(),
        }));
        let claims = decode(&token).expect("token should decode");
        assert!(claims.roles.is_empty());
        assert!(!claims.has_role("admin"));
    }

    #[test]
    fn test_missing_exp_is_invalid() {
        let token = encode_token(&json!({ "sub": "x" }));
        assert!(decode(&token).is_none());
    }

    #[test]
    fn test_round_trip() {
        let exp = Utc::now().timestamp() + 120;
        let value = json!({
            "sub": "abc",
            "preferred_username": "roundtrip",
            "email": "rt@example.com",
            "given_name": "Round",
            "family_name": "Trip",
            "roles": ["user"],
            "exp": exp,
        });
        let claims = decode(&encode_token(&value)).expect("round trip decode");
        assert_eq!(claims.subject, "abc");
        assert_eq!(claims.username, "roundtrip");
        assert_eq!(claims.expiry.timestamp(), exp);
        assert_eq!(claims.roles, HashSet::from(["user".to_string()]));
    }
}
