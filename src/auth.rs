//! Bearer-token authorization for the HTTP edge.
//!
//! Tokens carry a list of allowed methods and path prefixes; the check here
//! is deliberately the whole contract, so issuing tokens stays external to
//! this crate. A request is permitted iff its method is listed (or `*` is)
//! and any prefix matches its path: glob patterns (`*`/`?`) use glob
//! matching, plain prefixes use `starts_with`. Tokens expire through the
//! standard JWT `exp` claim.
//!
//! ```text
//! read only:        methods: [GET, HEAD, OPTIONS]   prefixes: [/]
//! archive only:     methods: ["*"]                  prefixes: [/*/archive/]
//! one dataset tags: methods: ["*"]                  prefixes: [/acme/tags]
//! ```

use glob::Pattern;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::{LakeError, Result};

/// The payload of an access token. Methods and prefixes must be set
/// explicitly; the default is no access.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenData {
    /// Allowed HTTP methods, upper case, or `*`.
    #[serde(default)]
    pub methods: Vec<String>,
    /// Allowed path prefixes or globs.
    #[serde(default)]
    pub prefixes: Vec<String>,
}

impl TokenData {
    /// Whether this token allows the given method on the given path.
    pub fn allows(&self, method: &str, path: &str) -> bool {
        let method = method.to_ascii_uppercase();
        if !self.methods.iter().any(|m| m == "*" || *m == method) {
            return false;
        }
        self.prefixes.iter().any(|prefix| match_prefix(path, prefix))
    }
}

fn match_prefix(path: &str, prefix: &str) -> bool {
    if prefix.contains('*') || prefix.contains('?') {
        Pattern::new(prefix)
            .map(|pattern| pattern.matches(path))
            .unwrap_or(false)
    } else {
        path.starts_with(prefix)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    exp: i64,
    #[serde(default)]
    methods: Vec<String>,
    #[serde(default)]
    prefixes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sub: Option<String>,
}

/// Create a signed access token expiring after `expire_minutes`.
pub fn create_access_token(
    secret: &str,
    data: &TokenData,
    sub: Option<&str>,
    expire_minutes: i64,
) -> Result<String> {
    let claims = Claims {
        exp: (chrono::Utc::now() + chrono::Duration::minutes(expire_minutes)).timestamp(),
        methods: data.methods.clone(),
        prefixes: data.prefixes.clone(),
        sub: sub.map(str::to_string),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| LakeError::BadInput(format!("cannot encode token: {e}")))
}

/// Decode and validate a token (signature and expiry), returning its
/// payload.
pub fn verify_token(secret: &str, token: &str) -> Result<TokenData> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| LakeError::BadInput(format!("invalid token: {e}")))?;
    Ok(TokenData {
        methods: data.claims.methods,
        prefixes: data.claims.prefixes,
    })
}

/// Decode a token and check it allows the request. Fails with
/// [LakeError::BadInput] on an invalid or insufficient token.
pub fn ensure_authorized(secret: &str, token: &str, method: &str, path: &str) -> Result<TokenData> {
    let data = verify_token(secret, token)?;
    if !data.allows(method, path) {
        return Err(LakeError::BadInput(format!(
            "token does not allow {method} on `{path}`"
        )));
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret";

    fn token_data(methods: &[&str], prefixes: &[&str]) -> TokenData {
        TokenData {
            methods: methods.iter().map(|s| s.to_string()).collect(),
            prefixes: prefixes.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_allow_all() {
        let data = token_data(&["*"], &["/"]);
        assert!(data.allows("GET", "/acme/archive/ab/cd"));
        assert!(data.allows("put", "/acme/tags/x"));
    }

    #[test]
    fn test_read_only() {
        let data = token_data(&["GET", "HEAD", "OPTIONS"], &["/"]);
        assert!(data.allows("get", "/acme/entities.ftm.json"));
        assert!(!data.allows("PUT", "/acme/tags/x"));
    }

    #[test]
    fn test_glob_prefix() {
        let data = token_data(&["*"], &["/*/archive/*"]);
        assert!(data.allows("GET", "/acme/archive/ab/cd/blob"));
        assert!(!data.allows("GET", "/acme/tags/x"));
    }

    #[test]
    fn test_plain_prefix() {
        let data = token_data(&["*"], &["/dataset_1/tags", "/dataset_2/tags"]);
        assert!(data.allows("GET", "/dataset_1/tags/statements/last_updated"));
        assert!(!data.allows("GET", "/dataset_3/tags/x"));
    }

    #[test]
    fn test_default_is_no_access() {
        let data = TokenData::default();
        assert!(!data.allows("GET", "/"));
    }

    #[test]
    fn test_token_round_trip() {
        let data = token_data(&["GET"], &["/acme/"]);
        let token = create_access_token(SECRET, &data, Some("tester"), 5).unwrap();
        let decoded = verify_token(SECRET, &token).unwrap();
        assert_eq!(decoded, data);
        assert!(ensure_authorized(SECRET, &token, "GET", "/acme/index.json").is_ok());
        assert!(ensure_authorized(SECRET, &token, "POST", "/acme/index.json").is_err());
    }

    #[test]
    fn test_expired_token_rejected() {
        let data = token_data(&["GET"], &["/"]);
        let token = create_access_token(SECRET, &data, None, -10).unwrap();
        assert!(verify_token(SECRET, &token).is_err());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let data = token_data(&["GET"], &["/"]);
        let token = create_access_token(SECRET, &data, None, 5).unwrap();
        assert!(verify_token("other-secret", &token).is_err());
    }
}
