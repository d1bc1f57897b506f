//! Bearer-credential verification for the connection handshake.
//!
//! Clients present a signed HS256 token (minted by the account service)
//! either as an `Authorization: Bearer` header or a `token` query parameter
//! on the upgrade request. Verification happens before any gateway state is
//! touched; a bad token refuses the WebSocket handshake outright.

use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tokio_tungstenite::tungstenite::handshake::server::Request;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Identity id in the record store.
    pub sub: String,
    /// Expiry, seconds since epoch. Enforced by verification.
    pub exp: u64,
}

pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    pub fn verify(&self, token: &str) -> anyhow::Result<Claims> {
        let data = jsonwebtoken::decode::<Claims>(token, &self.key, &self.validation)
            .map_err(|e| anyhow::anyhow!("token rejected: {e}"))?;
        if data.claims.sub.trim().is_empty() {
            anyhow::bail!("token rejected: empty sub");
        }
        Ok(data.claims)
    }
}

/// Dig the bearer credential out of the upgrade request. Header wins over
/// query string when both are present.
pub fn bearer_token(req: &Request) -> Option<String> {
    if let Some(v) = req.headers().get("authorization") {
        if let Ok(s) = v.to_str() {
            let s = s.trim();
            if let Some(rest) = s.strip_prefix("Bearer ").or_else(|| s.strip_prefix("bearer ")) {
                let t = rest.trim();
                if !t.is_empty() {
                    return Some(t.to_string());
                }
            }
        }
    }

    let query = req.uri().query()?;
    for pair in query.split('&') {
        let Some((k, v)) = pair.split_once('=') else {
            continue;
        };
        if k == "token" && !v.is_empty() {
            return Some(v.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header, encode};

    fn mint(secret: &str, sub: &str, exp: u64) -> String {
        let claims = Claims {
            sub: sub.to_string(),
            exp,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn far_future() -> u64 {
        4_102_444_800 // 2100-01-01
    }

    #[test]
    fn verify_accepts_properly_signed_token() {
        let v = TokenVerifier::new("s3cret");
        let t = mint("s3cret", "user-42", far_future());
        let claims = v.verify(&t).unwrap();
        assert_eq!(claims.sub, "user-42");
    }

    #[test]
    fn verify_rejects_wrong_secret_and_garbage() {
        let v = TokenVerifier::new("s3cret");
        let t = mint("other", "user-42", far_future());
        assert!(v.verify(&t).is_err());
        assert!(v.verify("not-a-token").is_err());
    }

    #[test]
    fn verify_rejects_expired_token() {
        let v = TokenVerifier::new("s3cret");
        let t = mint("s3cret", "user-42", 1_000_000);
        assert!(v.verify(&t).is_err());
    }

    #[test]
    fn bearer_token_prefers_header_over_query() {
        let req = Request::builder()
            .uri("ws://h/?token=fromquery")
            .header("authorization", "Bearer fromheader")
            .body(())
            .unwrap();
        assert_eq!(bearer_token(&req), Some("fromheader".to_string()));

        let req = Request::builder().uri("ws://h/?token=abc").body(()).unwrap();
        assert_eq!(bearer_token(&req), Some("abc".to_string()));

        let req = Request::builder().uri("ws://h/").body(()).unwrap();
        assert_eq!(bearer_token(&req), None);
    }
}
