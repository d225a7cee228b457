//! Signed, stateless tokens for login sessions and password resets.
//!
//! HS256 JWTs with claims `{sub, purpose, exp, fp?}`. Expiry is checked
//! against the service clock, not the library's wall clock.

use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Maximum accepted token length in bytes
pub const TOKEN_BYTES_MAX: usize = 1_024;

/// Hex chars of the password-derived fingerprint
pub const FINGERPRINT_HEX_LEN: usize = 16;

/// What a token authorizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenPurpose {
    #[serde(rename = "session")]
    Session,
    #[serde(rename = "reset")]
    PasswordReset,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("malformed token")]
    Malformed,
    #[error("bad signature")]
    BadSignature,
    #[error("token expired")]
    Expired,
    #[error("wrong token purpose")]
    WrongPurpose,
    #[error("token encoding failed: {0}")]
    Encode(String),
}

/// Verified token contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claims {
    pub purpose: TokenPurpose,
    pub user_id: Uuid,
    pub expires_at: i64,
    pub fingerprint: Option<String>,
}

/// Wire form of [`Claims`].
#[derive(Debug, Serialize, Deserialize)]
struct JwtClaims {
    sub: Uuid,
    purpose: TokenPurpose,
    exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    fp: Option<String>,
}

/// Issues and verifies tokens with one secret.
#[derive(Clone)]
pub struct TokenSigner {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl std::fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSigner").finish_non_exhaustive()
    }
}

impl TokenSigner {
    #[must_use]
    pub fn new(secret: &str) -> Self {
        assert!(!secret.is_empty(), "secret cannot be empty");

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    pub fn issue(
        &self,
        purpose: TokenPurpose,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
        fingerprint: Option<&str>,
    ) -> Result<String, TokenError> {
        let claims = JwtClaims {
            sub: user_id,
            purpose,
            exp: expires_at.timestamp(),
            fp: fingerprint.map(str::to_string),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| TokenError::Encode(e.to_string()))?;

        assert!(token.len() <= TOKEN_BYTES_MAX, "token exceeds max length");
        Ok(token)
    }

    pub fn verify(
        &self,
        token: &str,
        purpose: TokenPurpose,
        now: DateTime<Utc>,
    ) -> Result<Claims, TokenError> {
        if token.len() > TOKEN_BYTES_MAX {
            return Err(TokenError::Malformed);
        }

        let data = decode::<JwtClaims>(token, &self.decoding, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::InvalidSignature => TokenError::BadSignature,
                _ => TokenError::Malformed,
            }
        })?;
        let claims = data.claims;

        if claims.purpose != purpose {
            return Err(TokenError::WrongPurpose);
        }
        if now.timestamp() >= claims.exp {
            return Err(TokenError::Expired);
        }

        Ok(Claims {
            purpose: claims.purpose,
            user_id: claims.sub,
            expires_at: claims.exp,
            fingerprint: claims.fp,
        })
    }
}

/// Short digest of account state; changes when the password or last login does.
#[must_use]
pub fn account_fingerprint(password_hash: &str, last_login: Option<DateTime<Utc>>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password_hash.as_bytes());
    hasher.update(b"|");
    if let Some(at) = last_login {
        hasher.update(at.timestamp_micros().to_string().as_bytes());
    }
    let digest = hex::encode(hasher.finalize());
    digest[..FINGERPRINT_HEX_LEN].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap()
    }

    #[test]
    fn test_issue_verify() {
        let signer = TokenSigner::new("secret");
        let user = Uuid::new_v4();
        let token = signer
            .issue(TokenPurpose::Session, user, now() + Duration::minutes(10), None)
            .unwrap();
        assert_eq!(token.split('.').count(), 3);

        let claims = signer.verify(&token, TokenPurpose::Session, now()).unwrap();
        assert_eq!(claims.user_id, user);
        assert_eq!(claims.fingerprint, None);
    }

    #[test]
    fn test_rejections() {
        let signer = TokenSigner::new("secret");
        let user = Uuid::new_v4();
        let token = signer
            .issue(TokenPurpose::PasswordReset, user, now() + Duration::hours(1), Some("abcd"))
            .unwrap();

        assert_eq!(
            signer.verify(&token, TokenPurpose::Session, now()),
            Err(TokenError::WrongPurpose)
        );
        assert_eq!(
            signer.verify(&token, TokenPurpose::PasswordReset, now() + Duration::hours(1)),
            Err(TokenError::Expired)
        );
        assert_eq!(
            TokenSigner::new("other").verify(&token, TokenPurpose::PasswordReset, now()),
            Err(TokenError::BadSignature)
        );
        assert_eq!(
            signer.verify("garbage", TokenPurpose::Session, now()),
            Err(TokenError::Malformed)
        );

        let claims = signer.verify(&token, TokenPurpose::PasswordReset, now()).unwrap();
        assert_eq!(claims.fingerprint.as_deref(), Some("abcd"));
    }

    #[test]
    fn test_tampered_payload_fails() {
        let signer = TokenSigner::new("secret");
        let token = signer
            .issue(TokenPurpose::Session, Uuid::new_v4(), now() + Duration::hours(1), None)
            .unwrap();
        let parts: Vec<&str> = token.split('.').collect();
        let forged_payload = URL_SAFE_NO_PAD.encode(format!(
            r#"{{"sub":"{}","purpose":"session","exp":9999999999}}"#,
            Uuid::new_v4()
        ));
        let forged = format!("{}.{forged_payload}.{}", parts[0], parts[2]);
        assert_eq!(
            signer.verify(&forged, TokenPurpose::Session, now()),
            Err(TokenError::BadSignature)
        );
    }

    #[test]
    fn test_fingerprint_changes_with_password_and_login() {
        let a = account_fingerprint("$argon2id$a", None);
        let b = account_fingerprint("$argon2id$b", None);
        let c = account_fingerprint("$argon2id$a", Some(now()));
        assert_eq!(a.len(), FINGERPRINT_HEX_LEN);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }
}
