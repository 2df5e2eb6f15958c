//! Internal token mint and bearer token validation.
//!
//! Three token families are accepted, dispatched on the unverified `iss`
//! claim: internal service tokens (`TerrakubeInternal`, HS256), personal
//! access tokens (`Terrakube`, HS256 under the PAT secret) and OIDC tokens
//! from the configured issuer (RS256 via the issuer's JWKS).

mod jwks;

pub use jwks::JwksCache;

use base64::Engine;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Result type alias for auth operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0} not configured")]
    SecretMissing(&'static str),

    #[error("failed to decode secret: {0}")]
    SecretInvalid(String),

    #[error("token validation failed: {0}")]
    Invalid(String),

    #[error("unsupported token issuer: {0}")]
    UnknownIssuer(String),

    #[error("failed to fetch JWKS: {0}")]
    Jwks(String),
}

const INTERNAL_ISSUER: &str = "TerrakubeInternal";
const PAT_ISSUER: &str = "Terrakube";

/// Claim set carried by internal service tokens.
#[derive(Debug, Serialize, Deserialize)]
pub struct InternalClaims {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub email: String,
    pub email_verified: bool,
    pub name: String,
    pub iat: i64,
    pub exp: i64,
}

/// Secrets are provided base64url encoded without padding; the control plane
/// historically also accepted standard base64.
fn decode_secret(secret: &str) -> Result<Vec<u8>> {
    base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(secret)
        .or_else(|_| base64::engine::general_purpose::STANDARD.decode(secret))
        .map_err(|e| Error::SecretInvalid(e.to_string()))
}

/// Mint a short-lived internal token for east-west calls.
pub fn generate_internal_token(internal_secret: &str) -> Result<String> {
    if internal_secret.is_empty() {
        return Err(Error::SecretMissing("internal secret"));
    }
    let secret = decode_secret(internal_secret)?;

    let now = Utc::now();
    let claims = InternalClaims {
        iss: INTERNAL_ISSUER.to_string(),
        sub: "TerrakubeInternal (TOKEN)".to_string(),
        aud: INTERNAL_ISSUER.to_string(),
        email: "no-reply@terrakube.io".to_string(),
        email_verified: true,
        name: "TerrakubeInternal Client".to_string(),
        iat: now.timestamp(),
        exp: (now + Duration::days(30)).timestamp(),
    };

    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(&secret),
    )
    .map_err(|e| Error::Invalid(e.to_string()))
}

/// Read the issuer claim without verifying the signature.
fn unverified_issuer(token: &str) -> Result<String> {
    let header = jsonwebtoken::decode_header(token)
        .map_err(|e| Error::Invalid(format!("failed to parse token: {e}")))?;

    let mut validation = Validation::new(header.alg);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let data = decode::<Value>(token, &DecodingKey::from_secret(&[]), &validation)
        .map_err(|e| Error::Invalid(format!("failed to parse token: {e}")))?;
    Ok(data
        .claims
        .get("iss")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string())
}

fn validate_hmac(token: &str, secret_str: &str, secret_name: &'static str) -> Result<Value> {
    if secret_str.is_empty() {
        return Err(Error::SecretMissing(secret_name));
    }
    let secret = decode_secret(secret_str)?;

    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_aud = false;

    let data = decode::<Value>(token, &DecodingKey::from_secret(&secret), &validation)
        .map_err(|e| Error::Invalid(e.to_string()))?;
    Ok(data.claims)
}

/// Validate a bearer token, returning its claims.
///
/// `jwks` backs OIDC validation; tokens from any issuer other than the two
/// HMAC families are rejected unless `issuer_uri` is configured.
pub async fn validate_token(
    token: &str,
    internal_secret: &str,
    pat_secret: &str,
    issuer_uri: &str,
    jwks: &JwksCache,
) -> Result<Value> {
    match unverified_issuer(token)?.as_str() {
        INTERNAL_ISSUER => validate_hmac(token, internal_secret, "internal secret"),
        PAT_ISSUER => validate_hmac(token, pat_secret, "PAT secret"),
        other => {
            if issuer_uri.is_empty() {
                return Err(Error::UnknownIssuer(other.to_string()));
            }
            validate_oidc(token, issuer_uri, jwks).await
        }
    }
}

async fn validate_oidc(token: &str, issuer_uri: &str, jwks: &JwksCache) -> Result<Value> {
    let header =
        jsonwebtoken::decode_header(token).map_err(|e| Error::Invalid(e.to_string()))?;
    if !matches!(
        header.alg,
        Algorithm::RS256 | Algorithm::RS384 | Algorithm::RS512
    ) {
        return Err(Error::Invalid(format!(
            "unexpected signing method: {:?}",
            header.alg
        )));
    }

    let keys = jwks.keys_for(issuer_uri).await?;
    let key = match header.kid.as_deref() {
        Some(kid) => keys
            .get(kid)
            .ok_or_else(|| Error::Invalid(format!("no matching key found for kid: {kid}")))?,
        // No kid in the header: fall back to the first advertised key.
        None => keys
            .values()
            .next()
            .ok_or_else(|| Error::Invalid("no keys available for OIDC validation".into()))?,
    };

    let mut validation = Validation::new(header.alg);
    validation.validate_aud = false;

    let data = decode::<Value>(token, key, &validation)
        .map_err(|e| Error::Invalid(format!("OIDC token validation failed: {e}")))?;
    Ok(data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;

    fn test_secret() -> String {
        // 32 bytes, base64url without padding.
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(b"0123456789abcdef0123456789abcdef")
    }

    #[test]
    fn test_mint_round_trip() {
        let secret = test_secret();
        let token = generate_internal_token(&secret).unwrap();
        let claims = validate_hmac(&token, &secret, "internal secret").unwrap();

        assert_eq!(claims["iss"], "TerrakubeInternal");
        assert_eq!(claims["aud"], "TerrakubeInternal");
        assert_eq!(claims["email"], "no-reply@terrakube.io");
        assert_eq!(claims["email_verified"], true);
    }

    #[test]
    fn test_mint_requires_secret() {
        assert!(matches!(
            generate_internal_token(""),
            Err(Error::SecretMissing(_))
        ));
    }

    #[test]
    fn test_standard_base64_secret_fallback() {
        let secret = base64::engine::general_purpose::STANDARD
            .encode(b"0123456789abcdef0123456789abcdef");
        let token = generate_internal_token(&secret).unwrap();
        assert!(validate_hmac(&token, &secret, "internal secret").is_ok());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = generate_internal_token(&test_secret()).unwrap();
        let other = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .encode(b"ffffffffffffffffffffffffffffffff");
        assert!(matches!(
            validate_hmac(&token, &other, "internal secret"),
            Err(Error::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn test_dispatch_on_issuer() {
        let secret = test_secret();
        let token = generate_internal_token(&secret).unwrap();
        let jwks = JwksCache::new();

        // Internal token validates against the internal secret even when a
        // PAT secret is present.
        let claims = validate_token(&token, &secret, &test_secret(), "", &jwks)
            .await
            .unwrap();
        assert_eq!(claims["iss"], "TerrakubeInternal");
    }

    #[tokio::test]
    async fn test_unknown_issuer_without_oidc() {
        let secret = decode_secret(&test_secret()).unwrap();
        let claims = serde_json::json!({"iss": "https://dex.example", "exp": 4102444800i64});
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(&secret),
        )
        .unwrap();

        let jwks = JwksCache::new();
        let result = validate_token(&token, &test_secret(), "", "", &jwks).await;
        assert!(matches!(result, Err(Error::UnknownIssuer(_))));
    }
}
