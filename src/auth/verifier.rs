//! Verification of `Authorization: Bearer <token>` headers.
//!
//! Tokens must be RS256-signed by a key from the issuer's published key set
//! and carry the configured audience, the issuer `https://{domain}/`, a
//! subject and an unexpired `exp`.

use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};

use super::jwks::KeySet;
use super::{AuthError, ClaimSet, KeySetCache};
use crate::audit;

const BEARER_PREFIX: &str = "bearer ";

/// What the verifier needs to know about the issuer.
#[derive(Clone, Debug, Default)]
pub struct VerifierConfig {
    /// Skip verification and authenticate everyone as the test subject.
    pub testing: bool,
    pub issuer_domain: Option<String>,
    pub audience: Option<String>,
    /// Seconds of clock skew tolerated on `exp` and `nbf`.
    pub leeway: u64,
}

pub struct TokenVerifier {
    config: VerifierConfig,
    key_sets: KeySetCache,
}

impl TokenVerifier {
    pub fn new(config: VerifierConfig, key_sets: KeySetCache) -> Self {
        Self { config, key_sets }
    }

    pub fn is_bypassed(&self) -> bool {
        self.config.testing
    }

    /// Verifies the raw value of an `Authorization` header.
    ///
    /// # Errors
    ///
    /// - [`AuthError::Configuration`] if the issuer domain or audience is unset.
    /// - [`AuthError::MissingCredential`] if there is no `Bearer` value.
    /// - [`AuthError::KeySetUnavailable`] if the key set cannot be fetched.
    /// - [`AuthError::InvalidCredential`] for any signature or claim failure.
    pub async fn verify(&self, header_value: Option<&str>) -> Result<ClaimSet, AuthError> {
        if self.config.testing {
            return Ok(ClaimSet::test_subject());
        }

        let (issuer, audience) = self.issuer_and_audience()?;
        let token = bearer_token(header_value).inspect_err(|_| {
            audit!(outcome = "rejected", "No bearer credential presented");
        })?;
        let key_set = self.key_sets.get_key_set().await?;

        match decode_claims(token, &key_set, &issuer, audience, self.config.leeway) {
            Ok(claims) => {
                audit!(outcome = "accepted", subject = %claims.sub, "Bearer credential verified");
                Ok(claims)
            }
            Err(err) => {
                tracing::warn!(error = %err, "Bearer credential failed verification");
                audit!(outcome = "rejected", "Bearer credential failed verification");
                Err(err)
            }
        }
    }

    fn issuer_and_audience(&self) -> Result<(String, &str), AuthError> {
        let domain = self.config.issuer_domain.as_deref().ok_or_else(|| {
            tracing::error!("AUTH0_DOMAIN is not set and TESTING is off");
            AuthError::Configuration("AUTH0_DOMAIN is not set".to_string())
        })?;
        let audience = self.config.audience.as_deref().ok_or_else(|| {
            tracing::error!("AUTH0_AUDIENCE is not set and TESTING is off");
            AuthError::Configuration("AUTH0_AUDIENCE is not set".to_string())
        })?;
        Ok((format!("https://{domain}/"), audience))
    }
}

/// Extracts the token from a `Bearer` header value; the scheme is matched
/// case-insensitively and the token is trimmed.
fn bearer_token(header_value: Option<&str>) -> Result<&str, AuthError> {
    let value = header_value.ok_or(AuthError::MissingCredential)?;
    let scheme = value
        .get(..BEARER_PREFIX.len())
        .ok_or(AuthError::MissingCredential)?;
    if !scheme.eq_ignore_ascii_case(BEARER_PREFIX) {
        return Err(AuthError::MissingCredential);
    }

    let token = value[BEARER_PREFIX.len()..].trim();
    if token.is_empty() {
        return Err(AuthError::MissingCredential);
    }
    Ok(token)
}

fn decode_claims(
    token: &str,
    key_set: &KeySet,
    issuer: &str,
    audience: &str,
    leeway: u64,
) -> Result<ClaimSet, AuthError> {
    let invalid = |e: jsonwebtoken::errors::Error| AuthError::InvalidCredential(e.to_string());

    let header = decode_header(token).map_err(invalid)?;
    if header.alg != Algorithm::RS256 {
        return Err(AuthError::InvalidCredential(format!(
            "unsupported algorithm {:?}",
            header.alg
        )));
    }
    let kid = header
        .kid
        .ok_or_else(|| AuthError::InvalidCredential("missing kid".to_string()))?;
    let jwk = key_set
        .find(&kid)
        .ok_or_else(|| AuthError::InvalidCredential(format!("unknown kid {kid}")))?;
    let (Some(n), Some(e)) = (jwk.n.as_deref(), jwk.e.as_deref()) else {
        return Err(AuthError::InvalidCredential(format!(
            "key {kid} is not an RSA key"
        )));
    };
    let decoding_key = DecodingKey::from_rsa_components(n, e).map_err(invalid)?;

    let mut validation = Validation::new(Algorithm::RS256);
    validation.set_audience(&[audience]);
    validation.set_issuer(&[issuer]);
    validation.set_required_spec_claims(&["exp", "aud", "iss", "sub"]);
    validation.validate_nbf = true;
    validation.leeway = leeway;

    let decoded = decode::<ClaimSet>(token, &decoding_key, &validation).map_err(invalid)?;
    Ok(decoded.claims)
}
