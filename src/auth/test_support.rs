//! Signing keys, token minting and fakes shared by the auth tests.

use std::sync::{LazyLock, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use rsa::pkcs1::EncodeRsaPrivateKey;
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde_json::Value;

use super::AuthError;
use super::jwks::{Clock, Jwk, Jwks, KeySetFetcher};

pub const KID: &str = "cookbook-test-key";
pub const DOMAIN: &str = "cookbook.test.auth0.com";
pub const AUDIENCE: &str = "https://api.cookbook.test";
pub const ISSUER: &str = "https://cookbook.test.auth0.com/";

pub struct SigningKey {
    encoding_key: EncodingKey,
    public_key: RsaPublicKey,
}

impl SigningKey {
    fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, 2048).expect("failed to generate a key");
        let encoding_key =
            EncodingKey::from_rsa_der(private_key.to_pkcs1_der().unwrap().as_bytes());
        Self {
            encoding_key,
            public_key: RsaPublicKey::from(&private_key),
        }
    }

    pub fn jwk(&self, kid: &str) -> Jwk {
        Jwk {
            kty: "RSA".to_string(),
            kid: kid.to_string(),
            n: Some(URL_SAFE_NO_PAD.encode(self.public_key.n().to_bytes_be())),
            e: Some(URL_SAFE_NO_PAD.encode(self.public_key.e().to_bytes_be())),
            alg: Some("RS256".to_string()),
            key_use: Some("sig".to_string()),
        }
    }

    pub fn sign(&self, kid: &str, claims: &Value) -> String {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(kid.to_string());
        self.sign_with_header(&header, claims)
    }

    pub fn sign_with_header(&self, header: &Header, claims: &Value) -> String {
        encode(header, claims, &self.encoding_key).unwrap()
    }
}

/// The key published in [`jwks`].
pub static ISSUER_KEY: LazyLock<SigningKey> = LazyLock::new(SigningKey::generate);
/// A key the issuer never published.
pub static ROGUE_KEY: LazyLock<SigningKey> = LazyLock::new(SigningKey::generate);

pub fn jwks() -> Jwks {
    Jwks {
        keys: vec![ISSUER_KEY.jwk(KID)],
    }
}

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

/// Claims the issuer would put in a valid access token.
pub fn valid_claims() -> Value {
    serde_json::json!({
        "sub": "auth0|chef",
        "aud": AUDIENCE,
        "iss": ISSUER,
        "iat": unix_now(),
        "exp": unix_now() + 3600,
        "scope": "read:recipes write:recipes",
    })
}

/// Answers every fetch with the same result and records what was asked for.
pub struct StaticFetcher {
    result: Result<Jwks, AuthError>,
    delay: Option<Duration>,
    urls: Mutex<Vec<String>>,
}

impl StaticFetcher {
    pub fn ok(jwks: Jwks) -> Self {
        Self {
            result: Ok(jwks),
            delay: None,
            urls: Mutex::new(Vec::new()),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            result: Err(AuthError::KeySetUnavailable(
                "endpoint returned status 503 Service Unavailable".to_string(),
            )),
            delay: None,
            urls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.urls.lock().unwrap().len()
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }
}

#[async_trait]
impl KeySetFetcher for StaticFetcher {
    async fn fetch(&self, url: &str) -> Result<Jwks, AuthError> {
        self.urls.lock().unwrap().push(url.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.result.clone()
    }
}

/// A clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<SystemTime>,
}

impl ManualClock {
    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self {
            now: Mutex::new(UNIX_EPOCH + Duration::from_secs(1_700_000_000)),
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> SystemTime {
        *self.now.lock().unwrap()
    }
}
