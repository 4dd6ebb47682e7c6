//! Supabase access-token verification against the project's JWKS.

use super::{AuthError, Verifier};
use async_trait::async_trait;
use jsonwebtoken::jwk::{AlgorithmParameters, EllipticCurve, JwkSet};
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use sentra_core::models::UserInfo;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub const EXPECTED_AUDIENCE: &str = "authenticated";
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);
const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    role: Option<String>,
}

pub struct JwksVerifier {
    jwks_url: String,
    issuer: String,
    keys: RwLock<HashMap<String, DecodingKey>>,
    last_fetch: Mutex<Option<Instant>>,
    http: reqwest::Client,
}

impl JwksVerifier {
    pub fn new(supabase_url: &str) -> Result<Self, AuthError> {
        let base = supabase_url.trim().trim_end_matches('/');
        if base.is_empty() {
            return Err(AuthError::NotConfigured);
        }
        let http = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(|e| AuthError::Invalid(e.to_string()))?;
        Ok(Self {
            jwks_url: format!("{}/auth/v1/.well-known/jwks.json", base),
            issuer: format!("{}/auth/v1", base),
            keys: RwLock::new(HashMap::new()),
            last_fetch: Mutex::new(None),
            http,
        })
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    fn key(&self, kid: &str) -> Option<DecodingKey> {
        self.keys.read().ok()?.get(kid).cloned()
    }

    fn install(&self, set: &JwkSet) {
        let keys = keys_from_set(set);
        debug!("loaded {} signing keys", keys.len());
        if let Ok(mut guard) = self.keys.write() {
            *guard = keys;
        }
    }

    /// Re-fetch the key set, at most once per [`MIN_REFRESH_INTERVAL`].
    async fn refresh(&self) -> Result<(), AuthError> {
        {
            let mut last = self
                .last_fetch
                .lock()
                .map_err(|e| AuthError::Invalid(e.to_string()))?;
            if last.is_some_and(|t| t.elapsed() < MIN_REFRESH_INTERVAL) {
                return Ok(());
            }
            *last = Some(Instant::now());
        }

        let set: JwkSet = self
            .http
            .get(&self.jwks_url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| {
                warn!("jwks fetch failed: {}", e);
                AuthError::Invalid("jwks unavailable".to_string())
            })?
            .json()
            .await
            .map_err(|e| AuthError::Invalid(format!("jwks decode: {}", e)))?;
        self.install(&set);
        Ok(())
    }

    fn validation(&self, alg: Algorithm) -> Validation {
        let mut validation = Validation::new(alg);
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_audience(&[EXPECTED_AUDIENCE]);
        validation.set_required_spec_claims(&["exp", "sub", "iss", "aud"]);
        validation
    }

    #[cfg(test)]
    pub(crate) fn with_key_set(supabase_url: &str, set: &JwkSet) -> Self {
        let verifier = Self::new(supabase_url).unwrap();
        verifier.install(set);
        *verifier.last_fetch.lock().unwrap() = Some(Instant::now());
        verifier
    }
}

/// RSA keys and P-256 EC keys with a `kid`; everything else is skipped.
fn keys_from_set(set: &JwkSet) -> HashMap<String, DecodingKey> {
    set.keys
        .iter()
        .filter_map(|jwk| {
            let kid = jwk.common.key_id.clone().filter(|k| !k.is_empty())?;
            match &jwk.algorithm {
                AlgorithmParameters::RSA(_) => {}
                AlgorithmParameters::EllipticCurve(p) if p.curve == EllipticCurve::P256 => {}
                _ => return None,
            }
            DecodingKey::from_jwk(jwk).ok().map(|key| (kid, key))
        })
        .collect()
}

#[async_trait]
impl Verifier for JwksVerifier {
    async fn verify(&self, token: &str) -> Result<UserInfo, AuthError> {
        let header = decode_header(token).map_err(|e| AuthError::Invalid(e.to_string()))?;
        if !matches!(header.alg, Algorithm::RS256 | Algorithm::ES256) {
            return Err(AuthError::Invalid(format!("unsupported alg {:?}", header.alg)));
        }
        let kid = header
            .kid
            .filter(|k| !k.is_empty())
            .ok_or_else(|| AuthError::Invalid("missing kid".to_string()))?;

        let key = match self.key(&kid) {
            Some(key) => key,
            None => {
                self.refresh().await?;
                self.key(&kid)
                    .ok_or_else(|| AuthError::Invalid("unknown kid".to_string()))?
            }
        };

        let data = decode::<Claims>(token, &key, &self.validation(header.alg))
            .map_err(|e| AuthError::Invalid(e.to_string()))?;
        let claims = data.claims;
        if claims.sub.trim().is_empty() {
            return Err(AuthError::Invalid("missing sub".to_string()));
        }
        Ok(UserInfo {
            id: claims.sub,
            email: claims.email.filter(|e| !e.is_empty()),
            role: claims.role.filter(|r| !r.is_empty()),
        })
    }
}
