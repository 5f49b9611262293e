//! Token Store — spec §4.B, §3 (Token).
//!
//! In-memory + on-disk cache of the bearer credential and session cookies.
//! All mutation and reads go through a single mutex; readers get an owned
//! snapshot so they never hold the lock across an `.await`.

use std::path::PathBuf;
use std::sync::Mutex;

use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct TokenFile {
    token: Option<String>,
    exp: Option<i64>,
    cookies: Option<String>,
    issued_at: Option<String>,
}

#[derive(Debug, Clone)]
struct TokenData {
    bearer: String,
    exp: Option<i64>,
    cookies: Option<String>,
    uid: Option<i64>,
    issued_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenStatus {
    NoToken,
    Invalid { expired: bool },
    Valid {
        expires_at: Option<i64>,
        seconds_left: Option<i64>,
        expiring_soon: bool,
    },
}

#[derive(Debug, Deserialize)]
struct JwtPayload {
    exp: Option<i64>,
    data: Option<JwtData>,
}

#[derive(Debug, Deserialize)]
struct JwtData {
    uid: Option<i64>,
}

pub struct TokenStore {
    path: PathBuf,
    warning_threshold_secs: i64,
    inner: Mutex<Option<TokenData>>,
}

impl TokenStore {
    pub fn new(path: PathBuf, warning_threshold_secs: i64) -> Self {
        let loaded = load_from_disk(&path);
        Self {
            path,
            warning_threshold_secs,
            inner: Mutex::new(loaded),
        }
    }

    /// Decode the bearer's middle segment and persist it. Fails without mutating
    /// state if the token is malformed (spec §4.B failure mode).
    pub fn set(&self, bearer: String, cookies: Option<String>) -> Result<Option<i64>> {
        let payload = decode_jwt_payload(&bearer)?;

        let data = TokenData {
            bearer,
            exp: payload.exp,
            cookies,
            uid: payload.data.and_then(|d| d.uid),
            issued_at: chrono::Utc::now(),
        };
        let exp = data.exp;

        {
            let mut guard = self.inner.lock().expect("token store mutex poisoned");
            *guard = Some(data);
        }
        self.persist();
        Ok(exp)
    }

    /// Returns the bearer iff present and not expired. Unknown `exp` is treated as valid.
    pub fn get_valid(&self) -> Option<String> {
        let guard = self.inner.lock().expect("token store mutex poisoned");
        match guard.as_ref() {
            Some(t) if !is_expired(t.exp) => Some(t.bearer.clone()),
            _ => None,
        }
    }

    pub fn get_cookies(&self) -> Option<String> {
        let guard = self.inner.lock().expect("token store mutex poisoned");
        guard.as_ref().and_then(|t| t.cookies.clone())
    }

    pub fn get_user_id(&self) -> Option<i64> {
        let guard = self.inner.lock().expect("token store mutex poisoned");
        guard.as_ref().and_then(|t| t.uid)
    }

    pub fn status(&self) -> TokenStatus {
        let guard = self.inner.lock().expect("token store mutex poisoned");
        match guard.as_ref() {
            None => TokenStatus::NoToken,
            Some(t) => {
                if is_expired(t.exp) {
                    TokenStatus::Invalid { expired: true }
                } else {
                    let seconds_left = t.exp.map(|e| (e - chrono::Utc::now().timestamp()).max(0));
                    let expiring_soon = seconds_left
                        .map(|s| s < self.warning_threshold_secs)
                        .unwrap_or(false);
                    TokenStatus::Valid {
                        expires_at: t.exp,
                        seconds_left,
                        expiring_soon,
                    }
                }
            }
        }
    }

    /// Clears all fields and persists. Called by consumers on 401/403.
    pub fn mark_invalid(&self) {
        {
            let mut guard = self.inner.lock().expect("token store mutex poisoned");
            *guard = None;
        }
        self.persist();
    }

    async fn fetch_trading_key(&self, client: &reqwest::Client, url: &str) -> Result<Option<String>> {
        let Some(bearer) = self.get_valid() else {
            return Ok(None);
        };

        let resp = client
            .get(url)
            .header("Authorization", format!("Bearer {bearer}"))
            .timeout(std::time::Duration::from_secs(10))
            .send()
            .await?;

        if resp.status().as_u16() == 401 {
            warn!("trading key fetch got 401, marking token invalid");
            self.mark_invalid();
            return Ok(None);
        }

        let body: serde_json::Value = resp.json().await?;
        let key = body
            .get("data")
            .and_then(|d| d.get("key"))
            .and_then(|k| k.as_str())
            .map(|s| s.to_string());
        Ok(key)
    }

    /// Public wrapper matching spec §4.B `fetch_trading_key()`: fetches via the
    /// websocket-key endpoint, returns `None` on 401 (after marking the token
    /// invalid) or any other failure to obtain a key.
    pub async fn fetch_trading_key_or_none(&self, client: &reqwest::Client, url: &str) -> Option<String> {
        match self.fetch_trading_key(client, url).await {
            Ok(key) => key,
            Err(e) => {
                error!("failed to fetch trading key: {e}");
                None
            }
        }
    }

    fn persist(&self) {
        let guard = self.inner.lock().expect("token store mutex poisoned");
        let file = match guard.as_ref() {
            Some(t) => TokenFile {
                token: Some(t.bearer.clone()),
                exp: t.exp,
                cookies: t.cookies.clone(),
                issued_at: Some(t.issued_at.to_rfc3339()),
            },
            None => TokenFile::default(),
        };
        drop(guard);

        if let Some(parent) = self.path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                error!("failed to create token store directory: {e}");
                return;
            }
        }
        match serde_json::to_vec_pretty(&file) {
            Ok(bytes) => {
                if let Err(e) = std::fs::write(&self.path, bytes) {
                    error!("failed to persist token store: {e}");
                }
            }
            Err(e) => error!("failed to serialize token store: {e}"),
        }
    }
}

fn is_expired(exp: Option<i64>) -> bool {
    match exp {
        None => false,
        Some(e) => chrono::Utc::now().timestamp() >= e,
    }
}

fn decode_jwt_payload(bearer: &str) -> Result<JwtPayload> {
    let parts: Vec<&str> = bearer.split('.').collect();
    if parts.len() != 3 {
        return Err(AppError::AuthInvalid(
            "bearer is not a 3-segment JWT-shaped token".to_string(),
        ));
    }

    let mut payload_b64 = parts[1].to_string();
    let padding_needed = (4 - payload_b64.len() % 4) % 4;
    payload_b64.extend(std::iter::repeat('=').take(padding_needed));

    let decoded = base64::engine::general_purpose::URL_SAFE
        .decode(payload_b64.as_bytes())
        .map_err(|e| AppError::AuthInvalid(format!("bad base64url in bearer payload: {e}")))?;

    serde_json::from_slice(&decoded)
        .map_err(|e| AppError::AuthInvalid(format!("bearer payload is not valid JSON: {e}")))
}

fn load_from_disk(path: &PathBuf) -> Option<TokenData> {
    let bytes = std::fs::read(path).ok()?;
    let file: TokenFile = match serde_json::from_slice(&bytes) {
        Ok(f) => f,
        Err(e) => {
            warn!("token store file is corrupt, starting empty: {e}");
            return None;
        }
    };
    let token = file.token?;
    let payload = decode_jwt_payload(&token).ok()?;
    info!("loaded persisted token from {}", path.display());
    Some(TokenData {
        bearer: token,
        exp: file.exp.or(payload.exp),
        cookies: file.cookies,
        uid: payload.data.and_then(|d| d.uid),
        issued_at: file
            .issued_at
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(&s).ok())
            .map(|d| d.with_timezone(&chrono::Utc))
            .unwrap_or_else(chrono::Utc::now),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// header.payload.signature with payload = {"exp": <epoch>, "data": {"uid": 42}}
    fn make_bearer(exp: i64, uid: i64) -> String {
        let payload = serde_json::json!({ "exp": exp, "data": { "uid": uid } });
        let payload_b64 =
            base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(payload.to_string());
        format!("header.{payload_b64}.sig")
    }

    #[test]
    fn set_then_valid_until_expiry() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("token.json"), 600);
        let future_exp = chrono::Utc::now().timestamp() + 3600;
        let bearer = make_bearer(future_exp, 42);

        store.set(bearer.clone(), None).unwrap();
        assert_eq!(store.get_valid(), Some(bearer));
        assert_eq!(store.get_user_id(), Some(42));
        assert!(matches!(store.status(), TokenStatus::Valid { .. }));
    }

    #[test]
    fn past_expiry_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("token.json"), 600);
        let past_exp = chrono::Utc::now().timestamp() - 10;
        let bearer = make_bearer(past_exp, 1);

        store.set(bearer, None).unwrap();
        assert_eq!(store.get_valid(), None);
        assert!(matches!(
            store.status(),
            TokenStatus::Invalid { expired: true }
        ));
    }

    #[test]
    fn malformed_bearer_rejected_without_mutation() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("token.json"), 600);
        assert!(store.set("not-a-jwt".to_string(), None).is_err());
        assert_eq!(store.status(), TokenStatus::NoToken);
    }

    #[test]
    fn mark_invalid_clears_everything() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("token.json"), 600);
        let exp = chrono::Utc::now().timestamp() + 3600;
        store.set(make_bearer(exp, 7), Some("sess=abc".to_string())).unwrap();
        store.mark_invalid();
        assert_eq!(store.get_valid(), None);
        assert_eq!(store.get_cookies(), None);
        assert_eq!(store.status(), TokenStatus::NoToken);
    }

    #[test]
    fn expiring_soon_band() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("token.json"), 600);
        let soon_exp = chrono::Utc::now().timestamp() + 100;
        store.set(make_bearer(soon_exp, 1), None).unwrap();
        match store.status() {
            TokenStatus::Valid { expiring_soon, .. } => assert!(expiring_soon),
            other => panic!("expected Valid, got {other:?}"),
        }
    }
}
