//! API key authentication
//!
//! A key is read from the `X-API-Key` header, falling back to the `key` query
//! parameter. It is valid when it equals the admin key or one of the
//! configured keys. Comparisons are constant-time.

use axum::{extract::FromRequestParts, http::request::Parts};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tgstore_core::AppError;

use crate::error::HttpAppError;
use crate::state::{AppState, AuthKeys};

pub const API_KEY_HEADER: &str = "X-API-Key";
const API_KEY_QUERY_PARAM: &str = "key";

/// Authenticated caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiKey {
    pub key: String,
    pub is_admin: bool,
}

impl ApiKey {
    /// Owner filter for catalog queries: `None` lets the admin see everything.
    pub fn owner_filter(&self) -> Option<&str> {
        if self.is_admin {
            None
        } else {
            Some(&self.key)
        }
    }

    /// Admins may act on any file, other keys only on files they uploaded.
    pub fn can_manage(&self, owner_key: Option<&str>) -> bool {
        self.is_admin || owner_key.is_some_and(|owner| secure_compare(owner, &self.key))
    }
}

pub fn secure_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

fn authenticate(keys: &AuthKeys, presented: &str) -> Option<ApiKey> {
    if secure_compare(presented, &keys.admin_key) {
        return Some(ApiKey {
            key: presented.to_string(),
            is_admin: true,
        });
    }

    // Scan every key so timing does not reveal which one matched
    let matched = keys
        .api_keys
        .iter()
        .fold(false, |found, key| secure_compare(presented, key) | found);
    matched.then(|| ApiKey {
        key: presented.to_string(),
        is_admin: false,
    })
}

fn presented_key(parts: &Parts) -> Option<String> {
    if let Some(value) = parts
        .headers
        .get(API_KEY_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return Some(value.to_string());
    }

    parts.uri.query().and_then(|query| {
        query.split('&').find_map(|pair| {
            let (name, value) = pair.split_once('=')?;
            (name == API_KEY_QUERY_PARAM && !value.is_empty()).then(|| {
                percent_encoding::percent_decode_str(value)
                    .decode_utf8_lossy()
                    .into_owned()
            })
        })
    })
}

impl FromRequestParts<Arc<AppState>> for ApiKey {
    type Rejection = HttpAppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let presented = presented_key(parts)
            .ok_or_else(|| AppError::Unauthorized("API key required".to_string()))?;

        match authenticate(&state.auth, &presented) {
            Some(api_key) => Ok(api_key),
            None => {
                tracing::debug!(path = %parts.uri.path(), "Rejected invalid API key");
                Err(AppError::Forbidden("Invalid API key".to_string()).into())
            }
        }
    }
}
