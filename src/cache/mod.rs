use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    http::{header::CONTENT_TYPE, Method, StatusCode},
    middleware::Next,
    response::Response,
};
use log::{debug, trace};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::auth::AuthenticatedUser;
use crate::shared::state::AppState;

#[derive(Clone)]
struct CacheEntry {
    body: Vec<u8>,
    content_type: String,
    path: String,
    inserted_at: Instant,
}

/// GET-only response memoization keyed by user id + request URI. Entries
/// expire after `ttl`; when the map grows past `max_entries` a sweep drops
/// expired entries first, then the oldest.
#[derive(Clone)]
pub struct ResponseCache {
    inner: Arc<RwLock<HashMap<String, CacheEntry>>>,
    ttl: Duration,
    max_entries: usize,
}

impl ResponseCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            ttl,
            max_entries,
        }
    }

    pub fn cache_key(user_id: &str, uri: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(user_id.as_bytes());
        hasher.update(b":");
        hasher.update(uri.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub async fn get(&self, key: &str) -> Option<(Vec<u8>, String)> {
        let map = self.inner.read().await;
        let entry = map.get(key)?;
        if entry.inserted_at.elapsed() >= self.ttl {
            return None;
        }
        Some((entry.body.clone(), entry.content_type.clone()))
    }

    pub async fn insert(&self, key: String, path: String, body: Vec<u8>, content_type: String) {
        let mut map = self.inner.write().await;
        map.insert(
            key,
            CacheEntry {
                body,
                content_type,
                path,
                inserted_at: Instant::now(),
            },
        );

        if map.len() > self.max_entries {
            let ttl = self.ttl;
            map.retain(|_, entry| entry.inserted_at.elapsed() < ttl);

            if map.len() > self.max_entries {
                let mut by_age: Vec<(String, Instant)> = map
                    .iter()
                    .map(|(k, e)| (k.clone(), e.inserted_at))
                    .collect();
                by_age.sort_by_key(|(_, inserted)| *inserted);
                let excess = map.len() - self.max_entries;
                for (key, _) in by_age.into_iter().take(excess) {
                    map.remove(&key);
                }
            }
            debug!("response cache swept, {} entries remain", map.len());
        }
    }

    /// Drops every cached response for a resource, e.g. "/api/leads".
    pub async fn invalidate_prefix(&self, prefix: &str) {
        self.invalidate_prefixes(&[prefix]).await;
    }

    /// Drops cached responses for several resources at once. Mutations that
    /// reach the database outside a /api/<resource> request (copilot,
    /// Telegram) invalidate through this.
    pub async fn invalidate_prefixes(&self, prefixes: &[&str]) {
        let mut map = self.inner.write().await;
        map.retain(|_, entry| !prefixes.iter().any(|p| entry.path.starts_with(p)));
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }
}

/// "/api/leads/42/move" -> "/api/leads"
fn resource_prefix(path: &str) -> String {
    path.split('/')
        .filter(|s| !s.is_empty())
        .take(2)
        .fold(String::new(), |mut acc, seg| {
            acc.push('/');
            acc.push_str(seg);
            acc
        })
}

pub async fn response_cache_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let uri = request.uri().to_string();

    if method != Method::GET {
        let response = next.run(request).await;
        if response.status().is_success() {
            let prefix = resource_prefix(&path);
            state.response_cache.invalidate_prefix(&prefix).await;
            trace!("invalidated cache prefix {prefix}");
        }
        return response;
    }

    let user_id = request
        .extensions()
        .get::<AuthenticatedUser>()
        .map(|u| u.user_id.to_string())
        .unwrap_or_default();
    let key = ResponseCache::cache_key(&user_id, &uri);

    if let Some((body, content_type)) = state.response_cache.get(&key).await {
        trace!("cache hit for {uri}");
        return Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, content_type)
            .header("x-cache", "hit")
            .body(Body::from(body))
            .unwrap_or_else(|_| Response::new(Body::empty()));
    }

    let response = next.run(request).await;

    if response.status() != StatusCode::OK {
        return response;
    }
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    if !content_type.starts_with("application/json") {
        return response;
    }

    let (parts, body) = response.into_parts();
    let bytes = match to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(_) => return Response::from_parts(parts, Body::empty()),
    };

    state
        .response_cache
        .insert(key, path, bytes.to_vec(), content_type)
        .await;

    Response::from_parts(parts, Body::from(bytes))
}
