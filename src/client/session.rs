use anyhow::{bail, Context};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::auth::dto::{LoginResponse, RefreshResponse};

/// Client-side session lifecycle. Protected views render only once the
/// guard reaches `Authenticated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unknown,
    Verifying,
    Authenticated,
    Unauthenticated,
}

struct SessionInner {
    state: SessionState,
    access_token: Option<String>,
}

/// Holds the access token in memory only; the refresh token never leaves
/// the HTTP client's cookie store. On first use the guard attempts one
/// cookie-based refresh, and concurrent callers coalesce on that single
/// attempt instead of issuing parallel refreshes.
pub struct SessionGuard {
    http: reqwest::Client,
    base_url: String,
    inner: Mutex<SessionInner>,
}

impl SessionGuard {
    pub fn new(base_url: impl Into<String>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .cookie_store(true)
            .build()
            .context("build http client")?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            inner: Mutex::new(SessionInner {
                state: SessionState::Unknown,
                access_token: None,
            }),
        })
    }

    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.state
    }

    pub async fn access_token(&self) -> Option<String> {
        self.inner.lock().await.access_token.clone()
    }

    /// Store a token obtained by the login surface.
    pub async fn set_session(&self, access_token: impl Into<String>) {
        let mut inner = self.inner.lock().await;
        inner.access_token = Some(access_token.into());
        inner.state = SessionState::Authenticated;
    }

    pub async fn clear_session(&self) {
        let mut inner = self.inner.lock().await;
        inner.access_token = None;
        inner.state = SessionState::Unauthenticated;
    }

    pub async fn login(&self, email: &str, password: &str) -> anyhow::Result<LoginResponse> {
        let response = self
            .http
            .post(format!("{}/login", self.base_url))
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await
            .context("login request")?;
        if !response.status().is_success() {
            bail!("login rejected: {}", response.status());
        }
        let body: LoginResponse = response.json().await.context("login response body")?;
        self.set_session(body.access_token.clone()).await;
        Ok(body)
    }

    pub async fn logout(&self, user_id: Uuid) -> anyhow::Result<()> {
        let response = self
            .http
            .post(format!("{}/logout/{}", self.base_url, user_id))
            .send()
            .await
            .context("logout request")?;
        if !response.status().is_success() {
            warn!(status = %response.status(), "logout request failed");
        }
        self.clear_session().await;
        Ok(())
    }

    /// Resolve the session before rendering protected content. The
    /// cookie-based refresh runs at most once: callers arriving while it is
    /// in flight wait for the same attempt, and a failed attempt leaves the
    /// guard `Unauthenticated` (the caller redirects to the login surface)
    /// without retrying on its own.
    pub async fn ensure_session(&self) -> SessionState {
        let mut inner = self.inner.lock().await;
        match inner.state {
            SessionState::Authenticated | SessionState::Unauthenticated => return inner.state,
            SessionState::Unknown | SessionState::Verifying => {}
        }
        if inner.access_token.is_some() {
            inner.state = SessionState::Authenticated;
            return inner.state;
        }

        inner.state = SessionState::Verifying;
        match self.request_refresh().await {
            Ok(token) => {
                debug!("session refreshed");
                inner.access_token = Some(token);
                inner.state = SessionState::Authenticated;
            }
            Err(e) => {
                debug!(error = %e, "session refresh failed");
                inner.access_token = None;
                inner.state = SessionState::Unauthenticated;
            }
        }
        inner.state
    }

    async fn request_refresh(&self) -> anyhow::Result<String> {
        let response = self
            .http
            .post(format!("{}/token/refresh", self.base_url))
            .send()
            .await
            .context("refresh request")?;
        if response.status() != StatusCode::OK {
            bail!("refresh rejected: {}", response.status());
        }
        let body: RefreshResponse = response.json().await.context("refresh response body")?;
        Ok(body.new_access_token)
    }

    /// An access token can expire mid-session; the observed 401 triggers
    /// one more cookie-based refresh before giving up.
    async fn refresh_after_unauthorized(&self) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().await;
        inner.state = SessionState::Verifying;
        match self.request_refresh().await {
            Ok(token) => {
                inner.access_token = Some(token);
                inner.state = SessionState::Authenticated;
                Ok(())
            }
            Err(e) => {
                inner.access_token = None;
                inner.state = SessionState::Unauthenticated;
                Err(e)
            }
        }
    }

    /// GET an authenticated JSON resource, retrying once through a refresh
    /// when the server answers 401.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> anyhow::Result<T> {
        if self.ensure_session().await != SessionState::Authenticated {
            bail!("not authenticated");
        }
        let mut response = self.send_authenticated(path).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            self.refresh_after_unauthorized()
                .await
                .context("session expired")?;
            response = self.send_authenticated(path).await?;
        }
        if !response.status().is_success() {
            bail!("request failed: {}", response.status());
        }
        response.json().await.context("response body")
    }

    async fn send_authenticated(&self, path: &str) -> anyhow::Result<reqwest::Response> {
        let token = self.access_token().await.context("no access token")?;
        self.http
            .get(format!("{}{}", self.base_url, path))
            .bearer_auth(token)
            .send()
            .await
            .context("authenticated request")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        extract::State,
        http::HeaderMap,
        response::IntoResponse,
        routing::{get, post},
        Json, Router,
    };
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    async fn spawn_server(router: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn concurrent_triggers_share_one_refresh() {
        let hits = Arc::new(AtomicUsize::new(0));
        let router = Router::new()
            .route(
                "/token/refresh",
                post(|State(hits): State<Arc<AtomicUsize>>| async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    Json(serde_json::json!({ "newAccessToken": "tok-1" }))
                }),
            )
            .with_state(hits.clone());
        let addr = spawn_server(router).await;

        let guard = SessionGuard::new(format!("http://{addr}")).unwrap();
        let (a, b, c) = tokio::join!(
            guard.ensure_session(),
            guard.ensure_session(),
            guard.ensure_session()
        );
        assert_eq!(a, SessionState::Authenticated);
        assert_eq!(b, SessionState::Authenticated);
        assert_eq!(c, SessionState::Authenticated);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(guard.access_token().await.as_deref(), Some("tok-1"));
    }

    #[tokio::test]
    async fn failed_refresh_settles_unauthenticated_without_retry() {
        let hits = Arc::new(AtomicUsize::new(0));
        let router = Router::new()
            .route(
                "/token/refresh",
                post(|State(hits): State<Arc<AtomicUsize>>| async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    StatusCode::UNAUTHORIZED
                }),
            )
            .with_state(hits.clone());
        let addr = spawn_server(router).await;

        let guard = SessionGuard::new(format!("http://{addr}")).unwrap();
        assert_eq!(guard.ensure_session().await, SessionState::Unauthenticated);
        // A settled failure is terminal until the login surface intervenes.
        assert_eq!(guard.ensure_session().await, SessionState::Unauthenticated);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(guard.access_token().await, None);
    }

    #[tokio::test]
    async fn get_json_refreshes_once_after_a_401() {
        let router = Router::new()
            .route(
                "/token/refresh",
                post(|| async { Json(serde_json::json!({ "newAccessToken": "fresh" })) }),
            )
            .route(
                "/users/list",
                get(|headers: HeaderMap| async move {
                    let authorized = headers
                        .get(axum::http::header::AUTHORIZATION)
                        .and_then(|v| v.to_str().ok())
                        .map(|v| v == "Bearer fresh")
                        .unwrap_or(false);
                    if authorized {
                        Json(serde_json::json!(["maria"])).into_response()
                    } else {
                        StatusCode::UNAUTHORIZED.into_response()
                    }
                }),
            );
        let addr = spawn_server(router).await;

        let guard = SessionGuard::new(format!("http://{addr}")).unwrap();
        guard.set_session("stale").await;

        let users: Vec<String> = guard.get_json("/users/list").await.unwrap();
        assert_eq!(users, vec!["maria".to_string()]);
        assert_eq!(guard.access_token().await.as_deref(), Some("fresh"));
        assert_eq!(guard.state().await, SessionState::Authenticated);
    }

    #[tokio::test]
    async fn clear_session_goes_unauthenticated() {
        let guard = SessionGuard::new("http://127.0.0.1:1").unwrap();
        guard.set_session("tok").await;
        assert_eq!(guard.state().await, SessionState::Authenticated);
        guard.clear_session().await;
        assert_eq!(guard.state().await, SessionState::Unauthenticated);
        assert_eq!(guard.access_token().await, None);
    }
}
