//! Bearer-token session
//!
//! The credential lives in a single state cell behind one async mutex:
//!
//! ```text
//! Unauthenticated -> Refreshing -> Authenticated -> (near expiry) -> Refreshing -> ...
//! ```
//!
//! The mutex is only held to read or swap the state, never across the token
//! request. The caller that moves the cell to `Refreshing` performs the
//! request; everyone arriving meanwhile waits on a watch channel and then
//! re-checks the cell.

use adprep_core::{ApiConfig, PipelineError, PipelineResult};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};

use crate::gateway::HttpGateway;

const TOKEN_PATH: &str = "/auth/tokens";

#[derive(Clone)]
struct SessionCredential {
    bearer_token: String,
    expires_at: DateTime<Utc>,
}

impl SessionCredential {
    /// Usable for signing: more than `margin` left before expiry.
    fn is_fresh(&self, now: DateTime<Utc>, margin: chrono::Duration) -> bool {
        now < self.expires_at - margin
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum RefreshStatus {
    Pending,
    Done,
    Failed(String),
}

enum SessionState {
    Unauthenticated,
    Authenticated(SessionCredential),
    Refreshing(watch::Receiver<RefreshStatus>),
}

enum Next {
    Ready(String),
    Wait(watch::Receiver<RefreshStatus>),
    Refresh(watch::Sender<RefreshStatus>),
}

#[derive(Serialize)]
struct TokenRequest<'a> {
    api_key: &'a str,
}

#[derive(Deserialize)]
struct TokenResponse {
    token: String,
}

pub struct AuthenticatedSession {
    gateway: HttpGateway,
    api_key: String,
    ttl: chrono::Duration,
    margin: chrono::Duration,
    state: Mutex<SessionState>,
}

impl AuthenticatedSession {
    pub fn new(
        gateway: HttpGateway,
        api_key: impl Into<String>,
        ttl: chrono::Duration,
        margin: chrono::Duration,
    ) -> Self {
        Self {
            gateway,
            api_key: api_key.into(),
            ttl,
            margin,
            state: Mutex::new(SessionState::Unauthenticated),
        }
    }

    pub fn from_config(gateway: HttpGateway, config: &ApiConfig, api_key: &str) -> Self {
        Self::new(gateway, api_key, config.token_ttl, config.refresh_margin)
    }

    pub fn gateway(&self) -> &HttpGateway {
        &self.gateway
    }

    /// Make sure a fresh credential is held, refreshing at most once across
    /// all concurrent callers.
    pub async fn ensure_authenticated(&self) -> PipelineResult<()> {
        self.bearer_token().await.map(|_| ())
    }

    /// Drop the held credential so the next call requests a new one.
    pub async fn invalidate(&self) {
        let mut state = self.state.lock().await;
        if matches!(*state, SessionState::Authenticated(_)) {
            *state = SessionState::Unauthenticated;
        }
    }

    /// POST JSON to an API path, signed with the session's bearer token.
    pub async fn post_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        query: &[(&str, &str)],
        body: &B,
    ) -> PipelineResult<T> {
        let token = self.bearer_token().await?;
        let result = self.gateway.post_json(path, query, body, Some(&token)).await;
        if let Err(PipelineError::Http { status: 401, .. }) = &result {
            self.invalidate().await;
        }
        result
    }

    async fn bearer_token(&self) -> PipelineResult<String> {
        loop {
            let next = {
                let mut state = self.state.lock().await;
                let next = match &*state {
                    SessionState::Authenticated(credential)
                        if credential.is_fresh(Utc::now(), self.margin) =>
                    {
                        Next::Ready(credential.bearer_token.clone())
                    }
                    SessionState::Refreshing(rx) => Next::Wait(rx.clone()),
                    SessionState::Unauthenticated | SessionState::Authenticated(_) => {
                        let (tx, rx) = watch::channel(RefreshStatus::Pending);
                        *state = SessionState::Refreshing(rx);
                        Next::Refresh(tx)
                    }
                };
                next
            };

            match next {
                Next::Ready(token) => return Ok(token),
                Next::Refresh(tx) => return self.refresh(tx).await,
                Next::Wait(mut rx) => {
                    let status = rx
                        .wait_for(|s| *s != RefreshStatus::Pending)
                        .await
                        .map(|s| s.clone());
                    match status {
                        Ok(RefreshStatus::Failed(reason)) => return Err(PipelineError::Auth(reason)),
                        Ok(_) => continue,
                        Err(_) => {
                            // The refreshing caller was dropped mid-request.
                            let mut state = self.state.lock().await;
                            if let SessionState::Refreshing(current) = &*state {
                                if current.same_channel(&rx) {
                                    *state = SessionState::Unauthenticated;
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    async fn refresh(&self, tx: watch::Sender<RefreshStatus>) -> PipelineResult<String> {
        tracing::info!("Requesting bearer token");
        let result = self.request_token().await;

        let mut state = self.state.lock().await;
        match result {
            Ok(credential) => {
                let token = credential.bearer_token.clone();
                tracing::info!(expires_at = %credential.expires_at, "Bearer token acquired");
                *state = SessionState::Authenticated(credential);
                drop(state);
                let _ = tx.send(RefreshStatus::Done);
                Ok(token)
            }
            Err(e) => {
                tracing::error!(error = %e, "Token request failed");
                *state = SessionState::Unauthenticated;
                drop(state);
                let reason = match &e {
                    PipelineError::Auth(reason) => reason.clone(),
                    other => other.to_string(),
                };
                let _ = tx.send(RefreshStatus::Failed(reason));
                Err(e)
            }
        }
    }

    async fn request_token(&self) -> PipelineResult<SessionCredential> {
        let response: TokenResponse = self
            .gateway
            .post_json(
                TOKEN_PATH,
                &[],
                &TokenRequest {
                    api_key: &self.api_key,
                },
                None,
            )
            .await
            .map_err(|e| PipelineError::Auth(format!("token request failed: {}", e)))?;

        if response.token.is_empty() {
            return Err(PipelineError::Auth(
                "token response contained an empty token".to_string(),
            ));
        }

        Ok(SessionCredential {
            bearer_token: response.token,
            expires_at: Utc::now() + self.ttl,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adprep_core::TlsMode;
    use mockito::Matcher;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn session(server: &mockito::Server, ttl: chrono::Duration) -> AuthenticatedSession {
        let gateway =
            HttpGateway::new(&server.url(), Duration::from_secs(5), TlsMode::Strict).unwrap();
        AuthenticatedSession::new(gateway, "secret-key", ttl, chrono::Duration::minutes(5))
    }

    async fn token_mock(server: &mut mockito::Server, hits: usize) -> mockito::Mock {
        server
            .mock("POST", "/auth/tokens")
            .match_body(Matcher::Json(json!({"api_key": "secret-key"})))
            .with_status(200)
            .with_body(r#"{"token": "tok-1"}"#)
            .expect(hits)
            .create_async()
            .await
    }

    #[test]
    fn test_credential_freshness_margin() {
        let now = Utc::now();
        let margin = chrono::Duration::minutes(5);
        let credential = SessionCredential {
            bearer_token: "t".into(),
            expires_at: now + chrono::Duration::minutes(6),
        };
        assert!(credential.is_fresh(now, margin));
        assert!(!credential.is_fresh(now + chrono::Duration::minutes(1), margin));
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_refresh() {
        let mut server = mockito::Server::new_async().await;
        let mock = token_mock(&mut server, 1).await;
        let session = Arc::new(session(&server, chrono::Duration::hours(16)));

        let calls = (0..8).map(|_| {
            let session = session.clone();
            async move { session.ensure_authenticated().await }
        });
        let results = futures::future::join_all(calls).await;

        assert!(results.iter().all(|r| r.is_ok()));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_concurrent_callers_across_tasks() {
        let mut server = mockito::Server::new_async().await;
        let mock = token_mock(&mut server, 1).await;
        let session = Arc::new(session(&server, chrono::Duration::hours(16)));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let session = session.clone();
                tokio::spawn(async move { session.ensure_authenticated().await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_refresh_of_expired_credential() {
        let mut server = mockito::Server::new_async().await;
        let mock = token_mock(&mut server, 1).await;
        let session = Arc::new(session(&server, chrono::Duration::hours(16)));
        *session.state.lock().await = SessionState::Authenticated(SessionCredential {
            bearer_token: "tok-expired".into(),
            expires_at: Utc::now() - chrono::Duration::minutes(1),
        });

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let session = session.clone();
                tokio::spawn(async move { session.bearer_token().await })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "tok-1");
        }

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_valid_credential_is_reused() {
        let mut server = mockito::Server::new_async().await;
        let mock = token_mock(&mut server, 1).await;
        let session = session(&server, chrono::Duration::hours(16));

        session.ensure_authenticated().await.unwrap();
        session.ensure_authenticated().await.unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_near_expiry_forces_refresh() {
        let mut server = mockito::Server::new_async().await;
        let mock = token_mock(&mut server, 2).await;
        // A lifetime equal to the margin is near expiry from the start.
        let session = session(&server, chrono::Duration::minutes(5));

        session.ensure_authenticated().await.unwrap();
        session.ensure_authenticated().await.unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_failed_refresh_does_not_poison_session() {
        let mut server = mockito::Server::new_async().await;
        let rejected = server
            .mock("POST", "/auth/tokens")
            .with_status(401)
            .with_body("invalid api key")
            .expect(1)
            .create_async()
            .await;
        let session = session(&server, chrono::Duration::hours(16));

        let err = session.ensure_authenticated().await.unwrap_err();
        assert_eq!(err.error_code(), "AUTH_FAILURE");
        assert!(err.is_batch_fatal());
        assert!(err.to_string().contains("invalid api key"));
        rejected.assert_async().await;
        rejected.remove_async().await;

        let accepted = token_mock(&mut server, 1).await;
        session.ensure_authenticated().await.unwrap();
        accepted.assert_async().await;
    }

    #[tokio::test]
    async fn test_waiters_see_refresh_failure() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/auth/tokens")
            .with_status(403)
            .create_async()
            .await;
        let session = Arc::new(session(&server, chrono::Duration::hours(16)));

        let calls = (0..4).map(|_| {
            let session = session.clone();
            async move { session.ensure_authenticated().await }
        });
        let results = futures::future::join_all(calls).await;

        for result in results {
            assert!(matches!(result, Err(PipelineError::Auth(_))));
        }
    }

    #[tokio::test]
    async fn test_post_json_is_signed() {
        let mut server = mockito::Server::new_async().await;
        let _tokens = token_mock(&mut server, 1).await;
        let mock = server
            .mock("POST", "/echo")
            .match_header("authorization", "Bearer tok-1")
            .with_status(200)
            .with_body(r#"{"ok": true}"#)
            .create_async()
            .await;
        let session = session(&server, chrono::Duration::hours(16));

        let value: serde_json::Value = session.post_json("/echo", &[], &json!({})).await.unwrap();

        assert_eq!(value["ok"], true);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_unauthorized_response_invalidates_credential() {
        let mut server = mockito::Server::new_async().await;
        let tokens = token_mock(&mut server, 2).await;
        let _echo = server
            .mock("POST", "/echo")
            .with_status(401)
            .create_async()
            .await;
        let session = session(&server, chrono::Duration::hours(16));

        let result: PipelineResult<serde_json::Value> =
            session.post_json("/echo", &[], &json!({})).await;
        assert!(result.is_err());
        session.ensure_authenticated().await.unwrap();

        tokens.assert_async().await;
    }
}
