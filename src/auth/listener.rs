//! Loopback redirect listener for the PKCE flow.
//!
//! Contract:
//! - binds one loopback port before the browser is launched, so a busy port
//!   fails fast with [`Error::ListenerBindFailed`];
//! - serves requests until one carries `code` or `error`; anything else
//!   (favicon fetches, preconnects) gets a 404 and is ignored;
//! - completes exactly once through a oneshot channel, bounded by a timeout;
//! - unbinds on every exit path (success, denial, timeout, drop).

use std::collections::HashMap;
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

use crate::error::{Error, Result};

/// How long open browser connections may hold the server after completion.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

const SUCCESS_PAGE: &str =
    "Authentication successful! You can close this window and return to the app.";
const FAILURE_PAGE: &str = "Authentication failed. You can close this window.";

/// What a single redirect request carried.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Callback {
    Code { code: String, state: Option<String> },
    Denied(String),
    Unrelated,
}

impl Callback {
    fn from_query(params: &HashMap<String, String>) -> Self {
        if let Some(error) = params.get("error") {
            return Callback::Denied(match params.get("error_description") {
                Some(description) => format!("{}: {}", error, description),
                None => error.clone(),
            });
        }
        match params.get("code") {
            Some(code) if !code.is_empty() => Callback::Code {
                code: code.clone(),
                state: params.get("state").cloned(),
            },
            _ => Callback::Unrelated,
        }
    }
}

type ServerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// A bound, not yet completed redirect listener.
pub struct RedirectListener {
    server: ServerFuture,
    shutdown: oneshot::Sender<()>,
    callback: oneshot::Receiver<Callback>,
    port: u16,
}

impl RedirectListener {
    /// Binds `127.0.0.1:<port>`. Port 0 picks a free port.
    ///
    /// The socket is bound immediately; requests queue until
    /// [`wait_for_code`](Self::wait_for_code) starts serving.
    pub async fn bind(port: u16) -> Result<Self> {
        let (callback_tx, callback) = oneshot::channel();
        let callback_tx = Arc::new(Mutex::new(Some(callback_tx)));
        let (shutdown, shutdown_rx) = oneshot::channel::<()>();

        let redirect = warp::get()
            .and(warp::path::end())
            .and(warp::query::<HashMap<String, String>>())
            .map(move |params: HashMap<String, String>| {
                let callback = Callback::from_query(&params);
                let (status, body) = match &callback {
                    Callback::Code { .. } => (StatusCode::OK, SUCCESS_PAGE),
                    Callback::Denied(_) => (StatusCode::OK, FAILURE_PAGE),
                    Callback::Unrelated => {
                        tracing::debug!("ignoring redirect without code or error");
                        return warp::reply::with_status("Not Found", StatusCode::NOT_FOUND)
                            .into_response();
                    }
                };
                // Only the first callback completes the listener.
                if let Ok(mut slot) = callback_tx.lock() {
                    if let Some(tx) = slot.take() {
                        let _ = tx.send(callback);
                    }
                }
                warp::reply::with_status(body, status).into_response()
            })
            .recover(not_found);

        let (addr, server) = warp::serve(redirect)
            .try_bind_with_graceful_shutdown(([127, 0, 0, 1], port), async move {
                shutdown_rx.await.ok();
            })
            .map_err(|e| Error::ListenerBindFailed {
                port,
                reason: e.to_string(),
            })?;

        tracing::debug!(port = addr.port(), "redirect listener bound");
        Ok(Self {
            server: Box::pin(server),
            shutdown,
            callback,
            port: addr.port(),
        })
    }

    /// Port actually bound.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Redirect URI registered with the authorization request.
    pub fn redirect_uri(&self) -> String {
        format!("http://localhost:{}", self.port)
    }

    /// Waits for the redirect and returns the authorization code.
    ///
    /// Fails with [`Error::AuthDenied`] when the provider reports an error,
    /// when `state` does not match, or when nothing arrives within `wait`.
    pub async fn wait_for_code(self, expected_state: &str, wait: Duration) -> Result<String> {
        let Self {
            server,
            shutdown,
            callback,
            port,
        } = self;
        let mut serving = tokio::spawn(server);

        let outcome = tokio::time::timeout(wait, callback).await;

        let _ = shutdown.send(());
        if tokio::time::timeout(SHUTDOWN_GRACE, &mut serving).await.is_err() {
            tracing::debug!(port, "redirect listener did not drain, aborting");
            serving.abort();
            let _ = serving.await;
        }
        tracing::debug!(port, "redirect listener closed");

        match outcome {
            Ok(Ok(Callback::Code { code, state })) => {
                if state.as_deref() == Some(expected_state) {
                    Ok(code)
                } else {
                    Err(Error::AuthDenied(
                        "state parameter mismatch in redirect".to_string(),
                    ))
                }
            }
            Ok(Ok(Callback::Denied(reason))) => Err(Error::AuthDenied(reason)),
            Ok(Ok(Callback::Unrelated)) | Ok(Err(_)) => Err(Error::AuthDenied(
                "redirect listener stopped before receiving a code".to_string(),
            )),
            Err(_) => Err(Error::AuthDenied(format!(
                "timed out after {}s waiting for the browser redirect",
                wait.as_secs()
            ))),
        }
    }
}

async fn not_found(_: Rejection) -> std::result::Result<impl Reply, Infallible> {
    Ok(warp::reply::with_status("Not Found", StatusCode::NOT_FOUND))
}

impl std::fmt::Debug for RedirectListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedirectListener")
            .field("port", &self.port)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    async fn send(port: u16, target: &str) -> reqwest::Response {
        reqwest::get(format!("http://127.0.0.1:{}{}", port, target))
            .await
            .unwrap()
    }

    #[test]
    fn parses_code_and_state() {
        assert_eq!(
            Callback::from_query(&query(&[("code", "4/0Abc"), ("state", "xyz"), ("scope", "a")])),
            Callback::Code {
                code: "4/0Abc".into(),
                state: Some("xyz".into())
            }
        );
    }

    #[test]
    fn parses_provider_error() {
        assert_eq!(
            Callback::from_query(&query(&[("error", "access_denied"), ("state", "xyz")])),
            Callback::Denied("access_denied".into())
        );
        assert_eq!(
            Callback::from_query(&query(&[
                ("error", "access_denied"),
                ("error_description", "user declined"),
            ])),
            Callback::Denied("access_denied: user declined".into())
        );
    }

    #[test]
    fn other_queries_are_unrelated() {
        assert_eq!(Callback::from_query(&query(&[])), Callback::Unrelated);
        assert_eq!(
            Callback::from_query(&query(&[("code", ""), ("state", "xyz")])),
            Callback::Unrelated
        );
    }

    #[tokio::test]
    async fn captures_code_after_ignoring_favicon() {
        let listener = RedirectListener::bind(0).await.unwrap();
        let port = listener.port();
        assert_eq!(listener.redirect_uri(), format!("http://localhost:{}", port));

        let wait = tokio::spawn(async move {
            listener
                .wait_for_code("expected", Duration::from_secs(5))
                .await
        });

        let favicon = send(port, "/favicon.ico").await;
        assert_eq!(favicon.status(), reqwest::StatusCode::NOT_FOUND);

        let bare = send(port, "/").await;
        assert_eq!(bare.status(), reqwest::StatusCode::NOT_FOUND);

        let ok = send(port, "/?code=the-code&state=expected").await;
        assert_eq!(ok.status(), reqwest::StatusCode::OK);
        assert_eq!(ok.text().await.unwrap(), SUCCESS_PAGE);

        assert_eq!(wait.await.unwrap().unwrap(), "the-code");

        // Port is released after completion.
        assert!(RedirectListener::bind(port).await.is_ok());
    }

    #[tokio::test]
    async fn provider_error_is_denied() {
        let listener = RedirectListener::bind(0).await.unwrap();
        let port = listener.port();
        let wait = tokio::spawn(async move {
            listener
                .wait_for_code("expected", Duration::from_secs(5))
                .await
        });

        let page = send(port, "/?error=access_denied&state=expected").await;
        assert_eq!(page.text().await.unwrap(), FAILURE_PAGE);
        assert_eq!(
            wait.await.unwrap().unwrap_err(),
            Error::AuthDenied("access_denied".into())
        );
    }

    #[tokio::test]
    async fn state_mismatch_is_denied() {
        let listener = RedirectListener::bind(0).await.unwrap();
        let port = listener.port();
        let wait = tokio::spawn(async move {
            listener
                .wait_for_code("expected", Duration::from_secs(5))
                .await
        });

        send(port, "/?code=the-code&state=forged").await;
        assert!(matches!(wait.await.unwrap(), Err(Error::AuthDenied(_))));
    }

    #[tokio::test]
    async fn times_out() {
        let listener = RedirectListener::bind(0).await.unwrap();
        let port = listener.port();

        let err = listener
            .wait_for_code("s", Duration::from_millis(50))
            .await
            .unwrap_err();
        match err {
            Error::AuthDenied(message) => assert!(message.contains("timed out")),
            other => panic!("unexpected error: {other:?}"),
        }

        assert!(RedirectListener::bind(port).await.is_ok());
    }

    #[tokio::test]
    async fn dropping_unbinds() {
        let listener = RedirectListener::bind(0).await.unwrap();
        let port = listener.port();
        drop(listener);

        assert!(RedirectListener::bind(port).await.is_ok());
    }

    #[tokio::test]
    async fn busy_port_fails_to_bind() {
        let first = RedirectListener::bind(0).await.unwrap();
        let err = RedirectListener::bind(first.port()).await.unwrap_err();
        assert!(matches!(err, Error::ListenerBindFailed { port, .. } if port == first.port()));
    }
}
