//! PKCE material and the transient SSO callback listener.
//!
//! The listener is an ephemeral single-route HTTP server on the loopback
//! interface. The identity provider redirects the browser back to it with
//! `code` and `state` query parameters; the first request whose `state`
//! begins with the expected token hands the code back over a oneshot and
//! drains the server.

use std::collections::HashMap;
use std::ops::RangeInclusive;
use std::sync::{Arc, Mutex};

use axum::extract::{Query, State};
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::Rng;
use sha2::{Digest, Sha256};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use url::Url;

use crate::error::{AuthError, AuthResult};

/// Ports probed for the callback listener, in order.
pub const CALLBACK_PORT_RANGE: RangeInclusive<u16> = 8065..=8999;

const TOKEN_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
const TOKEN_LEN: usize = 64;

const CALLBACK_BODY: &str =
    "<html><body>Login received. You can close this tab and return to Keyfold.</body></html>";

/// A 64-character alphanumeric token, used for both the OAuth `state`
/// value and the PKCE code verifier.
pub fn generate_token() -> String {
    let mut rng = OsRng;
    (0..TOKEN_LEN)
        .map(|_| TOKEN_CHARS[rng.gen_range(0..TOKEN_CHARS.len())] as char)
        .collect()
}

/// S256 code challenge for a PKCE verifier (RFC 7636 §4.2).
pub fn code_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// Builds the authorization URL the browser is sent to.
pub fn authorize_url(
    identity_base: &str,
    client_id: &str,
    redirect_uri: &str,
    state: &str,
    challenge: &str,
) -> AuthResult<String> {
    let mut url = Url::parse(&format!("{identity_base}/connect/authorize"))?;
    url.query_pairs_mut()
        .append_pair("client_id", client_id)
        .append_pair("redirect_uri", redirect_uri)
        .append_pair("response_type", "code")
        .append_pair("scope", "api offline_access")
        .append_pair("state", state)
        .append_pair("code_challenge", challenge)
        .append_pair("code_challenge_method", "S256");
    Ok(url.to_string())
}

struct CallbackShared {
    expected_state: String,
    code_tx: Mutex<Option<oneshot::Sender<String>>>,
    done_tx: Mutex<Option<oneshot::Sender<()>>>,
}

/// Handle to a running callback listener.
pub struct SsoListener {
    port: u16,
    task: JoinHandle<()>,
}

impl SsoListener {
    pub fn port(&self) -> u16 {
        self.port
    }

    /// The advertised host matches the bound address exactly; `localhost`
    /// can resolve to `::1` first while the listener only covers v4.
    pub fn redirect_uri(&self) -> String {
        format!("http://127.0.0.1:{}/", self.port)
    }

    /// Stops the listener without waiting for in-flight requests.
    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for SsoListener {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn bind_first_free() -> AuthResult<TcpListener> {
    let last = *CALLBACK_PORT_RANGE.end();
    for port in *CALLBACK_PORT_RANGE.start()..last {
        match TcpListener::bind(("127.0.0.1", port)).await {
            Ok(listener) => return Ok(listener),
            Err(err) => debug!("callback port {port} unavailable ({err}), trying the next one"),
        }
    }
    // A bind failure on the very last port is fatal.
    TcpListener::bind(("127.0.0.1", last))
        .await
        .map_err(|source| AuthError::ListenerBind { port: last, source })
}

/// Binds the callback listener on the first free port in
/// [`CALLBACK_PORT_RANGE`] and starts serving. The returned receiver
/// yields the authorization code of the first request whose `state`
/// begins with `expected_state`.
pub async fn bind_callback_listener(
    expected_state: &str,
) -> AuthResult<(SsoListener, oneshot::Receiver<String>)> {
    let listener = bind_first_free().await?;
    let port = listener
        .local_addr()
        .map_err(|source| AuthError::ListenerBind { port: 0, source })?
        .port();

    let (code_tx, code_rx) = oneshot::channel();
    let (done_tx, done_rx) = oneshot::channel();
    let shared = Arc::new(CallbackShared {
        expected_state: expected_state.to_string(),
        code_tx: Mutex::new(Some(code_tx)),
        done_tx: Mutex::new(Some(done_tx)),
    });

    let app = Router::new()
        .route("/", get(handle_callback))
        .with_state(shared);

    let task = tokio::spawn(async move {
        let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
            let _ = done_rx.await;
        });
        if let Err(err) = serve.await {
            warn!("sso callback listener error: {err}");
        }
    });

    debug!("sso callback listener bound on port {port}");
    Ok((SsoListener { port, task }, code_rx))
}

async fn handle_callback(
    State(shared): State<Arc<CallbackShared>>,
    Query(params): Query<HashMap<String, String>>,
) -> Html<&'static str> {
    let state_matches = params
        .get("state")
        .is_some_and(|s| s.starts_with(&shared.expected_state));

    if state_matches {
        if let Some(code) = params.get("code") {
            let tx = shared.code_tx.lock().expect("callback lock poisoned").take();
            if let Some(tx) = tx {
                let _ = tx.send(code.clone());
                // A matching code has been seen, drain the server.
                if let Some(done) = shared.done_tx.lock().expect("callback lock poisoned").take() {
                    let _ = done.send(());
                }
            }
        }
    } else {
        debug!("ignoring callback request with unexpected state");
    }

    // The browser always gets a 200, even for requests we ignore.
    Html(CALLBACK_BODY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn tokens_are_64_alphanumeric_chars() {
        let token = generate_token();
        assert_eq!(token.len(), 64);
        assert!(token.bytes().all(|b| b.is_ascii_alphanumeric()));
        assert_ne!(generate_token(), token);
    }

    #[test]
    fn code_challenge_matches_rfc_7636_example() {
        // Appendix B of RFC 7636.
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        assert_eq!(
            code_challenge(verifier),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cwk"
        );
    }

    #[test]
    fn authorize_url_carries_all_parameters() {
        let url = authorize_url(
            "https://vault.example.com/identity",
            "desktop",
            "http://127.0.0.1:8065/",
            "statetoken",
            "challenge",
        )
        .unwrap();
        let parsed = Url::parse(&url).unwrap();
        assert_eq!(parsed.path(), "/identity/connect/authorize");
        let pairs: HashMap<_, _> = parsed.query_pairs().into_owned().collect();
        assert_eq!(pairs["client_id"], "desktop");
        assert_eq!(pairs["redirect_uri"], "http://127.0.0.1:8065/");
        assert_eq!(pairs["response_type"], "code");
        assert_eq!(pairs["state"], "statetoken");
        assert_eq!(pairs["code_challenge"], "challenge");
        assert_eq!(pairs["code_challenge_method"], "S256");
    }

    #[tokio::test]
    async fn listener_skips_occupied_ports() {
        let blocker = TcpListener::bind(("127.0.0.1", *CALLBACK_PORT_RANGE.start()))
            .await
            .unwrap();
        let (listener, _rx) = bind_callback_listener("state").await.unwrap();
        assert_ne!(listener.port(), blocker.local_addr().unwrap().port());
        assert!(CALLBACK_PORT_RANGE.contains(&listener.port()));
        assert_eq!(
            listener.redirect_uri(),
            format!("http://127.0.0.1:{}/", listener.port())
        );
        listener.stop();
    }

    async fn fetch(port: u16, path: &str) -> String {
        let mut stream = tokio::net::TcpStream::connect(("127.0.0.1", port))
            .await
            .unwrap();
        let request = format!("GET {path} HTTP/1.1\r\nhost: localhost:{port}\r\nconnection: close\r\n\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn callback_hands_back_code_for_matching_state() {
        let (listener, code_rx) = bind_callback_listener("expected-token").await.unwrap();
        let port = listener.port();

        // Wrong state first, it must be ignored with a 200.
        let response = fetch(port, "/?code=evil&state=attacker").await;
        assert!(response.starts_with("HTTP/1.1 200"));

        let response = fetch(port, "/?code=authcode123&state=expected-token-extra").await;
        assert!(response.starts_with("HTTP/1.1 200"));

        let code = code_rx.await.unwrap();
        assert_eq!(code, "authcode123");
    }
}
