//! The login state machine.
//!
//! Every externally visible step of a login (method choice, SSO redirect,
//! password entry, device OTP, master-password unlock after SSO) is a
//! transition between [`AuthStage`]s. Transitions are validated against a
//! fixed table; anything outside it fails with
//! [`AuthError::IllegalTransition`] and leaves the state untouched.
//! Cancellation is always allowed and bumps a generation counter so that
//! results of network calls still in flight are discarded on arrival.
//!
//! Internally each state is a variant carrying exactly the data that is
//! meaningful in it: the running callback listener while waiting for the
//! SSO reply, the derived credentials while waiting for a device OTP.
//! Leaving a state drops its payload, so nothing lingers "until someone
//! remembers to clear it".

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use keyfold_client::notify::{StateRegistry, SubscriptionId};
use keyfold_client::{ApiClient, ClientConfig, ClientError, PreparedCredentials, SessionClient};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{AuthError, AuthResult};
use crate::sso::{self, SsoListener};

/// Where a login attempt currently stands, as observers see it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthStage {
    /// Initial stage, no method chosen.
    MethodSelection,
    /// Browser flow in progress, callback listener running.
    WaitingForSsoReply,
    /// Collecting email and master password.
    EmailMasterPass,
    /// SSO token obtained, master password still needed to unlock.
    QueryMasterPassword,
    /// Server wants a device OTP on top of the password grant.
    QueryOtp,
    /// Login complete, session handed off.
    Finished,
    /// Aborted by the user.
    Canceled,
}

/// Whether `from -> to` appears in the transition table. A transition to
/// [`AuthStage::Canceled`] is permitted from any stage.
pub fn transition_allowed(from: AuthStage, to: AuthStage) -> bool {
    use AuthStage::*;
    if to == Canceled {
        return true;
    }
    matches!(
        (from, to),
        (MethodSelection, WaitingForSsoReply)
            | (MethodSelection, EmailMasterPass)
            | (WaitingForSsoReply, MethodSelection)
            | (WaitingForSsoReply, QueryMasterPassword)
            | (EmailMasterPass, QueryOtp)
            | (EmailMasterPass, Finished)
            | (QueryMasterPassword, Finished)
            | (QueryOtp, Finished)
            | (Canceled, MethodSelection)
    )
}

/// Internal state: one variant per stage, payload included.
enum AuthFlow {
    MethodSelection,
    WaitingForSsoReply { listener: SsoListener },
    EmailMasterPass,
    QueryMasterPassword,
    QueryOtp { creds: PreparedCredentials },
    Finished,
    Canceled,
}

impl AuthFlow {
    fn stage(&self) -> AuthStage {
        match self {
            AuthFlow::MethodSelection => AuthStage::MethodSelection,
            AuthFlow::WaitingForSsoReply { .. } => AuthStage::WaitingForSsoReply,
            AuthFlow::EmailMasterPass => AuthStage::EmailMasterPass,
            AuthFlow::QueryMasterPassword => AuthStage::QueryMasterPassword,
            AuthFlow::QueryOtp { .. } => AuthStage::QueryOtp,
            AuthFlow::Finished => AuthStage::Finished,
            AuthFlow::Canceled => AuthStage::Canceled,
        }
    }
}

/// Drives a login from method selection to a handed-off [`SessionClient`].
pub struct AuthMachine {
    session: RwLock<Arc<SessionClient>>,
    flow: Mutex<AuthFlow>,
    registry: StateRegistry<AuthStage>,
    generation: AtomicU64,
}

impl AuthMachine {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            session: RwLock::new(Arc::new(SessionClient::new(config))),
            flow: Mutex::new(AuthFlow::MethodSelection),
            registry: StateRegistry::new(),
            generation: AtomicU64::new(0),
        }
    }

    /// The session client for the committed base URI. Replaced when a new
    /// login commits a different server.
    pub fn session(&self) -> Arc<SessionClient> {
        Arc::clone(&self.session.read().expect("session lock poisoned"))
    }

    pub fn stage(&self) -> AuthStage {
        self.flow.lock().expect("flow lock poisoned").stage()
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&AuthStage, &AuthStage) + Send + Sync + 'static,
    {
        self.registry.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.registry.unsubscribe(id)
    }

    /// Applies a transition, dropping the old state's payload. A callback
    /// listener left behind by the outgoing state is stopped before
    /// observers see the new stage.
    fn transition_to(&self, next: AuthFlow) -> AuthResult<()> {
        let mut flow = self.flow.lock().expect("flow lock poisoned");
        let from = flow.stage();
        let to = next.stage();
        if !transition_allowed(from, to) {
            return Err(AuthError::IllegalTransition { from, to });
        }
        if let AuthFlow::WaitingForSsoReply { listener } = &*flow {
            listener.stop();
            debug!("sso callback listener stopped");
        }
        *flow = next;
        debug!("auth stage {from:?} -> {to:?}");
        self.registry.publish(&from, &to);
        Ok(())
    }

    fn check_generation(&self, expected: u64) -> AuthResult<()> {
        if self.generation.load(Ordering::SeqCst) != expected {
            return Err(AuthError::Canceled);
        }
        Ok(())
    }

    /// Generation check for the moment a grant has already installed tokens
    /// or keys. A cancel that landed mid-flight rolls the session back so a
    /// canceled flow never leaves an authenticated session behind.
    async fn check_generation_or_rollback(
        &self,
        expected: u64,
        session: &SessionClient,
    ) -> AuthResult<()> {
        if let Err(err) = self.check_generation(expected) {
            debug!("rolling back a login that completed after cancel");
            session.logout().await;
            return Err(err);
        }
        Ok(())
    }

    /// Aborts the login. Accepted from any stage; results of calls still
    /// in flight are discarded when they complete.
    pub fn cancel(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        // Canceled is reachable from everywhere, this cannot fail.
        let _ = self.transition_to(AuthFlow::Canceled);
        info!("login canceled");
    }

    /// Returns to method selection after a cancel. Whatever the canceled
    /// state still held was already dropped with it.
    pub fn reset(&self) -> AuthResult<()> {
        self.transition_to(AuthFlow::MethodSelection)
    }

    /// Probes `candidate` as a server base URI. An empty vector means the
    /// URI is usable; otherwise each entry is a human-readable problem.
    pub async fn validate_base_uri(&self, candidate: &str) -> Vec<String> {
        let trimmed = candidate.trim();
        if trimmed.is_empty() {
            return vec!["the server address is empty".to_string()];
        }
        let parsed = match Url::parse(trimmed) {
            Ok(url) => url,
            Err(err) => return vec![format!("not a valid URL: {err}")],
        };
        if !matches!(parsed.scheme(), "http" | "https") {
            return vec![format!("unsupported scheme \"{}\"", parsed.scheme())];
        }

        let probe = ApiClient::new(ClientConfig::with_base_url(trimmed));
        match probe.probe_config().await {
            Ok(_) => Vec::new(),
            Err(err) => vec![format!(
                "the server did not answer a configuration probe: {err}"
            )],
        }
    }

    /// Commits the base URI and moves to password entry.
    pub fn start_login(&self, base_uri: &str) -> AuthResult<()> {
        self.transition_to(AuthFlow::EmailMasterPass)?;
        self.replace_session(base_uri);
        Ok(())
    }

    /// Starts the browser SSO flow against `base_uri`, returning the
    /// authorization URL to open. The callback listener runs until a
    /// matching reply arrives, the flow is canceled, or the stage moves on.
    pub async fn start_sso(self: &Arc<Self>, base_uri: &str) -> AuthResult<String> {
        let generation = self.generation.load(Ordering::SeqCst);
        let session = Arc::new(SessionClient::new(ClientConfig::with_base_url(base_uri)));

        let state_token = sso::generate_token();
        let verifier = sso::generate_token();
        let challenge = sso::code_challenge(&verifier);

        let (listener, code_rx) = sso::bind_callback_listener(&state_token).await?;
        let redirect_uri = listener.redirect_uri();
        let authorize = sso::authorize_url(
            &session.api().config().identity_url(),
            &session.api().config().client_id,
            &redirect_uri,
            &state_token,
            &challenge,
        )?;

        // The listener aborts on drop, so a rejected transition cleans up.
        self.transition_to(AuthFlow::WaitingForSsoReply { listener })?;
        *self.session.write().expect("session lock poisoned") = Arc::clone(&session);

        let machine = Arc::clone(self);
        tokio::spawn(async move {
            let code = match code_rx.await {
                Ok(code) => code,
                Err(_) => {
                    debug!("sso callback listener closed without a code");
                    return;
                }
            };
            if machine.check_generation(generation).is_err() {
                debug!("discarding sso reply from a canceled flow");
                return;
            }
            match session.login_sso(&code, &verifier, &redirect_uri).await {
                Ok(()) => {
                    if machine
                        .check_generation_or_rollback(generation, &session)
                        .await
                        .is_err()
                    {
                        debug!("discarding sso token from a canceled flow");
                        return;
                    }
                    if let Err(err) = machine.transition_to(AuthFlow::QueryMasterPassword) {
                        warn!("could not advance after the sso exchange: {err}");
                    }
                }
                Err(err) => {
                    warn!("sso token exchange failed: {err}");
                    if let Err(err) = machine.transition_to(AuthFlow::MethodSelection) {
                        debug!("could not fall back to method selection: {err}");
                    }
                }
            }
        });

        Ok(authorize)
    }

    /// Runs prelogin, the KDF, and the password grant. A server demanding
    /// a device OTP moves to [`AuthStage::QueryOtp`] with the derived keys
    /// retained; success finishes the login.
    pub async fn set_email_master_pass(&self, email: &str, password: &str) -> AuthResult<()> {
        let generation = self.generation.load(Ordering::SeqCst);
        let from = self.stage();
        if from != AuthStage::EmailMasterPass {
            return Err(AuthError::IllegalTransition {
                from,
                to: AuthStage::Finished,
            });
        }

        let session = self.session();
        let creds = session.prepare_login(email, password).await?;
        self.check_generation(generation)?;

        match session.login_prepared(&creds, None).await {
            Ok(()) => {
                self.check_generation_or_rollback(generation, &session).await?;
                self.transition_to(AuthFlow::Finished)
            }
            Err(ClientError::TwoFactorRequired) => {
                self.check_generation(generation)?;
                self.transition_to(AuthFlow::QueryOtp { creds })
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Retries the password grant with a device OTP, reusing the keys
    /// derived in the preceding step. A wrong code leaves the machine in
    /// [`AuthStage::QueryOtp`] for another attempt.
    pub async fn set_device_otp(&self, code: &str) -> AuthResult<()> {
        let generation = self.generation.load(Ordering::SeqCst);
        let creds = {
            let flow = self.flow.lock().expect("flow lock poisoned");
            match &*flow {
                AuthFlow::QueryOtp { creds } => creds.clone(),
                other => {
                    return Err(AuthError::IllegalTransition {
                        from: other.stage(),
                        to: AuthStage::Finished,
                    })
                }
            }
        };

        let session = self.session();
        session.login_prepared(&creds, Some(code)).await?;
        self.check_generation_or_rollback(generation, &session).await?;
        self.transition_to(AuthFlow::Finished)
    }

    /// Supplies the master password after a successful SSO exchange,
    /// unlocking the key hierarchy and finishing the login.
    pub async fn set_master_password(&self, email: &str, password: &str) -> AuthResult<()> {
        let generation = self.generation.load(Ordering::SeqCst);
        let from = self.stage();
        if from != AuthStage::QueryMasterPassword {
            return Err(AuthError::IllegalTransition {
                from,
                to: AuthStage::Finished,
            });
        }

        let session = self.session();
        session.unlock(email, password).await?;
        self.check_generation_or_rollback(generation, &session).await?;
        self.transition_to(AuthFlow::Finished)
    }

    fn replace_session(&self, base_uri: &str) {
        let session = Arc::new(SessionClient::new(ClientConfig::with_base_url(base_uri)));
        *self.session.write().expect("session lock poisoned") = session;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex as StdMutex;

    const ALL_STAGES: [AuthStage; 7] = [
        AuthStage::MethodSelection,
        AuthStage::WaitingForSsoReply,
        AuthStage::EmailMasterPass,
        AuthStage::QueryMasterPassword,
        AuthStage::QueryOtp,
        AuthStage::Finished,
        AuthStage::Canceled,
    ];

    #[test]
    fn transition_table_is_exact() {
        let allowed = [
            (AuthStage::MethodSelection, AuthStage::WaitingForSsoReply),
            (AuthStage::MethodSelection, AuthStage::EmailMasterPass),
            (AuthStage::WaitingForSsoReply, AuthStage::MethodSelection),
            (AuthStage::WaitingForSsoReply, AuthStage::QueryMasterPassword),
            (AuthStage::EmailMasterPass, AuthStage::QueryOtp),
            (AuthStage::EmailMasterPass, AuthStage::Finished),
            (AuthStage::QueryMasterPassword, AuthStage::Finished),
            (AuthStage::QueryOtp, AuthStage::Finished),
            (AuthStage::Canceled, AuthStage::MethodSelection),
        ];
        for from in ALL_STAGES {
            for to in ALL_STAGES {
                let expected = to == AuthStage::Canceled || allowed.contains(&(from, to));
                assert_eq!(
                    transition_allowed(from, to),
                    expected,
                    "transition {from:?} -> {to:?}"
                );
            }
        }
    }

    #[test]
    fn cancel_is_accepted_everywhere() {
        for target in ALL_STAGES {
            assert!(transition_allowed(target, AuthStage::Canceled));
        }
    }

    #[tokio::test]
    async fn illegal_transition_leaves_stage_unchanged() {
        let machine = AuthMachine::new(ClientConfig::default());
        assert_eq!(machine.stage(), AuthStage::MethodSelection);

        let err = machine.set_device_otp("123456").await.unwrap_err();
        assert!(matches!(err, AuthError::IllegalTransition { .. }));
        assert_eq!(machine.stage(), AuthStage::MethodSelection);

        let err = machine
            .set_master_password("a@b.c", "pw")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AuthError::IllegalTransition {
                from: AuthStage::MethodSelection,
                ..
            }
        ));
        assert_eq!(machine.stage(), AuthStage::MethodSelection);
    }

    #[test]
    fn cancel_then_reset_returns_to_method_selection() {
        let machine = AuthMachine::new(ClientConfig::default());
        machine.start_login("https://vault.example.com").unwrap();
        assert_eq!(machine.stage(), AuthStage::EmailMasterPass);

        machine.cancel();
        assert_eq!(machine.stage(), AuthStage::Canceled);

        machine.reset().unwrap();
        assert_eq!(machine.stage(), AuthStage::MethodSelection);
    }

    #[test]
    fn reset_is_rejected_outside_canceled() {
        let machine = AuthMachine::new(ClientConfig::default());
        machine.start_login("https://vault.example.com").unwrap();
        let err = machine.reset().unwrap_err();
        assert!(matches!(err, AuthError::IllegalTransition { .. }));
        assert_eq!(machine.stage(), AuthStage::EmailMasterPass);
    }

    #[test]
    fn observers_see_transitions_in_order() {
        let machine = AuthMachine::new(ClientConfig::default());
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        machine.subscribe(move |old, new| {
            sink.lock().unwrap().push((*old, *new));
        });

        machine.start_login("https://vault.example.com").unwrap();
        machine.cancel();
        machine.reset().unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                (AuthStage::MethodSelection, AuthStage::EmailMasterPass),
                (AuthStage::EmailMasterPass, AuthStage::Canceled),
                (AuthStage::Canceled, AuthStage::MethodSelection),
            ]
        );
    }

    #[tokio::test]
    async fn validate_base_uri_flags_garbage() {
        let machine = AuthMachine::new(ClientConfig::default());
        assert!(!machine.validate_base_uri("").await.is_empty());
        assert!(!machine.validate_base_uri("not a url").await.is_empty());
        assert!(!machine
            .validate_base_uri("ftp://vault.example.com")
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn start_sso_moves_to_waiting_and_cancel_tears_down() {
        let machine = Arc::new(AuthMachine::new(ClientConfig::default()));
        let authorize = machine
            .start_sso("https://vault.example.com")
            .await
            .unwrap();
        assert_eq!(machine.stage(), AuthStage::WaitingForSsoReply);

        let url = Url::parse(&authorize).unwrap();
        assert_eq!(url.path(), "/identity/connect/authorize");
        let state = url
            .query_pairs()
            .find(|(k, _)| k == "state")
            .map(|(_, v)| v.into_owned())
            .unwrap();
        assert_eq!(state.len(), 64);

        machine.cancel();
        assert_eq!(machine.stage(), AuthStage::Canceled);
        assert!(matches!(
            *machine.flow.lock().unwrap(),
            AuthFlow::Canceled
        ));
    }
}
