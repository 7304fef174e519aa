//! The authenticated session and vault decryption pipeline.
//!
//! Key hierarchy unwrap order is strict: user key (from the profile, with
//! the stretched master key) → user private key (with the user key) → each
//! organization key (with the private key). Cipher fields decrypt with the
//! user key or, when `organizationId` is set, that organization's key.
//!
//! A failure on any single field is recorded on the item and logged, never
//! allowed to abort the rest of the sync, and never papered over with a
//! default value.

use crate::api::{ApiClient, PasswordTokenOutcome};
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::models::{CipherData, SyncResponse};
use crate::notify::{StateRegistry, SubscriptionId};
use crate::vault::{
    CardItem, CustomField, FieldKind, IdentityItem, ItemKind, LoginItem, LoginUri,
    PasswordHistoryEntry, SshKeyItem, VaultItem, VaultSnapshot,
};
use keyfold_crypto::{
    decrypt_private_key, decrypt_symmetric, derive_master_key, derive_master_key_hash,
    stretch_master_key, unwrap_key_with_private, unwrap_symmetric_key, Envelope, SymmetricKey,
};
use rsa::RsaPrivateKey;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info, warn};

/// Observable client lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientState {
    /// Fresh client, nothing restored, nothing authenticated.
    Started,
    /// Restored tokens exist but have not been exercised yet.
    LocalStatePresent,
    /// Authenticated; no vault data synced in this session.
    Initial,
    /// First sync of the session in flight.
    InitialSync,
    /// A network round trip failed and no usable token is held.
    Offline,
    /// A network round trip failed but the session token is still held.
    OfflineWithToken,
    /// Re-sync in flight over an existing snapshot.
    Syncing,
    /// A decrypted snapshot is available.
    Synced,
}

/// Derived login material retained between the password grant and a
/// device-OTP retry, so the KDF runs once per password entry.
#[derive(Clone)]
pub struct PreparedCredentials {
    pub email: String,
    pub master_key_hash: String,
    pub stretched: SymmetricKey,
}

struct SessionKeys {
    stretched: SymmetricKey,
    user_key: Option<SymmetricKey>,
    private_key: Option<RsaPrivateKey>,
    org_keys: HashMap<String, SymmetricKey>,
}

/// Owns the authenticated session and the decrypted vault.
pub struct SessionClient {
    api: Arc<ApiClient>,
    state: Mutex<ClientState>,
    registry: StateRegistry<ClientState>,
    keys: RwLock<Option<SessionKeys>>,
    snapshot: RwLock<Option<Arc<VaultSnapshot>>>,
}

impl SessionClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            api: Arc::new(ApiClient::new(config)),
            state: Mutex::new(ClientState::Started),
            registry: StateRegistry::new(),
            keys: RwLock::new(None),
            snapshot: RwLock::new(None),
        }
    }

    /// Restores a client from persisted tokens (vault still locked).
    pub async fn with_restored_tokens(
        config: ClientConfig,
        access_token: String,
        refresh_token: Option<String>,
    ) -> Self {
        let client = Self::new(config);
        client.api.set_tokens(access_token, refresh_token).await;
        client.set_state(ClientState::LocalStatePresent);
        client
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn state(&self) -> ClientState {
        *self.state.lock().expect("state lock poisoned")
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&ClientState, &ClientState) + Send + Sync + 'static,
    {
        self.registry.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.registry.unsubscribe(id)
    }

    /// Applies a transition and notifies observers before releasing the
    /// state lock, so no observer sees a torn state.
    fn set_state(&self, new: ClientState) {
        let mut state = self.state.lock().expect("state lock poisoned");
        let old = *state;
        if old == new {
            return;
        }
        *state = new;
        debug!("client state {old:?} -> {new:?}");
        self.registry.publish(&old, &new);
    }

    // ── Login ──

    /// Runs prelogin and the KDF off the async workers, returning material
    /// that can be retried with a device OTP without re-deriving.
    pub async fn prepare_login(
        &self,
        email: &str,
        password: &str,
    ) -> ClientResult<PreparedCredentials> {
        let params = self.api.prelogin(email).await?;
        let email_owned = email.to_string();
        let password_owned = password.to_string();

        // The KDF is deliberately expensive; keep it off the async workers.
        let (master_key_hash, stretched) = tokio::task::spawn_blocking(move || {
            let master = derive_master_key(&password_owned, &email_owned, &params)?;
            let hash = derive_master_key_hash(&master, &password_owned);
            let stretched = stretch_master_key(&master);
            Ok::<_, keyfold_crypto::CryptoError>((hash, stretched))
        })
        .await
        .map_err(|e| ClientError::ServerRejected(format!("key derivation task failed: {e}")))??;

        Ok(PreparedCredentials {
            email: email.to_string(),
            master_key_hash,
            stretched,
        })
    }

    /// Exchanges prepared credentials for a token. `Err(TwoFactorRequired)`
    /// means the caller should collect a device OTP and call again with the
    /// same credentials.
    pub async fn login_prepared(
        &self,
        creds: &PreparedCredentials,
        device_otp: Option<&str>,
    ) -> ClientResult<()> {
        let outcome = self
            .api
            .token_password(&creds.email, &creds.master_key_hash, device_otp)
            .await?;

        match outcome {
            PasswordTokenOutcome::TwoFactorRequired => Err(ClientError::TwoFactorRequired),
            PasswordTokenOutcome::Success(_) => {
                self.install_stretched_key(creds.stretched.clone());
                self.set_state(ClientState::Initial);
                info!("password login complete for {}", creds.email);
                Ok(())
            }
        }
    }

    /// Password login in one step.
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        device_otp: Option<&str>,
    ) -> ClientResult<()> {
        let creds = self.prepare_login(email, password).await?;
        self.login_prepared(&creds, device_otp).await
    }

    /// SSO authorization-code exchange. The vault stays locked until
    /// [`SessionClient::unlock`] supplies the master password.
    pub async fn login_sso(
        &self,
        code: &str,
        code_verifier: &str,
        redirect_uri: &str,
    ) -> ClientResult<()> {
        self.api
            .token_authorization_code(code, code_verifier, redirect_uri)
            .await?;
        self.set_state(ClientState::Initial);
        info!("SSO login complete");
        Ok(())
    }

    /// Derives and installs the stretched master key for an already
    /// authenticated session (the post-SSO master password prompt).
    pub async fn unlock(&self, email: &str, password: &str) -> ClientResult<()> {
        let creds = self.prepare_login(email, password).await?;
        self.install_stretched_key(creds.stretched.clone());
        Ok(())
    }

    fn install_stretched_key(&self, stretched: SymmetricKey) {
        let mut keys = self.keys.write().expect("keys lock poisoned");
        *keys = Some(SessionKeys {
            stretched,
            user_key: None,
            private_key: None,
            org_keys: HashMap::new(),
        });
    }

    /// Drops tokens, keys, and the decrypted snapshot.
    pub async fn logout(&self) {
        self.api.clear_tokens().await;
        *self.keys.write().expect("keys lock poisoned") = None;
        *self.snapshot.write().expect("snapshot lock poisoned") = None;
        self.set_state(ClientState::Started);
        info!("session logged out");
    }

    // ── Sync ──

    /// Fetches and decrypts the vault, replacing the snapshot wholesale.
    pub async fn sync(&self) -> ClientResult<Arc<VaultSnapshot>> {
        let stretched = {
            let keys = self.keys.read().expect("keys lock poisoned");
            keys.as_ref()
                .map(|k| k.stretched.clone())
                .ok_or(ClientError::VaultLocked)?
        };

        let first_sync = self
            .snapshot
            .read()
            .expect("snapshot lock poisoned")
            .is_none();
        self.set_state(if first_sync {
            ClientState::InitialSync
        } else {
            ClientState::Syncing
        });

        let response = match self.api.sync().await {
            Ok(response) => response,
            Err(e) => {
                let offline = if self.api.is_authenticated().await {
                    ClientState::OfflineWithToken
                } else {
                    ClientState::Offline
                };
                self.set_state(offline);
                return Err(e);
            }
        };

        let snapshot = self.decrypt_sync_response(&stretched, response)?;
        let snapshot = Arc::new(snapshot);
        *self.snapshot.write().expect("snapshot lock poisoned") = Some(snapshot.clone());
        self.set_state(ClientState::Synced);
        info!(items = snapshot.len(), "vault synced and decrypted");
        Ok(snapshot)
    }

    /// Current decrypted snapshot, possibly stale until the next sync.
    pub fn get_sync_data(&self) -> Option<Arc<VaultSnapshot>> {
        self.snapshot
            .read()
            .expect("snapshot lock poisoned")
            .clone()
    }

    /// On-demand decryption of a single envelope string with the key that
    /// applies to the given organization scope.
    pub fn decrypt_string(
        &self,
        organization_id: Option<&str>,
        envelope: &str,
    ) -> ClientResult<String> {
        let keys = self.keys.read().expect("keys lock poisoned");
        let keys = keys.as_ref().ok_or(ClientError::VaultLocked)?;
        let key = match organization_id {
            Some(org_id) => keys.org_keys.get(org_id).ok_or(ClientError::VaultLocked)?,
            None => keys.user_key.as_ref().ok_or(ClientError::VaultLocked)?,
        };
        let envelope: Envelope = envelope.parse()?;
        let plaintext = decrypt_symmetric(key, &envelope)?;
        String::from_utf8(plaintext)
            .map_err(|_| ClientError::Crypto(keyfold_crypto::CryptoError::Decryption(
                "decrypted field is not valid UTF-8".into(),
            )))
    }

    /// Unwraps the key hierarchy in order, then decrypts every cipher.
    fn decrypt_sync_response(
        &self,
        stretched: &SymmetricKey,
        response: SyncResponse,
    ) -> ClientResult<VaultSnapshot> {
        // User key first: without it nothing else is reachable, so a
        // failure here is fatal for the whole sync.
        let user_key_env: Envelope = response.profile.key.parse()?;
        let user_key = unwrap_symmetric_key(stretched, &user_key_env)?;

        // Private key next; organizations depend on it.
        let private_key = match &response.profile.private_key {
            Some(wrapped) => match wrapped
                .parse::<Envelope>()
                .and_then(|env| decrypt_private_key(&user_key, &env))
            {
                Ok(key) => Some(key),
                Err(e) => {
                    warn!("user private key failed to decrypt: {e}");
                    None
                }
            },
            None => None,
        };

        // Organization keys last.
        let mut org_keys = HashMap::new();
        for org in &response.profile.organizations {
            let Some(private_key) = private_key.as_ref() else {
                warn!(org = %org.id, "skipping organization key: no private key");
                continue;
            };
            match org
                .key
                .parse::<Envelope>()
                .and_then(|env| unwrap_key_with_private(private_key, &env))
            {
                Ok(key) => {
                    org_keys.insert(org.id.clone(), key);
                }
                Err(e) => {
                    warn!(org = %org.id, "organization key failed to unwrap: {e}");
                }
            }
        }

        let items = response
            .ciphers
            .into_iter()
            .map(|cipher| {
                let key = match cipher.organization_id.as_deref() {
                    Some(org_id) => org_keys.get(org_id),
                    None => Some(&user_key),
                };
                decrypt_cipher(cipher, key)
            })
            .collect();

        let mut keys = self.keys.write().expect("keys lock poisoned");
        *keys = Some(SessionKeys {
            stretched: stretched.clone(),
            user_key: Some(user_key),
            private_key,
            org_keys,
        });

        Ok(VaultSnapshot::new(items))
    }
}

/// Decrypts one cipher's fields. `key == None` means the organization key
/// was unavailable; every encrypted field then records a failure.
fn decrypt_cipher(data: CipherData, key: Option<&SymmetricKey>) -> VaultItem {
    let mut failures = Vec::new();
    let cipher_id = data.id.clone();

    let mut dec = |label: &str, value: &Option<String>| -> Option<String> {
        let value = value.as_deref()?;
        match key {
            None => {
                failures.push(format!("{label}: organization key unavailable"));
                None
            }
            Some(key) => match decrypt_field(key, value) {
                Ok(plaintext) => Some(plaintext),
                Err(e) => {
                    warn!(cipher = %cipher_id, field = label, "field failed to decrypt: {e}");
                    failures.push(format!("{label}: {e}"));
                    None
                }
            },
        }
    };

    let name = dec("name", &data.name);
    let notes = dec("notes", &data.notes);

    let kind = match data.cipher_type {
        1 => {
            let login = data.login.clone().unwrap_or_default();
            ItemKind::Login(LoginItem {
                username: dec("login.username", &login.username),
                password: dec("login.password", &login.password),
                totp_seed: dec("login.totp", &login.totp),
                uris: login
                    .uris
                    .iter()
                    .filter_map(|u| {
                        dec("login.uri", &u.uri).map(|uri| LoginUri {
                            uri,
                            match_type: u.match_type,
                        })
                    })
                    .collect(),
            })
        }
        3 => {
            let card = data.card.clone().unwrap_or_default();
            ItemKind::Card(CardItem {
                cardholder_name: dec("card.cardholderName", &card.cardholder_name),
                brand: dec("card.brand", &card.brand),
                number: dec("card.number", &card.number),
                exp_month: dec("card.expMonth", &card.exp_month),
                exp_year: dec("card.expYear", &card.exp_year),
                code: dec("card.code", &card.code),
            })
        }
        4 => {
            let identity = data.identity.clone().unwrap_or_default();
            ItemKind::Identity(IdentityItem {
                title: dec("identity.title", &identity.title),
                first_name: dec("identity.firstName", &identity.first_name),
                last_name: dec("identity.lastName", &identity.last_name),
                email: dec("identity.email", &identity.email),
                phone: dec("identity.phone", &identity.phone),
                address1: dec("identity.address1", &identity.address1),
                city: dec("identity.city", &identity.city),
                country: dec("identity.country", &identity.country),
            })
        }
        5 => {
            let ssh = data.ssh_key.clone().unwrap_or_default();
            ItemKind::SshKey(SshKeyItem {
                private_key: dec("sshKey.privateKey", &ssh.private_key),
                public_key: dec("sshKey.publicKey", &ssh.public_key),
                fingerprint: dec("sshKey.keyFingerprint", &ssh.key_fingerprint),
            })
        }
        2 => ItemKind::Note,
        other => {
            debug!(cipher = %cipher_id, "unknown cipher type {other}, treating as note");
            ItemKind::Note
        }
    };

    let fields = data
        .fields
        .iter()
        .map(|f| CustomField {
            name: dec("field.name", &f.name),
            value: dec("field.value", &f.value),
            kind: FieldKind::from_wire(f.field_type),
            linked_id: f.linked_id,
        })
        .collect();

    let password_history = data
        .password_history
        .iter()
        .filter_map(|h| {
            dec("passwordHistory.password", &Some(h.password.clone())).map(|password| {
                PasswordHistoryEntry {
                    password,
                    last_used: h.last_used_date,
                }
            })
        })
        .collect();

    VaultItem {
        id: data.id,
        organization_id: data.organization_id,
        folder_id: data.folder_id,
        collection_ids: data.collection_ids,
        name,
        notes,
        kind,
        fields,
        password_history,
        revision_date: data.revision_date,
        decrypt_failures: failures,
    }
}

fn decrypt_field(key: &SymmetricKey, envelope: &str) -> Result<String, keyfold_crypto::CryptoError> {
    let envelope: Envelope = envelope.parse()?;
    let plaintext = decrypt_symmetric(key, &envelope)?;
    String::from_utf8(plaintext).map_err(|_| {
        keyfold_crypto::CryptoError::Decryption("decrypted field is not valid UTF-8".into())
    })
}
