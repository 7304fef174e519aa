//! Client session for the keyfold vault service.
//!
//! [`SessionClient`] owns the authenticated session: it performs the
//! prelogin/token/sync round trips, unwraps the server's wrapped profile and
//! organization keys into usable crypto keys, and holds the decrypted vault
//! as an immutable snapshot that is replaced wholesale on each sync.
//!
//! Observers subscribe to client-state transitions through the same
//! [`notify::StateRegistry`] contract the authentication machine uses.

pub mod api;
pub mod config;
mod error;
pub mod models;
pub mod notify;
mod session;
pub mod vault;

pub use api::{ApiClient, PasswordTokenOutcome};
pub use models::ServerConfig;
pub use config::ClientConfig;
pub use error::{ClientError, ClientResult};
pub use notify::{StateRegistry, SubscriptionId};
pub use session::{ClientState, PreparedCredentials, SessionClient};
pub use vault::{
    CardItem, CustomField, FieldKind, IdentityItem, ItemKind, LoginItem, LoginUri,
    PasswordHistoryEntry, SshKeyItem, VaultItem, VaultSnapshot,
};
