//! Decrypted vault snapshot types.
//!
//! A [`VaultSnapshot`] is built from one sync response and replaced
//! wholesale on the next; readers hold an `Arc` to whichever snapshot was
//! current when they asked and never observe a half-updated vault.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// URI match rule attached to a login URI.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoginUri {
    pub uri: String,
    /// 0 = domain, 1 = host, 2 = starts-with, 3 = exact, 4 = regex, 5 = never.
    pub match_type: Option<u8>,
}

#[derive(Clone, Debug, Default)]
pub struct LoginItem {
    pub username: Option<String>,
    pub password: Option<String>,
    /// TOTP seed (otpauth URL or bare base32), kept encrypted-at-rest on the
    /// server; here already plaintext.
    pub totp_seed: Option<String>,
    pub uris: Vec<LoginUri>,
}

#[derive(Clone, Debug, Default)]
pub struct SshKeyItem {
    pub private_key: Option<String>,
    pub public_key: Option<String>,
    pub fingerprint: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct CardItem {
    pub cardholder_name: Option<String>,
    pub brand: Option<String>,
    pub number: Option<String>,
    pub exp_month: Option<String>,
    pub exp_year: Option<String>,
    pub code: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct IdentityItem {
    pub title: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address1: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
}

/// Payload variant of a vault item.
#[derive(Clone, Debug)]
pub enum ItemKind {
    Login(LoginItem),
    SshKey(SshKeyItem),
    Card(CardItem),
    Identity(IdentityItem),
    /// Secure note: the content lives in `VaultItem::notes`.
    Note,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Hidden,
    Checkbox,
    /// Value resolves through `linked_id` to another attribute of the item
    /// (100 = username, 101 = password).
    Linked,
}

impl FieldKind {
    pub fn from_wire(value: u8) -> Self {
        match value {
            1 => FieldKind::Hidden,
            2 => FieldKind::Checkbox,
            3 => FieldKind::Linked,
            _ => FieldKind::Text,
        }
    }
}

#[derive(Clone, Debug)]
pub struct CustomField {
    pub name: Option<String>,
    pub value: Option<String>,
    pub kind: FieldKind,
    pub linked_id: Option<u32>,
}

#[derive(Clone, Debug)]
pub struct PasswordHistoryEntry {
    pub password: String,
    pub last_used: Option<DateTime<Utc>>,
}

/// One decrypted vault entry.
#[derive(Clone, Debug)]
pub struct VaultItem {
    pub id: String,
    /// Selects which key decrypted this item's fields; `None` means the
    /// user's own key.
    pub organization_id: Option<String>,
    pub folder_id: Option<String>,
    pub collection_ids: Vec<String>,
    pub name: Option<String>,
    pub notes: Option<String>,
    pub kind: ItemKind,
    pub fields: Vec<CustomField>,
    pub password_history: Vec<PasswordHistoryEntry>,
    pub revision_date: Option<DateTime<Utc>>,
    /// Fields that failed to decrypt, as "field: error" entries. The rest of
    /// the item (and vault) stays usable; the failure is never silent.
    pub decrypt_failures: Vec<String>,
}

impl VaultItem {
    pub fn login(&self) -> Option<&LoginItem> {
        match &self.kind {
            ItemKind::Login(login) => Some(login),
            _ => None,
        }
    }

    /// Resolves a linked custom field to the attribute it points at.
    pub fn resolve_linked(&self, linked_id: u32) -> Option<&str> {
        let login = self.login()?;
        match linked_id {
            100 => login.username.as_deref(),
            101 => login.password.as_deref(),
            _ => None,
        }
    }
}

/// Immutable decrypted view of the whole vault.
#[derive(Debug, Default)]
pub struct VaultSnapshot {
    items: Vec<VaultItem>,
    by_id: HashMap<String, usize>,
}

impl VaultSnapshot {
    pub fn new(items: Vec<VaultItem>) -> Self {
        let by_id = items
            .iter()
            .enumerate()
            .map(|(idx, item)| (item.id.clone(), idx))
            .collect();
        Self { items, by_id }
    }

    pub fn get(&self, id: &str) -> Option<&VaultItem> {
        self.by_id.get(id).map(|&idx| &self.items[idx])
    }

    pub fn items(&self) -> &[VaultItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str) -> VaultItem {
        VaultItem {
            id: id.to_string(),
            organization_id: None,
            folder_id: None,
            collection_ids: Vec::new(),
            name: Some(format!("item {id}")),
            notes: None,
            kind: ItemKind::Login(LoginItem {
                username: Some("alice".into()),
                password: Some("s3cret".into()),
                totp_seed: None,
                uris: Vec::new(),
            }),
            fields: Vec::new(),
            password_history: Vec::new(),
            revision_date: None,
            decrypt_failures: Vec::new(),
        }
    }

    #[test]
    fn snapshot_indexes_by_id() {
        let snapshot = VaultSnapshot::new(vec![item("a"), item("b")]);
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.get("b").unwrap().name.as_deref(), Some("item b"));
        assert!(snapshot.get("missing").is_none());
    }

    #[test]
    fn linked_fields_resolve_to_login_attributes() {
        let it = item("a");
        assert_eq!(it.resolve_linked(100), Some("alice"));
        assert_eq!(it.resolve_linked(101), Some("s3cret"));
        assert_eq!(it.resolve_linked(999), None);
    }
}
