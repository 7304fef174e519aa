//! Local agent socket for the keyfold vault.
//!
//! Desktop integrations (browser helpers, autotype tools) ask for one
//! secret per connection over a Unix domain socket. The wire protocol is a
//! single request line `<cipherId>/<attribute>` answered by a single
//! newline-terminated line; a request outside the allow-set, for an unknown
//! entry, or for an attribute the entry does not carry is answered with
//! `-`.

mod error;

pub mod acl;
pub mod server;

pub use acl::{AclProvider, AclSnapshot, StaticAcl};
pub use error::{AgentError, AgentResult};
pub use server::{start, AgentHandle, VaultSource};
