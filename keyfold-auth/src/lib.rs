//! Login orchestration for the keyfold vault service.
//!
//! [`AuthMachine`] drives a login attempt as a small validated state
//! machine: the caller picks a method (email + master password, or browser
//! SSO with PKCE), the machine walks through the server round trips, and a
//! finished login hands off an authenticated
//! [`keyfold_client::SessionClient`].

mod error;
pub mod machine;
pub mod sso;

pub use error::{AuthError, AuthResult};
pub use machine::{transition_allowed, AuthMachine, AuthStage};
