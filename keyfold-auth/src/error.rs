use crate::machine::AuthStage;
use keyfold_client::ClientError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("transition from {from:?} to {to:?} is not allowed")]
    IllegalTransition { from: AuthStage, to: AuthStage },

    #[error("login flow was canceled")]
    Canceled,

    #[error("could not bind the SSO callback listener on port {port}: {source}")]
    ListenerBind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error(transparent)]
    Client(#[from] ClientError),
}

pub type AuthResult<T> = Result<T, AuthError>;
