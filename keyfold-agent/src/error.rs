use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("could not bind the agent socket at {path}: {source}")]
    Bind {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type AgentResult<T> = Result<T, AgentError>;
