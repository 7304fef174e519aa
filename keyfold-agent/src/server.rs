//! The agent socket server.
//!
//! One long-lived Unix domain socket listener; per connection, exactly one
//! request line of the form `<cipherId>/<attribute>` and exactly one
//! newline-terminated response line. Anything that cannot be resolved (an
//! entry outside the allow-set, an unknown cipher ID, a missing attribute)
//! answers with the placeholder so a client cannot distinguish denial from
//! absence.
//!
//! The filesystem permissions of the socket path are the transport-level
//! access boundary; setting them restrictively is the caller's job.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use keyfold_client::{SessionClient, VaultSnapshot};
use keyfold_crypto::calculate_totp;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{oneshot, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::acl::AclProvider;
use crate::error::{AgentError, AgentResult};

/// Response for anything that cannot or may not be resolved.
const PLACEHOLDER: &str = "-";

/// Connections serviced concurrently; further clients wait their turn.
const MAX_WORKERS: usize = 16;

/// Longest request line accepted before the connection is dropped.
const MAX_REQUEST_LEN: u64 = 1024;

/// Read access to the current decrypted vault.
pub trait VaultSource: Send + Sync {
    fn current_snapshot(&self) -> Option<Arc<VaultSnapshot>>;
}

impl VaultSource for SessionClient {
    fn current_snapshot(&self) -> Option<Arc<VaultSnapshot>> {
        self.get_sync_data()
    }
}

/// Handle to a running agent server. Dropping it closes the shutdown
/// channel, which stops the accept loop but leaves the socket file behind;
/// call [`AgentHandle::shutdown`] for a clean stop that removes the file.
pub struct AgentHandle {
    path: PathBuf,
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl AgentHandle {
    /// Stops the accept loop and waits until it has exited and the socket
    /// file is gone. Requests already on a worker finish on their own.
    pub async fn shutdown(self) -> AgentResult<()> {
        let _ = self.shutdown_tx.send(());
        if let Err(err) = self.task.await {
            warn!("agent accept loop ended abnormally: {err}");
        }
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        info!("agent socket at {} closed", self.path.display());
        Ok(())
    }
}

/// Binds the agent socket and starts accepting connections.
pub async fn start(
    path: impl AsRef<Path>,
    vault: Arc<dyn VaultSource>,
    acl: Arc<dyn AclProvider>,
) -> AgentResult<AgentHandle> {
    let path = path.as_ref().to_path_buf();

    // A stale socket file from an unclean exit would make the bind fail.
    match tokio::fs::remove_file(&path).await {
        Ok(()) => debug!("removed stale socket file at {}", path.display()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => warn!("could not remove stale socket file: {err}"),
    }

    let listener = UnixListener::bind(&path).map_err(|source| AgentError::Bind {
        path: path.display().to_string(),
        source,
    })?;
    info!("agent listening on {}", path.display());

    let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
    let workers = Arc::new(Semaphore::new(MAX_WORKERS));

    let task = tokio::spawn(async move {
        loop {
            let permit = tokio::select! {
                _ = &mut shutdown_rx => break,
                permit = Arc::clone(&workers).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            let stream = tokio::select! {
                _ = &mut shutdown_rx => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => stream,
                    Err(err) => {
                        warn!("agent accept failed: {err}");
                        continue;
                    }
                },
            };

            let vault = Arc::clone(&vault);
            let acl = Arc::clone(&acl);
            tokio::spawn(async move {
                if let Err(err) = serve_connection(stream, vault, acl).await {
                    debug!("agent connection ended with an error: {err}");
                }
                drop(permit);
            });
        }
        debug!("agent accept loop exited");
    });

    Ok(AgentHandle {
        path,
        shutdown_tx,
        task,
    })
}

async fn serve_connection(
    stream: UnixStream,
    vault: Arc<dyn VaultSource>,
    acl: Arc<dyn AclProvider>,
) -> std::io::Result<()> {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    (&mut reader)
        .take(MAX_REQUEST_LEN)
        .read_line(&mut line)
        .await?;

    let answer = resolve_request(line.trim_end_matches(['\r', '\n']), &*vault, &*acl);
    let stream = reader.get_mut();
    stream.write_all(answer.as_bytes()).await?;
    stream.write_all(b"\n").await?;
    stream.shutdown().await
}

/// Maps one request line to one response line.
fn resolve_request(request: &str, vault: &dyn VaultSource, acl: &dyn AclProvider) -> String {
    let Some((cipher_id, attribute)) = request.split_once('/') else {
        debug!("malformed agent request");
        return PLACEHOLDER.to_string();
    };

    if !acl.snapshot().allows(cipher_id) {
        debug!("agent request for {cipher_id} denied by the allow-set");
        return PLACEHOLDER.to_string();
    }

    let Some(snapshot) = vault.current_snapshot() else {
        debug!("agent request before any vault snapshot exists");
        return PLACEHOLDER.to_string();
    };
    let Some(item) = snapshot.get(cipher_id) else {
        debug!("agent request for unknown cipher {cipher_id}");
        return PLACEHOLDER.to_string();
    };

    let value = match attribute {
        "username" => item.login().and_then(|l| l.username.clone()),
        "password" => item.login().and_then(|l| l.password.clone()),
        "totpToken" => item
            .login()
            .and_then(|l| l.totp_seed.as_deref())
            .and_then(|seed| match calculate_totp(seed) {
                Ok(code) => Some(code),
                Err(err) => {
                    warn!("totp computation failed for {cipher_id}: {err}");
                    None
                }
            }),
        other => {
            debug!("agent request for unsupported attribute {other:?}");
            None
        }
    };

    value.unwrap_or_else(|| PLACEHOLDER.to_string())
}
