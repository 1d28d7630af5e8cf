//! Wait barriers over many remote connections

use crate::connection::RemoteConnection;
use crate::session::RemoteResult;
use dxdb_common::{DxdbError, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Block until every connection has a response (or an error) available.
///
/// With an `interrupt` token the wait returns `Cancelled` as soon as the
/// token fires; responses that arrive later stay queued on their sessions.
pub async fn wait_for_all(
    connections: &[Arc<RemoteConnection>],
    interrupt: Option<&CancellationToken>,
) -> Result<()> {
    if connections.is_empty() {
        return Ok(());
    }

    let barrier = futures::future::join_all(connections.iter().map(|c| c.wait_ready()));
    match interrupt {
        Some(token) => tokio::select! {
            biased;
            _ = token.cancelled() => Err(DxdbError::Cancelled),
            _ = barrier => Ok(()),
        },
        None => {
            barrier.await;
            Ok(())
        }
    }
}

/// Block until at least one connection is readable and return its index.
pub async fn wait_for_any(
    connections: &[Arc<RemoteConnection>],
    interrupt: Option<&CancellationToken>,
) -> Result<usize> {
    if connections.is_empty() {
        return Err(DxdbError::Internal(
            "wait_for_any called without connections".to_string(),
        ));
    }

    let any = futures::future::select_all(connections.iter().map(|c| Box::pin(c.wait_ready())));
    match interrupt {
        Some(token) => tokio::select! {
            biased;
            _ = token.cancelled() => Err(DxdbError::Cancelled),
            (_, index, _) = any => Ok(index),
        },
        None => {
            let (_, index, _) = any.await;
            Ok(index)
        }
    }
}

/// Submit one command, wait for it and return the raw remote result.
///
/// Submission failures become `DxdbError::Submission`; a remote error is
/// returned as an unsuccessful `RemoteResult` for the caller to judge.
pub async fn send_and_wait(
    connection: &Arc<RemoteConnection>,
    command: &str,
    interrupt: Option<&CancellationToken>,
) -> Result<RemoteResult> {
    if !connection.submit(command).await {
        return Err(DxdbError::Submission {
            connection: connection.id(),
            message: format!("could not send command to {}", connection.node()),
        });
    }
    wait_for_all(std::slice::from_ref(connection), interrupt).await?;
    connection.retrieve_result().await
}
