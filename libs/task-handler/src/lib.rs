// Copyright 2025 Anapaya Systems
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//! Cancellable task sets.
//!
//! Long running background work (periodic resynchronization, the metrics endpoint) is spawned on
//! a [CancelTaskSet]. All tasks share one [CancellationToken]; a failing task cancels the token so
//! the remaining tasks shut down as well.

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// A [JoinSet] of I/O tasks bound to a shared [CancellationToken].
pub struct CancelTaskSet {
    join_set: JoinSet<std::io::Result<()>>,
    cancellation_token: CancellationToken,
}

impl CancelTaskSet {
    /// Creates an empty task set with a fresh cancellation token.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self::from_cancel_token(false, CancellationToken::new())
    }

    /// Creates a task set whose token is cancelled on `SIGINT` or `SIGTERM`.
    pub fn new_with_signal_handler() -> Self {
        Self::from_cancel_token(true, CancellationToken::new())
    }

    /// Creates a task set from an existing cancellation token.
    ///
    /// # Arguments
    /// * `register_signal_handler`: If true, `SIGINT` and `SIGTERM` (`CTRL-C` and `CTRL-BREAK` on
    ///   windows) cancel the token.
    /// * `cancellation_token`: The token shared by all tasks of this set.
    pub fn from_cancel_token(
        register_signal_handler: bool,
        cancellation_token: CancellationToken,
    ) -> Self {
        let mut join_set = JoinSet::new();
        if register_signal_handler {
            let token = cancellation_token.clone();
            join_set.spawn(async move {
                tokio::select! {
                    res = wait_for_shutdown_signal() => {
                        res?;
                        token.cancel();
                    }
                    _ = token.cancelled() => {
                        debug!("Cancellation token cancelled, exiting shutdown handler");
                    }
                }
                Ok(())
            });
        }
        Self {
            join_set,
            cancellation_token,
        }
    }

    /// Returns a clone of the shared cancellation token.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Spawns `task`; it is dropped as soon as the token is cancelled.
    pub fn spawn_cancellable_task<Fut>(&mut self, task: Fut)
    where
        Fut: Future<Output = std::io::Result<()>> + Send + 'static,
    {
        let token = self.cancellation_token();
        self.join_set.spawn(async move {
            token.run_until_cancelled(task).await.unwrap_or(Ok(()))
        });
    }

    /// Waits for all tasks. The first failing task cancels the token so that the others stop.
    pub async fn join_all(&mut self) {
        while let Some(result) = self.join_set.join_next().await {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(error=%e, "Task failed");
                    self.cancellation_token.cancel();
                }
                Err(e) => {
                    error!(error=%e, "Task join failed");
                    self.cancellation_token.cancel();
                }
            }
        }
    }
}

impl Drop for CancelTaskSet {
    fn drop(&mut self) {
        self.cancellation_token.cancel();
        self.join_set.abort_all();
    }
}

#[cfg(target_family = "unix")]
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = sigint.recv() => debug!("Received SIGINT, cancelling token"),
        _ = sigterm.recv() => debug!("Received SIGTERM, cancelling token"),
    }
    Ok(())
}

#[cfg(target_family = "windows")]
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::windows;

    let mut ctrl_c = windows::ctrl_c()?;
    let mut ctrl_break = windows::ctrl_break()?;
    tokio::select! {
        _ = ctrl_c.recv() => debug!("Received CTRL-C, cancelling token"),
        _ = ctrl_break.recv() => debug!("Received CTRL-BREAK, cancelling token"),
    }
    Ok(())
}
