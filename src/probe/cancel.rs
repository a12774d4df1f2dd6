//! Cooperative cancellation
//!
//! A [`CancelToken`] is threaded through every network call of a run. It
//! trips either when its deadline passes or when someone cancels it
//! explicitly, and remembers which of the two happened first.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Instant;

/// Why a token was tripped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CancelReason {
    /// The run outlived its overall deadline
    Deadline,
    /// A newer run replaced this one
    Superseded,
    /// The owning probe is being torn down
    Shutdown,
}

impl std::fmt::Display for CancelReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CancelReason::Deadline => write!(f, "deadline exceeded"),
            CancelReason::Superseded => write!(f, "superseded by a newer run"),
            CancelReason::Shutdown => write!(f, "shut down"),
        }
    }
}

/// Cloneable cancellation scope with an optional deadline
#[derive(Debug, Clone)]
pub struct CancelToken {
    deadline: Option<Instant>,
    reason: Arc<watch::Sender<Option<CancelReason>>>,
}

impl CancelToken {
    /// A token that only trips when cancelled explicitly
    pub fn new() -> Self {
        let (reason, _) = watch::channel(None);
        Self {
            deadline: None,
            reason: Arc::new(reason),
        }
    }

    /// A token that also trips `timeout` from now
    pub fn with_deadline(timeout: std::time::Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
            ..Self::new()
        }
    }

    /// Trip the token. The first reason wins.
    pub fn cancel(&self, reason: CancelReason) {
        self.reason.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(reason);
                true
            } else {
                false
            }
        });
    }

    /// Fail if the token has tripped
    pub fn checkpoint(&self) -> Result<(), CancelReason> {
        if let Some(reason) = *self.reason.borrow() {
            return Err(reason);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(CancelReason::Deadline),
            _ => Ok(()),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.checkpoint().is_err()
    }

    /// Resolve once the token trips
    pub async fn cancelled(&self) -> CancelReason {
        let mut rx = self.reason.subscribe();
        let deadline = async {
            match self.deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(deadline);

        loop {
            if let Some(reason) = *rx.borrow_and_update() {
                return reason;
            }
            tokio::select! {
                _ = &mut deadline => {
                    self.cancel(CancelReason::Deadline);
                }
                changed = rx.changed() => {
                    if changed.is_err() {
                        return CancelReason::Shutdown;
                    }
                }
            }
        }
    }

    /// Drive `fut` to completion unless the token trips first
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, CancelReason> {
        self.checkpoint()?;
        tokio::select! {
            biased;
            reason = self.cancelled() => Err(reason),
            output = fut => Ok(output),
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}
