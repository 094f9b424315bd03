//! Single-flight token refresh queue
//!
//! One background task owns the queue of waiting callers. Callers enqueue a
//! job over an mpsc channel and are resumed through a continuation, so no
//! lock is held by callers during the refresh round-trip. Only the worker
//! ever calls the token source, which is what keeps at most one refresh
//! in flight.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

use crate::tokens::{RefreshError, Token, TokenStore};

/// Work to resume once a token is available.
///
/// Continuations run on the worker task, in enqueue order. They must not
/// block: resuming an awaiting caller or spawning a task is the intent.
pub type Continuation = Box<dyn FnOnce(Result<Token, RefreshError>) + Send>;

enum Job {
    /// Resume with the current token once any in-flight refresh settles
    Settled(Continuation),
    /// Resume with a token other than `stale`, refreshing if nobody has yet
    Refresh { stale: Token, resume: Continuation },
}

impl Job {
    fn needs_refresh(&self, current: Option<&Token>) -> bool {
        match self {
            Job::Settled(_) => false,
            Job::Refresh { stale, .. } => current == Some(stale),
        }
    }

    fn resume(self, outcome: Result<Token, RefreshError>) {
        match self {
            Job::Settled(resume) | Job::Refresh { resume, .. } => resume(outcome),
        }
    }
}

/// Serializes token refreshes across every caller sharing a `TokenStore`.
///
/// Dropping the queue closes the channel, which stops the worker once it
/// has drained the jobs already enqueued.
pub struct RefreshQueue {
    refreshing: Arc<AtomicBool>,
    tx: mpsc::UnboundedSender<Job>,
}

impl RefreshQueue {
    /// Spawn the worker task. Must be called inside a tokio runtime.
    pub fn spawn(store: Arc<TokenStore>, refresh_timeout: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let refreshing = Arc::new(AtomicBool::new(false));

        tokio::spawn(run_worker(
            rx,
            store,
            Arc::clone(&refreshing),
            refresh_timeout,
        ));

        Self { refreshing, tx }
    }

    /// True exactly while a refresh call is outstanding.
    pub fn is_refreshing(&self) -> bool {
        self.refreshing.load(Ordering::SeqCst)
    }

    /// Queue `resume` to run with the current token once any in-flight
    /// refresh has settled.
    pub fn enqueue(&self, resume: impl FnOnce(Result<Token, RefreshError>) + Send + 'static) {
        self.submit(Job::Settled(Box::new(resume)));
    }

    /// Queue `resume` to run with a token newer than `stale`.
    ///
    /// Starts a refresh unless one is already in flight or the store has
    /// already moved past `stale`.
    pub fn enqueue_and_refresh(
        &self,
        stale: Token,
        resume: impl FnOnce(Result<Token, RefreshError>) + Send + 'static,
    ) {
        self.submit(Job::Refresh {
            stale,
            resume: Box::new(resume),
        });
    }

    /// Wait for any in-flight refresh, then return the current token.
    pub async fn acquire(&self) -> Result<Token, RefreshError> {
        let (tx, rx) = oneshot::channel();
        self.enqueue(move |outcome| {
            let _ = tx.send(outcome);
        });
        rx.await.map_err(|_| RefreshError::QueueClosed)?
    }

    /// Return a token newer than `stale`, refreshing at most once per wave.
    pub async fn refresh_after(&self, stale: Token) -> Result<Token, RefreshError> {
        let (tx, rx) = oneshot::channel();
        self.enqueue_and_refresh(stale, move |outcome| {
            let _ = tx.send(outcome);
        });
        rx.await.map_err(|_| RefreshError::QueueClosed)?
    }

    fn submit(&self, job: Job) {
        if let Err(mpsc::error::SendError(job)) = self.tx.send(job) {
            error!("Refresh queue worker is gone");
            job.resume(Err(RefreshError::QueueClosed));
        }
    }
}

impl fmt::Debug for RefreshQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshQueue")
            .field("refreshing", &self.is_refreshing())
            .finish()
    }
}

// ============================================================================
// Worker task
// ============================================================================

async fn run_worker(
    mut rx: mpsc::UnboundedReceiver<Job>,
    store: Arc<TokenStore>,
    refreshing: Arc<AtomicBool>,
    refresh_timeout: Duration,
) {
    while let Some(job) = rx.recv().await {
        let current = store.token().await;
        if !job.needs_refresh(current.as_ref()) {
            job.resume(current.ok_or(RefreshError::NoCredentials));
            continue;
        }

        refreshing.store(true, Ordering::SeqCst);
        let outcome = refresh_once(&store, refresh_timeout).await;

        // Everything enqueued during the round-trip waits on this refresh
        let mut wave = vec![job];
        while let Ok(job) = rx.try_recv() {
            wave.push(job);
        }

        match &outcome {
            Ok(token) => {
                store.set_token(token.clone()).await;
                info!(waiting = wave.len(), "Token refreshed");
            }
            Err(e) => {
                error!(error = %e, waiting = wave.len(), "Token refresh failed, logging out");
                store.logout().await;
            }
        }
        refreshing.store(false, Ordering::SeqCst);

        for job in wave {
            job.resume(outcome.clone());
        }
    }

    debug!("Refresh queue exiting (channel closed)");
}

async fn refresh_once(store: &TokenStore, refresh_timeout: Duration) -> Result<Token, RefreshError> {
    debug!("Starting token refresh");
    tokio::time::timeout(refresh_timeout, store.refresh())
        .await
        .unwrap_or(Err(RefreshError::Timeout))
}
