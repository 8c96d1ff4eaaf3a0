//! Cancellation tokens and the one-job-at-a-time executor used per resource.

use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

/// Cooperative cancellation flag shared between a job and its owner.
#[derive(Debug, Clone)]
pub struct CancelToken {
    sender: Arc<watch::Sender<bool>>,
    receiver: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
            receiver,
        }
    }

    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once [`CancelToken::cancel`] has been called on any clone.
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        // the sender lives as long as any clone of this token
        let _ = receiver.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

struct InFlight {
    id: u64,
    token: CancelToken,
    handle: JoinHandle<()>,
}

/// Runs at most one job at a time; starting a new job cancels the previous one.
pub struct SingleFlight {
    name: &'static str,
    current: Mutex<Option<InFlight>>,
    next_id: Mutex<u64>,
}

impl SingleFlight {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            current: Mutex::new(None),
            next_id: Mutex::new(0),
        }
    }

    /// Cancels the running job, if any, and spawns `job` with a fresh token.
    ///
    /// Returns the id of the new job.
    pub fn replace<F, Fut>(&self, job: F) -> u64
    where
        F: FnOnce(CancelToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = {
            let mut next = self.next_id.lock();
            *next += 1;
            *next
        };

        let token = CancelToken::new();
        let handle = tokio::spawn(job(token.clone()));

        let previous = self.current.lock().replace(InFlight { id, token, handle });
        if let Some(previous) = previous {
            if !previous.handle.is_finished() {
                debug!("{}: job {} replaced by job {}", self.name, previous.id, id);
            }
            previous.token.cancel();
        }
        id
    }

    /// Cancels the running job. Returns whether one was still running.
    pub fn cancel(&self) -> bool {
        match self.current.lock().take() {
            Some(job) => {
                let running = !job.handle.is_finished();
                job.token.cancel();
                if running {
                    debug!("{}: job {} cancelled", self.name, job.id);
                }
                running
            }
            None => false,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.current
            .lock()
            .as_ref()
            .map(|job| !job.handle.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for SingleFlight {
    fn drop(&mut self) {
        if let Some(job) = self.current.get_mut().take() {
            job.token.cancel();
        }
    }
}
