use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};

use crate::CancellationToken;

type Job = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// How a queued operation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationOutcome<R> {
    Completed(R),
    /// Superseded or cancelled by its caller, before or while it ran.
    Cancelled,
    Failed(treevirt::Error),
    /// The operation panicked. Carries the panic message when it had one.
    Panicked(String),
}

impl<R> OperationOutcome<R> {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn completed(self) -> Option<R> {
        match self {
            Self::Completed(r) => Some(r),
            _ => None,
        }
    }

    fn from_result(result: treevirt::Result<R>) -> Self {
        match result {
            Ok(r) => Self::Completed(r),
            Err(treevirt::Error::Cancelled) => Self::Cancelled,
            Err(err) => Self::Failed(err),
        }
    }
}

/// Handle to one queued operation.
#[derive(Debug)]
pub struct OperationHandle<R> {
    id: u64,
    token: CancellationToken,
    rx: oneshot::Receiver<OperationOutcome<R>>,
}

impl<R> OperationHandle<R> {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Waits for the operation to finish. A queue shut down underneath the
    /// operation reports it as cancelled.
    pub async fn wait(self) -> OperationOutcome<R> {
        self.rx.await.unwrap_or(OperationOutcome::Cancelled)
    }

    /// Blocking variant of [`OperationHandle::wait`], for callers outside the runtime.
    pub fn blocking_wait(self) -> OperationOutcome<R> {
        self.rx.blocking_recv().unwrap_or(OperationOutcome::Cancelled)
    }
}

/// Runs mutating operations one at a time, in submission order.
///
/// Work executes on the blocking pool of the runtime the queue was created
/// on; the worker task holds a one-slot gate for the duration of each
/// operation. Cancellable submissions supersede each other: submitting one
/// cancels the previous cancellable operation, queued or running.
pub struct OperationQueue {
    tx: mpsc::UnboundedSender<Job>,
    gate: Arc<tokio::sync::Mutex<()>>,
    current: Mutex<Option<CancellationToken>>,
    pending: Arc<AtomicUsize>,
    next_id: AtomicU64,
    runtime: Handle,
}

impl OperationQueue {
    /// Starts the worker on `runtime`.
    pub fn new(runtime: Handle) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let gate = Arc::new(tokio::sync::Mutex::new(()));
        runtime.spawn(run_worker(rx, Arc::clone(&gate)));
        Self {
            tx,
            gate,
            current: Mutex::new(None),
            pending: Arc::new(AtomicUsize::new(0)),
            next_id: AtomicU64::new(1),
            runtime,
        }
    }

    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }

    /// Operations submitted but not yet finished.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Queues `op`. It is not superseded by later submissions.
    pub fn submit<R, F>(&self, name: &'static str, op: F) -> OperationHandle<R>
    where
        R: Send + 'static,
        F: FnOnce(&CancellationToken) -> treevirt::Result<R> + Send + 'static,
    {
        self.enqueue(name, CancellationToken::new(), op)
    }

    /// Queues `op`, cancelling the previous cancellable operation.
    ///
    /// When `caller` is given, cancelling it also cancels this operation.
    pub fn submit_cancellable<R, F>(
        &self,
        name: &'static str,
        caller: Option<&CancellationToken>,
        op: F,
    ) -> OperationHandle<R>
    where
        R: Send + 'static,
        F: FnOnce(&CancellationToken) -> treevirt::Result<R> + Send + 'static,
    {
        let token = match caller {
            Some(caller) => caller.child_token(),
            None => CancellationToken::new(),
        };
        if let Some(previous) = self.current.lock().replace(token.clone()) {
            if !previous.is_cancelled() {
                tracing::debug!(target: "treevirt_runtime", op = name, "superseding previous operation");
                previous.cancel();
            }
        }
        self.enqueue(name, token, op)
    }

    /// Resolves once everything submitted before the call has finished.
    pub async fn flush(&self) {
        let handle = self.submit("flush", |_| Ok(()));
        let _ = handle.wait().await;
    }

    /// Runs `f` while holding the queue's gate, so no queued operation runs
    /// concurrently with it.
    pub async fn exclusive<R>(&self, f: impl FnOnce() -> R) -> R {
        let _slot = self.gate.lock().await;
        f()
    }

    fn enqueue<R, F>(&self, name: &'static str, token: CancellationToken, op: F) -> OperationHandle<R>
    where
        R: Send + 'static,
        F: FnOnce(&CancellationToken) -> treevirt::Result<R> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (done_tx, done_rx) = oneshot::channel();
        let pending = Arc::clone(&self.pending);
        let job_token = token.clone();

        let job: Job = Box::new(move || {
            async move {
                let outcome = if job_token.is_cancelled() {
                    OperationOutcome::Cancelled
                } else {
                    let run_token = job_token.clone();
                    match tokio::task::spawn_blocking(move || op(&run_token)).await {
                        Ok(result) => OperationOutcome::from_result(result),
                        Err(err) if err.is_panic() => OperationOutcome::Panicked(panic_message(err.into_panic())),
                        // The runtime is shutting down underneath the operation.
                        Err(_) => OperationOutcome::Cancelled,
                    }
                };
                match &outcome {
                    OperationOutcome::Completed(_) => {
                        tracing::trace!(target: "treevirt_runtime", op = name, id, "operation completed");
                    }
                    OperationOutcome::Cancelled => {
                        tracing::trace!(target: "treevirt_runtime", op = name, id, "operation cancelled");
                    }
                    OperationOutcome::Failed(err) => {
                        tracing::warn!(target: "treevirt_runtime", op = name, id, error = %err, "operation failed");
                    }
                    OperationOutcome::Panicked(message) => {
                        tracing::error!(target: "treevirt_runtime", op = name, id, panic = %message, "operation panicked");
                    }
                }
                pending.fetch_sub(1, Ordering::AcqRel);
                let _ = done_tx.send(outcome);
            }
            .boxed()
        });

        self.pending.fetch_add(1, Ordering::AcqRel);
        tracing::trace!(target: "treevirt_runtime", op = name, id, "operation submitted");
        if self.tx.send(job).is_err() {
            // Worker is gone; the dropped job resolves the handle as cancelled.
            self.pending.fetch_sub(1, Ordering::AcqRel);
            tracing::warn!(target: "treevirt_runtime", op = name, id, "operation queue closed");
        }

        OperationHandle {
            id,
            token,
            rx: done_rx,
        }
    }
}

impl core::fmt::Debug for OperationQueue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("OperationQueue")
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => match payload.downcast::<&'static str>() {
            Ok(message) => (*message).to_owned(),
            Err(_) => String::from("non-string panic payload"),
        },
    }
}

async fn run_worker(mut rx: mpsc::UnboundedReceiver<Job>, gate: Arc<tokio::sync::Mutex<()>>) {
    while let Some(job) = rx.recv().await {
        let _slot = gate.lock().await;
        job().await;
    }
    tracing::trace!(target: "treevirt_runtime", "operation queue worker stopped");
}
