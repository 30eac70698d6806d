//! Batch coordination.
//!
//! Operations are queued while a batch scope is open and flushed as one
//! transport round trip. Responses are demultiplexed by correlation id, every
//! operation is staged, and only then are staged results applied, all without
//! yielding. A flush that is dropped before its responses arrive therefore
//! applies nothing.

use std::collections::{HashMap, VecDeque};
use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context as TaskContext, Poll};

use sitegraph_client::{
    BatchResponse, CorrelationId, Document, RequestDescriptor, Transport, TransportError,
};
use tokio::sync::oneshot;
use tracing::{debug, instrument, warn};

use crate::error::BatchFailure;
use crate::{OrmError, OrmResult};

/// Applies a staged result. Runs after every operation of the flush was staged.
pub(crate) type Commit<T> = Box<dyn FnOnce() -> OrmResult<T> + Send>;

/// Turns the operation's responses (one per descriptor, in order) into a commit.
pub(crate) type Stage<T> =
    Box<dyn FnOnce(Vec<Result<Document, TransportError>>) -> OrmResult<Commit<T>> + Send>;

/// One logical operation: its descriptors and what to do with their responses.
pub(crate) struct Operation<T> {
    pub(crate) label: String,
    pub(crate) descriptors: Vec<RequestDescriptor>,
    pub(crate) stage: Stage<T>,
}

impl<T> Operation<T> {
    pub(crate) fn new(label: impl Into<String>, descriptors: Vec<RequestDescriptor>, stage: Stage<T>) -> Self {
        Self {
            label: label.into(),
            descriptors,
            stage,
        }
    }
}

trait Pending: Send {
    fn label(&self) -> &str;
    fn descriptors(&self) -> &[RequestDescriptor];
    fn stage(self: Box<Self>, results: Vec<Result<Document, TransportError>>) -> Box<dyn Staged>;
}

trait Staged: Send {
    /// Apply and deliver to the waiter. Returns the error delivered, if any.
    fn commit(self: Box<Self>) -> Option<OrmError>;
}

struct Queued<T> {
    operation: Operation<T>,
    sender: oneshot::Sender<OrmResult<T>>,
}

impl<T: Send + 'static> Pending for Queued<T> {
    fn label(&self) -> &str {
        &self.operation.label
    }

    fn descriptors(&self) -> &[RequestDescriptor] {
        &self.operation.descriptors
    }

    fn stage(self: Box<Self>, results: Vec<Result<Document, TransportError>>) -> Box<dyn Staged> {
        let Queued { operation, sender } = *self;
        Box::new(StagedOperation {
            commit: (operation.stage)(results),
            sender,
        })
    }
}

struct StagedOperation<T> {
    commit: OrmResult<Commit<T>>,
    sender: oneshot::Sender<OrmResult<T>>,
}

impl<T: Send + 'static> Staged for StagedOperation<T> {
    fn commit(self: Box<Self>) -> Option<OrmError> {
        let StagedOperation { commit, sender } = *self;
        let result = commit.and_then(|apply| apply());
        let error = result.as_ref().err().cloned();
        // the waiter may have been dropped; the result is applied either way
        let _ = sender.send(result);
        error
    }
}

/// Handle to the result of a queued operation.
///
/// Resolves once the batch carrying the operation has been executed. Resolves
/// to `Cancelled` when the batch is dropped or cancelled first.
pub struct BatchItem<T> {
    label: String,
    receiver: oneshot::Receiver<OrmResult<T>>,
}

impl<T> BatchItem<T> {
    /// An item that is already resolved.
    pub(crate) fn ready(label: impl Into<String>, result: OrmResult<T>) -> Self {
        let (sender, receiver) = oneshot::channel();
        let _ = sender.send(result);
        Self {
            label: label.into(),
            receiver,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// The result if the batch has already run.
    pub fn try_result(&mut self) -> Option<OrmResult<T>> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(OrmError::Cancelled)),
        }
    }
}

impl<T> Future for BatchItem<T> {
    type Output = OrmResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(OrmError::Cancelled)))
    }
}

impl<T> Debug for BatchItem<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchItem").field("label", &self.label).finish()
    }
}

/// Outcome of a successfully executed batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchSummary {
    pub operations: usize,
    pub descriptors: usize,
    pub round_trips: usize,
}

#[derive(Default)]
struct BatchState {
    open: bool,
    pending: Vec<Box<dyn Pending>>,
}

/// Queues operations of one context and flushes them together.
///
/// At most one scope is open at a time.
pub struct BatchCoordinator {
    transport: Arc<dyn Transport>,
    state: Mutex<BatchState>,
}

impl BatchCoordinator {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            state: Mutex::new(BatchState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, BatchState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Open a batch scope. Fails with `Usage` when one is already open.
    pub fn begin(&self) -> OrmResult<()> {
        let mut state = self.state();
        if state.open {
            return Err(OrmError::usage(
                "a batch is already open; execute it before beginning another",
            ));
        }
        state.open = true;
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.state().open
    }

    /// Number of queued operations.
    pub fn pending(&self) -> usize {
        self.state().pending.len()
    }

    pub(crate) fn enqueue<T: Send + 'static>(&self, operation: Operation<T>) -> OrmResult<BatchItem<T>> {
        let mut state = self.state();
        if !state.open {
            return Err(OrmError::usage(format!(
                "`{}` was queued without an open batch; call begin_batch first",
                operation.label
            )));
        }
        let (sender, receiver) = oneshot::channel();
        let label = operation.label.clone();
        debug!("queued {} ({} descriptor(s))", label, operation.descriptors.len());
        state.pending.push(Box::new(Queued { operation, sender }));
        Ok(BatchItem { label, receiver })
    }

    fn take(&self) -> OrmResult<Vec<Box<dyn Pending>>> {
        let mut state = self.state();
        if !state.open {
            return Err(OrmError::usage("no batch is open"));
        }
        state.open = false;
        Ok(std::mem::take(&mut state.pending))
    }

    /// Send every queued operation in one round trip and close the scope.
    ///
    /// Each waiter receives its own result. Fails with `BatchPartialFailure`
    /// listing the failed operations when any of them failed.
    pub async fn execute(&self) -> OrmResult<BatchSummary> {
        let pending = self.take()?;
        self.flush(pending).await
    }

    /// Like [`execute`](Self::execute), abandoning the batch when `cancel`
    /// completes first. An abandoned batch applies nothing and its waiters
    /// resolve to `Cancelled`.
    pub async fn execute_until<F>(&self, cancel: F) -> OrmResult<BatchSummary>
    where
        F: Future<Output = ()>,
    {
        let pending = self.take()?;
        let flush = self.flush(pending);
        tokio::select! {
            result = flush => result,
            _ = cancel => {
                warn!("batch cancelled before completion");
                Err(OrmError::Cancelled)
            }
        }
    }

    /// Execute a single operation immediately as an implicit one-item batch.
    pub(crate) async fn run<T: Send + 'static>(&self, operation: Operation<T>) -> OrmResult<T> {
        let (sender, receiver) = oneshot::channel();
        let pending: Vec<Box<dyn Pending>> = vec![Box::new(Queued { operation, sender })];
        // the operation's own error reaches the receiver
        let _ = self.flush(pending).await;
        receiver.await.unwrap_or(Err(OrmError::Cancelled))
    }

    #[instrument(
        name = "sitegraph.batch.flush",
        skip(self, pending),
        fields(operations = pending.len()),
        err
    )]
    async fn flush(&self, pending: Vec<Box<dyn Pending>>) -> OrmResult<BatchSummary> {
        if pending.is_empty() {
            debug!("empty batch, nothing to send");
            return Ok(BatchSummary::default());
        }

        let descriptors: Vec<RequestDescriptor> = pending
            .iter()
            .flat_map(|p| p.descriptors().iter().cloned())
            .collect();
        let descriptor_count = descriptors.len();

        let responses = match descriptors.len() {
            0 => Vec::new(),
            1 => {
                let request = &descriptors[0];
                vec![BatchResponse {
                    correlation_id: request.correlation_id,
                    result: self.transport.send(request).await,
                }]
            }
            _ => self.transport.send_batch(descriptors).await,
        };
        let round_trips = usize::from(descriptor_count > 0);

        let mut by_id: HashMap<CorrelationId, VecDeque<Result<Document, TransportError>>> =
            HashMap::new();
        for response in responses {
            by_id
                .entry(response.correlation_id)
                .or_default()
                .push_back(response.result);
        }

        let operations = pending.len();
        let staged: Vec<(String, Box<dyn Staged>)> = pending
            .into_iter()
            .map(|operation| {
                let results = operation
                    .descriptors()
                    .iter()
                    .map(|d| {
                        by_id
                            .get_mut(&d.correlation_id)
                            .and_then(VecDeque::pop_front)
                            .unwrap_or_else(|| {
                                Err(TransportError::Other(format!("no response for {}", d)))
                            })
                    })
                    .collect();
                let label = operation.label().to_string();
                (label, operation.stage(results))
            })
            .collect();

        let failures: Vec<BatchFailure> = staged
            .into_iter()
            .enumerate()
            .filter_map(|(index, (label, staged))| {
                staged.commit().map(|error| BatchFailure { index, label, error })
            })
            .collect();

        if failures.is_empty() {
            Ok(BatchSummary {
                operations,
                descriptors: descriptor_count,
                round_trips,
            })
        } else {
            Err(OrmError::BatchPartialFailure {
                failed: failures.len(),
                succeeded: operations - failures.len(),
                failures,
            })
        }
    }
}

impl Debug for BatchCoordinator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("BatchCoordinator")
            .field("open", &state.open)
            .field("pending", &state.pending.len())
            .finish()
    }
}
