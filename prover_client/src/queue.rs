//! Proof requests as plain data, and a FIFO decoupling the orchestrator from
//! the agents that compute them.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{anyhow, bail};
use hashbrown::HashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, Notify};
use tracing::{debug, warn};

use crate::circuit_prover::{AbortSignal, CircuitProver};
use crate::circuits::{
    BaseOrMergeRollupPublicInputs, BaseParityInputs, BaseRollupInputs, MergeRollupInputs,
    RootParityInput, RootParityInputs, RootRollupInputs, RootRollupPublicInputs,
};
use crate::proof_types::PublicInputsAndProof;

/// One proof to compute, tagged by circuit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "inputs")]
pub enum ProvingRequest {
    BaseParity(BaseParityInputs),
    RootParity(RootParityInputs),
    BaseRollup(BaseRollupInputs),
    MergeRollup(MergeRollupInputs),
    RootRollup(RootRollupInputs),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "result")]
pub enum ProvingRequestResult {
    BaseParity(RootParityInput),
    RootParity(RootParityInput),
    BaseRollup(PublicInputsAndProof<BaseOrMergeRollupPublicInputs>),
    MergeRollup(PublicInputsAndProof<BaseOrMergeRollupPublicInputs>),
    RootRollup(PublicInputsAndProof<RootRollupPublicInputs>),
}

impl ProvingRequest {
    pub fn name(&self) -> &'static str {
        match self {
            Self::BaseParity(_) => "BaseParity",
            Self::RootParity(_) => "RootParity",
            Self::BaseRollup(_) => "BaseRollup",
            Self::MergeRollup(_) => "MergeRollup",
            Self::RootRollup(_) => "RootRollup",
        }
    }

    /// Computes this request with `prover`.
    pub async fn prove_with<P: CircuitProver>(
        self,
        prover: &P,
        signal: Option<AbortSignal>,
    ) -> anyhow::Result<ProvingRequestResult> {
        Ok(match self {
            Self::BaseParity(inputs) => ProvingRequestResult::BaseParity(
                prover.get_base_parity_proof(inputs, signal).await?,
            ),
            Self::RootParity(inputs) => ProvingRequestResult::RootParity(
                prover.get_root_parity_proof(inputs, signal).await?,
            ),
            Self::BaseRollup(inputs) => ProvingRequestResult::BaseRollup(
                prover.get_base_rollup_proof(inputs, signal).await?,
            ),
            Self::MergeRollup(inputs) => ProvingRequestResult::MergeRollup(
                prover.get_merge_rollup_proof(inputs, signal).await?,
            ),
            Self::RootRollup(inputs) => ProvingRequestResult::RootRollup(
                prover.get_root_rollup_proof(inputs, signal).await?,
            ),
        })
    }
}

impl ProvingRequestResult {
    pub fn name(&self) -> &'static str {
        match self {
            Self::BaseParity(_) => "BaseParity",
            Self::RootParity(_) => "RootParity",
            Self::BaseRollup(_) => "BaseRollup",
            Self::MergeRollup(_) => "MergeRollup",
            Self::RootRollup(_) => "RootRollup",
        }
    }

    fn unexpected(&self, expected: &str) -> anyhow::Error {
        anyhow!("expected a {expected} result, got {}", self.name())
    }

    pub fn into_base_parity(self) -> anyhow::Result<RootParityInput> {
        match self {
            Self::BaseParity(output) => Ok(output),
            other => Err(other.unexpected("BaseParity")),
        }
    }

    pub fn into_root_parity(self) -> anyhow::Result<RootParityInput> {
        match self {
            Self::RootParity(output) => Ok(output),
            other => Err(other.unexpected("RootParity")),
        }
    }

    pub fn into_base_rollup(
        self,
    ) -> anyhow::Result<PublicInputsAndProof<BaseOrMergeRollupPublicInputs>> {
        match self {
            Self::BaseRollup(output) => Ok(output),
            other => Err(other.unexpected("BaseRollup")),
        }
    }

    pub fn into_merge_rollup(
        self,
    ) -> anyhow::Result<PublicInputsAndProof<BaseOrMergeRollupPublicInputs>> {
        match self {
            Self::MergeRollup(output) => Ok(output),
            other => Err(other.unexpected("MergeRollup")),
        }
    }

    pub fn into_root_rollup(self) -> anyhow::Result<PublicInputsAndProof<RootRollupPublicInputs>> {
        match self {
            Self::RootRollup(output) => Ok(output),
            other => Err(other.unexpected("RootRollup")),
        }
    }
}

/// Implements [`CircuitProver`] for a type with an inherent
/// `async fn submit(&self, ProvingRequest, Option<AbortSignal>) ->
/// anyhow::Result<ProvingRequestResult>`.
macro_rules! circuit_prover_via_submit {
    (impl $(<$($gen:ident: $bound:path),+>)? for $ty:ty) => {
        impl $(<$($gen: $bound + 'static),+>)? $crate::circuit_prover::CircuitProver for $ty {
            async fn get_base_parity_proof(
                &self,
                inputs: $crate::circuits::BaseParityInputs,
                signal: Option<$crate::circuit_prover::AbortSignal>,
            ) -> anyhow::Result<$crate::circuits::RootParityInput> {
                self.submit($crate::queue::ProvingRequest::BaseParity(inputs), signal)
                    .await?
                    .into_base_parity()
            }

            async fn get_root_parity_proof(
                &self,
                inputs: $crate::circuits::RootParityInputs,
                signal: Option<$crate::circuit_prover::AbortSignal>,
            ) -> anyhow::Result<$crate::circuits::RootParityInput> {
                self.submit($crate::queue::ProvingRequest::RootParity(inputs), signal)
                    .await?
                    .into_root_parity()
            }

            async fn get_base_rollup_proof(
                &self,
                inputs: $crate::circuits::BaseRollupInputs,
                signal: Option<$crate::circuit_prover::AbortSignal>,
            ) -> anyhow::Result<
                $crate::proof_types::PublicInputsAndProof<
                    $crate::circuits::BaseOrMergeRollupPublicInputs,
                >,
            > {
                self.submit($crate::queue::ProvingRequest::BaseRollup(inputs), signal)
                    .await?
                    .into_base_rollup()
            }

            async fn get_merge_rollup_proof(
                &self,
                inputs: $crate::circuits::MergeRollupInputs,
                signal: Option<$crate::circuit_prover::AbortSignal>,
            ) -> anyhow::Result<
                $crate::proof_types::PublicInputsAndProof<
                    $crate::circuits::BaseOrMergeRollupPublicInputs,
                >,
            > {
                self.submit($crate::queue::ProvingRequest::MergeRollup(inputs), signal)
                    .await?
                    .into_merge_rollup()
            }

            async fn get_root_rollup_proof(
                &self,
                inputs: $crate::circuits::RootRollupInputs,
                signal: Option<$crate::circuit_prover::AbortSignal>,
            ) -> anyhow::Result<
                $crate::proof_types::PublicInputsAndProof<
                    $crate::circuits::RootRollupPublicInputs,
                >,
            > {
                self.submit($crate::queue::ProvingRequest::RootRollup(inputs), signal)
                    .await?
                    .into_root_rollup()
            }
        }
    };
}
pub(crate) use circuit_prover_via_submit;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvingJob {
    pub id: JobId,
    pub request: ProvingRequest,
}

/// The worker side of a proving queue.
pub trait ProvingQueueConsumer: Send + Sync {
    /// Waits up to `timeout` for a job. Returns `None` when none arrived.
    fn take(
        &self,
        timeout: Duration,
    ) -> impl Future<Output = anyhow::Result<Option<ProvingJob>>> + Send;

    fn resolve(
        &self,
        id: JobId,
        result: ProvingRequestResult,
    ) -> impl Future<Output = anyhow::Result<()>> + Send;

    fn reject(&self, id: JobId, reason: String) -> impl Future<Output = anyhow::Result<()>> + Send;
}

type JobResult = Result<ProvingRequestResult, String>;

/// Reason given to submitters whose jobs were dropped by
/// [`MemoryProvingQueue::cancel_all`].
pub const QUEUE_CANCELLED_REASON: &str = "proving queue cancelled";

struct QueuedJob {
    job: ProvingJob,
    signal: Option<AbortSignal>,
}

impl QueuedJob {
    fn is_aborted(&self) -> bool {
        self.signal.as_ref().is_some_and(AbortSignal::is_aborted)
    }
}

#[derive(Default)]
struct QueueInner {
    jobs: VecDeque<QueuedJob>,
    pending: HashMap<JobId, oneshot::Sender<JobResult>>,
}

impl QueueInner {
    fn complete(&mut self, id: JobId, result: JobResult) {
        match self.pending.remove(&id) {
            Some(tx) => {
                if tx.send(result).is_err() {
                    debug!("Submitter of job {id} is gone");
                }
            }
            None => warn!("Ignoring result for unknown job {id}"),
        }
    }
}

/// An in-process FIFO of proving jobs.
///
/// Submitting a request parks the caller until some consumer resolves or
/// rejects the job by id, so consumers may live elsewhere as long as they
/// can reach the queue.
#[derive(Default)]
pub struct MemoryProvingQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
    next_id: AtomicU64,
}

impl MemoryProvingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of jobs waiting to be taken.
    pub fn len(&self) -> usize {
        self.inner.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of jobs submitted but not yet resolved or rejected.
    pub fn num_pending(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Enqueues `request` and waits for its result.
    pub async fn submit(
        &self,
        request: ProvingRequest,
        signal: Option<AbortSignal>,
    ) -> anyhow::Result<ProvingRequestResult> {
        if signal.as_ref().is_some_and(AbortSignal::is_aborted) {
            bail!("{} request aborted before submission", request.name());
        }

        let (tx, rx) = oneshot::channel();
        let id = {
            let mut inner = self.inner.lock();
            let id = JobId(self.next_id.fetch_add(1, Ordering::Relaxed));
            debug!("Enqueuing {} job {id}", request.name());
            inner.pending.insert(id, tx);
            inner.jobs.push_back(QueuedJob {
                job: ProvingJob { id, request },
                signal,
            });
            id
        };
        self.notify.notify_one();

        match rx.await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(reason)) => Err(anyhow!(reason)),
            Err(_) => bail!("job {id} was dropped without a result"),
        }
    }

    /// Rejects every job not yet resolved, whether still queued or already
    /// handed to an agent. Results reported later for those jobs are ignored.
    pub fn cancel_all(&self) {
        let mut inner = self.inner.lock();
        inner.jobs.clear();
        let ids = inner.pending.keys().copied().collect::<Vec<_>>();
        if !ids.is_empty() {
            debug!("Cancelling {} proving jobs", ids.len());
        }
        for id in ids {
            inner.complete(id, Err(QUEUE_CANCELLED_REASON.to_string()));
        }
    }

    /// Pops the oldest job whose submitter still wants it. Aborted jobs are
    /// rejected on the way.
    fn try_take(&self) -> Option<ProvingJob> {
        let mut inner = self.inner.lock();
        let job = loop {
            let queued = inner.jobs.pop_front()?;
            if !queued.is_aborted() {
                break queued.job;
            }
            let ProvingJob { id, request } = queued.job;
            debug!("Dropping aborted {} job {id}", request.name());
            inner.complete(id, Err(format!("{} job {id} aborted", request.name())));
        };
        // Hand the wakeup on if more work is waiting.
        if !inner.jobs.is_empty() {
            self.notify.notify_one();
        }
        Some(job)
    }

    fn complete(&self, id: JobId, result: JobResult) {
        self.inner.lock().complete(id, result);
    }
}

impl ProvingQueueConsumer for MemoryProvingQueue {
    async fn take(&self, timeout: Duration) -> anyhow::Result<Option<ProvingJob>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(job) = self.try_take() {
                return Ok(Some(job));
            }
            if tokio::time::timeout_at(deadline, self.notify.notified())
                .await
                .is_err()
            {
                return Ok(None);
            }
        }
    }

    async fn resolve(&self, id: JobId, result: ProvingRequestResult) -> anyhow::Result<()> {
        self.complete(id, Ok(result));
        Ok(())
    }

    async fn reject(&self, id: JobId, reason: String) -> anyhow::Result<()> {
        self.complete(id, Err(reason));
        Ok(())
    }
}

circuit_prover_via_submit!(impl for MemoryProvingQueue);
