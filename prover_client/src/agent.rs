//! Workers that compute proofs for a queue, and an in-process pool that
//! spreads calls across several provers without one.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{ensure, Context as _};
use futures::FutureExt as _;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::circuit_prover::{AbortSignal, CircuitProver};
use crate::error::panic_message;
use crate::queue::{
    circuit_prover_via_submit, ProvingJob, ProvingQueueConsumer, ProvingRequest,
    ProvingRequestResult,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AgentStatus {
    Idle,
    Busy,
}

/// Polls a queue for jobs and proves them one at a time.
pub struct ProvingAgent<P> {
    prover: Arc<P>,
    poll_timeout: Duration,
    busy: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl<P: CircuitProver + 'static> ProvingAgent<P> {
    pub fn new(prover: Arc<P>, poll_timeout: Duration) -> Self {
        Self {
            prover,
            poll_timeout,
            busy: Arc::new(AtomicBool::new(false)),
            stop: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    pub fn status(&self) -> AgentStatus {
        if self.busy.load(Ordering::SeqCst) {
            AgentStatus::Busy
        } else {
            AgentStatus::Idle
        }
    }

    /// Spawns the poll loop on the current runtime.
    pub fn start<Q: ProvingQueueConsumer + 'static>(&mut self, queue: Arc<Q>) {
        if self.is_running() {
            warn!("Proving agent already running");
            return;
        }
        self.stop.store(false, Ordering::SeqCst);

        let prover = self.prover.clone();
        let busy = self.busy.clone();
        let stop = self.stop.clone();
        let poll_timeout = self.poll_timeout;
        self.handle = Some(tokio::spawn(async move {
            info!("Proving agent started");
            while !stop.load(Ordering::SeqCst) {
                let job = match queue.take(poll_timeout).await {
                    Ok(Some(job)) => job,
                    Ok(None) => continue,
                    Err(e) => {
                        error!("Failed to take a proving job: {e:#}");
                        tokio::time::sleep(poll_timeout).await;
                        continue;
                    }
                };
                busy.store(true, Ordering::SeqCst);
                if let Err(e) = work(prover.as_ref(), queue.as_ref(), job).await {
                    error!("Failed to report proving job: {e:#}");
                }
                busy.store(false, Ordering::SeqCst);
            }
            info!("Proving agent stopped");
        }));
    }

    /// Asks the poll loop to exit and waits until it has. A job in progress
    /// is finished and reported first.
    pub async fn stop(&mut self) -> anyhow::Result<()> {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            handle.await.context("proving agent loop panicked")?;
        }
        Ok(())
    }
}

async fn work<P, Q>(prover: &P, queue: &Q, job: ProvingJob) -> anyhow::Result<()>
where
    P: CircuitProver,
    Q: ProvingQueueConsumer,
{
    let ProvingJob { id, request } = job;
    let name = request.name();
    debug!("Proving {name} job {id}");

    match AssertUnwindSafe(request.prove_with(prover, None))
        .catch_unwind()
        .await
    {
        Ok(Ok(result)) => queue.resolve(id, result).await,
        Ok(Err(e)) => {
            warn!("{name} job {id} failed: {e:#}");
            queue.reject(id, format!("{e:#}")).await
        }
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            error!("{name} job {id} panicked: {message}");
            queue.reject(id, message).await
        }
    }
}

/// A prover that keeps count of the calls it is serving.
pub struct Agent<P> {
    prover: P,
    in_flight: AtomicUsize,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl<P: CircuitProver> Agent<P> {
    pub fn new(prover: P) -> Self {
        Self {
            prover,
            in_flight: AtomicUsize::new(0),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> AgentStatus {
        if self.in_flight() > 0 {
            AgentStatus::Busy
        } else {
            AgentStatus::Idle
        }
    }

    pub async fn prove(
        &self,
        request: ProvingRequest,
        signal: Option<AbortSignal>,
    ) -> anyhow::Result<ProvingRequestResult> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);
        request.prove_with(&self.prover, signal).await
    }

    fn try_claim(&self) -> Option<InFlight<'_>> {
        self.in_flight
            .compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| InFlight(&self.in_flight))
    }
}

/// Fans calls out over a fixed set of agents.
///
/// Each call goes to the first idle agent. When every agent is busy the
/// first one takes the call as well, so saturation degrades to sequential
/// proving instead of queuing.
pub struct AgentPool<P> {
    agents: Vec<Agent<P>>,
}

impl<P: CircuitProver> AgentPool<P> {
    pub fn new(provers: impl IntoIterator<Item = P>) -> anyhow::Result<Self> {
        let agents = provers.into_iter().map(Agent::new).collect::<Vec<_>>();
        ensure!(!agents.is_empty(), "agent pool needs at least one agent");
        Ok(Self { agents })
    }

    pub fn agents(&self) -> &[Agent<P>] {
        &self.agents
    }

    fn claim(&self) -> (&Agent<P>, InFlight<'_>) {
        for agent in &self.agents {
            if let Some(claim) = agent.try_claim() {
                return (agent, claim);
            }
        }
        let agent = &self.agents[0];
        agent.in_flight.fetch_add(1, Ordering::SeqCst);
        (agent, InFlight(&agent.in_flight))
    }

    pub async fn submit(
        &self,
        request: ProvingRequest,
        signal: Option<AbortSignal>,
    ) -> anyhow::Result<ProvingRequestResult> {
        let (agent, _claim) = self.claim();
        request.prove_with(&agent.prover, signal).await
    }
}

circuit_prover_via_submit!(impl<P: CircuitProver> for AgentPool<P>);
