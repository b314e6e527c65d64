//! HTTP form of the proving queue, for agents running out of process.
//!
//! Every body is a versioned [`Envelope`]. Requests and results are the
//! tagged [`ProvingRequest`] and [`ProvingRequestResult`] enums, so the schema
//! is exactly their serde representation.
//!
//! | route | body | response |
//! |---|---|---|
//! | `POST /v1/prove` | `ProvingRequest` | `ProveOutcome` |
//! | `POST /v1/jobs/take` | `TakeRequest` | `Option<ProvingJob>` |
//! | `POST /v1/jobs/:id/resolve` | `ProvingRequestResult` | `null` |
//! | `POST /v1/jobs/:id/reject` | `RejectRequest` | `null` |

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context as _};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tower::retry::Retry;
use tower::ServiceExt as _;
use tracing::{debug, info};
use url::Url;

use crate::circuit_prover::AbortSignal;
use crate::queue::{
    circuit_prover_via_submit, JobId, MemoryProvingQueue, ProvingJob, ProvingQueueConsumer,
    ProvingRequest, ProvingRequestResult,
};
use crate::retry::RetryPolicy;

pub const SCHEMA_VERSION: u32 = 1;

/// Longest a single take request may wait on the server.
const MAX_TAKE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub version: u32,
    pub payload: T,
}

impl<T> Envelope<T> {
    pub fn new(payload: T) -> Self {
        Self {
            version: SCHEMA_VERSION,
            payload,
        }
    }

    pub fn into_payload(self) -> anyhow::Result<T> {
        if self.version != SCHEMA_VERSION {
            bail!(
                "unsupported schema version {}, expected {SCHEMA_VERSION}",
                self.version
            );
        }
        Ok(self.payload)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProveOutcome {
    Resolved { result: ProvingRequestResult },
    Rejected { reason: String },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TakeRequest {
    pub timeout_ms: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RejectRequest {
    pub reason: String,
}

type HandlerResult<T> = Result<Json<Envelope<T>>, (StatusCode, String)>;

fn bad_request(e: anyhow::Error) -> (StatusCode, String) {
    (StatusCode::BAD_REQUEST, format!("{e:#}"))
}

/// Routes exposing `queue` over HTTP.
pub fn router(queue: Arc<MemoryProvingQueue>) -> Router {
    Router::new()
        .route("/v1/prove", post(prove))
        .route("/v1/jobs/take", post(take))
        .route("/v1/jobs/:id/resolve", post(resolve))
        .route("/v1/jobs/:id/reject", post(reject))
        .with_state(queue)
}

/// Serves `queue` on `port` until the server fails.
pub async fn serve(queue: Arc<MemoryProvingQueue>, port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Proving queue listening on {addr}");
    Ok(axum::serve(listener, router(queue)).await?)
}

async fn prove(
    State(queue): State<Arc<MemoryProvingQueue>>,
    Json(body): Json<Envelope<ProvingRequest>>,
) -> HandlerResult<ProveOutcome> {
    let request = body.into_payload().map_err(bad_request)?;
    let outcome = match queue.submit(request, None).await {
        Ok(result) => ProveOutcome::Resolved { result },
        Err(e) => ProveOutcome::Rejected {
            reason: format!("{e:#}"),
        },
    };
    Ok(Json(Envelope::new(outcome)))
}

async fn take(
    State(queue): State<Arc<MemoryProvingQueue>>,
    Json(body): Json<Envelope<TakeRequest>>,
) -> HandlerResult<Option<ProvingJob>> {
    let TakeRequest { timeout_ms } = body.into_payload().map_err(bad_request)?;
    let timeout = Duration::from_millis(timeout_ms).min(MAX_TAKE_TIMEOUT);
    let job = queue
        .take(timeout)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}")))?;
    if let Some(job) = &job {
        debug!("Handing out {} job {}", job.request.name(), job.id);
    }
    Ok(Json(Envelope::new(job)))
}

async fn resolve(
    State(queue): State<Arc<MemoryProvingQueue>>,
    Path(id): Path<u64>,
    Json(body): Json<Envelope<ProvingRequestResult>>,
) -> HandlerResult<()> {
    let result = body.into_payload().map_err(bad_request)?;
    queue
        .resolve(JobId(id), result)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}")))?;
    Ok(Json(Envelope::new(())))
}

async fn reject(
    State(queue): State<Arc<MemoryProvingQueue>>,
    Path(id): Path<u64>,
    Json(body): Json<Envelope<RejectRequest>>,
) -> HandlerResult<()> {
    let RejectRequest { reason } = body.into_payload().map_err(bad_request)?;
    queue
        .reject(JobId(id), reason)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}")))?;
    Ok(Json(Envelope::new(())))
}

/// Client for a queue served by [`router`].
///
/// Usable both by the orchestrator, as a [`CircuitProver`](crate::circuit_prover::CircuitProver),
/// and by agents, as a [`ProvingQueueConsumer`].
#[derive(Clone, Debug)]
pub struct RemoteProvingQueue {
    client: reqwest::Client,
    base: Url,
    retry: RetryPolicy,
}

impl RemoteProvingQueue {
    pub fn new(base: Url) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            client,
            base,
            retry: RetryPolicy::none(),
        })
    }

    /// Retries requests the server did not get or could not handle.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    async fn post<B, R>(&self, path: &str, body: B) -> anyhow::Result<R>
    where
        B: Serialize,
        R: DeserializeOwned,
    {
        let url = self.base.join(path)?;
        let body = serde_json::to_value(Envelope::new(body))?;
        let client = self.client.clone();
        let send = tower::service_fn(move |body: serde_json::Value| {
            client.post(url.clone()).json(&body).send()
        });
        let response = Retry::new(self.retry.clone(), send)
            .oneshot(body)
            .await
            .with_context(|| format!("request to {path} failed"))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("request to {path} failed: {status} {text}");
        }
        let envelope: Envelope<R> = response
            .json()
            .await
            .with_context(|| format!("invalid response from {path}"))?;
        envelope.into_payload()
    }

    pub async fn submit(
        &self,
        request: ProvingRequest,
        signal: Option<AbortSignal>,
    ) -> anyhow::Result<ProvingRequestResult> {
        if signal.as_ref().is_some_and(AbortSignal::is_aborted) {
            bail!("{} request aborted before submission", request.name());
        }
        match self.post("/v1/prove", request).await? {
            ProveOutcome::Resolved { result } => Ok(result),
            ProveOutcome::Rejected { reason } => Err(anyhow!(reason)),
        }
    }
}

impl ProvingQueueConsumer for RemoteProvingQueue {
    async fn take(&self, timeout: Duration) -> anyhow::Result<Option<ProvingJob>> {
        self.post(
            "/v1/jobs/take",
            TakeRequest {
                timeout_ms: timeout.as_millis() as u64,
            },
        )
        .await
    }

    async fn resolve(&self, id: JobId, result: ProvingRequestResult) -> anyhow::Result<()> {
        self.post(&format!("/v1/jobs/{id}/resolve"), result).await
    }

    async fn reject(&self, id: JobId, reason: String) -> anyhow::Result<()> {
        self.post(&format!("/v1/jobs/{id}/reject"), RejectRequest { reason })
            .await
    }
}

circuit_prover_via_submit!(impl for RemoteProvingQueue);
