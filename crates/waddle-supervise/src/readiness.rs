//! Initialization status handshake between a spawner and its child.
//!
//! The spawner opens a [`ReadinessReceiver`]: a temporary HTTP server on a
//! loopback port that accepts a single `POST`. An empty body means the child
//! is ready; a non-empty body is the child's failure message. The address is
//! handed to the child through an environment variable and the child calls
//! [`report`] once it knows how initialization went.

use std::fmt;

use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;
use futures::future::{BoxFuture, FutureExt};
use tokio::net::TcpListener;
use tracing::{debug, warn};

use crate::cancel::{Cause, CauseToken};
use crate::error::SuperviseError;

/// Fallback payload for a failure without a description. An empty body
/// would read as success.
const UNDESCRIBED_FAILURE: &str = "initialization failed";

/// Outcome a child reports to its spawner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitStatus {
    Ready,
    Failed(String),
}

impl InitStatus {
    fn payload(&self) -> String {
        match self {
            InitStatus::Ready => String::new(),
            InitStatus::Failed(message) if message.is_empty() => UNDESCRIBED_FAILURE.to_string(),
            InitStatus::Failed(message) => message.clone(),
        }
    }
}

impl<E: fmt::Display> From<Result<(), E>> for InitStatus {
    fn from(result: Result<(), E>) -> Self {
        match result {
            Ok(()) => InitStatus::Ready,
            Err(e) => InitStatus::Failed(e.to_string()),
        }
    }
}

/// Something the foreground side can wait on for child readiness.
///
/// Implementations resolve `Ok(())` once the child is initialized, or an
/// error [`Cause`] if it failed, died, or `token` was cancelled first.
pub trait ReadyCheck: Send + Sync {
    fn check<'a>(&'a self, token: &'a CauseToken) -> BoxFuture<'a, Result<(), Cause>>;
}

/// The receiving end of the readiness handshake.
///
/// Dropping the receiver releases the endpoint.
#[derive(Debug)]
pub struct ReadinessReceiver {
    address: String,
    resolved: CauseToken,
}

impl ReadinessReceiver {
    /// Bind a fresh endpoint on a loopback port.
    ///
    /// The endpoint lives until a report arrives, `parent` is cancelled, or
    /// the receiver is released.
    pub async fn open(parent: &CauseToken) -> Result<Self, SuperviseError> {
        let listener = TcpListener::bind(("127.0.0.1", 0))
            .await
            .map_err(SuperviseError::Bind)?;
        let local = listener.local_addr().map_err(SuperviseError::Bind)?;
        let address = format!("http://{local}");

        let resolved = parent.child();
        let app = Router::new()
            .route("/", post(receive_status))
            .with_state(resolved.clone());

        let stop = resolved.clone();
        tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async move {
                stop.cancelled().await;
            });
            if let Err(e) = server.await {
                warn!(error = %e, "Readiness endpoint failed");
            }
        });

        debug!(address = %address, "Readiness endpoint listening");
        Ok(Self { address, resolved })
    }

    /// Address to pass to the child.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Wait for the outcome.
    ///
    /// Returns `Ok(())` only for a "ready" report. A failure report yields
    /// [`Cause::InitFailed`]; cancellation of `caller` yields its cause;
    /// release or cancellation of the parent yields that cause. Whatever
    /// resolves first also resolves the endpoint, so later and concurrent
    /// calls see the same outcome.
    pub async fn wait(&self, caller: &CauseToken) -> Result<(), Cause> {
        let cause = tokio::select! {
            _ = caller.cancelled() => caller.cause().unwrap_or(Cause::Canceled),
            _ = self.resolved.cancelled() => self.resolved.cause().unwrap_or(Cause::Canceled),
        };
        self.resolved.cancel_with(cause);

        match self.resolved.cause() {
            Some(Cause::Ready) => Ok(()),
            Some(cause) => Err(cause),
            None => Err(Cause::Canceled),
        }
    }

    /// Tear down the endpoint. Pending waiters see [`Cause::Closed`] unless a
    /// report already arrived.
    pub fn release(&self) {
        self.resolved.cancel_with(Cause::Closed);
    }
}

impl Drop for ReadinessReceiver {
    fn drop(&mut self) {
        self.release();
    }
}

impl ReadyCheck for ReadinessReceiver {
    fn check<'a>(&'a self, token: &'a CauseToken) -> BoxFuture<'a, Result<(), Cause>> {
        self.wait(token).boxed()
    }
}

async fn receive_status(
    State(resolved): State<CauseToken>,
    body: Result<Bytes, BytesRejection>,
) -> StatusCode {
    if resolved.is_cancelled() {
        debug!("Ignoring readiness report for an already resolved endpoint");
        return StatusCode::GONE;
    }

    let cause = match body {
        Err(rejection) => Cause::Receive(rejection.body_text()),
        Ok(data) if data.is_empty() => Cause::Ready,
        Ok(data) => Cause::InitFailed(String::from_utf8_lossy(&data).into_owned()),
    };

    if resolved.cancel_with(cause) {
        StatusCode::OK
    } else {
        StatusCode::GONE
    }
}

/// Send `status` to the readiness endpoint at `address`.
///
/// An empty address is a no-op, so a program can run standalone without
/// anyone waiting on it.
pub async fn report(address: &str, status: InitStatus) -> Result<(), SuperviseError> {
    if address.is_empty() {
        return Ok(());
    }

    let response = reqwest::Client::new()
        .post(address)
        .body(status.payload())
        .send()
        .await?;
    debug!(address, status = %response.status(), "Delivered readiness report");
    Ok(())
}

/// [`report`] to the address found in the `env_key` environment variable.
pub async fn report_from_env(env_key: &str, status: InitStatus) -> Result<(), SuperviseError> {
    if env_key.is_empty() {
        return Err(SuperviseError::EmptyEnvKey);
    }
    let address = std::env::var(env_key).unwrap_or_default();
    report(&address, status).await
}
