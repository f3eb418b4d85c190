//! Mutation retry coordinator.
//!
//! Drives one logical call through the dispatcher. Mutating calls carry a
//! mutation id that stays fixed across attempts; every attempt after the
//! first is flagged `retry=true` so the cluster can recognise a replay.

use crate::scope::Scope;
use arbor_core::{
    CallContext, CallError, ClientError, ClientResult, Dispatcher, MutationId, Request, Response,
    RetryConfig, TransactionId,
};
use arbor_options::{ComposedCall, RetryClass};
use bytes::Bytes;
use tracing::{debug, warn};

/// Retries transient failures under a bounded, backed-off policy
#[derive(Debug, Clone, Default)]
pub struct Retrier {
    config: RetryConfig,
}

impl Retrier {
    /// Create a retrier
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Retry policy
    #[must_use]
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Execute a composed call under `scope`
    ///
    /// # Errors
    ///
    /// Permanent failures surface on first occurrence; transient failures
    /// surface once the attempt bound is reached. Scope cancellation and an
    /// expired scope deadline stop the sequence at any point.
    pub async fn execute(
        &self,
        dispatcher: &dyn Dispatcher,
        scope: &Scope,
        call: ComposedCall,
        body: Option<Bytes>,
    ) -> ClientResult<Response> {
        let ComposedCall {
            verb,
            mut params,
            retry,
        } = call;

        let mut context = CallContext::new(verb);
        context.transaction_id = params.get_as::<TransactionId>("transaction_id");

        let mut replay_first = false;
        if retry == RetryClass::Mutating {
            let mutation_id = params
                .get_as::<MutationId>("mutation_id")
                .unwrap_or_else(MutationId::new);
            replay_first = params.get_as::<bool>("retry").unwrap_or(false);
            params.set("mutation_id", mutation_id)?;
            context.mutation_id = Some(mutation_id);
        }

        let max_attempts = match retry {
            RetryClass::Once => 1,
            RetryClass::Mutating | RetryClass::Idempotent => self.config.max_attempts.max(1),
        };

        let mut last: Option<CallError> = None;
        let mut attempt: u32 = 0;
        loop {
            if scope.is_cancelled() {
                return Err(ClientError::Cancelled { context });
            }
            if scope.is_expired() {
                return Err(ClientError::Deadline {
                    context,
                    attempts: attempt,
                    last,
                });
            }

            attempt += 1;
            if retry == RetryClass::Mutating {
                params.set("retry", replay_first || attempt > 1)?;
            }
            let mut request = Request::new(verb, params.clone());
            if let Some(body) = &body {
                request = request.with_body(body.clone());
            }

            debug!(%verb, attempt, mutation_id = ?context.mutation_id, "dispatching call");
            let outcome = tokio::select! {
                biased;
                _ = scope.cancelled() => return Err(ClientError::Cancelled { context }),
                _ = scope.expired() => {
                    return Err(ClientError::Deadline { context, attempts: attempt, last });
                }
                outcome = dispatcher.call(request) => outcome,
            };

            let err = match outcome {
                Ok(response) => return Ok(response),
                Err(err) => err,
            };

            if !err.is_transient() {
                warn!(%verb, attempt, error = %err, "call failed permanently");
                return Err(ClientError::Permanent {
                    context,
                    source: err,
                });
            }
            if attempt >= max_attempts {
                warn!(%verb, attempt, error = %err, "call failed, attempts exhausted");
                return Err(ClientError::Transient {
                    context,
                    attempts: attempt,
                    last: err,
                });
            }

            let backoff = self.config.backoff(attempt);
            debug!(%verb, attempt, ?backoff, error = %err, "transient failure, retrying");
            last = Some(err);
            tokio::select! {
                biased;
                _ = scope.cancelled() => return Err(ClientError::Cancelled { context }),
                _ = scope.expired() => {
                    return Err(ClientError::Deadline { context, attempts: attempt, last });
                }
                _ = tokio::time::sleep(backoff) => {}
            }
        }
    }
}
