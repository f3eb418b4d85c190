//! Client handle and the call path shared by every handle kind.

use crate::lifecycle::TxCore;
use crate::retry::Retrier;
use crate::scope::Scope;
use crate::tablet::{StartTabletTxOptions, TabletTransaction};
use crate::transaction::{StartTxOptions, Transaction};
use arbor_core::{
    CallContext, ClientConfig, ClientError, ClientResult, Dispatcher, Params, Response, Verb,
};
use arbor_options::{CallOptions, ComposedCall, compose};
use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tracing::info;

/// Dispatcher, configuration and retry policy shared by a client and
/// every transaction started from it.
pub(crate) struct ClientCore {
    dispatcher: Arc<dyn Dispatcher>,
    config: ClientConfig,
    retrier: Retrier,
    /// Transactions started through this client that may still be active
    transactions: Mutex<Vec<Weak<TxCore>>>,
}

impl ClientCore {
    pub(crate) fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Remember `tx` until it finishes
    pub(crate) fn track(&self, tx: &Arc<TxCore>) {
        let mut transactions = self
            .transactions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        transactions.retain(|t| t.upgrade().is_some_and(|t| !t.is_terminal()));
        transactions.push(Arc::downgrade(tx));
    }

    fn live_transactions(&self) -> Vec<Arc<TxCore>> {
        self.transactions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|t| !t.is_terminal())
            .collect()
    }

    /// Run a composed call through the retry coordinator
    pub(crate) async fn execute(
        &self,
        scope: &Scope,
        call: ComposedCall,
        body: Option<Bytes>,
    ) -> ClientResult<Response> {
        self.retrier
            .execute(self.dispatcher.as_ref(), scope, call, body)
            .await
    }
}

/// Issues calls on behalf of a handle.
///
/// Implemented by [`Client`], [`Transaction`] and [`TabletTransaction`]; the
/// operation traits in [`crate::ops`] are built on top of it.
#[async_trait]
pub trait Invoker: Send + Sync {
    /// Compose `verb` with `required` parameters and `options`, then execute it
    ///
    /// # Errors
    ///
    /// Returns validation errors before anything is sent, otherwise the
    /// classified outcome of the call
    async fn invoke(
        &self,
        verb: Verb,
        required: Params,
        options: CallOptions,
        body: Option<Bytes>,
    ) -> ClientResult<Response>;
}

/// Marker for handles that may issue master (Cypress, file, scheduler) calls
pub trait MasterInvoker: Invoker {}

/// Decode a response value into `T`
pub(crate) fn decode<T: DeserializeOwned>(verb: Verb, response: &Response) -> ClientResult<T> {
    response.decode().map_err(|e| ClientError::Decode {
        context: CallContext::new(verb),
        reason: e.to_string(),
    })
}

/// Entry point: a dispatcher, a configuration and a default scope
#[derive(Clone)]
pub struct Client {
    core: Arc<ClientCore>,
    scope: Scope,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.core.config)
            .field("scope", &self.scope)
            .finish()
    }
}

impl Client {
    /// Create a client over `dispatcher`
    ///
    /// # Errors
    ///
    /// Returns a validation error if `config` is inconsistent
    pub fn new(dispatcher: Arc<dyn Dispatcher>, config: ClientConfig) -> ClientResult<Self> {
        config.validate()?;
        let retrier = Retrier::new(config.retry.clone());
        Ok(Self {
            core: Arc::new(ClientCore {
                dispatcher,
                config,
                retrier,
                transactions: Mutex::new(Vec::new()),
            }),
            scope: Scope::new(),
        })
    }

    /// Same client, calls and transactions bound to `scope`
    #[must_use]
    pub fn with_scope(&self, scope: Scope) -> Self {
        Self {
            core: Arc::clone(&self.core),
            scope,
        }
    }

    /// Default scope of this handle
    #[must_use]
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Configuration
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.core.config
    }

    /// Abort every transaction started through this client and wait for
    /// their background tasks to wind down.
    ///
    /// Covers transactions bound to scopes of their own, which cancelling
    /// [`Client::scope`] does not reach. The client stays usable afterwards.
    pub async fn stop(&self) {
        let live = self.core.live_transactions();
        info!(transactions = live.len(), "stopping client");
        for tx in &live {
            tx.scope().cancel();
        }
        for tx in live {
            tx.wait().await;
            tx.stopped().await;
        }
    }

    /// Start a top-level master transaction
    ///
    /// # Errors
    ///
    /// Returns error if the start call fails
    pub async fn begin_tx(&self, options: StartTxOptions) -> ClientResult<Transaction> {
        Transaction::start(Arc::clone(&self.core), &self.scope, None, options).await
    }

    /// Start a tablet transaction
    ///
    /// # Errors
    ///
    /// Returns error if the start call fails
    pub async fn begin_tablet_tx(
        &self,
        options: StartTabletTxOptions,
    ) -> ClientResult<TabletTransaction> {
        TabletTransaction::start(Arc::clone(&self.core), &self.scope, options).await
    }
}

#[async_trait]
impl Invoker for Client {
    async fn invoke(
        &self,
        verb: Verb,
        required: Params,
        options: CallOptions,
        body: Option<Bytes>,
    ) -> ClientResult<Response> {
        let call = compose(verb, required, &options)?;
        self.core.execute(&self.scope, call, body).await
    }
}

impl MasterInvoker for Client {}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_core::{CallError, ErrorKind, Request, RetryConfig};
    use arbor_options::MutatingOptions;

    struct Echo;

    #[async_trait]
    impl Dispatcher for Echo {
        async fn call(&self, request: Request) -> Result<Response, CallError> {
            Ok(Response::new(serde_json::to_value(&request.params).unwrap()))
        }
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = ClientConfig::new().with_retry(RetryConfig::new(0));
        assert!(Client::new(Arc::new(Echo), config).is_err());
    }

    #[tokio::test]
    async fn test_validation_happens_before_dispatch() {
        let client = Client::new(Arc::new(Echo), ClientConfig::new()).unwrap();
        let mut params = Params::new();
        params.insert("path", "//a").unwrap();
        let options = CallOptions::new().with_mutating(MutatingOptions::default());
        let err = client
            .invoke(Verb::Get, params, options, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Permanent);
        assert!(matches!(err, ClientError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_decode_failure_names_verb() {
        let err = decode::<u64>(Verb::Get, &Response::new("text".into())).unwrap_err();
        assert!(err.to_string().starts_with("get"));
    }
}
