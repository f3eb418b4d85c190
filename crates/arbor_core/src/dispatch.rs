//! The request dispatcher seam.
//!
//! Transport, encoding and authentication live behind [`Dispatcher`]; the
//! client only sees verb, params and body going out and a typed value or a
//! structured error coming back.

use crate::error::CallError;
use crate::request::{Request, Response};
use async_trait::async_trait;
use std::sync::Arc;

/// Executes a single remote call
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Send `request` and wait for its outcome
    async fn call(&self, request: Request) -> Result<Response, CallError>;
}

#[async_trait]
impl<D: Dispatcher + ?Sized> Dispatcher for Arc<D> {
    async fn call(&self, request: Request) -> Result<Response, CallError> {
        (**self).call(request).await
    }
}
