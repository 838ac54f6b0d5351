//! Host-side lifecycle adapter.
//!
//! The host owns exactly one interceptor and feeds it lifecycle events and
//! requests. Each event is awaited to completion before the next phase can
//! begin; each request runs as its own task.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::CacheError;
use crate::interceptor::{CacheFetchInterceptor, Intercepted};
use crate::models::RequestDescriptor;
use crate::store::InstallReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    Install,
    Activate,
}

#[derive(Clone)]
pub struct WorkerHost {
    interceptor: Arc<CacheFetchInterceptor>,
}

impl WorkerHost {
    pub fn register(interceptor: CacheFetchInterceptor) -> Self {
        Self {
            interceptor: Arc::new(interceptor),
        }
    }

    pub fn interceptor(&self) -> &CacheFetchInterceptor {
        &self.interceptor
    }

    /// Deliver one lifecycle event and wait for its handler to finish.
    pub async fn dispatch(&self, event: LifecycleEvent) -> Result<(), CacheError> {
        debug!(?event, "Dispatching lifecycle event");
        match event {
            LifecycleEvent::Install => self.interceptor.install().await.map(|_| ()),
            LifecycleEvent::Activate => self.interceptor.activate().await,
        }
    }

    /// Install then activate. Activation never starts before install has
    /// finished.
    pub async fn start(&self) -> Result<InstallReport, CacheError> {
        let report = self.interceptor.install().await?;
        self.interceptor.activate().await?;
        Ok(report)
    }

    /// Hand a request to the interceptor on its own task.
    pub fn respond_with(&self, request: RequestDescriptor) -> JoinHandle<Result<Intercepted, CacheError>> {
        let interceptor = self.interceptor.clone();
        tokio::spawn(async move { interceptor.intercept(&request).await })
    }
}
