use std::sync::Arc;

use crate::{sandbox::SandboxId, value::Value};

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Host routine invoked synchronously from inside a sandbox.
///
/// Implementations are shared by every context the capability is bound into,
/// possibly on several threads at once.
pub trait SyncHostFn: Send + Sync + 'static {
    fn call(&self, args: Vec<Value>) -> core::result::Result<Value, BoxError>;
}

/// Host routine whose result arrives later.
///
/// The returned future runs as its own task on the host runtime. It is never
/// cancelled by sandbox teardown.
#[async_trait::async_trait]
pub trait AsyncHostFn: Send + Sync + 'static {
    async fn call(&self, args: Vec<Value>) -> core::result::Result<Value, BoxError>;
}

/// Observer for sandbox lifecycle transitions.
pub trait LifecycleHook: Send + Sync + 'static {
    fn on_create(&self, id: SandboxId) {
        let _ = id;
    }

    fn on_dispose(&self, id: SandboxId) {
        let _ = id;
    }
}

impl<T: SyncHostFn + ?Sized> SyncHostFn for Arc<T> {
    fn call(&self, args: Vec<Value>) -> core::result::Result<Value, BoxError> {
        (**self).call(args)
    }
}

#[async_trait::async_trait]
impl<T: AsyncHostFn + ?Sized> AsyncHostFn for Arc<T> {
    async fn call(&self, args: Vec<Value>) -> core::result::Result<Value, BoxError> {
        (**self).call(args).await
    }
}

impl<T: LifecycleHook + ?Sized> LifecycleHook for Arc<T> {
    fn on_create(&self, id: SandboxId) {
        (**self).on_create(id);
    }

    fn on_dispose(&self, id: SandboxId) {
        (**self).on_dispose(id);
    }
}

pub(crate) struct SyncFn<F>(pub(crate) F);

impl<F> SyncHostFn for SyncFn<F>
where
    F: Fn(Vec<Value>) -> core::result::Result<Value, BoxError> + Send + Sync + 'static,
{
    fn call(&self, args: Vec<Value>) -> core::result::Result<Value, BoxError> {
        (self.0)(args)
    }
}

pub(crate) struct AsyncFn<F>(pub(crate) F);

#[async_trait::async_trait]
impl<F, Fut> AsyncHostFn for AsyncFn<F>
where
    F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = core::result::Result<Value, BoxError>> + Send + 'static,
{
    async fn call(&self, args: Vec<Value>) -> core::result::Result<Value, BoxError> {
        (self.0)(args).await
    }
}
