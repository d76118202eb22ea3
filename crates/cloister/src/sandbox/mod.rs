//! Sandbox lifecycle APIs.
//!
//! Typical flow:
//! 1. Create a [`Sandbox`] from [`SandboxOptions`].
//! 2. Open its single [`Context`] with [`Sandbox::create_context`] and bind
//!    capabilities into it.
//! 3. [`Context::evaluate`] the untrusted source to obtain an [`EntryPoint`],
//!    then [`Context::invoke`] it.
//! 4. Dispose the sandbox. Dropping it has the same effect.
//!
//! [`run`](crate::run) performs all of the above for one invocation.

mod context;

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

pub use context::{Context, ContextState, EntryPoint};
use rquickjs::AsyncRuntime;

use crate::{
    error::{Error, Result},
    host::LifecycleHook,
    internal::limits::{BudgetAllocator, LimitSignals},
};

/// Default heap ceiling for one sandbox.
pub const DEFAULT_MEMORY_LIMIT: usize = 128 * 1024 * 1024;
/// Default native stack budget for one sandbox.
pub const DEFAULT_MAX_STACK_SIZE: usize = 512 * 1024;

/// Process-unique sandbox identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SandboxId(u64);

impl SandboxId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SandboxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-sandbox resource limits.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SandboxOptions {
    memory_limit: Option<usize>,
    max_stack_size: Option<usize>,
    timeout: Option<Duration>,
}

impl SandboxOptions {
    /// Set the heap ceiling in bytes.
    ///
    /// Defaults to [`DEFAULT_MEMORY_LIMIT`].
    #[must_use]
    pub const fn with_memory_limit(mut self, bytes: usize) -> Self {
        self.memory_limit = Some(bytes);
        self
    }

    /// Set the native stack budget in bytes.
    #[must_use]
    pub const fn with_max_stack_size(mut self, bytes: usize) -> Self {
        self.max_stack_size = Some(bytes);
        self
    }

    /// Set a wall-clock deadline measured from sandbox creation.
    ///
    /// Without one, sandboxed code may run until it returns.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn memory_limit(&self) -> usize {
        self.memory_limit.unwrap_or(DEFAULT_MEMORY_LIMIT)
    }

    #[must_use]
    pub fn max_stack_size(&self) -> usize {
        self.max_stack_size.unwrap_or(DEFAULT_MAX_STACK_SIZE)
    }

    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Merge `overrides` into this options value and return the merged
    /// result. Every field set on `overrides` wins.
    #[must_use]
    pub fn merged_with(&self, overrides: &Self) -> Self {
        Self {
            memory_limit: overrides.memory_limit.or(self.memory_limit),
            max_stack_size: overrides.max_stack_size.or(self.max_stack_size),
            timeout: overrides.timeout.or(self.timeout),
        }
    }
}

/// Wall-clock budget shared by a sandbox and its context.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Deadline {
    at: Instant,
    timeout: Duration,
}

impl Deadline {
    fn after(timeout: Duration) -> Self {
        Self {
            at: Instant::now() + timeout,
            timeout,
        }
    }

    pub(crate) fn expired(&self) -> bool {
        Instant::now() >= self.at
    }

    pub(crate) const fn timeout(&self) -> Duration {
        self.timeout
    }

    pub(crate) fn instant(&self) -> tokio::time::Instant {
        tokio::time::Instant::from_std(self.at)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxState {
    Created,
    /// The execution context has been opened.
    Active,
    Disposed,
}

/// An isolated JavaScript runtime with its own heap ceiling.
///
/// A sandbox shares no mutable state with any other sandbox. It is disposed
/// exactly once: by [`Sandbox::dispose`] or, failing that, on drop.
pub struct Sandbox {
    id: SandboxId,
    context: Option<Context>,
    context_opened: bool,
    runtime: Option<AsyncRuntime>,
    deadline: Option<Deadline>,
    signals: Arc<LimitSignals>,
    memory_limit: usize,
    hook: Option<Arc<dyn LifecycleHook>>,
}

impl Sandbox {
    /// # Errors
    /// Returns [`Error::Runtime`] if the engine cannot be initialized.
    pub async fn create(options: &SandboxOptions) -> Result<Self> {
        Self::create_with_hook(options, None).await
    }

    /// Create a sandbox and report its lifecycle to `hook`.
    ///
    /// # Errors
    /// Returns [`Error::Runtime`] if the engine cannot be initialized.
    pub async fn create_with_hook(
        options: &SandboxOptions,
        hook: Option<Arc<dyn LifecycleHook>>,
    ) -> Result<Self> {
        let memory_limit = options.memory_limit();
        let signals = Arc::new(LimitSignals::default());
        let runtime =
            AsyncRuntime::new_with_alloc(BudgetAllocator::new(memory_limit, signals.clone()))
                .map_err(|e| Error::Runtime(e.to_string()))?;
        runtime.set_max_stack_size(options.max_stack_size()).await;

        let deadline = options.timeout().map(Deadline::after);
        if let Some(deadline) = deadline {
            let signals = signals.clone();
            runtime
                .set_interrupt_handler(Some(Box::new(move || {
                    let expired = deadline.expired();
                    if expired {
                        signals.mark_interrupted();
                    }
                    expired
                })))
                .await;
        }

        let id = SandboxId::next();
        metrics::counter!("cloister_sandbox_created_total").increment(1);
        if let Some(hook) = &hook {
            hook.on_create(id);
        }
        tracing::debug!(sandbox = %id, memory_limit, "sandbox created");

        Ok(Self {
            id,
            context: None,
            context_opened: false,
            runtime: Some(runtime),
            deadline,
            signals,
            memory_limit,
            hook,
        })
    }

    #[must_use]
    pub const fn id(&self) -> SandboxId {
        self.id
    }

    #[must_use]
    pub const fn memory_limit(&self) -> usize {
        self.memory_limit
    }

    #[must_use]
    pub fn state(&self) -> SandboxState {
        match (&self.runtime, self.context_opened) {
            (None, _) => SandboxState::Disposed,
            (Some(_), true) => SandboxState::Active,
            (Some(_), false) => SandboxState::Created,
        }
    }

    /// Bytes currently allocated by the sandbox heap.
    pub async fn memory_usage(&self) -> Option<u64> {
        let runtime = self.runtime.as_ref()?;
        u64::try_from(runtime.memory_usage().await.malloc_size).ok()
    }

    /// Open the sandbox's execution context.
    ///
    /// The fresh namespace holds only language primitives and `global`, an
    /// alias of `globalThis`. A sandbox owns at most one context for its whole
    /// lifetime.
    ///
    /// # Errors
    /// Returns [`Error::Runtime`] if a context was already opened or the engine
    /// fails to allocate one.
    pub async fn create_context(&mut self) -> Result<&mut Context> {
        if self.context_opened {
            return Err(Error::Runtime(
                "sandbox already has an execution context".to_string(),
            ));
        }
        let runtime = self
            .runtime
            .as_ref()
            .ok_or_else(|| Error::Runtime("sandbox disposed".to_string()))?;
        let context = Context::open(self.id, runtime, self.deadline, self.signals.clone()).await?;
        self.context_opened = true;
        Ok(self.context.insert(context))
    }

    /// The context opened by [`Sandbox::create_context`], while it is live.
    pub fn context(&mut self) -> Option<&mut Context> {
        self.context.as_mut()
    }

    /// Release the context ahead of disposal.
    pub fn release_context(&mut self) {
        if let Some(mut context) = self.context.take() {
            context.release();
        }
    }

    /// Tear the sandbox down, releasing its context first.
    pub fn dispose(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        let Some(runtime) = self.runtime.take() else {
            return;
        };
        self.release_context();
        drop(runtime);

        metrics::counter!("cloister_sandbox_disposed_total").increment(1);
        if let Some(hook) = &self.hook {
            hook.on_dispose(self.id);
        }
        tracing::debug!(sandbox = %self.id, "sandbox disposed");
    }
}

impl Drop for Sandbox {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sandbox")
            .field("id", &self.id)
            .field("memory_limit", &self.memory_limit)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
