use std::sync::Arc;

use tracing::{Instrument, debug_span};

use crate::{
    capability::CapabilityRegistry,
    error::Result,
    host::LifecycleHook,
    sandbox::{Sandbox, SandboxOptions},
    value::Value,
};

/// Run `source` once in a fresh sandbox bounded by `memory_limit` bytes.
///
/// The sandbox is disposed before this returns, whatever the outcome.
///
/// # Errors
/// Returns the [`InvocationError`](crate::InvocationError) of the first step
/// that failed.
pub async fn run(
    source: &str,
    args: Vec<Value>,
    capabilities: &CapabilityRegistry,
    memory_limit: usize,
) -> Result<Value> {
    run_with_options(
        source,
        args,
        capabilities,
        &SandboxOptions::default().with_memory_limit(memory_limit),
    )
    .await
}

/// [`run`] with full sandbox options.
///
/// # Errors
/// Returns the [`InvocationError`](crate::InvocationError) of the first step
/// that failed.
pub async fn run_with_options(
    source: &str,
    args: Vec<Value>,
    capabilities: &CapabilityRegistry,
    options: &SandboxOptions,
) -> Result<Value> {
    Invoker::new(capabilities.clone())
        .with_options(options.clone())
        .run(source, args)
        .await
}

/// Reusable invocation settings: one registry, default limits and an
/// optional lifecycle observer shared by every run.
#[derive(Clone, Default)]
pub struct Invoker {
    registry: CapabilityRegistry,
    options: SandboxOptions,
    hook: Option<Arc<dyn LifecycleHook>>,
}

impl Invoker {
    #[must_use]
    pub fn new(registry: CapabilityRegistry) -> Self {
        Self {
            registry,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: SandboxOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn with_hook(mut self, hook: impl LifecycleHook) -> Self {
        self.hook = Some(Arc::new(hook));
        self
    }

    #[must_use]
    pub const fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    #[must_use]
    pub const fn options(&self) -> &SandboxOptions {
        &self.options
    }

    /// # Errors
    /// See [`run`].
    pub async fn run(&self, source: &str, args: Vec<Value>) -> Result<Value> {
        self.run_with(source, args, &SandboxOptions::default()).await
    }

    /// Run with `overrides` merged over this invoker's options.
    ///
    /// # Errors
    /// See [`run`].
    pub async fn run_with(
        &self,
        source: &str,
        args: Vec<Value>,
        overrides: &SandboxOptions,
    ) -> Result<Value> {
        let options = self.options.merged_with(overrides);
        let mut sandbox = Sandbox::create_with_hook(&options, self.hook.clone()).await?;
        let id = sandbox.id();

        let outcome = drive(&mut sandbox, &self.registry, source, args)
            .instrument(debug_span!("sandbox.run", sandbox = %id))
            .await;
        sandbox.dispose();

        if let Err(err) = &outcome {
            tracing::debug!(sandbox = %id, kind = err.kind().as_str(), error = %err, "invocation failed");
        }
        outcome
    }
}

async fn drive(
    sandbox: &mut Sandbox,
    registry: &CapabilityRegistry,
    source: &str,
    args: Vec<Value>,
) -> Result<Value> {
    let context = sandbox.create_context().await?;
    context.bind_all(registry)?;
    let entry = context.evaluate(source).await?;
    context.invoke(&entry, args).await
}
