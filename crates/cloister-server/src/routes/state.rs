use std::{sync::Arc, time::Duration};

use cloister::{BoxError, Capability, CapabilityRegistry, Invoker, SandboxOptions};
use cloister_fetch::FetchDelegate;

use crate::config::Config;

#[derive(Clone)]
pub struct AppState {
    pub invoker: Invoker,
    pub max_memory: usize,
    pub demo_url: Arc<str>,
}

impl AppState {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let delegate = FetchDelegate::builder()
            .deny_private_addresses(config.fetch_deny_private)
            .build()?;
        let registry = CapabilityRegistry::builder()
            .with_log()
            .register(delegate.into_capability())
            .register(greeting())
            .build()?;

        let mut options = SandboxOptions::default().with_memory_limit(config.max_memory);
        if let Some(timeout) = config.timeout {
            options = options.with_timeout(timeout);
        }

        Ok(Self {
            invoker: Invoker::new(registry).with_options(options),
            max_memory: config.max_memory,
            demo_url: config.demo_url.as_str().into(),
        })
    }
}

/// `myAsyncFunction()`: resolves with a fixed greeting shortly after the call.
fn greeting() -> Capability {
    Capability::async_fn("myAsyncFunction", |_| async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        Ok::<_, BoxError>(cloister::Value::from_serde(
            "Hello from async function in isolate!",
        )?)
    })
}
