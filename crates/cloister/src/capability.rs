//! Host capabilities exposed into sandbox contexts.
//!
//! A [`CapabilityRegistry`] is built once and shared by every invocation. Its
//! entries are bound into each new context before untrusted code runs; the
//! registry itself is immutable once built.

use std::{collections::HashSet, fmt, sync::Arc};

use crate::{
    error::{Error, Result},
    host::{AsyncFn, AsyncHostFn, BoxError, SyncFn, SyncHostFn},
    value::Value,
};

#[derive(Clone)]
pub enum CapabilityKind {
    /// Deep-copied into the context at bind time.
    Value(Value),
    Sync(Arc<dyn SyncHostFn>),
    Async(Arc<dyn AsyncHostFn>),
}

impl CapabilityKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Value(_) => "value",
            Self::Sync(_) => "sync-function",
            Self::Async(_) => "async-function",
        }
    }
}

impl fmt::Debug for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Sync(_) => f.write_str("Sync(<fn>)"),
            Self::Async(_) => f.write_str("Async(<fn>)"),
        }
    }
}

/// One named entry of the capability surface.
#[derive(Clone, Debug)]
pub struct Capability {
    pub(crate) name: Arc<str>,
    pub(crate) kind: CapabilityKind,
    pub(crate) lossy_args: bool,
}

impl Capability {
    #[must_use]
    pub fn new(name: impl Into<Arc<str>>, kind: CapabilityKind) -> Self {
        Self {
            name: name.into(),
            kind,
            lossy_args: false,
        }
    }

    #[must_use]
    pub fn value(name: impl Into<Arc<str>>, value: Value) -> Self {
        Self::new(name, CapabilityKind::Value(value))
    }

    #[must_use]
    pub fn sync_fn<F>(name: impl Into<Arc<str>>, f: F) -> Self
    where
        F: Fn(Vec<Value>) -> core::result::Result<Value, BoxError> + Send + Sync + 'static,
    {
        Self::new(name, CapabilityKind::Sync(Arc::new(SyncFn(f))))
    }

    #[must_use]
    pub fn async_fn<F, Fut>(name: impl Into<Arc<str>>, f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = core::result::Result<Value, BoxError>> + Send + 'static,
    {
        Self::new(name, CapabilityKind::Async(Arc::new(AsyncFn(f))))
    }

    /// Replace arguments that cannot be copied with a short description
    /// instead of failing the call.
    #[must_use]
    pub const fn lossy_args(mut self) -> Self {
        self.lossy_args = true;
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn kind(&self) -> &CapabilityKind {
        &self.kind
    }
}

/// Process-wide, immutable catalog of capabilities.
#[derive(Clone, Debug, Default)]
pub struct CapabilityRegistry {
    entries: Arc<[Capability]>,
}

impl CapabilityRegistry {
    #[must_use]
    pub fn builder() -> CapabilityRegistryBuilder {
        CapabilityRegistryBuilder::default()
    }

    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Capability> {
        self.entries.iter()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Capability> {
        self.entries.iter().find(|c| &*c.name == name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Default)]
pub struct CapabilityRegistryBuilder {
    entries: Vec<Capability>,
}

impl CapabilityRegistryBuilder {
    #[must_use]
    pub fn register(mut self, capability: Capability) -> Self {
        self.entries.push(capability);
        self
    }

    /// Add the `log` capability writing to the script trace target.
    #[must_use]
    pub fn with_log(self) -> Self {
        self.register(crate::builtins::log())
    }

    /// # Errors
    /// Returns [`Error::Binding`] if two entries share a name.
    pub fn build(self) -> Result<CapabilityRegistry> {
        let mut seen = HashSet::with_capacity(self.entries.len());
        for entry in &self.entries {
            if entry.name.is_empty() {
                return Err(Error::binding("", "capability name is empty"));
            }
            if !seen.insert(entry.name.clone()) {
                return Err(Error::binding(&*entry.name, "duplicate capability name"));
            }
        }
        Ok(CapabilityRegistry {
            entries: self.entries.into(),
        })
    }
}
