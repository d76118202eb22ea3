//! Run untrusted JavaScript in memory-bounded sandboxes that reach the host
//! only through explicitly bound, marshalled capabilities.

mod args_macro;
pub mod builtins;
pub mod capability;
mod driver;
pub mod error;
pub mod host;
mod internal;
pub mod sandbox;
pub mod value;

/// Tracing target for output produced by sandboxed code.
pub const TRACE_TARGET_SCRIPT: &str = "cloister::script";

pub use capability::{Capability, CapabilityKind, CapabilityRegistry, CapabilityRegistryBuilder};
pub use driver::{Invoker, run, run_with_options};
pub use error::{Error, ErrorKind, InvocationError, Result};
pub use host::{AsyncHostFn, BoxError, LifecycleHook, SyncHostFn};
pub use sandbox::{
    Context, ContextState, EntryPoint, Sandbox, SandboxId, SandboxOptions, SandboxState,
};
pub use value::Value;
