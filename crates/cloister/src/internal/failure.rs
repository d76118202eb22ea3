use std::{collections::HashMap, sync::Arc, time::Duration};

use parking_lot::Mutex;
use rquickjs::{Ctx, Value as JsValue};

use crate::error::Error;

pub(crate) const DELEGATE_ERROR: &str = "DelegateError";
pub(crate) const MARSHAL_ERROR: &str = "MarshalError";
/// Hidden, read-only property carrying the host tag of a bridge error.
pub(crate) const FAULT_TAG: &str = "__cloisterFault";

const STACK_OVERFLOW: &str = "Maximum call stack size exceeded";
const OUT_OF_MEMORY: &str = "out of memory";

/// Which step of an invocation a throw escaped from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Evaluation,
    Invocation,
}

/// An error the bridge raised inside the sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum BridgeFault {
    Delegate { capability: String, message: String },
    Marshal { message: String },
}

impl BridgeFault {
    pub(crate) const fn name(&self) -> &'static str {
        match self {
            Self::Delegate { .. } => DELEGATE_ERROR,
            Self::Marshal { .. } => MARSHAL_ERROR,
        }
    }

    pub(crate) fn message(&self) -> &str {
        match self {
            Self::Delegate { message, .. } | Self::Marshal { message } => message,
        }
    }

    fn into_error(self) -> Error {
        match self {
            Self::Delegate {
                capability,
                message,
            } => Error::DelegateFailure {
                capability,
                message,
            },
            Self::Marshal { message } => Error::Marshal { message },
        }
    }
}

/// Host record of the errors the bridge raised in one context.
///
/// Sandboxed code can copy an error's name and properties but cannot mint a
/// tag this table knows about.
#[derive(Clone, Default)]
pub(crate) struct FaultTable {
    inner: Arc<Mutex<HashMap<String, BridgeFault>>>,
}

impl FaultTable {
    /// Remember `fault` and return the tag identifying it.
    pub(crate) fn record(&self, fault: BridgeFault) -> String {
        let mut faults = self.inner.lock();
        loop {
            let tag = format!("{:016x}", rand::random::<u64>());
            if !faults.contains_key(&tag) {
                faults.insert(tag.clone(), fault);
                return tag;
            }
        }
    }

    pub(crate) fn get(&self, tag: &str) -> Option<BridgeFault> {
        self.inner.lock().get(tag).cloned()
    }

    pub(crate) fn clear(&self) {
        self.inner.lock().clear();
    }
}

/// What the host itself saw while a phase ran.
#[derive(Clone, Copy)]
pub(crate) struct Evidence<'a> {
    /// Set once the interrupt handler stopped the engine at the deadline.
    pub(crate) timed_out: Option<Duration>,
    /// The allocator refused the engine during the phase.
    pub(crate) exhausted: bool,
    pub(crate) faults: &'a FaultTable,
}

/// A value thrown inside the sandbox, copied out as plain strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Caught {
    pub(crate) name: Option<String>,
    pub(crate) message: String,
    pub(crate) stack: Option<String>,
    pub(crate) tag: Option<String>,
    /// The thrown value was `null` or `undefined`.
    pub(crate) nullish: bool,
}

impl Caught {
    /// Take the pending exception off `ctx`.
    pub(crate) fn take(ctx: &Ctx<'_>) -> Self {
        Self::from_value(&ctx.catch())
    }

    pub(crate) fn from_value(thrown: &JsValue<'_>) -> Self {
        if thrown.is_null() || thrown.is_undefined() {
            let message = if thrown.is_null() { "null" } else { "undefined" };
            return Self {
                message: message.to_string(),
                nullish: true,
                ..Self::default()
            };
        }
        if let Some(exc) = thrown.as_exception() {
            return Self {
                name: exc.get::<_, Option<String>>("name").ok().flatten(),
                message: exc.message().unwrap_or_default(),
                stack: exc.stack().filter(|s| !s.is_empty()),
                tag: exc.get::<_, Option<String>>(FAULT_TAG).ok().flatten(),
                nullish: false,
            };
        }
        let message = thrown
            .as_string()
            .and_then(|s| s.to_string().ok())
            .or_else(|| {
                super::marshal::to_host(thrown)
                    .ok()
                    .and_then(|v| v.to_json().ok())
            })
            .unwrap_or_else(|| format!("uncaught {:?}", thrown.type_of()));
        Self {
            message,
            ..Self::default()
        }
    }

    fn is_named(&self, name: &str) -> bool {
        self.name.as_deref() == Some(name)
    }

    /// The engine's own out-of-memory error, or the bare `null` it throws
    /// when even that cannot be allocated.
    fn is_engine_oom(&self) -> bool {
        self.nullish || (self.is_named("InternalError") && self.message == OUT_OF_MEMORY)
    }

    /// Stack exhaustion raises no host-visible signal; the engine's exact
    /// error is the only evidence.
    fn is_stack_overflow(&self) -> bool {
        self.is_named("RangeError") && self.message == STACK_OVERFLOW
    }

    /// Map a sandbox throw onto the invocation taxonomy.
    pub(crate) fn classify(self, phase: Phase, evidence: Evidence<'_>) -> Error {
        if let Some(timeout) = evidence.timed_out {
            return Error::Timeout(timeout);
        }
        if evidence.exhausted && self.is_engine_oom() {
            return Error::ResourceExhausted {
                message: OUT_OF_MEMORY.to_string(),
            };
        }
        if self.is_stack_overflow() {
            return Error::ResourceExhausted {
                message: self.message,
            };
        }
        if let Some(fault) = self.tag.as_deref().and_then(|tag| evidence.faults.get(tag)) {
            return fault.into_error();
        }
        match phase {
            Phase::Evaluation => Error::SandboxEvaluation {
                message: self.message,
                stack: self.stack,
            },
            Phase::Invocation => Error::EntryPointInvocation {
                message: self.message,
                stack: self.stack,
            },
        }
    }
}

/// Failure produced while the context lock is held.
#[derive(Debug)]
pub(crate) enum Fault {
    Thrown(Caught),
    Error(Error),
}

impl Fault {
    pub(crate) fn into_error(self, phase: Phase, evidence: Evidence<'_>) -> Error {
        match self {
            Self::Thrown(caught) => caught.classify(phase, evidence),
            Self::Error(err) => err,
        }
    }
}

/// Capture the cause of an engine call that returned `err`.
pub(crate) fn thrown(ctx: &Ctx<'_>, err: rquickjs::Error) -> Fault {
    if matches!(err, rquickjs::Error::Exception) {
        Fault::Thrown(Caught::take(ctx))
    } else {
        Fault::Error(err.into())
    }
}

impl From<Error> for Fault {
    fn from(value: Error) -> Self {
        Self::Error(value)
    }
}
