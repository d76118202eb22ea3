use std::{collections::HashSet, fmt, sync::Arc};

use rquickjs::{
    Array, AsyncContext, AsyncRuntime, Ctx, Function, Value as JsValue, async_with,
    function::Args, object::Filter,
};

use super::{Deadline, SandboxId};
use crate::{
    capability::{Capability, CapabilityRegistry},
    error::{Error, Result},
    internal::{
        bridge::Bridge,
        failure::{Evidence, Fault, FaultTable, Phase, thrown},
        handles::HandleTable,
        limits::LimitSignals,
        marshal,
    },
    value::Value,
};

/// Hidden global holding every entry point the context produced.
const ENTRY_POINTS: &str = "__cloisterEntryPoints";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Created,
    Populated,
    /// Untrusted code has run; the capability surface is sealed.
    Evaluating,
    Released,
}

/// Callable produced by [`Context::evaluate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryPoint {
    sandbox: SandboxId,
    index: usize,
}

/// The global namespace untrusted code runs in.
///
/// Capabilities are bound before the first evaluation. Once any untrusted code
/// has run the set is fixed for the lifetime of the context.
pub struct Context {
    sandbox: SandboxId,
    inner: Option<AsyncContext>,
    state: ContextState,
    builtins: HashSet<String>,
    bound: HashSet<Arc<str>>,
    pending: Vec<Capability>,
    entry_points: usize,
    handles: HandleTable,
    faults: FaultTable,
    deadline: Option<Deadline>,
    signals: Arc<LimitSignals>,
}

impl Context {
    pub(crate) async fn open(
        sandbox: SandboxId,
        runtime: &AsyncRuntime,
        deadline: Option<Deadline>,
        signals: Arc<LimitSignals>,
    ) -> Result<Self> {
        let inner = AsyncContext::full(runtime).await?;
        let builtins = async_with!(inner => |ctx| { prepare_globals(&ctx) }).await?;
        Ok(Self {
            sandbox,
            inner: Some(inner),
            state: ContextState::Created,
            builtins,
            bound: HashSet::new(),
            pending: Vec::new(),
            entry_points: 0,
            handles: HandleTable::default(),
            faults: FaultTable::default(),
            deadline,
            signals,
        })
    }

    #[must_use]
    pub const fn state(&self) -> ContextState {
        self.state
    }

    pub fn bound_names(&self) -> impl Iterator<Item = &str> {
        self.bound.iter().map(|name| &**name)
    }

    /// Number of `HostRef` handles that have not been released.
    #[must_use]
    pub fn outstanding_references(&self) -> usize {
        self.handles.len()
    }

    /// Bind one capability under its registered name.
    ///
    /// # Errors
    /// Returns [`Error::Binding`] if the context is sealed or released, or
    /// the name is taken by another capability or an existing global.
    pub fn bind(&mut self, capability: &Capability) -> Result<()> {
        let name = capability.name();
        match self.state {
            ContextState::Evaluating => return Err(Error::binding(name, "context sealed")),
            ContextState::Released => return Err(Error::binding(name, "context released")),
            ContextState::Created | ContextState::Populated => {}
        }
        if name.is_empty() {
            return Err(Error::binding(name, "capability name is empty"));
        }
        if self.bound.contains(name) {
            return Err(Error::binding(name, "already bound"));
        }
        if self.builtins.contains(name) {
            return Err(Error::binding(name, "would shadow an existing global"));
        }
        self.bound.insert(capability.name.clone());
        self.pending.push(capability.clone());
        self.state = ContextState::Populated;
        Ok(())
    }

    /// Bind every entry of `registry`.
    ///
    /// # Errors
    /// Fails on the first entry [`Context::bind`] rejects.
    pub fn bind_all(&mut self, registry: &CapabilityRegistry) -> Result<()> {
        registry.iter().try_for_each(|capability| self.bind(capability))
    }

    /// Run `source` as a script and return the callable it produced.
    ///
    /// The completion value of the script is used when it is a function,
    /// otherwise a global function named `main`.
    ///
    /// # Errors
    /// Returns [`Error::SandboxEvaluation`] for parse errors, top-level throws
    /// and scripts without an entry point, or a resource/timeout error when a
    /// limit is hit.
    pub async fn evaluate(&mut self, source: &str) -> Result<EntryPoint> {
        let inner = self.live()?.clone();
        self.state = ContextState::Evaluating;

        let pending = std::mem::take(&mut self.pending);
        let bridge = Bridge::new(self.sandbox, self.handles.clone(), self.faults.clone());
        let source = source.to_owned();
        let refusals = self.signals.refusals();
        let outcome =
            async_with!(inner => |ctx| { evaluate_in(&ctx, &bridge, &pending, &source) }).await;

        match outcome {
            Ok(index) => {
                self.entry_points = self.entry_points.max(index + 1);
                Ok(EntryPoint {
                    sandbox: self.sandbox,
                    index,
                })
            }
            Err(fault) => Err(fault.into_error(Phase::Evaluation, self.evidence(refusals))),
        }
    }

    /// Call `entry` with deep copies of `args`, awaiting the promise it
    /// returns, and copy the outcome out.
    ///
    /// # Errors
    /// Returns [`Error::EntryPointInvocation`] when the entry point throws or
    /// rejects, [`Error::DelegateFailure`] for an uncaught capability failure,
    /// [`Error::Marshal`] when the result cannot be copied, or a
    /// resource/timeout error when a limit is hit.
    pub async fn invoke(&mut self, entry: &EntryPoint, args: Vec<Value>) -> Result<Value> {
        let inner = self.live()?.clone();
        if entry.sandbox != self.sandbox {
            return Err(Error::Runtime(
                "entry point belongs to another sandbox".to_string(),
            ));
        }
        if entry.index >= self.entry_points {
            return Err(Error::Runtime("unknown entry point".to_string()));
        }

        let index = entry.index;
        let deadline = self.deadline;
        let refusals = self.signals.refusals();
        let outcome = async_with!(inner => |ctx| {
            match entry_point(&ctx, index) {
                Ok(func) => invoke_in(&ctx, func, args, deadline).await,
                Err(fault) => Err(fault),
            }
        })
        .await;

        outcome.map_err(|fault| fault.into_error(Phase::Invocation, self.evidence(refusals)))
    }

    /// Tear the namespace down.
    ///
    /// Outstanding `HostRef` handles are invalidated and nothing may be
    /// evaluated afterwards. Releasing twice has no effect.
    pub fn release(&mut self) {
        if self.state == ContextState::Released {
            return;
        }
        self.entry_points = 0;
        self.pending.clear();
        let outstanding = self.handles.len();
        self.handles.clear();
        self.faults.clear();
        self.inner = None;
        self.state = ContextState::Released;
        tracing::debug!(sandbox = %self.sandbox, outstanding, "context released");
    }

    fn live(&self) -> Result<&AsyncContext> {
        self.inner
            .as_ref()
            .ok_or_else(|| Error::Runtime("context released".to_string()))
    }

    /// What the limits observed since the allocator had refused `refusals`
    /// times.
    fn evidence(&self, refusals: u64) -> Evidence<'_> {
        Evidence {
            timed_out: self
                .deadline
                .filter(|_| self.signals.interrupted())
                .map(|deadline| deadline.timeout()),
            exhausted: self.signals.refusals() > refusals,
            faults: &self.faults,
        }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("sandbox", &self.sandbox)
            .field("state", &self.state)
            .field("bound", &self.bound)
            .finish_non_exhaustive()
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        self.release();
    }
}

fn prepare_globals(ctx: &Ctx<'_>) -> Result<HashSet<String>> {
    let globals = ctx.globals();
    globals.set("global", globals.clone())?;
    globals.prop(ENTRY_POINTS, Array::new(ctx.clone())?)?;
    let names = globals
        .own_keys::<String>(Filter::new().string())
        .collect::<rquickjs::Result<HashSet<_>>>()?;
    Ok(names)
}

fn evaluate_in(
    ctx: &Ctx<'_>,
    bridge: &Bridge,
    pending: &[Capability],
    source: &str,
) -> Result<usize, Fault> {
    for capability in pending {
        bridge.install(ctx, capability)?;
    }

    let completion: JsValue<'_> = ctx.eval(source).map_err(|e| thrown(ctx, e))?;
    let entry = match completion.into_function() {
        Some(func) => func,
        None => {
            let main: JsValue<'_> = ctx.globals().get("main").map_err(|e| thrown(ctx, e))?;
            main.into_function().ok_or_else(|| Error::SandboxEvaluation {
                message: "script did not produce an entry point function".to_string(),
                stack: None,
            })?
        }
    };
    let table: Array<'_> = ctx.globals().get(ENTRY_POINTS).map_err(|e| thrown(ctx, e))?;
    let index = table.len();
    table.set(index, entry).map_err(|e| thrown(ctx, e))?;
    Ok(index)
}

fn entry_point<'js>(ctx: &Ctx<'js>, index: usize) -> Result<Function<'js>, Fault> {
    let table: Array<'js> = ctx.globals().get(ENTRY_POINTS).map_err(|e| thrown(ctx, e))?;
    let entry: JsValue<'js> = table.get(index).map_err(|e| thrown(ctx, e))?;
    entry
        .into_function()
        .ok_or_else(|| Error::Runtime("entry point is no longer available".to_string()).into())
}

async fn invoke_in<'js>(
    ctx: &Ctx<'js>,
    func: Function<'js>,
    args: Vec<Value>,
    deadline: Option<Deadline>,
) -> Result<Value, Fault> {
    let mut js_args = Args::new(ctx.clone(), args.len());
    for (idx, arg) in args.iter().enumerate() {
        let value = marshal::to_js(ctx, arg).map_err(|reason| Error::Marshal {
            message: format!("entry point argument {idx} cannot be copied: {reason}"),
        })?;
        js_args.push_arg(value).map_err(|e| thrown(ctx, e))?;
    }

    let returned: JsValue<'js> = func.call_arg(js_args).map_err(|e| thrown(ctx, e))?;
    let result = match returned.try_into_promise() {
        Ok(promise) => {
            let settled = promise.into_future::<JsValue<'js>>();
            let settled = match deadline {
                Some(deadline) => tokio::time::timeout_at(deadline.instant(), settled)
                    .await
                    .map_err(|_| Error::Timeout(deadline.timeout()))?,
                None => settled.await,
            };
            settled.map_err(|e| thrown(ctx, e))?
        }
        Err(returned) => returned,
    };

    marshal::to_host(&result).map_err(|reason| {
        Fault::Error(Error::Marshal {
            message: format!("entry point result cannot be copied: {reason}"),
        })
    })
}
