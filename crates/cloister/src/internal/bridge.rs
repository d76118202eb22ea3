//! Sandbox-facing side of host capability calls.
//!
//! Every call marshals its arguments out before the host routine sees them and
//! marshals the result back in before sandboxed code sees it. Async routines
//! run as detached host tasks; the sandbox only ever holds the receiving end
//! of their result, so tearing a sandbox down drops the receiver and the
//! routine's eventual result with it.

use std::sync::Arc;

use rquickjs::{Ctx, Exception, Function, Object, Value as JsValue, function::Rest};
use tokio::sync::oneshot;

use super::{
    failure::{BridgeFault, FAULT_TAG, FaultTable},
    handles::HandleTable,
    marshal,
};
use crate::{
    capability::{Capability, CapabilityKind},
    error::Error,
    host::{AsyncHostFn, BoxError, SyncHostFn},
    sandbox::SandboxId,
    value::Value,
};

const RELEASED: &str = "host reference has been released";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ResultMode {
    /// Await and deep-copy the result.
    Copy,
    /// Keep the result on the host and hand out a `HostRef`.
    Reference,
}

#[derive(Clone)]
pub(crate) struct Bridge {
    sandbox: SandboxId,
    handles: HandleTable,
    faults: FaultTable,
}

impl Bridge {
    pub(crate) const fn new(sandbox: SandboxId, handles: HandleTable, faults: FaultTable) -> Self {
        Self {
            sandbox,
            handles,
            faults,
        }
    }

    /// Install `capability` as a global of `ctx`.
    pub(crate) fn install(&self, ctx: &Ctx<'_>, capability: &Capability) -> Result<(), Error> {
        let name = capability.name();
        let value = match capability.kind() {
            CapabilityKind::Value(value) => {
                marshal::to_js(ctx, value).map_err(|reason| Error::binding(name, reason))?
            }
            CapabilityKind::Sync(routine) => self
                .sync_function(ctx, capability, routine.clone())
                .map(Function::into_value)
                .map_err(|e| Error::binding(name, e.to_string()))?,
            CapabilityKind::Async(routine) => self
                .async_function(ctx, capability, routine.clone())
                .map(Function::into_value)
                .map_err(|e| Error::binding(name, e.to_string()))?,
        };
        ctx.globals()
            .set(name, value)
            .map_err(|e| Error::binding(name, e.to_string()))?;
        tracing::debug!(
            sandbox = %self.sandbox,
            capability = name,
            kind = capability.kind().as_str(),
            "capability bound"
        );
        Ok(())
    }

    fn sync_function<'js>(
        &self,
        ctx: &Ctx<'js>,
        capability: &Capability,
        routine: Arc<dyn SyncHostFn>,
    ) -> rquickjs::Result<Function<'js>> {
        let call = SyncCall {
            name: capability.name.clone(),
            routine,
            lossy: capability.lossy_args,
            handles: self.handles.clone(),
            faults: self.faults.clone(),
        };
        let by_ref = call.clone();
        let func = Function::new(
            ctx.clone(),
            move |ctx: Ctx<'js>, Rest(args): Rest<JsValue<'js>>| {
                call.invoke(&ctx, &args, ResultMode::Copy)
            },
        )?;
        let reference = Function::new(
            ctx.clone(),
            move |ctx: Ctx<'js>, Rest(args): Rest<JsValue<'js>>| {
                by_ref.invoke(&ctx, &args, ResultMode::Reference)
            },
        )?;
        func.set("reference", reference)?;
        Ok(func)
    }

    fn async_function<'js>(
        &self,
        ctx: &Ctx<'js>,
        capability: &Capability,
        routine: Arc<dyn AsyncHostFn>,
    ) -> rquickjs::Result<Function<'js>> {
        let call = AsyncCall {
            sandbox: self.sandbox,
            name: capability.name.clone(),
            routine,
            lossy: capability.lossy_args,
            handles: self.handles.clone(),
            faults: self.faults.clone(),
        };
        let by_ref = call.clone();
        let func = Function::new(
            ctx.clone(),
            move |ctx: Ctx<'js>, Rest(args): Rest<JsValue<'js>>| {
                call.invoke(&ctx, &args, ResultMode::Copy)
            },
        )?;
        let reference = Function::new(
            ctx.clone(),
            move |ctx: Ctx<'js>, Rest(args): Rest<JsValue<'js>>| {
                by_ref.invoke(&ctx, &args, ResultMode::Reference)
            },
        )?;
        func.set("reference", reference)?;
        Ok(func)
    }
}

#[derive(Clone)]
struct SyncCall {
    name: Arc<str>,
    routine: Arc<dyn SyncHostFn>,
    lossy: bool,
    handles: HandleTable,
    faults: FaultTable,
}

impl SyncCall {
    fn invoke<'js>(
        &self,
        ctx: &Ctx<'js>,
        args: &[JsValue<'js>],
        mode: ResultMode,
    ) -> rquickjs::Result<JsValue<'js>> {
        let args = copy_args(ctx, &self.faults, &self.name, args, self.lossy)?;
        let value = self.routine.call(args).map_err(|err| {
            tracing::debug!(capability = %self.name, error = %err, "host function failed");
            Exception::throw_message(ctx, &err.to_string())
        })?;
        deliver(ctx, &self.faults, &self.name, &self.handles, value, mode)
    }
}

#[derive(Clone)]
struct AsyncCall {
    sandbox: SandboxId,
    name: Arc<str>,
    routine: Arc<dyn AsyncHostFn>,
    lossy: bool,
    handles: HandleTable,
    faults: FaultTable,
}

impl AsyncCall {
    fn invoke<'js>(
        &self,
        ctx: &Ctx<'js>,
        args: &[JsValue<'js>],
        mode: ResultMode,
    ) -> rquickjs::Result<JsValue<'js>> {
        let args = copy_args(ctx, &self.faults, &self.name, args, self.lossy)?;
        let Ok(host) = tokio::runtime::Handle::try_current() else {
            return Err(Exception::throw_internal(
                ctx,
                "async capabilities require a host runtime",
            ));
        };
        let (promise, resolve, reject) = ctx.promise()?;
        let (tx, rx) = oneshot::channel();

        let routine = self.routine.clone();
        let name = self.name.clone();
        let sandbox = self.sandbox;
        host.spawn(async move {
            let outcome = routine.call(args).await;
            if tx.send(outcome).is_err() {
                tracing::debug!(
                    %sandbox,
                    capability = %name,
                    "sandbox disposed before delegate settled, discarding result"
                );
            }
        });

        ctx.spawn(settle(
            ctx.clone(),
            rx,
            Settlement {
                resolve,
                reject,
                name: self.name.clone(),
                handles: self.handles.clone(),
                faults: self.faults.clone(),
                mode,
            },
        ));
        Ok(promise.into_value())
    }
}

/// How a delegate promise is settled once the host routine finishes.
struct Settlement<'js> {
    resolve: Function<'js>,
    reject: Function<'js>,
    name: Arc<str>,
    handles: HandleTable,
    faults: FaultTable,
    mode: ResultMode,
}

async fn settle<'js>(
    ctx: Ctx<'js>,
    rx: oneshot::Receiver<Result<Value, BoxError>>,
    how: Settlement<'js>,
) {
    let Settlement {
        resolve,
        reject,
        name,
        handles,
        faults,
        mode,
    } = how;
    let delegate_failure = |message: String| BridgeFault::Delegate {
        capability: name.to_string(),
        message,
    };
    let settled = match rx.await {
        Ok(Ok(value)) => match deliver(&ctx, &faults, &name, &handles, value, mode) {
            Ok(value) => resolve.call::<_, ()>((value,)),
            Err(_) => reject.call::<_, ()>((ctx.catch(),)),
        },
        Ok(Err(err)) => {
            tracing::debug!(capability = %name, error = %err, "delegate failed");
            error_value(&ctx, &faults, delegate_failure(err.to_string()))
                .and_then(|e| reject.call::<_, ()>((e,)))
        }
        Err(_) => error_value(
            &ctx,
            &faults,
            delegate_failure("delegate task ended without a result".to_string()),
        )
        .and_then(|e| reject.call::<_, ()>((e,))),
    };
    if let Err(err) = settled {
        tracing::debug!(capability = %name, error = %err, "failed to settle delegate promise");
    }
}

fn copy_args<'js>(
    ctx: &Ctx<'js>,
    faults: &FaultTable,
    name: &str,
    args: &[JsValue<'js>],
    lossy: bool,
) -> rquickjs::Result<Vec<Value>> {
    args.iter()
        .enumerate()
        .map(|(idx, arg)| {
            if lossy {
                return Ok(marshal::to_host_lossy(arg));
            }
            marshal::to_host(arg).map_err(|reason| {
                throw_marshal(
                    ctx,
                    faults,
                    format!("argument {idx} of `{name}` cannot be copied: {reason}"),
                )
            })
        })
        .collect()
}

fn deliver<'js>(
    ctx: &Ctx<'js>,
    faults: &FaultTable,
    name: &str,
    handles: &HandleTable,
    value: Value,
    mode: ResultMode,
) -> rquickjs::Result<JsValue<'js>> {
    match mode {
        ResultMode::Copy => marshal::to_js(ctx, &value).map_err(|reason| {
            throw_marshal(
                ctx,
                faults,
                format!("result of `{name}` cannot be copied: {reason}"),
            )
        }),
        ResultMode::Reference => host_ref(ctx, faults, handles, handles.insert(value)),
    }
}

/// Build a `HostRef` object for the table entry `id`.
fn host_ref<'js>(
    ctx: &Ctx<'js>,
    faults: &FaultTable,
    handles: &HandleTable,
    id: u64,
) -> rquickjs::Result<JsValue<'js>> {
    let obj = Object::new(ctx.clone())?;

    let table = handles.clone();
    let faults = faults.clone();
    let copy = Function::new(
        ctx.clone(),
        move |ctx: Ctx<'js>| -> rquickjs::Result<JsValue<'js>> {
            let value = table
                .get(id)
                .ok_or_else(|| Exception::throw_reference(&ctx, RELEASED))?;
            marshal::to_js(&ctx, &value).map_err(|reason| throw_marshal(&ctx, &faults, reason))
        },
    )?;
    obj.set("copy", copy)?;

    let table = handles.clone();
    let release = Function::new(ctx.clone(), move |ctx: Ctx<'js>| -> rquickjs::Result<()> {
        if table.remove(id) {
            Ok(())
        } else {
            Err(Exception::throw_reference(&ctx, RELEASED))
        }
    })?;
    obj.set("release", release)?;

    Ok(obj.into_value())
}

/// Build the JS error for `fault` and tag it with its host record.
fn error_value<'js>(
    ctx: &Ctx<'js>,
    faults: &FaultTable,
    fault: BridgeFault,
) -> rquickjs::Result<JsValue<'js>> {
    let exc = Exception::from_message(ctx.clone(), fault.message())?;
    let obj = exc.as_object();
    obj.set("name", fault.name())?;
    if let BridgeFault::Delegate { capability, .. } = &fault {
        obj.set("capability", capability.as_str())?;
    }
    obj.prop(FAULT_TAG, faults.record(fault))?;
    Ok(exc.into_object().into_value())
}

fn throw_marshal(ctx: &Ctx<'_>, faults: &FaultTable, message: String) -> rquickjs::Error {
    match error_value(ctx, faults, BridgeFault::Marshal { message }) {
        Ok(value) => ctx.throw(value),
        Err(err) => err,
    }
}
