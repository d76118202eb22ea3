use crate::{TRACE_TARGET_SCRIPT, capability::Capability, value::Value};

/// `log(...args)`: write the arguments to [`TRACE_TARGET_SCRIPT`].
///
/// Strings are printed as-is, everything else as JSON. Arguments that cannot
/// be copied are described instead, so the call never fails.
#[must_use]
pub fn log() -> Capability {
    Capability::sync_fn("log", |args| {
        let line = render(&args);
        tracing::info!(target: TRACE_TARGET_SCRIPT, "{line}");
        Ok(Value::default())
    })
    .lossy_args()
}

fn render(args: &[Value]) -> String {
    args.iter()
        .map(|arg| match arg.to_json_value() {
            Ok(serde_json::Value::String(s)) => s,
            Ok(other) => other.to_string(),
            Err(_) => "<invalid>".to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}
