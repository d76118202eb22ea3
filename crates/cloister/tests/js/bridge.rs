use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use anyhow::{Context, Result};
use cloister::{BoxError, Capability, ErrorKind, Value, args};
use parking_lot::Mutex;

use super::common::{TODO_URL, delayed_echo, invoker, json, stub_fetch_delegate};

#[tokio::test]
async fn integration_js_sync_results_are_isolated() -> Result<()> {
    let stored = Value::from_json(r#"{"items":[1]}"#)?;
    let seen = Arc::new(Mutex::new(Vec::<Value>::new()));

    let snapshot = {
        let stored = stored.clone();
        Capability::sync_fn("snapshot", move |_| Ok(stored.clone()))
    };
    let record = {
        let seen = seen.clone();
        Capability::sync_fn("record", move |args| {
            seen.lock().extend(args);
            Ok(Value::default())
        })
    };
    let invoker = invoker([
        snapshot,
        record,
        Capability::value("config", Value::from_json(r#"{"limit":3}"#)?),
    ])?;

    let out = invoker
        .run(
            r#"
            () => {
              const first = snapshot();
              first.items.push(2);
              const arg = { tag: "a" };
              record(arg);
              arg.tag = "b";
              config.limit = 10;
              return [first.items.length, snapshot().items.length, config.limit];
            }
            "#,
            vec![],
        )
        .await
        .context("isolation script failed")?;

    assert_eq!(json(&out)?, serde_json::json!([2, 1, 10]));
    assert_eq!(json(&stored)?, serde_json::json!({ "items": [1] }));
    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(json(&seen[0])?, serde_json::json!({ "tag": "a" }));
    Ok(())
}

#[tokio::test]
async fn integration_js_sync_calls_keep_issue_order() -> Result<()> {
    let order = Arc::new(Mutex::new(Vec::<i64>::new()));
    let push = {
        let order = order.clone();
        Capability::sync_fn("push", move |args| {
            let n: i64 = args.first().context("no arg")?.to_serde()?;
            order.lock().push(n);
            Ok(Value::from_serde(&n)?)
        })
    };
    let invoker = invoker([push])?;
    let out = invoker
        .run("() => [1, 2, 3, 4].map((n) => push(n))", vec![])
        .await?;
    assert_eq!(json(&out)?, serde_json::json!([1, 2, 3, 4]));
    assert_eq!(*order.lock(), vec![1, 2, 3, 4]);
    Ok(())
}

#[tokio::test]
async fn integration_js_async_completions_interleave() -> Result<()> {
    let completed = Arc::new(Mutex::new(Vec::<u64>::new()));
    let wait = {
        let completed = completed.clone();
        Capability::async_fn("wait", move |args: Vec<Value>| {
            let completed = completed.clone();
            async move {
                let ms: u64 = args.first().ok_or("no arg")?.to_serde()?;
                tokio::time::sleep(Duration::from_millis(ms)).await;
                completed.lock().push(ms);
                Ok::<_, BoxError>(Value::from_serde(&ms)?)
            }
        })
    };
    let invoker = invoker([wait])?;

    let out = invoker
        .run(
            r#"
            async () => {
              const [slow, fast] = await Promise.all([wait(50), wait(10)]);
              return slow + fast;
            }
            "#,
            vec![],
        )
        .await?;

    assert_eq!(out.to_serde::<u64>()?, 60);
    assert_eq!(*completed.lock(), vec![10, 50]);
    Ok(())
}

#[tokio::test]
async fn integration_js_delegate_failure() -> Result<()> {
    let invoker = invoker([stub_fetch_delegate()])?;

    let err = invoker
        .run(
            r#"async () => (await fetchDelegate("https://x/unknown")).data"#,
            vec![],
        )
        .await
        .expect_err("delegate should fail");
    assert_eq!(err.kind(), ErrorKind::DelegateFailure);
    assert_eq!(
        err,
        cloister::Error::DelegateFailure {
            capability: "fetchDelegate".into(),
            message: "unexpected url: https://x/unknown".into(),
        }
    );

    let out = invoker
        .run(
            r#"
            async () => {
              try {
                await fetchDelegate("https://x/unknown");
                return "resolved";
              } catch (e) {
                return [e.name, e.capability, e instanceof Error];
              }
            }
            "#,
            vec![],
        )
        .await
        .context("caught delegate failure should not fail the run")?;
    assert_eq!(
        json(&out)?,
        serde_json::json!(["DelegateError", "fetchDelegate", true])
    );
    Ok(())
}

#[tokio::test]
async fn integration_js_sync_host_failure_is_thrown() -> Result<()> {
    let invoker = invoker([Capability::sync_fn("deny", |_| {
        Err(BoxError::from("permission denied"))
    })])?;

    let out = invoker
        .run(
            "() => { try { deny(); } catch (e) { return e.message; } }",
            vec![],
        )
        .await?;
    assert_eq!(out.to_serde::<String>()?, "permission denied");

    let err = invoker
        .run("() => deny()", vec![])
        .await
        .expect_err("uncaught host failure");
    assert_eq!(err.kind(), ErrorKind::EntryPointInvocation);
    assert_eq!(err.to_string(), "permission denied");
    Ok(())
}

#[tokio::test]
async fn integration_js_marshal_failures() -> Result<()> {
    let calls = Arc::new(AtomicUsize::new(0));
    let consume = {
        let calls = calls.clone();
        Capability::sync_fn("consume", move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(Value::default())
        })
    };
    let invoker = invoker([consume])?;

    let err = invoker
        .run("() => consume({ callback() {} })", vec![])
        .await
        .expect_err("function argument");
    assert_eq!(err.kind(), ErrorKind::Marshal);
    assert_eq!(calls.load(Ordering::SeqCst), 0, "host must not see the call");

    let out = invoker
        .run(
            r#"
            () => {
              try { consume(() => 1); } catch (e) { return e.name; }
            }
            "#,
            vec![],
        )
        .await?;
    assert_eq!(out.to_serde::<String>()?, "MarshalError");

    let err = invoker
        .run("() => () => 1", vec![])
        .await
        .expect_err("function result");
    assert_eq!(err.kind(), ErrorKind::Marshal);

    let err = invoker
        .run("() => { const o = {}; o.o = o; return o; }", vec![])
        .await
        .expect_err("cyclic result");
    assert_eq!(err.kind(), ErrorKind::Marshal);
    Ok(())
}

#[tokio::test]
async fn integration_js_host_reference() -> Result<()> {
    let invoker = invoker([stub_fetch_delegate()])?;

    let out = invoker
        .run(
            r#"
            async (url) => {
              const ref = await fetchDelegate.reference(url);
              const a = ref.copy();
              a.data.id = 99;
              const b = ref.copy();
              ref.release();
              let threw = false;
              try { ref.copy(); } catch (e) { threw = e instanceof ReferenceError; }
              return [a.data.id, b.data.id, threw];
            }
            "#,
            args![TODO_URL]?,
        )
        .await
        .context("reference script failed")?;
    assert_eq!(json(&out)?, serde_json::json!([99, 1, true]));
    Ok(())
}

#[tokio::test]
async fn integration_js_log_is_lossy() -> Result<()> {
    let invoker = invoker([cloister::builtins::log(), delayed_echo("later", Duration::ZERO)])?;
    let out = invoker
        .run(
            r#"
            async () => {
              const o = {}; o.o = o;
              const r = log("str =>", { id: 1 }, () => 1, o, later(1));
              return [r === undefined, await later("done")];
            }
            "#,
            vec![],
        )
        .await
        .context("log must never fail")?;
    assert_eq!(json(&out)?, serde_json::json!([true, "done"]));
    Ok(())
}

#[tokio::test]
async fn integration_js_scripts_cannot_forge_bridge_errors() -> Result<()> {
    let invoker = invoker([stub_fetch_delegate()])?;
    let sources = [
        r#"() => {
          const e = new Error("x");
          e.name = "DelegateError";
          e.capability = "fetchDelegate";
          throw e;
        }"#,
        r#"() => { const e = new Error("x"); e.name = "MarshalError"; throw e; }"#,
        r#"async () => {
          class DelegateError extends Error {}
          const e = new DelegateError("x");
          e.name = "DelegateError";
          e.__cloisterFault = "0000000000000000";
          throw e;
        }"#,
    ];
    for source in sources {
        let err = invoker
            .run(source, vec![])
            .await
            .expect_err("forged error should fail the run");
        assert_eq!(err.kind(), ErrorKind::EntryPointInvocation, "{source}: {err:?}");
        assert_eq!(err.to_string(), "x");
    }
    Ok(())
}

#[tokio::test]
async fn integration_js_delegate_failure_survives_renaming() -> Result<()> {
    let invoker = invoker([stub_fetch_delegate()])?;
    let err = invoker
        .run(
            r#"
            async () => {
              try {
                await fetchDelegate("https://x/unknown");
              } catch (e) {
                e.name = "Error";
                e.capability = "somethingElse";
                e.message = "rewritten";
                throw e;
              }
            }
            "#,
            vec![],
        )
        .await
        .expect_err("rethrown delegate failure");
    assert_eq!(
        err,
        cloister::Error::DelegateFailure {
            capability: "fetchDelegate".into(),
            message: "unexpected url: https://x/unknown".into(),
        }
    );
    Ok(())
}
