use std::time::Duration;

use anyhow::{Context, Result};
use cloister::{
    Capability, CapabilityRegistry, ContextState, ErrorKind, Invoker, Sandbox, SandboxOptions,
    Value, args,
};
use rand::{Rng, SeedableRng, rngs::StdRng};

use super::common::{CountingHook, delayed_echo, invoker, registry};

#[tokio::test]
async fn integration_js_every_sandbox_is_disposed() -> Result<()> {
    const RUNS: usize = 1000;
    const SCRIPTS: &[(&str, Option<ErrorKind>)] = &[
        ("(n) => n + 1", None),
        ("async (n) => (await echo(n)) * 2", None),
        ("() => { throw new Error('boom'); }", Some(ErrorKind::EntryPointInvocation)),
        ("throw new Error('early');", Some(ErrorKind::SandboxEvaluation)),
        ("(n) => {", Some(ErrorKind::SandboxEvaluation)),
        ("() => () => 1", Some(ErrorKind::Marshal)),
        ("async () => { await echo(1); throw 'late'; }", Some(ErrorKind::EntryPointInvocation)),
    ];

    let hook = CountingHook::default();
    let invoker = invoker([delayed_echo("echo", Duration::ZERO)])?.with_hook(hook.clone());
    let mut rng = StdRng::seed_from_u64(0x5eed);

    for i in 0..RUNS {
        let (source, expected) = SCRIPTS[rng.random_range(0..SCRIPTS.len())];
        let n: i64 = rng.random_range(0..1000);
        let outcome = invoker.run(source, args![n]?).await;
        match (outcome, expected) {
            (Ok(_), None) => {}
            (Err(err), Some(kind)) => assert_eq!(err.kind(), kind, "run {i}: {source}"),
            (outcome, expected) => {
                anyhow::bail!("run {i}: {source} gave {outcome:?}, expected {expected:?}")
            }
        }
    }

    assert_eq!(hook.created(), RUNS);
    assert_eq!(hook.disposed(), RUNS);
    Ok(())
}

#[tokio::test]
async fn integration_js_cancelled_run_disposes() -> Result<()> {
    let hook = CountingHook::default();
    let invoker =
        invoker([delayed_echo("never", Duration::from_secs(60))])?.with_hook(hook.clone());

    let cancelled = tokio::time::timeout(
        Duration::from_millis(50),
        invoker.run("async () => await never(1)", vec![]),
    )
    .await;
    assert!(cancelled.is_err(), "run should still be pending");
    assert_eq!(hook.created(), 1);
    assert_eq!(hook.disposed(), 1);
    Ok(())
}

#[tokio::test]
async fn integration_js_context_is_sealed_after_evaluation() -> Result<()> {
    let mut sandbox = Sandbox::create(&SandboxOptions::default())
        .await
        .context("failed to create sandbox")?;
    let context = sandbox.create_context().await?;
    assert_eq!(context.state(), ContextState::Created);

    context.bind(&Capability::value("answer", Value::from_serde(&42)?))?;
    assert_eq!(context.state(), ContextState::Populated);

    let err = context
        .bind(&Capability::value("answer", Value::null()))
        .expect_err("duplicate name");
    assert_eq!(err.kind(), ErrorKind::Binding);

    for builtin in ["JSON", "global", "globalThis", "Promise"] {
        let err = context
            .bind(&Capability::value(builtin, Value::null()))
            .expect_err("shadowing a global");
        assert_eq!(err.kind(), ErrorKind::Binding, "{builtin}");
    }

    let entry = context.evaluate("() => answer").await?;
    assert_eq!(context.state(), ContextState::Evaluating);

    let err = context
        .bind(&Capability::value("late", Value::null()))
        .expect_err("late binding");
    assert_eq!(
        err,
        cloister::Error::Binding {
            name: "late".into(),
            reason: "context sealed".into(),
        }
    );

    let out = context.invoke(&entry, vec![]).await?;
    assert_eq!(out.to_serde::<i64>()?, 42);
    let out = context.invoke(&entry, vec![]).await?;
    assert_eq!(out.to_serde::<i64>()?, 42, "entry points are reusable");

    sandbox.dispose();
    Ok(())
}

#[tokio::test]
async fn integration_js_release_invalidates_references() -> Result<()> {
    let registry = registry([delayed_echo("echo", Duration::ZERO)])?;
    let mut sandbox = Sandbox::create(&SandboxOptions::default()).await?;
    let context = sandbox.create_context().await?;
    context.bind_all(&registry)?;

    let entry = context
        .evaluate("async () => { global.kept = await echo.reference({ a: 1 }); return kept.copy(); }")
        .await?;
    let out = context.invoke(&entry, vec![]).await?;
    assert_eq!(out.to_json()?, r#"{"a":1}"#);
    assert_eq!(context.outstanding_references(), 1);

    context.release();
    assert_eq!(context.state(), ContextState::Released);
    assert_eq!(context.outstanding_references(), 0);
    let err = context.invoke(&entry, vec![]).await.expect_err("released");
    assert_eq!(err.kind(), ErrorKind::Runtime);

    sandbox.dispose();
    Ok(())
}

#[tokio::test]
async fn integration_js_entry_point_of_other_sandbox() -> Result<()> {
    let mut first = Sandbox::create(&SandboxOptions::default()).await?;
    let entry = first.create_context().await?.evaluate("() => 1").await?;

    let mut second = Sandbox::create(&SandboxOptions::default()).await?;
    let err = second
        .create_context()
        .await?
        .invoke(&entry, vec![])
        .await
        .expect_err("foreign entry point");
    assert_eq!(err.kind(), ErrorKind::Runtime);
    assert_ne!(first.id(), second.id());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn integration_js_sandboxes_run_in_parallel() -> Result<()> {
    const TASKS: i64 = 32;
    let invoker = Invoker::new(CapabilityRegistry::builder().with_log().build()?);

    let tasks: Vec<_> = (0..TASKS)
        .map(|n| {
            let invoker = invoker.clone();
            tokio::spawn(async move {
                invoker
                    .run(
                        "(n) => { let s = 0; for (let i = 0; i < 100000; i++) s += i % 7; log(n); return n * 2; }",
                        args![n]?,
                    )
                    .await
                    .context("parallel run failed")
            })
        })
        .collect();

    for (n, task) in (0..TASKS).zip(tasks) {
        let out = task.await.context("task panicked")??;
        assert_eq!(out.to_serde::<i64>()?, n * 2);
    }
    Ok(())
}

#[tokio::test]
async fn integration_js_cancelled_invoke_leaves_entry_point_usable() -> Result<()> {
    let registry = registry([delayed_echo("echo", Duration::from_millis(200))])?;
    let mut sandbox = Sandbox::create(&SandboxOptions::default()).await?;
    let context = sandbox.create_context().await?;
    context.bind_all(&registry)?;
    let entry = context
        .evaluate("async (n) => n === 0 ? await echo(n) : n + 1")
        .await?;

    let cancelled =
        tokio::time::timeout(Duration::from_millis(20), context.invoke(&entry, args![0]?)).await;
    assert!(cancelled.is_err(), "invoke should still be pending");

    let out = context
        .invoke(&entry, args![41]?)
        .await
        .context("entry point should survive a cancelled call")?;
    assert_eq!(out.to_serde::<i64>()?, 42);
    sandbox.dispose();
    Ok(())
}
