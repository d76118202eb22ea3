use anyhow::{Context, Result};
use cloister::{CapabilityRegistry, Error, ErrorKind, Value, args, run};

use super::common::{CountingHook, TODO_URL, invoker, json, registry, stub_fetch_delegate};

const MEMORY: usize = 32 * 1024 * 1024;

#[tokio::test]
async fn integration_js_fetch_delegate_todo() -> Result<()> {
    let registry = registry([stub_fetch_delegate()])?;
    let source = format!(
        r#"async () => {{ const r = await fetchDelegate("{TODO_URL}"); return r.data; }}"#
    );

    let out = run(&source, vec![], &registry, MEMORY)
        .await
        .context("todo script failed")?;
    assert_eq!(
        json(&out)?,
        serde_json::json!({ "id": 1, "title": "t", "completed": false })
    );
    Ok(())
}

#[tokio::test]
async fn integration_js_entry_point_throw() -> Result<()> {
    let err = run(
        r#"() => { throw new Error("boom"); }"#,
        vec![],
        &CapabilityRegistry::empty(),
        MEMORY,
    )
    .await
    .expect_err("entry point should throw");

    assert_eq!(err.kind(), ErrorKind::EntryPointInvocation);
    let Error::EntryPointInvocation { message, .. } = &err else {
        anyhow::bail!("unexpected error: {err:?}");
    };
    assert_eq!(message, "boom");
    Ok(())
}

#[tokio::test]
async fn integration_js_rejected_promise() -> Result<()> {
    let err = run(
        r#"async () => { await null; throw new TypeError("late"); }"#,
        vec![],
        &CapabilityRegistry::empty(),
        MEMORY,
    )
    .await
    .expect_err("rejection should fail");
    assert_eq!(err.kind(), ErrorKind::EntryPointInvocation);
    assert_eq!(err.to_string(), "late");

    let err = run(
        r#"() => Promise.reject("plain string")"#,
        vec![],
        &CapabilityRegistry::empty(),
        MEMORY,
    )
    .await
    .expect_err("rejection should fail");
    assert_eq!(err.to_string(), "plain string");
    Ok(())
}

#[tokio::test]
async fn integration_js_top_level_throw_disposes_once() -> Result<()> {
    let hook = CountingHook::default();
    let invoker = invoker([])?.with_hook(hook.clone());

    let err = invoker
        .run(r#"throw new Error("top level"); () => 1"#, vec![])
        .await
        .expect_err("evaluation should fail");

    assert_eq!(err.kind(), ErrorKind::SandboxEvaluation);
    let Error::SandboxEvaluation { message, stack } = &err else {
        anyhow::bail!("unexpected error: {err:?}");
    };
    assert_eq!(message, "top level");
    assert!(stack.is_some(), "sandbox stack should be kept");
    assert_eq!(hook.created(), 1);
    assert_eq!(hook.disposed(), 1);
    Ok(())
}

#[tokio::test]
async fn integration_js_parse_error() -> Result<()> {
    let err = run("() => {", vec![], &CapabilityRegistry::empty(), MEMORY)
        .await
        .expect_err("parse should fail");
    assert_eq!(err.kind(), ErrorKind::SandboxEvaluation);
    Ok(())
}

#[tokio::test]
async fn integration_js_entry_point_resolution() -> Result<()> {
    let registry = CapabilityRegistry::empty();

    let out = run(
        "function main(a, b) { return a * b; }",
        args![6, 7]?,
        &registry,
        MEMORY,
    )
    .await
    .context("global main should be used")?;
    assert_eq!(out.to_serde::<i64>()?, 42);

    let err = run("const x = 1; x", vec![], &registry, MEMORY)
        .await
        .expect_err("no callable");
    assert_eq!(err.kind(), ErrorKind::SandboxEvaluation);
    Ok(())
}

#[tokio::test]
async fn integration_js_arguments_and_results_are_copies() -> Result<()> {
    let input = Value::from_json(r#"{"items":[1,2,3],"name":"n"}"#)?;
    let out = run(
        "(input) => { input.items.push(4); input.name += '!'; return input; }",
        vec![input.clone()],
        &CapabilityRegistry::empty(),
        MEMORY,
    )
    .await?;

    assert_eq!(
        json(&out)?,
        serde_json::json!({ "items": [1, 2, 3, 4], "name": "n!" })
    );
    assert_eq!(
        json(&input)?,
        serde_json::json!({ "items": [1, 2, 3], "name": "n" })
    );
    Ok(())
}

#[tokio::test]
async fn integration_js_undefined_result_is_empty() -> Result<()> {
    let out = run("() => {}", vec![], &CapabilityRegistry::empty(), MEMORY).await?;
    assert!(out.is_empty());
    assert_eq!(out.to_json()?, "null");
    Ok(())
}

#[tokio::test]
async fn integration_js_global_alias() -> Result<()> {
    let out = run(
        "() => global === globalThis && typeof fetchDelegate === 'undefined'",
        vec![],
        &CapabilityRegistry::empty(),
        MEMORY,
    )
    .await?;
    assert!(out.to_serde::<bool>()?);
    Ok(())
}

#[tokio::test]
async fn integration_js_byte_values() -> Result<()> {
    let out = run(
        "(buf) => { const view = new Uint8Array(buf); view[0] = 9; return view; }",
        vec![Value::from_serde(&serde_bytes_like(&[1, 2, 3]))?],
        &CapabilityRegistry::empty(),
        MEMORY,
    )
    .await?;
    assert_eq!(out.to_json()?, r#""CQID""#);
    Ok(())
}

/// Serialize a slice as a CBOR byte string rather than an array.
fn serde_bytes_like(bytes: &[u8]) -> impl serde::Serialize + '_ {
    struct Bytes<'a>(&'a [u8]);
    impl serde::Serialize for Bytes<'_> {
        fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
            s.serialize_bytes(self.0)
        }
    }
    Bytes(bytes)
}

#[tokio::test]
async fn integration_js_nullish_throws() -> Result<()> {
    let cases = [
        ("() => { throw null; }", "null"),
        ("() => { throw undefined; }", "undefined"),
        ("() => Promise.reject()", "undefined"),
        ("async () => { await 0; throw null; }", "null"),
    ];
    for (source, message) in cases {
        let err = run(source, vec![], &CapabilityRegistry::empty(), MEMORY)
            .await
            .expect_err("entry point should fail");
        assert_eq!(
            err,
            Error::EntryPointInvocation {
                message: message.into(),
                stack: None,
            },
            "{source}"
        );
    }

    let err = run("throw undefined;", vec![], &CapabilityRegistry::empty(), MEMORY)
        .await
        .expect_err("evaluation should fail");
    assert_eq!(err.kind(), ErrorKind::SandboxEvaluation);
    Ok(())
}

#[tokio::test]
async fn integration_js_limit_messages_from_scripts_are_plain_throws() -> Result<()> {
    let sources = [
        "() => { throw new Error('stack overflow in parser'); }",
        "() => { throw new Error('out of memory'); }",
        "() => { const e = new Error('out of memory'); e.name = 'InternalError'; throw e; }",
        "() => { throw new Error('interrupted'); }",
        "() => { throw 'out of memory'; }",
    ];
    for source in sources {
        let err = run(source, vec![], &CapabilityRegistry::empty(), MEMORY)
            .await
            .expect_err("entry point should fail");
        assert_eq!(err.kind(), ErrorKind::EntryPointInvocation, "{source}: {err:?}");
    }
    Ok(())
}
