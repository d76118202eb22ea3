use tracing::Level;
use tracing_subscriber::{Layer, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the process-wide subscriber.
///
/// `RUST_LOG` refines the default `info` filter. Sandbox `log(...)` output is
/// written under its own target so it can be silenced separately, e.g.
/// `RUST_LOG=info,cloister::script=off`.
pub fn init_tracing() -> anyhow::Result<()> {
    let envfilter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env()?
        .add_directive("hyper=warn".parse()?)
        .add_directive("reqwest=warn".parse()?);

    tracing_subscriber::Registry::default()
        .with(tracing_subscriber::fmt::Layer::default().with_filter(envfilter))
        .try_init()?;

    Ok(())
}
