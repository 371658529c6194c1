//! Logging configuration using tracing.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// HTTP and TLS internals log every chunk request at debug; keep them at warn.
const QUIET_DEPENDENCIES: &[&str] = &["hyper", "hyper_util", "reqwest", "rustls", "h2"];

/// Initialize logging with the specified level.
///
/// `level` applies to this crate only. Output goes to stderr so it never
/// interleaves with the progress line on stdout. `RUST_LOG` overrides both.
pub fn init(level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(directives(level)))
        .unwrap_or_else(|_| EnvFilter::new(directives("info")));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .try_init()?;

    Ok(())
}

fn directives(level: &str) -> String {
    let mut out = format!("warn,{}={}", env!("CARGO_CRATE_NAME"), level);
    for name in QUIET_DEPENDENCIES {
        out.push_str(&format!(",{}=warn", name));
    }
    out
}
