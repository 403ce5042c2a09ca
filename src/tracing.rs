use tracing_subscriber::{fmt, EnvFilter};

/// Global fmt subscriber for the pipeline binary. A parseable `RUST_LOG` overrides `default_filter`.
pub fn init_tracing(default_filter: &str) -> anyhow::Result<()> {
    let filter = log_filter(std::env::var("RUST_LOG").ok().as_deref(), default_filter)?;
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_line_number(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!("tracing init: {e}"))
}

fn log_filter(from_env: Option<&str>, default_filter: &str) -> anyhow::Result<EnvFilter> {
    if let Some(directives) = from_env.map(str::trim).filter(|s| !s.is_empty()) {
        match EnvFilter::try_new(directives) {
            Ok(filter) => return Ok(filter),
            // no subscriber yet, so stderr it is
            Err(e) => eprintln!("ignoring RUST_LOG={directives:?}: {e}"),
        }
    }
    EnvFilter::try_new(default_filter)
        .map_err(|e| anyhow::anyhow!("bad default log filter {default_filter:?}: {e}"))
}
