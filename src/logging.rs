use tracing_subscriber::EnvFilter;

/// Installs the stderr subscriber. `RUST_LOG` wins; otherwise warnings only,
/// or debug output for this crate when `verbose` is set.
pub fn init(verbose: bool) {
    let default = if verbose {
        "warn,asc_connect=debug"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    // A second init (e.g. in tests) keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
