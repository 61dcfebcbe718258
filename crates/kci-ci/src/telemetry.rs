//! Tracing initialisation for the `kci` binary.
//!
//! Call [`init_tracing`] once at program start. Later calls are ignored
//! because the global subscriber can only be set once per process.
//! [`build_subscriber`] returns the same subscriber without installing it.

use tracing::{Level, Subscriber};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Level for a `-v` count: none is WARN, each flag is one step more verbose.
pub fn level_for_verbosity(verbosity: u8) -> Level {
    match verbosity {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Subscriber for the given log format, writing through `writer`.
pub fn build_subscriber<W>(
    json: bool,
    verbosity: u8,
    writer: W,
) -> Box<dyn Subscriber + Send + Sync>
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let level = level_for_verbosity(verbosity);
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    let registry = tracing_subscriber::registry().with(env_filter);

    if json {
        Box::new(registry.with(fmt::layer().with_target(false).json().with_writer(writer)))
    } else {
        Box::new(registry.with(fmt::layer().with_target(false).with_writer(writer)))
    }
}

/// Initialise the global tracing subscriber.
///
/// * `json`: emit newline-delimited JSON log lines.
/// * `verbosity`: number of `-v` flags, used when `RUST_LOG` is not set.
///
/// Both formats log to stderr; stdout belongs to reporters.
pub fn init_tracing(json: bool, verbosity: u8) {
    tracing::subscriber::set_global_default(build_subscriber(json, verbosity, std::io::stderr))
        .ok();
}
