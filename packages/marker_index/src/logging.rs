//! Logging backend installation for hosts that don't bring their own.

use std::{
    env,
    fs::File,
    panic,
    path::Path,
    sync::Arc,
};
use backtrace::Backtrace;
use tracing_subscriber::{
    fmt::{
        self,
        time::uptime,
    },
    prelude::*,
    EnvFilter,
    Registry,
};
use anyhow::{
    Context,
    Result,
};


/// Directives applied before any from `RUST_LOG`.
const BASE_DIRECTIVES: &str = "warn,chunk_data=debug,marker_index=debug";

/// Install a global `tracing` subscriber writing to stdout and, if `log_file` is given, to that
/// file too. Panics are logged as well, with a backtrace unless `RUST_BACKTRACE=0`.
///
/// Fails if the file can't be created or a global subscriber is already installed.
pub fn init_logging(log_file: Option<&Path>) -> Result<()> {
    let file_layer = log_file.map(open_log_file).transpose()?;
    let stdout_layer = fmt::layer()
        .event_format(fmt::format()
            .compact()
            .with_timer(uptime())
            .with_line_number(true));

    let subscriber = Registry::default()
        .with(env_filter())
        .with(stdout_layer)
        .with(file_layer.map(|file| fmt::layer()
            .with_ansi(false)
            .with_writer(Arc::new(file))));
    tracing::subscriber::set_global_default(subscriber)
        .context("a global log subscriber is already installed")?;

    panic::set_hook(Box::new(|info| {
        error!("{}", info);
        if env::var("RUST_BACKTRACE").map_or(true, |val| val != "0") {
            error!("{:?}", Backtrace::new());
        }
    }));
    debug!(log_file = ?log_file.map(Path::display), "logging initialized");
    Ok(())
}

fn open_log_file(path: &Path) -> Result<File> {
    File::create(path).with_context(|| format!("creating log file {}", path.display()))
}

// RUST_LOG directives take precedence by coming last
fn env_filter() -> EnvFilter {
    let directives = match env::var(EnvFilter::DEFAULT_ENV) {
        Ok(extra) if !extra.is_empty() => format!("{},{}", BASE_DIRECTIVES, extra),
        _ => BASE_DIRECTIVES.to_owned(),
    };
    EnvFilter::new(directives)
}
