use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// Initialise logging. With `debug` set the default level is `debug` and
/// `RUST_LOG` may override it; otherwise `info` is forced.
///
/// When `log_file` is given, events are also appended to that file. Only the
/// first call installs a subscriber; later calls are ignored.
pub fn init(debug: bool, log_file: Option<PathBuf>) {
    let level = if debug { "debug" } else { "info" };

    let filter = if debug {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    } else {
        EnvFilter::new(level)
    };

    let file_layer = log_file.and_then(|path| {
        let file_name = path.file_name()?.to_owned();
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        let appender = tracing_appender::rolling::never(dir, file_name);
        Some(fmt::layer().with_ansi(false).with_writer(appender).boxed())
    });

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .try_init();
}
