//! Structured logging setup using the `tracing` ecosystem.
//!
//! Configures a `tracing-subscriber` with either JSON output (for
//! production) or pretty-printed output (for TTY / local dev). Format
//! is auto-detected from the terminal but can be forced via `--json`
//! or `--pretty`. rustls and hyper-rustls log through the same
//! subscriber; their chatter is capped at `warn` unless the relay itself
//! runs at `trace`.

use tracing::Level;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::LogLevel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

#[must_use]
pub fn resolve_format(pretty: bool, json: bool) -> LogFormat {
    if json {
        LogFormat::Json
    } else if pretty || std::io::IsTerminal::is_terminal(&std::io::stdout()) {
        LogFormat::Pretty
    } else {
        LogFormat::Json
    }
}

fn filter(level: Level) -> Targets {
    let tls_level = if level == Level::TRACE {
        Level::TRACE
    } else {
        Level::WARN
    };
    Targets::new()
        .with_default(level)
        .with_target("rustls", tls_level)
        .with_target("hyper_rustls", tls_level)
        .with_target("tokio_rustls", tls_level)
}

pub fn init(level: &LogLevel, format: LogFormat) {
    let filter = filter(level.to_tracing_level());

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_target(false))
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().pretty())
                .init();
        }
    }
}
