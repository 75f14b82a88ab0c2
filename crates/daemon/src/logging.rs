//! Logging setup
//!
//! - `RUST_LOG` filters (default `info`)
//! - `SHARDLINE_LOG_FORMAT=json` switches to JSON lines, anything else is pretty
//! - `SHARDLINE_LOG_DIR` writes to a daily rolling file instead of stdout

use anyhow::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "info";
const LOG_FILE_NAME: &str = "shardline.log";

/// Install the global subscriber. Keep the returned guard alive until exit
/// or buffered file output is lost.
pub fn init_logging() -> Result<Option<WorkerGuard>> {
    let env_filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(DEFAULT_FILTER))?;
    let json = matches!(std::env::var("SHARDLINE_LOG_FORMAT").as_deref(), Ok("json"));
    let registry = tracing_subscriber::registry().with(env_filter);

    match std::env::var("SHARDLINE_LOG_DIR") {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_NAME);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            if json {
                registry.with(fmt::layer().json().with_writer(writer)).try_init()?;
            } else {
                registry
                    .with(fmt::layer().with_ansi(false).with_writer(writer))
                    .try_init()?;
            }
            Ok(Some(guard))
        }
        Err(_) => {
            if json {
                registry.with(fmt::layer().json()).try_init()?;
            } else {
                registry.with(fmt::layer().pretty()).try_init()?;
            }
            Ok(None)
        }
    }
}
