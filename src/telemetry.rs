//! Logging setup for the `hd` binary.
//!
//! Human-readable lines on stderr by default; `HD_LOG_FORMAT=json` switches to
//! JSON lines. Filtering follows `HD_LOG` (an `EnvFilter` directive string).

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

pub const LOG_ENV: &str = "HD_LOG";
pub const LOG_FORMAT_ENV: &str = "HD_LOG_FORMAT";
pub const DEBUG_SESSION_ENV: &str = "HD_DEBUG_SESSION";

/// Held by `main` for the lifetime of the process.
pub struct TelemetryGuard {
    _private: (),
}

pub fn init() -> TelemetryGuard {
    let directives = filter_directives(
        std::env::var(LOG_ENV).ok().as_deref(),
        std::env::var_os(DEBUG_SESSION_ENV).is_some(),
    );
    let filter = EnvFilter::try_new(&directives).unwrap_or_else(|_| EnvFilter::new("warn"));

    let json = std::env::var(LOG_FORMAT_ENV).is_ok_and(|v| v == "json");
    let registry = tracing_subscriber::registry().with(filter);
    let result = if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .without_time()
                    .with_writer(std::io::stderr),
            )
            .try_init()
    };
    // A subscriber may already be installed (tests, embedding).
    let _ = result;

    TelemetryGuard { _private: () }
}

fn filter_directives(env_value: Option<&str>, debug_session: bool) -> String {
    let mut directives = env_value
        .filter(|v| !v.trim().is_empty())
        .unwrap_or("warn")
        .to_string();
    if debug_session {
        directives.push_str(",horde::session=debug");
    }
    directives
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_warn() {
        assert_eq!(filter_directives(None, false), "warn");
        assert_eq!(filter_directives(Some("  "), false), "warn");
    }

    #[test]
    fn env_value_wins() {
        assert_eq!(filter_directives(Some("horde=debug"), false), "horde=debug");
    }

    #[test]
    fn debug_session_raises_session_target() {
        assert_eq!(
            filter_directives(None, true),
            "warn,horde::session=debug"
        );
    }
}
