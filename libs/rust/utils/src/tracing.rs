use std::sync::Once;
use tracing::error;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Crates whose logs drown out the service's own output.
const SILENCED_TARGETS: [&str; 6] = [
    "hyper_util",
    "reqwest",
    "sqlx",
    "sea_orm",
    "tower_http",
    "h2",
];

/// Installs the process-wide JSON subscriber.
///
/// `RUST_LOG` wins when set; otherwise everything logs at `info` with the
/// noisy networking and database crates turned off. Calling this twice is a
/// no-op, which keeps integration tests that share a process happy.
pub fn setup_tracing() {
    let mut env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    for target in SILENCED_TARGETS {
        if let Ok(directive) = format!("{target}=off").parse() {
            env_filter = env_filter.add_directive(directive);
        }
    }

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .json()
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .with_thread_ids(true),
        )
        .try_init();

    install_panic_hook();
}

static PANIC_HOOK: Once = Once::new();

/// Routes panics through `tracing` so they end up in the JSON stream with a
/// backtrace instead of on bare stderr. Installed at most once per process.
fn install_panic_hook() {
    PANIC_HOOK.call_once(chain_panic_hook);
}

fn chain_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let backtrace = backtrace::Backtrace::new();
        let message = info
            .payload()
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| info.payload().downcast_ref::<String>().cloned());
        let location = info.location().map(|l| format!("{}:{}", l.file(), l.line()));

        match message {
            Some(message) => error!(
                panic_message = %message,
                location = ?location,
                backtrace = ?backtrace,
                "Panic occurred with message"
            ),
            None => error!(
                location = ?location,
                backtrace = ?backtrace,
                "Panic occurred but the payload is not a string"
            ),
        }

        default_hook(info);
    }));
}
