//! Tracing setup for the CLI.

use std::sync::Once;

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

static INIT: Once = Once::new();

fn default_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "convo_digest=warn",
        1 => "convo_digest=info",
        2 => "convo_digest=debug",
        _ => "convo_digest=trace",
    }
}

/// Install the stderr subscriber once per process.
///
/// `DIGEST_LOG` takes standard `EnvFilter` directives and wins over `-v`.
pub fn init(verbosity: u8) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env("DIGEST_LOG")
            .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity)));

        let _ = tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false),
            )
            .with(filter)
            .try_init();
    });
}
