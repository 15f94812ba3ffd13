//! `tracing-subscriber` initialization. Verbosity is a signed count: `-v`
//! raises it, `-q` lowers it, `0` is `info`.

use tracing_subscriber::EnvFilter;

pub fn init(verbosity: i8) {
    let level = match verbosity {
        i8::MIN..=-2 => "error",
        -1 => "warn",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
