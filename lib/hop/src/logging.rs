pub use slog::{crit, debug, error, info, o, trace, warn, Discard, Logger};

use sloggers::{Config, LoggerConfig};

const DEFAULT_CONFIG: &str = r#"
type = "terminal"
level = "debug"
destination = "stderr"
"#;

/// Builds a stderr terminal logger from the embedded default
/// configuration. Executables that carry their own logging section
/// build their logger from that instead.
pub fn init() -> Logger {
    let config: LoggerConfig =
        serdeconv::from_toml_str(DEFAULT_CONFIG).expect("embedded logging config must parse");

    config
        .build_logger()
        .expect("terminal logger construction failed")
}
