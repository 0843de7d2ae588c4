//! Logging utilities

pub use log::{debug, error, info, trace, warn};

/// Initialize the logging system with a default filter
///
/// `RUST_LOG` overrides `default_level`. Repeated calls are ignored so
/// several contexts (or tests) can initialise logging independently.
pub fn init_with_level(default_level: &str) {
    let env = env_logger::Env::default().default_filter_or(default_level);
    if env_logger::Builder::from_env(env).try_init().is_err() {
        log::debug!("Logger already initialised; keeping existing configuration");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeated_init_does_not_panic() {
        init_with_level("warn");
        init_with_level("debug");
    }
}
