use tracing_subscriber::EnvFilter;

/// Noisy dependencies kept at warn unless `RUST_LOG` says otherwise.
const QUIET_CRATES: &str = "tungstenite=warn,tokio_tungstenite=warn,native_tls=warn";

/// Install the global fmt subscriber. `RUST_LOG` wins over `level`.
/// Returns false when a subscriber was already installed.
pub fn init_logging(level: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("{},{}", level, QUIET_CRATES)))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_a_no_op() {
        let _ = init_logging("debug");
        assert!(!init_logging("not a level ??"));
    }
}
