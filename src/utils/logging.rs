use tracing_subscriber::EnvFilter;

/// `OMOIDE_LOG` wins over the generic `RUST_LOG`; both absent means info.
fn filter_directives() -> String {
    std::env::var("OMOIDE_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string())
}

pub fn init() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter_directives()))
        .with_ansi(false)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    static ENV_LOCK: parking_lot::Mutex<()> = parking_lot::Mutex::new(());

    fn with_vars(vars: &[(&str, Option<&str>)], f: impl FnOnce()) {
        let _guard = ENV_LOCK.lock();
        let saved: Vec<(String, Option<String>)> = vars
            .iter()
            .map(|(k, _)| (k.to_string(), std::env::var(k).ok()))
            .collect();
        for (k, v) in vars {
            match v {
                Some(v) => std::env::set_var(k, v),
                None => std::env::remove_var(k),
            }
        }
        f();
        for (k, v) in saved {
            match v {
                Some(v) => std::env::set_var(&k, v),
                None => std::env::remove_var(&k),
            }
        }
    }

    #[test]
    fn omoide_log_overrides_rust_log() {
        with_vars(
            &[("OMOIDE_LOG", Some("debug")), ("RUST_LOG", Some("warn"))],
            || assert_eq!(filter_directives(), "debug"),
        );
    }

    #[test]
    fn falls_back_to_rust_log_then_info() {
        with_vars(
            &[("OMOIDE_LOG", None), ("RUST_LOG", Some("omoide_backend=trace"))],
            || assert_eq!(filter_directives(), "omoide_backend=trace"),
        );
        with_vars(&[("OMOIDE_LOG", None), ("RUST_LOG", None)], || {
            assert_eq!(filter_directives(), "info")
        });
    }
}
