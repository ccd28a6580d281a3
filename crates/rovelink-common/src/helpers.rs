//! Environment helpers shared by the Rovelink binaries.

/// Reads a boolean flag from the environment.
///
/// `1`, `true`, `yes` and `on` (any case) are truthy; any other value is false.
/// An unset variable yields `default`.
pub fn env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(value) => parse_bool(&value),
        Err(_) => default,
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bool_truthy() {
        assert!(parse_bool("1"));
        assert!(parse_bool("TRUE"));
        assert!(parse_bool(" yes "));
        assert!(parse_bool("On"));
    }

    #[test]
    fn test_parse_bool_falsy() {
        assert!(!parse_bool("0"));
        assert!(!parse_bool("off"));
        assert!(!parse_bool(""));
        assert!(!parse_bool("enabled"));
    }

    #[test]
    fn test_env_bool_default_when_unset() {
        assert!(env_bool("ROVELINK_TEST_SURELY_UNSET_FLAG", true));
        assert!(!env_bool("ROVELINK_TEST_SURELY_UNSET_FLAG", false));
    }
}
