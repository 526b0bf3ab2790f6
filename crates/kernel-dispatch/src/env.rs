use std::env;

pub(crate) const DEPRECATION_WARNINGS_VAR: &str = "KERNEL_DISPATCH_DEPRECATION_WARNINGS";
pub(crate) const TRACE_KERNELS_VAR: &str = "KERNEL_DISPATCH_TRACE_KERNELS";

pub(crate) fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}

/// Reads a boolean flag, returning `default` when the variable is unset or blank.
pub(crate) fn bool_var(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => parse_bool(&value),
        _ => default,
    }
}

#[cfg(test)]
mod tests {
    use super::parse_bool;

    #[test]
    fn accepts_common_truthy_spellings() {
        for value in ["1", "true", "YES", " on "] {
            assert!(parse_bool(value), "{value} should parse as true");
        }
        for value in ["0", "false", "off", "maybe"] {
            assert!(!parse_bool(value), "{value} should parse as false");
        }
    }
}
