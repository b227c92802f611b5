use std::env;
use std::sync::OnceLock;

static JITRS_LINT_ON_EXPORT: OnceLock<bool> = OnceLock::new();
static JITRS_LINT_ON_TRACE_EXIT: OnceLock<bool> = OnceLock::new();

fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}

fn flag(cell: &OnceLock<bool>, name: &str, default: bool) -> bool {
    *cell.get_or_init(|| match env::var(name) {
        Ok(value) if !value.trim().is_empty() => parse_bool(&value),
        _ => default,
    })
}

/// Whether `export` lints the graph before encoding (`JITRS_LINT_ON_EXPORT`, default on).
pub(crate) fn lint_on_export() -> bool {
    flag(&JITRS_LINT_ON_EXPORT, "JITRS_LINT_ON_EXPORT", true)
}

/// Whether trace exit lints the captured graph (`JITRS_LINT_ON_TRACE_EXIT`, default off).
pub(crate) fn lint_on_trace_exit() -> bool {
    flag(&JITRS_LINT_ON_TRACE_EXIT, "JITRS_LINT_ON_TRACE_EXIT", false)
}

#[cfg(test)]
mod tests {
    use super::parse_bool;

    #[test]
    fn parses_truthy_spellings() {
        for value in ["1", "true", "YES", " on "] {
            assert!(parse_bool(value), "{value}");
        }
        for value in ["0", "off", "nope", ""] {
            assert!(!parse_bool(value), "{value}");
        }
    }
}
