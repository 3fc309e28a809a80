use std::collections::HashMap;

pub const ERROR_ON_CHECKSUM_FAILURE: &str = "ERROR_ON_CHECKSUM_FAILURE";
pub const CONCURRENCY_LIMIT: &str = "CONCURRENCY_LIMIT";
pub const DEBUG: &str = "DEBUG";
pub const TESTS: &str = "TESTS";

/// Truthy check over the process environment with a per-task override
/// map taking precedence.
pub fn env_flag(name: &str, overrides: &HashMap<String, serde_json::Value>) -> bool {
    if let Some(value) = overrides.get(name) {
        return match value {
            serde_json::Value::Bool(b) => *b,
            serde_json::Value::String(s) => is_truthy(s),
            serde_json::Value::Number(n) => n.as_i64() == Some(1),
            _ => false,
        };
    }
    std::env::var(name).map(|v| is_truthy(&v)).unwrap_or(false)
}

fn is_truthy(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes")
}

/// Parallel replication cap; defaults to 10 when unset or unparsable.
pub fn concurrency_limit() -> usize {
    std::env::var(CONCURRENCY_LIMIT)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|n| *n > 0)
        .unwrap_or(10)
}

/// Selector over numbered end-to-end scenarios: `N`, `N-M`, or `N+`,
/// comma-joined. An empty selector matches everything.
#[derive(Debug, Clone, Default)]
pub struct TestSelector {
    ranges: Vec<(u32, Option<u32>)>,
}

impl TestSelector {
    pub fn from_env() -> Self {
        std::env::var(TESTS)
            .map(|v| Self::parse(&v))
            .unwrap_or_default()
    }

    pub fn parse(selector: &str) -> Self {
        let mut ranges = Vec::new();
        for part in selector.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            if let Some(start) = part.strip_suffix('+') {
                if let Ok(n) = start.trim().parse() {
                    ranges.push((n, None));
                }
            } else if let Some((start, end)) = part.split_once('-') {
                if let (Ok(a), Ok(b)) = (start.trim().parse(), end.trim().parse()) {
                    ranges.push((a, Some(b)));
                }
            } else if let Ok(n) = part.parse() {
                ranges.push((n, Some(n)));
            }
        }
        TestSelector { ranges }
    }

    pub fn matches(&self, number: u32) -> bool {
        if self.ranges.is_empty() {
            return true;
        }
        self.ranges.iter().any(|(start, end)| match end {
            Some(end) => number >= *start && number <= *end,
            None => number >= *start,
        })
    }
}
