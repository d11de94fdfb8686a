//! Tunables for the dialogue engine.

use std::time::Duration;

/// Model used for both dialogue turns and summaries unless overridden.
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Configuration for the dialogue orchestrator and completion client.
#[derive(Debug, Clone, PartialEq)]
pub struct DialogueConfig {
    /// Model for dialogue turns.
    pub model: String,

    /// Model for end-of-chat summaries.
    pub summary_model: String,

    /// Listener responses per autonomous conversation.
    pub max_exchanges: usize,

    /// Consecutive failed listener turns before an autonomous loop aborts.
    pub max_consecutive_failures: usize,

    /// Pause between autonomous turns.
    pub turn_delay: Duration,

    /// Upper bound on the remembered text per partner.
    pub max_memory_chars: usize,

    /// Outbound request budget; `None` disables throttling.
    pub max_requests_per_minute: Option<u32>,

    /// Whole-request timeout for the completion API.
    pub request_timeout: Duration,

    /// Override for the completion API base URL.
    pub api_base: Option<String>,
}

impl Default for DialogueConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            summary_model: DEFAULT_MODEL.to_string(),
            max_exchanges: 6,
            max_consecutive_failures: 3,
            turn_delay: Duration::from_secs(2),
            max_memory_chars: 4000,
            max_requests_per_minute: Some(60),
            request_timeout: Duration::from_secs(60),
            api_base: None,
        }
    }
}

impl DialogueConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overlaid with `CROWD_*` / `OPENAI_API_BASE` environment variables.
    ///
    /// Unparseable numeric values are logged and ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Defaults overlaid with whatever `lookup` returns for each variable.
    ///
    /// `CROWD_MODEL` moves the summary model too unless `CROWD_SUMMARY_MODEL`
    /// is also set.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(model) = lookup("CROWD_MODEL") {
            config = config.with_model(model);
        }
        if let Some(model) = lookup("CROWD_SUMMARY_MODEL") {
            config = config.with_summary_model(model);
        }
        if let Some(n) = parse_number::<usize>(&lookup, "CROWD_MAX_EXCHANGES") {
            config.max_exchanges = n;
        }
        if let Some(ms) = parse_number::<u64>(&lookup, "CROWD_TURN_DELAY_MS") {
            config.turn_delay = Duration::from_millis(ms);
        }
        if let Some(base) = lookup("OPENAI_API_BASE") {
            config.api_base = Some(base);
        }

        config
    }

    /// Set the model for dialogue turns and summaries.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        self.summary_model = model.clone();
        self.model = model;
        self
    }

    /// Use a different model for summaries only.
    pub fn with_summary_model(mut self, model: impl Into<String>) -> Self {
        self.summary_model = model.into();
        self
    }

    pub fn with_max_exchanges(mut self, exchanges: usize) -> Self {
        self.max_exchanges = exchanges;
        self
    }

    pub fn with_max_consecutive_failures(mut self, failures: usize) -> Self {
        self.max_consecutive_failures = failures;
        self
    }

    pub fn with_turn_delay(mut self, delay: Duration) -> Self {
        self.turn_delay = delay;
        self
    }

    pub fn with_max_memory_chars(mut self, chars: usize) -> Self {
        self.max_memory_chars = chars;
        self
    }

    /// Set the request budget; `None` disables throttling.
    pub fn with_rate_limit(mut self, per_minute: Option<u32>) -> Self {
        self.max_requests_per_minute = per_minute;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = Some(api_base.into());
        self
    }
}

fn parse_number<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &str,
) -> Option<T> {
    let raw = lookup(var)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(var, value = %raw, "ignoring unparseable config value");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = DialogueConfig::default();
        assert_eq!(config.model, "gpt-4o-mini");
        assert_eq!(config.max_exchanges, 6);
        assert_eq!(config.max_consecutive_failures, 3);
        assert_eq!(config.turn_delay, Duration::from_secs(2));
        assert_eq!(config.max_requests_per_minute, Some(60));
    }

    #[test]
    fn test_builder() {
        let config = DialogueConfig::new()
            .with_model("gpt-4o")
            .with_summary_model("gpt-4o-mini")
            .with_max_exchanges(8)
            .with_turn_delay(Duration::ZERO)
            .with_rate_limit(None);

        assert_eq!(config.model, "gpt-4o");
        assert_eq!(config.summary_model, "gpt-4o-mini");
        assert_eq!(config.max_exchanges, 8);
        assert_eq!(config.turn_delay, Duration::ZERO);
        assert_eq!(config.max_requests_per_minute, None);
    }

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| vars.get(var).cloned()
    }

    #[test]
    fn test_model_var_moves_summary_model() {
        let config = DialogueConfig::from_lookup(lookup_from(&[("CROWD_MODEL", "gpt-4o")]));
        assert_eq!(config.model, "gpt-4o");
        assert_eq!(config.summary_model, "gpt-4o");

        let config = DialogueConfig::from_lookup(lookup_from(&[
            ("CROWD_MODEL", "gpt-4o"),
            ("CROWD_SUMMARY_MODEL", "gpt-4o-mini"),
        ]));
        assert_eq!(config.model, "gpt-4o");
        assert_eq!(config.summary_model, "gpt-4o-mini");
    }

    #[test]
    fn test_unparseable_numbers_are_ignored() {
        let config = DialogueConfig::from_lookup(lookup_from(&[
            ("CROWD_MAX_EXCHANGES", "lots"),
            ("CROWD_TURN_DELAY_MS", " 250 "),
            ("OPENAI_API_BASE", "http://localhost:8080/v1"),
        ]));
        assert_eq!(config.max_exchanges, 6);
        assert_eq!(config.turn_delay, Duration::from_millis(250));
        assert_eq!(config.api_base.as_deref(), Some("http://localhost:8080/v1"));
    }
}
