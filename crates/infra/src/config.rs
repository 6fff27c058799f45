//! Engine configuration.
//!
//! Every setting has a default; `from_env` overrides them from `CHRONICLE_*`
//! variables. Unparseable values fall back to the default.

use crate::checkpoint::checkpoint_key;

pub const DEFAULT_ENVIRONMENT: &str = "development";
pub const DEFAULT_BATCH_SIZE: usize = 1000;
pub const DEFAULT_MAX_KEY_ATTEMPTS: usize = 16;

/// What the projector does when a handler returns an error.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum HandlerFailurePolicy {
    /// Stop the cycle and leave the checkpoint before the failing event so
    /// the next cycle retries it.
    #[default]
    Halt,
    /// Write a "failed" audit record and move on to the next event.
    RecordAndContinue,
}

impl HandlerFailurePolicy {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "halt" => Some(Self::Halt),
            "record" | "continue" => Some(Self::RecordAndContinue),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectorConfig {
    /// Deployment environment; part of the shared checkpoint key.
    pub environment: String,
    /// Events fetched per page.
    pub batch_size: usize,
    /// Domain allow-list for fetching; `None` reads every domain.
    pub domains: Option<Vec<String>>,
    /// Save aggregates after handling. When off, handlers run and
    /// checkpoints advance but nothing is saved or audited.
    pub persist: bool,
    pub on_handler_error: HandlerFailurePolicy,
}

impl Default for ProjectorConfig {
    fn default() -> Self {
        Self {
            environment: DEFAULT_ENVIRONMENT.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            domains: None,
            persist: true,
            on_handler_error: HandlerFailurePolicy::default(),
        }
    }
}

impl ProjectorConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            environment: lookup("CHRONICLE_ENV")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.environment),
            batch_size: lookup("CHRONICLE_BATCH_SIZE")
                .and_then(|v| v.parse::<usize>().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.batch_size),
            domains: lookup("CHRONICLE_DOMAINS").and_then(|v| parse_domains(&v)),
            persist: lookup("CHRONICLE_PERSIST")
                .and_then(|v| v.parse::<bool>().ok())
                .unwrap_or(defaults.persist),
            on_handler_error: lookup("CHRONICLE_HANDLER_FAILURE")
                .and_then(|v| HandlerFailurePolicy::parse(&v))
                .unwrap_or(defaults.on_handler_error),
        }
    }

    pub fn checkpoint_key(&self) -> String {
        checkpoint_key(&self.environment)
    }

    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_domains<I, S>(mut self, domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.domains = Some(domains.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_persist(mut self, persist: bool) -> Self {
        self.persist = persist;
        self
    }

    pub fn with_failure_policy(mut self, policy: HandlerFailurePolicy) -> Self {
        self.on_handler_error = policy;
        self
    }
}

/// `*` (or empty) means every domain.
fn parse_domains(value: &str) -> Option<Vec<String>> {
    let value = value.trim();
    if value.is_empty() || value == "*" {
        return None;
    }
    let domains: Vec<String> = value
        .split(',')
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(str::to_string)
        .collect();
    (!domains.is_empty()).then_some(domains)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriterConfig {
    /// Generated keys tried before giving up on a unique one.
    pub max_key_attempts: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_key_attempts: DEFAULT_MAX_KEY_ATTEMPTS,
        }
    }
}

impl WriterConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            max_key_attempts: lookup("CHRONICLE_MAX_KEY_ATTEMPTS")
                .and_then(|v| v.parse::<usize>().ok())
                .filter(|n| *n > 0)
                .unwrap_or(DEFAULT_MAX_KEY_ATTEMPTS),
        }
    }
}
