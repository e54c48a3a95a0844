//! Agent configuration schema.
//!
//! `AgentConfig` is deserialized from TOML (hand-written agent and workflow
//! files) and from JSON (persisted state snapshots). Every field has a
//! default so configuration files only need to name what they change.

use std::{fmt, num::NonZeroU32, path::PathBuf, time::Duration};

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

/// The default system prompt handed to every agent loop.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an autonomous agent running inside a loop. \
Each turn you see the conversation so far and produce the next, improved response. \
Stay coherent, stay on task, and build on your previous answers.";

/// Replacement text used by `ResponseFilter::redact`.
pub const FILTERED_MARKER: &str = "[FILTERED]";

/// Upper bound on loop iterations.
///
/// In TOML and JSON this is written either as a positive integer or as the
/// string `"auto"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaxLoops {
    /// Stop after exactly this many model invocations (unless something
    /// else stops the loop first).
    Fixed(NonZeroU32),
    /// No numeric bound. Requires a stopping condition.
    Auto,
}

impl MaxLoops {
    /// A fixed bound. Zero is clamped to one.
    pub fn fixed(n: u32) -> Self {
        MaxLoops::Fixed(NonZeroU32::new(n).unwrap_or(NonZeroU32::MIN))
    }

    /// Return true once `loop_count` invocations exhaust the bound.
    pub fn is_exhausted(self, loop_count: u32) -> bool {
        match self {
            MaxLoops::Fixed(n) => loop_count >= n.get(),
            MaxLoops::Auto => false,
        }
    }
}

impl Default for MaxLoops {
    fn default() -> Self {
        MaxLoops::fixed(5)
    }
}

impl fmt::Display for MaxLoops {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaxLoops::Fixed(n) => write!(f, "{n}"),
            MaxLoops::Auto => f.write_str("auto"),
        }
    }
}

impl Serialize for MaxLoops {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            MaxLoops::Fixed(n) => serializer.serialize_u32(n.get()),
            MaxLoops::Auto => serializer.serialize_str("auto"),
        }
    }
}

impl<'de> Deserialize<'de> for MaxLoops {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Count(u32),
            Keyword(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Count(n) => NonZeroU32::new(n)
                .map(MaxLoops::Fixed)
                .ok_or_else(|| de::Error::custom("max_loops must be a positive integer or \"auto\"")),
            Repr::Keyword(k) if k == "auto" => Ok(MaxLoops::Auto),
            Repr::Keyword(k) => Err(de::Error::custom(format!(
                "unknown max_loops value '{k}', expected a positive integer or \"auto\""
            ))),
        }
    }
}

/// When an agent loop should stop before `max_loops` is reached.
///
/// Example in TOML:
/// ```toml
/// stopping_condition = { kind = "token", token = "<DONE>" }
/// stopping_condition = { kind = "named", name = "approved" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StopCondition {
    /// Stop when the response contains `token`.
    Token { token: String },
    /// Delegate to a predicate the host registered on the flow under `name`.
    Named { name: String },
}

impl StopCondition {
    /// The token agents are prompted to emit when they consider a task done.
    pub const DONE_TOKEN: &'static str = "<DONE>";

    pub fn token(token: impl Into<String>) -> Self {
        StopCondition::Token {
            token: token.into(),
        }
    }

    pub fn named(name: impl Into<String>) -> Self {
        StopCondition::Named { name: name.into() }
    }

    /// `Token` with [`StopCondition::DONE_TOKEN`].
    pub fn done_token() -> Self {
        Self::token(Self::DONE_TOKEN)
    }
}

/// A literal substring replacement applied to every model response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseFilter {
    pub pattern: String,
    pub replacement: String,
}

impl ResponseFilter {
    pub fn new(pattern: impl Into<String>, replacement: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            replacement: replacement.into(),
        }
    }

    /// Replace `pattern` with [`FILTERED_MARKER`].
    pub fn redact(pattern: impl Into<String>) -> Self {
        Self::new(pattern, FILTERED_MARKER)
    }
}

/// Per-invocation parameters passed to the model invoker.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub temperature: f64,
    pub max_tokens: Option<u32>,
}

/// Configuration for one agent loop.
///
/// Interval durations are written as integer milliseconds when they are
/// whole milliseconds, and exactly otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AgentConfig {
    pub agent_name: String,
    pub system_prompt: String,
    pub max_loops: MaxLoops,
    #[serde(with = "millis")]
    pub loop_interval: Duration,
    /// Retries after the initial attempt; `k` means up to `k + 1` calls.
    pub retry_attempts: u32,
    #[serde(with = "millis")]
    pub retry_interval: Duration,
    pub interactive: bool,
    pub dynamic_temperature: bool,
    /// Fixed temperature, or the starting point of the dynamic schedule.
    pub temperature: f64,
    /// Lower bound the dynamic schedule damps toward.
    pub temperature_floor: f64,
    pub max_tokens: Option<u32>,
    pub stopping_condition: Option<StopCondition>,
    pub response_filters: Vec<ResponseFilter>,
    /// Maximum number of transcript characters rendered into a prompt.
    pub context_window: Option<usize>,
    /// When set, the state is saved here after every run.
    pub autosave: Option<PathBuf>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            agent_name: "flow-agent".to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_loops: MaxLoops::default(),
            loop_interval: Duration::ZERO,
            retry_attempts: 3,
            retry_interval: Duration::ZERO,
            interactive: false,
            dynamic_temperature: false,
            temperature: 0.7,
            temperature_floor: 0.1,
            max_tokens: None,
            stopping_condition: None,
            response_filters: Vec::new(),
            context_window: None,
            autosave: None,
        }
    }
}

impl AgentConfig {
    pub fn new(agent_name: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
            ..Default::default()
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_max_loops(mut self, max_loops: MaxLoops) -> Self {
        self.max_loops = max_loops;
        self
    }

    pub fn with_loop_interval(mut self, interval: Duration) -> Self {
        self.loop_interval = interval;
        self
    }

    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn with_interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    pub fn with_dynamic_temperature(mut self, enabled: bool) -> Self {
        self.dynamic_temperature = enabled;
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_stopping_condition(mut self, condition: StopCondition) -> Self {
        self.stopping_condition = Some(condition);
        self
    }

    pub fn with_response_filter(mut self, filter: ResponseFilter) -> Self {
        self.response_filters.push(filter);
        self
    }

    pub fn with_context_window(mut self, chars: usize) -> Self {
        self.context_window = Some(chars);
        self
    }

    pub fn with_autosave(mut self, path: impl Into<PathBuf>) -> Self {
        self.autosave = Some(path.into());
        self
    }
}

/// Serde adapter for interval durations.
///
/// Whole milliseconds are written as a bare integer, which is also what
/// hand-written TOML uses. Anything finer falls back to the exact
/// `{ secs, nanos }` form, so no duration loses precision on a round trip.
mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    #[serde(untagged)]
    enum Interval {
        Millis(u64),
        Exact(Duration),
    }

    pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let whole_millis = d.subsec_nanos() % 1_000_000 == 0;
        match u64::try_from(d.as_millis()) {
            Ok(ms) if whole_millis => Interval::Millis(ms),
            _ => Interval::Exact(*d),
        }
        .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Interval::deserialize(deserializer).map(|interval| match interval {
            Interval::Millis(ms) => Duration::from_millis(ms),
            Interval::Exact(d) => d,
        })
    }
}
