//! The Relay agent loop.
//!
//! A `Flow` drives one model through repeated iterations on a task:
//!
//!   cancel? → bound? → temperature → prompt → invoke (retry) → filter
//!     → append → review → stop condition → loop interval
//!
//! Configuration is validated before the task is appended or the model is
//! called, so a misconfigured flow never spends a provider call. Failed
//! provider attempts never reach the transcript.

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    path::Path,
    sync::Arc,
    time::Duration,
};

use tracing::{debug, info, warn};

use relay_contracts::{
    agent::{AgentState, ExecutionId, Role, Turn},
    config::{
        AgentConfig, GenerationParams, MaxLoops, ResponseFilter, StopCondition,
        FILTERED_MARKER,
    },
    error::{RelayError, RelayResult},
    outcome::{RunOutcome, Termination},
};

use crate::{
    cancel::CancelSignal,
    filter::{apply_filters, validate_filter, validate_filters},
    prompt::build_prompt,
    retry::{invoke_with_retry, Attempted, RetryPolicy},
    temperature::DampedTemperature,
    traits::{ModelInvoker, Review, Reviewer, Sleeper, ThreadSleeper},
};

/// Host predicate backing a `StopCondition::Named`.
pub type StopPredicate = Box<dyn Fn(&str) -> bool + Send + Sync>;

/// An agent loop bound to one model invoker.
///
/// The flow exclusively owns its `AgentState`. Share it between workflow
/// tasks as `Arc<Mutex<Flow>>`.
pub struct Flow {
    state: AgentState,
    invoker: Arc<dyn ModelInvoker>,
    reviewer: Option<Box<dyn Reviewer>>,
    sleeper: Arc<dyn Sleeper>,
    stop_predicates: HashMap<String, StopPredicate>,
    feedback: Vec<String>,
}

impl Flow {
    /// Create a flow with an empty transcript.
    ///
    /// Configuration is validated lazily, at the start of every run.
    pub fn new(invoker: Arc<dyn ModelInvoker>, config: AgentConfig) -> Self {
        Self {
            state: AgentState::new(config),
            invoker,
            reviewer: None,
            sleeper: Arc::new(ThreadSleeper),
            stop_predicates: HashMap::new(),
            feedback: Vec::new(),
        }
    }

    /// Attach the reviewer consulted after every response in interactive
    /// mode.
    pub fn with_reviewer(mut self, reviewer: impl Reviewer + 'static) -> Self {
        self.reviewer = Some(Box::new(reviewer));
        self
    }

    /// Attach or replace the reviewer on a flow already shared behind a lock.
    pub fn set_reviewer(&mut self, reviewer: impl Reviewer + 'static) {
        self.reviewer = Some(Box::new(reviewer));
    }

    /// Replace the sleeper used for retry and loop intervals.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Register the predicate a `StopCondition::Named { name }` refers to.
    ///
    /// Replaces any predicate previously registered under `name`.
    pub fn register_stop_predicate<F>(&mut self, name: impl Into<String>, predicate: F)
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.stop_predicates.insert(name.into(), Box::new(predicate));
    }

    // ── Running ──────────────────────────────────────────────────────────────

    /// Run the loop on `task` to completion and return the final response.
    pub fn run(&mut self, task: &str) -> RelayResult<String> {
        self.run_with_cancel(task, &CancelSignal::new())
            .map(|outcome| outcome.response)
    }

    /// Run each task in order, stopping at the first error.
    ///
    /// The transcript accumulates across the batch.
    pub fn run_batch<S: AsRef<str>>(&mut self, tasks: &[S]) -> RelayResult<Vec<String>> {
        tasks.iter().map(|task| self.run(task.as_ref())).collect()
    }

    /// Run the loop on `task`, polling `cancel` before every iteration and
    /// between retry attempts.
    ///
    /// `loop_count` and `last_temperature` restart with every run; the
    /// transcript keeps growing.
    ///
    /// # Errors
    ///
    /// - `ConfigError` before any model call if the configuration is invalid
    /// - `ProviderError` once an iteration exhausts its retry budget
    /// - whatever the reviewer returns, unchanged
    /// - `IoError` if autosave fails
    ///
    /// Cancellation is not an error: the outcome carries the latest accepted
    /// response and `Termination::Cancelled`.
    pub fn run_with_cancel(&mut self, task: &str, cancel: &CancelSignal) -> RelayResult<RunOutcome> {
        self.validate_config()?;

        let config = self.state.config.clone();
        let execution_id = ExecutionId::new();

        info!(
            agent = %config.agent_name,
            execution_id = %execution_id,
            max_loops = %config.max_loops,
            "agent run starting"
        );

        self.state.loop_count = 0;
        self.state.last_temperature = config.temperature;
        self.state.history.push(Turn::user(task));

        let policy = RetryPolicy {
            retry_attempts: config.retry_attempts,
            retry_interval: config.retry_interval,
        };
        let schedule = DampedTemperature::from_config(&config);
        let mut accepted = String::new();
        let mut previous_response: Option<String> = None;

        let termination = loop {
            if cancel.is_cancelled() {
                warn!(
                    agent = %config.agent_name,
                    execution_id = %execution_id,
                    loops_completed = self.state.loop_count,
                    "run cancelled"
                );
                break Termination::Cancelled;
            }
            if config.max_loops.is_exhausted(self.state.loop_count) {
                break Termination::MaxLoops;
            }

            let loop_index = self.state.loop_count + 1;
            let temperature = if config.dynamic_temperature {
                schedule.temperature_for(loop_index, self.state.last_temperature, previous_response.as_deref())
            } else {
                config.temperature
            };
            let params = GenerationParams {
                temperature,
                max_tokens: config.max_tokens,
            };
            let prompt = build_prompt(&config.system_prompt, &self.state.history, config.context_window);

            debug!(
                agent = %config.agent_name,
                execution_id = %execution_id,
                loop_index,
                temperature,
                prompt_chars = prompt.len(),
                "loop iteration starting"
            );

            let raw = match invoke_with_retry(
                self.invoker.as_ref(),
                &prompt,
                &params,
                &policy,
                self.sleeper.as_ref(),
                cancel,
                loop_index,
            )? {
                Attempted::Response(raw) => raw,
                Attempted::Cancelled => break Termination::Cancelled,
            };

            let response = apply_filters(&config.response_filters, &raw);
            self.state.loop_count = loop_index;
            self.state.last_temperature = temperature;
            self.state.history.push(Turn::assistant(response.clone()));
            accepted = response.clone();

            if config.interactive {
                // Presence is checked by validate_config.
                if let Some(reviewer) = self.reviewer.as_mut() {
                    match reviewer.review(loop_index, &response)? {
                        Review::Accept => {}
                        Review::Edit(text) => {
                            debug!(agent = %config.agent_name, loop_index, "reviewer edited response");
                            self.state.history.push(Turn::user(text.clone()));
                            accepted = text;
                        }
                        Review::Stop => {
                            info!(agent = %config.agent_name, loop_index, "reviewer stopped the run");
                            break Termination::UserStopped;
                        }
                    }
                }
            }

            if self.stop_condition_met(&response) {
                debug!(agent = %config.agent_name, loop_index, "stopping condition met");
                break Termination::StoppingCondition;
            }
            if config.max_loops.is_exhausted(self.state.loop_count) {
                break Termination::MaxLoops;
            }

            previous_response = Some(response);
            self.sleeper.sleep(config.loop_interval);
        };

        info!(
            agent = %config.agent_name,
            execution_id = %execution_id,
            loops_completed = self.state.loop_count,
            termination = ?termination,
            "agent run finished"
        );

        if let Some(path) = &config.autosave {
            self.save_state(path)?;
        }

        Ok(RunOutcome {
            execution_id,
            response: accepted,
            loops_completed: self.state.loop_count,
            termination,
        })
    }

    /// Invoke the model once on `task`, outside the loop.
    ///
    /// The task and the filtered response are appended to the transcript and
    /// the step counts as a one-iteration run. Retries apply; the reviewer,
    /// stopping condition and loop interval do not.
    pub fn step(&mut self, task: &str) -> RelayResult<String> {
        self.validate_generation()?;

        let config = &self.state.config;
        let params = GenerationParams {
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        };
        let policy = RetryPolicy {
            retry_attempts: config.retry_attempts,
            retry_interval: config.retry_interval,
        };

        self.state.loop_count = 0;
        self.state.last_temperature = config.temperature;
        self.state.history.push(Turn::user(task));
        let prompt = build_prompt(&config.system_prompt, &self.state.history, config.context_window);

        debug!(agent = %config.agent_name, prompt_chars = prompt.len(), "single step");

        let raw = match invoke_with_retry(
            self.invoker.as_ref(),
            &prompt,
            &params,
            &policy,
            self.sleeper.as_ref(),
            &CancelSignal::new(),
            1,
        )? {
            Attempted::Response(raw) => raw,
            Attempted::Cancelled => return Ok(String::new()),
        };

        let response = apply_filters(&self.state.config.response_filters, &raw);
        self.state.loop_count = 1;
        self.state.history.push(Turn::assistant(response.clone()));
        Ok(response)
    }

    /// Check everything a run depends on before any model call.
    pub fn validate_config(&self) -> RelayResult<()> {
        let config = &self.state.config;

        if config.max_loops == MaxLoops::Auto && config.stopping_condition.is_none() {
            return Err(RelayError::ConfigError {
                reason: format!(
                    "agent '{}' uses max_loops = auto without a stopping condition",
                    config.agent_name
                ),
            });
        }

        match &config.stopping_condition {
            Some(StopCondition::Token { token }) if token.is_empty() => {
                return Err(RelayError::ConfigError {
                    reason: "stop token must not be empty".to_string(),
                });
            }
            Some(StopCondition::Named { name }) if !self.stop_predicates.contains_key(name) => {
                return Err(RelayError::ConfigError {
                    reason: format!("no stop predicate registered under '{}'", name),
                });
            }
            _ => {}
        }

        if config.interactive && self.reviewer.is_none() {
            return Err(RelayError::ConfigError {
                reason: format!("agent '{}' is interactive but has no reviewer", config.agent_name),
            });
        }

        self.validate_generation()
    }

    /// The subset of [`validate_config`](Self::validate_config) a single
    /// [`step`](Self::step) depends on.
    fn validate_generation(&self) -> RelayResult<()> {
        let config = &self.state.config;
        if !config.temperature.is_finite() || config.temperature < 0.0 {
            return Err(RelayError::ConfigError {
                reason: format!("temperature must be a non-negative number, got {}", config.temperature),
            });
        }

        validate_filters(&config.response_filters)
    }

    fn stop_condition_met(&self, response: &str) -> bool {
        match &self.state.config.stopping_condition {
            None => false,
            Some(StopCondition::Token { token }) => response.contains(token.as_str()),
            Some(StopCondition::Named { name }) => self
                .stop_predicates
                .get(name)
                .is_some_and(|predicate| predicate(response)),
        }
    }

    // ── Persistence ──────────────────────────────────────────────────────────

    /// Persist the current state to `path`.
    pub fn save_state(&self, path: &Path) -> RelayResult<()> {
        relay_state::save_state(path, &self.state)
    }

    /// Replace the current state with the one stored at `path`.
    ///
    /// On any error the live state is left exactly as it was.
    pub fn load_state(&mut self, path: &Path) -> RelayResult<()> {
        let state = relay_state::load_state(path)?;
        validate_filters(&state.config.response_filters)?;

        info!(
            agent = %state.config.agent_name,
            path = %path.display(),
            turns = state.history.len(),
            "agent state restored"
        );
        self.state = state;
        Ok(())
    }

    // ── Loop control ─────────────────────────────────────────────────────────

    /// Append a filter that replaces `pattern` with `[FILTERED]`.
    pub fn add_response_filter(&mut self, pattern: impl Into<String>) -> RelayResult<()> {
        self.add_response_filter_with(pattern, FILTERED_MARKER)
    }

    /// Append a filter that replaces `pattern` with `replacement`.
    ///
    /// Applies to responses produced after this call only.
    pub fn add_response_filter_with(
        &mut self,
        pattern: impl Into<String>,
        replacement: impl Into<String>,
    ) -> RelayResult<()> {
        let filter = ResponseFilter::new(pattern, replacement);
        validate_filter(&self.state.config.response_filters, &filter)?;
        self.state.config.response_filters.push(filter);
        Ok(())
    }

    /// Drop the latest assistant turn and every turn after it.
    ///
    /// `loop_count` counts the latest run's responses, which are always the
    /// trailing assistant turns, so it drops by one until that run is fully
    /// undone and then stays at zero.
    ///
    /// Returns the new latest turn. Returns `None` and leaves the history
    /// unchanged when there is no assistant turn to drop.
    pub fn undo_last(&mut self) -> Option<&Turn> {
        let index = self
            .state
            .history
            .iter()
            .rposition(|turn| turn.role == Role::Assistant)?;
        self.state.history.truncate(index);
        self.state.loop_count = self.state.loop_count.saturating_sub(1);
        self.state.history.last()
    }

    /// Clear the transcript and the per-run counters. Configuration stays.
    pub fn reset(&mut self) {
        self.state.history.clear();
        self.state.loop_count = 0;
        self.state.last_temperature = self.state.config.temperature;
    }

    /// Record a free-form remark about the agent's responses.
    pub fn provide_feedback(&mut self, feedback: impl Into<String>) {
        let feedback = feedback.into();
        info!(agent = %self.state.config.agent_name, feedback = %feedback, "feedback received");
        self.feedback.push(feedback);
    }

    /// Every recorded remark, in the order given.
    pub fn feedback(&self) -> &[String] {
        &self.feedback
    }

    /// How often each distinct remark was given.
    pub fn analyze_feedback(&self) -> BTreeMap<&str, usize> {
        let mut counts = BTreeMap::new();
        for feedback in &self.feedback {
            *counts.entry(feedback.as_str()).or_insert(0) += 1;
        }
        debug!(agent = %self.state.config.agent_name, distinct = counts.len(), "feedback analyzed");
        counts
    }

    pub fn set_max_loops(&mut self, max_loops: MaxLoops) {
        self.state.config.max_loops = max_loops;
    }

    pub fn set_loop_interval(&mut self, interval: Duration) {
        self.state.config.loop_interval = interval;
    }

    pub fn set_retry_attempts(&mut self, attempts: u32) {
        self.state.config.retry_attempts = attempts;
    }

    pub fn set_retry_interval(&mut self, interval: Duration) {
        self.state.config.retry_interval = interval;
    }

    pub fn set_system_prompt(&mut self, prompt: impl Into<String>) {
        self.state.config.system_prompt = prompt.into();
    }

    pub fn set_stopping_condition(&mut self, condition: Option<StopCondition>) {
        self.state.config.stopping_condition = condition;
    }

    // ── Accessors ────────────────────────────────────────────────────────────

    pub fn state(&self) -> &AgentState {
        &self.state
    }

    pub fn config(&self) -> &AgentConfig {
        &self.state.config
    }

    pub fn history(&self) -> &[Turn] {
        &self.state.history
    }

    pub fn name(&self) -> &str {
        &self.state.config.agent_name
    }
}

impl fmt::Debug for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Flow")
            .field("agent", &self.state.config.agent_name)
            .field("turns", &self.state.history.len())
            .field("loop_count", &self.state.loop_count)
            .field("interactive", &self.reviewer.is_some())
            .field("stop_predicates", &self.stop_predicates.keys().collect::<Vec<_>>())
            .field("feedback", &self.feedback.len())
            .finish()
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use relay_contracts::error::ProviderFailure;

    use crate::scripted::{RecordingSleeper, ScriptedInvoker, ScriptedReviewer};

    use super::*;

    // ── Mock helpers ─────────────────────────────────────────────────────────

    fn config(max_loops: u32) -> AgentConfig {
        AgentConfig::new("tester").with_max_loops(MaxLoops::fixed(max_loops))
    }

    fn make_flow(invoker: &Arc<ScriptedInvoker>, config: AgentConfig) -> (Flow, Arc<RecordingSleeper>) {
        let sleeper = Arc::new(RecordingSleeper::new());
        let flow = Flow::new(invoker.clone(), config).with_sleeper(sleeper.clone());
        (flow, sleeper)
    }

    /// An invoker that cancels `signal` as soon as it has answered once.
    struct CancellingInvoker {
        signal: CancelSignal,
        calls: Arc<Mutex<u32>>,
    }

    impl ModelInvoker for CancellingInvoker {
        fn invoke(&self, _prompt: &str, _params: &GenerationParams) -> Result<String, ProviderFailure> {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            self.signal.cancel();
            Ok(format!("response {}", *calls))
        }
    }

    /// A sleeper that cancels `signal` the first time anything waits.
    struct CancellingSleeper {
        signal: CancelSignal,
    }

    impl Sleeper for CancellingSleeper {
        fn sleep(&self, _duration: Duration) {
            self.signal.cancel();
        }
    }

    /// A reviewer whose host side has gone away.
    struct BrokenReviewer;

    impl Reviewer for BrokenReviewer {
        fn review(&mut self, _loop_index: u32, _response: &str) -> RelayResult<Review> {
            Err(RelayError::InteractionError {
                reason: "stdin closed".to_string(),
            })
        }
    }

    // ── Loop bounds and chaining ─────────────────────────────────────────────

    #[test]
    fn test_runs_exactly_max_loops_when_condition_never_holds() {
        let invoker = Arc::new(ScriptedInvoker::repeating("draft"));
        let (mut flow, _) = make_flow(&invoker, config(4).with_stopping_condition(StopCondition::named("never")));
        flow.register_stop_predicate("never", |_| false);

        let outcome = flow.run_with_cancel("write", &CancelSignal::new()).unwrap();

        assert_eq!(invoker.calls(), 4);
        assert_eq!(outcome.loops_completed, 4);
        assert_eq!(outcome.termination, Termination::MaxLoops);
        assert_eq!(flow.state().assistant_turns().count(), 4);
    }

    #[test]
    fn test_two_loops_return_last_response_and_record_history() {
        let invoker = Arc::new(ScriptedInvoker::new(["A", "B"]));
        let (mut flow, _) = make_flow(&invoker, config(2));

        let response = flow.run("start").unwrap();

        assert_eq!(response, "B");
        assert_eq!(flow.history()[0], Turn::user("start"));
        assert_eq!(flow.state().assistant_turns().collect::<Vec<_>>(), vec!["A", "B"]);
        // The second iteration sees the first response.
        assert!(invoker.prompts()[1].contains("Assistant: A"));
    }

    #[test]
    fn test_history_accumulates_and_counters_reset_between_runs() {
        let invoker = Arc::new(ScriptedInvoker::repeating("ok"));
        let (mut flow, _) = make_flow(&invoker, config(2));

        flow.run("first").unwrap();
        flow.run("second").unwrap();

        assert_eq!(flow.state().loop_count, 2);
        assert_eq!(flow.history().len(), 6);
        assert_eq!(flow.history()[3], Turn::user("second"));
    }

    #[test]
    fn test_loop_interval_only_between_iterations() {
        let invoker = Arc::new(ScriptedInvoker::repeating("ok"));
        let (mut flow, sleeper) = make_flow(&invoker, config(3).with_loop_interval(Duration::from_millis(20)));

        flow.run("task").unwrap();

        assert_eq!(sleeper.recorded(), vec![Duration::from_millis(20); 2]);
    }

    #[test]
    fn test_run_batch_runs_in_order_and_stops_on_error() {
        let invoker = Arc::new(ScriptedInvoker::new(["r1", "r2"]));
        let (mut flow, _) = make_flow(&invoker, config(1));
        assert_eq!(flow.run_batch(&["a", "b"]).unwrap(), vec!["r1", "r2"]);

        let invoker = Arc::new(ScriptedInvoker::from_results([
            Ok("r1".to_string()),
            Err(ProviderFailure::new("down")),
        ]));
        let (mut flow, _) = make_flow(&invoker, config(1).with_retry_attempts(0));
        let result = flow.run_batch(&["a", "b", "c"]);
        assert!(matches!(result, Err(RelayError::ProviderError { .. })));
        assert_eq!(invoker.calls(), 2);
    }

    // ── Retry ────────────────────────────────────────────────────────────────

    #[test]
    fn test_exhausted_retries_make_k_plus_one_attempts() {
        let invoker = Arc::new(ScriptedInvoker::always_failing("boom"));
        let (mut flow, sleeper) = make_flow(
            &invoker,
            config(3)
                .with_retry_attempts(2)
                .with_retry_interval(Duration::from_millis(50)),
        );

        let result = flow.run("task");

        match result {
            Err(RelayError::ProviderError {
                loop_index,
                attempts,
                reason,
            }) => {
                assert_eq!(loop_index, 1);
                assert_eq!(attempts, 3);
                assert_eq!(reason, "boom");
            }
            other => panic!("expected ProviderError, got {other:?}"),
        }
        assert_eq!(invoker.calls(), 3);
        assert_eq!(sleeper.recorded(), vec![Duration::from_millis(50); 2]);
        // Failed attempts never reach the transcript.
        assert_eq!(flow.history(), &[Turn::user("task")]);
    }

    #[test]
    fn test_transient_failure_is_retried_transparently() {
        let invoker = Arc::new(ScriptedInvoker::from_results([
            Err(ProviderFailure::new("rate limited")),
            Ok("recovered".to_string()),
        ]));
        let (mut flow, _) = make_flow(&invoker, config(1).with_retry_attempts(1));

        assert_eq!(flow.run("task").unwrap(), "recovered");
        assert_eq!(flow.state().assistant_turns().count(), 1);
    }

    // ── Stopping ─────────────────────────────────────────────────────────────

    #[test]
    fn test_done_token_stops_auto_loop() {
        let invoker = Arc::new(ScriptedInvoker::new(["working", "finished <DONE>", "never used"]));
        let (mut flow, _) = make_flow(
            &invoker,
            config(1)
                .with_max_loops(MaxLoops::Auto)
                .with_stopping_condition(StopCondition::done_token()),
        );

        let outcome = flow.run_with_cancel("task", &CancelSignal::new()).unwrap();

        assert_eq!(outcome.response, "finished <DONE>");
        assert_eq!(outcome.termination, Termination::StoppingCondition);
        assert_eq!(invoker.calls(), 2);
    }

    #[test]
    fn test_named_predicate_sees_each_response() {
        let invoker = Arc::new(ScriptedInvoker::new(["short", "long enough answer"]));
        let (mut flow, _) = make_flow(&invoker, config(10).with_stopping_condition(StopCondition::named("long")));
        flow.register_stop_predicate("long", |r| r.len() > 10);

        assert_eq!(flow.run("task").unwrap(), "long enough answer");
        assert_eq!(invoker.calls(), 2);
    }

    #[test]
    fn test_auto_without_stop_condition_is_rejected_before_any_call() {
        let invoker = Arc::new(ScriptedInvoker::repeating("x"));
        let (mut flow, _) = make_flow(&invoker, config(1).with_max_loops(MaxLoops::Auto));

        let result = flow.run("task");

        assert!(matches!(result, Err(RelayError::ConfigError { .. })));
        assert_eq!(invoker.calls(), 0);
        assert!(flow.history().is_empty());
    }

    #[test]
    fn test_auto_requires_stop_condition_even_when_interactive() {
        let invoker = Arc::new(ScriptedInvoker::repeating("x"));
        let (flow, _) = make_flow(&invoker, config(1).with_max_loops(MaxLoops::Auto).with_interactive(true));
        let mut flow = flow.with_reviewer(ScriptedReviewer::new([Review::Stop]));

        assert!(matches!(flow.run("task"), Err(RelayError::ConfigError { .. })));
        assert_eq!(invoker.calls(), 0);
    }

    #[test]
    fn test_unregistered_named_predicate_is_config_error() {
        let invoker = Arc::new(ScriptedInvoker::repeating("x"));
        let (mut flow, _) = make_flow(&invoker, config(2).with_stopping_condition(StopCondition::named("missing")));

        let result = flow.run("task");

        assert!(matches!(result, Err(RelayError::ConfigError { .. })));
        assert_eq!(invoker.calls(), 0);
    }

    // ── Cancellation ─────────────────────────────────────────────────────────

    #[test]
    fn test_cancel_before_second_loop_returns_first_response() {
        let signal = CancelSignal::new();
        let calls = Arc::new(Mutex::new(0));
        let invoker = Arc::new(CancellingInvoker {
            signal: signal.clone(),
            calls: calls.clone(),
        });
        let mut flow = Flow::new(invoker, config(5)).with_sleeper(Arc::new(RecordingSleeper::new()));

        let outcome = flow.run_with_cancel("task", &signal).unwrap();

        assert_eq!(*calls.lock().unwrap(), 1);
        assert_eq!(outcome.response, "response 1");
        assert_eq!(outcome.loops_completed, 1);
        assert!(outcome.is_cancelled());
    }

    #[test]
    fn test_cancel_between_retries_is_not_an_error() {
        let signal = CancelSignal::new();
        let invoker = Arc::new(ScriptedInvoker::always_failing("flaky"));
        let mut flow = Flow::new(invoker.clone(), config(3).with_retry_attempts(5))
            .with_sleeper(Arc::new(CancellingSleeper { signal: signal.clone() }));

        let outcome = flow.run_with_cancel("task", &signal).unwrap();

        assert_eq!(invoker.calls(), 1);
        assert_eq!(outcome.termination, Termination::Cancelled);
        assert_eq!(outcome.response, "");
        assert_eq!(outcome.loops_completed, 0);
    }

    #[test]
    fn test_expired_deadline_cancels_before_first_call() {
        let invoker = Arc::new(ScriptedInvoker::repeating("x"));
        let (mut flow, _) = make_flow(&invoker, config(3));

        let outcome = flow
            .run_with_cancel("task", &CancelSignal::with_deadline(Duration::ZERO))
            .unwrap();

        assert!(outcome.is_cancelled());
        assert_eq!(invoker.calls(), 0);
    }

    // ── Interactive review ───────────────────────────────────────────────────

    #[test]
    fn test_reviewer_edit_then_stop() {
        let invoker = Arc::new(ScriptedInvoker::new(["one", "two"]));
        let reviewer = ScriptedReviewer::new([Review::Edit("focus on X".to_string()), Review::Stop]);
        let seen = reviewer.seen();
        let (flow, _) = make_flow(&invoker, config(5).with_interactive(true));
        let mut flow = flow.with_reviewer(reviewer);

        let outcome = flow.run_with_cancel("task", &CancelSignal::new()).unwrap();

        assert_eq!(outcome.response, "two");
        assert_eq!(outcome.termination, Termination::UserStopped);
        assert_eq!(*seen.lock().unwrap(), vec!["one", "two"]);
        assert_eq!(
            flow.history(),
            &[
                Turn::user("task"),
                Turn::assistant("one"),
                Turn::user("focus on X"),
                Turn::assistant("two"),
            ]
        );
        assert!(invoker.prompts()[1].contains("User: focus on X"));
    }

    #[test]
    fn test_edit_on_final_loop_is_returned() {
        let invoker = Arc::new(ScriptedInvoker::new(["draft"]));
        let (flow, _) = make_flow(&invoker, config(1).with_interactive(true));
        let mut flow = flow.with_reviewer(ScriptedReviewer::new([Review::Edit("better".to_string())]));

        assert_eq!(flow.run("task").unwrap(), "better");
    }

    #[test]
    fn test_reviewer_failure_surfaces_unchanged() {
        let invoker = Arc::new(ScriptedInvoker::repeating("x"));
        let (flow, _) = make_flow(&invoker, config(2).with_interactive(true));
        let mut flow = flow.with_reviewer(BrokenReviewer);

        let result = flow.run("task");

        assert!(matches!(result, Err(RelayError::InteractionError { .. })));
    }

    #[test]
    fn test_interactive_without_reviewer_is_config_error() {
        let invoker = Arc::new(ScriptedInvoker::repeating("x"));
        let (mut flow, _) = make_flow(&invoker, config(2).with_interactive(true));

        assert!(matches!(flow.run("task"), Err(RelayError::ConfigError { .. })));
        assert_eq!(invoker.calls(), 0);
    }

    // ── Filters and temperature ──────────────────────────────────────────────

    #[test]
    fn test_filter_affects_only_future_responses() {
        let invoker = Arc::new(ScriptedInvoker::new(["secret plan", "secret again"]));
        let (mut flow, _) = make_flow(&invoker, config(1));

        assert_eq!(flow.run("one").unwrap(), "secret plan");
        flow.add_response_filter("secret").unwrap();
        assert_eq!(flow.run("two").unwrap(), "[FILTERED] again");

        assert_eq!(flow.history()[1], Turn::assistant("secret plan"));
    }

    #[test]
    fn test_invalid_filter_is_rejected_and_not_added() {
        let invoker = Arc::new(ScriptedInvoker::repeating("x"));
        let (mut flow, _) = make_flow(&invoker, config(1));

        assert!(flow.add_response_filter_with("a", "aa").is_err());
        assert!(flow.config().response_filters.is_empty());
    }

    #[test]
    fn test_stop_condition_evaluated_on_filtered_response() {
        let invoker = Arc::new(ScriptedInvoker::new(["leak <DONE>", "clean"]));
        let (mut flow, _) = make_flow(&invoker, config(2).with_stopping_condition(StopCondition::done_token()));
        flow.add_response_filter_with("<DONE>", "").unwrap();

        assert_eq!(flow.run("task").unwrap(), "clean");
        assert_eq!(invoker.calls(), 2);
    }

    #[test]
    fn test_dynamic_temperature_is_passed_to_invoker() {
        let invoker = Arc::new(ScriptedInvoker::repeating("short"));
        let (mut flow, _) = make_flow(
            &invoker,
            config(3).with_dynamic_temperature(true).with_temperature(1.0),
        );

        flow.run("task").unwrap();

        let temps = invoker.temperatures();
        assert_eq!(temps.len(), 3);
        assert_eq!(temps[0], 1.0);
        assert!(temps[1] < temps[0] && temps[2] < temps[1]);
        assert!(temps.iter().all(|t| *t >= flow.config().temperature_floor));
        assert_eq!(flow.state().last_temperature, temps[2]);
    }

    #[test]
    fn test_fixed_temperature_without_dynamic_mode() {
        let invoker = Arc::new(ScriptedInvoker::repeating("x"));
        let (mut flow, _) = make_flow(&invoker, config(3));

        flow.run("task").unwrap();

        assert_eq!(invoker.temperatures(), vec![0.7; 3]);
    }

    // ── Persistence and loop control ─────────────────────────────────────────

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flow.json");

        let invoker = Arc::new(ScriptedInvoker::new(["A", "B"]));
        let (mut original, _) = make_flow(&invoker, config(2));
        original.run("start").unwrap();
        original.save_state(&path).unwrap();

        let (mut restored, _) = make_flow(&invoker, AgentConfig::new("other"));
        restored.load_state(&path).unwrap();

        assert_eq!(restored.state(), original.state());
        assert_eq!(restored.name(), "tester");
    }

    #[test]
    fn test_sub_millisecond_intervals_survive_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flow.json");

        let mut config = config(1);
        config.retry_interval = Duration::from_micros(1_500);
        config.loop_interval = Duration::from_nanos(250);
        let invoker = Arc::new(ScriptedInvoker::repeating("x"));
        let (mut flow, _) = make_flow(&invoker, config);
        flow.run("task").unwrap();
        flow.save_state(&path).unwrap();

        let loaded = relay_state::load_state(&path).unwrap();

        assert_eq!(&loaded, flow.state());
        assert_eq!(loaded.config.retry_interval, Duration::from_micros(1_500));
    }

    #[test]
    fn test_failed_load_leaves_state_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();

        let invoker = Arc::new(ScriptedInvoker::repeating("x"));
        let (mut flow, _) = make_flow(&invoker, config(1));
        flow.run("task").unwrap();
        let before = flow.state().clone();

        let result = flow.load_state(&path);

        assert!(matches!(result, Err(RelayError::DeserializationError { .. })));
        assert_eq!(flow.state(), &before);
    }

    #[test]
    fn test_autosave_writes_state_after_run() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auto.json");

        let invoker = Arc::new(ScriptedInvoker::repeating("x"));
        let (mut flow, _) = make_flow(&invoker, config(1).with_autosave(&path));
        flow.run("task").unwrap();

        let saved = relay_state::load_state(&path).unwrap();
        assert_eq!(&saved, flow.state());
    }

    #[test]
    fn test_undo_last_drops_latest_assistant_turn() {
        let invoker = Arc::new(ScriptedInvoker::new(["one", "two"]));
        let (mut flow, _) = make_flow(&invoker, config(2));
        flow.run("task").unwrap();

        assert_eq!(flow.undo_last(), Some(&Turn::assistant("one")));
        assert_eq!(flow.undo_last(), Some(&Turn::user("task")));
        assert_eq!(flow.undo_last(), None);
        assert_eq!(flow.history(), &[Turn::user("task")]);
    }

    #[test]
    fn test_undo_counts_only_the_latest_run() {
        let invoker = Arc::new(ScriptedInvoker::new(["first", "second"]));
        let (mut flow, _) = make_flow(&invoker, config(1));
        flow.run("one").unwrap();
        flow.run("two").unwrap();
        assert_eq!(flow.state().loop_count, 1);

        flow.undo_last();
        assert_eq!(flow.state().loop_count, 0);

        assert_eq!(flow.undo_last(), Some(&Turn::user("one")));
        assert_eq!(flow.state().loop_count, 0);
    }

    #[test]
    fn test_reset_clears_history_but_keeps_config() {
        let invoker = Arc::new(ScriptedInvoker::repeating("x"));
        let (mut flow, _) = make_flow(&invoker, config(2));
        flow.run("task").unwrap();
        flow.set_system_prompt("be brief");

        flow.reset();

        assert!(flow.history().is_empty());
        assert_eq!(flow.state().loop_count, 0);
        assert_eq!(flow.config().system_prompt, "be brief");
    }

    #[test]
    fn test_setters_apply_to_next_run() {
        let invoker = Arc::new(ScriptedInvoker::always_failing("down"));
        let (mut flow, sleeper) = make_flow(&invoker, config(5));
        flow.set_max_loops(MaxLoops::fixed(1));
        flow.set_retry_attempts(1);
        flow.set_retry_interval(Duration::from_micros(7_500));

        assert!(flow.run("task").is_err());
        assert_eq!(invoker.calls(), 2);
        assert_eq!(sleeper.recorded(), vec![Duration::from_micros(7_500)]);
    }

    // ── Single steps and feedback ────────────────────────────────────────────

    #[test]
    fn test_step_invokes_once_and_records_the_exchange() {
        let invoker = Arc::new(ScriptedInvoker::new(["secret answer", "unused"]));
        let (mut flow, sleeper) = make_flow(
            &invoker,
            AgentConfig::new("tester")
                .with_max_loops(MaxLoops::Auto)
                .with_response_filter(ResponseFilter::redact("secret")),
        );

        let response = flow.step("question").unwrap();

        assert_eq!(response, "[FILTERED] answer");
        assert_eq!(invoker.calls(), 1);
        assert!(invoker.prompts()[0].contains("User: question"));
        assert_eq!(
            flow.history(),
            &[Turn::user("question"), Turn::assistant("[FILTERED] answer")]
        );
        assert_eq!(flow.state().loop_count, 1);
        assert!(sleeper.recorded().is_empty());
    }

    #[test]
    fn test_step_retries_then_surfaces_provider_error() {
        let invoker = Arc::new(ScriptedInvoker::always_failing("down"));
        let (mut flow, _) = make_flow(&invoker, config(3).with_retry_attempts(1));

        let result = flow.step("question");

        assert!(matches!(result, Err(RelayError::ProviderError { .. })));
        assert_eq!(invoker.calls(), 2);
        assert_eq!(flow.history(), &[Turn::user("question")]);
    }

    #[test]
    fn test_feedback_is_recorded_and_counted() {
        let invoker = Arc::new(ScriptedInvoker::repeating("x"));
        let (mut flow, _) = make_flow(&invoker, config(1));

        flow.provide_feedback("too long");
        flow.provide_feedback("off topic");
        flow.provide_feedback("too long");

        assert_eq!(flow.feedback(), &["too long", "off topic", "too long"]);
        let counts = flow.analyze_feedback();
        assert_eq!(counts.len(), 2);
        assert_eq!(counts["too long"], 2);
        assert_eq!(counts["off topic"], 1);
    }
}
