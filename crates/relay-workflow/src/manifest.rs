//! TOML-declared workflows.
//!
//! A manifest names its agents once and binds tasks to them by name. Each
//! agent becomes a single shared `Flow`, so two tasks naming the same agent
//! share its transcript.
//!
//! ```toml
//! name = "blog"
//! max_loops = 1
//!
//! [agents.writer]
//! max_loops = 2
//!
//! [agents.editor]
//! stopping_condition = { kind = "token", token = "<DONE>" }
//! max_loops = "auto"
//!
//! [[tasks]]
//! description = "Write a post about sleep hygiene"
//! agent = "writer"
//!
//! [[tasks]]
//! description = "Edit this draft: {{previous}}"
//! agent = "editor"
//! input = "substitute"
//! ```

use std::{collections::BTreeMap, path::Path, sync::Arc};

use serde::{Deserialize, Serialize};
use tracing::debug;

use relay_contracts::{
    config::AgentConfig,
    error::{RelayError, RelayResult},
    task::InputMode,
};
use relay_core::{filter::validate_filters, Flow, ModelInvoker};

use crate::{
    sequential::SequentialWorkflow,
    task::{shared, AgentRef},
};

fn default_passes() -> u32 {
    1
}

/// Top-level structure of a workflow manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkflowManifest {
    pub name: String,
    /// Passes over the task list.
    #[serde(default = "default_passes")]
    pub max_loops: u32,
    /// Agent configurations keyed by agent name. The key overrides any
    /// `agent_name` inside the table.
    #[serde(default)]
    pub agents: BTreeMap<String, AgentConfig>,
    #[serde(default)]
    pub tasks: Vec<TaskManifest>,
}

/// One `[[tasks]]` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskManifest {
    pub description: String,
    pub agent: String,
    #[serde(default)]
    pub input: InputMode,
}

impl WorkflowManifest {
    /// Parse a manifest from TOML.
    ///
    /// Returns `RelayError::ConfigError` if the TOML is malformed or does
    /// not match the manifest layout.
    pub fn from_toml_str(s: &str) -> RelayResult<Self> {
        toml::from_str(s).map_err(|e| RelayError::ConfigError {
            reason: format!("failed to parse workflow TOML: {}", e),
        })
    }

    /// Read the file at `path` and parse it as a manifest.
    pub fn from_file(path: &Path) -> RelayResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| RelayError::ConfigError {
            reason: format!("failed to read workflow file '{}': {}", path.display(), e),
        })?;
        Self::from_toml_str(&contents)
    }

    /// Create one shared flow per declared agent, all calling `invoker`.
    ///
    /// Hosts that need reviewers or named stop predicates attach them here,
    /// before [`WorkflowManifest::build_with_agents`].
    pub fn build_agents(&self, invoker: Arc<dyn ModelInvoker>) -> RelayResult<BTreeMap<String, AgentRef>> {
        self.agents
            .iter()
            .map(|(name, config)| -> RelayResult<(String, AgentRef)> {
                validate_filters(&config.response_filters)?;
                let mut config = config.clone();
                config.agent_name = name.clone();
                debug!(workflow = %self.name, agent = %name, "agent created");
                Ok((name.clone(), shared(Flow::new(invoker.clone(), config))))
            })
            .collect()
    }

    /// Assemble the workflow from already-built agents.
    ///
    /// Returns `ConfigError` for zero passes, an empty task list, a task
    /// naming an undeclared agent, a task that cannot build its input, or an
    /// agent whose configuration would be refused at run time. Interactive
    /// agents need their reviewer attached before this call.
    pub fn build_with_agents(&self, agents: &BTreeMap<String, AgentRef>) -> RelayResult<SequentialWorkflow> {
        if self.max_loops == 0 {
            return Err(RelayError::ConfigError {
                reason: format!("workflow '{}' must run at least one pass", self.name),
            });
        }

        let mut workflow = SequentialWorkflow::new(self.name.clone()).with_max_loops(self.max_loops);
        for (index, task) in self.tasks.iter().enumerate() {
            let agent = agents.get(&task.agent).ok_or_else(|| RelayError::ConfigError {
                reason: format!("task {} refers to unknown agent '{}'", index, task.agent),
            })?;
            workflow.add_with(task.description.clone(), agent.clone(), task.input);
        }
        workflow.validate()?;
        Ok(workflow)
    }

    /// [`build_agents`](Self::build_agents) then
    /// [`build_with_agents`](Self::build_with_agents).
    pub fn build(&self, invoker: Arc<dyn ModelInvoker>) -> RelayResult<SequentialWorkflow> {
        let agents = self.build_agents(invoker)?;
        self.build_with_agents(&agents)
    }
}
