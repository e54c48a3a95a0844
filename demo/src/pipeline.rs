//! Four-stage publishing pipeline: topics, draft, review, distribution.

use std::sync::Arc;

use relay_contracts::{
    config::{AgentConfig, MaxLoops},
    error::RelayResult,
    task::{InputMode, TaskSnapshot},
};
use relay_core::{Flow, ModelInvoker};
use relay_workflow::{shared, SequentialWorkflow, WorkflowOutcome};

use crate::canned::CannedInvoker;

const TOPIC_TASK: &str = "Generate 10 topics on gaining mental clarity using ancient practices";
const DRAFT_TASK: &str = "Write a unique, human-like article with headings and sub-headings on the first of these topics:";
const REVIEW_TASK: &str = "Refine this article to meet strict publication standards: {{previous}}";
const DISTRIBUTION_TASK: &str =
    "Write social media posts for this article, aiming for clicks and engagement: {{previous}}";

struct Stage {
    agent: &'static str,
    system_prompt: &'static str,
    loops: u32,
}

const STAGES: [Stage; 4] = [
    Stage {
        agent: "topic-selector",
        system_prompt: "You propose concise, original article topics.",
        loops: 1,
    },
    Stage {
        agent: "drafter",
        system_prompt: "You write long-form articles in a warm, human voice.",
        loops: 2,
    },
    Stage {
        agent: "reviewer",
        system_prompt: "You are an exacting editor.",
        loops: 1,
    },
    Stage {
        agent: "distributor",
        system_prompt: "You write short, engaging social media copy.",
        loops: 1,
    },
];

pub fn build_pipeline() -> SequentialWorkflow {
    let agents: Vec<_> = STAGES
        .iter()
        .map(|stage| {
            let invoker: Arc<dyn ModelInvoker> = Arc::new(CannedInvoker::new(stage.agent));
            let config = AgentConfig::new(stage.agent)
                .with_system_prompt(stage.system_prompt)
                .with_max_loops(MaxLoops::fixed(stage.loops));
            shared(Flow::new(invoker, config))
        })
        .collect();

    let mut workflow = SequentialWorkflow::new("publishing");
    workflow
        .add_with(TOPIC_TASK, agents[0].clone(), InputMode::Standalone)
        .add(DRAFT_TASK, agents[1].clone())
        .add_with(REVIEW_TASK, agents[2].clone(), InputMode::Substitute)
        .add_with(DISTRIBUTION_TASK, agents[3].clone(), InputMode::Substitute);
    workflow
}

pub fn run_pipeline() -> RelayResult<()> {
    let mut workflow = build_pipeline();
    let outcome = workflow.run()?;

    for task in workflow.snapshot() {
        print_stage(&task);
    }
    if let WorkflowOutcome::Cancelled { index } = outcome {
        println!("Pipeline cancelled at stage {}.", index + 1);
    }
    Ok(())
}

fn print_stage(task: &TaskSnapshot) {
    println!("  Stage {} — {}", task.index + 1, task.agent_name);
    println!("  ------------------------------");
    println!("  {}", task.result.as_deref().unwrap_or("(no output)"));
    println!();
}
