//! Prompt assembly from the system prompt and the transcript.
//!
//! When a context window is configured, the oldest turns are dropped first.
//! The newest turn is always kept; if it alone exceeds the window, its tail
//! is kept.

use relay_contracts::agent::Turn;

/// Render the prompt for the next invocation.
pub fn build_prompt(system_prompt: &str, history: &[Turn], context_window: Option<usize>) -> String {
    let lines: Vec<String> = history
        .iter()
        .map(|turn| format!("{}: {}", turn.role.label(), turn.text))
        .collect();

    let kept = match context_window {
        Some(window) => fit_to_window(&lines, window),
        None => lines,
    };

    let mut prompt = String::with_capacity(system_prompt.len() + kept.iter().map(|l| l.len() + 1).sum::<usize>() + 16);
    prompt.push_str(system_prompt);
    prompt.push_str("\n\n");
    for line in &kept {
        prompt.push_str(line);
        prompt.push('\n');
    }
    prompt.push_str("Assistant:");
    prompt
}

/// Keep the newest lines whose combined character count fits `window`.
fn fit_to_window(lines: &[String], window: usize) -> Vec<String> {
    let mut kept = Vec::new();
    let mut used = 0usize;

    for line in lines.iter().rev() {
        let cost = line.chars().count() + 1;
        if used + cost > window {
            break;
        }
        used += cost;
        kept.push(line.clone());
    }

    if kept.is_empty() {
        if let Some(newest) = lines.last() {
            let len = newest.chars().count();
            let tail: String = newest.chars().skip(len.saturating_sub(window)).collect();
            kept.push(tail);
        }
    }

    kept.reverse();
    kept
}
