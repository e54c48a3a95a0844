//! Stdin-backed reviewer for interactive runs.

use std::io::{self, BufRead, Write};

use relay_contracts::error::{RelayError, RelayResult};
use relay_core::{Review, Reviewer};

/// Shows each response and asks whether to accept, edit, or stop.
pub struct ConsoleReviewer;

impl ConsoleReviewer {
    fn read_line(prompt: &str) -> RelayResult<String> {
        print!("{prompt}");
        io::stdout().flush().map_err(interaction_error)?;

        let mut line = String::new();
        let read = io::stdin().lock().read_line(&mut line).map_err(interaction_error)?;
        if read == 0 {
            return Err(RelayError::InteractionError {
                reason: "stdin closed".to_string(),
            });
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }
}

impl Reviewer for ConsoleReviewer {
    fn review(&mut self, loop_index: u32, response: &str) -> RelayResult<Review> {
        println!();
        println!("  Loop {loop_index} response:");
        println!("  {response}");

        loop {
            let choice = Self::read_line("  [a]ccept, [e]dit, [s]top > ")?;
            match choice.trim() {
                "" | "a" | "accept" => return Ok(Review::Accept),
                "s" | "stop" => return Ok(Review::Stop),
                "e" | "edit" => {
                    let text = Self::read_line("  replacement > ")?;
                    return Ok(Review::Edit(text));
                }
                other => println!("  unrecognised choice '{other}'"),
            }
        }
    }
}

fn interaction_error(e: io::Error) -> RelayError {
    RelayError::InteractionError {
        reason: e.to_string(),
    }
}
