//! Confirmation prompts on the terminal.

use livecopy_workflow::{Answer, ConfirmRequest, Confirmer};
use std::io::{self, BufRead, Write};

/// Asks on stdin/stdout.
///
/// `assume_yes` (`--yes-i-know`) answers the plain yes/no erase prompt for
/// removable media. The typed phrase and the low-memory swap prompt are
/// always asked.
pub struct TerminalConfirmer {
    assume_yes: bool,
}

impl TerminalConfirmer {
    pub fn new(assume_yes: bool) -> Self {
        Self { assume_yes }
    }
}

impl Confirmer for TerminalConfirmer {
    fn confirm(&self, request: &ConfirmRequest) -> Answer {
        if self.assume_yes && matches!(request, ConfirmRequest::YesNo { .. }) {
            log::info!("⚠️  --yes-i-know supplied. Skipping confirmation.");
            return Answer::Yes;
        }

        println!();
        println!("⚠️  WARNING ⚠️");
        match request {
            ConfirmRequest::TypedPhrase { .. } => println!("{}", request.message()),
            _ => {
                print!("{} [y/N] ", request.message());
                let _ = io::stdout().flush();
            }
        }

        let mut input = String::new();
        match io::stdin().lock().read_line(&mut input) {
            Ok(_) => answer_from_line(request, &input),
            Err(e) => {
                log::warn!("Could not read answer: {}", e);
                Answer::No
            }
        }
    }
}

/// Interpret one line typed by the operator.
pub fn answer_from_line(request: &ConfirmRequest, line: &str) -> Answer {
    if let ConfirmRequest::TypedPhrase { .. } = request {
        return Answer::Typed(line.trim_end_matches(['\r', '\n']).to_string());
    }
    match line.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => Answer::Yes,
        _ => Answer::No,
    }
}
