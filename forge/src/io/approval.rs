//! Human approval checkpoints.

use std::io::{BufRead, BufReader, Stdin, Stdout, Write};

use anyhow::{Context, Result, bail};

use crate::core::machine::Stage;
use crate::core::types::Decision;

/// What the human is asked to approve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    pub stage: Stage,
    pub title: String,
    /// Full rendering of the record under review.
    pub payload: String,
}

/// Source of approve/edit decisions.
pub trait ApprovalChannel {
    /// Show `checkpoint` and block until a decision is available.
    fn prompt_choice(&mut self, checkpoint: &Checkpoint) -> Result<Decision>;
}

/// Line-oriented approval over a reader/writer pair (stdin/stdout in the CLI).
pub struct ConsoleApproval<R, W> {
    input: R,
    output: W,
}

impl ConsoleApproval<BufReader<Stdin>, Stdout> {
    pub fn stdio() -> Self {
        Self::new(BufReader::new(std::io::stdin()), std::io::stdout())
    }
}

impl<R: BufRead, W: Write> ConsoleApproval<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    /// Print `prompt` and read one line. Returns `None` at end of input.
    pub fn ask(&mut self, prompt: &str) -> Result<Option<String>> {
        write!(self.output, "{prompt}").context("write prompt")?;
        self.output.flush().context("flush prompt")?;
        let mut line = String::new();
        let read = self.input.read_line(&mut line).context("read input")?;
        if read == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    }

    fn ask_required(&mut self, prompt: &str) -> Result<String> {
        match self.ask(prompt)? {
            Some(line) => Ok(line),
            None => bail!("input closed while waiting for approval"),
        }
    }
}

impl<R: BufRead, W: Write> ApprovalChannel for ConsoleApproval<R, W> {
    fn prompt_choice(&mut self, checkpoint: &Checkpoint) -> Result<Decision> {
        writeln!(self.output, "\n=== {} ===", checkpoint.title).context("write checkpoint")?;
        writeln!(self.output, "{}", checkpoint.payload).context("write checkpoint")?;
        let answer = self.ask_required("Approve or request edits? (yes/edit): ")?;
        if !answer.trim().eq_ignore_ascii_case("edit") {
            return Ok(Decision::Approve);
        }
        let edit = self.ask_required("Describe the edits: ")?;
        Ok(Decision::Edit(edit).normalized())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn checkpoint() -> Checkpoint {
        Checkpoint {
            stage: Stage::PlanApproval,
            title: "Plan: snake".to_string(),
            payload: "{\"name\": \"snake\"}".to_string(),
        }
    }

    fn decide(input: &str) -> (Result<Decision>, String) {
        let mut out = Vec::new();
        let decision = {
            let mut console = ConsoleApproval::new(Cursor::new(input.as_bytes()), &mut out);
            console.prompt_choice(&checkpoint())
        };
        (decision, String::from_utf8(out).expect("utf8"))
    }

    #[test]
    fn yes_approves_and_shows_payload() {
        let (decision, shown) = decide("yes\n");
        assert_eq!(decision.expect("decision"), Decision::Approve);
        assert!(shown.contains("=== Plan: snake ==="));
        assert!(shown.contains("{\"name\": \"snake\"}"));
    }

    #[test]
    fn anything_but_edit_approves() {
        let (decision, _) = decide("sure\n");
        assert_eq!(decision.expect("decision"), Decision::Approve);
    }

    #[test]
    fn edit_collects_text() {
        let (decision, _) = decide("EDIT\nadd dark mode\n");
        assert_eq!(
            decision.expect("decision"),
            Decision::Edit("add dark mode".to_string())
        );
    }

    #[test]
    fn blank_edit_text_approves() {
        let (decision, _) = decide("edit\n   \n");
        assert_eq!(decision.expect("decision"), Decision::Approve);
    }

    #[test]
    fn closed_input_is_an_error() {
        let (decision, _) = decide("");
        assert!(
            decision
                .unwrap_err()
                .to_string()
                .contains("input closed")
        );
    }

    #[test]
    fn ask_strips_line_endings() {
        let mut out = Vec::new();
        let mut console = ConsoleApproval::new(Cursor::new(b"build a game\r\n".as_slice()), &mut out);
        assert_eq!(
            console.ask("> ").expect("ask").as_deref(),
            Some("build a game")
        );
        assert_eq!(console.ask("> ").expect("ask"), None);
    }
}
