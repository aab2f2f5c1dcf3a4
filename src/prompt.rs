//! Prompter collaborator: one prompt string in, one line out.

use std::collections::VecDeque;
use std::io::IsTerminal;

/// Interactive input for template values.
///
/// The engine never prompts unless the caller opted in (`--prompt`), so
/// implementations may assume prompting is wanted when called.
pub trait Prompter {
    fn prompt(&mut self, message: &str) -> anyhow::Result<String>;
}

/// Prompts on the controlling terminal via `dialoguer`.
#[derive(Debug, Default)]
pub struct TerminalPrompter {
    /// Skip the TTY check; used by tests driving a pseudo-terminal.
    pub assume_tty: bool,
}

impl Prompter for TerminalPrompter {
    fn prompt(&mut self, message: &str) -> anyhow::Result<String> {
        if !self.assume_tty && !std::io::stdin().is_terminal() {
            anyhow::bail!(
                "stdin is not a terminal; supply values with --input or --input-file instead of --prompt"
            );
        }
        let value: String = dialoguer::Input::new()
            .with_prompt(message)
            .allow_empty(true)
            .interact_text()?;
        Ok(value)
    }
}

/// Canned answers for tests, consumed in order.
#[derive(Debug, Default)]
pub struct ScriptedPrompter {
    answers: VecDeque<String>,
    /// Prompts seen, for assertions.
    pub transcript: Vec<String>,
}

impl ScriptedPrompter {
    pub fn new(answers: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            answers: answers.into_iter().map(Into::into).collect(),
            transcript: Vec::new(),
        }
    }
}

impl Prompter for ScriptedPrompter {
    fn prompt(&mut self, message: &str) -> anyhow::Result<String> {
        self.transcript.push(message.to_string());
        self.answers
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("no scripted answer left for prompt {message:?}"))
    }
}
