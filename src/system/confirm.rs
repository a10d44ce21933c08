// src/system/confirm.rs

use crate::core::failure::{RunError, RunResult};
use dialoguer::{Confirm, theme::ColorfulTheme};
use std::io::IsTerminal;

/// Yes/no questions asked by destructive tasks. Abstracted so automated runs
/// can answer without a terminal.
pub trait Confirmer: Send + Sync {
    fn confirm(&self, prompt: &str) -> RunResult<bool>;
}

/// Asks on the terminal, defaulting to "no". Without a terminal on stdin
/// every question is answered "no".
#[derive(Debug, Default, Clone, Copy)]
pub struct PromptConfirmer;

impl Confirmer for PromptConfirmer {
    fn confirm(&self, prompt: &str) -> RunResult<bool> {
        if !std::io::stdin().is_terminal() {
            log::warn!("No terminal to ask '{}'; assuming no.", prompt);
            return Ok(false);
        }
        Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt(prompt)
            .default(false)
            .interact()
            .map_err(|e| RunError::Prompt(e.to_string()))
    }
}

/// Answers every question with a fixed value (`--yes`, tests).
#[derive(Debug, Clone, Copy)]
pub struct AssumeAnswer(pub bool);

impl Confirmer for AssumeAnswer {
    fn confirm(&self, prompt: &str) -> RunResult<bool> {
        log::info!("Answering '{}' with {}", prompt, if self.0 { "yes" } else { "no" });
        Ok(self.0)
    }
}
