use dialoguer::theme::ColorfulTheme;
use dialoguer::{Confirm, Input};

use crate::error::MendError;

/// The operator at the terminal. Every mutating step is gated through one.
pub trait Prompter {
    /// Yes/no question. Declining cancels the step being asked about.
    fn confirm(&mut self, prompt: &str) -> Result<bool, MendError>;

    /// Free text answer, e.g. a numbered menu choice or a migration name.
    fn input(&mut self, prompt: &str) -> Result<String, MendError>;
}

/// Interactive prompts on the controlling terminal.
pub struct TerminalPrompter {
    theme: ColorfulTheme,
}

impl TerminalPrompter {
    pub fn new() -> Self {
        TerminalPrompter {
            theme: ColorfulTheme::default(),
        }
    }
}

impl Prompter for TerminalPrompter {
    fn confirm(&mut self, prompt: &str) -> Result<bool, MendError> {
        Ok(Confirm::with_theme(&self.theme)
            .with_prompt(prompt)
            .default(false)
            .interact()?)
    }

    fn input(&mut self, prompt: &str) -> Result<String, MendError> {
        Ok(Input::<String>::with_theme(&self.theme)
            .with_prompt(prompt)
            .allow_empty(true)
            .interact_text()?)
    }
}

/// Answers yes to every confirmation, for `--yes` runs.
pub struct AssumeYes;

impl Prompter for AssumeYes {
    fn confirm(&mut self, prompt: &str) -> Result<bool, MendError> {
        log::debug!("Assuming yes: {}", prompt);
        Ok(true)
    }

    fn input(&mut self, prompt: &str) -> Result<String, MendError> {
        Err(MendError::Error(format!(
            "'{}' needs an answer but prompts are disabled",
            prompt
        )))
    }
}
