//! Interactive confirmations.

use dialoguer::Confirm;

use crate::utils::errors::{Result, TransferError};

const PHI_NOTICE: &str = "This operation writes database contents to this machine. \
Backups may contain protected health information (PHI) or other sensitive data; \
make sure this machine and the destination path are approved to hold it.";

/// Collaborator that asks the operator before destructive or sensitive steps.
pub trait Prompts: Send + Sync {
    /// `Ok(())` on yes, [`TransferError::Aborted`] on anything else.
    fn yes_no(&self, intro: &str, question: &str) -> Result<()>;

    /// Acknowledgment required before any data leaves the remote system.
    fn phi(&self) -> Result<()>;
}

/// Prompts on the controlling terminal.
#[derive(Debug, Default, Clone)]
pub struct TerminalPrompts {
    assume_yes: bool,
}

impl TerminalPrompts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every prompt with yes without reading stdin.
    pub fn assume_yes(mut self, yes: bool) -> Self {
        self.assume_yes = yes;
        self
    }
}

impl Prompts for TerminalPrompts {
    fn yes_no(&self, intro: &str, question: &str) -> Result<()> {
        if self.assume_yes {
            return Ok(());
        }
        if !intro.is_empty() {
            println!("{}", intro);
        }
        let answer = Confirm::new()
            .with_prompt(question)
            .default(false)
            .interact()?;
        confirmed(answer)
    }

    fn phi(&self) -> Result<()> {
        self.yes_no(PHI_NOTICE, "Do you wish to proceed?")
    }
}

fn confirmed(answer: bool) -> Result<()> {
    if answer {
        Ok(())
    } else {
        Err(TransferError::Aborted("declined".to_string()))
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declined_answer_aborts() {
        confirmed(true).unwrap();
        assert!(matches!(confirmed(false), Err(TransferError::Aborted(_))));
    }

    #[test]
    fn test_terminal_errors_become_prompt_errors() {
        let err: TransferError =
            dialoguer::Error::IO(std::io::Error::other("not a terminal")).into();
        assert!(matches!(err, TransferError::Prompt(_)));
        assert!(err.to_string().contains("not a terminal"));
    }

    #[test]
    fn test_assume_yes_skips_terminal() {
        let prompts = TerminalPrompts::new().assume_yes(true);
        prompts.phi().unwrap();
        prompts.yes_no("", "Proceed?").unwrap();
    }
}
