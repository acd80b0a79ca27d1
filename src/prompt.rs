//! Operator prompts
//!
//! Yes/no questions honour `--yes`: the default-yes answer is echoed and
//! returned without reading the terminal.

use crate::error::{DeployError, Result};
use console::Term;
use std::cell::RefCell;
use std::collections::VecDeque;

enum Source {
    Terminal(Term),
    Scripted(RefCell<VecDeque<String>>),
}

/// Asks the operator questions
pub struct Prompter {
    source: Source,
    assume_yes: bool,
}

impl Prompter {
    /// Prompt on the controlling terminal
    pub fn terminal(assume_yes: bool) -> Self {
        Self {
            source: Source::Terminal(Term::stdout()),
            assume_yes,
        }
    }

    /// Answer from a fixed list; an exhausted list answers with empty lines
    pub fn scripted<I, S>(answers: I, assume_yes: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            source: Source::Scripted(RefCell::new(
                answers.into_iter().map(Into::into).collect(),
            )),
            assume_yes,
        }
    }

    /// Are prompts answered automatically
    pub fn assume_yes(&self) -> bool {
        self.assume_yes
    }

    /// Ask a yes/no question. An empty answer picks `default_yes`.
    pub fn confirm(&self, message: &str, default_yes: bool) -> Result<bool> {
        let hint = if default_yes { "[Y/n]" } else { "[y/N]" };

        if self.assume_yes {
            println!("{} [Y/n]: yes", message);
            return Ok(true);
        }

        loop {
            let answer = self.read(&format!("{} {}: ", message, hint))?;
            match answer.trim().to_lowercase().as_str() {
                "" => return Ok(default_yes),
                "y" | "yes" => return Ok(true),
                "n" | "no" => return Ok(false),
                _ => continue,
            }
        }
    }

    /// Ask for free text
    pub fn input(&self, message: &str) -> Result<String> {
        Ok(self.read(message)?.trim().to_string())
    }

    fn read(&self, message: &str) -> Result<String> {
        match &self.source {
            Source::Terminal(term) => {
                term.write_str(message)
                    .and_then(|_| term.read_line())
                    .map_err(|e| DeployError::io("<terminal>", e))
            }
            Source::Scripted(answers) => {
                println!("{}", message);
                Ok(answers.borrow_mut().pop_front().unwrap_or_default())
            }
        }
    }
}
