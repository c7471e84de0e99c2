use std::io::{self, BufRead, Write};
use std::path::PathBuf;

/// User interaction needed by bulk operations. A `false` confirmation or a
/// `None` path cancels the pending operation before it has side effects.
pub trait Prompter {
    fn confirm(&mut self, message: &str) -> bool;

    fn choose_save_path(&mut self, suggested: &str) -> Option<PathBuf>;
}

/// Terminal prompter: confirmations read `y/N` from stdin unless
/// `assume_yes` is set, save paths come from `--output` or the suggestion.
pub struct ConsolePrompter {
    assume_yes: bool,
    output: Option<PathBuf>,
}

impl ConsolePrompter {
    pub fn new(assume_yes: bool, output: Option<PathBuf>) -> Self {
        Self { assume_yes, output }
    }

    fn read_answer(message: &str) -> io::Result<bool> {
        let mut stderr = io::stderr().lock();
        write!(stderr, "{message} [y/N] ")?;
        stderr.flush()?;
        let mut line = String::new();
        io::stdin().lock().read_line(&mut line)?;
        Ok(is_yes(&line))
    }
}

impl Prompter for ConsolePrompter {
    fn confirm(&mut self, message: &str) -> bool {
        if self.assume_yes {
            return true;
        }
        Self::read_answer(message).unwrap_or(false)
    }

    fn choose_save_path(&mut self, suggested: &str) -> Option<PathBuf> {
        Some(
            self.output
                .clone()
                .unwrap_or_else(|| PathBuf::from(suggested)),
        )
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
