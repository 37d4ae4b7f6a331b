use std::io::{BufRead, Write};

use anyhow::{Context, Result};

pub struct Prompt<'a> {
    input: &'a mut dyn BufRead,
    output: &'a mut dyn Write,
}

impl<'a> Prompt<'a> {
    pub fn new(input: &'a mut dyn BufRead, output: &'a mut dyn Write) -> Self {
        Self { input, output }
    }

    /// Blocks until the user presses enter.
    ///
    /// # Errors
    /// Returns an error if the prompt cannot be written or input cannot be
    /// read.
    pub fn pause(&mut self, message: &str) -> Result<()> {
        write!(self.output, "{message} ").context("Failed to write prompt")?;
        self.output.flush().context("Failed to flush prompt")?;
        let mut line = String::new();
        self.input
            .read_line(&mut line)
            .context("Failed to read prompt input")?;
        Ok(())
    }
}

/// Pauses on the standard streams.
///
/// # Errors
/// Returns an error if standard input or output fails.
pub fn pause_for_enter(message: &str) -> Result<()> {
    let stdin = std::io::stdin();
    let mut input = stdin.lock();
    let mut output = std::io::stdout();
    Prompt::new(&mut input, &mut output).pause(message)
}
