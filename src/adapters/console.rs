//! Operator console for interactive calibration.
//!
//! Implements [`CalibrationPrompt`] over any line-based reader/writer pair;
//! production uses stdin/stdout.

use std::io::{self, BufRead, StdinLock, Stdout, Write};

use crate::app::ports::CalibrationPrompt;
use crate::error::{Error, Result};

pub struct ConsolePrompt<R, W> {
    input: R,
    output: W,
}

impl ConsolePrompt<StdinLock<'static>, Stdout> {
    pub fn stdio() -> Self {
        Self::new(io::stdin().lock(), io::stdout())
    }
}

impl<R: BufRead, W: Write> ConsolePrompt<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    pub fn into_output(self) -> W {
        self.output
    }

    fn say(&mut self, text: &str) -> Result<()> {
        writeln!(self.output, "{text}")
            .and_then(|()| self.output.flush())
            .map_err(|_| Error::Platform("console output closed"))
    }

    fn line(&mut self) -> Result<String> {
        let mut line = String::new();
        match self.input.read_line(&mut line) {
            Ok(0) | Err(_) => Err(Error::Platform("console input closed")),
            Ok(_) => Ok(line.trim().to_owned()),
        }
    }
}

impl<R: BufRead, W: Write> CalibrationPrompt for ConsolePrompt<R, W> {
    fn announce(&mut self, message: &str) {
        // Nothing useful to do if the terminal is gone; the read fails next.
        let _ = self.say(message);
    }

    fn confirm(&mut self, instruction: &str) -> Result<()> {
        self.say(instruction)?;
        self.line().map(drop)
    }

    fn reference_mass_kg(&mut self) -> Result<f64> {
        loop {
            self.say("Enter the reference weight's mass in kg:")?;
            match self.line()?.parse::<f64>() {
                Ok(kg) if kg.is_finite() && kg > 0.0 => return Ok(kg),
                _ => self.say("Please enter a positive number.")?,
            }
        }
    }
}
