use std::io::{self, Write};

use serde::Serialize;

use crate::app::{EventLevel, ProgressEvent, ProgressSink, RunSummary};

/// Narrates a run on stdout; detail events only when verbose.
#[derive(Debug, Clone, Copy)]
pub struct ConsoleOutput {
    pub verbose: bool,
}

impl ConsoleOutput {
    pub fn shows(&self, level: EventLevel) -> bool {
        self.verbose || level == EventLevel::Notice
    }
}

impl ProgressSink for ConsoleOutput {
    fn event(&self, event: ProgressEvent) {
        if self.shows(event.level) {
            println!("{}", event.message);
        }
    }
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_summary(summary: &RunSummary) -> io::Result<()> {
        Self::print_json(summary)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

/// Narration is suppressed in JSON mode so stdout stays parseable.
impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}
