use std::sync::{Arc, Mutex};

use chrono::Local;
use colored::{ColoredString, Colorize};
use indicatif::ProgressBar;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Cmd,
    Step,
    Success,
    Warn,
    Error,
}

/// Destination for wizard progress messages and raw child-process output.
pub trait LogSink: Send + Sync {
    fn log(&self, level: Level, message: &str);

    /// A single line of output from an external command.
    fn output(&self, line: &str);

    fn info(&self, message: &str) {
        self.log(Level::Info, message);
    }

    fn step(&self, message: &str) {
        self.log(Level::Step, message);
    }

    fn success(&self, message: &str) {
        self.log(Level::Success, message);
    }

    fn warn(&self, message: &str) {
        self.log(Level::Warn, message);
    }

    fn error(&self, message: &str) {
        self.log(Level::Error, message);
    }
}

/// Timestamped, coloured terminal log.
#[derive(Default, Clone)]
pub struct ConsoleLog {
    bar: Arc<Mutex<Option<ProgressBar>>>,
}

impl ConsoleLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route lines through `bar` until [`ConsoleLog::detach`] is called.
    pub fn attach(&self, bar: ProgressBar) {
        if let Ok(mut slot) = self.bar.lock() {
            *slot = Some(bar);
        }
    }

    pub fn detach(&self) {
        if let Ok(mut slot) = self.bar.lock() {
            *slot = None;
        }
    }

    fn emit(&self, text: String) {
        let bar = self.bar.lock().ok().and_then(|slot| slot.clone());
        match bar {
            Some(bar) => bar.println(text),
            None => println!("{}", text),
        }
    }
}

fn paint(level: Level, message: &str) -> ColoredString {
    match level {
        Level::Info => message.normal(),
        Level::Cmd => message.blue().bold(),
        Level::Step => message.cyan().bold(),
        Level::Success => message.green().bold(),
        Level::Warn => message.yellow(),
        Level::Error => message.red(),
    }
}

impl LogSink for ConsoleLog {
    fn log(&self, level: Level, message: &str) {
        let now = Local::now().format("%H:%M:%S");
        self.emit(format!("[{}] {}", now, paint(level, message)));
    }

    fn output(&self, line: &str) {
        let line = line.trim_end();
        if line.trim().is_empty() {
            return;
        }
        self.emit(format!("    {}", line.dimmed()));
    }
}

/// Records everything it is given; used by tests and for post-mortem output.
#[derive(Default)]
pub struct MemoryLog {
    entries: Mutex<Vec<(Level, String)>>,
    lines: Mutex<Vec<String>>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<(Level, String)> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }

    pub fn contains(&self, level: Level, needle: &str) -> bool {
        self.entries()
            .iter()
            .any(|(l, message)| *l == level && message.contains(needle))
    }
}

impl LogSink for MemoryLog {
    fn log(&self, level: Level, message: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push((level, message.to_string()));
        }
    }

    fn output(&self, line: &str) {
        if line.trim().is_empty() {
            return;
        }
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(line.trim_end().to_string());
        }
    }
}
