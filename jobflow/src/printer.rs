//! Output sink for command results.

use std::io::{self, Write};
use std::sync::{Arc, Mutex, PoisonError};

use crate::context::Key;

/// Context slot holding the invocation's printer.
pub const PRINTER: Key<Arc<dyn Printer>> = Key::new("printer");

/// Line-oriented result output. Logging goes to stderr; results go here.
pub trait Printer: Send + Sync {
    fn print(&self, line: &str) -> io::Result<()>;

    /// Write `text` exactly as given, without a trailing newline.
    fn write(&self, text: &str) -> io::Result<()>;
}

/// Writes each line to stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutPrinter;

impl Printer for StdoutPrinter {
    fn print(&self, line: &str) -> io::Result<()> {
        let mut out = io::stdout().lock();
        writeln!(out, "{line}")
    }

    fn write(&self, text: &str) -> io::Result<()> {
        let mut out = io::stdout().lock();
        out.write_all(text.as_bytes())?;
        out.flush()
    }
}

/// Keeps printed lines in memory. A raw `write` is kept as one entry.
#[derive(Debug, Default, Clone)]
pub struct CapturePrinter {
    lines: Arc<Mutex<Vec<String>>>,
}

impl CapturePrinter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Printer for CapturePrinter {
    fn print(&self, line: &str) -> io::Result<()> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line.to_string());
        Ok(())
    }

    fn write(&self, text: &str) -> io::Result<()> {
        self.print(text)
    }
}
