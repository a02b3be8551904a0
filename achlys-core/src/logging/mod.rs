//! Verbosity-gated log sink with an in-memory buffer.
//!
//! The sink carries two channels: the debug log, gated by verbosity and
//! buffered until `flush`, and the result log, which is always recorded.
//! At verbosity 4 every debug message bypasses the buffer and is written
//! to stderr immediately (the real-time contract).

use std::fmt::Write as _;

/// Log density levels, mirroring the CLI contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Verbosity {
    /// No debug output.
    Silent,
    /// Function-level progress.
    Function,
    /// Basic-block-level progress.
    Block,
    /// Per-instruction trace.
    Instruction,
    /// Everything, unbuffered.
    RealTime,
}

impl Verbosity {
    /// Map a raw CLI level to a verbosity, clamping values above 4.
    pub fn from_level(level: u8) -> Self {
        match level {
            0 => Self::Silent,
            1 => Self::Function,
            2 => Self::Block,
            3 => Self::Instruction,
            _ => Self::RealTime,
        }
    }

    /// The numeric level of this verbosity.
    pub fn level(self) -> u8 {
        match self {
            Self::Silent => 0,
            Self::Function => 1,
            Self::Block => 2,
            Self::Instruction => 3,
            Self::RealTime => 4,
        }
    }
}

/// Buffered log sink owned by one analysis session.
#[derive(Debug)]
pub struct LogSink {
    verbosity: Verbosity,
    debug: String,
    results: String,
}

impl LogSink {
    pub fn new(verbosity: Verbosity) -> Self {
        Self {
            verbosity,
            debug: String::new(),
            results: String::new(),
        }
    }

    pub fn verbosity(&self) -> Verbosity {
        self.verbosity
    }

    /// Whether a message at `level` would be recorded.
    pub fn enabled(&self, level: Verbosity) -> bool {
        self.verbosity == Verbosity::RealTime || level <= self.verbosity
    }

    /// Record a debug message at the given level.
    ///
    /// At verbosity 4 the message goes straight to stderr; otherwise it is
    /// appended to the buffer when `level <= verbosity`.
    pub fn log(&mut self, level: Verbosity, message: impl AsRef<str>) {
        if self.verbosity == Verbosity::RealTime {
            eprintln!("{}", message.as_ref());
        } else if level <= self.verbosity {
            let _ = writeln!(self.debug, "{}", message.as_ref());
        }
    }

    /// Record a result line. Results are always kept, independent of
    /// verbosity, and are printed by `flush`.
    pub fn result(&mut self, message: impl AsRef<str>) {
        let _ = writeln!(self.results, "{}", message.as_ref());
    }

    /// Buffered debug output.
    pub fn debug_output(&self) -> &str {
        &self.debug
    }

    /// Recorded result output.
    pub fn result_output(&self) -> &str {
        &self.results
    }

    /// Write both buffers to stderr and clear them.
    pub fn flush(&mut self) {
        if !self.debug.is_empty() {
            eprint!("{}", self.debug);
            self.debug.clear();
        }
        if !self.results.is_empty() {
            eprint!("{}", self.results);
            self.results.clear();
        }
    }
}
