//! The VM's side of the two-channel error design (see `quixil_compiler::error`
//! for the compile-time half).

use std::fmt;

/// A runtime error that unwound the dispatch loop: the message plus a
/// rendered call-frame backtrace, innermost frame first, `<script-main>`
/// last. `line` is the source line of the frame that raised the error,
/// duplicated as the backtrace's first entry for a single self-contained
/// `Display`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub struct RuntimeError {
    pub line: i32,
    pub message: String,
    /// One `"[Line L] in <name>()"` entry per live call frame, top to bottom.
    pub trace: Vec<String>,
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[Line {}] {}", self.line, self.message)?;
        for (i, entry) in self.trace.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{entry}")?;
        }
        Ok(())
    }
}

/// Everything `Vm::interpret` can fail with. Does not carry an I/O variant:
/// `interpret` takes an in-memory source buffer, so file-read failures are
/// the CLI binary's concern, not the language runtime's (see the CLI crate's
/// own error type).
#[derive(Debug, thiserror::Error)]
pub enum InterpretError {
    #[error(transparent)]
    Compile(#[from] quixil_compiler::CompileError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}
