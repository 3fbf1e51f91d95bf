//! Quixil's backend: a call-frame stack VM that executes the bytecode
//! `quixil_compiler` emits directly against `quixil_core`'s value/object model.

pub mod builtins;
pub mod error;
pub mod trace;
pub mod vm;

pub use error::{InterpretError, RuntimeError};
pub use vm::{CapturingHost, Host, StdoutHost, Vm};
