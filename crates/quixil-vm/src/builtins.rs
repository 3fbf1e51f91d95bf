//! Native functions registered into `globals` at VM startup.

use std::io::{self, Write as _};
use std::time::Instant;

use once_cell::sync::Lazy;
use quixil_core::{Heap, NativeFn, ObjectRef, Value};

static PROCESS_START: Lazy<Instant> = Lazy::new(Instant::now);

/// `clock()` — seconds elapsed since the process started, as a float.
pub fn clock(args: &[Value], _heap: &mut Heap) -> Result<Value, String> {
    if !args.is_empty() {
        return Err(format!("clock() expects 0 arguments but got {}.", args.len()));
    }
    Ok(Value::Number(PROCESS_START.elapsed().as_secs_f64()))
}

/// `input(prompt?, hidden?)` — writes `prompt` (if given and not `nil`) to
/// stdout, reads one line from stdin, and returns it with the trailing
/// newline stripped. `hidden` is accepted for source compatibility but echo
/// suppression is not attempted here; a real terminal would need raw-mode
/// handling this VM does not implement.
pub fn input(args: &[Value], heap: &mut Heap) -> Result<Value, String> {
    if args.len() > 2 {
        return Err(format!("input() expects at most 2 arguments but got {}.", args.len()));
    }

    if let Some(prompt) = args.first() {
        match prompt {
            Value::Nil => {}
            Value::Object(ObjectRef::Str(s)) => {
                print!("{}", heap.string(*s).bytes);
                io::stdout().flush().map_err(|e| format!("failed to write prompt: {e}"))?;
            }
            other => return Err(format!("input() prompt must be a str, got '{}'.", other.type_name())),
        }
    }

    let mut line = String::new();
    io::stdin()
        .read_line(&mut line)
        .map_err(|e| format!("failed to read input: {e}"))?;
    if line.ends_with('\n') {
        line.pop();
        if line.ends_with('\r') {
            line.pop();
        }
    }
    Ok(Value::Object(ObjectRef::Str(heap.intern_take(line))))
}

/// All built-ins this VM ships, paired with the name they are bound to in `globals`.
pub const ALL: &[(&str, NativeFn)] = &[("clock", clock), ("input", input)];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_rejects_arguments() {
        let mut heap = Heap::new();
        assert!(clock(&[Value::Number(1.0)], &mut heap).is_err());
    }

    #[test]
    fn clock_returns_a_non_negative_number() {
        let mut heap = Heap::new();
        let v = clock(&[], &mut heap).unwrap();
        assert!(matches!(v, Value::Number(n) if n >= 0.0));
    }

    #[test]
    fn input_rejects_a_non_string_prompt() {
        let mut heap = Heap::new();
        assert!(input(&[Value::Number(1.0)], &mut heap).is_err());
    }
}
