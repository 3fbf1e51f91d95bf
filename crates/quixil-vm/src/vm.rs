//! The call-frame stack interpreter: dispatch loop, value stack, globals.

use quixil_core::limits::{VM_FRAMES_MAX, VM_STACK_MAX};
use quixil_core::{BuiltinRef, FunctionRef, Heap, ObjectRef, OpCode, StringRef, Table, Value};

use crate::builtins;
use crate::error::{InterpretError, RuntimeError};
use crate::trace;

struct CallFrame {
    function: FunctionRef,
    ip: usize,
    /// Index into `Vm::stack` of this frame's slot 0 (the callee itself).
    slots: usize,
}

/// Host environment for `print`. Lets embedders (and tests) capture a
/// program's output instead of it going straight to process stdout.
pub trait Host: 'static {
    fn print(&mut self, line: &str);
}

/// Default host: one line per `print`, written to real stdout.
#[derive(Default)]
pub struct StdoutHost;

impl Host for StdoutHost {
    fn print(&mut self, line: &str) {
        println!("{line}");
    }
}

/// A host that appends every printed line to an in-memory buffer, for tests
/// that need to assert on exact program output.
#[derive(Default)]
pub struct CapturingHost {
    buf: String,
}

impl CapturingHost {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything printed so far, one `\n`-terminated line per `print`.
    #[must_use]
    pub fn output(&self) -> &str {
        &self.buf
    }
}

impl Host for CapturingHost {
    fn print(&mut self, line: &str) {
        self.buf.push_str(line);
        self.buf.push('\n');
    }
}

/// A fresh VM instance: its own heap, globals table, value stack and call
/// frames. Every [`Vm::interpret`] call compiles and runs one source unit
/// against this instance's state — `clock()`/globals persist across calls.
///
/// `print` output is routed through `H` (defaulting to [`StdoutHost`]); pass
/// a [`CapturingHost`] via [`Vm::with_host`] to assert on a program's exact
/// output in tests.
pub struct Vm<H: Host = StdoutHost> {
    heap: Heap,
    globals: Table,
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
    trace_enabled: bool,
    host: H,
}

impl Default for Vm<StdoutHost> {
    fn default() -> Self {
        Self::new()
    }
}

impl Vm<StdoutHost> {
    #[must_use]
    pub fn new() -> Self {
        Self::with_host(StdoutHost)
    }
}

impl Vm<CapturingHost> {
    /// Everything printed so far, one `\n`-terminated line per `print`.
    #[must_use]
    pub fn host_output(&self) -> &str {
        self.host.output()
    }
}

impl<H: Host> Vm<H> {
    /// A VM whose `print` output is routed through `host` instead of
    /// straight to process stdout — e.g. [`CapturingHost`] in tests.
    #[must_use]
    pub fn with_host(host: H) -> Self {
        let mut vm = Self {
            heap: Heap::new(),
            globals: Table::new(),
            stack: Vec::with_capacity(VM_STACK_MAX),
            frames: Vec::with_capacity(VM_FRAMES_MAX),
            trace_enabled: false,
            host,
        };
        for (name, func) in builtins::ALL {
            vm.define_builtin(name, *func);
        }
        vm
    }

    /// Enables the `--trace` per-instruction disassembly, written to stderr.
    pub fn set_trace(&mut self, enabled: bool) {
        self.trace_enabled = enabled;
    }

    /// Compiles `source` and runs it to completion. The value stack is
    /// cleared after any runtime error so a subsequent call starts clean;
    /// globals already defined before the error survive it.
    ///
    /// # Errors
    /// Returns [`InterpretError::Compile`] if `source` fails to compile, or
    /// [`InterpretError::Runtime`] if execution raises a runtime error.
    pub fn interpret(&mut self, source: &str) -> Result<(), InterpretError> {
        let function_ref = quixil_compiler::compile(source, &mut self.heap)?;
        self.stack.push(Value::Object(ObjectRef::Function(function_ref)));
        self.call(function_ref, 0)
            .expect("the freshly compiled script function always has arity 0 and an empty frame stack");

        match self.run() {
            Ok(()) => Ok(()),
            Err(err) => {
                self.stack.clear();
                self.frames.clear();
                Err(InterpretError::Runtime(err))
            }
        }
    }

    fn define_builtin(&mut self, name: &str, func: quixil_core::NativeFn) {
        let name_ref = self.heap.intern_copy(name);
        // Kept on the stack across both allocations, matching the original
        // VM's GC-safety discipline even though this arena never collects mid-run.
        self.stack.push(Value::Object(ObjectRef::Str(name_ref)));
        let builtin_ref = self.heap.new_builtin(name_ref, func);
        self.stack.push(Value::Object(ObjectRef::Builtin(builtin_ref)));
        let hash = self.heap.hash_of(name_ref);
        self.globals.insert(name_ref, hash, *self.stack.last().unwrap());
        self.stack.pop();
        self.stack.pop();
    }

    fn run(&mut self) -> Result<(), RuntimeError> {
        loop {
            if self.trace_enabled {
                self.print_trace();
            }

            let op = OpCode::from_u8(self.read_byte())
                .expect("the compiler never emits a byte that isn't a valid opcode");

            match op {
                OpCode::Constant => {
                    let idx = self.read_byte();
                    let value = self.current_constant(idx);
                    self.push(value)?;
                }
                OpCode::Nil => self.push(Value::Nil)?,
                OpCode::True => self.push(Value::Bool(true))?,
                OpCode::False => self.push(Value::Bool(false))?,
                OpCode::Pop => {
                    self.pop();
                }
                OpCode::Dup => {
                    let top = self.peek(0);
                    self.push(top)?;
                }
                OpCode::Equal => {
                    let b = self.pop();
                    let a = self.pop();
                    self.push(Value::Bool(a == b))?;
                }
                OpCode::Greater => self.numeric_compare(|a, b| a > b)?,
                OpCode::Less => self.numeric_compare(|a, b| a < b)?,
                OpCode::Add => self.add()?,
                OpCode::Subtract => self.numeric_binary(|a, b| a - b)?,
                OpCode::Multiply => self.multiply()?,
                OpCode::Divide => self.numeric_binary(|a, b| a / b)?,
                OpCode::Not => {
                    let v = self.pop();
                    self.push(Value::Bool(v.is_falsey()))?;
                }
                OpCode::Negate => self.negate()?,
                OpCode::Print => {
                    let v = self.pop();
                    self.host.print(&v.display(&self.heap).to_string());
                }
                OpCode::DefineGlobal => {
                    let idx = self.read_byte();
                    let name = self.global_name(idx);
                    let hash = self.heap.hash_of(name);
                    let value = self.peek(0);
                    self.globals.insert(name, hash, value);
                    self.pop();
                }
                OpCode::GetGlobal => {
                    let idx = self.read_byte();
                    let name = self.global_name(idx);
                    let hash = self.heap.hash_of(name);
                    match self.globals.get(name, hash) {
                        Some(value) => self.push(value)?,
                        None => {
                            return Err(self.runtime_error(format!(
                                "Undefined variable '{}'.",
                                self.heap.string(name).bytes
                            )))
                        }
                    }
                }
                OpCode::SetGlobal => {
                    let idx = self.read_byte();
                    let name = self.global_name(idx);
                    let hash = self.heap.hash_of(name);
                    if self.globals.get(name, hash).is_none() {
                        return Err(self.runtime_error(format!(
                            "Undefined variable '{}'.",
                            self.heap.string(name).bytes
                        )));
                    }
                    let value = self.peek(0);
                    self.globals.insert(name, hash, value);
                }
                OpCode::GetLocal => {
                    let slot = self.read_byte();
                    let base = self.frames.last().expect("run() always has an active frame").slots;
                    let value = self.stack[base + slot as usize];
                    self.push(value)?;
                }
                OpCode::SetLocal => {
                    let slot = self.read_byte();
                    let base = self.frames.last().expect("run() always has an active frame").slots;
                    let value = self.peek(0);
                    self.stack[base + slot as usize] = value;
                }
                OpCode::Jump => {
                    let offset = self.read_u16();
                    let idx = self.frames.len() - 1;
                    self.frames[idx].ip += offset as usize;
                }
                OpCode::JumpIfFalse => {
                    let offset = self.read_u16();
                    if self.peek(0).is_falsey() {
                        let idx = self.frames.len() - 1;
                        self.frames[idx].ip += offset as usize;
                    }
                }
                OpCode::Loop => {
                    let offset = self.read_u16();
                    let idx = self.frames.len() - 1;
                    self.frames[idx].ip -= offset as usize;
                }
                OpCode::Call => {
                    let argc = self.read_byte();
                    self.call_value(argc)?;
                }
                OpCode::Return => {
                    let result = self.pop();
                    let frame = self.frames.pop().expect("OP_RETURN only executes with an active frame");
                    if self.frames.is_empty() {
                        self.pop();
                        return Ok(());
                    }
                    self.stack.truncate(frame.slots);
                    self.push(result)?;
                }
            }
        }
    }

    // --- bytecode stream -------------------------------------------------

    fn read_byte(&mut self) -> u8 {
        let idx = self.frames.len() - 1;
        let ip = self.frames[idx].ip;
        let function = self.frames[idx].function;
        let byte = self.heap.function(function).chunk.code[ip];
        self.frames[idx].ip += 1;
        byte
    }

    fn read_u16(&mut self) -> u16 {
        let hi = self.read_byte() as u16;
        let lo = self.read_byte() as u16;
        (hi << 8) | lo
    }

    fn current_constant(&self, idx: u8) -> Value {
        let function = self.frames.last().expect("active frame").function;
        self.heap.function(function).chunk.constants[idx as usize]
    }

    fn global_name(&self, idx: u8) -> StringRef {
        match self.current_constant(idx) {
            Value::Object(ObjectRef::Str(s)) => s,
            other => unreachable!(
                "DEFINE/GET/SET_GLOBAL operand is always an interned name constant, got {other:?}"
            ),
        }
    }

    // --- stack -------------------------------------------------------------

    fn push(&mut self, value: Value) -> Result<(), RuntimeError> {
        if self.stack.len() >= VM_STACK_MAX {
            return Err(self.runtime_error("Stack overflow.".to_string()));
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> Value {
        self.stack.pop().expect("every opcode pops at most what it or an earlier one pushed")
    }

    fn peek(&self, distance: usize) -> Value {
        self.stack[self.stack.len() - 1 - distance]
    }

    // --- arithmetic / comparison --------------------------------------------

    fn negate(&mut self) -> Result<(), RuntimeError> {
        match self.peek(0) {
            Value::Number(n) => {
                self.pop();
                self.push(Value::Number(-n))
            }
            _ => Err(self.runtime_error("Operand must be a number.".to_string())),
        }
    }

    fn numeric_compare(&mut self, op: fn(f64, f64) -> bool) -> Result<(), RuntimeError> {
        let b = self.pop();
        let a = self.pop();
        match (a, b) {
            (Value::Number(x), Value::Number(y)) => self.push(Value::Bool(op(x, y))),
            _ => Err(self.runtime_error("Operands must be numbers.".to_string())),
        }
    }

    fn numeric_binary(&mut self, op: fn(f64, f64) -> f64) -> Result<(), RuntimeError> {
        let b = self.pop();
        let a = self.pop();
        match (a, b) {
            (Value::Number(x), Value::Number(y)) => self.push(Value::Number(op(x, y))),
            _ => Err(self.runtime_error("Operands must be numbers.".to_string())),
        }
    }

    fn add(&mut self) -> Result<(), RuntimeError> {
        let b = self.pop();
        let a = self.pop();
        match (a, b) {
            (Value::Number(x), Value::Number(y)) => self.push(Value::Number(x + y)),
            (Value::Object(ObjectRef::Str(sa)), Value::Object(ObjectRef::Str(sb))) => {
                let r = self.heap.concat_strings(sa, sb);
                self.push(Value::Object(ObjectRef::Str(r)))
            }
            (Value::Object(ObjectRef::Str(sa)), Value::Number(n)) => {
                let rhs = self.heap.intern_take(Value::number_to_concat_string(n));
                let r = self.heap.concat_strings(sa, rhs);
                self.push(Value::Object(ObjectRef::Str(r)))
            }
            (Value::Number(n), Value::Object(ObjectRef::Str(sb))) => {
                let lhs = self.heap.intern_take(Value::number_to_concat_string(n));
                let r = self.heap.concat_strings(lhs, sb);
                self.push(Value::Object(ObjectRef::Str(r)))
            }
            (a, b) if a.is_str() || b.is_str() => {
                let other = if a.is_str() { b } else { a };
                Err(self.runtime_error(format!(
                    "Can only concatenate str (not '{}') to str",
                    other.type_name()
                )))
            }
            (a, b) => Err(self.runtime_error(format!(
                "Unsupported operand types(s) for + : '{}' and '{}'",
                a.type_name(),
                b.type_name()
            ))),
        }
    }

    fn multiply(&mut self) -> Result<(), RuntimeError> {
        let b = self.pop();
        let a = self.pop();
        match (a, b) {
            (Value::Number(x), Value::Number(y)) => self.push(Value::Number(x * y)),
            (Value::Object(ObjectRef::Str(s)), Value::Number(n))
            | (Value::Number(n), Value::Object(ObjectRef::Str(s))) => {
                let r = self.heap.repeat_string(s, n);
                self.push(Value::Object(ObjectRef::Str(r)))
            }
            (a, b) => Err(self.runtime_error(format!(
                "Unsupported operand types(s) for * : '{}' and '{}'",
                a.type_name(),
                b.type_name()
            ))),
        }
    }

    // --- calls ---------------------------------------------------------------

    fn call_value(&mut self, argc: u8) -> Result<(), RuntimeError> {
        match self.peek(argc as usize) {
            Value::Object(ObjectRef::Function(f)) => self.call(f, argc),
            Value::Object(ObjectRef::Builtin(b)) => self.call_builtin(b, argc),
            _ => Err(self.runtime_error("can only call functions and classes".to_string())),
        }
    }

    fn call(&mut self, function_ref: FunctionRef, argc: u8) -> Result<(), RuntimeError> {
        let arity = self.heap.function(function_ref).arity;
        if argc != arity {
            return Err(self.runtime_error(format!("Expected {arity} arguments but got {argc}.")));
        }
        if self.frames.len() >= VM_FRAMES_MAX {
            return Err(self.runtime_error("Stack overflow.".to_string()));
        }
        let slots = self.stack.len() - argc as usize - 1;
        self.frames.push(CallFrame { function: function_ref, ip: 0, slots });
        Ok(())
    }

    fn call_builtin(&mut self, builtin_ref: BuiltinRef, argc: u8) -> Result<(), RuntimeError> {
        let func = self.heap.builtin(builtin_ref).func;
        let args_start = self.stack.len() - argc as usize;
        let args: Vec<Value> = self.stack[args_start..].to_vec();
        match func(&args, &mut self.heap) {
            Ok(result) => {
                self.stack.truncate(args_start - 1);
                self.push(result)
            }
            Err(message) => Err(self.runtime_error(message)),
        }
    }

    // --- errors / tracing ------------------------------------------------------

    fn runtime_error(&self, message: String) -> RuntimeError {
        let trace = self.build_trace();
        let line = self
            .frames
            .last()
            .map(|f| self.heap.function(f.function).chunk.line_at(f.ip.saturating_sub(1)))
            .unwrap_or(-1);
        RuntimeError { line, message, trace }
    }

    fn build_trace(&self) -> Vec<String> {
        self.frames
            .iter()
            .rev()
            .map(|frame| {
                let function = self.heap.function(frame.function);
                let line = function.chunk.line_at(frame.ip.saturating_sub(1));
                let label = match function.name {
                    None => "<script-main>".to_string(),
                    Some(name_ref) => self.heap.string(name_ref).bytes.to_string(),
                };
                format!("[Line {line}] in {label}()")
            })
            .collect()
    }

    fn print_trace(&self) {
        eprintln!("{}", trace::render_stack(&self.stack, &self.heap));
        let frame = self.frames.last().expect("print_trace only runs mid-dispatch");
        let chunk = &self.heap.function(frame.function).chunk;
        let (line, _) = trace::disassemble_instruction(chunk, frame.ip, &self.heap);
        eprintln!("{line}");
    }
}
