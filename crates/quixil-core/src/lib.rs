//! Value/object model, string interning table, and bytecode chunk format
//! shared between the Quixil compiler and VM.

pub mod chunk;
pub mod hash;
pub mod limits;
pub mod object;
pub mod table;
pub mod value;

pub use chunk::{Chunk, ChunkError, OpCode};
pub use object::{Builtin, BuiltinRef, Function, FunctionRef, Heap, NativeFn, ObjectRef, QString, StringRef};
pub use table::Table;
pub use value::Value;
