//! Heap-allocated object kinds and the arena that owns them.
//!
//! The spec describes a singly linked list of objects, walked and freed in
//! one sweep at VM shutdown. Here the list is replaced by three flat arenas
//! (one per object kind) indexed by [`StringRef`]/[`FunctionRef`]/
//! [`BuiltinRef`] — `Copy` indices rather than raw pointers. Dropping the
//! [`Heap`] drops every arena at once, which is the same bulk-release
//! guarantee the linked list gives, without `unsafe`.

use crate::chunk::Chunk;
use crate::hash::fnv1a;
use crate::table::Table;
use crate::value::Value;

/// Index into the heap's string arena. Two strings with equal content always
/// share one `StringRef`, so equality of `StringRef` is equality of content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StringRef(pub u32);

/// Index into the heap's function arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FunctionRef(pub u32);

/// Index into the heap's built-in arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BuiltinRef(pub u32);

/// A reference into one of the heap's object arenas, carried inside [`Value::Object`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectRef {
    Str(StringRef),
    Function(FunctionRef),
    Builtin(BuiltinRef),
}

impl ObjectRef {
    /// The static type name used in runtime error messages and `type_name(v)`.
    #[must_use]
    pub fn type_name(self) -> &'static str {
        match self {
            ObjectRef::Str(_) => "str",
            ObjectRef::Function(_) => "function",
            ObjectRef::Builtin(_) => "builtin",
        }
    }
}

/// An interned, immutable string. `hash` is cached FNV-1a of `bytes`.
#[derive(Debug, Clone)]
pub struct QString {
    pub bytes: Box<str>,
    pub hash: u32,
}

/// A compiled user function: its arity, its own chunk, and an optional name
/// (absent for the implicit top-level script function).
#[derive(Debug, Clone)]
pub struct Function {
    pub arity: u8,
    pub chunk: Chunk,
    pub name: Option<StringRef>,
}

/// A native callable registered into `globals` at VM startup. Built-ins may
/// allocate (e.g. interning the string `input` returns), hence the `&mut Heap`.
pub type NativeFn = fn(&[Value], &mut Heap) -> Result<Value, String>;

#[derive(Clone, Copy)]
pub struct Builtin {
    pub name: StringRef,
    pub func: NativeFn,
}

impl std::fmt::Debug for Builtin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Builtin").field("name", &self.name).finish()
    }
}

/// Owns every heap-allocated object for one VM/compile session, plus the
/// string-interning table. Dropping a `Heap` releases everything it owns.
#[derive(Debug, Default)]
pub struct Heap {
    strings: Vec<QString>,
    functions: Vec<Function>,
    builtins: Vec<Builtin>,
    interner: Table,
}

impl Heap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the canonical [`StringRef`] for `bytes`, interning it if this
    /// is the first time this content has been seen.
    pub fn intern_copy(&mut self, bytes: &str) -> StringRef {
        let hash = fnv1a(bytes.as_bytes());
        if let Some(existing) = self.interner.find_by_bytes(&self.strings, bytes.as_bytes(), hash) {
            return existing;
        }
        self.push_new_string(Box::from(bytes), hash)
    }

    /// Like [`Heap::intern_copy`], but takes ownership of an already-built
    /// `String`. If the content was already interned, `owned` is simply
    /// dropped here instead of being copied twice.
    pub fn intern_take(&mut self, owned: String) -> StringRef {
        let hash = fnv1a(owned.as_bytes());
        if let Some(existing) = self.interner.find_by_bytes(&self.strings, owned.as_bytes(), hash) {
            return existing;
        }
        self.push_new_string(owned.into_boxed_str(), hash)
    }

    fn push_new_string(&mut self, bytes: Box<str>, hash: u32) -> StringRef {
        let index = self.strings.len() as u32;
        self.strings.push(QString { bytes, hash });
        let r = StringRef(index);
        self.interner.insert(r, hash, Value::Nil);
        r
    }

    #[must_use]
    pub fn string(&self, r: StringRef) -> &QString {
        &self.strings[r.0 as usize]
    }

    pub fn new_function(&mut self, arity: u8, chunk: Chunk, name: Option<StringRef>) -> FunctionRef {
        let index = self.functions.len() as u32;
        self.functions.push(Function { arity, chunk, name });
        FunctionRef(index)
    }

    #[must_use]
    pub fn function(&self, r: FunctionRef) -> &Function {
        &self.functions[r.0 as usize]
    }

    pub fn function_mut(&mut self, r: FunctionRef) -> &mut Function {
        &mut self.functions[r.0 as usize]
    }

    pub fn new_builtin(&mut self, name: StringRef, func: NativeFn) -> BuiltinRef {
        let index = self.builtins.len() as u32;
        self.builtins.push(Builtin { name, func });
        BuiltinRef(index)
    }

    #[must_use]
    pub fn builtin(&self, r: BuiltinRef) -> &Builtin {
        &self.builtins[r.0 as usize]
    }

    /// The hash cached for an already-interned string; used by callers (the
    /// globals table, the VM) that hold a [`StringRef`] and need to probe
    /// [`Table`] without recomputing FNV-1a.
    #[must_use]
    pub fn hash_of(&self, r: StringRef) -> u32 {
        self.strings[r.0 as usize].hash
    }

    /// `OP_ADD`'s `String + String` overload: interned concatenation.
    pub fn concat_strings(&mut self, a: StringRef, b: StringRef) -> StringRef {
        let mut buf = String::with_capacity(self.string(a).bytes.len() + self.string(b).bytes.len());
        buf.push_str(&self.string(a).bytes);
        buf.push_str(&self.string(b).bytes);
        self.intern_take(buf)
    }

    /// `OP_MULTIPLY`'s `String * Number` overload. Non-positive counts and an
    /// empty source string both yield the empty string.
    pub fn repeat_string(&mut self, s: StringRef, count: f64) -> StringRef {
        let count = count as i64;
        if count <= 0 || self.string(s).bytes.is_empty() {
            return self.intern_copy("");
        }
        let repeated = self.string(s).bytes.repeat(count as usize);
        self.intern_take(repeated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_same_content_yields_same_ref() {
        let mut heap = Heap::new();
        let a = heap.intern_copy("hello");
        let b = heap.intern_copy("hello");
        assert_eq!(a, b);
    }

    #[test]
    fn interning_distinct_content_yields_distinct_refs() {
        let mut heap = Heap::new();
        let a = heap.intern_copy("hello");
        let b = heap.intern_copy("world");
        assert_ne!(a, b);
    }

    #[test]
    fn intern_take_dedupes_against_copied_content() {
        let mut heap = Heap::new();
        let a = heap.intern_copy("same");
        let b = heap.intern_take(String::from("same"));
        assert_eq!(a, b);
    }

    #[test]
    fn concat_strings_interns_the_result() {
        let mut heap = Heap::new();
        let a = heap.intern_copy("foo");
        let b = heap.intern_copy("bar");
        let c = heap.concat_strings(a, b);
        assert_eq!(&*heap.string(c).bytes, "foobar");
    }

    #[test]
    fn repeat_string_non_positive_count_is_empty() {
        let mut heap = Heap::new();
        let s = heap.intern_copy("ab");
        let r = heap.repeat_string(s, 0.0);
        assert_eq!(&*heap.string(r).bytes, "");
        let r = heap.repeat_string(s, -1.0);
        assert_eq!(&*heap.string(r).bytes, "");
    }

    #[test]
    fn repeat_string_positive_count() {
        let mut heap = Heap::new();
        let s = heap.intern_copy("ab");
        let r = heap.repeat_string(s, 3.0);
        assert_eq!(&*heap.string(r).bytes, "ababab");
    }

    #[test]
    fn object_ref_type_names_match_spec() {
        assert_eq!(ObjectRef::Str(StringRef(0)).type_name(), "str");
        assert_eq!(ObjectRef::Function(FunctionRef(0)).type_name(), "function");
        assert_eq!(ObjectRef::Builtin(BuiltinRef(0)).type_name(), "builtin");
    }
}
