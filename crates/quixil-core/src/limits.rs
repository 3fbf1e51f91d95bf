//! Static limits shared by the compiler and the VM, collected in one place
//! so the two stay in lockstep (a local slot index emitted by the compiler
//! must always fit the VM's frame layout, etc).

/// Maximum live call frames; mirrors `VM_FRAMES_MAX` in the original VM.
pub const VM_FRAMES_MAX: usize = 64;

/// One frame's worth of stack slots (locals + temporaries), matching `UINT8_COUNT`.
pub const FRAME_SLOTS: usize = 256;

/// Total value-stack capacity.
pub const VM_STACK_MAX: usize = VM_FRAMES_MAX * FRAME_SLOTS;

/// Maximum locals (including the implicit callee slot) in one function.
pub const MAX_LOCALS: usize = FRAME_SLOTS;

/// Maximum parameters in a function definition / arguments in a call.
pub const MAX_ARITY: usize = 255;

/// Maximum `when` cases, not counting `else`.
pub const MAX_WHEN_CASES: usize = 256;

/// Maximum nesting depth of `$( ... )` template interpolations.
pub const MAX_TEMPLATE_INTERPOLATION_NESTING: usize = 8;
