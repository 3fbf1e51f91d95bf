//! Per-instruction disassembly used by the VM's `--trace` mode. Mirrors the
//! classic "disassemble one instruction" shape: given a chunk and an offset,
//! render the instruction and return the offset of the next one.

use quixil_core::{Chunk, Heap, OpCode, Value};

/// Renders the instruction at `offset` and returns the offset of the next one.
#[must_use]
pub fn disassemble_instruction(chunk: &Chunk, offset: usize, heap: &Heap) -> (String, usize) {
    let line_marker = if offset > 0 && chunk.line_at(offset) == chunk.line_at(offset - 1) {
        "   |".to_string()
    } else {
        format!("{:4}", chunk.line_at(offset))
    };
    let prefix = format!("{offset:04} {line_marker} ");

    let Some(op) = OpCode::from_u8(chunk.code[offset]) else {
        return (format!("{prefix}Unknown opcode {}", chunk.code[offset]), offset + 1);
    };

    match op {
        OpCode::Constant => constant_instr(&prefix, "OP_CONSTANT", chunk, offset, heap),
        OpCode::Nil => simple_instr(&prefix, "OP_NIL", offset),
        OpCode::True => simple_instr(&prefix, "OP_TRUE", offset),
        OpCode::False => simple_instr(&prefix, "OP_FALSE", offset),
        OpCode::Pop => simple_instr(&prefix, "OP_POP", offset),
        OpCode::Dup => simple_instr(&prefix, "OP_DUP", offset),
        OpCode::Equal => simple_instr(&prefix, "OP_EQUAL", offset),
        OpCode::Greater => simple_instr(&prefix, "OP_GREATER", offset),
        OpCode::Less => simple_instr(&prefix, "OP_LESS", offset),
        OpCode::Add => simple_instr(&prefix, "OP_ADD", offset),
        OpCode::Subtract => simple_instr(&prefix, "OP_SUBTRACT", offset),
        OpCode::Multiply => simple_instr(&prefix, "OP_MULTIPLY", offset),
        OpCode::Divide => simple_instr(&prefix, "OP_DIVIDE", offset),
        OpCode::Not => simple_instr(&prefix, "OP_NOT", offset),
        OpCode::Negate => simple_instr(&prefix, "OP_NEGATE", offset),
        OpCode::Print => simple_instr(&prefix, "OP_PRINT", offset),
        OpCode::DefineGlobal => constant_instr(&prefix, "OP_DEFINE_GLOBAL", chunk, offset, heap),
        OpCode::GetGlobal => constant_instr(&prefix, "OP_GET_GLOBAL", chunk, offset, heap),
        OpCode::SetGlobal => constant_instr(&prefix, "OP_SET_GLOBAL", chunk, offset, heap),
        OpCode::GetLocal => byte_instr(&prefix, "OP_GET_LOCAL", chunk, offset),
        OpCode::SetLocal => byte_instr(&prefix, "OP_SET_LOCAL", chunk, offset),
        OpCode::Call => byte_instr(&prefix, "OP_CALL", chunk, offset),
        OpCode::Jump => jump_instr(&prefix, "OP_JUMP", chunk, offset, 1),
        OpCode::JumpIfFalse => jump_instr(&prefix, "OP_JUMP_IF_FALSE", chunk, offset, 1),
        OpCode::Loop => jump_instr(&prefix, "OP_LOOP", chunk, offset, -1),
        OpCode::Return => simple_instr(&prefix, "OP_RETURN", offset),
    }
}

fn simple_instr(prefix: &str, name: &str, offset: usize) -> (String, usize) {
    (format!("{prefix}{name}"), offset + 1)
}

fn byte_instr(prefix: &str, name: &str, chunk: &Chunk, offset: usize) -> (String, usize) {
    let slot = chunk.code[offset + 1];
    (format!("{prefix}{name:<16} {slot:4}"), offset + 2)
}

fn constant_instr(prefix: &str, name: &str, chunk: &Chunk, offset: usize, heap: &Heap) -> (String, usize) {
    let idx = chunk.code[offset + 1];
    let value = chunk.constants[idx as usize];
    (
        format!("{prefix}{name:<16} {idx:4} '{}'", value.display(heap)),
        offset + 2,
    )
}

fn jump_instr(prefix: &str, name: &str, chunk: &Chunk, offset: usize, sign: i64) -> (String, usize) {
    let hi = chunk.code[offset + 1] as u16;
    let lo = chunk.code[offset + 2] as u16;
    let jump = ((hi << 8) | lo) as i64;
    let target = offset as i64 + 3 + sign * jump;
    (format!("{prefix}{name:<16} {offset:4} -> {target}"), offset + 3)
}

/// Renders the live value stack for `--trace`, innermost (top) entry last.
#[must_use]
pub fn render_stack(stack: &[Value], heap: &Heap) -> String {
    let mut out = String::from("          ");
    for value in stack {
        out.push_str(&format!("[ {} ]", value.display(heap)));
    }
    out
}
