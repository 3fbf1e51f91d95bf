//! The Pratt parser. Single pass: tokens come from [`Scanner`] on demand and
//! bytecode is emitted directly into the [`Chunk`] of whichever function is
//! currently being compiled — there is no intermediate AST.

use quixil_core::limits::{MAX_ARITY, MAX_LOCALS, MAX_WHEN_CASES};
use quixil_core::object::{FunctionRef, ObjectRef};
use quixil_core::{Chunk, Heap, OpCode, Value};

use crate::error::{CompileError, Diagnostic};
use crate::precedence::Precedence;
use crate::scanner::Scanner;
use crate::token::{Token, TokenKind};

/// Whether the function being compiled is the implicit top-level script or
/// a user-defined `function`. `return;`/`return expr;` outside `Main` is an
/// error at top level and legal everywhere else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    Main,
    Generic,
}

/// One entry in a function's local-variable stack. `depth == -1` means
/// "declared but not yet initialized" (see [`Compiler::resolve_local`]).
struct Local<'src> {
    name: &'src str,
    depth: i32,
}

/// Per-function compilation state. Functions in Quixil capture nothing from
/// enclosing scopes, so each frame's locals are entirely self-contained;
/// nested `function` declarations push a new frame rather than linking to
/// an enclosing one.
struct FunctionScope<'src> {
    chunk: Chunk,
    arity: u8,
    name: Option<quixil_core::object::StringRef>,
    kind: FunctionKind,
    locals: Vec<Local<'src>>,
    scope_depth: i32,
}

impl<'src> FunctionScope<'src> {
    fn new(kind: FunctionKind, name: Option<quixil_core::object::StringRef>) -> Self {
        // Slot 0 is reserved for the callee itself; the empty name can never
        // collide with a real identifier (the scanner requires `[A-Za-z_]`).
        Self {
            chunk: Chunk::new(),
            arity: 0,
            name,
            kind,
            locals: vec![Local { name: "", depth: 0 }],
            scope_depth: 0,
        }
    }
}

type ParseFn<'src, 'heap> = fn(&mut Compiler<'src, 'heap>, bool);

struct ParseRule<'src, 'heap> {
    prefix: Option<ParseFn<'src, 'heap>>,
    infix: Option<ParseFn<'src, 'heap>>,
    precedence: Precedence,
}

fn get_rule<'src, 'heap>(kind: TokenKind) -> ParseRule<'src, 'heap> {
    use TokenKind::{
        And, Arrow, Bang, BangEqual, Class, Comma, Dot, Else, Eof, Equal, EqualEqual, Error,
        False, For, Function, Greater, GreaterEqual, Identifier, If, Interop, LeftBrace,
        LeftParen, Less, LessEqual, Minus, Nil, Number, Or, Plus, Print, Return, RightBrace,
        RightParen, Semicolon, Slash, Star, String, Super, This, True, Var, When, While,
    };
    let (prefix, infix, precedence): (
        Option<ParseFn<'src, 'heap>>,
        Option<ParseFn<'src, 'heap>>,
        Precedence,
    ) = match kind {
        LeftParen => (Some(Compiler::grouping), Some(Compiler::call), Precedence::Call),
        RightParen | LeftBrace | RightBrace | Comma | Dot | Semicolon | Arrow => {
            (None, None, Precedence::None)
        }
        Minus => (Some(Compiler::unary), Some(Compiler::binary), Precedence::Term),
        Plus => (None, Some(Compiler::binary), Precedence::Term),
        Slash | Star => (None, Some(Compiler::binary), Precedence::Factor),
        Bang => (Some(Compiler::unary), None, Precedence::None),
        BangEqual | EqualEqual => (None, Some(Compiler::binary), Precedence::Equality),
        Greater | GreaterEqual | Less | LessEqual => {
            (None, Some(Compiler::binary), Precedence::Comparison)
        }
        Equal => (None, None, Precedence::None),
        Identifier => (Some(Compiler::variable), None, Precedence::None),
        String => (Some(Compiler::string_literal), None, Precedence::None),
        Interop => (Some(Compiler::template_string), None, Precedence::None),
        Number => (Some(Compiler::number), None, Precedence::None),
        And => (None, Some(Compiler::and_), Precedence::And),
        Or => (None, Some(Compiler::or_), Precedence::Or),
        False | True | Nil => (Some(Compiler::literal), None, Precedence::None),
        Class | Else | For | Function | If | Print | Return | Super | This | Var | While
        | When | Error | Eof => (None, None, Precedence::None),
    };
    ParseRule { prefix, infix, precedence }
}

/// The whole compiler: parser cursor plus a stack of [`FunctionScope`]s, one
/// per function currently being compiled (innermost last).
pub struct Compiler<'src, 'heap> {
    scanner: Scanner<'src>,
    heap: &'heap mut Heap,
    previous: Token<'src>,
    current: Token<'src>,
    had_error: bool,
    panic_mode: bool,
    diagnostics: Vec<Diagnostic>,
    frames: Vec<FunctionScope<'src>>,
}

/// Compiles one source unit into a top-level `Function` (the implicit
/// script body). Returns every diagnostic collected if compilation failed;
/// no bytecode is considered valid in that case.
pub fn compile(source: &'_ str, heap: &mut Heap) -> Result<FunctionRef, CompileError> {
    let mut compiler = Compiler::new(source, heap);
    compiler.begin_frame(FunctionKind::Main, None);
    compiler.advance();
    while !compiler.check(TokenKind::Eof) {
        compiler.declaration();
    }
    compiler.consume(TokenKind::Eof, "Expect end of expression.");
    let function_ref = compiler.end_frame();

    if compiler.had_error {
        Err(CompileError { diagnostics: compiler.diagnostics })
    } else {
        tracing::info!(function = ?function_ref, "compilation finished");
        Ok(function_ref)
    }
}

impl<'src, 'heap> Compiler<'src, 'heap> {
    fn new(source: &'src str, heap: &'heap mut Heap) -> Self {
        let placeholder = Token { kind: TokenKind::Eof, lexeme: "", line: 0 };
        Self {
            scanner: Scanner::new(source),
            heap,
            previous: placeholder,
            current: placeholder,
            had_error: false,
            panic_mode: false,
            diagnostics: Vec::new(),
            frames: Vec::new(),
        }
    }

    // ---- token plumbing -------------------------------------------------

    fn advance(&mut self) {
        self.previous = self.current;
        loop {
            self.current = self.scanner.scan_token();
            if self.current.kind != TokenKind::Error {
                break;
            }
            let message = self.current.lexeme.to_string();
            self.error_at_current(&message);
        }
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn match_token(&mut self, kind: TokenKind) -> bool {
        if !self.check(kind) {
            return false;
        }
        self.advance();
        true
    }

    fn consume(&mut self, kind: TokenKind, message: &str) {
        if self.current.kind == kind {
            self.advance();
            return;
        }
        self.error_at_current(message);
    }

    fn error_at(&mut self, token: Token<'src>, message: &str) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        self.had_error = true;
        let rendered = match token.kind {
            TokenKind::Eof => format!("{message} at end"),
            TokenKind::Error => message.to_string(),
            _ => format!("{message} at '{}'", token.lexeme),
        };
        self.diagnostics.push(Diagnostic { line: token.line, message: rendered });
    }

    fn error(&mut self, message: &str) {
        let token = self.previous;
        self.error_at(token, message);
    }

    fn error_at_current(&mut self, message: &str) {
        let token = self.current;
        self.error_at(token, message);
    }

    /// Consumes tokens until after a `;` or before a statement-starting
    /// keyword, so one compile error doesn't cascade into a flood of them.
    fn synchronize(&mut self) {
        self.panic_mode = false;
        while self.current.kind != TokenKind::Eof {
            if self.previous.kind == TokenKind::Semicolon {
                return;
            }
            match self.current.kind {
                TokenKind::Class
                | TokenKind::Function
                | TokenKind::Var
                | TokenKind::For
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Print
                | TokenKind::Return => return,
                _ => self.advance(),
            }
        }
    }

    // ---- frame/chunk plumbing --------------------------------------------

    fn current_frame(&self) -> &FunctionScope<'src> {
        self.frames.last().expect("at least one active compiler frame")
    }

    fn current_frame_mut(&mut self) -> &mut FunctionScope<'src> {
        self.frames.last_mut().expect("at least one active compiler frame")
    }

    fn current_chunk(&self) -> &Chunk {
        &self.current_frame().chunk
    }

    fn current_chunk_mut(&mut self) -> &mut Chunk {
        &mut self.current_frame_mut().chunk
    }

    fn begin_frame(&mut self, kind: FunctionKind, name: Option<quixil_core::object::StringRef>) {
        self.frames.push(FunctionScope::new(kind, name));
    }

    fn end_frame(&mut self) -> FunctionRef {
        self.emit_return();
        let frame = self.frames.pop().expect("ending a frame that was begun");
        tracing::debug!(
            arity = frame.arity,
            code_len = frame.chunk.code.len(),
            constants = frame.chunk.constants.len(),
            "compiled function body"
        );
        self.heap.new_function(frame.arity, frame.chunk, frame.name)
    }

    fn begin_scope(&mut self) {
        self.current_frame_mut().scope_depth += 1;
    }

    fn end_scope(&mut self) {
        self.current_frame_mut().scope_depth -= 1;
        let scope_depth = self.current_frame().scope_depth;
        while let Some(local) = self.current_frame().locals.last() {
            if local.depth > scope_depth {
                self.emit_op(OpCode::Pop);
                self.current_frame_mut().locals.pop();
            } else {
                break;
            }
        }
    }

    // ---- emission ---------------------------------------------------------

    fn emit_byte(&mut self, byte: u8) {
        let line = self.previous.line;
        self.current_chunk_mut().write(byte, line);
    }

    fn emit_op(&mut self, op: OpCode) {
        self.emit_byte(op as u8);
    }

    fn emit_return(&mut self) {
        self.emit_op(OpCode::Nil);
        self.emit_op(OpCode::Return);
    }

    fn add_constant(&mut self, value: Value) -> u8 {
        match self.current_chunk_mut().add_constant(value) {
            Ok(idx) => idx,
            Err(_) => {
                self.error("Too many constants in one chunk.");
                0
            }
        }
    }

    fn identifier_constant(&mut self, name: &str) -> u8 {
        let sref = self.heap.intern_copy(name);
        self.add_constant(Value::Object(ObjectRef::Str(sref)))
    }

    fn emit_constant_string(&mut self, text: &str) {
        let sref = self.heap.intern_copy(text);
        let idx = self.add_constant(Value::Object(ObjectRef::Str(sref)));
        self.emit_op(OpCode::Constant);
        self.emit_byte(idx);
    }

    fn emit_jump(&mut self, op: OpCode) -> usize {
        let line = self.previous.line;
        self.current_chunk_mut().emit_jump(op, line)
    }

    fn patch_jump(&mut self, offset: usize) {
        if self.current_chunk_mut().patch_jump(offset).is_err() {
            self.error("Too much code to jump over.");
        }
    }

    fn emit_loop(&mut self, loop_start: usize) {
        let line = self.previous.line;
        if self.current_chunk_mut().emit_loop(loop_start, line).is_err() {
            self.error("Loop body too large.");
        }
    }

    // ---- variables ----------------------------------------------------

    fn declare_variable(&mut self, name: &'src str) {
        let scope_depth = self.current_frame().scope_depth;
        if scope_depth == 0 {
            return;
        }
        let mut duplicate = false;
        {
            let frame = self.current_frame();
            for local in frame.locals.iter().rev() {
                if local.depth != -1 && local.depth < scope_depth {
                    break;
                }
                if local.name == name {
                    duplicate = true;
                    break;
                }
            }
        }
        if duplicate {
            self.error("Already a variable with this name in this scope.");
        }
        self.add_local(name);
    }

    fn add_local(&mut self, name: &'src str) {
        if self.current_frame().locals.len() >= MAX_LOCALS {
            self.error("Too many local variables in function.");
            return;
        }
        self.current_frame_mut().locals.push(Local { name, depth: -1 });
    }

    /// Scans the current frame's locals innermost-first. Returns an error
    /// diagnostic (but still a slot) if the match is `depth == -1`, i.e. a
    /// variable referring to itself inside its own initializer.
    fn resolve_local(&mut self, name: &str) -> Option<usize> {
        let frame = self.current_frame();
        let mut found: Option<(usize, i32)> = None;
        for i in (0..frame.locals.len()).rev() {
            if frame.locals[i].name == name {
                found = Some((i, frame.locals[i].depth));
                break;
            }
        }
        let (idx, depth) = found?;
        if depth == -1 {
            self.error("Can't read local variable in its own initializer.");
        }
        Some(idx)
    }

    fn parse_variable(&mut self, message: &str) -> (u8, &'src str) {
        self.consume(TokenKind::Identifier, message);
        let name = self.previous.lexeme;
        self.declare_variable(name);
        if self.current_frame().scope_depth > 0 {
            return (0, name);
        }
        (self.identifier_constant(name), name)
    }

    fn mark_initialized(&mut self) {
        let scope_depth = self.current_frame().scope_depth;
        if scope_depth == 0 {
            return;
        }
        if let Some(local) = self.current_frame_mut().locals.last_mut() {
            local.depth = scope_depth;
        }
    }

    fn define_variable(&mut self, global: u8) {
        if self.current_frame().scope_depth > 0 {
            self.mark_initialized();
            return;
        }
        self.emit_op(OpCode::DefineGlobal);
        self.emit_byte(global);
    }

    fn named_variable(&mut self, name: &str, can_assign: bool) {
        let (get_op, set_op, arg) = if let Some(slot) = self.resolve_local(name) {
            (OpCode::GetLocal, OpCode::SetLocal, slot as u8)
        } else {
            let idx = self.identifier_constant(name);
            (OpCode::GetGlobal, OpCode::SetGlobal, idx)
        };

        if can_assign && self.match_token(TokenKind::Equal) {
            self.expression();
            self.emit_op(set_op);
            self.emit_byte(arg);
        } else {
            self.emit_op(get_op);
            self.emit_byte(arg);
        }
    }

    // ---- expressions -----------------------------------------------------

    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();
        let prefix_rule = get_rule::<'src, 'heap>(self.previous.kind).prefix;
        let Some(prefix_rule) = prefix_rule else {
            self.error("Expect expression.");
            return;
        };
        let can_assign = precedence <= Precedence::Conditional;
        prefix_rule(self, can_assign);

        while precedence <= get_rule::<'src, 'heap>(self.current.kind).precedence {
            self.advance();
            let infix_rule = get_rule::<'src, 'heap>(self.previous.kind)
                .infix
                .expect("a token with a precedence in the loop condition has an infix rule");
            infix_rule(self, can_assign);
        }

        if can_assign && self.match_token(TokenKind::Equal) {
            self.error("Invalid assignment target.");
        }
    }

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    fn number(&mut self, _can_assign: bool) {
        let value = self.previous.lexeme.parse::<f64>().unwrap_or_else(|_| {
            debug_assert!(false, "scanner guarantees a valid numeric lexeme");
            0.0
        });
        let idx = self.add_constant(Value::Number(value));
        self.emit_op(OpCode::Constant);
        self.emit_byte(idx);
    }

    fn string_literal(&mut self, _can_assign: bool) {
        let lexeme = self.previous.lexeme;
        let content = &lexeme[1..lexeme.len() - 1];
        self.emit_constant_string(content);
    }

    /// A template string's leading segment arrived as `TokenKind::Interop`;
    /// subsequent segments alternate with parsed expressions until a final
    /// plain `String` token closes it. See the module docs for the exact
    /// bytecode shape this emits.
    fn template_string(&mut self, _can_assign: bool) {
        self.emit_constant_string("");

        let mut first_segment = true;
        loop {
            let lexeme = self.previous.lexeme;
            // The very first Interop token carries the opening quote; later
            // ones resume right after the previous hole's closing paren.
            let start = if first_segment { 1 } else { 0 };
            let segment = &lexeme[start..lexeme.len() - 2]; // strip trailing "$("
            self.emit_constant_string(segment);
            self.emit_op(OpCode::Add);

            self.expression();
            self.emit_op(OpCode::Add);
            first_segment = false;

            if self.check(TokenKind::Interop) {
                self.advance();
                continue;
            }
            self.consume(TokenKind::String, "Expect string continuation after template expression.");
            let tail_lexeme = self.previous.lexeme;
            let tail = &tail_lexeme[0..tail_lexeme.len() - 1]; // strip trailing quote
            self.emit_constant_string(tail);
            self.emit_op(OpCode::Add);
            break;
        }
    }

    fn literal(&mut self, _can_assign: bool) {
        match self.previous.kind {
            TokenKind::False => self.emit_op(OpCode::False),
            TokenKind::True => self.emit_op(OpCode::True),
            TokenKind::Nil => self.emit_op(OpCode::Nil),
            _ => unreachable!("literal() only installed for false/true/nil"),
        }
    }

    fn grouping(&mut self, _can_assign: bool) {
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after expression.");
    }

    fn unary(&mut self, _can_assign: bool) {
        let operator = self.previous.kind;
        self.parse_precedence(Precedence::Unary);
        match operator {
            TokenKind::Bang => self.emit_op(OpCode::Not),
            TokenKind::Minus => self.emit_op(OpCode::Negate),
            _ => unreachable!("unary() only installed for !/-"),
        }
    }

    fn binary(&mut self, _can_assign: bool) {
        let operator = self.previous.kind;
        let rule_precedence = get_rule::<'src, 'heap>(operator).precedence;
        self.parse_precedence(rule_precedence.next());
        match operator {
            TokenKind::BangEqual => {
                self.emit_op(OpCode::Equal);
                self.emit_op(OpCode::Not);
            }
            TokenKind::EqualEqual => self.emit_op(OpCode::Equal),
            TokenKind::Greater => self.emit_op(OpCode::Greater),
            TokenKind::GreaterEqual => {
                self.emit_op(OpCode::Less);
                self.emit_op(OpCode::Not);
            }
            TokenKind::Less => self.emit_op(OpCode::Less),
            TokenKind::LessEqual => {
                self.emit_op(OpCode::Greater);
                self.emit_op(OpCode::Not);
            }
            TokenKind::Plus => self.emit_op(OpCode::Add),
            TokenKind::Minus => self.emit_op(OpCode::Subtract),
            TokenKind::Star => self.emit_op(OpCode::Multiply),
            TokenKind::Slash => self.emit_op(OpCode::Divide),
            _ => unreachable!("binary() only installed for the operators above"),
        }
    }

    fn and_(&mut self, _can_assign: bool) {
        let end_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::And);
        self.patch_jump(end_jump);
    }

    fn or_(&mut self, _can_assign: bool) {
        let else_jump = self.emit_jump(OpCode::JumpIfFalse);
        let end_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(else_jump);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::Or);
        self.patch_jump(end_jump);
    }

    fn variable(&mut self, can_assign: bool) {
        let name = self.previous.lexeme;
        self.named_variable(name, can_assign);
    }

    fn call(&mut self, _can_assign: bool) {
        let arg_count = self.argument_list();
        self.emit_op(OpCode::Call);
        self.emit_byte(arg_count);
    }

    fn argument_list(&mut self) -> u8 {
        let mut count: u32 = 0;
        if !self.check(TokenKind::RightParen) {
            loop {
                self.expression();
                if count == 255 {
                    self.error("Can't have more than 255 arguments.");
                }
                count += 1;
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after arguments.");
        count.min(255) as u8
    }

    // ---- statements & declarations ----------------------------------------

    fn declaration(&mut self) {
        if self.match_token(TokenKind::Function) {
            self.function_declaration();
        } else if self.match_token(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.statement();
        }

        if self.panic_mode {
            self.synchronize();
        }
    }

    fn function_declaration(&mut self) {
        let (global, name) = self.parse_variable("Expect function name.");
        self.mark_initialized();
        self.function(name);
        self.define_variable(global);
    }

    fn function(&mut self, name: &str) {
        let name_ref = self.heap.intern_copy(name);
        self.begin_frame(FunctionKind::Generic, Some(name_ref));
        self.begin_scope();

        self.consume(TokenKind::LeftParen, "Expect '(' after function name.");
        if !self.check(TokenKind::RightParen) {
            loop {
                if self.current_frame().arity as usize >= MAX_ARITY {
                    self.error_at_current("Can't have more than 255 parameters.");
                } else {
                    self.current_frame_mut().arity += 1;
                }
                let (param_global, _) = self.parse_variable("Expect parameter name.");
                self.define_variable(param_global);
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after parameters.");
        self.consume(TokenKind::LeftBrace, "Expect '{' before function body.");
        self.block();

        let function_ref = self.end_frame();
        let idx = self.add_constant(Value::Object(ObjectRef::Function(function_ref)));
        self.emit_op(OpCode::Constant);
        self.emit_byte(idx);
    }

    fn var_declaration(&mut self) {
        let (global, _) = self.parse_variable("Expect variable name.");
        if self.match_token(TokenKind::Equal) {
            self.expression();
        } else {
            self.emit_op(OpCode::Nil);
        }
        self.consume(TokenKind::Semicolon, "Expect ';' after variable declaration.");
        self.define_variable(global);
    }

    fn statement(&mut self) {
        if self.match_token(TokenKind::Print) {
            self.print_statement();
        } else if self.match_token(TokenKind::If) {
            self.if_statement();
        } else if self.match_token(TokenKind::While) {
            self.while_statement();
        } else if self.match_token(TokenKind::When) {
            self.when_statement();
        } else if self.match_token(TokenKind::Return) {
            self.return_statement();
        } else if self.match_token(TokenKind::LeftBrace) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else {
            self.expression_statement();
        }
    }

    fn block(&mut self) {
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.declaration();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after block.");
    }

    fn print_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after value.");
        self.emit_op(OpCode::Print);
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after expression.");
        self.emit_op(OpCode::Pop);
    }

    fn if_statement(&mut self) {
        self.consume(TokenKind::LeftParen, "Expect '(' after 'if'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let then_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();

        let else_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(then_jump);
        self.emit_op(OpCode::Pop);

        if self.match_token(TokenKind::Else) {
            self.statement();
        }
        self.patch_jump(else_jump);
    }

    fn while_statement(&mut self) {
        let loop_start = self.current_chunk().code.len();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'while'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let exit_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();
        self.emit_loop(loop_start);

        self.patch_jump(exit_jump);
        self.emit_op(OpCode::Pop);
    }

    /// `when (expr) { case -> stmt ... else -> stmt }`. The scrutinee stays
    /// on the stack across every case comparison (duplicated via `OP_DUP`,
    /// compared via `OP_EQUAL`) and is popped once, at the very end, whether
    /// a case matched or control fell through to `else`. A case's body is
    /// not an implicit block: bare statements accumulate after its `->`
    /// until the next case value, `else`, or the closing `}` is seen.
    fn when_statement(&mut self) {
        self.consume(TokenKind::LeftParen, "Expect '(' after 'when'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after when subject.");
        self.consume(TokenKind::LeftBrace, "Expect '{' before when body.");

        // 0: before any case; 1: inside a case, before 'else'; 2: after 'else'.
        let mut state: u8 = 0;
        let mut case_ends: Vec<usize> = Vec::new();
        let mut case_count: usize = 0;
        let mut prev_case_skip: Option<usize> = None;

        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            let is_case_value = self.is_when_case_start();
            if is_case_value || self.check(TokenKind::Else) {
                if state == 2 {
                    self.error_at_current("Can't have another case or else after the else case.");
                }
                if state == 1 {
                    case_ends.push(self.emit_jump(OpCode::Jump));
                    if let Some(skip) = prev_case_skip {
                        self.patch_jump(skip);
                    }
                    self.emit_op(OpCode::Pop);
                }

                if is_case_value {
                    state = 1;
                    if case_count >= MAX_WHEN_CASES {
                        self.error_at_current("Too many cases in 'when'.");
                    }
                    case_count += 1;
                    self.emit_op(OpCode::Dup);
                    self.when_case_value();
                    self.consume(TokenKind::Arrow, "Expect '->' after case value.");
                    self.emit_op(OpCode::Equal);
                    prev_case_skip = Some(self.emit_jump(OpCode::JumpIfFalse));
                    self.emit_op(OpCode::Pop);
                } else {
                    self.advance(); // consume 'else'
                    state = 2;
                    self.consume(TokenKind::Arrow, "Expect '->' after 'else'.");
                    prev_case_skip = None;
                }
            } else {
                if state == 0 {
                    self.error_at_current("Can't have statements before any case in 'when'.");
                }
                self.statement();
            }
        }

        if state == 1 {
            if let Some(skip) = prev_case_skip {
                self.patch_jump(skip);
            }
            self.emit_op(OpCode::Pop);
        }

        for jump in case_ends {
            self.patch_jump(jump);
        }

        self.consume(TokenKind::RightBrace, "Expect '}' after when body.");
        self.emit_op(OpCode::Pop);
    }

    /// Whether the current token can open a new `when` case. `case :=
    /// (literal | 'else') '->' statement` restricts case values to
    /// `true`/`false`/`nil`/number/string literals, mirroring the original's
    /// `IS_NEXT_VALUE()` gate; anything else here is parsed as a case-body
    /// statement instead.
    fn is_when_case_start(&self) -> bool {
        matches!(
            self.current.kind,
            TokenKind::True | TokenKind::False | TokenKind::Nil | TokenKind::Number | TokenKind::String
        )
    }

    /// Compiles one `when` case value. Deliberately not routed through
    /// `parse_precedence`: only the literal productions the grammar allows
    /// are accepted, so `1 + 2 -> ...` or a bare identifier is a compile
    /// error rather than being parsed as a general expression.
    fn when_case_value(&mut self) {
        match self.current.kind {
            TokenKind::Number => {
                self.advance();
                self.number(false);
            }
            TokenKind::String => {
                self.advance();
                self.string_literal(false);
            }
            TokenKind::True | TokenKind::False | TokenKind::Nil => {
                self.advance();
                self.literal(false);
            }
            _ => self.error_at_current("Expect a literal case value (true, false, nil, a number, or a string)."),
        }
    }

    fn return_statement(&mut self) {
        if self.current_frame().kind == FunctionKind::Main {
            self.error("Can't return from top-level code.");
        }
        if self.match_token(TokenKind::Semicolon) {
            self.emit_return();
        } else {
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after return value.");
            self.emit_op(OpCode::Return);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quixil_core::object::ObjectRef;

    fn compiled(source: &str) -> (Chunk, Heap) {
        let mut heap = Heap::new();
        let function_ref = compile(source, &mut heap).expect("source should compile");
        let chunk = heap.function(function_ref).chunk.clone();
        (chunk, heap)
    }

    fn compile_err(source: &str) -> CompileError {
        let mut heap = Heap::new();
        compile(source, &mut heap).expect_err("source should fail to compile")
    }

    #[test]
    fn empty_program_ends_in_nil_return() {
        let (chunk, _) = compiled("");
        assert_eq!(chunk.code, vec![OpCode::Nil as u8, OpCode::Return as u8]);
    }

    #[test]
    fn number_literal_emits_constant() {
        let (chunk, _) = compiled("1;");
        assert_eq!(
            chunk.code,
            vec![OpCode::Constant as u8, 0, OpCode::Pop as u8, OpCode::Nil as u8, OpCode::Return as u8]
        );
        assert_eq!(chunk.constants[0], Value::Number(1.0));
    }

    #[test]
    fn precedence_multiplies_before_adding() {
        // `1 + 2 * 3` must compile 2*3 first: CONST 1, CONST 2, CONST 3, MULTIPLY, ADD.
        let (chunk, _) = compiled("print 1 + 2 * 3;");
        assert_eq!(
            chunk.code,
            vec![
                OpCode::Constant as u8, 0,
                OpCode::Constant as u8, 1,
                OpCode::Constant as u8, 2,
                OpCode::Multiply as u8,
                OpCode::Add as u8,
                OpCode::Print as u8,
                OpCode::Nil as u8,
                OpCode::Return as u8,
            ]
        );
    }

    #[test]
    fn unary_minus_binds_tighter_than_multiply() {
        let (chunk, _) = compiled("-2 * 3;");
        assert_eq!(
            chunk.code,
            vec![
                OpCode::Constant as u8, 0,
                OpCode::Negate as u8,
                OpCode::Constant as u8, 1,
                OpCode::Multiply as u8,
                OpCode::Pop as u8,
                OpCode::Nil as u8,
                OpCode::Return as u8,
            ]
        );
    }

    #[test]
    fn not_equal_desugars_to_equal_then_not() {
        let (chunk, _) = compiled("1 != 2;");
        assert_eq!(chunk.code[4], OpCode::Equal as u8);
        assert_eq!(chunk.code[5], OpCode::Not as u8);
    }

    #[test]
    fn greater_equal_desugars_to_less_then_not() {
        let (chunk, _) = compiled("1 >= 2;");
        assert_eq!(chunk.code[4], OpCode::Less as u8);
        assert_eq!(chunk.code[5], OpCode::Not as u8);
    }

    #[test]
    fn less_equal_desugars_to_greater_then_not() {
        let (chunk, _) = compiled("1 <= 2;");
        assert_eq!(chunk.code[4], OpCode::Greater as u8);
        assert_eq!(chunk.code[5], OpCode::Not as u8);
    }

    #[test]
    fn global_var_declaration_emits_define_global() {
        let (chunk, heap) = compiled("var a = 1;");
        assert_eq!(chunk.code[0], OpCode::Constant as u8);
        assert_eq!(chunk.code[2], OpCode::DefineGlobal as u8);
        let name_idx = chunk.code[3];
        match chunk.constants[name_idx as usize] {
            Value::Object(ObjectRef::Str(s)) => assert_eq!(&*heap.string(s).bytes, "a"),
            other => panic!("expected interned name constant, got {other:?}"),
        }
    }

    #[test]
    fn var_without_initializer_defaults_to_nil() {
        let (chunk, _) = compiled("var a;");
        assert_eq!(chunk.code[0], OpCode::Nil as u8);
    }

    #[test]
    fn local_variables_resolve_to_get_set_local() {
        let (chunk, _) = compiled("{ var a = 1; a = 2; print a; }");
        assert!(chunk.code.contains(&(OpCode::SetLocal as u8)));
        assert!(chunk.code.contains(&(OpCode::GetLocal as u8)));
        assert!(!chunk.code.contains(&(OpCode::DefineGlobal as u8)));
    }

    #[test]
    fn scope_exit_pops_locals() {
        let (chunk, _) = compiled("{ var a = 1; var b = 2; }");
        // two Pops for the two locals going out of scope, beyond the trailing Nil/Return.
        let pop_count = chunk.code.iter().filter(|&&b| b == OpCode::Pop as u8).count();
        assert_eq!(pop_count, 2);
    }

    #[test]
    fn redeclaring_a_name_in_the_same_scope_is_an_error() {
        let err = compile_err("{ var a = 1; var a = 2; }");
        assert!(err.diagnostics.iter().any(|d| d.message.contains("Already a variable")));
    }

    #[test]
    fn reading_a_local_in_its_own_initializer_is_an_error() {
        let err = compile_err("{ var a = a; }");
        assert!(err.diagnostics.iter().any(|d| d.message.contains("own initializer")));
    }

    #[test]
    fn if_else_emits_two_patched_jumps() {
        let (chunk, _) = compiled("if (true) { print 1; } else { print 2; }");
        assert!(chunk.code.contains(&(OpCode::JumpIfFalse as u8)));
        assert!(chunk.code.contains(&(OpCode::Jump as u8)));
    }

    #[test]
    fn while_loop_emits_backward_loop_instruction() {
        let (chunk, _) = compiled("var i = 0; while (i < 3) { i = i + 1; }");
        assert!(chunk.code.contains(&(OpCode::Loop as u8)));
    }

    #[test]
    fn and_short_circuits_with_jump_if_false() {
        let (chunk, _) = compiled("true and false;");
        assert!(chunk.code.contains(&(OpCode::JumpIfFalse as u8)));
    }

    #[test]
    fn or_emits_jump_if_false_then_jump() {
        let (chunk, _) = compiled("true or false;");
        let jif = chunk.code.iter().position(|&b| b == OpCode::JumpIfFalse as u8);
        let jmp = chunk.code.iter().position(|&b| b == OpCode::Jump as u8);
        assert!(jif.unwrap() < jmp.unwrap());
    }

    #[test]
    fn function_declaration_stores_a_function_constant_and_defines_a_global() {
        let (chunk, heap) = compiled("function sq(x) { return x * x; }");
        assert_eq!(chunk.code[0], OpCode::Constant as u8);
        assert_eq!(chunk.code[2], OpCode::DefineGlobal as u8);
        let function_constant = chunk
            .constants
            .iter()
            .find_map(|c| match c {
                Value::Object(ObjectRef::Function(f)) => Some(*f),
                _ => None,
            })
            .expect("a function constant was emitted");
        let func = heap.function(function_constant);
        assert_eq!(func.arity, 1);
        assert_eq!(func.name.map(|n| heap.string(n).bytes.to_string()), Some("sq".to_string()));
    }

    #[test]
    fn call_emits_call_with_arg_count() {
        let (chunk, _) = compiled("function f(a, b) { return a; } f(1, 2);");
        let call_idx = chunk.code.iter().position(|&b| b == OpCode::Call as u8).unwrap();
        assert_eq!(chunk.code[call_idx + 1], 2);
    }

    #[test]
    fn return_outside_function_is_an_error() {
        let err = compile_err("return 1;");
        assert!(err.diagnostics.iter().any(|d| d.message.contains("top-level")));
    }

    #[test]
    fn return_without_expression_still_returns_nil() {
        let (chunk, heap) = compiled("function f() { return; }");
        let func_ref = chunk
            .constants
            .iter()
            .find_map(|c| match c {
                Value::Object(ObjectRef::Function(f)) => Some(*f),
                _ => None,
            })
            .expect("a function constant was emitted");
        let body = &heap.function(func_ref).chunk;
        assert_eq!(body.code, vec![OpCode::Nil as u8, OpCode::Return as u8]);
    }

    #[test]
    fn when_codegen_dups_and_compares_each_case() {
        let (chunk, _) = compiled(
            r#"var x = 3; when (x) { 1 -> print "one"; 3 -> print "three"; else -> print "other"; }"#,
        );
        assert!(chunk.code.contains(&(OpCode::Dup as u8)));
        assert!(chunk.code.contains(&(OpCode::Equal as u8)));
    }

    #[test]
    fn when_rejects_another_case_after_else() {
        let err = compile_err(
            r#"when (1) { else -> print "a"; 1 -> print "b"; }"#,
        );
        assert!(err.diagnostics.iter().any(|d| d.message.contains("else")));
    }

    #[test]
    fn when_case_body_accepts_multiple_bare_statements() {
        let (chunk, _) = compiled(indoc::indoc! {r#"
            when (1) {
                1 -> print "a"; print "b"; print "c";
                else -> print "other";
            }
        "#});
        let print_count = chunk.code.iter().filter(|&&b| b == OpCode::Print as u8).count();
        assert_eq!(print_count, 3);
    }

    #[test]
    fn when_case_value_rejects_an_arbitrary_expression() {
        let err = compile_err("when (1) { 1 + 1 -> print \"a\"; }");
        assert!(err.diagnostics.iter().any(|d| d.message.contains("literal case value")));
    }

    #[test]
    fn when_case_value_rejects_an_identifier() {
        let err = compile_err("var x = 1; when (1) { x -> print \"a\"; }");
        assert!(err.diagnostics.iter().any(|d| d.message.contains("literal case value")));
    }

    #[test]
    fn string_literal_strips_quotes() {
        let (chunk, heap) = compiled(r#""hello";"#);
        match chunk.constants[0] {
            Value::Object(ObjectRef::Str(s)) => assert_eq!(&*heap.string(s).bytes, "hello"),
            other => panic!("expected string constant, got {other:?}"),
        }
    }

    #[test]
    fn template_string_codegen_shape() {
        // "hi $(1 + 2) there" -> CONST "" ; CONST "hi " ADD ; CONST 1 CONST 2 ADD ADD ; CONST " there" ADD
        let (chunk, heap) = compiled(r#"print "hi $(1 + 2) there";"#);
        let string_value = |idx: u8, heap: &Heap| match chunk.constants[idx as usize] {
            Value::Object(ObjectRef::Str(s)) => heap.string(s).bytes.to_string(),
            _ => panic!("expected a string constant at {idx}"),
        };
        assert_eq!(string_value(0, &heap), "");
        assert_eq!(string_value(1, &heap), "hi ");
        assert_eq!(string_value(4, &heap), " there");
    }

    #[test]
    fn synchronize_recovers_after_a_compile_error_at_a_statement_boundary() {
        // Two independent `var` redeclarations in sibling scopes: both should be
        // reported rather than the second being swallowed by panic-mode suppression.
        let err = compile_err("{ var a = a; } { var b = b; }");
        assert_eq!(err.diagnostics.len(), 2);
    }

    #[test]
    fn jump_overflow_is_reported_as_a_compile_error() {
        // A single `if` branch with enough statements to exceed a 16-bit jump
        // distance is a compile error, not a panic.
        let mut body = String::new();
        for _ in 0..40_000 {
            body.push_str("true;");
        }
        let source = format!("if (true) {{ {body} }}");
        let err = compile_err(&source);
        assert!(err.diagnostics.iter().any(|d| d.message.contains("Too much code")));
    }
}
