//! The single-pass compiler for the Pyro language.
//!
//! A Pratt parser that walks the token stream and emits bytecode directly
//! into a growing function object; there is no AST. A stack of
//! [`FnCompiler`] frames tracks local variables by name and scope depth,
//! captured upvalues, loop contexts for break/continue patching, and the
//! current class context for `self` and `super`. Jumps are emitted with
//! placeholder operands and patched backwards once the target is known.
//!
//! `try` operands are wrapped in synthetic zero-arg closures so the `Try`
//! instruction always invokes a callee of its own; `${...}` string
//! interpolations are lowered to `$str(...)` calls joined with `+`.

use crate::error::{Halt, Panic, VmResult};
use crate::lexer::{Lexer, Token, TokenKind};
use crate::objects::{unescape_bytes, PyroFn};
use crate::opcode::Op;
use crate::utf8;
use crate::value::{ObjRef, Value};
use crate::vm::Vm;

const MAX_LOCALS: usize = 256;
const MAX_UPVALUES: usize = 256;
const MAX_CALL_ARGS: usize = 255;

/// Compiles `src` into a zero-arg top-level function object.
///
/// The collector is pinned off for the duration: objects the compiler
/// creates (strings, nested functions) are reachable only from the
/// in-progress function until the caller roots the result.
pub(crate) fn compile(vm: &mut Vm, src: &[u8], src_id: &str) -> VmResult<ObjRef> {
    vm.heap.disallow_gc();
    let result = {
        let mut compiler = Compiler::new(vm, src, src_id);
        compiler.compile_script()
    };
    vm.heap.allow_gc();
    result
}

/// Expression precedence, lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    None,
    Assignment, // =
    Or,         // ||
    And,        // &&
    Coalesce,   // ?? !!
    Equality,   // == !=
    Comparison, // < <= > >= in
    BitOr,      // |
    BitXor,     // ^
    BitAnd,     // &
    Shift,      // << >>
    Term,       // + -
    Factor,     // * / // %
    Unary,      // ! - + ~ try
    Power,      // ** (right-associative)
    Call,       // () [] . : ::
}

impl Precedence {
    fn next(self) -> Precedence {
        match self {
            Precedence::None => Precedence::Assignment,
            Precedence::Assignment => Precedence::Or,
            Precedence::Or => Precedence::And,
            Precedence::And => Precedence::Coalesce,
            Precedence::Coalesce => Precedence::Equality,
            Precedence::Equality => Precedence::Comparison,
            Precedence::Comparison => Precedence::BitOr,
            Precedence::BitOr => Precedence::BitXor,
            Precedence::BitXor => Precedence::BitAnd,
            Precedence::BitAnd => Precedence::Shift,
            Precedence::Shift => Precedence::Term,
            Precedence::Term => Precedence::Factor,
            Precedence::Factor => Precedence::Unary,
            Precedence::Unary => Precedence::Power,
            Precedence::Power => Precedence::Call,
            Precedence::Call => Precedence::Call,
        }
    }
}

/// What kind of function the current frame compiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FnKind {
    Script,
    Function,
    Method,
    Initializer,
    TryThunk,
}

/// A local variable: its name, the scope depth it was declared at (-1
/// until initialized), and whether a closure captured it.
struct Local<'src> {
    name: &'src [u8],
    depth: i32,
    is_captured: bool,
}

/// A captured variable recorded on the compiling function: a slot in the
/// enclosing function's locals, or an index into its upvalues.
#[derive(Clone, Copy, PartialEq, Eq)]
struct CompilerUpvalue {
    index: u8,
    is_local: bool,
}

/// An active loop: where `continue` jumps back to, the scope depth outside
/// the loop body, and the `break` jumps awaiting a patch.
struct LoopContext {
    continue_target: usize,
    scope_depth: i32,
    break_jumps: Vec<usize>,
}

/// Per-function compilation state.
struct FnCompiler<'src> {
    kind: FnKind,
    fun: PyroFn,
    locals: Vec<Local<'src>>,
    upvalues: Vec<CompilerUpvalue>,
    scope_depth: i32,
    loops: Vec<LoopContext>,
}

impl<'src> FnCompiler<'src> {
    fn new(kind: FnKind) -> Self {
        // Slot zero holds the callee; in methods it is addressable as
        // `self`.
        let slot_zero_name: &'static [u8] =
            if matches!(kind, FnKind::Method | FnKind::Initializer) {
                b"self"
            } else {
                b""
            };
        Self {
            kind,
            fun: PyroFn::new(),
            locals: vec![Local {
                name: slot_zero_name,
                depth: 0,
                is_captured: false,
            }],
            upvalues: Vec::new(),
            scope_depth: 0,
            loops: Vec::new(),
        }
    }
}

/// The class context stack entry, for `self` / `super` validation.
struct ClassContext {
    has_superclass: bool,
}

struct Compiler<'src, 'vm> {
    vm: &'vm mut Vm,
    lexer: Lexer<'src>,
    previous: Token<'src>,
    current: Token<'src>,
    src_id: String,
    frames: Vec<FnCompiler<'src>>,
    classes: Vec<ClassContext>,
}

impl<'src, 'vm> Compiler<'src, 'vm> {
    fn new(vm: &'vm mut Vm, src: &'src [u8], src_id: &str) -> Self {
        let placeholder = Token {
            kind: TokenKind::Eof,
            bytes: b"",
            line: 1,
        };
        Self {
            vm,
            lexer: Lexer::new(src),
            previous: placeholder,
            current: placeholder,
            src_id: src_id.to_string(),
            frames: Vec::new(),
            classes: Vec::new(),
        }
    }

    fn compile_script(&mut self) -> VmResult<ObjRef> {
        self.frames.push(FnCompiler::new(FnKind::Script));
        self.advance()?;

        while !self.check(TokenKind::Eof) {
            self.declaration()?;
        }

        let (fun, _) = self.end_function("main")?;
        self.vm.new_fn(fun)
    }

    // ------------------------------------------------------------------
    // Token plumbing.
    // ------------------------------------------------------------------

    fn advance(&mut self) -> VmResult<()> {
        self.previous = self.current;
        match self.lexer.next_token() {
            Ok(token) => {
                self.current = token;
                Ok(())
            }
            Err(err) => Err(Panic::syntax_error(&self.src_id, err.line, err.message).into()),
        }
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn match_token(&mut self, kind: TokenKind) -> VmResult<bool> {
        if self.check(kind) {
            self.advance()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn consume(&mut self, kind: TokenKind, message: &str) -> VmResult<()> {
        if self.check(kind) {
            self.advance()
        } else {
            Err(self.error_at_current(message))
        }
    }

    fn error_at_current(&self, message: &str) -> Halt {
        Panic::syntax_error(&self.src_id, self.current.line, message).into()
    }

    fn error_at_previous(&self, message: &str) -> Halt {
        Panic::syntax_error(&self.src_id, self.previous.line, message).into()
    }

    // ------------------------------------------------------------------
    // Emission helpers.
    // ------------------------------------------------------------------

    fn frame(&mut self) -> &mut FnCompiler<'src> {
        match self.frames.last_mut() {
            Some(frame) => frame,
            None => unreachable!("no active function compiler"),
        }
    }

    fn frame_ref(&self) -> &FnCompiler<'src> {
        match self.frames.last() {
            Some(frame) => frame,
            None => unreachable!("no active function compiler"),
        }
    }

    fn code_len(&self) -> usize {
        self.frame_ref().fun.code.len()
    }

    fn emit_byte(&mut self, byte: u8) {
        let line = self.previous.line;
        self.frame().fun.write(byte, line);
    }

    fn emit_op(&mut self, op: Op) {
        self.emit_byte(op as u8);
    }

    fn emit_u16(&mut self, value: u16) {
        self.emit_byte((value >> 8) as u8);
        self.emit_byte((value & 0xFF) as u8);
    }

    fn make_constant(&mut self, value: Value) -> VmResult<u16> {
        match self.frame().fun.add_constant(value) {
            Some(index) => Ok(index),
            None => Err(self.error_at_previous("Too many constants in one function.")),
        }
    }

    fn emit_constant(&mut self, value: Value) -> VmResult<()> {
        let index = self.make_constant(value)?;
        self.emit_op(Op::LoadConstant);
        self.emit_u16(index);
        Ok(())
    }

    /// Interns an identifier and adds it to the constant table.
    fn identifier_constant(&mut self, name: &[u8]) -> VmResult<u16> {
        let string = self.vm.intern_bytes(name)?;
        self.make_constant(Value::Obj(string))
    }

    /// Emits a forward jump with a placeholder operand; returns the
    /// operand's position for patching.
    fn emit_jump(&mut self, op: Op) -> usize {
        self.emit_op(op);
        self.emit_byte(0xFF);
        self.emit_byte(0xFF);
        self.code_len() - 2
    }

    /// Writes the distance from the placeholder to the current position
    /// back into a previously emitted jump.
    fn patch_jump(&mut self, operand_pos: usize) -> VmResult<()> {
        let offset = self.code_len() - operand_pos - 2;
        if offset > u16::MAX as usize {
            return Err(self.error_at_previous("Too much code to jump over."));
        }
        self.frame().fun.code[operand_pos] = (offset >> 8) as u8;
        self.frame().fun.code[operand_pos + 1] = (offset & 0xFF) as u8;
        Ok(())
    }

    /// Emits a backward jump to `target`.
    fn emit_jump_back(&mut self, target: usize) -> VmResult<()> {
        let offset = self.code_len() - target + 3;
        if offset > u16::MAX as usize {
            return Err(self.error_at_previous("Loop body too large."));
        }
        self.emit_op(Op::JumpBack);
        self.emit_u16(offset as u16);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Scopes and locals.
    // ------------------------------------------------------------------

    fn begin_scope(&mut self) {
        self.frame().scope_depth += 1;
    }

    fn end_scope(&mut self) {
        self.frame().scope_depth -= 1;
        loop {
            let frame = self.frame_ref();
            let Some(local) = frame.locals.last() else {
                break;
            };
            if local.depth <= frame.scope_depth {
                break;
            }
            let captured = local.is_captured;
            self.frame().locals.pop();
            if captured {
                self.emit_op(Op::CloseUpvalue);
            } else {
                self.emit_op(Op::Pop);
            }
        }
    }

    /// Emits pops for every local deeper than `target_depth` without
    /// altering the compiler's view; used by break and continue.
    fn discard_locals(&mut self, target_depth: i32) {
        let mut pops: Vec<bool> = Vec::new();
        for local in self.frame_ref().locals.iter().rev() {
            if local.depth <= target_depth {
                break;
            }
            pops.push(local.is_captured);
        }
        for captured in pops {
            if captured {
                self.emit_op(Op::CloseUpvalue);
            } else {
                self.emit_op(Op::Pop);
            }
        }
    }

    /// Declares a local in the current scope. Redeclaring a name in the
    /// same scope is an error.
    fn declare_local(&mut self, name: &'src [u8]) -> VmResult<()> {
        let frame = self.frame_ref();
        for local in frame.locals.iter().rev() {
            if local.depth != -1 && local.depth < frame.scope_depth {
                break;
            }
            if local.name == name {
                return Err(
                    self.error_at_previous("A variable with this name already exists in this scope.")
                );
            }
        }
        if self.frame_ref().locals.len() == MAX_LOCALS {
            return Err(self.error_at_previous("Too many local variables in function."));
        }
        self.frame().locals.push(Local {
            name,
            depth: -1,
            is_captured: false,
        });
        Ok(())
    }

    /// Marks the most recent local as initialized.
    fn mark_initialized(&mut self) {
        let depth = self.frame_ref().scope_depth;
        if let Some(local) = self.frame().locals.last_mut() {
            local.depth = depth;
        }
    }

    fn resolve_local(&self, frame_index: usize, name: &[u8]) -> VmResult<Option<u8>> {
        let frame = &self.frames[frame_index];
        for (slot, local) in frame.locals.iter().enumerate().rev() {
            if local.name == name {
                if local.depth == -1 {
                    return Err(self.error_at_previous(
                        "Can't read a local variable in its own initializer.",
                    ));
                }
                return Ok(Some(slot as u8));
            }
        }
        Ok(None)
    }

    fn add_upvalue(&mut self, frame_index: usize, index: u8, is_local: bool) -> VmResult<u8> {
        let upvalue = CompilerUpvalue { index, is_local };
        let frame = &mut self.frames[frame_index];
        for (i, existing) in frame.upvalues.iter().enumerate() {
            if *existing == upvalue {
                return Ok(i as u8);
            }
        }
        if frame.upvalues.len() == MAX_UPVALUES {
            return Err(self.error_at_previous("Too many captured variables in function."));
        }
        frame.upvalues.push(upvalue);
        frame.fun.upvalue_count = frame.upvalues.len();
        Ok((frame.upvalues.len() - 1) as u8)
    }

    /// Looks for `name` in the enclosing function's scope. A hit marks the
    /// source local as captured and records an upvalue entry in every
    /// intermediate frame, chaining them.
    fn resolve_upvalue(&mut self, frame_index: usize, name: &[u8]) -> VmResult<Option<u8>> {
        if frame_index == 0 {
            return Ok(None);
        }

        if let Some(local_slot) = self.resolve_local(frame_index - 1, name)? {
            self.frames[frame_index - 1].locals[local_slot as usize].is_captured = true;
            let index = self.add_upvalue(frame_index, local_slot, true)?;
            return Ok(Some(index));
        }

        if let Some(upvalue_index) = self.resolve_upvalue(frame_index - 1, name)? {
            let index = self.add_upvalue(frame_index, upvalue_index, false)?;
            return Ok(Some(index));
        }

        Ok(None)
    }

    // ------------------------------------------------------------------
    // Functions.
    // ------------------------------------------------------------------

    /// Finishes the current function frame: emits the implicit return,
    /// fixes up metadata, and pops the frame.
    fn end_function(&mut self, name: &str) -> VmResult<(PyroFn, Vec<CompilerUpvalue>)> {
        if self.frame_ref().kind == FnKind::Initializer {
            self.emit_op(Op::GetLocal);
            self.emit_byte(0);
        } else if self.frame_ref().kind != FnKind::TryThunk {
            self.emit_op(Op::LoadNull);
        }
        self.emit_op(Op::Return);

        let name_ref = self.vm.intern(name)?;
        let source_ref = self.vm.intern(&self.src_id.clone())?;

        let Some(mut frame) = self.frames.pop() else {
            unreachable!("no active function compiler");
        };
        frame.fun.name = Some(name_ref);
        frame.fun.source_id = Some(source_ref);
        Ok((frame.fun, frame.upvalues))
    }

    /// Compiles a function body: parameters, block, closure emission into
    /// the enclosing function.
    fn function(&mut self, kind: FnKind, name: &str) -> VmResult<()> {
        self.frames.push(FnCompiler::new(kind));
        self.begin_scope();

        self.consume(TokenKind::LParen, "Expected '(' after function name.")?;
        if !self.check(TokenKind::RParen) {
            loop {
                if self.frame_ref().fun.arity == u8::MAX {
                    return Err(self.error_at_current("Too many parameters."));
                }
                self.frame().fun.arity += 1;
                self.consume(TokenKind::Ident, "Expected a parameter name.")?;
                let param_name = self.previous.bytes;
                self.declare_local(param_name)?;
                self.mark_initialized();
                if !self.match_token(TokenKind::Comma)? {
                    break;
                }
            }
        }
        self.consume(TokenKind::RParen, "Expected ')' after parameters.")?;
        self.consume(TokenKind::LBrace, "Expected '{' before function body.")?;

        while !self.check(TokenKind::RBrace) && !self.check(TokenKind::Eof) {
            self.declaration()?;
        }
        self.consume(TokenKind::RBrace, "Expected '}' after function body.")?;

        let (fun, upvalues) = self.end_function(name)?;
        self.emit_closure(fun, &upvalues)
    }

    /// Adds the finished function to the enclosing constant table and
    /// emits `MakeClosure` with its upvalue pairs.
    fn emit_closure(&mut self, fun: PyroFn, upvalues: &[CompilerUpvalue]) -> VmResult<()> {
        let fun_ref = self.vm.new_fn(fun)?;
        let index = self.make_constant(Value::Obj(fun_ref))?;
        self.emit_op(Op::MakeClosure);
        self.emit_u16(index);
        for upvalue in upvalues {
            self.emit_byte(upvalue.is_local as u8);
            self.emit_byte(upvalue.index);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Declarations and statements.
    // ------------------------------------------------------------------

    fn declaration(&mut self) -> VmResult<()> {
        // `pub` is accepted before declarations; visibility is not
        // enforced.
        if self.check(TokenKind::Pub) {
            self.advance()?;
            if !self.check(TokenKind::Var)
                && !self.check(TokenKind::Def)
                && !self.check(TokenKind::Class)
            {
                return Err(
                    self.error_at_current("Expected 'var', 'def' or 'class' after 'pub'.")
                );
            }
        }

        if self.match_token(TokenKind::Var)? {
            self.var_declaration()
        } else if self.match_token(TokenKind::Def)? {
            self.fn_declaration()
        } else if self.match_token(TokenKind::Class)? {
            self.class_declaration()
        } else if self.match_token(TokenKind::Import)? {
            self.import_statement()
        } else {
            self.statement()
        }
    }

    fn statement(&mut self) -> VmResult<()> {
        if self.match_token(TokenKind::Echo)? {
            self.echo_statement()
        } else if self.match_token(TokenKind::Assert)? {
            self.assert_statement()
        } else if self.match_token(TokenKind::If)? {
            self.if_statement()
        } else if self.match_token(TokenKind::While)? {
            self.while_statement()
        } else if self.match_token(TokenKind::Loop)? {
            self.loop_statement()
        } else if self.match_token(TokenKind::For)? {
            self.for_statement()
        } else if self.match_token(TokenKind::Return)? {
            self.return_statement()
        } else if self.match_token(TokenKind::Break)? {
            self.break_statement()
        } else if self.match_token(TokenKind::Continue)? {
            self.continue_statement()
        } else if self.match_token(TokenKind::LBrace)? {
            self.begin_scope();
            self.block()?;
            self.end_scope();
            Ok(())
        } else if self.match_token(TokenKind::Semicolon)? {
            Ok(())
        } else {
            self.expression_statement()
        }
    }

    fn block(&mut self) -> VmResult<()> {
        while !self.check(TokenKind::RBrace) && !self.check(TokenKind::Eof) {
            self.declaration()?;
        }
        self.consume(TokenKind::RBrace, "Expected '}' after block.")
    }

    fn expression_statement(&mut self) -> VmResult<()> {
        self.expression()?;
        self.consume(TokenKind::Semicolon, "Expected ';' after expression.")?;
        let at_top_level =
            self.frame_ref().kind == FnKind::Script && self.frame_ref().scope_depth == 0;
        if at_top_level {
            self.emit_op(Op::PopEchoInRepl);
        } else {
            self.emit_op(Op::Pop);
        }
        Ok(())
    }

    fn var_declaration(&mut self) -> VmResult<()> {
        if self.match_token(TokenKind::LParen)? {
            return self.unpacking_var_declaration();
        }

        self.consume(TokenKind::Ident, "Expected a variable name.")?;
        let name = self.previous.bytes;

        if self.frame_ref().scope_depth > 0 {
            self.declare_local(name)?;
            if self.match_token(TokenKind::Equal)? {
                self.expression()?;
            } else {
                self.emit_op(Op::LoadNull);
            }
            self.mark_initialized();
        } else {
            let name_index = self.identifier_constant(name)?;
            if self.match_token(TokenKind::Equal)? {
                self.expression()?;
            } else {
                self.emit_op(Op::LoadNull);
            }
            self.emit_op(Op::DefineGlobal);
            self.emit_u16(name_index);
        }

        self.consume(TokenKind::Semicolon, "Expected ';' after variable declaration.")
    }

    /// `var (a, b) = expr;` — destructures a tuple or vector.
    fn unpacking_var_declaration(&mut self) -> VmResult<()> {
        let mut names: Vec<&'src [u8]> = Vec::new();
        loop {
            self.consume(TokenKind::Ident, "Expected a variable name.")?;
            names.push(self.previous.bytes);
            if !self.match_token(TokenKind::Comma)? {
                break;
            }
        }
        self.consume(TokenKind::RParen, "Expected ')' after variable names.")?;
        self.consume(TokenKind::Equal, "Expected '=' after '(...)' declaration.")?;
        if names.len() > u8::MAX as usize {
            return Err(self.error_at_previous("Too many variable names to unpack."));
        }

        self.expression()?;
        self.emit_op(Op::Unpack);
        self.emit_byte(names.len() as u8);

        if self.frame_ref().scope_depth > 0 {
            for name in names {
                self.declare_local(name)?;
                self.mark_initialized();
            }
        } else {
            let mut indexes = Vec::with_capacity(names.len());
            for name in &names {
                indexes.push(self.identifier_constant(name)?);
            }
            self.emit_op(Op::DefineGlobals);
            self.emit_byte(names.len() as u8);
            for index in indexes {
                self.emit_u16(index);
            }
        }

        self.consume(TokenKind::Semicolon, "Expected ';' after variable declaration.")
    }

    fn fn_declaration(&mut self) -> VmResult<()> {
        self.consume(TokenKind::Ident, "Expected a function name.")?;
        let name = self.previous.bytes;
        let name_text = String::from_utf8_lossy(name).into_owned();

        if self.frame_ref().scope_depth > 0 {
            self.declare_local(name)?;
            self.mark_initialized();
            self.function(FnKind::Function, &name_text)?;
        } else {
            let name_index = self.identifier_constant(name)?;
            self.function(FnKind::Function, &name_text)?;
            self.emit_op(Op::DefineGlobal);
            self.emit_u16(name_index);
        }
        Ok(())
    }

    fn class_declaration(&mut self) -> VmResult<()> {
        self.consume(TokenKind::Ident, "Expected a class name.")?;
        let name = self.previous.bytes;
        let name_index = self.identifier_constant(name)?;

        self.emit_op(Op::MakeClass);
        self.emit_u16(name_index);

        let is_local = self.frame_ref().scope_depth > 0;
        if is_local {
            self.declare_local(name)?;
            self.mark_initialized();
        } else {
            self.emit_op(Op::DefineGlobal);
            self.emit_u16(name_index);
        }

        let has_superclass = self.match_token(TokenKind::Less)?;
        self.classes.push(ClassContext { has_superclass });

        if has_superclass {
            self.consume(TokenKind::Ident, "Expected a superclass name.")?;
            let superclass_name = self.previous.bytes;

            self.begin_scope();
            self.named_variable(superclass_name, false)?;
            self.declare_local(b"super")?;
            self.mark_initialized();

            self.named_variable(name, false)?;
            self.emit_op(Op::Inherit);
        }

        self.named_variable(name, false)?;
        self.consume(TokenKind::LBrace, "Expected '{' before class body.")?;

        while !self.check(TokenKind::RBrace) && !self.check(TokenKind::Eof) {
            if self.check(TokenKind::Pub) {
                self.advance()?;
            }
            if self.match_token(TokenKind::Var)? {
                self.field_declaration()?;
            } else if self.match_token(TokenKind::Def)? {
                self.method_declaration()?;
            } else {
                return Err(
                    self.error_at_current("Expected a field or method declaration in class body.")
                );
            }
        }
        self.consume(TokenKind::RBrace, "Expected '}' after class body.")?;
        self.emit_op(Op::Pop);

        if has_superclass {
            self.end_scope();
        }
        self.classes.pop();
        Ok(())
    }

    fn field_declaration(&mut self) -> VmResult<()> {
        self.consume(TokenKind::Ident, "Expected a field name.")?;
        let name_index = self.identifier_constant(self.previous.bytes)?;

        if self.match_token(TokenKind::Equal)? {
            self.expression()?;
        } else {
            self.emit_op(Op::LoadNull);
        }
        self.consume(TokenKind::Semicolon, "Expected ';' after field declaration.")?;

        self.emit_op(Op::DefineField);
        self.emit_u16(name_index);
        Ok(())
    }

    fn method_declaration(&mut self) -> VmResult<()> {
        self.consume(TokenKind::Ident, "Expected a method name.")?;
        let name = self.previous.bytes;
        let name_index = self.identifier_constant(name)?;
        let name_text = String::from_utf8_lossy(name).into_owned();

        let kind = if name == b"$init" {
            FnKind::Initializer
        } else {
            FnKind::Method
        };
        self.function(kind, &name_text)?;

        self.emit_op(Op::DefineMethod);
        self.emit_u16(name_index);
        Ok(())
    }

    fn import_statement(&mut self) -> VmResult<()> {
        let mut components: Vec<&'src [u8]> = Vec::new();
        let mut members: Vec<&'src [u8]> = Vec::new();

        self.consume(TokenKind::Ident, "Expected a module name after 'import'.")?;
        components.push(self.previous.bytes);

        while self.match_token(TokenKind::ColonColon)? {
            if self.match_token(TokenKind::LBrace)? {
                loop {
                    self.consume(TokenKind::Ident, "Expected a member name.")?;
                    members.push(self.previous.bytes);
                    if !self.match_token(TokenKind::Comma)? {
                        break;
                    }
                }
                self.consume(TokenKind::RBrace, "Expected '}' after member names.")?;
                break;
            }
            self.consume(TokenKind::Ident, "Expected a module name after '::'.")?;
            components.push(self.previous.bytes);
        }
        self.consume(TokenKind::Semicolon, "Expected ';' after import statement.")?;

        if components.len() > u8::MAX as usize || members.len() > u8::MAX as usize {
            return Err(self.error_at_previous("Import path is too long."));
        }

        for component in &components {
            let string = self.vm.intern_bytes(component)?;
            self.emit_constant(Value::Obj(string))?;
        }

        if members.is_empty() {
            self.emit_op(Op::ImportModule);
            self.emit_byte(components.len() as u8);

            let binding_name = components[components.len() - 1];
            if self.frame_ref().scope_depth > 0 {
                self.declare_local(binding_name)?;
                self.mark_initialized();
            } else {
                let name_index = self.identifier_constant(binding_name)?;
                self.emit_op(Op::DefineGlobal);
                self.emit_u16(name_index);
            }
        } else {
            for member in &members {
                let string = self.vm.intern_bytes(member)?;
                self.emit_constant(Value::Obj(string))?;
            }
            self.emit_op(Op::ImportMembers);
            self.emit_byte(components.len() as u8);
            self.emit_byte(members.len() as u8);

            if self.frame_ref().scope_depth > 0 {
                for member in members {
                    self.declare_local(member)?;
                    self.mark_initialized();
                }
            } else {
                let mut indexes = Vec::with_capacity(members.len());
                for member in &members {
                    indexes.push(self.identifier_constant(member)?);
                }
                self.emit_op(Op::DefineGlobals);
                self.emit_byte(indexes.len() as u8);
                for index in indexes {
                    self.emit_u16(index);
                }
            }
        }
        Ok(())
    }

    fn echo_statement(&mut self) -> VmResult<()> {
        let mut count: usize = 0;
        if !self.check(TokenKind::Semicolon) {
            loop {
                self.expression()?;
                count += 1;
                if !self.match_token(TokenKind::Comma)? {
                    break;
                }
            }
        }
        self.consume(TokenKind::Semicolon, "Expected ';' after echo statement.")?;
        if count > u8::MAX as usize {
            return Err(self.error_at_previous("Too many operands to 'echo'."));
        }
        self.emit_op(Op::Echo);
        self.emit_byte(count as u8);
        Ok(())
    }

    fn assert_statement(&mut self) -> VmResult<()> {
        self.expression()?;
        self.consume(TokenKind::Semicolon, "Expected ';' after assert statement.")?;
        self.emit_op(Op::Assert);
        Ok(())
    }

    fn if_statement(&mut self) -> VmResult<()> {
        self.expression()?;
        let else_jump = self.emit_jump(Op::PopJumpIfFalse);

        self.consume(TokenKind::LBrace, "Expected '{' after if condition.")?;
        self.begin_scope();
        self.block()?;
        self.end_scope();

        if self.match_token(TokenKind::Else)? {
            let end_jump = self.emit_jump(Op::Jump);
            self.patch_jump(else_jump)?;
            if self.match_token(TokenKind::If)? {
                self.if_statement()?;
            } else {
                self.consume(TokenKind::LBrace, "Expected '{' after 'else'.")?;
                self.begin_scope();
                self.block()?;
                self.end_scope();
            }
            self.patch_jump(end_jump)?;
        } else {
            self.patch_jump(else_jump)?;
        }
        Ok(())
    }

    fn while_statement(&mut self) -> VmResult<()> {
        let loop_start = self.code_len();
        self.expression()?;
        let exit_jump = self.emit_jump(Op::PopJumpIfFalse);

        let scope_depth = self.frame_ref().scope_depth;
        self.frame().loops.push(LoopContext {
            continue_target: loop_start,
            scope_depth,
            break_jumps: Vec::new(),
        });

        self.consume(TokenKind::LBrace, "Expected '{' after while condition.")?;
        self.begin_scope();
        self.block()?;
        self.end_scope();
        self.emit_jump_back(loop_start)?;

        self.patch_jump(exit_jump)?;
        self.finish_loop()
    }

    /// `loop { ... }` runs forever; `loop init; cond; incr { ... }` is the
    /// C-style counted loop.
    fn loop_statement(&mut self) -> VmResult<()> {
        if self.match_token(TokenKind::LBrace)? {
            let loop_start = self.code_len();
            let scope_depth = self.frame_ref().scope_depth;
            self.frame().loops.push(LoopContext {
                continue_target: loop_start,
                scope_depth,
                break_jumps: Vec::new(),
            });
            self.begin_scope();
            self.block()?;
            self.end_scope();
            self.emit_jump_back(loop_start)?;
            return self.finish_loop();
        }

        self.begin_scope();

        // Initializer clause.
        if self.match_token(TokenKind::Var)? {
            self.var_declaration()?;
        } else {
            self.expression()?;
            self.consume(TokenKind::Semicolon, "Expected ';' after loop initializer.")?;
            self.emit_op(Op::Pop);
        }

        // Condition clause.
        let condition_start = self.code_len();
        self.expression()?;
        self.consume(TokenKind::Semicolon, "Expected ';' after loop condition.")?;
        let exit_jump = self.emit_jump(Op::PopJumpIfFalse);
        let body_jump = self.emit_jump(Op::Jump);

        // Increment clause.
        let increment_start = self.code_len();
        self.expression()?;
        self.emit_op(Op::Pop);
        self.emit_jump_back(condition_start)?;

        self.patch_jump(body_jump)?;

        let scope_depth = self.frame_ref().scope_depth;
        self.frame().loops.push(LoopContext {
            continue_target: increment_start,
            scope_depth,
            break_jumps: Vec::new(),
        });

        self.consume(TokenKind::LBrace, "Expected '{' before loop body.")?;
        self.begin_scope();
        self.block()?;
        self.end_scope();
        self.emit_jump_back(increment_start)?;

        self.patch_jump(exit_jump)?;
        self.finish_loop()?;
        self.end_scope();
        Ok(())
    }

    fn for_statement(&mut self) -> VmResult<()> {
        // One name, or a parenthesized list that unpacks each value.
        let mut names: Vec<&'src [u8]> = Vec::new();
        if self.match_token(TokenKind::LParen)? {
            loop {
                self.consume(TokenKind::Ident, "Expected a loop variable name.")?;
                names.push(self.previous.bytes);
                if !self.match_token(TokenKind::Comma)? {
                    break;
                }
            }
            self.consume(TokenKind::RParen, "Expected ')' after loop variable names.")?;
        } else {
            self.consume(TokenKind::Ident, "Expected a loop variable name.")?;
            names.push(self.previous.bytes);
        }
        self.consume(TokenKind::In, "Expected 'in' after loop variable.")?;

        // The iterator lives in a hidden local for the duration.
        self.expression()?;
        self.emit_op(Op::GetIteratorObject);
        self.begin_scope();
        self.declare_local(b"(iter)")?;
        self.mark_initialized();
        let iter_slot = (self.frame_ref().locals.len() - 1) as u8;

        let loop_start = self.code_len();
        self.emit_op(Op::GetLocal);
        self.emit_byte(iter_slot);
        self.emit_op(Op::GetIteratorNextValue);
        let exit_jump = self.emit_jump(Op::JumpIfErr);

        let scope_depth = self.frame_ref().scope_depth;
        self.frame().loops.push(LoopContext {
            continue_target: loop_start,
            scope_depth,
            break_jumps: Vec::new(),
        });

        // The iterator copy and the next value become locals of the body
        // scope; multiple names unpack the value first.
        self.begin_scope();
        self.declare_local(b"(for)")?;
        self.mark_initialized();
        if names.len() == 1 {
            self.declare_local(names[0])?;
            self.mark_initialized();
        } else {
            if names.len() > u8::MAX as usize {
                return Err(self.error_at_previous("Too many loop variable names."));
            }
            self.emit_op(Op::Unpack);
            self.emit_byte(names.len() as u8);
            for &name in &names {
                self.declare_local(name)?;
                self.mark_initialized();
            }
        }

        self.consume(TokenKind::LBrace, "Expected '{' before loop body.")?;
        self.block()?;
        self.end_scope();
        self.emit_jump_back(loop_start)?;

        self.patch_jump(exit_jump)?;
        self.emit_op(Op::Pop); // the err sentinel
        self.emit_op(Op::Pop); // the iterator copy
        self.finish_loop()?;
        self.end_scope();
        Ok(())
    }

    /// Patches this loop's break jumps and pops its context.
    fn finish_loop(&mut self) -> VmResult<()> {
        let Some(context) = self.frame().loops.pop() else {
            unreachable!("no active loop context");
        };
        for jump in context.break_jumps {
            self.patch_jump(jump)?;
        }
        Ok(())
    }

    fn break_statement(&mut self) -> VmResult<()> {
        self.consume(TokenKind::Semicolon, "Expected ';' after 'break'.")?;
        let Some(context) = self.frame_ref().loops.last() else {
            return Err(self.error_at_previous("'break' outside a loop."));
        };
        let target_depth = context.scope_depth;
        self.discard_locals(target_depth);
        let jump = self.emit_jump(Op::Jump);
        match self.frame().loops.last_mut() {
            Some(context) => context.break_jumps.push(jump),
            None => unreachable!("loop context vanished"),
        }
        Ok(())
    }

    fn continue_statement(&mut self) -> VmResult<()> {
        self.consume(TokenKind::Semicolon, "Expected ';' after 'continue'.")?;
        let Some(context) = self.frame_ref().loops.last() else {
            return Err(self.error_at_previous("'continue' outside a loop."));
        };
        let target_depth = context.scope_depth;
        let continue_target = context.continue_target;
        self.discard_locals(target_depth);
        self.emit_jump_back(continue_target)
    }

    fn return_statement(&mut self) -> VmResult<()> {
        match self.frame_ref().kind {
            FnKind::Script => {
                return Err(self.error_at_previous("Can't return from top-level code."))
            }
            FnKind::Initializer => {
                if !self.check(TokenKind::Semicolon) {
                    return Err(
                        self.error_at_previous("Can't return a value from an initializer.")
                    );
                }
                self.advance()?;
                self.emit_op(Op::GetLocal);
                self.emit_byte(0);
                self.emit_op(Op::Return);
                return Ok(());
            }
            _ => {}
        }

        if self.match_token(TokenKind::Semicolon)? {
            self.emit_op(Op::LoadNull);
        } else {
            self.expression()?;
            self.consume(TokenKind::Semicolon, "Expected ';' after return value.")?;
        }
        self.emit_op(Op::Return);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Expressions.
    // ------------------------------------------------------------------

    fn expression(&mut self) -> VmResult<()> {
        self.parse_precedence(Precedence::Assignment)
    }

    fn parse_precedence(&mut self, precedence: Precedence) -> VmResult<()> {
        self.advance()?;
        let can_assign = precedence <= Precedence::Assignment;
        self.prefix_rule(can_assign)?;

        while precedence <= Self::infix_precedence(self.current.kind) {
            self.advance()?;
            self.infix_rule(can_assign)?;
        }

        if can_assign && self.check(TokenKind::Equal) {
            return Err(self.error_at_current("Invalid assignment target."));
        }
        Ok(())
    }

    fn infix_precedence(kind: TokenKind) -> Precedence {
        match kind {
            TokenKind::BarBar => Precedence::Or,
            TokenKind::AmpAmp => Precedence::And,
            TokenKind::QuestionQuestion | TokenKind::BangBang => Precedence::Coalesce,
            TokenKind::EqualEqual | TokenKind::BangEqual => Precedence::Equality,
            TokenKind::Less
            | TokenKind::LessEqual
            | TokenKind::Greater
            | TokenKind::GreaterEqual
            | TokenKind::In => Precedence::Comparison,
            TokenKind::Bar => Precedence::BitOr,
            TokenKind::Caret => Precedence::BitXor,
            TokenKind::Amp => Precedence::BitAnd,
            TokenKind::LessLess | TokenKind::GreaterGreater => Precedence::Shift,
            TokenKind::Plus | TokenKind::Minus => Precedence::Term,
            TokenKind::Star
            | TokenKind::Slash
            | TokenKind::SlashSlash
            | TokenKind::Percent => Precedence::Factor,
            TokenKind::StarStar => Precedence::Power,
            TokenKind::LParen
            | TokenKind::LBracket
            | TokenKind::Dot
            | TokenKind::Colon
            | TokenKind::ColonColon => Precedence::Call,
            _ => Precedence::None,
        }
    }

    fn prefix_rule(&mut self, can_assign: bool) -> VmResult<()> {
        match self.previous.kind {
            TokenKind::LParen => {
                self.expression()?;
                self.consume(TokenKind::RParen, "Expected ')' after expression.")
            }
            TokenKind::Minus | TokenKind::Plus | TokenKind::Bang | TokenKind::Tilde => {
                self.unary()
            }
            TokenKind::Try => self.try_expression(),
            TokenKind::Null => {
                self.emit_op(Op::LoadNull);
                Ok(())
            }
            TokenKind::True => {
                self.emit_op(Op::LoadTrue);
                Ok(())
            }
            TokenKind::False => {
                self.emit_op(Op::LoadFalse);
                Ok(())
            }
            TokenKind::Int => self.int_literal(),
            TokenKind::Float => self.float_literal(),
            TokenKind::Char => self.char_literal(),
            TokenKind::Str | TokenKind::RawStr => self.string_literal(),
            TokenKind::StrHead => self.interpolated_string(),
            TokenKind::Ident => {
                let name = self.previous.bytes;
                self.named_variable(name, can_assign)
            }
            TokenKind::SelfKw => self.self_expression(),
            TokenKind::Super => self.super_expression(),
            TokenKind::LBracket => self.vec_literal(),
            TokenKind::LBrace => self.map_literal(),
            TokenKind::Def => {
                self.function(FnKind::Function, "<lambda>")
            }
            _ => Err(self.error_at_previous("Expected an expression.")),
        }
    }

    fn infix_rule(&mut self, can_assign: bool) -> VmResult<()> {
        match self.previous.kind {
            TokenKind::BarBar => self.or_expression(),
            TokenKind::AmpAmp => self.and_expression(),
            TokenKind::QuestionQuestion => self.coalesce_expression(Op::JumpIfNotNull),
            TokenKind::BangBang => self.coalesce_expression(Op::JumpIfNotErr),
            TokenKind::LParen => self.call_expression(),
            TokenKind::LBracket => self.index_expression(can_assign),
            TokenKind::Dot => self.dot_expression(can_assign),
            TokenKind::Colon => self.method_expression(),
            TokenKind::ColonColon => self.member_expression(),
            _ => self.binary_expression(),
        }
    }

    fn unary(&mut self) -> VmResult<()> {
        let op_kind = self.previous.kind;
        self.parse_precedence(Precedence::Power)?;
        match op_kind {
            TokenKind::Minus => self.emit_op(Op::UnaryMinus),
            TokenKind::Plus => self.emit_op(Op::UnaryPlus),
            TokenKind::Bang => self.emit_op(Op::UnaryBang),
            TokenKind::Tilde => self.emit_op(Op::UnaryTilde),
            _ => unreachable!("not a unary operator"),
        }
        Ok(())
    }

    /// Compiles the `try` operand into a synthetic zero-arg closure and
    /// emits `Try` against it. The operand is the whole following
    /// expression short of an assignment.
    fn try_expression(&mut self) -> VmResult<()> {
        self.frames.push(FnCompiler::new(FnKind::TryThunk));
        self.begin_scope();
        self.parse_precedence(Precedence::Or)?;
        self.emit_op(Op::Return);
        let (fun, upvalues) = self.end_function("<try>")?;
        self.emit_closure(fun, &upvalues)?;
        self.emit_op(Op::Try);
        Ok(())
    }

    fn binary_expression(&mut self) -> VmResult<()> {
        let op_kind = self.previous.kind;
        let precedence = Self::infix_precedence(op_kind);

        // `**` is right-associative; everything else is left.
        if op_kind == TokenKind::StarStar {
            self.parse_precedence(Precedence::Power)?;
        } else {
            self.parse_precedence(precedence.next())?;
        }

        let op = match op_kind {
            TokenKind::Plus => Op::BinaryPlus,
            TokenKind::Minus => Op::BinaryMinus,
            TokenKind::Star => Op::BinaryStar,
            TokenKind::Slash => Op::BinarySlash,
            TokenKind::SlashSlash => Op::BinarySlashSlash,
            TokenKind::Percent => Op::BinaryPercent,
            TokenKind::StarStar => Op::BinaryStarStar,
            TokenKind::EqualEqual => Op::BinaryEqualEqual,
            TokenKind::BangEqual => Op::BinaryBangEqual,
            TokenKind::Less => Op::BinaryLess,
            TokenKind::LessEqual => Op::BinaryLessEqual,
            TokenKind::Greater => Op::BinaryGreater,
            TokenKind::GreaterEqual => Op::BinaryGreaterEqual,
            TokenKind::In => Op::BinaryIn,
            TokenKind::Amp => Op::BinaryAmp,
            TokenKind::Bar => Op::BinaryBar,
            TokenKind::Caret => Op::BinaryCaret,
            TokenKind::LessLess => Op::BinaryLessLess,
            TokenKind::GreaterGreater => Op::BinaryGreaterGreater,
            _ => return Err(self.error_at_previous("Expected a binary operator.")),
        };
        self.emit_op(op);
        Ok(())
    }

    fn and_expression(&mut self) -> VmResult<()> {
        let end_jump = self.emit_jump(Op::JumpIfFalse);
        self.emit_op(Op::Pop);
        self.parse_precedence(Precedence::And.next())?;
        self.patch_jump(end_jump)
    }

    fn or_expression(&mut self) -> VmResult<()> {
        let end_jump = self.emit_jump(Op::JumpIfTrue);
        self.emit_op(Op::Pop);
        self.parse_precedence(Precedence::Or.next())?;
        self.patch_jump(end_jump)
    }

    /// `??` keeps the left side unless it is null; `!!` unless it is an
    /// `Err`.
    fn coalesce_expression(&mut self, jump_op: Op) -> VmResult<()> {
        let end_jump = self.emit_jump(jump_op);
        self.emit_op(Op::Pop);
        self.parse_precedence(Precedence::Coalesce.next())?;
        self.patch_jump(end_jump)
    }

    fn call_expression(&mut self) -> VmResult<()> {
        let arg_count = self.argument_list()?;
        self.emit_op(Op::Call);
        self.emit_byte(arg_count);
        Ok(())
    }

    fn argument_list(&mut self) -> VmResult<u8> {
        let mut count: usize = 0;
        if !self.check(TokenKind::RParen) {
            loop {
                self.expression()?;
                count += 1;
                if count > MAX_CALL_ARGS {
                    return Err(self.error_at_previous("Too many call arguments."));
                }
                if !self.match_token(TokenKind::Comma)? {
                    break;
                }
            }
        }
        self.consume(TokenKind::RParen, "Expected ')' after arguments.")?;
        Ok(count as u8)
    }

    fn index_expression(&mut self, can_assign: bool) -> VmResult<()> {
        self.expression()?;
        self.consume(TokenKind::RBracket, "Expected ']' after index.")?;

        if can_assign && self.match_token(TokenKind::Equal)? {
            self.expression()?;
            self.emit_op(Op::SetIndex);
        } else if can_assign
            && (self.check(TokenKind::PlusEqual) || self.check(TokenKind::MinusEqual))
        {
            let compound = self.current.kind;
            self.advance()?;
            self.emit_op(Op::Dup2);
            self.emit_op(Op::GetIndex);
            self.expression()?;
            self.emit_op(if compound == TokenKind::PlusEqual {
                Op::BinaryPlus
            } else {
                Op::BinaryMinus
            });
            self.emit_op(Op::SetIndex);
        } else {
            self.emit_op(Op::GetIndex);
        }
        Ok(())
    }

    fn dot_expression(&mut self, can_assign: bool) -> VmResult<()> {
        self.consume(TokenKind::Ident, "Expected a field name after '.'.")?;
        let name_index = self.identifier_constant(self.previous.bytes)?;

        if can_assign && self.match_token(TokenKind::Equal)? {
            self.expression()?;
            self.emit_op(Op::SetField);
            self.emit_u16(name_index);
        } else if can_assign
            && (self.check(TokenKind::PlusEqual) || self.check(TokenKind::MinusEqual))
        {
            let compound = self.current.kind;
            self.advance()?;
            self.emit_op(Op::Dup);
            self.emit_op(Op::GetField);
            self.emit_u16(name_index);
            self.expression()?;
            self.emit_op(if compound == TokenKind::PlusEqual {
                Op::BinaryPlus
            } else {
                Op::BinaryMinus
            });
            self.emit_op(Op::SetField);
            self.emit_u16(name_index);
        } else {
            self.emit_op(Op::GetField);
            self.emit_u16(name_index);
        }
        Ok(())
    }

    /// `receiver:name(...)` invokes; `receiver:name` binds.
    fn method_expression(&mut self) -> VmResult<()> {
        self.consume(TokenKind::Ident, "Expected a method name after ':'.")?;
        let name_index = self.identifier_constant(self.previous.bytes)?;

        if self.match_token(TokenKind::LParen)? {
            let arg_count = self.argument_list()?;
            self.emit_op(Op::InvokeMethod);
            self.emit_u16(name_index);
            self.emit_byte(arg_count);
        } else {
            self.emit_op(Op::GetMethod);
            self.emit_u16(name_index);
        }
        Ok(())
    }

    fn member_expression(&mut self) -> VmResult<()> {
        self.consume(TokenKind::Ident, "Expected a member name after '::'.")?;
        let name_index = self.identifier_constant(self.previous.bytes)?;
        self.emit_op(Op::GetMember);
        self.emit_u16(name_index);
        Ok(())
    }

    fn self_expression(&mut self) -> VmResult<()> {
        if self.classes.is_empty() {
            return Err(self.error_at_previous("'self' outside a method."));
        }
        self.named_variable(b"self", false)
    }

    fn super_expression(&mut self) -> VmResult<()> {
        let Some(class) = self.classes.last() else {
            return Err(self.error_at_previous("'super' outside a method."));
        };
        if !class.has_superclass {
            return Err(self.error_at_previous("'super' in a class with no superclass."));
        }

        self.consume(TokenKind::Colon, "Expected ':' after 'super'.")?;
        self.consume(TokenKind::Ident, "Expected a superclass method name.")?;
        let name_index = self.identifier_constant(self.previous.bytes)?;

        self.named_variable(b"self", false)?;
        if self.match_token(TokenKind::LParen)? {
            let arg_count = self.argument_list()?;
            self.named_variable(b"super", false)?;
            self.emit_op(Op::InvokeSuperMethod);
            self.emit_u16(name_index);
            self.emit_byte(arg_count);
        } else {
            self.named_variable(b"super", false)?;
            self.emit_op(Op::GetSuperMethod);
            self.emit_u16(name_index);
        }
        Ok(())
    }

    /// Resolution order: current frame's locals innermost-out, then the
    /// enclosing frames via upvalues, then a global reference by name.
    fn named_variable(&mut self, name: &'src [u8], can_assign: bool) -> VmResult<()> {
        let frame_index = self.frames.len() - 1;

        #[derive(Clone, Copy)]
        enum Target {
            Local(u8),
            Upvalue(u8),
            Global(u16),
        }

        let target = if let Some(slot) = self.resolve_local(frame_index, name)? {
            Target::Local(slot)
        } else if let Some(index) = self.resolve_upvalue(frame_index, name)? {
            Target::Upvalue(index)
        } else {
            Target::Global(self.identifier_constant(name)?)
        };

        let (get_op, set_op) = match target {
            Target::Local(_) => (Op::GetLocal, Op::SetLocal),
            Target::Upvalue(_) => (Op::GetUpvalue, Op::SetUpvalue),
            Target::Global(_) => (Op::GetGlobal, Op::SetGlobal),
        };

        let emit_target = |compiler: &mut Self, op: Op| match target {
            Target::Local(slot) => {
                compiler.emit_op(op);
                compiler.emit_byte(slot);
            }
            Target::Upvalue(index) => {
                compiler.emit_op(op);
                compiler.emit_byte(index);
            }
            Target::Global(index) => {
                compiler.emit_op(op);
                compiler.emit_u16(index);
            }
        };

        if can_assign && self.match_token(TokenKind::Equal)? {
            self.expression()?;
            emit_target(self, set_op);
        } else if can_assign
            && (self.check(TokenKind::PlusEqual) || self.check(TokenKind::MinusEqual))
        {
            let compound = self.current.kind;
            self.advance()?;
            emit_target(self, get_op);
            self.expression()?;
            self.emit_op(if compound == TokenKind::PlusEqual {
                Op::BinaryPlus
            } else {
                Op::BinaryMinus
            });
            emit_target(self, set_op);
        } else {
            emit_target(self, get_op);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Literals.
    // ------------------------------------------------------------------

    fn int_literal(&mut self) -> VmResult<()> {
        let text: String = self
            .previous
            .text()
            .chars()
            .filter(|&c| c != '_')
            .collect();

        let parsed = if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X"))
        {
            i64::from_str_radix(hex, 16)
        } else if let Some(oct) = text.strip_prefix("0o").or_else(|| text.strip_prefix("0O")) {
            i64::from_str_radix(oct, 8)
        } else if let Some(bin) = text.strip_prefix("0b").or_else(|| text.strip_prefix("0B")) {
            i64::from_str_radix(bin, 2)
        } else {
            text.parse::<i64>()
        };

        let value = match parsed {
            Ok(value) => value,
            Err(_) => return Err(self.error_at_previous("Invalid integer literal.")),
        };

        match value {
            0 => self.emit_op(Op::LoadI64_0),
            1 => self.emit_op(Op::LoadI64_1),
            2 => self.emit_op(Op::LoadI64_2),
            3 => self.emit_op(Op::LoadI64_3),
            4 => self.emit_op(Op::LoadI64_4),
            5 => self.emit_op(Op::LoadI64_5),
            6 => self.emit_op(Op::LoadI64_6),
            7 => self.emit_op(Op::LoadI64_7),
            8 => self.emit_op(Op::LoadI64_8),
            9 => self.emit_op(Op::LoadI64_9),
            _ => self.emit_constant(Value::I64(value))?,
        }
        Ok(())
    }

    fn float_literal(&mut self) -> VmResult<()> {
        let text: String = self
            .previous
            .text()
            .chars()
            .filter(|&c| c != '_')
            .collect();
        match text.parse::<f64>() {
            Ok(value) => self.emit_constant(Value::F64(value)),
            Err(_) => Err(self.error_at_previous("Invalid float literal.")),
        }
    }

    fn char_literal(&mut self) -> VmResult<()> {
        let bytes = match unescape_bytes(self.previous.bytes) {
            Ok(bytes) => bytes,
            Err(_) => return Err(self.error_at_previous("Invalid escape in char literal.")),
        };
        let Some(cp) = utf8::read_utf8_codepoint(&bytes) else {
            return Err(self.error_at_previous("Invalid char literal."));
        };
        if cp.length != bytes.len() {
            return Err(
                self.error_at_previous("Char literal must contain exactly one code point.")
            );
        }
        let Some(c) = char::from_u32(cp.value) else {
            return Err(self.error_at_previous("Invalid char literal."));
        };
        self.emit_constant(Value::Char(c))
    }

    /// Escape processing happens here, once, at string-object
    /// construction; runtime strings are byte-exact.
    fn string_literal(&mut self) -> VmResult<()> {
        let string = if self.previous.kind == TokenKind::RawStr {
            self.vm.intern_bytes(self.previous.bytes)?
        } else {
            let bytes = match unescape_bytes(self.previous.bytes) {
                Ok(bytes) => bytes,
                Err(_) => {
                    return Err(self.error_at_previous("Invalid escape in string literal."))
                }
            };
            self.vm.intern_owned(bytes)?
        };
        self.emit_constant(Value::Obj(string))
    }

    /// `"a${x}b"` compiles to `"a" + $str(x) + "b"`.
    fn interpolated_string(&mut self) -> VmResult<()> {
        self.emit_string_fragment()?;

        loop {
            // $str(<expr>)
            let str_name = self.identifier_constant(b"$str")?;
            self.emit_op(Op::GetGlobal);
            self.emit_u16(str_name);
            self.expression()?;
            self.emit_op(Op::Call);
            self.emit_byte(1);
            self.emit_op(Op::BinaryPlus);

            if self.match_token(TokenKind::StrMid)? {
                self.emit_string_fragment()?;
                self.emit_op(Op::BinaryPlus);
                continue;
            }
            self.consume(TokenKind::StrTail, "Unterminated string interpolation.")?;
            self.emit_string_fragment()?;
            self.emit_op(Op::BinaryPlus);
            return Ok(());
        }
    }

    fn emit_string_fragment(&mut self) -> VmResult<()> {
        let bytes = match unescape_bytes(self.previous.bytes) {
            Ok(bytes) => bytes,
            Err(_) => return Err(self.error_at_previous("Invalid escape in string literal.")),
        };
        let string = self.vm.intern_owned(bytes)?;
        self.emit_constant(Value::Obj(string))
    }

    fn vec_literal(&mut self) -> VmResult<()> {
        let mut count: usize = 0;
        if !self.check(TokenKind::RBracket) {
            loop {
                self.parse_precedence(Precedence::Or)?;
                count += 1;
                if !self.match_token(TokenKind::Comma)? {
                    break;
                }
                if self.check(TokenKind::RBracket) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RBracket, "Expected ']' after vector literal.")?;
        if count > u16::MAX as usize {
            return Err(self.error_at_previous("Too many elements in vector literal."));
        }
        self.emit_op(Op::MakeVec);
        self.emit_u16(count as u16);
        Ok(())
    }

    /// `{"key" = value, ...}`; a leading `:` after the brace is accepted.
    fn map_literal(&mut self) -> VmResult<()> {
        self.match_token(TokenKind::Colon)?;

        let mut count: usize = 0;
        if !self.check(TokenKind::RBrace) {
            loop {
                self.parse_precedence(Precedence::Or)?;
                self.consume(TokenKind::Equal, "Expected '=' after map key.")?;
                self.parse_precedence(Precedence::Or)?;
                count += 1;
                if !self.match_token(TokenKind::Comma)? {
                    break;
                }
                if self.check(TokenKind::RBrace) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RBrace, "Expected '}' after map literal.")?;
        if count > u16::MAX as usize {
            return Err(self.error_at_previous("Too many entries in map literal."));
        }
        self.emit_op(Op::MakeMap);
        self.emit_u16(count as u16);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile_ok(src: &str) -> bool {
        let mut vm = Vm::new();
        compile(&mut vm, src.as_bytes(), "test").is_ok()
    }

    fn compile_err(src: &str) -> Panic {
        let mut vm = Vm::new();
        match compile(&mut vm, src.as_bytes(), "test") {
            Err(Halt::Panic(panic)) => panic,
            _ => panic!("expected a syntax error"),
        }
    }

    #[test]
    fn test_statements_compile() {
        assert!(compile_ok("echo 1 + 2;"));
        assert!(compile_ok("var x = 1; x = x + 1; echo x;"));
        assert!(compile_ok("def f(a, b) { return a * b; } echo f(2, 3);"));
        assert!(compile_ok("if 1 < 2 { echo 1; } else if 2 < 3 { echo 2; } else { echo 3; }"));
        assert!(compile_ok("var i = 0; while i < 10 { i += 1; }"));
        assert!(compile_ok("loop var i = 0; i < 3; i += 1 { echo i; }"));
        assert!(compile_ok("for x in [1, 2, 3] { echo x; }"));
        assert!(compile_ok("for (k, v) in m { echo k, v; }"));
        assert!(compile_ok("var t = try $panic(\"boom\");"));
        assert!(compile_ok("import a::b; echo a::b::x;"));
        assert!(compile_ok("import a::b::{x, y};"));
        assert!(compile_ok("var (a, b) = $tup(1, 2);"));
        assert!(compile_ok("var (a, b) = [1, 2];"));
    }

    #[test]
    fn test_class_syntax_compiles() {
        assert!(compile_ok(
            "class A { var x = 1; def m() { return self.x; } }"
        ));
        assert!(compile_ok("class B < A { def m() { return super:m(); } }"));
        assert!(compile_ok("class C { def $init(x) { self.x = x; } var x; }"));
    }

    #[test]
    fn test_literals_compile() {
        assert!(compile_ok("echo 0xFF, 0b1010, 0o777, 1_000_000, 2.5e-3;"));
        assert!(compile_ok("echo 'a', '\\n', '\\u{e9}';"));
        assert!(compile_ok("echo \"interp: ${1 + 2}!\";"));
        assert!(compile_ok("echo `raw \\n string`;"));
        assert!(compile_ok("echo {:\"a\" = 1, \"b\" = 2};"));
        assert!(compile_ok("echo {\"a\" = 1};"));
        assert!(compile_ok("var v = [1, 2, 3]:map(def(x) { return x * x; });"));
    }

    #[test]
    fn test_scope_state_is_restored() {
        // Locals declared inside nested scopes don't leak out; the same
        // names compile again afterwards.
        assert!(compile_ok(
            "def f() { { var a = 1; { var b = a; } } { var a = 2; var b = 3; } }"
        ));
    }

    #[test]
    fn test_syntax_errors_carry_location() {
        let panic = compile_err("var x = ;\n");
        assert_eq!(panic.code, crate::error::ErrorCode::SyntaxError);
        assert_eq!(panic.line, Some(1));
        assert_eq!(panic.source_id.as_deref(), Some("test"));

        let panic = compile_err("echo 1;\nvar = 2;");
        assert_eq!(panic.line, Some(2));
    }

    #[test]
    fn test_invalid_constructs_are_rejected() {
        assert_eq!(
            compile_err("return 1;").code,
            crate::error::ErrorCode::SyntaxError
        );
        assert_eq!(
            compile_err("break;").code,
            crate::error::ErrorCode::SyntaxError
        );
        assert_eq!(
            compile_err("echo self;").code,
            crate::error::ErrorCode::SyntaxError
        );
        assert_eq!(
            compile_err("def f() { var a = 1; var a = 2; }").code,
            crate::error::ErrorCode::SyntaxError
        );
        assert_eq!(
            compile_err("1 + ;").code,
            crate::error::ErrorCode::SyntaxError
        );
    }

    #[test]
    fn test_closures_capture_locals() {
        assert!(compile_ok(
            "def outer() { var x = 1; def inner() { return x; } return inner; }"
        ));
        assert!(compile_ok(
            "def a() { var x = 1; def b() { def c() { return x; } return c; } return b; }"
        ));
    }
}
