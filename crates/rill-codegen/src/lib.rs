//! Bytecode compiler for the Rill language.
//!
//! Compiles a classified token stream to a bytecode image in two passes:
//! pass 1 collects every function's parameter list and every structure's
//! field list without emitting code; pass 2 is a single cursor walk over
//! the stream, dispatching by token kind. Expressions arrive in postfix
//! order from the classifier, so emission is a straight loop; call
//! argument sub-streams are linearized here, at the point the call is
//! compiled. Jump targets are patched in a final fix-up once every
//! label's position is known.

mod builder;
mod disasm;
mod error;

pub use builder::ImageBuilder;
pub use disasm::disasm;
pub use error::CompileError;

use rustc_hash::FxHashMap;

use rill_syntax::classify::{linearize_expression, Classified};
use rill_syntax::token::{Token, TokenKind};
use rill_vm::image::{Constant, Image, StructDef, VarDef};
use rill_vm::instruction::Opcode;
use rust_decimal::Decimal;

/// Compile a classified token stream into a finalized image.
pub fn compile(classified: &Classified) -> Result<Image, CompileError> {
    Compiler::new().run(classified)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScopeKind {
    Top,
    Func,
    Block,
}

struct Scope {
    kind: ScopeKind,
    entries: Vec<(String, u32)>,
}

struct Compiler {
    builder: ImageBuilder,
    funcs: FxHashMap<String, Vec<String>>,
    structs: FxHashMap<String, Vec<String>>,
    imports: FxHashMap<String, u32>,
    scopes: Vec<Scope>,
    next_label: u32,
}

/// Cursor over the classified token stream. The stream always ends with
/// `Eof`, so peeking past the end is not a concern for well-formed input.
struct Cursor<'a> {
    toks: &'a [Token],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(toks: &'a [Token]) -> Self {
        Self { toks, pos: 0 }
    }

    fn tok(&self) -> &'a Token {
        &self.toks[self.pos.min(self.toks.len() - 1)]
    }

    fn kind(&self) -> TokenKind {
        self.tok().kind
    }

    fn at(&self, kind: TokenKind) -> bool {
        self.kind() == kind
    }

    fn bump(&mut self) -> &'a Token {
        let tok = self.tok();
        if self.pos < self.toks.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, kind: TokenKind) -> Result<&'a Token, CompileError> {
        if self.kind() == kind {
            Ok(self.bump())
        } else {
            Err(unexpected(self.tok()))
        }
    }

    fn at_stmt_end(&self) -> bool {
        matches!(
            self.kind(),
            TokenKind::NewLine | TokenKind::Semi | TokenKind::Eof
        )
    }

    /// Tokens from here to the statement end marker (not consumed).
    fn stmt_slice(&mut self) -> &'a [Token] {
        let start = self.pos;
        while !self.at_stmt_end() {
            self.pos += 1;
        }
        &self.toks[start..self.pos]
    }

    /// Tokens from here up to the next token of `kind` (not consumed);
    /// fails if the statement ends first.
    fn slice_until_kind(&mut self, kind: TokenKind) -> Result<&'a [Token], CompileError> {
        let start = self.pos;
        while !self.at_stmt_end() && self.kind() != kind {
            self.pos += 1;
        }
        if self.kind() == kind {
            Ok(&self.toks[start..self.pos])
        } else {
            Err(unexpected(self.tok()))
        }
    }

    /// Tokens from here up to the token carrying sequence id `seq` (not
    /// consumed); fails if the statement ends first.
    fn slice_until_seq(&mut self, seq: u32) -> Result<&'a [Token], CompileError> {
        let start = self.pos;
        while !self.at_stmt_end() && self.tok().seq != seq {
            self.pos += 1;
        }
        if self.tok().seq == seq {
            Ok(&self.toks[start..self.pos])
        } else {
            Err(unexpected(self.tok()))
        }
    }
}

fn unexpected(tok: &Token) -> CompileError {
    CompileError::UnexpectedToken {
        kind: tok.kind.name(),
        text: tok.text.clone(),
    }
}

/// Index of the closing bracket matching the opener at `open`.
fn matching_close(tokens: &[Token], open: usize) -> Result<usize, CompileError> {
    let mut depth = 0usize;
    for (j, tok) in tokens.iter().enumerate().skip(open) {
        match tok.kind {
            TokenKind::LParen | TokenKind::LBracket => depth += 1,
            TokenKind::RParen | TokenKind::RBracket => {
                depth -= 1;
                if depth == 0 {
                    return Ok(j);
                }
            }
            _ => {}
        }
    }
    Err(CompileError::UnexpectedEof)
}

impl Compiler {
    fn new() -> Self {
        Self {
            builder: ImageBuilder::new(),
            funcs: FxHashMap::default(),
            structs: FxHashMap::default(),
            imports: FxHashMap::default(),
            scopes: Vec::new(),
            next_label: 0,
        }
    }

    fn run(mut self, classified: &Classified) -> Result<Image, CompileError> {
        for binding in &classified.imports {
            self.imports.insert(binding.name.clone(), binding.index);
        }
        self.collect_declarations(&classified.tokens)?;

        self.scopes.push(Scope {
            kind: ScopeKind::Top,
            entries: Vec::new(),
        });
        let mut cur = Cursor::new(&classified.tokens);
        self.compile_block(&mut cur, &[])?;
        self.builder.finalize()
    }

    // === Pass 1: declaration collection ===

    fn collect_declarations(&mut self, tokens: &[Token]) -> Result<(), CompileError> {
        let mut i = 0;
        while i < tokens.len() {
            match tokens[i].kind {
                TokenKind::Func => {
                    let name_tok = tokens.get(i + 1).ok_or(CompileError::UnexpectedEof)?;
                    if name_tok.kind != TokenKind::FuncDecl {
                        return Err(unexpected(name_tok));
                    }
                    let mut params = Vec::new();
                    let mut j = i + 2;
                    if tokens.get(j).map(|t| t.kind) == Some(TokenKind::LParen) {
                        j += 1;
                        while j < tokens.len() && tokens[j].kind != TokenKind::RParen {
                            if matches!(
                                tokens[j].kind,
                                TokenKind::VarDecl | TokenKind::VarRef | TokenKind::Ident
                            ) {
                                params.push(tokens[j].text.clone());
                            }
                            j += 1;
                        }
                    }
                    if self
                        .funcs
                        .insert(name_tok.text.clone(), params)
                        .is_some()
                    {
                        return Err(CompileError::DuplicateFunction(name_tok.text.clone()));
                    }
                    i = j;
                }
                TokenKind::Struct => {
                    let name_tok = tokens.get(i + 1).ok_or(CompileError::UnexpectedEof)?;
                    if name_tok.kind != TokenKind::StructDecl {
                        return Err(unexpected(name_tok));
                    }
                    let mut fields = Vec::new();
                    let mut j = i + 2;
                    while j < tokens.len()
                        && !matches!(tokens[j].kind, TokenKind::End | TokenKind::Eof)
                    {
                        if matches!(
                            tokens[j].kind,
                            TokenKind::VarDecl | TokenKind::VarRef | TokenKind::Ident
                        ) {
                            fields.push(tokens[j].text.clone());
                        }
                        j += 1;
                    }
                    if self
                        .structs
                        .insert(name_tok.text.clone(), fields)
                        .is_some()
                    {
                        return Err(CompileError::DuplicateStruct(name_tok.text.clone()));
                    }
                    i = j;
                }
                _ => {}
            }
            i += 1;
        }
        Ok(())
    }

    // === Scopes ===

    fn push_scope(&mut self, kind: ScopeKind) {
        self.scopes.push(Scope {
            kind,
            entries: Vec::new(),
        });
    }

    /// Close the current scope, emitting a delete for every binding it
    /// declared, newest first.
    fn pop_scope(&mut self) {
        if let Some(scope) = self.scopes.pop() {
            for (_, id) in scope.entries.iter().rev() {
                self.builder.emit_var(Opcode::DeleteVar, *id);
            }
        }
    }

    /// Emit deletes for everything declared from the innermost scope
    /// through the enclosing function scope, without closing any scope.
    /// Used by `return`, which leaves the block structure early.
    fn emit_return_unwind(&mut self) {
        let Some(func_at) = self
            .scopes
            .iter()
            .rposition(|s| s.kind == ScopeKind::Func)
        else {
            return;
        };
        let ids: Vec<u32> = self.scopes[func_at..]
            .iter()
            .rev()
            .flat_map(|s| s.entries.iter().rev().map(|(_, id)| *id))
            .collect();
        for id in ids {
            self.builder.emit_var(Opcode::DeleteVar, id);
        }
    }

    fn resolve(&self, name: &str) -> Option<u32> {
        self.scopes
            .iter()
            .rev()
            .flat_map(|s| s.entries.iter().rev())
            .find(|(n, _)| n == name)
            .map(|(_, id)| *id)
    }

    fn resolve_or_intern(&mut self, name: &str) -> u32 {
        match self.resolve(name) {
            Some(id) => id,
            // Unresolved references get a fresh id; the runtime faults
            // with an unresolved-variable error when it is reached.
            None => self.builder.intern(name),
        }
    }

    fn fresh_label(&mut self, prefix: &str) -> String {
        let label = format!("{prefix}_{}", self.next_label);
        self.next_label += 1;
        label
    }

    // === Pass 2: linear emission ===

    fn compile_block(
        &mut self,
        cur: &mut Cursor,
        terms: &[TokenKind],
    ) -> Result<TokenKind, CompileError> {
        loop {
            let kind = cur.kind();
            if terms.contains(&kind) {
                return Ok(kind);
            }
            match kind {
                TokenKind::Eof => {
                    return if terms.is_empty() {
                        Ok(TokenKind::Eof)
                    } else {
                        Err(CompileError::UnexpectedEof)
                    };
                }
                TokenKind::NewLine | TokenKind::Semi => {
                    cur.bump();
                }
                TokenKind::Var => self.stmt_var(cur)?,
                TokenKind::SetElem => self.stmt_set_elem(cur)?,
                TokenKind::If => self.stmt_if(cur)?,
                TokenKind::Loop => self.stmt_loop(cur)?,
                TokenKind::Func => self.stmt_func(cur)?,
                TokenKind::Struct => self.skip_struct(cur)?,
                TokenKind::Return => self.stmt_return(cur)?,
                TokenKind::VarRef => self.stmt_var_ref(cur)?,
                TokenKind::FuncCall
                | TokenKind::NativeCall
                | TokenKind::StructInit
                | TokenKind::Number
                | TokenKind::Str
                | TokenKind::True
                | TokenKind::False
                | TokenKind::Null
                | TokenKind::LParen
                | TokenKind::LBracket
                | TokenKind::Neg
                | TokenKind::Not => {
                    let stmt = cur.stmt_slice();
                    self.compile_expr(stmt)?;
                }
                _ => return Err(unexpected(cur.tok())),
            }
        }
    }

    /// `var NAME` / `var NAME = expr`. A redeclaration in the active
    /// scope rebinds through `CopyVar` under a digit-versioned name.
    fn stmt_var(&mut self, cur: &mut Cursor) -> Result<(), CompileError> {
        cur.bump();
        let name_tok = cur.expect(TokenKind::VarDecl)?;
        let name = name_tok.text.clone();

        let scope = self.scopes.last().expect("scope stack is never empty");
        let existing = scope.entries.iter().filter(|(n, _)| n == &name).count();
        let id = if existing > 0 {
            let id = self.resolve(&name).expect("existing binding resolves");
            let versioned = format!("{name}{}", existing + 1);
            self.builder.emit_create(
                Opcode::CopyVar,
                VarDef {
                    id,
                    name: versioned,
                    is_const: false,
                },
            );
            id
        } else {
            let id = self.builder.intern(&name);
            self.builder.emit_create(
                Opcode::CreateVar,
                VarDef {
                    id,
                    name: name.clone(),
                    is_const: false,
                },
            );
            id
        };
        self.scopes
            .last_mut()
            .expect("scope stack is never empty")
            .entries
            .push((name, id));

        if cur.at(TokenKind::Assign) {
            cur.bump();
            let rhs = cur.stmt_slice();
            if rhs.is_empty() {
                return Err(unexpected(cur.tok()));
            }
            self.compile_expr(rhs)?;
            self.builder.emit_var(Opcode::SetVar, id);
        }
        Ok(())
    }

    /// A statement beginning with a variable reference: an assignment to
    /// the variable or one of its fields, or a bare expression.
    fn stmt_var_ref(&mut self, cur: &mut Cursor) -> Result<(), CompileError> {
        let stmt = cur.stmt_slice();
        let mut j = 1;
        while j + 1 < stmt.len() && stmt[j].kind == TokenKind::Dot {
            j += 2;
        }
        if j < stmt.len() && stmt[j].kind == TokenKind::Assign {
            let rhs = &stmt[j + 1..];
            if rhs.is_empty() {
                return Err(unexpected(&stmt[j]));
            }
            self.compile_expr(rhs)?;
            let id = self.resolve_or_intern(&stmt[0].text);
            if j == 1 {
                self.builder.emit_var(Opcode::SetVar, id);
            } else {
                // Field assignment: load the variable, walk intermediate
                // fields, set the last one.
                self.builder.emit_var(Opcode::LoadVar, id);
                let mut f = 1;
                while f < j {
                    let field_id = self.builder.intern(&stmt[f + 1].text);
                    if f + 2 < j {
                        self.builder.emit(Opcode::LoadField, field_id);
                    } else {
                        self.builder.emit(Opcode::SetField, field_id);
                    }
                    f += 2;
                }
            }
            Ok(())
        } else {
            self.compile_expr(stmt)
        }
    }

    /// `X setElem of Y to Z` — the classifier relocated X to the end of
    /// the statement and linked the `setElem` token to its first token.
    fn stmt_set_elem(&mut self, cur: &mut Cursor) -> Result<(), CompileError> {
        let set_tok = cur.bump();
        let link = set_tok.link.ok_or_else(|| unexpected(set_tok))?;
        cur.expect(TokenKind::Of)?;
        let index = cur.slice_until_kind(TokenKind::To)?;
        if index.is_empty() {
            return Err(unexpected(cur.tok()));
        }
        self.compile_expr(index)?;
        cur.expect(TokenKind::To)?;
        let value = cur.slice_until_seq(link)?;
        if value.is_empty() {
            return Err(unexpected(cur.tok()));
        }
        self.compile_expr(value)?;
        let target = cur.stmt_slice();
        self.compile_expr(target)?;
        self.builder.emit(Opcode::IndexSet, 0);
        Ok(())
    }

    fn stmt_if(&mut self, cur: &mut Cursor) -> Result<(), CompileError> {
        cur.bump();
        let cond = cur.stmt_slice();
        if cond.is_empty() {
            return Err(unexpected(cur.tok()));
        }
        self.compile_expr(cond)?;
        let else_label = self.fresh_label("else");
        let end_label = self.fresh_label("endif");
        self.builder.emit_jump(Opcode::GotoIfFalse, &else_label);

        self.push_scope(ScopeKind::Block);
        let term = self.compile_block(cur, &[TokenKind::Else, TokenKind::End])?;
        self.pop_scope();
        self.builder.emit_jump(Opcode::Goto, &end_label);
        self.builder.set_label(&else_label)?;

        if term == TokenKind::Else {
            cur.bump();
            self.push_scope(ScopeKind::Block);
            self.compile_block(cur, &[TokenKind::End])?;
            self.pop_scope();
        }
        cur.expect(TokenKind::End)?;
        self.builder.set_label(&end_label)?;
        Ok(())
    }

    /// `loop NAME in INIT to BOUND … end` — the general loop primitive:
    /// init, test label, conditional exit, body, step, jump to test.
    fn stmt_loop(&mut self, cur: &mut Cursor) -> Result<(), CompileError> {
        cur.bump();
        let name_tok = cur.expect(TokenKind::VarDecl)?;
        let name = name_tok.text.clone();
        cur.expect(TokenKind::In)?;

        self.push_scope(ScopeKind::Block);
        let id = self.builder.intern(&name);
        self.builder.emit_create(
            Opcode::CreateVar,
            VarDef {
                id,
                name: name.clone(),
                is_const: false,
            },
        );
        self.scopes
            .last_mut()
            .expect("scope stack is never empty")
            .entries
            .push((name, id));

        let init = cur.slice_until_kind(TokenKind::To)?;
        if init.is_empty() {
            return Err(unexpected(cur.tok()));
        }
        self.compile_expr(init)?;
        self.builder.emit_var(Opcode::SetVar, id);
        cur.expect(TokenKind::To)?;
        let bound = cur.stmt_slice();
        if bound.is_empty() {
            return Err(unexpected(cur.tok()));
        }

        let top_label = self.fresh_label("loop");
        let end_label = self.fresh_label("endloop");
        self.builder.set_label(&top_label)?;
        self.builder.emit_var(Opcode::LoadVar, id);
        self.compile_expr(bound)?;
        self.builder.emit(Opcode::Lt, 0);
        self.builder.emit_jump(Opcode::GotoIfFalse, &end_label);

        self.push_scope(ScopeKind::Block);
        self.compile_block(cur, &[TokenKind::End])?;
        cur.expect(TokenKind::End)?;
        self.pop_scope();

        self.builder.emit_var(Opcode::LoadVar, id);
        self.builder.emit_const(Constant::Number(Decimal::ONE));
        self.builder.emit(Opcode::Add, 0);
        self.builder.emit_var(Opcode::SetVar, id);
        self.builder.emit_jump(Opcode::Goto, &top_label);
        self.builder.set_label(&end_label)?;
        self.pop_scope();
        Ok(())
    }

    /// Function declaration. A halt guards against straight-line
    /// execution falling into the body; parameters are bound in reverse
    /// declaration order, matching call-site push order.
    fn stmt_func(&mut self, cur: &mut Cursor) -> Result<(), CompileError> {
        cur.bump();
        let name_tok = cur.expect(TokenKind::FuncDecl)?;
        let name = name_tok.text.clone();
        if cur.at(TokenKind::LParen) {
            let close = matching_close(cur.toks, cur.pos)?;
            cur.pos = close + 1;
        }
        let _ = cur.stmt_slice();

        self.builder.emit(Opcode::Halt, 0);
        self.builder.set_label(&format!("fn_{name}"))?;

        self.push_scope(ScopeKind::Func);
        let params = self.funcs.get(&name).cloned().unwrap_or_default();
        for param in params.iter().rev() {
            let id = self.builder.intern(param);
            self.builder.emit_create(
                Opcode::CreateVar,
                VarDef {
                    id,
                    name: param.clone(),
                    is_const: false,
                },
            );
            self.builder.emit_var(Opcode::SetVar, id);
            self.scopes
                .last_mut()
                .expect("scope stack is never empty")
                .entries
                .push((param.clone(), id));
        }
        self.compile_block(cur, &[TokenKind::End])?;
        cur.expect(TokenKind::End)?;
        self.pop_scope();
        self.builder.emit(Opcode::Ret, 0);
        Ok(())
    }

    fn stmt_return(&mut self, cur: &mut Cursor) -> Result<(), CompileError> {
        cur.bump();
        let expr = cur.stmt_slice();
        if !expr.is_empty() {
            self.compile_expr(expr)?;
        }
        self.emit_return_unwind();
        self.builder.emit(Opcode::Ret, 0);
        Ok(())
    }

    /// Structure blocks were collected in pass 1; they emit nothing.
    fn skip_struct(&mut self, cur: &mut Cursor) -> Result<(), CompileError> {
        cur.bump();
        while !cur.at(TokenKind::End) {
            if cur.at(TokenKind::Eof) {
                return Err(CompileError::UnexpectedEof);
            }
            cur.bump();
        }
        cur.bump();
        Ok(())
    }

    // === Expressions ===

    /// Emit a postfix-ordered expression token span. Each operand pushes
    /// one value; each operator consumes from the top of the stack.
    fn compile_expr(&mut self, tokens: &[Token]) -> Result<(), CompileError> {
        let mut i = 0;
        while i < tokens.len() {
            let tok = &tokens[i];
            match tok.kind {
                TokenKind::Number => {
                    let Some(rill_syntax::token::Literal::Number(n)) = &tok.literal else {
                        return Err(CompileError::BadLiteral(tok.text.clone()));
                    };
                    self.builder.emit_const(Constant::Number(*n));
                    i += 1;
                }
                TokenKind::Str => {
                    let Some(rill_syntax::token::Literal::Str(s)) = &tok.literal else {
                        return Err(CompileError::BadLiteral(tok.text.clone()));
                    };
                    self.builder.emit_const(Constant::Str(s.clone()));
                    i += 1;
                }
                TokenKind::True => {
                    self.builder.emit_const(Constant::Bool(true));
                    i += 1;
                }
                TokenKind::False => {
                    self.builder.emit_const(Constant::Bool(false));
                    i += 1;
                }
                TokenKind::Null => {
                    self.builder.emit_const(Constant::Null);
                    i += 1;
                }
                TokenKind::VarRef => {
                    let id = self.resolve_or_intern(&tok.text);
                    self.builder.emit_var(Opcode::LoadVar, id);
                    i = self.compile_field_chain(tokens, i + 1)?;
                }
                TokenKind::FuncCall => {
                    i = self.compile_user_call(tokens, i)?;
                }
                TokenKind::NativeCall => {
                    i = self.compile_native_call(tokens, i)?;
                }
                TokenKind::StructInit => {
                    i = self.compile_struct_init(tokens, i)?;
                }
                TokenKind::LBracket => {
                    i = self.compile_list_literal(tokens, i)?;
                }
                TokenKind::LParen => {
                    let close = matching_close(tokens, i)?;
                    self.compile_expr(&tokens[i + 1..close])?;
                    i = self.compile_field_chain(tokens, close + 1)?;
                }
                TokenKind::Plus => {
                    self.builder.emit(Opcode::Add, 0);
                    i += 1;
                }
                TokenKind::Minus => {
                    self.builder.emit(Opcode::Sub, 0);
                    i += 1;
                }
                TokenKind::Star => {
                    self.builder.emit(Opcode::Mul, 0);
                    i += 1;
                }
                TokenKind::Slash => {
                    self.builder.emit(Opcode::Div, 0);
                    i += 1;
                }
                TokenKind::Percent => {
                    self.builder.emit(Opcode::Mod, 0);
                    i += 1;
                }
                TokenKind::Neg => {
                    self.builder.emit(Opcode::Neg, 0);
                    i += 1;
                }
                TokenKind::Eq => {
                    self.builder.emit(Opcode::Eq, 0);
                    i += 1;
                }
                TokenKind::NotEq => {
                    self.builder.emit(Opcode::Ne, 0);
                    i += 1;
                }
                TokenKind::Lt => {
                    self.builder.emit(Opcode::Lt, 0);
                    i += 1;
                }
                TokenKind::Gt => {
                    self.builder.emit(Opcode::Gt, 0);
                    i += 1;
                }
                TokenKind::And => {
                    self.builder.emit(Opcode::And, 0);
                    i += 1;
                }
                TokenKind::Or => {
                    self.builder.emit(Opcode::Or, 0);
                    i += 1;
                }
                TokenKind::Not => {
                    self.builder.emit(Opcode::Not, 0);
                    i += 1;
                }
                TokenKind::ElemOf => {
                    self.builder.emit(Opcode::IndexGet, 0);
                    i += 1;
                }
                _ => return Err(unexpected(tok)),
            }
        }
        Ok(())
    }

    fn compile_field_chain(
        &mut self,
        tokens: &[Token],
        mut i: usize,
    ) -> Result<usize, CompileError> {
        while i + 1 < tokens.len() && tokens[i].kind == TokenKind::Dot {
            let field_id = self.builder.intern(&tokens[i + 1].text);
            self.builder.emit(Opcode::LoadField, field_id);
            i += 2;
        }
        Ok(i)
    }

    /// Split the bracketed group opening at `open` into element slices
    /// (depth-1 commas). Returns the slices and the closer's index.
    fn split_grouped<'a>(
        &self,
        tokens: &'a [Token],
        open: usize,
    ) -> Result<(Vec<&'a [Token]>, usize), CompileError> {
        let close = matching_close(tokens, open)?;
        let mut elems: Vec<&[Token]> = Vec::new();
        let mut start = open + 1;
        let mut depth = 0usize;
        for j in open..=close {
            match tokens[j].kind {
                TokenKind::LParen | TokenKind::LBracket => depth += 1,
                TokenKind::RParen | TokenKind::RBracket => depth -= 1,
                TokenKind::Comma if depth == 1 => {
                    if start == j {
                        return Err(unexpected(&tokens[j]));
                    }
                    elems.push(&tokens[start..j]);
                    start = j + 1;
                }
                _ => {}
            }
        }
        if start < close {
            elems.push(&tokens[start..close]);
        } else if !elems.is_empty() {
            // a trailing comma left an empty element
            return Err(unexpected(&tokens[close]));
        }
        Ok((elems, close))
    }

    fn compile_args(&mut self, args: &[&[Token]]) -> Result<(), CompileError> {
        for arg in args {
            let linearized = linearize_expression(arg.to_vec());
            self.compile_expr(&linearized)?;
        }
        Ok(())
    }

    /// User call: push the return address, push the arguments, jump to
    /// the function's label. The return address is the position after the
    /// jump, patched once the jump is placed.
    fn compile_user_call(
        &mut self,
        tokens: &[Token],
        i: usize,
    ) -> Result<usize, CompileError> {
        let name = tokens[i].text.clone();
        if tokens.get(i + 1).map(|t| t.kind) != Some(TokenKind::LParen) {
            return Err(unexpected(&tokens[i]));
        }
        let (args, close) = self.split_grouped(tokens, i + 1)?;
        let params = self
            .funcs
            .get(&name)
            .cloned()
            .unwrap_or_default();
        if args.len() != params.len() {
            return Err(CompileError::ArityMismatch {
                name,
                expected: params.len(),
                got: args.len(),
            });
        }
        let addr_pos = self.builder.emit(Opcode::PushAddr, 0);
        self.compile_args(&args)?;
        let goto_pos = self.builder.emit_jump(Opcode::Goto, &format!("fn_{name}"));
        self.builder.patch(addr_pos, (goto_pos + 1) as u32);
        self.compile_field_chain(tokens, close + 1)
    }

    /// Foreign call: push the arguments, then call by index; the callee
    /// pops its own arguments. The argument count rides as metadata.
    fn compile_native_call(
        &mut self,
        tokens: &[Token],
        i: usize,
    ) -> Result<usize, CompileError> {
        let name = tokens[i].text.clone();
        let index = *self
            .imports
            .get(&name)
            .ok_or_else(|| CompileError::MissingBinding(name.clone()))?;
        if tokens.get(i + 1).map(|t| t.kind) != Some(TokenKind::LParen) {
            return Err(unexpected(&tokens[i]));
        }
        let (args, close) = self.split_grouped(tokens, i + 1)?;
        self.compile_args(&args)?;
        self.builder.emit_foreign(index, args.len());
        self.compile_field_chain(tokens, close + 1)
    }

    fn compile_struct_init(
        &mut self,
        tokens: &[Token],
        i: usize,
    ) -> Result<usize, CompileError> {
        let name = tokens[i].text.clone();
        if tokens.get(i + 1).map(|t| t.kind) != Some(TokenKind::LParen) {
            return Err(unexpected(&tokens[i]));
        }
        let (args, close) = self.split_grouped(tokens, i + 1)?;
        let fields = self.structs.get(&name).cloned().unwrap_or_default();
        if args.len() > fields.len() {
            return Err(CompileError::TooManyFields {
                name,
                fields: fields.len(),
                got: args.len(),
            });
        }
        self.compile_args(&args)?;
        let field_ids: Vec<u32> = fields.iter().map(|f| self.builder.intern(f)).collect();
        self.builder.emit_new_struct(
            StructDef {
                name,
                fields: field_ids,
            },
            args.len(),
        );
        self.compile_field_chain(tokens, close + 1)
    }

    fn compile_list_literal(
        &mut self,
        tokens: &[Token],
        i: usize,
    ) -> Result<usize, CompileError> {
        let (elems, close) = self.split_grouped(tokens, i)?;
        let count = elems.len();
        self.compile_args(&elems)?;
        self.builder.emit(Opcode::NewList, count as u32);
        Ok(close + 1)
    }
}
