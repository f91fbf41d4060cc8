//! Classifier and expression linearizer.
//!
//! Runs after the lexer and rewrites the token stream in place, one full
//! pass per step: trivia is dropped, `import` directives are resolved and
//! removed, identifiers get their roles (function/foreign/variable), the
//! two index pseudo-operators are canonicalized, and finally every maximal
//! run of expression tokens is rewritten from infix to postfix order with
//! an operator-precedence stack. A call token together with its bracketed
//! argument list is one atomic unit during reordering; its contents are
//! linearized later, when the call itself is compiled.

use thiserror::Error;

use crate::import::ImportResolver;
use crate::token::{Token, TokenKind};

/// A resolved import: a source-level name bound to a foreign-function
/// index in the embedder's registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportBinding {
    pub name: String,
    pub library: String,
    pub index: u32,
}

/// Classifier output: the rewritten token stream plus resolved imports.
#[derive(Debug, Clone)]
pub struct Classified {
    pub tokens: Vec<Token>,
    pub imports: Vec<ImportBinding>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClassifyError {
    #[error("malformed import directive near `{text}`")]
    MalformedImport { text: String },
    #[error("unknown import `{name}` in library `{library}`")]
    UnknownImport { name: String, library: String },
    #[error("unknown library `{library}`")]
    UnknownLibrary { library: String },
}

/// Classify a lexed token stream.
pub fn classify(
    mut tokens: Vec<Token>,
    resolver: &dyn ImportResolver,
) -> Result<Classified, ClassifyError> {
    strip_trivia(&mut tokens);
    let imports = resolve_imports(&mut tokens, resolver)?;
    mark_declarations(&mut tokens);
    mark_native_calls(&mut tokens, &imports);
    mark_variables(&mut tokens);
    canonicalize_index_ops(&mut tokens);
    linearize_runs(&mut tokens);
    Ok(Classified { tokens, imports })
}

/// Linearize one expression token list (infix to postfix). The compiler
/// uses this on call-argument sub-streams, whose contents the statement-
/// level pass left verbatim. Already-postfix input passes through
/// unchanged.
pub fn linearize_expression(mut tokens: Vec<Token>) -> Vec<Token> {
    linearize_runs(&mut tokens);
    tokens
}

fn strip_trivia(tokens: &mut Vec<Token>) {
    tokens.retain(|t| {
        !matches!(
            t.kind,
            TokenKind::Whitespace | TokenKind::Comment | TokenKind::At
        )
    });
}

fn resolve_imports(
    tokens: &mut Vec<Token>,
    resolver: &dyn ImportResolver,
) -> Result<Vec<ImportBinding>, ClassifyError> {
    let mut bindings: Vec<ImportBinding> = Vec::new();
    let mut i = 0;
    while i < tokens.len() {
        if tokens[i].kind != TokenKind::Import {
            i += 1;
            continue;
        }
        let wildcard = match tokens.get(i + 1) {
            Some(t) if t.kind == TokenKind::Ident => false,
            Some(t) if t.kind == TokenKind::Star => true,
            other => {
                return Err(ClassifyError::MalformedImport {
                    text: other.map(|t| t.text.clone()).unwrap_or_default(),
                })
            }
        };
        let library = match tokens.get(i + 2) {
            Some(t) if t.kind == TokenKind::Str => match &t.literal {
                Some(crate::token::Literal::Str(s)) => s.clone(),
                _ => String::new(),
            },
            other => {
                return Err(ClassifyError::MalformedImport {
                    text: other.map(|t| t.text.clone()).unwrap_or_default(),
                })
            }
        };
        if wildcard {
            let funcs = resolver
                .functions(&library)
                .ok_or_else(|| ClassifyError::UnknownLibrary {
                    library: library.clone(),
                })?;
            for (name, index) in funcs {
                if !bindings.iter().any(|b| b.name == name) {
                    bindings.push(ImportBinding {
                        name,
                        library: library.clone(),
                        index,
                    });
                }
            }
        } else {
            let name = tokens[i + 1].text.clone();
            let index =
                resolver
                    .resolve(&library, &name)
                    .ok_or_else(|| ClassifyError::UnknownImport {
                        name: name.clone(),
                        library: library.clone(),
                    })?;
            if !bindings.iter().any(|b| b.name == name) {
                bindings.push(ImportBinding {
                    name,
                    library,
                    index,
                });
            }
        }
        // The directive produces no bytecode; drop it.
        tokens.drain(i..i + 3);
    }
    Ok(bindings)
}

/// Mark identifiers after `func`/`struct` as declarations and every later
/// occurrence of those names as call/constructor tokens.
fn mark_declarations(tokens: &mut [Token]) {
    let mut funcs: Vec<String> = Vec::new();
    let mut structs: Vec<String> = Vec::new();
    let mut i = 0;
    while i + 1 < tokens.len() {
        match tokens[i].kind {
            TokenKind::Func if tokens[i + 1].kind == TokenKind::Ident => {
                tokens[i + 1].kind = TokenKind::FuncDecl;
                funcs.push(tokens[i + 1].text.clone());
            }
            TokenKind::Struct if tokens[i + 1].kind == TokenKind::Ident => {
                tokens[i + 1].kind = TokenKind::StructDecl;
                structs.push(tokens[i + 1].text.clone());
            }
            _ => {}
        }
        i += 1;
    }
    for tok in tokens.iter_mut() {
        if tok.kind == TokenKind::Ident {
            if funcs.iter().any(|f| *f == tok.text) {
                tok.kind = TokenKind::FuncCall;
            } else if structs.iter().any(|s| *s == tok.text) {
                tok.kind = TokenKind::StructInit;
            }
        }
    }
}

fn mark_native_calls(tokens: &mut [Token], imports: &[ImportBinding]) {
    for tok in tokens.iter_mut() {
        if tok.kind == TokenKind::Ident && imports.iter().any(|b| b.name == tok.text) {
            tok.kind = TokenKind::NativeCall;
        }
    }
}

/// Mark identifiers after `var`/`loop` and function parameters as new
/// variables, and later occurrences of registered names as references.
/// Matching is by exact text; scoping is compiler/runtime behavior.
fn mark_variables(tokens: &mut [Token]) {
    let mut names: Vec<String> = Vec::new();
    let mut i = 0;
    while i < tokens.len() {
        match tokens[i].kind {
            TokenKind::Var | TokenKind::Loop => {
                if let Some(next) = tokens.get_mut(i + 1) {
                    if next.kind == TokenKind::Ident || next.kind == TokenKind::VarRef {
                        next.kind = TokenKind::VarDecl;
                        if !names.contains(&next.text) {
                            names.push(next.text.clone());
                        }
                        i += 2;
                        continue;
                    }
                }
            }
            TokenKind::FuncDecl => {
                // parameters inside the declaration's parentheses
                let mut j = i + 1;
                if tokens.get(j).map(|t| t.kind) == Some(TokenKind::LParen) {
                    j += 1;
                    while j < tokens.len() && tokens[j].kind != TokenKind::RParen {
                        if tokens[j].kind == TokenKind::Ident
                            || tokens[j].kind == TokenKind::VarRef
                        {
                            tokens[j].kind = TokenKind::VarDecl;
                            if !names.contains(&tokens[j].text) {
                                names.push(tokens[j].text.clone());
                            }
                        }
                        j += 1;
                    }
                }
                i = j;
                continue;
            }
            TokenKind::Ident => {
                if names.contains(&tokens[i].text) {
                    tokens[i].kind = TokenKind::VarRef;
                }
            }
            _ => {}
        }
        i += 1;
    }
}

fn is_operand_kind(k: TokenKind) -> bool {
    matches!(
        k,
        TokenKind::Number
            | TokenKind::Str
            | TokenKind::True
            | TokenKind::False
            | TokenKind::Null
            | TokenKind::Ident
            | TokenKind::VarRef
    )
}

/// Index of the opening bracket matching the closer at `close`.
fn matching_open(tokens: &[Token], close: usize) -> Option<usize> {
    let mut depth = 1usize;
    let mut j = close;
    while j > 0 {
        j -= 1;
        match tokens[j].kind {
            TokenKind::RParen | TokenKind::RBracket => depth += 1,
            TokenKind::LParen | TokenKind::LBracket => {
                depth -= 1;
                if depth == 0 {
                    return Some(j);
                }
            }
            _ => {}
        }
    }
    None
}

/// Index of the closing bracket matching the opener at `open`.
fn matching_close(tokens: &[Token], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (j, tok) in tokens.iter().enumerate().skip(open) {
        match tok.kind {
            TokenKind::LParen | TokenKind::LBracket => depth += 1,
            TokenKind::RParen | TokenKind::RBracket => {
                depth -= 1;
                if depth == 0 {
                    return Some(j);
                }
            }
            _ => {}
        }
    }
    None
}

/// Start index of the maximal operand span ending just before `i`.
/// Extends through balanced bracket nesting, absorbs a call token in
/// front of its argument list, and follows field-access chains.
fn operand_left_start(tokens: &[Token], i: usize) -> Option<usize> {
    let mut j = i.checked_sub(1)?;
    loop {
        match tokens[j].kind {
            TokenKind::RParen | TokenKind::RBracket => {
                j = matching_open(tokens, j)?;
                if j > 0 && tokens[j - 1].kind.is_call() {
                    j -= 1;
                }
            }
            k if is_operand_kind(k) => {}
            _ => return None,
        }
        if j >= 2 && tokens[j - 1].kind == TokenKind::Dot {
            j -= 2;
        } else {
            return Some(j);
        }
    }
}

/// End index of the maximal operand span starting just after `i`.
fn operand_right_end(tokens: &[Token], i: usize) -> Option<usize> {
    let mut j = i + 1;
    // unary operators belong to the span they prefix
    while j < tokens.len() && matches!(tokens[j].kind, TokenKind::Not | TokenKind::Neg) {
        j += 1;
    }
    if j >= tokens.len() {
        return None;
    }
    let k = tokens[j].kind;
    let mut j = if k.is_call() {
        match tokens.get(j + 1) {
            Some(t) if t.kind == TokenKind::LParen => matching_close(tokens, j + 1)?,
            _ => j,
        }
    } else if matches!(k, TokenKind::LParen | TokenKind::LBracket) {
        matching_close(tokens, j)?
    } else if is_operand_kind(k) {
        j
    } else {
        return None;
    };
    while j + 2 < tokens.len() && tokens[j + 1].kind == TokenKind::Dot {
        j += 2;
    }
    Some(j)
}

fn has_left_value(tokens: &[Token], i: usize) -> bool {
    i > 0 && tokens[i - 1].kind.ends_value()
}

/// Mark, for every operator, the maximal operand spans around it as part
/// of an expression. A `-` with no value to its left is reclassified as
/// unary negation.
fn mark_expressions(tokens: &mut [Token]) {
    let mut i = 0;
    while i < tokens.len() {
        let k = tokens[i].kind;
        let unary = k == TokenKind::Not
            || k == TokenKind::Neg
            || (k == TokenKind::Minus && !has_left_value(tokens, i));
        if unary && matches!(k, TokenKind::Not | TokenKind::Neg | TokenKind::Minus) {
            if k == TokenKind::Minus {
                tokens[i].kind = TokenKind::Neg;
            }
            tokens[i].in_expr = true;
            if let Some(r) = operand_right_end(tokens, i) {
                for t in &mut tokens[i..=r] {
                    t.in_expr = true;
                }
            }
        } else if k.is_binary_op() {
            tokens[i].in_expr = true;
            if let Some(l) = operand_left_start(tokens, i) {
                for t in &mut tokens[l..i] {
                    t.in_expr = true;
                }
            }
            if let Some(r) = operand_right_end(tokens, i) {
                for t in &mut tokens[i..=r] {
                    t.in_expr = true;
                }
            }
        }
        i += 1;
    }
}

fn priority(k: TokenKind) -> u8 {
    match k {
        TokenKind::ElemOf => 5,
        TokenKind::Neg | TokenKind::Not => 4,
        TokenKind::Percent => 3,
        TokenKind::Star | TokenKind::Slash => 2,
        TokenKind::Plus | TokenKind::Minus | TokenKind::And | TokenKind::Or => 1,
        _ => 0,
    }
}

/// Number of depth-1 arguments in the call span `call ( … )`.
fn count_args(tokens: &[Token], call: usize, close: usize) -> u16 {
    if close <= call + 2 {
        return 0;
    }
    let mut depth = 0usize;
    let mut args = 1u16;
    for tok in &tokens[call + 1..close] {
        match tok.kind {
            TokenKind::LParen | TokenKind::LBracket => depth += 1,
            TokenKind::RParen | TokenKind::RBracket => depth -= 1,
            TokenKind::Comma if depth == 1 => args += 1,
            _ => {}
        }
    }
    args
}

fn copy_field_chain(run: &[Token], mut k: usize, out: &mut Vec<Token>) -> usize {
    while k + 1 < run.len() && run[k].kind == TokenKind::Dot {
        out.push(run[k].clone());
        out.push(run[k + 1].clone());
        k += 2;
    }
    k
}

/// Shunting-yard rewrite of one contiguous expression run. Grouping
/// parentheses have no priority of their own; they are operator-stack
/// boundaries and vanish from the output. Call spans and list literals
/// are copied verbatim as opaque operands.
fn to_postfix(run: Vec<Token>) -> Vec<Token> {
    let mut out: Vec<Token> = Vec::with_capacity(run.len());
    let mut ops: Vec<Token> = Vec::new();
    let mut k = 0;
    while k < run.len() {
        let kind = run[k].kind;
        if kind.is_call() {
            let mut end = k;
            if let Some(t) = run.get(k + 1) {
                if t.kind == TokenKind::LParen {
                    if let Some(close) = matching_close(&run, k + 1) {
                        end = close;
                    }
                }
            }
            let mut call = run[k].clone();
            call.args = count_args(&run, k, end);
            out.push(call);
            out.extend(run[k + 1..=end].iter().cloned());
            k = copy_field_chain(&run, end + 1, &mut out);
        } else if is_operand_kind(kind) {
            out.push(run[k].clone());
            k = copy_field_chain(&run, k + 1, &mut out);
        } else if kind == TokenKind::LBracket {
            let close = matching_close(&run, k).unwrap_or(k);
            out.extend(run[k..=close].iter().cloned());
            k = close + 1;
        } else if kind == TokenKind::LParen {
            ops.push(run[k].clone());
            k += 1;
        } else if kind == TokenKind::RParen {
            while let Some(top) = ops.last() {
                if top.kind == TokenKind::LParen {
                    break;
                }
                out.push(ops.pop().expect("checked non-empty"));
            }
            ops.pop();
            k += 1;
        } else {
            let p = priority(kind);
            let right_assoc = matches!(kind, TokenKind::Neg | TokenKind::Not);
            while let Some(top) = ops.last() {
                if top.kind == TokenKind::LParen {
                    break;
                }
                let tp = priority(top.kind);
                if tp > p || (tp == p && !right_assoc) {
                    out.push(ops.pop().expect("checked non-empty"));
                } else {
                    break;
                }
            }
            ops.push(run[k].clone());
            k += 1;
        }
    }
    while let Some(op) = ops.pop() {
        if op.kind != TokenKind::LParen {
            out.push(op);
        }
    }
    out
}

/// Canonicalize the two index pseudo-operators.
///
/// `X elemOf Y` places the list operand Y in front: `Y elemOf X`, so the
/// postfix rewrite pushes the list before the index. A statement
/// `X setElem of Y to Z` has its leading element X relocated to just
/// before the statement's end marker (the next newline); the `setElem`
/// token keeps a link to X's sequence id so the compiler can find the
/// boundary again.
fn canonicalize_index_ops(tokens: &mut Vec<Token>) {
    let mut i = 0;
    while i < tokens.len() {
        match tokens[i].kind {
            // args is repurposed as a processed marker: the swap would
            // otherwise re-match its own output.
            TokenKind::ElemOf if tokens[i].args == 0 => {
                let left = operand_left_start(tokens, i);
                let right = operand_right_end(tokens, i);
                if let (Some(l), Some(r)) = (left, right) {
                    let mut swapped = Vec::with_capacity(tokens.len());
                    swapped.extend_from_slice(&tokens[..l]);
                    swapped.extend_from_slice(&tokens[i + 1..=r]);
                    let mut op = tokens[i].clone();
                    op.args = 1;
                    swapped.push(op);
                    swapped.extend_from_slice(&tokens[l..i]);
                    swapped.extend_from_slice(&tokens[r + 1..]);
                    *tokens = swapped;
                    i = l;
                    continue;
                }
            }
            TokenKind::SetElem if tokens[i].link.is_none() => {
                if let Some(l) = operand_left_start(tokens, i) {
                    let moved: Vec<Token> = tokens.splice(l..i, std::iter::empty()).collect();
                    let link = moved.first().map(|t| t.seq);
                    tokens[l].link = link;
                    let mut e = l;
                    while e < tokens.len()
                        && !matches!(
                            tokens[e].kind,
                            TokenKind::NewLine | TokenKind::Semi | TokenKind::Eof
                        )
                    {
                        e += 1;
                    }
                    tokens.splice(e..e, moved);
                    i = l + 1;
                    continue;
                }
            }
            _ => {}
        }
        i += 1;
    }
}

/// Extract each maximal contiguous run of expression tokens and rewrite
/// it to postfix order in place.
fn linearize_runs(tokens: &mut Vec<Token>) {
    mark_expressions(tokens);
    let mut i = 0;
    while i < tokens.len() {
        if tokens[i].in_expr {
            let mut j = i;
            while j < tokens.len() && tokens[j].in_expr {
                j += 1;
            }
            let run: Vec<Token> = tokens.splice(i..j, std::iter::empty()).collect();
            let post = to_postfix(run);
            let n = post.len();
            tokens.splice(i..i, post);
            i += n;
        } else {
            i += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;
    use pretty_assertions::assert_eq;

    struct NoImports;

    impl ImportResolver for NoImports {
        fn resolve(&self, _library: &str, _name: &str) -> Option<u32> {
            None
        }
        fn functions(&self, _library: &str) -> Option<Vec<(String, u32)>> {
            None
        }
    }

    struct FakeLib;

    impl ImportResolver for FakeLib {
        fn resolve(&self, library: &str, name: &str) -> Option<u32> {
            (library == "console" && name == "print").then_some(7)
        }
        fn functions(&self, library: &str) -> Option<Vec<(String, u32)>> {
            (library == "console")
                .then(|| vec![("print".to_string(), 7), ("println".to_string(), 8)])
        }
    }

    fn classified_kinds(src: &str) -> Vec<TokenKind> {
        classify(Lexer::new(src).tokenize(), &NoImports)
            .unwrap()
            .tokens
            .iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn simple_expression_becomes_postfix() {
        use TokenKind::*;
        assert_eq!(
            classified_kinds("2 + 2 / 3"),
            vec![Number, Number, Number, Slash, Plus, Eof]
        );
    }

    #[test]
    fn precedence_orders_modulo_above_multiply() {
        use TokenKind::*;
        // 2 % 3 * 4  →  ((2 % 3) * 4)  →  2 3 % 4 *
        assert_eq!(
            classified_kinds("2 % 3 * 4"),
            vec![Number, Number, Percent, Number, Star, Eof]
        );
    }

    #[test]
    fn parentheses_group_without_surviving() {
        use TokenKind::*;
        // (2 + 3) * 4  →  2 3 + 4 *
        assert_eq!(
            classified_kinds("(2 + 3) * 4"),
            vec![Number, Number, Plus, Number, Star, Eof]
        );
    }

    #[test]
    fn unary_minus_is_negation() {
        use TokenKind::*;
        assert_eq!(classified_kinds("0 - -2"), vec![Number, Number, Neg, Minus, Eof]);
    }

    #[test]
    fn call_spans_stay_atomic() {
        use TokenKind::*;
        // The call's argument list is copied verbatim (still infix); only
        // the surrounding expression is reordered.
        let kinds = classified_kinds("func f(x)\nend\nf(1 + 2) * 3");
        let tail = &kinds[kinds.len() - 9..];
        assert_eq!(
            tail,
            &[FuncCall, LParen, Number, Plus, Number, RParen, Number, Star, Eof]
        );
    }

    #[test]
    fn call_argument_count_is_attached() {
        let src = "func f(a, b)\nend\nvar x = 1\nx = f(1, 2) + 0";
        let out = classify(Lexer::new(src).tokenize(), &NoImports).unwrap();
        let call = out
            .tokens
            .iter()
            .filter(|t| t.kind == TokenKind::FuncCall)
            .last()
            .unwrap();
        assert_eq!(call.args, 2);
    }

    #[test]
    fn elem_of_moves_the_list_in_front() {
        use TokenKind::*;
        // 0 elemOf lst  →  lst 0 elemOf
        let kinds = classified_kinds("var lst = [1]\nvar x = 0 elemOf lst");
        let tail = &kinds[kinds.len() - 6..];
        assert_eq!(tail, &[VarDecl, Assign, VarRef, Number, ElemOf, Eof]);
    }

    #[test]
    fn set_elem_relocates_the_target() {
        use TokenKind::*;
        let kinds = classified_kinds("var lst = [1]\nlst setElem of 0 to 5");
        let tail = &kinds[kinds.len() - 7..];
        assert_eq!(tail, &[SetElem, Of, Number, To, Number, VarRef, Eof]);
    }

    #[test]
    fn set_elem_links_to_the_moved_span() {
        let src = "var lst = [1]\nlst setElem of 0 to 5";
        let out = classify(Lexer::new(src).tokenize(), &NoImports).unwrap();
        let set = out
            .tokens
            .iter()
            .find(|t| t.kind == TokenKind::SetElem)
            .unwrap();
        let target = out
            .tokens
            .iter()
            .find(|t| Some(t.seq) == set.link)
            .unwrap();
        assert_eq!(target.text, "lst");
    }

    #[test]
    fn import_directives_are_resolved_and_removed() {
        let src = "import print @ 'console'\nprint('hi')";
        let out = classify(Lexer::new(src).tokenize(), &FakeLib).unwrap();
        assert_eq!(out.imports.len(), 1);
        assert_eq!(out.imports[0].index, 7);
        assert!(!out.tokens.iter().any(|t| t.kind == TokenKind::Import));
        assert!(out.tokens.iter().any(|t| t.kind == TokenKind::NativeCall));
    }

    #[test]
    fn wildcard_import_registers_all_functions() {
        let src = "import * @ 'console'\nprintln('hi')";
        let out = classify(Lexer::new(src).tokenize(), &FakeLib).unwrap();
        assert_eq!(out.imports.len(), 2);
        assert!(out.tokens.iter().any(|t| t.kind == TokenKind::NativeCall));
    }

    #[test]
    fn unknown_import_is_an_error() {
        let src = "import missing @ 'console'";
        let err = classify(Lexer::new(src).tokenize(), &FakeLib).unwrap_err();
        assert_eq!(
            err,
            ClassifyError::UnknownImport {
                name: "missing".to_string(),
                library: "console".to_string()
            }
        );
    }

    #[test]
    fn variable_roles_follow_declaration_order() {
        use TokenKind::*;
        // `a` is a reference only after `var a` registers it.
        let kinds = classified_kinds("var a = 1\na = a + 1");
        assert_eq!(
            kinds,
            vec![
                Var, VarDecl, Assign, Number, NewLine, VarRef, Assign, VarRef, Number, Plus,
                Eof
            ]
        );
    }

    #[test]
    fn linearize_expression_is_stable_on_postfix_input() {
        let src = "2 + 3";
        let out = classify(Lexer::new(src).tokenize(), &NoImports).unwrap();
        let once = out.tokens.clone();
        let twice = linearize_expression(once.clone());
        let kinds_once: Vec<_> = once.iter().map(|t| t.kind).collect();
        let kinds_twice: Vec<_> = twice.iter().map(|t| t.kind).collect();
        assert_eq!(kinds_once, kinds_twice);
    }
}
