//! Lexer for Rill source code.
//!
//! The lexer never fails: anything it does not recognize becomes a
//! single-character `Unknown` token, and [`Lexer::tokenize`] merges
//! adjacent unknowns into identifiers. Several rules are context
//! sensitive on the previously emitted token (numeric literals only
//! start after a delimiter, keywords only match after a delimiter), so
//! the lexer tracks `prev` the same way the scan position is tracked.

use std::str::FromStr;

use rust_decimal::Decimal;

use crate::token::{Literal, Span, Token, TokenKind};

/// Symbols, longest key first so `==` wins over `=`.
const SYMBOLS: &[(&str, TokenKind)] = &[
    ("==", TokenKind::Eq),
    ("!=", TokenKind::NotEq),
    ("(", TokenKind::LParen),
    (")", TokenKind::RParen),
    ("[", TokenKind::LBracket),
    ("]", TokenKind::RBracket),
    ("+", TokenKind::Plus),
    ("-", TokenKind::Minus),
    ("*", TokenKind::Star),
    ("/", TokenKind::Slash),
    ("%", TokenKind::Percent),
    ("<", TokenKind::Lt),
    (">", TokenKind::Gt),
    ("!", TokenKind::Not),
    ("@", TokenKind::At),
    ("=", TokenKind::Assign),
    (",", TokenKind::Comma),
    (".", TokenKind::Dot),
    (";", TokenKind::Semi),
];

/// Keywords and word operators, longest key first so `is not` wins over
/// `is` and `setElem` over any shorter prefix.
const KEYWORDS: &[(&str, TokenKind)] = &[
    ("setElem", TokenKind::SetElem),
    ("is not", TokenKind::NotEq),
    ("import", TokenKind::Import),
    ("return", TokenKind::Return),
    ("struct", TokenKind::Struct),
    ("elemOf", TokenKind::ElemOf),
    ("false", TokenKind::False),
    ("else", TokenKind::Else),
    ("func", TokenKind::Func),
    ("loop", TokenKind::Loop),
    ("true", TokenKind::True),
    ("null", TokenKind::Null),
    ("end", TokenKind::End),
    ("var", TokenKind::Var),
    ("and", TokenKind::And),
    ("not", TokenKind::Not),
    ("is", TokenKind::Eq),
    ("if", TokenKind::If),
    ("in", TokenKind::In),
    ("of", TokenKind::Of),
    ("or", TokenKind::Or),
    ("to", TokenKind::To),
];

fn ident_continues(c: Option<char>) -> bool {
    matches!(c, Some(c) if c.is_alphanumeric() || c == '_')
}

/// Lexer over a single source string.
pub struct Lexer<'a> {
    input: &'a str,
    pos: usize,
    /// Kind of the previously emitted token, whitespace included.
    prev: Option<TokenKind>,
    /// Kind of the previous non-whitespace token; drives the import-path
    /// raw-string rule (a string right after `@`).
    prev_solid: Option<TokenKind>,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            pos: 0,
            prev: None,
            prev_solid: None,
        }
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn ch(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn peek_at(&self, byte_offset: usize) -> Option<char> {
        self.input[self.pos + byte_offset..].chars().next()
    }

    fn advance(&mut self, bytes: usize) {
        self.pos += bytes;
    }

    /// A delimiter is what may precede a numeric literal or a keyword:
    /// start of input, whitespace, brackets, comma, or an operator.
    fn prev_is_delimiter(&self) -> bool {
        match self.prev {
            None => true,
            Some(k) => matches!(
                k,
                TokenKind::NewLine
                    | TokenKind::Whitespace
                    | TokenKind::LParen
                    | TokenKind::RParen
                    | TokenKind::LBracket
                    | TokenKind::RBracket
                    | TokenKind::Comma
                    | TokenKind::Semi
                    | TokenKind::Plus
                    | TokenKind::Minus
                    | TokenKind::Star
                    | TokenKind::Slash
                    | TokenKind::Percent
                    | TokenKind::Lt
                    | TokenKind::Gt
                    | TokenKind::Eq
                    | TokenKind::NotEq
                    | TokenKind::Not
                    | TokenKind::And
                    | TokenKind::Or
                    | TokenKind::Assign
            ),
        }
    }

    fn read_number(&mut self) -> Token {
        let start = self.pos;
        while let Some(c) = self.ch() {
            if c.is_ascii_digit() || c == '.' || c == '_' {
                self.advance(c.len_utf8());
            } else {
                break;
            }
        }
        let text = &self.input[start..self.pos];
        let cleaned: String = text.chars().filter(|&c| c != '_').collect();
        let mut tok = Token::new(
            TokenKind::Number,
            text,
            Span::new(start as u32, self.pos as u32),
        );
        // A malformed literal (e.g. "1.2.3") keeps its token but carries no
        // value; the compiler faults on it.
        if let Ok(d) = Decimal::from_str(&cleaned) {
            tok.literal = Some(Literal::Number(d));
        }
        tok
    }

    fn read_string(&mut self) -> Token {
        let start = self.pos;
        let raw = self.prev_solid == Some(TokenKind::At);
        self.advance(1); // opening quote
        let mut out = String::new();
        while let Some(c) = self.ch() {
            if c == '\'' {
                self.advance(1);
                break;
            }
            if c == '\\' {
                self.advance(1);
                let next = self.ch();
                if raw {
                    // Import-path context: escapes stay raw, but a backslash
                    // still shields a quote from terminating the literal.
                    out.push('\\');
                    if let Some(n) = next {
                        out.push(n);
                        self.advance(n.len_utf8());
                    }
                } else {
                    match next {
                        Some('t') => out.push('\t'),
                        Some('v') => out.push('\x0B'),
                        Some('r') => out.push('\r'),
                        Some('n') => out.push('\n'),
                        Some('b') => out.push('\x08'),
                        Some('0') => out.push('\0'),
                        Some('\'') => out.push('\''),
                        Some('\\') => out.push('\\'),
                        Some(other) => {
                            out.push('\\');
                            out.push(other);
                        }
                        None => break,
                    }
                    if let Some(n) = next {
                        self.advance(n.len_utf8());
                    }
                }
            } else {
                out.push(c);
                self.advance(c.len_utf8());
            }
        }
        let text = &self.input[start..self.pos];
        Token::new(TokenKind::Str, text, Span::new(start as u32, self.pos as u32))
            .with_literal(Literal::Str(out))
    }

    fn read_comment(&mut self) -> Token {
        let start = self.pos;
        while let Some(c) = self.ch() {
            if c == '\n' || c == '\r' {
                break;
            }
            self.advance(c.len_utf8());
        }
        let text = &self.input[start..self.pos];
        Token::new(
            TokenKind::Comment,
            text,
            Span::new(start as u32, self.pos as u32),
        )
    }

    /// Scan one raw token. Rules are tried in priority order.
    fn next_token(&mut self) -> Token {
        let start = self.pos;
        let Some(c) = self.ch() else {
            return Token::new(
                TokenKind::Eof,
                "",
                Span::new(start as u32, start as u32),
            );
        };

        // 1. A line-ending pair is one NewLine token.
        if c == '\r' && self.peek_at(1) == Some('\n') {
            self.advance(2);
            return Token::new(
                TokenKind::NewLine,
                "\r\n",
                Span::new(start as u32, self.pos as u32),
            );
        }
        if c == '\n' || c == '\r' {
            self.advance(1);
            return Token::new(
                TokenKind::NewLine,
                &self.input[start..self.pos],
                Span::new(start as u32, self.pos as u32),
            );
        }

        // 2. Any other whitespace character is its own token.
        if c.is_whitespace() {
            self.advance(c.len_utf8());
            return Token::new(
                TokenKind::Whitespace,
                &self.input[start..self.pos],
                Span::new(start as u32, self.pos as u32),
            );
        }

        // 3. A digit starts a numeric literal only after a delimiter.
        if c.is_ascii_digit() && self.prev_is_delimiter() {
            return self.read_number();
        }

        // 4. Fixed dispatch: string delimiter and comment marker.
        if c == '\'' {
            return self.read_string();
        }
        if c == '#' {
            return self.read_comment();
        }

        // 5. Symbols, longest key first.
        for (sym, kind) in SYMBOLS {
            if self.rest().starts_with(sym) {
                self.advance(sym.len());
                return Token::new(*kind, *sym, Span::new(start as u32, self.pos as u32));
            }
        }

        // 6. Keywords and word operators, longest key first; only after a
        //    delimiter and only when the match is not a prefix of a longer
        //    identifier.
        if self.prev_is_delimiter() {
            for (kw, kind) in KEYWORDS {
                if self.rest().starts_with(kw) && !ident_continues(self.peek_at(kw.len())) {
                    self.advance(kw.len());
                    let mut tok =
                        Token::new(*kind, *kw, Span::new(start as u32, self.pos as u32));
                    match kind {
                        TokenKind::True => tok.literal = Some(Literal::Bool(true)),
                        TokenKind::False => tok.literal = Some(Literal::Bool(false)),
                        TokenKind::Null => tok.literal = Some(Literal::Null),
                        _ => {}
                    }
                    return tok;
                }
            }
        }

        // 7. Anything else is a single unknown character.
        self.advance(c.len_utf8());
        Token::new(
            TokenKind::Unknown,
            &self.input[start..self.pos],
            Span::new(start as u32, self.pos as u32),
        )
    }

    /// Tokenize the entire input, merging adjacent unknowns into
    /// identifiers and assigning sequence ids. Always ends with `Eof`.
    pub fn tokenize(mut self) -> Vec<Token> {
        let mut tokens: Vec<Token> = Vec::new();
        loop {
            let tok = self.next_token();
            self.prev = Some(tok.kind);
            if tok.kind != TokenKind::Whitespace {
                self.prev_solid = Some(tok.kind);
            }
            let is_eof = tok.kind == TokenKind::Eof;

            if tok.kind == TokenKind::Unknown {
                if let Some(last) = tokens.last_mut() {
                    if last.kind == TokenKind::Unknown {
                        last.text.push_str(&tok.text);
                        last.span.end = tok.span.end;
                        continue;
                    }
                }
            }
            tokens.push(tok);
            if is_eof {
                break;
            }
        }
        for tok in &mut tokens {
            if tok.kind == TokenKind::Unknown {
                tok.kind = TokenKind::Ident;
            }
        }
        for (i, tok) in tokens.iter_mut().enumerate() {
            tok.seq = i as u32;
        }
        tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Lexer::new(src).tokenize().iter().map(|t| t.kind).collect()
    }

    fn solid_kinds(src: &str) -> Vec<TokenKind> {
        Lexer::new(src)
            .tokenize()
            .iter()
            .filter(|t| {
                !matches!(
                    t.kind,
                    TokenKind::Whitespace | TokenKind::NewLine | TokenKind::Comment
                )
            })
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn lexing_is_idempotent() {
        let src = "var a = 2\nif a is not 3\n    a = a + 1\nend # done\n";
        assert_eq!(kinds(src), kinds(src));
    }

    #[test]
    fn numbers_only_after_delimiters() {
        use TokenKind::*;
        assert_eq!(solid_kinds("x1 = 2"), vec![Ident, Assign, Number, Eof]);
        let toks = Lexer::new("x1 = 2").tokenize();
        assert_eq!(toks[0].text, "x1");
    }

    #[test]
    fn number_literals_strip_separators() {
        let toks = Lexer::new("1_000_000.5").tokenize();
        assert_eq!(toks[0].kind, TokenKind::Number);
        assert_eq!(
            toks[0].literal,
            Some(Literal::Number(Decimal::from_str("1000000.5").unwrap()))
        );
    }

    #[test]
    fn longest_symbol_wins() {
        use TokenKind::*;
        assert_eq!(solid_kinds("a == b"), vec![Ident, Eq, Ident, Eof]);
        assert_eq!(solid_kinds("a = b"), vec![Ident, Assign, Ident, Eof]);
        assert_eq!(solid_kinds("a != b"), vec![Ident, NotEq, Ident, Eof]);
    }

    #[test]
    fn multi_word_operator_needs_delimiters() {
        use TokenKind::*;
        assert_eq!(solid_kinds("a is not b"), vec![Ident, NotEq, Ident, Eof]);
        // "island" must not match the "is" keyword.
        assert_eq!(solid_kinds("island"), vec![Ident, Eof]);
        // "total" must not match "to".
        assert_eq!(solid_kinds("total = 1"), vec![Ident, Assign, Number, Eof]);
    }

    #[test]
    fn string_escapes_normalize() {
        let toks = Lexer::new(r"'a\tb\nc\'d'").tokenize();
        assert_eq!(
            toks[0].literal,
            Some(Literal::Str("a\tb\nc'd".to_string()))
        );
    }

    #[test]
    fn import_path_strings_stay_raw() {
        let toks = Lexer::new(r"@ 'C:\temp\new'").tokenize();
        let s = toks
            .iter()
            .find(|t| t.kind == TokenKind::Str)
            .unwrap();
        assert_eq!(s.literal, Some(Literal::Str(r"C:\temp\new".to_string())));
    }

    #[test]
    fn comments_run_to_end_of_line() {
        let toks = Lexer::new("a # rest of line\nb").tokenize();
        let c = toks.iter().find(|t| t.kind == TokenKind::Comment).unwrap();
        assert_eq!(c.text, "# rest of line");
        assert!(toks.iter().any(|t| t.kind == TokenKind::NewLine));
    }

    #[test]
    fn crlf_is_one_newline() {
        use TokenKind::*;
        assert_eq!(kinds("a\r\nb"), vec![Ident, NewLine, Ident, Eof]);
    }

    #[test]
    fn unknowns_merge_into_identifiers() {
        let toks = Lexer::new("hello_9 world").tokenize();
        assert_eq!(toks[0].kind, TokenKind::Ident);
        assert_eq!(toks[0].text, "hello_9");
        assert_eq!(toks[2].text, "world");
    }

    #[test]
    fn sequence_ids_are_positional() {
        let toks = Lexer::new("a + b").tokenize();
        let seqs: Vec<u32> = toks.iter().map(|t| t.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3, 4, 5]);
    }
}
