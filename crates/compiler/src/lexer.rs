//! Lexer for Krill source text
//!
//! Byte-at-a-time scan of the source buffer into the token sequence the
//! parser consumes, terminated by a single end-of-input token. Keywords
//! are resolved through a linear table. `#` comments run to end of
//! line. Strings are delimited by `"` with no escape processing; an
//! unterminated string reads to end of input. Two-character operators
//! are matched before their single-character prefixes.

use crate::config::Limits;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    // literals
    Number,
    Ident,
    Str,

    // keywords
    Let,
    Fn,
    Return,
    If,
    Elif,
    Else,
    While,
    For,
    Do,
    To,
    Step,
    End,
    Print,
    True,
    False,
    Match,
    Comptime,
    Struct,
    Addr,
    Deref,
    Alloc,
    Free,
    Open,
    Read,
    Write,
    Close,
    Break,
    Continue,
    And,
    Or,
    Where,
    Strlen,

    // type keywords
    TyInt,
    TyFloat,
    TyStr,
    TyPtr,
    TyBool,

    // operators
    Plus,
    Minus,
    Star,
    Slash,
    Assign,
    EqEq,
    NotEq,
    Gt,
    Lt,
    GtEq,
    LtEq,
    Arrow,

    // delimiters
    LParen,
    RParen,
    Comma,
    Colon,
    Dot,
    LBracket,
    RBracket,
    LBrace,
    RBrace,

    Eof,
}

/// A token: kind tag plus its source lexeme.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
}

impl Token {
    fn new(kind: TokenKind, text: impl Into<String>) -> Self {
        Token {
            kind,
            text: text.into(),
        }
    }
}

/// Keyword recognition table, scanned linearly.
const KEYWORDS: &[(&str, TokenKind)] = &[
    ("let", TokenKind::Let),
    ("fn", TokenKind::Fn),
    ("return", TokenKind::Return),
    ("if", TokenKind::If),
    ("elif", TokenKind::Elif),
    ("else", TokenKind::Else),
    ("while", TokenKind::While),
    ("for", TokenKind::For),
    ("do", TokenKind::Do),
    ("to", TokenKind::To),
    ("step", TokenKind::Step),
    ("end", TokenKind::End),
    ("print", TokenKind::Print),
    ("true", TokenKind::True),
    ("false", TokenKind::False),
    ("match", TokenKind::Match),
    ("comptime", TokenKind::Comptime),
    ("struct", TokenKind::Struct),
    ("addr", TokenKind::Addr),
    ("deref", TokenKind::Deref),
    ("alloc", TokenKind::Alloc),
    ("free", TokenKind::Free),
    ("open", TokenKind::Open),
    ("read", TokenKind::Read),
    ("write", TokenKind::Write),
    ("close", TokenKind::Close),
    ("break", TokenKind::Break),
    ("continue", TokenKind::Continue),
    ("and", TokenKind::And),
    ("or", TokenKind::Or),
    ("where", TokenKind::Where),
    ("strlen", TokenKind::Strlen),
    ("int", TokenKind::TyInt),
    ("float", TokenKind::TyFloat),
    ("str", TokenKind::TyStr),
    ("ptr", TokenKind::TyPtr),
    ("bool", TokenKind::TyBool),
];

fn keyword_kind(s: &str) -> Option<TokenKind> {
    KEYWORDS.iter().find(|(kw, _)| *kw == s).map(|(_, k)| *k)
}

/// Scan `source` into a token sequence terminated by `Eof`.
///
/// Errors on an unknown character and when the token budget overflows.
pub fn tokenize(source: &str, limits: &Limits) -> Result<Vec<Token>, String> {
    let src = source.as_bytes();
    let len = src.len();
    let mut tokens = Vec::new();
    let mut i = 0;

    let push = |tokens: &mut Vec<Token>, tok: Token| -> Result<(), String> {
        if tokens.len() >= limits.max_tokens {
            return Err(format!(
                "Lexer error: too many tokens (max {})",
                limits.max_tokens
            ));
        }
        tokens.push(tok);
        Ok(())
    };

    while i < len {
        let c = src[i];

        // whitespace
        if c == b' ' || c == b'\t' || c == b'\n' || c == b'\r' {
            i += 1;
            continue;
        }

        // comment to end of line
        if c == b'#' {
            while i < len && src[i] != b'\n' {
                i += 1;
            }
            continue;
        }

        // non-negative decimal integer
        if c.is_ascii_digit() {
            let start = i;
            while i < len && src[i].is_ascii_digit() {
                i += 1;
            }
            push(
                &mut tokens,
                Token::new(TokenKind::Number, &source[start..i]),
            )?;
            continue;
        }

        // identifier or keyword
        if c.is_ascii_alphabetic() || c == b'_' {
            let start = i;
            while i < len && (src[i].is_ascii_alphanumeric() || src[i] == b'_') {
                i += 1;
            }
            let text = &source[start..i];
            let kind = keyword_kind(text).unwrap_or(TokenKind::Ident);
            push(&mut tokens, Token::new(kind, text))?;
            continue;
        }

        // string literal, no escapes; unterminated reads to end of input
        if c == b'"' {
            i += 1;
            let start = i;
            while i < len && src[i] != b'"' {
                i += 1;
            }
            let text = &source[start..i];
            if i < len {
                i += 1; // closing quote
            }
            push(&mut tokens, Token::new(TokenKind::Str, text))?;
            continue;
        }

        // two-character operators before their single-character prefixes
        if i + 1 < len {
            let two = match (c, src[i + 1]) {
                (b'=', b'=') => Some(Token::new(TokenKind::EqEq, "==")),
                (b'!', b'=') => Some(Token::new(TokenKind::NotEq, "!=")),
                (b'>', b'=') => Some(Token::new(TokenKind::GtEq, ">=")),
                (b'<', b'=') => Some(Token::new(TokenKind::LtEq, "<=")),
                (b'-', b'>') => Some(Token::new(TokenKind::Arrow, "->")),
                _ => None,
            };
            if let Some(tok) = two {
                push(&mut tokens, tok)?;
                i += 2;
                continue;
            }
        }

        // single-character operators and delimiters
        let single = match c {
            b'=' => Token::new(TokenKind::Assign, "="),
            b'+' => Token::new(TokenKind::Plus, "+"),
            b'-' => Token::new(TokenKind::Minus, "-"),
            b'*' => Token::new(TokenKind::Star, "*"),
            b'/' => Token::new(TokenKind::Slash, "/"),
            b'>' => Token::new(TokenKind::Gt, ">"),
            b'<' => Token::new(TokenKind::Lt, "<"),
            b'(' => Token::new(TokenKind::LParen, "("),
            b')' => Token::new(TokenKind::RParen, ")"),
            b',' => Token::new(TokenKind::Comma, ","),
            b':' => Token::new(TokenKind::Colon, ":"),
            b'.' => Token::new(TokenKind::Dot, "."),
            b'[' => Token::new(TokenKind::LBracket, "["),
            b']' => Token::new(TokenKind::RBracket, "]"),
            b'{' => Token::new(TokenKind::LBrace, "{"),
            b'}' => Token::new(TokenKind::RBrace, "}"),
            _ => {
                return Err(format!("Lexer error: unknown character '{}'", c as char));
            }
        };
        push(&mut tokens, single)?;
        i += 1;
    }

    push(&mut tokens, Token::new(TokenKind::Eof, ""))?;
    Ok(tokens)
}
