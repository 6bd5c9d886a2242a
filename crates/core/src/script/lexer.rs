//! Script-language lexer.

use logos::Logos;

use crate::error::{EngineError, EngineResult};

#[derive(Logos, Clone, Copy, Debug, PartialEq, Eq)]
#[logos(skip r"[ \t\r\n\f]+")]
#[logos(skip r"//[^\n]*")]
#[logos(skip r"/\*[^*]*\*+([^/*][^*]*\*+)*/")]
pub enum Tok {
    #[token("function")]
    Function,
    #[token("method")]
    Method,
    #[token("external")]
    External,
    #[token("on")]
    On,
    #[token("var")]
    Var,
    #[token("global")]
    Global,
    #[token("const")]
    Const,
    #[token("if")]
    If,
    #[token("else")]
    Else,
    #[token("while")]
    While,
    #[token("for")]
    For,
    #[token("switch")]
    Switch,
    #[token("case")]
    Case,
    #[token("default")]
    Default,
    #[token("return")]
    Return,
    #[token("break")]
    Break,
    #[token("continue")]
    Continue,
    #[token("true")]
    True,
    #[token("false")]
    False,
    #[token("null")]
    Null,
    #[token("this")]
    This,
    #[token("new")]
    New,

    #[regex(r"[A-Za-z_][A-Za-z0-9_]*")]
    Ident,
    #[regex(r"[0-9]+\.[0-9]+")]
    FloatLit,
    #[regex(r"[0-9]+")]
    IntLit,
    #[regex(r#""([^"\\\n]|\\.)*""#)]
    StringLit,

    #[token("===")]
    StrictEq,
    #[token("!==")]
    StrictNe,
    #[token("==")]
    EqEq,
    #[token("!=")]
    NotEq,
    #[token("<=")]
    Le,
    #[token(">=")]
    Ge,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,
    #[token("&&")]
    AndAnd,
    #[token("||")]
    OrOr,
    #[token("+=")]
    PlusAssign,
    #[token("-=")]
    MinusAssign,
    #[token("*=")]
    StarAssign,
    #[token("/=")]
    SlashAssign,
    #[token("%=")]
    PercentAssign,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("!")]
    Bang,
    #[token("=")]
    Assign,
    #[token("?")]
    Question,
    #[token(":")]
    Colon,
    #[token(".")]
    Dot,
    #[token(",")]
    Comma,
    #[token(";")]
    Semi,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
}

/// One token with its slice and source position (1-based).
#[derive(Clone, Debug)]
pub struct Token {
    pub tok: Tok,
    pub text: String,
    pub line: u32,
    pub column: u32,
}

/// Lexes a whole source file, reporting the first bad character with
/// line/column.
pub fn lex(path: &str, source: &str) -> EngineResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut lexer = Tok::lexer(source);
    while let Some(result) = lexer.next() {
        let span = lexer.span();
        let (line, column) = position_of(source, span.start);
        match result {
            Ok(tok) => tokens.push(Token {
                tok,
                text: lexer.slice().to_string(),
                line,
                column,
            }),
            Err(()) => {
                return Err(EngineError::compile(
                    path,
                    line,
                    column,
                    format!("unexpected character '{}'", lexer.slice()),
                ));
            }
        }
    }
    Ok(tokens)
}

fn position_of(source: &str, offset: usize) -> (u32, u32) {
    let mut line = 1u32;
    let mut column = 1u32;
    for (index, ch) in source.char_indices() {
        if index >= offset {
            break;
        }
        if ch == '\n' {
            line += 1;
            column = 1;
        } else {
            column += 1;
        }
    }
    (line, column)
}

/// Unquotes a string literal slice, processing the escape set the
/// language supports.
pub fn unescape_string(raw: &str) -> String {
    let inner = &raw[1..raw.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some(other) => out.push(other),
            None => break,
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Tok> {
        lex("t.script", source)
            .expect("lex")
            .into_iter()
            .map(|token| token.tok)
            .collect()
    }

    #[test]
    fn keywords_operators_and_literals() {
        assert_eq!(
            kinds("var x = 1 + 2.5;"),
            [
                Tok::Var,
                Tok::Ident,
                Tok::Assign,
                Tok::IntLit,
                Tok::Plus,
                Tok::FloatLit,
                Tok::Semi
            ]
        );
        assert_eq!(
            kinds("a === b !== c == d"),
            [
                Tok::Ident,
                Tok::StrictEq,
                Tok::Ident,
                Tok::StrictNe,
                Tok::Ident,
                Tok::EqEq,
                Tok::Ident
            ]
        );
    }

    #[test]
    fn comments_are_skipped() {
        assert_eq!(
            kinds("x // line\n/* block\n * still */ y"),
            [Tok::Ident, Tok::Ident]
        );
        assert_eq!(kinds("/* a ** b **/ z"), [Tok::Ident]);
    }

    #[test]
    fn positions_are_one_based() {
        let tokens = lex("t.script", "var\n  hero").expect("lex");
        assert_eq!((tokens[0].line, tokens[0].column), (1, 1));
        assert_eq!((tokens[1].line, tokens[1].column), (2, 3));
    }

    #[test]
    fn bad_character_reports_position() {
        let err = lex("t.script", "var @x").expect_err("bad char");
        assert!(err.to_string().contains("t.script:1:5"));
    }

    #[test]
    fn string_escapes() {
        let tokens = lex("t.script", r#""a\"b\n""#).expect("lex");
        assert_eq!(tokens[0].tok, Tok::StringLit);
        assert_eq!(unescape_string(&tokens[0].text), "a\"b\n");
    }
}
