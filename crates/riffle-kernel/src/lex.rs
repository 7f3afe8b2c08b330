//! Hand-written lexer for the kernel dialect.
//!
//! Produces a flat token stream with 1-indexed line/column positions. Line
//! (`//`) and block (`/* */`) comments are skipped; block comments nest.

use std::iter::Peekable;
use std::str::Chars;

use crate::limits;
use crate::parse::ParseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Pos {
    pub line: u32,
    pub column: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Tok {
    Ident(String),
    IntLit(i64),
    FloatLit(f32),

    Kernel,
    Const,
    Fn,
    Let,
    Var,
    If,
    Else,
    For,
    Break,
    Continue,
    Return,
    True,
    False,

    LBrace,
    RBrace,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Colon,
    Semi,
    Dot,
    At,
    Arrow,
    Question,

    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Lt,
    Le,
    Gt,
    Ge,
    EqEq,
    Ne,
    Assign,
    Not,
    AndAnd,
    OrOr,

    Eof,
}

impl Tok {
    /// Human-readable token spelling used in parse errors.
    pub(crate) fn describe(&self) -> String {
        match self {
            Tok::Ident(name) => format!("identifier `{name}`"),
            Tok::IntLit(v) => format!("integer literal `{v}`"),
            Tok::FloatLit(v) => format!("float literal `{v}`"),
            Tok::Kernel => "`kernel`".to_owned(),
            Tok::Const => "`const`".to_owned(),
            Tok::Fn => "`fn`".to_owned(),
            Tok::Let => "`let`".to_owned(),
            Tok::Var => "`var`".to_owned(),
            Tok::If => "`if`".to_owned(),
            Tok::Else => "`else`".to_owned(),
            Tok::For => "`for`".to_owned(),
            Tok::Break => "`break`".to_owned(),
            Tok::Continue => "`continue`".to_owned(),
            Tok::Return => "`return`".to_owned(),
            Tok::True => "`true`".to_owned(),
            Tok::False => "`false`".to_owned(),
            Tok::LBrace => "`{`".to_owned(),
            Tok::RBrace => "`}`".to_owned(),
            Tok::LParen => "`(`".to_owned(),
            Tok::RParen => "`)`".to_owned(),
            Tok::LBracket => "`[`".to_owned(),
            Tok::RBracket => "`]`".to_owned(),
            Tok::Comma => "`,`".to_owned(),
            Tok::Colon => "`:`".to_owned(),
            Tok::Semi => "`;`".to_owned(),
            Tok::Dot => "`.`".to_owned(),
            Tok::At => "`@`".to_owned(),
            Tok::Arrow => "`->`".to_owned(),
            Tok::Question => "`?`".to_owned(),
            Tok::Plus => "`+`".to_owned(),
            Tok::Minus => "`-`".to_owned(),
            Tok::Star => "`*`".to_owned(),
            Tok::Slash => "`/`".to_owned(),
            Tok::Percent => "`%`".to_owned(),
            Tok::Lt => "`<`".to_owned(),
            Tok::Le => "`<=`".to_owned(),
            Tok::Gt => "`>`".to_owned(),
            Tok::Ge => "`>=`".to_owned(),
            Tok::EqEq => "`==`".to_owned(),
            Tok::Ne => "`!=`".to_owned(),
            Tok::Assign => "`=`".to_owned(),
            Tok::Not => "`!`".to_owned(),
            Tok::AndAnd => "`&&`".to_owned(),
            Tok::OrOr => "`||`".to_owned(),
            Tok::Eof => "end of input".to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SpannedTok {
    pub tok: Tok,
    pub pos: Pos,
}

struct Lexer<'a> {
    chars: Peekable<Chars<'a>>,
    line: u32,
    column: u32,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            chars: source.chars().peekable(),
            line: 1,
            column: 1,
        }
    }

    fn pos(&self) -> Pos {
        Pos {
            line: self.line,
            column: self.column,
        }
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn match_char(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn error(&self, at: Pos, expected: impl Into<String>, found: impl Into<String>) -> ParseError {
        ParseError {
            line: at.line,
            column: at.column,
            expected: expected.into(),
            found: found.into(),
        }
    }

    fn skip_trivia(&mut self) -> Result<(), ParseError> {
        loop {
            match self.peek() {
                Some(' ') | Some('\t') | Some('\r') | Some('\n') => {
                    self.advance();
                }
                Some('/') => {
                    let mut lookahead = self.chars.clone();
                    lookahead.next();
                    match lookahead.peek() {
                        Some('/') => {
                            while let Some(c) = self.peek() {
                                if c == '\n' {
                                    break;
                                }
                                self.advance();
                            }
                        }
                        Some('*') => {
                            let start = self.pos();
                            self.advance();
                            self.advance();
                            let mut depth = 1u32;
                            loop {
                                match self.advance() {
                                    Some('*') if self.match_char('/') => {
                                        depth -= 1;
                                        if depth == 0 {
                                            break;
                                        }
                                    }
                                    Some('/') if self.match_char('*') => depth += 1,
                                    Some(_) => {}
                                    None => {
                                        return Err(self.error(
                                            start,
                                            "`*/` closing this comment",
                                            "end of input",
                                        ))
                                    }
                                }
                            }
                        }
                        _ => return Ok(()),
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn lex_number(&mut self, at: Pos) -> Result<Tok, ParseError> {
        let mut text = String::new();
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            text.push(self.advance().unwrap());
        }
        let mut is_float = false;
        if self.peek() == Some('.') {
            // `1.x` is never valid, so a dot always starts a fraction here.
            is_float = true;
            text.push(self.advance().unwrap());
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                text.push(self.advance().unwrap());
            }
        }
        if matches!(self.peek(), Some('e') | Some('E')) {
            is_float = true;
            text.push(self.advance().unwrap());
            if matches!(self.peek(), Some('+') | Some('-')) {
                text.push(self.advance().unwrap());
            }
            if !matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                return Err(self.error(at, "exponent digits", format!("`{text}`")));
            }
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                text.push(self.advance().unwrap());
            }
        }
        if is_float {
            let value: f32 = text
                .parse()
                .map_err(|_| self.error(at, "a float literal", format!("`{text}`")))?;
            Ok(Tok::FloatLit(value))
        } else {
            let value: i64 = text
                .parse()
                .map_err(|_| self.error(at, "an integer literal", format!("`{text}`")))?;
            Ok(Tok::IntLit(value))
        }
    }

    fn lex_ident(&mut self) -> Tok {
        let mut text = String::new();
        while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == '_') {
            text.push(self.advance().unwrap());
        }
        match text.as_str() {
            "kernel" => Tok::Kernel,
            "const" => Tok::Const,
            "fn" => Tok::Fn,
            "let" => Tok::Let,
            "var" => Tok::Var,
            "if" => Tok::If,
            "else" => Tok::Else,
            "for" => Tok::For,
            "break" => Tok::Break,
            "continue" => Tok::Continue,
            "return" => Tok::Return,
            "true" => Tok::True,
            "false" => Tok::False,
            _ => Tok::Ident(text),
        }
    }

    fn next_token(&mut self) -> Result<SpannedTok, ParseError> {
        self.skip_trivia()?;
        let at = self.pos();
        let Some(c) = self.peek() else {
            return Ok(SpannedTok { tok: Tok::Eof, pos: at });
        };
        let tok = match c {
            '0'..='9' => self.lex_number(at)?,
            'a'..='z' | 'A'..='Z' | '_' => self.lex_ident(),
            _ => {
                self.advance();
                match c {
                    '{' => Tok::LBrace,
                    '}' => Tok::RBrace,
                    '(' => Tok::LParen,
                    ')' => Tok::RParen,
                    '[' => Tok::LBracket,
                    ']' => Tok::RBracket,
                    ',' => Tok::Comma,
                    ':' => Tok::Colon,
                    ';' => Tok::Semi,
                    '.' => Tok::Dot,
                    '@' => Tok::At,
                    '?' => Tok::Question,
                    '+' => Tok::Plus,
                    '*' => Tok::Star,
                    '/' => Tok::Slash,
                    '%' => Tok::Percent,
                    '-' => {
                        if self.match_char('>') {
                            Tok::Arrow
                        } else {
                            Tok::Minus
                        }
                    }
                    '<' => {
                        if self.match_char('=') {
                            Tok::Le
                        } else {
                            Tok::Lt
                        }
                    }
                    '>' => {
                        if self.match_char('=') {
                            Tok::Ge
                        } else {
                            Tok::Gt
                        }
                    }
                    '=' => {
                        if self.match_char('=') {
                            Tok::EqEq
                        } else {
                            Tok::Assign
                        }
                    }
                    '!' => {
                        if self.match_char('=') {
                            Tok::Ne
                        } else {
                            Tok::Not
                        }
                    }
                    '&' => {
                        if self.match_char('&') {
                            Tok::AndAnd
                        } else {
                            return Err(self.error(at, "`&&`", "`&`"));
                        }
                    }
                    '|' => {
                        if self.match_char('|') {
                            Tok::OrOr
                        } else {
                            return Err(self.error(at, "`||`", "`|`"));
                        }
                    }
                    other => {
                        return Err(self.error(at, "a token", format!("`{other}`")));
                    }
                }
            }
        };
        Ok(SpannedTok { tok, pos: at })
    }
}

pub(crate) fn lex(source: &str) -> Result<Vec<SpannedTok>, ParseError> {
    if source.len() > limits::MAX_SOURCE_BYTES {
        return Err(ParseError {
            line: 1,
            column: 1,
            expected: format!("kernel source of at most {} bytes", limits::MAX_SOURCE_BYTES),
            found: format!("{} bytes", source.len()),
        });
    }
    let mut lexer = Lexer::new(source);
    let mut tokens = Vec::new();
    loop {
        let spanned = lexer.next_token()?;
        let done = spanned.tok == Tok::Eof;
        tokens.push(spanned);
        if done {
            return Ok(tokens);
        }
        if tokens.len() > limits::MAX_TOKENS {
            let pos = tokens.last().map(|t| t.pos).unwrap_or(Pos { line: 1, column: 1 });
            return Err(ParseError {
                line: pos.line,
                column: pos.column,
                expected: format!("at most {} tokens", limits::MAX_TOKENS),
                found: "more".to_owned(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(source: &str) -> Vec<Tok> {
        lex(source).unwrap().into_iter().map(|t| t.tok).collect()
    }

    #[test]
    fn lexes_annotations_and_numbers() {
        assert_eq!(
            toks("@in x: float; 1 2.5"),
            vec![
                Tok::At,
                Tok::Ident("in".to_owned()),
                Tok::Ident("x".to_owned()),
                Tok::Colon,
                Tok::Ident("float".to_owned()),
                Tok::Semi,
                Tok::IntLit(1),
                Tok::FloatLit(2.5),
                Tok::Eof,
            ]
        );
    }

    #[test]
    fn skips_nested_block_comments() {
        assert_eq!(toks("/* a /* b */ c */ let"), vec![Tok::Let, Tok::Eof]);
    }

    #[test]
    fn unterminated_comment_reports_position() {
        let err = lex("let /* oops").unwrap_err();
        assert_eq!((err.line, err.column), (1, 5));
        assert!(err.found.contains("end of input"));
    }

    #[test]
    fn tracks_lines_and_columns() {
        let tokens = lex("let\n  var").unwrap();
        assert_eq!(tokens[1].pos, Pos { line: 2, column: 3 });
    }
}
