//! Lexer for sable source
//!
//! Produces a flat token list with line/column positions. Keywords stay
//! `Ident` tokens; the parser matches on their text. Interpolated
//! strings are split here into text parts and raw expression substrings,
//! which the parser re-parses with a sub-parser.

/// A token with source position information
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: Tok,
    /// Line number (1-based)
    pub line: usize,
    /// Column number (1-based)
    pub column: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Ident(String),
    Int { value: u128, suffix: IntSuffix },
    Float { value: f64, single: bool },
    /// Decimal literals keep their text so no precision is lost
    DecimalLit(String),
    Str(String),
    Char(u16),
    /// `$"…"` split into parts
    InterpStr(Vec<RawInterpPart>),
    Punct(&'static str),
    Eof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntSuffix {
    None,
    U,
    L,
    Ul,
}

/// Interpolated-string piece before expression parsing.
#[derive(Debug, Clone, PartialEq)]
pub enum RawInterpPart {
    Text(String),
    /// Raw expression source plus its position for error reporting
    Expr { source: String, line: usize, column: usize },
}

/// Multi-character punctuation, longest first so maximal munch wins.
const PUNCTS: &[&str] = &[
    "??=", "<<=", ">>=", "=>", "==", "!=", "<=", ">=", "&&", "||", "??", "++", "--", "+=", "-=",
    "*=", "/=", "%=", "&=", "|=", "^=", "<<", ">>", "..", "(", ")", "{", "}", "[", "]", ",", ";",
    ":", ".", "?", "+", "-", "*", "/", "%", "=", "<", ">", "!", "~", "&", "|", "^",
];

pub fn tokenize(source: &str) -> Result<Vec<Token>, String> {
    Lexer::new(source).run()
}

struct Lexer<'a> {
    bytes: &'a [u8],
    pos: usize,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Lexer {
            bytes: source.as_bytes(),
            pos: 0,
            line: 1,
            column: 1,
        }
    }

    fn run(mut self) -> Result<Vec<Token>, String> {
        let mut tokens = Vec::new();
        loop {
            self.skip_trivia()?;
            let (line, column) = (self.line, self.column);
            let Some(c) = self.peek() else {
                tokens.push(Token { kind: Tok::Eof, line, column });
                return Ok(tokens);
            };
            let kind = if c == b'$' && self.peek_at(1) == Some(b'"') {
                self.interp_string()?
            } else if c == b'"' {
                Tok::Str(self.string_literal()?)
            } else if c == b'\'' {
                self.char_literal()?
            } else if c.is_ascii_digit() {
                self.number()?
            } else if c == b'.' && self.peek_at(1).is_some_and(|d| d.is_ascii_digit()) {
                self.number()?
            } else if c.is_ascii_alphabetic() || c == b'_' || c >= 0x80 {
                self.ident()
            } else {
                self.punct()?
            };
            // `_` alone is an identifier-like token for patterns
            tokens.push(Token { kind, line, column });
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn peek_at(&self, n: usize) -> Option<u8> {
        self.bytes.get(self.pos + n).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        if b == b'\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(b)
    }

    fn fail(&self, what: &str) -> String {
        format!("lex error at {}:{}: {}", self.line, self.column, what)
    }

    fn skip_trivia(&mut self) -> Result<(), String> {
        loop {
            match self.peek() {
                Some(b' ' | b'\t' | b'\r' | b'\n') => {
                    self.bump();
                }
                Some(b'/') if self.peek_at(1) == Some(b'/') => {
                    while !matches!(self.peek(), None | Some(b'\n')) {
                        self.bump();
                    }
                }
                Some(b'/') if self.peek_at(1) == Some(b'*') => {
                    self.bump();
                    self.bump();
                    loop {
                        match self.peek() {
                            None => return Err(self.fail("unterminated block comment")),
                            Some(b'*') if self.peek_at(1) == Some(b'/') => {
                                self.bump();
                                self.bump();
                                break;
                            }
                            _ => {
                                self.bump();
                            }
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn ident(&mut self) -> Tok {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == b'_' || c >= 0x80)
        {
            self.bump();
        }
        Tok::Ident(String::from_utf8_lossy(&self.bytes[start..self.pos]).into_owned())
    }

    fn punct(&mut self) -> Result<Tok, String> {
        for p in PUNCTS {
            if self.bytes[self.pos..].starts_with(p.as_bytes()) {
                for _ in 0..p.len() {
                    self.bump();
                }
                return Ok(Tok::Punct(p));
            }
        }
        Err(self.fail(&format!(
            "unexpected character '{}'",
            self.peek().map(|c| c as char).unwrap_or('\0')
        )))
    }

    fn number(&mut self) -> Result<Tok, String> {
        let start = self.pos;
        if self.peek() == Some(b'0') && matches!(self.peek_at(1), Some(b'x' | b'X')) {
            self.bump();
            self.bump();
            let digits = self.pos;
            while matches!(self.peek(), Some(c) if c.is_ascii_hexdigit() || c == b'_') {
                self.bump();
            }
            let text: String = self.bytes[digits..self.pos]
                .iter()
                .filter(|c| **c != b'_')
                .map(|c| *c as char)
                .collect();
            if text.is_empty() {
                return Err(self.fail("empty hex literal"));
            }
            let value = u128::from_str_radix(&text, 16).map_err(|_| self.fail("bad hex literal"))?;
            return Ok(Tok::Int { value, suffix: self.int_suffix() });
        }

        let mut saw_dot = false;
        let mut saw_exp = false;
        while let Some(c) = self.peek() {
            match c {
                b'0'..=b'9' | b'_' => {
                    self.bump();
                }
                b'.' if !saw_dot
                    && !saw_exp
                    && self.peek_at(1).is_some_and(|d| d.is_ascii_digit()) =>
                {
                    saw_dot = true;
                    self.bump();
                }
                b'e' | b'E'
                    if !saw_exp
                        && matches!(self.peek_at(1), Some(d) if d.is_ascii_digit() || d == b'+' || d == b'-') =>
                {
                    saw_exp = true;
                    self.bump();
                    if matches!(self.peek(), Some(b'+' | b'-')) {
                        self.bump();
                    }
                }
                _ => break,
            }
        }
        let text: String = self.bytes[start..self.pos]
            .iter()
            .filter(|c| **c != b'_')
            .map(|c| *c as char)
            .collect();

        // Suffixes select the literal's kind
        match self.peek() {
            Some(b'm' | b'M') => {
                self.bump();
                return Ok(Tok::DecimalLit(text));
            }
            Some(b'f' | b'F') => {
                self.bump();
                let value: f64 = text.parse().map_err(|_| self.fail("bad float literal"))?;
                return Ok(Tok::Float { value, single: true });
            }
            Some(b'd' | b'D') => {
                self.bump();
                let value: f64 = text.parse().map_err(|_| self.fail("bad double literal"))?;
                return Ok(Tok::Float { value, single: false });
            }
            _ => {}
        }
        if saw_dot || saw_exp {
            let value: f64 = text.parse().map_err(|_| self.fail("bad double literal"))?;
            return Ok(Tok::Float { value, single: false });
        }
        let value: u128 = text.parse().map_err(|_| self.fail("bad integer literal"))?;
        Ok(Tok::Int { value, suffix: self.int_suffix() })
    }

    fn int_suffix(&mut self) -> IntSuffix {
        match (self.peek(), self.peek_at(1)) {
            (Some(b'u' | b'U'), Some(b'l' | b'L')) => {
                self.bump();
                self.bump();
                IntSuffix::Ul
            }
            (Some(b'l' | b'L'), Some(b'u' | b'U')) => {
                self.bump();
                self.bump();
                IntSuffix::Ul
            }
            (Some(b'u' | b'U'), _) => {
                self.bump();
                IntSuffix::U
            }
            (Some(b'l' | b'L'), _) => {
                self.bump();
                IntSuffix::L
            }
            _ => IntSuffix::None,
        }
    }

    fn escape(&mut self) -> Result<char, String> {
        match self.bump() {
            Some(b'n') => Ok('\n'),
            Some(b'r') => Ok('\r'),
            Some(b't') => Ok('\t'),
            Some(b'0') => Ok('\0'),
            Some(b'b') => Ok('\x08'),
            Some(b'f') => Ok('\x0C'),
            Some(b'\\') => Ok('\\'),
            Some(b'\'') => Ok('\''),
            Some(b'"') => Ok('"'),
            Some(b'u') => {
                let mut v = 0u32;
                for _ in 0..4 {
                    let c = self.bump().ok_or_else(|| self.fail("truncated \\u escape"))?;
                    let d = (c as char)
                        .to_digit(16)
                        .ok_or_else(|| self.fail("bad \\u escape"))?;
                    v = v * 16 + d;
                }
                Ok(char::from_u32(v).unwrap_or('\u{FFFD}'))
            }
            _ => Err(self.fail("unknown escape")),
        }
    }

    fn string_literal(&mut self) -> Result<String, String> {
        self.bump(); // opening quote
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(self.fail("unterminated string literal")),
                Some(b'"') => return Ok(out),
                Some(b'\\') => out.push(self.escape()?),
                Some(c) if c < 0x80 => out.push(c as char),
                Some(c) => {
                    // Re-assemble the UTF-8 sequence
                    let mut buf = vec![c];
                    let width = match c {
                        0xC0..=0xDF => 2,
                        0xE0..=0xEF => 3,
                        _ => 4,
                    };
                    for _ in 1..width {
                        if let Some(b) = self.bump() {
                            buf.push(b);
                        }
                    }
                    out.push_str(&String::from_utf8_lossy(&buf));
                }
            }
        }
    }

    fn char_literal(&mut self) -> Result<Tok, String> {
        self.bump(); // opening quote
        let c = match self.bump() {
            None => return Err(self.fail("unterminated char literal")),
            Some(b'\\') => self.escape()?,
            Some(c) if c < 0x80 => c as char,
            Some(_) => return Err(self.fail("non-ASCII char literal needs \\u")),
        };
        if self.bump() != Some(b'\'') {
            return Err(self.fail("char literal must hold one character"));
        }
        let mut units = [0u16; 2];
        let encoded = c.encode_utf16(&mut units);
        if encoded.len() != 1 {
            return Err(self.fail("char literal outside the basic plane"));
        }
        Ok(Tok::Char(units[0]))
    }

    fn interp_string(&mut self) -> Result<Tok, String> {
        self.bump(); // $
        self.bump(); // "
        let mut parts = Vec::new();
        let mut text = String::new();
        loop {
            match self.bump() {
                None => return Err(self.fail("unterminated interpolated string")),
                Some(b'"') => {
                    if !text.is_empty() {
                        parts.push(RawInterpPart::Text(text));
                    }
                    return Ok(Tok::InterpStr(parts));
                }
                Some(b'\\') => text.push(self.escape()?),
                Some(b'{') if self.peek() == Some(b'{') => {
                    self.bump();
                    text.push('{');
                }
                Some(b'}') if self.peek() == Some(b'}') => {
                    self.bump();
                    text.push('}');
                }
                Some(b'{') => {
                    if !text.is_empty() {
                        parts.push(RawInterpPart::Text(std::mem::take(&mut text)));
                    }
                    let (line, column) = (self.line, self.column);
                    let mut depth = 1;
                    let mut source = String::new();
                    loop {
                        match self.bump() {
                            None => return Err(self.fail("unterminated interpolation")),
                            Some(b'{') => {
                                depth += 1;
                                source.push('{');
                            }
                            Some(b'}') => {
                                depth -= 1;
                                if depth == 0 {
                                    break;
                                }
                                source.push('}');
                            }
                            Some(c) => source.push(c as char),
                        }
                    }
                    parts.push(RawInterpPart::Expr { source, line, column });
                }
                Some(b'}') => return Err(self.fail("unmatched '}' in interpolated string")),
                Some(c) if c < 0x80 => text.push(c as char),
                Some(c) => {
                    let mut buf = vec![c];
                    let width = match c {
                        0xC0..=0xDF => 2,
                        0xE0..=0xEF => 3,
                        _ => 4,
                    };
                    for _ in 1..width {
                        if let Some(b) = self.bump() {
                            buf.push(b);
                        }
                    }
                    text.push_str(&String::from_utf8_lossy(&buf));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<Tok> {
        tokenize(src).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_idents_and_puncts() {
        assert_eq!(
            kinds("x += 1;"),
            vec![
                Tok::Ident("x".into()),
                Tok::Punct("+="),
                Tok::Int { value: 1, suffix: IntSuffix::None },
                Tok::Punct(";"),
                Tok::Eof,
            ]
        );
    }

    #[test]
    fn test_number_suffixes() {
        assert_eq!(
            kinds("5u 5L 5ul 1.5 1.5f 1.5m 0x1F"),
            vec![
                Tok::Int { value: 5, suffix: IntSuffix::U },
                Tok::Int { value: 5, suffix: IntSuffix::L },
                Tok::Int { value: 5, suffix: IntSuffix::Ul },
                Tok::Float { value: 1.5, single: false },
                Tok::Float { value: 1.5, single: true },
                Tok::DecimalLit("1.5".into()),
                Tok::Int { value: 0x1F, suffix: IntSuffix::None },
                Tok::Eof,
            ]
        );
    }

    #[test]
    fn test_strings_and_chars() {
        assert_eq!(
            kinds(r#""a\n" 'x' '\t'"#),
            vec![
                Tok::Str("a\n".into()),
                Tok::Char(b'x' as u16),
                Tok::Char(b'\t' as u16),
                Tok::Eof,
            ]
        );
    }

    #[test]
    fn test_comments_skipped() {
        assert_eq!(
            kinds("a // line\n /* block\n */ b"),
            vec![Tok::Ident("a".into()), Tok::Ident("b".into()), Tok::Eof]
        );
    }

    #[test]
    fn test_interp_string() {
        let toks = kinds(r#"$"n={n}, m={m+1}!""#);
        let Tok::InterpStr(parts) = &toks[0] else { panic!("{toks:?}") };
        assert_eq!(parts.len(), 5);
        assert_eq!(parts[0], RawInterpPart::Text("n=".into()));
        assert!(matches!(&parts[1], RawInterpPart::Expr { source, .. } if source == "n"));
        assert!(matches!(&parts[3], RawInterpPart::Expr { source, .. } if source == "m+1"));
        assert_eq!(parts[4], RawInterpPart::Text("!".into()));
    }

    #[test]
    fn test_maximal_munch() {
        assert_eq!(
            kinds("a??=b<<=c..d"),
            vec![
                Tok::Ident("a".into()),
                Tok::Punct("??="),
                Tok::Ident("b".into()),
                Tok::Punct("<<="),
                Tok::Ident("c".into()),
                Tok::Punct(".."),
                Tok::Ident("d".into()),
                Tok::Eof,
            ]
        );
    }

    #[test]
    fn test_positions() {
        let toks = tokenize("a\n  b").unwrap();
        assert_eq!((toks[0].line, toks[0].column), (1, 1));
        assert_eq!((toks[1].line, toks[1].column), (2, 3));
    }

    #[test]
    fn test_errors() {
        assert!(tokenize("\"open").is_err());
        assert!(tokenize("'ab'").is_err());
        assert!(tokenize("/* open").is_err());
        assert!(tokenize("0x").is_err());
    }
}
