//! Tokenizer: splits schema text into a lazy sequence of typed tokens, per
//! spec.md §4.2 and the grammar in §6.
//!
//! Positions (`pos`) are character indices into the schema text, used by
//! the compiler to report `CompilationError`/`TokenizationError` variants
//! against the offending token, per spec.md §7.

use crate::error::ParseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Big,
    Little,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SizeSpec {
    Literal(i64),
    Expr(String),
    WholeStream,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExtraSpec {
    Literal(i64),
    Expr(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AtomToken {
    pub pos: usize,
    pub type_name: String,
    pub name: Option<String>,
    pub array_size: Option<SizeSpec>,
    pub extra: Option<ExtraSpec>,
    pub byte_order: Option<Endian>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructOpenToken {
    pub pos: usize,
    pub name: Option<String>,
    pub array_size: Option<SizeSpec>,
    pub byte_order: Option<Endian>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Atom(AtomToken),
    StructOpen(StructOpenToken),
    StructClose { pos: usize },
    Comment { text: String, pos: usize },
}

impl Token {
    pub fn pos(&self) -> usize {
        match self {
            Token::Atom(a) => a.pos,
            Token::StructOpen(s) => s.pos,
            Token::StructClose { pos } => *pos,
            Token::Comment { pos, .. } => *pos,
        }
    }
}

pub struct Tokenizer {
    chars: Vec<char>,
    idx: usize,
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn classify_int_or_expr(raw: &str) -> bool {
    // A plain (possibly negative) decimal literal.
    let body = raw.strip_prefix('-').unwrap_or(raw);
    !body.is_empty() && body.chars().all(|c| c.is_ascii_digit())
}

impl Tokenizer {
    pub fn new(text: &str) -> Self {
        Self { chars: text.chars().collect(), idx: 0 }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.idx).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.idx + offset).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.idx += 1;
        }
        c
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.idx += 1;
        }
    }

    fn skip_ws_and_seps(&mut self) {
        loop {
            self.skip_ws();
            if self.peek() == Some(';') {
                self.idx += 1;
                continue;
            }
            break;
        }
    }

    fn starts_with_reset_dollars(&self) -> bool {
        let kw: Vec<char> = "reset$$".chars().collect();
        for (i, kc) in kw.iter().enumerate() {
            if self.peek_at(i) != Some(*kc) {
                return false;
            }
        }
        !matches!(self.peek_at(kw.len()), Some(c) if is_ident_continue(c) || c == '$')
    }

    fn read_identifier(&mut self) -> Result<String, ParseError> {
        let pos = self.idx;
        if self.starts_with_reset_dollars() {
            for _ in 0.."reset$$".len() {
                self.advance();
            }
            return Ok("reset$$".to_string());
        }
        match self.peek() {
            Some(c) if is_ident_start(c) => {}
            Some(c) => return Err(ParseError::UnexpectedChar { ch: c, pos }),
            None => return Err(ParseError::MalformedToken { pos, message: "expected identifier, found end of input".into() }),
        }
        let start = self.idx;
        while matches!(self.peek(), Some(c) if is_ident_continue(c)) {
            self.idx += 1;
        }
        Ok(self.chars[start..self.idx].iter().collect())
    }

    /// Reads raw, bracket-less text up to the next whitespace/terminator
    /// character (used for the `:extra` slot).
    fn read_extra_text(&mut self) -> Result<ExtraSpec, ParseError> {
        let start = self.idx;
        while matches!(self.peek(), Some(c) if !c.is_whitespace() && c != '[' && c != '{' && c != ';' && c != '}') {
            self.idx += 1;
        }
        let raw: String = self.chars[start..self.idx].iter().collect();
        if classify_int_or_expr(&raw) {
            let value = raw
                .parse()
                .map_err(|_| ParseError::MalformedToken { pos: start, message: format!("integer literal '{raw}' out of range") })?;
            Ok(ExtraSpec::Literal(value))
        } else {
            Ok(ExtraSpec::Expr(raw))
        }
    }

    /// Reads raw text up to (and consuming) the closing `]` of a `[...]`
    /// array-size block.
    fn read_size_text(&mut self, open_pos: usize) -> Result<SizeSpec, ParseError> {
        let start = self.idx;
        while matches!(self.peek(), Some(c) if c != ']') {
            self.idx += 1;
        }
        if self.peek() != Some(']') {
            return Err(ParseError::UnterminatedBlock { pos: open_pos });
        }
        let raw: String = self.chars[start..self.idx].iter().collect();
        self.idx += 1; // consume ']'
        let trimmed = raw.trim();
        if trimmed == "_" {
            Ok(SizeSpec::WholeStream)
        } else if classify_int_or_expr(trimmed) {
            let value = trimmed
                .parse()
                .map_err(|_| ParseError::MalformedToken { pos: start, message: format!("integer literal '{trimmed}' out of range") })?;
            Ok(SizeSpec::Literal(value))
        } else {
            Ok(SizeSpec::Expr(trimmed.to_string()))
        }
    }

    fn read_comment(&mut self, pos: usize) -> Token {
        self.idx += 2; // consume "//"
        let start = self.idx;
        while matches!(self.peek(), Some(c) if c != '\n') {
            self.idx += 1;
        }
        let text: String = self.chars[start..self.idx].iter().collect();
        Token::Comment { text: text.trim().to_string(), pos }
    }

    pub fn next_token(&mut self) -> Result<Option<Token>, ParseError> {
        self.skip_ws_and_seps();
        let pos = self.idx;
        let Some(c) = self.peek() else { return Ok(None) };

        if c == '/' && self.peek_at(1) == Some('/') {
            return Ok(Some(self.read_comment(pos)));
        }
        if c == '}' {
            self.idx += 1;
            return Ok(Some(Token::StructClose { pos }));
        }

        let byte_order = match c {
            '<' => {
                self.idx += 1;
                Some(Endian::Little)
            }
            '>' => {
                self.idx += 1;
                Some(Endian::Big)
            }
            _ => None,
        };
        self.skip_ws();

        if self.peek() == Some('{') {
            self.idx += 1;
            return Ok(Some(Token::StructOpen(StructOpenToken {
                pos,
                name: None,
                array_size: None,
                byte_order,
            })));
        }

        let ident1 = self.read_identifier()?;
        self.skip_ws();

        match self.peek() {
            Some(':') => {
                self.idx += 1;
                self.skip_ws();
                let extra = self.read_extra_text()?;
                self.skip_ws();
                let array_size = if self.peek() == Some('[') {
                    let open_pos = self.idx;
                    self.idx += 1;
                    let size = self.read_size_text(open_pos)?;
                    self.skip_ws();
                    Some(size)
                } else {
                    None
                };
                let name = if matches!(self.peek(), Some(ch) if is_ident_start(ch)) {
                    Some(self.read_identifier()?)
                } else {
                    None
                };
                Ok(Some(Token::Atom(AtomToken {
                    pos,
                    type_name: ident1.to_lowercase(),
                    name,
                    array_size,
                    extra: Some(extra),
                    byte_order,
                })))
            }
            Some('[') => {
                let open_pos = self.idx;
                self.idx += 1;
                let size = self.read_size_text(open_pos)?;
                self.skip_ws();
                if self.peek() == Some('{') {
                    self.idx += 1;
                    Ok(Some(Token::StructOpen(StructOpenToken {
                        pos,
                        name: Some(ident1),
                        array_size: Some(size),
                        byte_order,
                    })))
                } else {
                    let name = if matches!(self.peek(), Some(ch) if is_ident_start(ch)) {
                        Some(self.read_identifier()?)
                    } else {
                        None
                    };
                    Ok(Some(Token::Atom(AtomToken {
                        pos,
                        type_name: ident1.to_lowercase(),
                        name,
                        array_size: Some(size),
                        extra: None,
                        byte_order,
                    })))
                }
            }
            Some('{') => {
                self.idx += 1;
                Ok(Some(Token::StructOpen(StructOpenToken {
                    pos,
                    name: Some(ident1),
                    array_size: None,
                    byte_order,
                })))
            }
            Some(ch) if is_ident_start(ch) => {
                let name = self.read_identifier()?;
                Ok(Some(Token::Atom(AtomToken {
                    pos,
                    type_name: ident1.to_lowercase(),
                    name: Some(name),
                    array_size: None,
                    extra: None,
                    byte_order,
                })))
            }
            _ => Ok(Some(Token::Atom(AtomToken {
                pos,
                type_name: ident1.to_lowercase(),
                name: None,
                array_size: None,
                extra: None,
                byte_order,
            }))),
        }
    }

    pub fn tokenize_all(mut self) -> Result<Vec<Token>, ParseError> {
        let mut out = Vec::new();
        while let Some(tok) = self.next_token()? {
            out.push(tok);
        }
        Ok(out)
    }
}

impl Iterator for Tokenizer {
    type Item = Result<Token, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_token().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn atoms(text: &str) -> Vec<AtomToken> {
        Tokenizer::new(text)
            .tokenize_all()
            .unwrap()
            .into_iter()
            .filter_map(|t| match t {
                Token::Atom(a) => Some(a),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn simple_fields() {
        let toks = atoms("ubyte len; byte[len] data;");
        assert_eq!(toks.len(), 2);
        assert_eq!(toks[0].type_name, "ubyte");
        assert_eq!(toks[0].name.as_deref(), Some("len"));
        assert_eq!(toks[0].array_size, None);

        assert_eq!(toks[1].type_name, "byte");
        assert_eq!(toks[1].name.as_deref(), Some("data"));
        assert_eq!(toks[1].array_size, Some(SizeSpec::Expr("len".into())));
    }

    #[test]
    fn bit_with_extra() {
        let toks = atoms("bit:4 a; bit:4 b;");
        assert_eq!(toks[0].type_name, "bit");
        assert_eq!(toks[0].extra, Some(ExtraSpec::Literal(4)));
        assert_eq!(toks[0].name.as_deref(), Some("a"));
    }

    #[test]
    fn unnamed_fields_in_nested_struct() {
        let tokens = Tokenizer::new("int;{byte;ubyte;{long;}}").tokenize_all().unwrap();
        let mut kinds = Vec::new();
        for t in &tokens {
            match t {
                Token::Atom(a) => kinds.push(format!("atom:{}", a.type_name)),
                Token::StructOpen(s) => kinds.push(format!("open:{:?}", s.name)),
                Token::StructClose { .. } => kinds.push("close".into()),
                Token::Comment { .. } => kinds.push("comment".into()),
            }
        }
        assert_eq!(
            kinds,
            vec![
                "atom:int",
                "open:None",
                "atom:byte",
                "atom:ubyte",
                "open:None",
                "atom:long",
                "close",
                "close",
            ]
        );
    }

    #[test]
    fn whole_stream_struct_array() {
        let tokens = Tokenizer::new("chunk [_]{ int length; }").tokenize_all().unwrap();
        match &tokens[0] {
            Token::StructOpen(s) => {
                assert_eq!(s.name.as_deref(), Some("chunk"));
                assert_eq!(s.array_size, Some(SizeSpec::WholeStream));
            }
            other => panic!("expected struct open, got {other:?}"),
        }
    }

    #[test]
    fn byte_order_qualifiers() {
        let toks = atoms("<int a; >int b;");
        assert_eq!(toks[0].byte_order, Some(Endian::Little));
        assert_eq!(toks[1].byte_order, Some(Endian::Big));
    }

    #[test]
    fn line_comments_are_emitted() {
        let tokens = Tokenizer::new("// a comment\nint a;").tokenize_all().unwrap();
        assert!(matches!(&tokens[0], Token::Comment { text, .. } if text == "a comment"));
    }

    #[test]
    fn reset_dollars_keyword() {
        let toks = atoms("reset$$;");
        assert_eq!(toks[0].type_name, "reset$$");
    }

    #[test]
    fn rejects_unexpected_character() {
        let err = Tokenizer::new("@bad").tokenize_all().unwrap_err();
        assert!(matches!(err, ParseError::UnexpectedChar { ch: '@', .. }));
    }

    #[test]
    fn unterminated_array_block() {
        let err = Tokenizer::new("byte[3 data;").tokenize_all().unwrap_err();
        assert!(matches!(err, ParseError::UnterminatedBlock { .. }));
    }

    #[test]
    fn oversized_array_size_literal_is_a_controlled_error() {
        let err = Tokenizer::new("byte[99999999999999999999] x;").tokenize_all().unwrap_err();
        assert!(matches!(err, ParseError::MalformedToken { .. }));
    }

    #[test]
    fn oversized_extra_literal_is_a_controlled_error() {
        let err = Tokenizer::new("align:99999999999999999999;").tokenize_all().unwrap_err();
        assert!(matches!(err, ParseError::MalformedToken { .. }));
    }
}
