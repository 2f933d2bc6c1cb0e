//! Tokenising Glint source text.

use crate::context::Context;
use crate::index_vec::Name;
use crate::source::{FileId, Location};

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Eof,
    Ident(Name),
    Int(u64),
    Str(String),

    Colon,
    ColonColon,
    ColonEq,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Shl,
    Shr,
    Amp,
    Pipe,
    Caret,
    Tilde,
    Bang,
    At,
    Dot,
    Comma,
    Semicolon,
    LParen,
    RParen,
    LBrack,
    RBrack,
    LBrace,
    RBrace,

    KwIf,
    KwElse,
    KwWhile,
    KwFor,
    KwReturn,
    KwSizeof,
    KwAlignof,
    KwHas,
    KwAs,
    KwAsBang,
    KwImport,
    KwStruct,
    KwUnion,
    KwSum,
    KwEnum,
    KwAlias,
    KwDynamic,
    KwAnd,
    KwOr,
    KwStatic,
    KwExport,
    KwTrue,
    KwFalse,
    KwVoid,
    KwInt,
    KwBool,
    KwByte,
    KwCInt,
    KwUInt,
    KwPure,
    KwConst,
    KwNoReturn,
    KwNoInline,
    KwInline,
    KwDiscardable,
    KwUsed,
}

impl TokenKind {
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Eof => "end of file".to_string(),
            TokenKind::Ident(_) => "identifier".to_string(),
            TokenKind::Int(_) => "integer literal".to_string(),
            TokenKind::Str(_) => "string literal".to_string(),
            other => format!("'{}'", other.text()),
        }
    }

    fn text(&self) -> &'static str {
        match self {
            TokenKind::Colon => ":",
            TokenKind::ColonColon => "::",
            TokenKind::ColonEq => ":=",
            TokenKind::Eq => "=",
            TokenKind::Ne => "!=",
            TokenKind::Lt => "<",
            TokenKind::Gt => ">",
            TokenKind::Le => "<=",
            TokenKind::Ge => ">=",
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Star => "*",
            TokenKind::Slash => "/",
            TokenKind::Percent => "%",
            TokenKind::Shl => "<<",
            TokenKind::Shr => ">>",
            TokenKind::Amp => "&",
            TokenKind::Pipe => "|",
            TokenKind::Caret => "^",
            TokenKind::Tilde => "~",
            TokenKind::Bang => "!",
            TokenKind::At => "@",
            TokenKind::Dot => ".",
            TokenKind::Comma => ",",
            TokenKind::Semicolon => ";",
            TokenKind::LParen => "(",
            TokenKind::RParen => ")",
            TokenKind::LBrack => "[",
            TokenKind::RBrack => "]",
            TokenKind::LBrace => "{",
            TokenKind::RBrace => "}",
            TokenKind::KwIf => "if",
            TokenKind::KwElse => "else",
            TokenKind::KwWhile => "while",
            TokenKind::KwFor => "for",
            TokenKind::KwReturn => "return",
            TokenKind::KwSizeof => "sizeof",
            TokenKind::KwAlignof => "alignof",
            TokenKind::KwHas => "has",
            TokenKind::KwAs => "as",
            TokenKind::KwAsBang => "as!",
            TokenKind::KwImport => "import",
            TokenKind::KwStruct => "struct",
            TokenKind::KwUnion => "union",
            TokenKind::KwSum => "sum",
            TokenKind::KwEnum => "enum",
            TokenKind::KwAlias => "alias",
            TokenKind::KwDynamic => "dynamic",
            TokenKind::KwAnd => "and",
            TokenKind::KwOr => "or",
            TokenKind::KwStatic => "static",
            TokenKind::KwExport => "export",
            TokenKind::KwTrue => "true",
            TokenKind::KwFalse => "false",
            TokenKind::KwVoid => "void",
            TokenKind::KwInt => "int",
            TokenKind::KwBool => "bool",
            TokenKind::KwByte => "byte",
            TokenKind::KwCInt => "cint",
            TokenKind::KwUInt => "uint",
            TokenKind::KwPure => "pure",
            TokenKind::KwConst => "const",
            TokenKind::KwNoReturn => "noreturn",
            TokenKind::KwNoInline => "noinline",
            TokenKind::KwInline => "inline",
            TokenKind::KwDiscardable => "discardable",
            TokenKind::KwUsed => "used",
            _ => "",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub loc: Location,
}

fn keyword(text: &str) -> Option<TokenKind> {
    Some(match text {
        "if" => TokenKind::KwIf,
        "else" => TokenKind::KwElse,
        "while" => TokenKind::KwWhile,
        "for" => TokenKind::KwFor,
        "return" => TokenKind::KwReturn,
        "sizeof" => TokenKind::KwSizeof,
        "alignof" => TokenKind::KwAlignof,
        "has" => TokenKind::KwHas,
        "as" => TokenKind::KwAs,
        "import" => TokenKind::KwImport,
        "struct" => TokenKind::KwStruct,
        "union" => TokenKind::KwUnion,
        "sum" => TokenKind::KwSum,
        "enum" => TokenKind::KwEnum,
        "alias" => TokenKind::KwAlias,
        "dynamic" => TokenKind::KwDynamic,
        "and" => TokenKind::KwAnd,
        "or" => TokenKind::KwOr,
        "static" => TokenKind::KwStatic,
        "export" => TokenKind::KwExport,
        "true" => TokenKind::KwTrue,
        "false" => TokenKind::KwFalse,
        "void" => TokenKind::KwVoid,
        "int" => TokenKind::KwInt,
        "bool" => TokenKind::KwBool,
        "byte" => TokenKind::KwByte,
        "cint" => TokenKind::KwCInt,
        "uint" => TokenKind::KwUInt,
        "pure" => TokenKind::KwPure,
        "const" => TokenKind::KwConst,
        "noreturn" => TokenKind::KwNoReturn,
        "noinline" => TokenKind::KwNoInline,
        "inline" => TokenKind::KwInline,
        "discardable" => TokenKind::KwDiscardable,
        "used" => TokenKind::KwUsed,
        _ => return None,
    })
}

struct Lexer<'a> {
    ctx: &'a Context,
    bytes: &'a [u8],
    pos: usize,
    file_id: u16,
}

/// Tokenise `source`, always ending with an `Eof` token. Lexical errors
/// become diagnostics and the offending bytes are skipped.
pub fn lex(ctx: &Context, file_id: FileId, source: &str) -> Vec<Token> {
    let mut lexer = Lexer {
        ctx,
        bytes: source.as_bytes(),
        pos: 0,
        file_id: file_id.0,
    };
    let mut tokens = Vec::new();
    loop {
        let token = lexer.next_token();
        let done = token.kind == TokenKind::Eof;
        tokens.push(token);
        if done {
            return tokens;
        }
    }
}

impl Lexer<'_> {
    fn peek(&self) -> u8 {
        self.bytes.get(self.pos).copied().unwrap_or(0)
    }

    fn peek_at(&self, offset: usize) -> u8 {
        self.bytes.get(self.pos + offset).copied().unwrap_or(0)
    }

    fn loc_from(&self, start: usize) -> Location {
        Location::new(start as u32, (self.pos - start).min(u16::MAX as usize) as u16, self.file_id)
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                b' ' | b'\t' | b'\r' | b'\n' => self.pos += 1,
                b'/' if self.peek_at(1) == b'/' => {
                    while self.pos < self.bytes.len() && self.peek() != b'\n' {
                        self.pos += 1;
                    }
                }
                b'/' if self.peek_at(1) == b'*' => {
                    self.pos += 2;
                    while self.pos < self.bytes.len()
                        && !(self.peek() == b'*' && self.peek_at(1) == b'/')
                    {
                        self.pos += 1;
                    }
                    self.pos = (self.pos + 2).min(self.bytes.len());
                }
                _ => return,
            }
        }
    }

    fn next_token(&mut self) -> Token {
        self.skip_trivia();
        let start = self.pos;
        if self.pos >= self.bytes.len() {
            return Token {
                kind: TokenKind::Eof,
                loc: Location::new(start as u32, 0, self.file_id),
            };
        }

        let b = self.peek();

        if b.is_ascii_alphabetic() || b == b'_' {
            while self.peek().is_ascii_alphanumeric() || self.peek() == b'_' {
                self.pos += 1;
            }
            let text = std::str::from_utf8(&self.bytes[start..self.pos]).unwrap();
            let kind = match keyword(text) {
                Some(TokenKind::KwAs) if self.peek() == b'!' => {
                    self.pos += 1;
                    TokenKind::KwAsBang
                }
                Some(kw) => kw,
                None => TokenKind::Ident(self.ctx.intern(text)),
            };
            return Token {
                kind,
                loc: self.loc_from(start),
            };
        }

        if b.is_ascii_digit() {
            return self.number(start);
        }

        if b == b'"' {
            return self.string(start);
        }

        self.pos += 1;
        let kind = match b {
            b':' => match self.peek() {
                b':' => {
                    self.pos += 1;
                    TokenKind::ColonColon
                }
                b'=' => {
                    self.pos += 1;
                    TokenKind::ColonEq
                }
                _ => TokenKind::Colon,
            },
            b'=' => TokenKind::Eq,
            b'!' => {
                if self.peek() == b'=' {
                    self.pos += 1;
                    TokenKind::Ne
                } else {
                    TokenKind::Bang
                }
            }
            b'<' => match self.peek() {
                b'=' => {
                    self.pos += 1;
                    TokenKind::Le
                }
                b'<' => {
                    self.pos += 1;
                    TokenKind::Shl
                }
                _ => TokenKind::Lt,
            },
            b'>' => match self.peek() {
                b'=' => {
                    self.pos += 1;
                    TokenKind::Ge
                }
                b'>' => {
                    self.pos += 1;
                    TokenKind::Shr
                }
                _ => TokenKind::Gt,
            },
            b'+' => TokenKind::Plus,
            b'-' => TokenKind::Minus,
            b'*' => TokenKind::Star,
            b'/' => TokenKind::Slash,
            b'%' => TokenKind::Percent,
            b'&' => TokenKind::Amp,
            b'|' => TokenKind::Pipe,
            b'^' => TokenKind::Caret,
            b'~' => TokenKind::Tilde,
            b'@' => TokenKind::At,
            b'.' => TokenKind::Dot,
            b',' => TokenKind::Comma,
            b';' => TokenKind::Semicolon,
            b'(' => TokenKind::LParen,
            b')' => TokenKind::RParen,
            b'[' => TokenKind::LBrack,
            b']' => TokenKind::RBrack,
            b'{' => TokenKind::LBrace,
            b'}' => TokenKind::RBrace,
            other => {
                let loc = self.loc_from(start);
                self.ctx
                    .error(loc, format!("Unexpected character '{}'", other as char));
                return self.next_token();
            }
        };
        Token {
            kind,
            loc: self.loc_from(start),
        }
    }

    fn number(&mut self, start: usize) -> Token {
        let mut value: u64 = 0;
        let mut overflow = false;
        if self.peek() == b'0' && (self.peek_at(1) == b'x' || self.peek_at(1) == b'X') {
            self.pos += 2;
            while self.peek().is_ascii_hexdigit() {
                let digit = (self.peek() as char).to_digit(16).unwrap() as u64;
                let (v, o) = value.overflowing_mul(16);
                let (v, o2) = v.overflowing_add(digit);
                value = v;
                overflow |= o | o2;
                self.pos += 1;
            }
        } else {
            while self.peek().is_ascii_digit() {
                let digit = u64::from(self.peek() - b'0');
                let (v, o) = value.overflowing_mul(10);
                let (v, o2) = v.overflowing_add(digit);
                value = v;
                overflow |= o | o2;
                self.pos += 1;
            }
        }
        let loc = self.loc_from(start);
        if overflow {
            self.ctx
                .error(loc, "Integer literal does not fit in 64 bits");
        }
        Token {
            kind: TokenKind::Int(value),
            loc,
        }
    }

    fn string(&mut self, start: usize) -> Token {
        self.pos += 1;
        let mut value = String::new();
        loop {
            match self.peek() {
                0 if self.pos >= self.bytes.len() => {
                    let loc = self.loc_from(start);
                    self.ctx.error(loc, "Unterminated string literal");
                    break;
                }
                b'"' => {
                    self.pos += 1;
                    break;
                }
                b'\\' => {
                    self.pos += 1;
                    let escaped = match self.peek() {
                        b'n' => '\n',
                        b't' => '\t',
                        b'r' => '\r',
                        b'0' => '\0',
                        b'\\' => '\\',
                        b'"' => '"',
                        other => {
                            let loc = self.loc_from(start);
                            self.ctx.error(
                                loc,
                                format!("Invalid escape sequence '\\{}'", other as char),
                            );
                            other as char
                        }
                    };
                    value.push(escaped);
                    self.pos += 1;
                }
                byte => {
                    value.push(byte as char);
                    self.pos += 1;
                }
            }
        }
        Token {
            kind: TokenKind::Str(value),
            loc: self.loc_from(start),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex_kinds(source: &str) -> Vec<TokenKind> {
        let mut ctx = Context::default();
        let id = ctx.add_file("/nonexistent/test.g", source);
        lex(&ctx, id, source).into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_declaration_tokens() {
        let kinds = lex_kinds("foo : int 3;");
        assert!(matches!(kinds[0], TokenKind::Ident(_)));
        assert_eq!(kinds[1], TokenKind::Colon);
        assert_eq!(kinds[2], TokenKind::KwInt);
        assert_eq!(kinds[3], TokenKind::Int(3));
        assert_eq!(kinds[4], TokenKind::Semicolon);
        assert_eq!(kinds[5], TokenKind::Eof);
    }

    #[test]
    fn test_compound_punctuation() {
        let kinds = lex_kinds(":: := = != <= >= << >>");
        assert_eq!(
            kinds[..8],
            [
                TokenKind::ColonColon,
                TokenKind::ColonEq,
                TokenKind::Eq,
                TokenKind::Ne,
                TokenKind::Le,
                TokenKind::Ge,
                TokenKind::Shl,
                TokenKind::Shr,
            ]
        );
    }

    #[test]
    fn test_as_bang() {
        let kinds = lex_kinds("x as! int");
        assert_eq!(kinds[1], TokenKind::KwAsBang);
        let kinds = lex_kinds("x as int");
        assert_eq!(kinds[1], TokenKind::KwAs);
    }

    #[test]
    fn test_comments_skipped() {
        let kinds = lex_kinds("a // comment\n/* block */ b");
        assert!(matches!(kinds[0], TokenKind::Ident(_)));
        assert!(matches!(kinds[1], TokenKind::Ident(_)));
        assert_eq!(kinds[2], TokenKind::Eof);
    }

    #[test]
    fn test_string_escapes() {
        let kinds = lex_kinds(r#""a\nb""#);
        assert_eq!(kinds[0], TokenKind::Str("a\nb".to_string()));
    }

    #[test]
    fn test_hex_literal() {
        let kinds = lex_kinds("0xFF");
        assert_eq!(kinds[0], TokenKind::Int(255));
    }

    #[test]
    fn test_locations() {
        let mut ctx = Context::default();
        let id = ctx.add_file("/nonexistent/loc.g", "ab cd");
        let tokens = lex(&ctx, id, "ab cd");
        assert_eq!(tokens[0].loc.pos, 0);
        assert_eq!(tokens[0].loc.len, 2);
        assert_eq!(tokens[1].loc.pos, 3);
    }
}
