use lazy_static::lazy_static;
use regex::Regex;

use crate::ast::SrcLocation;
use crate::errors::CbufError;

lazy_static! {
    static ref TOKEN_REGEXP: Regex = Regex::new(concat!(
        r"(?P<comment>//[^\n]*)",
        r"|(?P<float>[0-9]+\.[0-9]+)",
        r"|(?P<hex>0[xX][0-9a-fA-F]+)",
        r"|(?P<octal>0[0-7]+)",
        r"|(?P<number>[0-9]+)",
        r#"|(?P<string>"(?:[^"\\]|\\.)*")"#,
        r"|(?P<identifier>[a-zA-Z_][a-zA-Z0-9_]*)",
        r"|(?P<coloncolon>::)",
        r"|(?P<colon>:)",
        r"|(?P<semicolon>;)",
        r"|(?P<comma>,)",
        r"|(?P<lbrace>\{)",
        r"|(?P<rbrace>\})",
        r"|(?P<lbracket>\[)",
        r"|(?P<rbracket>\])",
        r"|(?P<equals>=)",
        r"|(?P<star>\*)",
        r"|(?P<at>@)",
        r"|(?P<hash>\#)",
        r"|(?P<newline>\n)",
        r"|(?P<whitespace>[ \t\r]+)",
        r"|(?P<unknown>.)",
    ))
    .unwrap();
}

const KEYWORDS: &[&str] = &["namespace", "struct", "enum", "import"];

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Identifier(String),
    Keyword(String),
    Number(i64),
    Float(f64),
    Str(String),
    ColonColon,
    Colon,
    Semicolon,
    Comma,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Equals,
    Star,
    At,
    Hash,
    Unknown(char),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub loc: SrcLocation,
}

/// Tokenizes `input`, attributing every token a `SrcLocation` relative to
/// `file` (used only for diagnostics, not identity).
pub fn tokenize(file: &str, input: &str) -> Result<Vec<Spanned>, CbufError> {
    let mut tokens = Vec::new();
    let mut line: u32 = 1;
    let mut line_start: usize = 0;

    for caps in TOKEN_REGEXP.captures_iter(input) {
        let m = caps.get(0).unwrap();
        let column = (m.start() - line_start + 1) as u32;
        let loc = SrcLocation {
            file: file.to_string(),
            line,
            column,
        };

        if caps.name("newline").is_some() {
            line += 1;
            line_start = m.end();
            continue;
        }
        if caps.name("whitespace").is_some() || caps.name("comment").is_some() {
            continue;
        }

        let token = if let Some(id) = caps.name("identifier") {
            let text = id.as_str();
            if KEYWORDS.contains(&text) {
                Token::Keyword(text.to_string())
            } else {
                Token::Identifier(text.to_string())
            }
        } else if let Some(hex) = caps.name("hex") {
            let v = i64::from_str_radix(&hex.as_str()[2..], 16).unwrap_or(0);
            Token::Number(v)
        } else if let Some(oct) = caps.name("octal") {
            let v = i64::from_str_radix(&oct.as_str()[1..], 8).unwrap_or(0);
            Token::Number(v)
        } else if let Some(f) = caps.name("float") {
            Token::Float(f.as_str().parse().unwrap_or(0.0))
        } else if let Some(n) = caps.name("number") {
            Token::Number(n.as_str().parse().unwrap_or(0))
        } else if let Some(s) = caps.name("string") {
            let raw = s.as_str();
            Token::Str(unescape(&raw[1..raw.len() - 1]))
        } else if caps.name("coloncolon").is_some() {
            Token::ColonColon
        } else if caps.name("colon").is_some() {
            Token::Colon
        } else if caps.name("semicolon").is_some() {
            Token::Semicolon
        } else if caps.name("comma").is_some() {
            Token::Comma
        } else if caps.name("lbrace").is_some() {
            Token::LBrace
        } else if caps.name("rbrace").is_some() {
            Token::RBrace
        } else if caps.name("lbracket").is_some() {
            Token::LBracket
        } else if caps.name("rbracket").is_some() {
            Token::RBracket
        } else if caps.name("equals").is_some() {
            Token::Equals
        } else if caps.name("star").is_some() {
            Token::Star
        } else if caps.name("at").is_some() {
            Token::At
        } else if caps.name("hash").is_some() {
            Token::Hash
        } else if let Some(u) = caps.name("unknown") {
            let c = u.as_str().chars().next().unwrap();
            return Err(CbufError::lex(loc, c));
        } else {
            unreachable!("token regex matched with no named group")
        };

        tokens.push(Spanned { token, loc });
    }

    Ok(tokens)
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('"') => out.push('"'),
                Some('\\') => out.push('\\'),
                Some(other) => out.push(other),
                None => {}
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// A queue of tokens with 1-token lookahead, the shape the parser consumes.
#[derive(Debug)]
pub struct TokenStream {
    tokens: Vec<Spanned>,
    pos: usize,
    eof_loc: SrcLocation,
}

impl TokenStream {
    pub fn new(tokens: Vec<Spanned>, eof_loc: SrcLocation) -> Self {
        TokenStream {
            tokens,
            pos: 0,
            eof_loc,
        }
    }

    pub fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    pub fn peek_loc(&self) -> SrcLocation {
        self.tokens
            .get(self.pos)
            .map(|s| s.loc.clone())
            .unwrap_or_else(|| self.eof_loc.clone())
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    pub fn advance(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).map(|s| s.token.clone());
        if t.is_some() {
            self.pos += 1;
        }
        t
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(input: &str) -> Vec<Token> {
        tokenize("test.cbuf", input)
            .unwrap()
            .into_iter()
            .map(|s| s.token)
            .collect()
    }

    #[test]
    fn tokenizes_struct_decl() {
        let tokens = toks("struct p { u32 a; u32 b; }");
        assert_eq!(
            tokens,
            vec![
                Token::Keyword("struct".to_string()),
                Token::Identifier("p".to_string()),
                Token::LBrace,
                Token::Identifier("u32".to_string()),
                Token::Identifier("a".to_string()),
                Token::Semicolon,
                Token::Identifier("u32".to_string()),
                Token::Identifier("b".to_string()),
                Token::Semicolon,
                Token::RBrace,
            ]
        );
    }

    #[test]
    fn tokenizes_attributes_and_array() {
        let tokens = toks("i32 xs[4] @compact;");
        assert_eq!(
            tokens,
            vec![
                Token::Identifier("i32".to_string()),
                Token::Identifier("xs".to_string()),
                Token::LBracket,
                Token::Number(4),
                Token::RBracket,
                Token::At,
                Token::Identifier("compact".to_string()),
                Token::Semicolon,
            ]
        );
    }

    #[test]
    fn tokenizes_qualified_typeref() {
        let tokens = toks("motors::command cmd;");
        assert_eq!(
            tokens,
            vec![
                Token::Identifier("motors".to_string()),
                Token::ColonColon,
                Token::Identifier("command".to_string()),
                Token::Identifier("cmd".to_string()),
                Token::Semicolon,
            ]
        );
    }

    #[test]
    fn tracks_line_numbers() {
        let spanned = tokenize("test.cbuf", "struct a {\n  u8 x;\n}").unwrap();
        let x_tok = spanned
            .iter()
            .find(|s| s.token == Token::Identifier("x".to_string()))
            .unwrap();
        assert_eq!(x_tok.loc.line, 2);
    }

    #[test]
    fn string_literal_unescapes() {
        let tokens = toks(r#""hello\nworld""#);
        assert_eq!(tokens, vec![Token::Str("hello\nworld".to_string())]);
    }

    #[test]
    fn rejects_unknown_character() {
        let err = tokenize("test.cbuf", "struct a { u8 x $; }");
        assert!(err.is_err());
    }
}
