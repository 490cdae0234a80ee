//! Lexer for preprocessed HLSL

use super::token::{FloatSuffix, PUNCTUATORS, Token, TokenKind};
use crate::diag::{Diagnostics, ErrorKind, SourceLocation};
use crate::ir::MatrixLayout;
use std::sync::Arc;

/// Splits preprocessed text into tokens, honouring `#line` markers.
pub fn tokenize(text: &str, file: Arc<str>) -> Result<Vec<Token>, Diagnostics> {
    let mut lexer = Lexer {
        chars: text.chars().collect(),
        pos: 0,
        file,
        line: 1,
        column: 1,
        at_line_start: true,
        pending_pragma: None,
        diags: Diagnostics::new(),
    };
    let mut tokens = Vec::new();
    while let Some(token) = lexer.next_token() {
        tokens.push(token);
    }
    tokens.push(Token {
        kind: TokenKind::Eof,
        location: lexer.location(),
    });
    if lexer.diags.has_errors() {
        Err(lexer.diags)
    } else {
        Ok(tokens)
    }
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    file: Arc<str>,
    line: u32,
    column: u32,
    at_line_start: bool,
    pending_pragma: Option<(MatrixLayout, SourceLocation)>,
    diags: Diagnostics,
}

impl Lexer {
    fn location(&self) -> SourceLocation {
        SourceLocation::new(self.file.clone(), self.line, self.column)
    }

    fn peek(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.get(self.pos).copied()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
            self.at_line_start = true;
        } else {
            self.column += 1;
            if !c.is_whitespace() {
                self.at_line_start = false;
            }
        }
        Some(c)
    }

    fn rest_of_line(&mut self) -> String {
        let mut text = String::new();
        while let Some(c) = self.peek(0) {
            if c == '\n' {
                break;
            }
            text.push(c);
            self.bump();
        }
        text
    }

    fn skip_trivia(&mut self) {
        loop {
            match (self.peek(0), self.peek(1)) {
                (Some(c), _) if c.is_whitespace() => {
                    self.bump();
                }
                (Some('/'), Some('/')) => {
                    self.rest_of_line();
                }
                (Some('/'), Some('*')) => {
                    self.bump();
                    self.bump();
                    while let Some(c) = self.bump() {
                        if c == '*' && self.peek(0) == Some('/') {
                            self.bump();
                            break;
                        }
                    }
                }
                (Some('#'), _) if self.at_line_start => self.line_directive(),
                _ => return,
            }
        }
    }

    fn line_directive(&mut self) {
        let location = self.location();
        self.bump();
        let text = self.rest_of_line();
        let text = text.trim();
        if let Some(rest) = text.strip_prefix("line") {
            let mut parts = rest.split_whitespace();
            if let Some(line) = parts.next().and_then(|n| n.parse::<u32>().ok()) {
                if let Some(file) = parts.next() {
                    self.file = Arc::from(file.trim_matches('"'));
                }
                // the newline ending the directive bumps the counter once more
                self.line = line.saturating_sub(1);
            }
        } else if let Some(rest) = text.strip_prefix("pragma") {
            let rest = rest.trim();
            if let Some(arg) = rest.strip_prefix("pack_matrix") {
                let arg = arg.trim().trim_start_matches('(').trim_end_matches(')').trim();
                let layout = match arg {
                    "row_major" => Some(MatrixLayout::RowMajor),
                    "column_major" => Some(MatrixLayout::ColumnMajor),
                    _ => None,
                };
                match layout {
                    Some(layout) => self.pending_pragma = Some((layout, location)),
                    None => self.diags.warning(
                        Some(location),
                        format!("unknown pack_matrix argument '{}'", arg),
                    ),
                }
            }
        }
    }

    fn next_token(&mut self) -> Option<Token> {
        self.skip_trivia();
        if let Some((layout, location)) = self.pending_pragma.take() {
            return Some(Token {
                kind: TokenKind::PackMatrix(layout),
                location,
            });
        }
        let location = self.location();
        let c = self.peek(0)?;

        let kind = if c.is_ascii_alphabetic() || c == '_' {
            let mut ident = String::new();
            while let Some(c) = self.peek(0).filter(|c| c.is_ascii_alphanumeric() || *c == '_') {
                ident.push(c);
                self.bump();
            }
            TokenKind::Ident(ident)
        } else if c.is_ascii_digit() || (c == '.' && self.peek(1).is_some_and(|d| d.is_ascii_digit())) {
            self.number(&location)
        } else if c == '"' {
            self.bump();
            let mut text = String::new();
            while let Some(c) = self.bump() {
                match c {
                    '"' => break,
                    '\\' => {
                        if let Some(escaped) = self.bump() {
                            text.push(escaped);
                        }
                    }
                    _ => text.push(c),
                }
            }
            TokenKind::Str(text)
        } else {
            let matched = PUNCTUATORS.iter().find(|p| {
                p.chars()
                    .enumerate()
                    .all(|(i, pc)| self.peek(i) == Some(pc))
            });
            match matched {
                Some(&p) => {
                    for _ in 0..p.len() {
                        self.bump();
                    }
                    TokenKind::Punct(p)
                }
                None => {
                    self.bump();
                    self.diags.error(
                        ErrorKind::Syntax,
                        Some(location.clone()),
                        format!("invalid character '{}'", c),
                    );
                    return self.next_token();
                }
            }
        };
        Some(Token { kind, location })
    }

    fn number(&mut self, location: &SourceLocation) -> TokenKind {
        let mut text = String::new();
        let hex = self.peek(0) == Some('0') && matches!(self.peek(1), Some('x' | 'X'));
        if hex {
            self.bump();
            self.bump();
            while let Some(c) = self.peek(0).filter(char::is_ascii_hexdigit) {
                text.push(c);
                self.bump();
            }
            let unsigned = self.int_suffix();
            return match u64::from_str_radix(&text, 16) {
                Ok(value) => TokenKind::Int { value, unsigned },
                Err(_) => self.bad_number(location, &text),
            };
        }

        let mut is_float = false;
        while let Some(c) = self.peek(0) {
            if c.is_ascii_digit() {
                text.push(c);
            } else if c == '.' && !is_float {
                is_float = true;
                text.push(c);
            } else if matches!(c, 'e' | 'E')
                && (self.peek(1).is_some_and(|d| d.is_ascii_digit())
                    || (matches!(self.peek(1), Some('+' | '-'))
                        && self.peek(2).is_some_and(|d| d.is_ascii_digit())))
            {
                is_float = true;
                text.push(c);
                self.bump();
                if let Some(sign) = self.peek(0).filter(|s| *s == '+' || *s == '-') {
                    text.push(sign);
                    self.bump();
                }
                continue;
            } else {
                break;
            }
            self.bump();
        }

        let suffix = match self.peek(0) {
            Some('f' | 'F') => Some(FloatSuffix::Float),
            Some('h' | 'H') => Some(FloatSuffix::Half),
            Some('l' | 'L') if is_float => Some(FloatSuffix::Double),
            _ => None,
        };
        if is_float || suffix.is_some() {
            if suffix.is_some() {
                self.bump();
            }
            return match text.parse::<f64>() {
                Ok(value) => TokenKind::Float {
                    value,
                    suffix: suffix.unwrap_or(FloatSuffix::None),
                },
                Err(_) => self.bad_number(location, &text),
            };
        }

        let unsigned = self.int_suffix();
        let parsed = if text.len() > 1 && text.starts_with('0') {
            u64::from_str_radix(&text[1..], 8)
        } else {
            text.parse::<u64>()
        };
        match parsed {
            Ok(value) => TokenKind::Int { value, unsigned },
            Err(_) => self.bad_number(location, &text),
        }
    }

    fn int_suffix(&mut self) -> bool {
        let mut unsigned = false;
        while let Some(c) = self.peek(0).filter(|c| matches!(c, 'u' | 'U' | 'l' | 'L')) {
            unsigned |= matches!(c, 'u' | 'U');
            self.bump();
        }
        unsigned
    }

    fn bad_number(&mut self, location: &SourceLocation, text: &str) -> TokenKind {
        self.diags.error(
            ErrorKind::Syntax,
            Some(location.clone()),
            format!("invalid numeric literal '{}'", text),
        );
        TokenKind::Int {
            value: 0,
            unsigned: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn kinds(text: &str) -> Vec<TokenKind> {
        tokenize(text, Arc::from("t.hlsl"))
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_numbers_and_suffixes() {
        assert_eq!(
            kinds("1 2u 0x1F 010 1.5f .5 2e3 1.0h"),
            vec![
                TokenKind::Int { value: 1, unsigned: false },
                TokenKind::Int { value: 2, unsigned: true },
                TokenKind::Int { value: 31, unsigned: false },
                TokenKind::Int { value: 8, unsigned: false },
                TokenKind::Float { value: 1.5, suffix: FloatSuffix::Float },
                TokenKind::Float { value: 0.5, suffix: FloatSuffix::None },
                TokenKind::Float { value: 2000.0, suffix: FloatSuffix::None },
                TokenKind::Float { value: 1.0, suffix: FloatSuffix::Half },
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_greedy_punctuators() {
        assert_eq!(
            kinds("a<<=b>>c"),
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::Punct("<<="),
                TokenKind::Ident("b".into()),
                TokenKind::Punct(">>"),
                TokenKind::Ident("c".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_line_markers_set_location() {
        let tokens = tokenize("#line 10 \"inc.hlsli\"\nfoo\n  bar", Arc::from("main.hlsl")).unwrap();
        assert_eq!(&*tokens[0].location.file, "inc.hlsli");
        assert_eq!(tokens[0].location.line, 10);
        assert_eq!(tokens[1].location.line, 11);
        assert_eq!(tokens[1].location.column, 3);
    }

    #[test]
    fn test_pack_matrix_pragma() {
        assert_eq!(
            kinds("#pragma pack_matrix(column_major)\nx"),
            vec![
                TokenKind::PackMatrix(MatrixLayout::ColumnMajor),
                TokenKind::Ident("x".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_invalid_character_is_reported() {
        let err = tokenize("a @ b", Arc::from("t.hlsl")).unwrap_err();
        assert!(err.render().contains("invalid character '@'"));
    }
}
