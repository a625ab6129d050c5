//! Splits template source into literal text and action tokens.

use serde_json::Number;

use crate::template::parse::ParseError;

const LEFT_DELIM: &str = "{{";
const RIGHT_DELIM: &str = "}}";

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Token {
    /// `.`
    Dot,
    /// `.A.B`
    Field(Vec<String>),
    /// `$x.A`; the name includes the `$`
    Variable(String, Vec<String>),
    /// A keyword, a function name or `true`/`false`/`nil`
    Ident(String),
    Str(String),
    Number(Number),
    Pipe,
    LeftParen,
    RightParen,
    Declare,
    Assign,
    Comma,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Item {
    Text(String),
    Action { tokens: Vec<Token>, line: usize },
}

/// Lex a whole template.
pub(crate) fn lex(src: &str) -> Result<Vec<Item>, ParseError> {
    let mut items = Vec::new();
    let mut rest = src;
    let mut line = 1;
    let mut trim_next = false;

    while let Some(start) = rest.find(LEFT_DELIM) {
        let mut text = &rest[..start];
        let mut body = &rest[start + LEFT_DELIM.len()..];

        if trim_next {
            text = text.trim_start();
        }
        if let Some(after) = trim_marker(body) {
            text = text.trim_end();
            body = after;
        }
        if !text.is_empty() {
            items.push(Item::Text(text.to_string()));
        }
        line += rest[..start].matches('\n').count();

        let comment = body.trim_start().starts_with("/*");
        let end = if comment {
            find_comment_end(body)
        } else {
            find_right_delim(body)
        }
        .ok_or_else(|| ParseError::new(line, "unclosed action"))?;
        let mut action = &body[..end];
        rest = &body[end + RIGHT_DELIM.len()..];

        trim_next = false;
        if let Some(trimmed) = action.strip_suffix('-') {
            if trimmed.is_empty() || trimmed.ends_with(char::is_whitespace) {
                action = trimmed;
                trim_next = true;
            }
        }

        let action_line = line;
        line += action.matches('\n').count();

        if comment {
            if !action.trim_end().ends_with("*/") {
                return Err(ParseError::new(
                    action_line,
                    "comment ends before closing delimiter",
                ));
            }
            continue;
        }

        let tokens = tokenize(action).map_err(|msg| ParseError::new(action_line, msg))?;
        items.push(Item::Action {
            tokens,
            line: action_line,
        });
    }

    let text = if trim_next { rest.trim_start() } else { rest };
    if !text.is_empty() {
        items.push(Item::Text(text.to_string()));
    }

    Ok(items)
}

/// A left trim marker is a `-` directly after the delimiter, followed by
/// whitespace.
fn trim_marker(body: &str) -> Option<&str> {
    let after = body.strip_prefix('-')?;
    after.starts_with(char::is_whitespace).then_some(after)
}

/// Find the closing delimiter, skipping over quoted strings.
fn find_right_delim(body: &str) -> Option<usize> {
    let bytes = body.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'"' => {
                i += 1;
                while i < bytes.len() && bytes[i] != b'"' {
                    if bytes[i] == b'\\' {
                        i += 1;
                    }
                    i += 1;
                }
            }
            b'`' => {
                i += 1;
                while i < bytes.len() && bytes[i] != b'`' {
                    i += 1;
                }
            }
            b'}' if bytes.get(i + 1) == Some(&b'}') => return Some(i),
            _ => {}
        }
        i += 1;
    }

    None
}

/// Find the closing delimiter of a comment action, which may itself
/// contain `}}`.
fn find_comment_end(body: &str) -> Option<usize> {
    let close = body.find("*/")? + 2;
    Some(close + body[close..].find(RIGHT_DELIM)?)
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn tokenize(action: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = action.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    let ident = |i: &mut usize| -> String {
        let start = *i;
        while *i < chars.len() && is_ident_char(chars[*i]) {
            *i += 1;
        }
        chars[start..*i].iter().collect()
    };

    // a chain of `.Name` segments starting at a `.`
    let fields = |i: &mut usize| -> Vec<String> {
        let mut path = Vec::new();
        while *i + 1 < chars.len() && chars[*i] == '.' && is_ident_start(chars[*i + 1]) {
            *i += 1;
            path.push(ident(i));
        }
        path
    };

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '|' => {
                tokens.push(Token::Pipe);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LeftParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RightParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            ':' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Declare);
                i += 2;
            }
            '=' => {
                tokens.push(Token::Assign);
                i += 1;
            }
            '"' => {
                let mut s = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err("unterminated quoted string".to_string()),
                        Some('"') => break,
                        Some('\\') => {
                            i += 1;
                            match chars.get(i) {
                                Some('n') => s.push('\n'),
                                Some('t') => s.push('\t'),
                                Some('r') => s.push('\r'),
                                Some('\\') => s.push('\\'),
                                Some('"') => s.push('"'),
                                Some('\'') => s.push('\''),
                                Some(other) => return Err(format!("unknown escape \\{other}")),
                                None => return Err("unterminated quoted string".to_string()),
                            }
                        }
                        Some(other) => s.push(*other),
                    }
                    i += 1;
                }
                i += 1;
                tokens.push(Token::Str(s));
            }
            '`' => {
                let start = i + 1;
                let end = chars[start..]
                    .iter()
                    .position(|c| *c == '`')
                    .ok_or_else(|| "unterminated raw quoted string".to_string())?;
                tokens.push(Token::Str(chars[start..start + end].iter().collect()));
                i = start + end + 1;
            }
            '.' => {
                let path = fields(&mut i);
                if path.is_empty() {
                    tokens.push(Token::Dot);
                    i += 1;
                } else {
                    tokens.push(Token::Field(path));
                }
            }
            '$' => {
                i += 1;
                let name = format!("${}", ident(&mut i));
                tokens.push(Token::Variable(name, fields(&mut i)));
            }
            c if c.is_ascii_digit()
                || ((c == '-' || c == '+')
                    && chars.get(i + 1).map_or(false, |n| n.is_ascii_digit())) =>
            {
                let start = i;
                i += 1;
                while i < chars.len()
                    && (chars[i].is_ascii_digit()
                        || chars[i] == '.'
                        || chars[i] == 'e'
                        || chars[i] == 'E'
                        || ((chars[i] == '-' || chars[i] == '+')
                            && matches!(chars[i - 1], 'e' | 'E')))
                {
                    i += 1;
                }
                let literal: String = chars[start..i].iter().collect();
                tokens.push(Token::Number(parse_number(&literal)?));
            }
            c if is_ident_start(c) => tokens.push(Token::Ident(ident(&mut i))),
            other => return Err(format!("unexpected {other:?} in action")),
        }
    }

    Ok(tokens)
}

fn parse_number(literal: &str) -> Result<Number, String> {
    if let Ok(n) = literal.parse::<i64>() {
        return Ok(Number::from(n));
    }

    literal
        .parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .ok_or_else(|| format!("bad number syntax: {literal:?}"))
}
