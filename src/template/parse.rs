//! Template syntax trees.

use std::fmt;

use serde_json::Number;

use crate::template::lex::{lex, Item, Token};

/// A node of a parsed template.
#[derive(Clone, Debug, PartialEq)]
pub enum Node {
    /// Literal text, emitted verbatim.
    Text(String),
    /// `{{ pipeline }}`
    Action(Pipeline),
    /// `{{ if pipeline }} list {{ else }} list {{ end }}`
    If(Branch),
    /// `{{ range pipeline }} list {{ else }} list {{ end }}`
    Range(Branch),
    /// `{{ with pipeline }} list {{ else }} list {{ end }}`
    With(Branch),
    /// `{{ template "name" pipeline }}`
    Template {
        name: String,
        pipe: Option<Pipeline>,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Branch {
    pub pipe: Pipeline,
    pub list: Vec<Node>,
    pub else_list: Option<Vec<Node>>,
}

/// Commands joined by `|`, optionally declaring variables.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Pipeline {
    pub decl: Vec<String>,
    pub cmds: Vec<Command>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Command {
    pub args: Vec<Arg>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Arg {
    Dot,
    Field(Vec<String>),
    Variable { name: String, fields: Vec<String> },
    Function(String),
    Bool(bool),
    Nil,
    Number(Number),
    Str(String),
    Pipeline(Pipeline),
}

impl Pipeline {
    /// The single argument of a pipeline made of exactly one plain value.
    pub fn single_arg(&self) -> Option<&Arg> {
        match self.cmds.as_slice() {
            [cmd] if cmd.args.len() == 1 => cmd.args.first(),
            _ => None,
        }
    }
}

/// A syntax error, with the line it was found on.
#[derive(Clone, Debug, PartialEq)]
pub struct ParseError {
    pub line: usize,
    pub message: String,
}

impl ParseError {
    pub(crate) fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for ParseError {}

/// The templates found in one source file: the file's own top-level tree
/// first, followed by every `define` and `block` in source order.
pub type Definitions = Vec<(String, Vec<Node>)>;

/// Parse `src` as the template `name`. `is_func` decides which identifiers
/// are callable.
pub fn parse(
    name: &str,
    src: &str,
    is_func: &dyn Fn(&str) -> bool,
) -> Result<Definitions, ParseError> {
    let mut parser = Parser {
        items: lex(src)?.into_iter(),
        line: 1,
        is_func,
        vars: vec!["$".to_string()],
        defined: Vec::new(),
    };

    let (root, stop) = parser.parse_list(true)?;
    match stop {
        Stop::Eof => {}
        Stop::End => return Err(parser.error("unexpected {{end}}")),
        Stop::Else(_) => return Err(parser.error("unexpected {{else}}")),
    }

    let mut defs = vec![(name.to_string(), root)];
    defs.append(&mut parser.defined);

    Ok(defs)
}

enum Stop {
    Eof,
    End,
    Else(Vec<Token>),
}

#[derive(Clone, Copy, PartialEq)]
enum BranchKind {
    If,
    Range,
    With,
}

impl BranchKind {
    fn keyword(self) -> &'static str {
        match self {
            BranchKind::If => "if",
            BranchKind::Range => "range",
            BranchKind::With => "with",
        }
    }
}

struct Parser<'a> {
    items: std::vec::IntoIter<Item>,
    line: usize,
    is_func: &'a dyn Fn(&str) -> bool,
    vars: Vec<String>,
    defined: Definitions,
}

impl Parser<'_> {
    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError::new(self.line, message)
    }

    fn parse_list(&mut self, top: bool) -> Result<(Vec<Node>, Stop), ParseError> {
        let mut nodes = Vec::new();

        while let Some(item) = self.items.next() {
            let tokens = match item {
                Item::Text(text) => {
                    nodes.push(Node::Text(text));
                    continue;
                }
                Item::Action { tokens, line } => {
                    self.line = line;
                    tokens
                }
            };

            let keyword = match tokens.first() {
                Some(Token::Ident(word)) => word.as_str(),
                _ => "",
            };

            match keyword {
                "end" => {
                    if tokens.len() != 1 {
                        return Err(self.error("unexpected tokens after end"));
                    }
                    return Ok((nodes, Stop::End));
                }
                "else" => return Ok((nodes, Stop::Else(tokens[1..].to_vec()))),
                "if" => nodes.push(self.parse_branch(BranchKind::If, &tokens[1..])?),
                "range" => nodes.push(self.parse_branch(BranchKind::Range, &tokens[1..])?),
                "with" => nodes.push(self.parse_branch(BranchKind::With, &tokens[1..])?),
                "define" => {
                    if !top {
                        return Err(self.error("define must be at the top level"));
                    }
                    let name = match &tokens[1..] {
                        [Token::Str(name)] => name.clone(),
                        _ => return Err(self.error("define expects a single quoted name")),
                    };
                    let body = self.parse_definition_body(&name)?;
                    self.defined.push((name, body));
                }
                "block" => {
                    let (name, pipe) = self.parse_template_call(&tokens[1..], "block")?;
                    let body = self.parse_definition_body(&name)?;
                    self.defined.push((name.clone(), body));
                    nodes.push(Node::Template { name, pipe });
                }
                "template" => {
                    let (name, pipe) = self.parse_template_call(&tokens[1..], "template")?;
                    nodes.push(Node::Template { name, pipe });
                }
                "break" | "continue" => {
                    return Err(self.error(format!("{{{{{keyword}}}}} is not supported")))
                }
                _ => {
                    let pipe = self.parse_pipeline(&tokens, false)?;
                    if pipe.cmds.is_empty() {
                        return Err(self.error("missing value for command"));
                    }
                    nodes.push(Node::Action(pipe));
                }
            }
        }

        Ok((nodes, Stop::Eof))
    }

    /// Parse the body of a `define` or `block`, which sees only `$`.
    fn parse_definition_body(&mut self, name: &str) -> Result<Vec<Node>, ParseError> {
        let outer = std::mem::replace(&mut self.vars, vec!["$".to_string()]);
        let (body, stop) = self.parse_list(false)?;
        self.vars = outer;

        match stop {
            Stop::End => Ok(body),
            Stop::Eof => Err(self.error(format!("unexpected EOF in definition of {name:?}"))),
            Stop::Else(_) => Err(self.error(format!("unexpected {{{{else}}}} in {name:?}"))),
        }
    }

    fn parse_template_call(
        &mut self,
        tokens: &[Token],
        keyword: &str,
    ) -> Result<(String, Option<Pipeline>), ParseError> {
        let Some(Token::Str(name)) = tokens.first() else {
            return Err(self.error(format!("{keyword} expects a quoted name")));
        };

        let pipe = if tokens.len() > 1 {
            Some(self.parse_pipeline(&tokens[1..], false)?)
        } else {
            None
        };

        Ok((name.clone(), pipe))
    }

    fn parse_branch(&mut self, kind: BranchKind, tokens: &[Token]) -> Result<Node, ParseError> {
        let mark = self.vars.len();

        let pipe = self.parse_pipeline(tokens, kind == BranchKind::Range)?;
        if pipe.cmds.is_empty() {
            return Err(self.error(format!("missing value for {}", kind.keyword())));
        }
        // declarations stay visible in the else branches
        let body_mark = self.vars.len();

        let (list, stop) = self.parse_list(false)?;
        let else_list = match stop {
            Stop::End => None,
            Stop::Eof => {
                return Err(self.error(format!("unexpected EOF in {}", kind.keyword())));
            }
            Stop::Else(rest) if rest.is_empty() => {
                self.vars.truncate(body_mark);
                let (list, stop) = self.parse_list(false)?;
                if !matches!(stop, Stop::End) {
                    return Err(self.error(format!("expected end of {}", kind.keyword())));
                }
                Some(list)
            }
            // `else if` and `else with` chain into a nested branch that shares
            // the final end
            Stop::Else(rest)
                if kind != BranchKind::Range
                    && rest.first() == Some(&Token::Ident(kind.keyword().to_string())) =>
            {
                self.vars.truncate(body_mark);
                Some(vec![self.parse_branch(kind, &rest[1..])?])
            }
            Stop::Else(_) => return Err(self.error("unexpected tokens after else")),
        };

        self.vars.truncate(mark);

        let branch = Branch {
            pipe,
            list,
            else_list,
        };

        Ok(match kind {
            BranchKind::If => Node::If(branch),
            BranchKind::Range => Node::Range(branch),
            BranchKind::With => Node::With(branch),
        })
    }

    fn parse_pipeline(&mut self, tokens: &[Token], range: bool) -> Result<Pipeline, ParseError> {
        let (decl, start) = match tokens {
            [Token::Variable(v, f), Token::Declare, ..] if f.is_empty() => (vec![v.clone()], 2),
            [Token::Variable(k, kf), Token::Comma, Token::Variable(v, vf), Token::Declare, ..]
                if range && kf.is_empty() && vf.is_empty() =>
            {
                (vec![k.clone(), v.clone()], 4)
            }
            [Token::Variable(_, _), Token::Assign, ..] => {
                return Err(self.error("variable assignment is not supported"))
            }
            _ => (Vec::new(), 0),
        };

        let mut pos = start;
        let cmds = self.parse_commands(tokens, &mut pos, false)?;
        if pos != tokens.len() {
            return Err(self.error("unexpected tokens in pipeline"));
        }
        if !decl.is_empty() && cmds.is_empty() {
            return Err(self.error("missing value for declaration"));
        }

        // declared variables are visible after their pipeline
        self.vars.extend(decl.iter().cloned());

        Ok(Pipeline { decl, cmds })
    }

    fn parse_commands(
        &mut self,
        tokens: &[Token],
        pos: &mut usize,
        nested: bool,
    ) -> Result<Vec<Command>, ParseError> {
        let mut cmds = Vec::new();

        loop {
            let mut args = Vec::new();
            while let Some(token) = tokens.get(*pos) {
                match token {
                    Token::Pipe => break,
                    Token::RightParen if nested => break,
                    Token::RightParen => return Err(self.error("unexpected right paren")),
                    Token::LeftParen => {
                        *pos += 1;
                        let inner = self.parse_commands(tokens, pos, true)?;
                        if tokens.get(*pos) != Some(&Token::RightParen) {
                            return Err(self.error("unclosed left paren"));
                        }
                        if inner.is_empty() {
                            return Err(self.error("missing value in parenthesized pipeline"));
                        }
                        *pos += 1;
                        args.push(Arg::Pipeline(Pipeline {
                            decl: Vec::new(),
                            cmds: inner,
                        }));
                    }
                    token => {
                        args.push(self.parse_arg(token)?);
                        *pos += 1;
                    }
                }
            }

            match (args.is_empty(), tokens.get(*pos)) {
                (true, None) if cmds.is_empty() => return Ok(cmds),
                (true, _) => return Err(self.error("missing command in pipeline")),
                (false, Some(Token::Pipe)) => {
                    cmds.push(Command { args });
                    *pos += 1;
                }
                (false, _) => {
                    cmds.push(Command { args });
                    return Ok(cmds);
                }
            }
        }
    }

    fn parse_arg(&self, token: &Token) -> Result<Arg, ParseError> {
        Ok(match token {
            Token::Dot => Arg::Dot,
            Token::Field(path) => Arg::Field(path.clone()),
            Token::Variable(name, fields) => {
                if !self.vars.contains(name) {
                    return Err(self.error(format!("undefined variable {name:?}")));
                }
                Arg::Variable {
                    name: name.clone(),
                    fields: fields.clone(),
                }
            }
            Token::Ident(word) => match word.as_str() {
                "true" => Arg::Bool(true),
                "false" => Arg::Bool(false),
                "nil" => Arg::Nil,
                name if (self.is_func)(name) => Arg::Function(name.to_string()),
                name => return Err(self.error(format!("function {name:?} not defined"))),
            },
            Token::Str(s) => Arg::Str(s.clone()),
            Token::Number(n) => Arg::Number(n.clone()),
            Token::Declare | Token::Assign | Token::Comma => {
                return Err(self.error("unexpected declaration in command"))
            }
            Token::Pipe | Token::LeftParen | Token::RightParen => {
                return Err(self.error("unexpected token in command"))
            }
        })
    }
}
