//! Hand-written recursive descent parser for mapping templates.
//!
//! Text outside directives and references is kept verbatim, so JSON bodies
//! with embedded references survive parsing unchanged. A `$` or `#` that
//! does not start a valid reference or directive is treated as text.

use serde_json::Value;

use super::ast::{Accessor, BinaryOp, Expr, Node, Reference};
use super::TemplateError;

/// Parse template source into a node list.
pub fn parse(source: &str) -> Result<Vec<Node>, TemplateError> {
    let mut parser = Parser::new(source);
    let (nodes, end) = parser.parse_block()?;
    match end {
        BlockEnd::Eof => Ok(nodes),
        BlockEnd::End => Err(parser.error("#end without an open block")),
        BlockEnd::Else => Err(parser.error("#else without #if")),
        BlockEnd::ElseIf(_) => Err(parser.error("#elseif without #if")),
    }
}

/// Returns true when `source` contains anything the renderer would act on.
pub fn has_template_syntax(source: &str) -> bool {
    source.contains('$') || source.contains('#')
}

enum BlockEnd {
    Eof,
    End,
    Else,
    ElseIf(Expr),
}

enum Directive {
    Node(Node),
    End(BlockEnd),
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

impl Parser {
    fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
        }
    }

    fn error(&self, message: impl Into<String>) -> TemplateError {
        let line = self.chars[..self.pos.min(self.chars.len())]
            .iter()
            .filter(|c| **c == '\n')
            .count()
            + 1;
        TemplateError::Syntax {
            line,
            message: message.into(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn starts_with(&self, s: &str) -> bool {
        s.chars()
            .enumerate()
            .all(|(i, c)| self.peek_at(i) == Some(c))
    }

    fn eat_str(&mut self, s: &str) -> bool {
        if self.starts_with(s) {
            self.pos += s.chars().count();
            true
        } else {
            false
        }
    }

    /// Consume a keyword operator such as `and` only when it is a whole word.
    fn eat_word(&mut self, word: &str) -> bool {
        let len = word.chars().count();
        if self.starts_with(word) && !self.peek_at(len).is_some_and(is_ident_char) {
            self.pos += len;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, c: char) -> Result<(), TemplateError> {
        self.skip_ws();
        if self.eat(c) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{c}'")))
        }
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn read_ident(&mut self) -> String {
        let start = self.pos;
        while self.peek().is_some_and(is_ident_char) {
            self.pos += 1;
        }
        self.chars[start..self.pos].iter().collect()
    }

    fn parse_block(&mut self) -> Result<(Vec<Node>, BlockEnd), TemplateError> {
        let mut nodes = Vec::new();
        let mut text = String::new();

        while let Some(c) = self.peek() {
            match c {
                '\\' if matches!(self.peek_at(1), Some('$') | Some('#')) => {
                    text.push(self.chars[self.pos + 1]);
                    self.pos += 2;
                }
                '#' => {
                    if self.eat_str("##") {
                        while let Some(c) = self.peek() {
                            self.pos += 1;
                            if c == '\n' {
                                break;
                            }
                        }
                        continue;
                    }
                    if self.eat_str("#*") {
                        while !self.eat_str("*#") {
                            if self.peek().is_none() {
                                return Err(self.error("unterminated block comment"));
                            }
                            self.pos += 1;
                        }
                        continue;
                    }
                    if self.eat_str("#[[") {
                        while !self.eat_str("]]#") {
                            match self.peek() {
                                Some(c) => {
                                    text.push(c);
                                    self.pos += 1;
                                }
                                None => return Err(self.error("unterminated #[[ block")),
                            }
                        }
                        continue;
                    }
                    match self.try_directive()? {
                        Some(Directive::Node(node)) => {
                            flush_text(&mut nodes, &mut text);
                            nodes.push(node);
                        }
                        Some(Directive::End(end)) => {
                            flush_text(&mut nodes, &mut text);
                            return Ok((nodes, end));
                        }
                        None => {
                            text.push('#');
                            self.pos += 1;
                        }
                    }
                }
                '$' => match self.try_reference()? {
                    Some(reference) => {
                        flush_text(&mut nodes, &mut text);
                        nodes.push(Node::Reference(reference));
                    }
                    None => {
                        text.push('$');
                        self.pos += 1;
                    }
                },
                _ => {
                    text.push(c);
                    self.pos += 1;
                }
            }
        }

        flush_text(&mut nodes, &mut text);
        Ok((nodes, BlockEnd::Eof))
    }

    fn try_directive(&mut self) -> Result<Option<Directive>, TemplateError> {
        let start = self.pos;
        self.pos += 1;
        let name = if self.eat('{') {
            let name = self.read_ident();
            if !self.eat('}') {
                self.pos = start;
                return Ok(None);
            }
            name
        } else {
            self.read_ident()
        };

        let directive = match name.as_str() {
            "set" => {
                self.expect('(')?;
                self.skip_ws();
                let target = self
                    .try_reference()?
                    .ok_or_else(|| self.error("#set needs a reference target"))?;
                self.expect('=')?;
                let value = self.parse_expr()?;
                self.expect(')')?;
                Directive::Node(Node::Set { target, value })
            }
            "if" => {
                let mut condition = self.parse_condition()?;
                let mut branches = Vec::new();
                let mut otherwise = None;
                loop {
                    let (body, end) = self.parse_block()?;
                    match end {
                        BlockEnd::ElseIf(next) => {
                            branches.push((condition, body));
                            condition = next;
                        }
                        BlockEnd::Else => {
                            branches.push((condition, body));
                            let (body, end) = self.parse_block()?;
                            if !matches!(end, BlockEnd::End) {
                                return Err(self.error("#else block must close with #end"));
                            }
                            otherwise = Some(body);
                            break;
                        }
                        BlockEnd::End => {
                            branches.push((condition, body));
                            break;
                        }
                        BlockEnd::Eof => return Err(self.error("#if without #end")),
                    }
                }
                Directive::Node(Node::If {
                    branches,
                    otherwise,
                })
            }
            "elseif" => Directive::End(BlockEnd::ElseIf(self.parse_condition()?)),
            "else" => Directive::End(BlockEnd::Else),
            "end" => Directive::End(BlockEnd::End),
            "foreach" => {
                self.expect('(')?;
                self.skip_ws();
                if !self.eat('$') {
                    return Err(self.error("#foreach needs a loop variable"));
                }
                self.eat('{');
                let var = self.read_ident();
                self.eat('}');
                self.skip_ws();
                if !self.eat_word("in") {
                    return Err(self.error("expected 'in' in #foreach"));
                }
                let iterable = self.parse_expr()?;
                self.expect(')')?;
                let body = self.parse_closed_body("#foreach")?;
                Directive::Node(Node::Foreach {
                    var,
                    iterable,
                    body,
                })
            }
            "define" => {
                self.expect('(')?;
                self.skip_ws();
                if !self.eat('$') {
                    return Err(self.error("#define needs a reference name"));
                }
                let name = self.read_ident();
                self.expect(')')?;
                let body = self.parse_closed_body("#define")?;
                Directive::Node(Node::Define { name, body })
            }
            "break" => Directive::Node(Node::Break),
            "stop" => Directive::Node(Node::Stop),
            _ => {
                self.pos = start;
                return Ok(None);
            }
        };
        Ok(Some(directive))
    }

    fn parse_closed_body(&mut self, directive: &str) -> Result<Vec<Node>, TemplateError> {
        let (body, end) = self.parse_block()?;
        match end {
            BlockEnd::End => Ok(body),
            _ => Err(self.error(format!("{directive} without #end"))),
        }
    }

    fn parse_condition(&mut self) -> Result<Expr, TemplateError> {
        self.expect('(')?;
        let expr = self.parse_expr()?;
        self.expect(')')?;
        Ok(expr)
    }

    /// Parse `$ref` at the cursor. Returns `None` (cursor untouched) when the
    /// text is not a reference.
    fn try_reference(&mut self) -> Result<Option<Reference>, TemplateError> {
        let start = self.pos;
        if !self.eat('$') {
            return Ok(None);
        }
        let quiet = self.eat('!');
        let braced = self.eat('{');
        if !self.peek().is_some_and(is_ident_start) {
            self.pos = start;
            return Ok(None);
        }
        let root = self.read_ident();
        let mut accessors = Vec::new();

        loop {
            match self.peek() {
                Some('.') if self.peek_at(1).is_some_and(is_ident_start) => {
                    self.pos += 1;
                    let name = self.read_ident();
                    if self.eat('(') {
                        let args = self.parse_args()?;
                        accessors.push(Accessor::Method(name, args));
                    } else {
                        accessors.push(Accessor::Property(name));
                    }
                }
                Some('[') => {
                    let save = self.pos;
                    self.pos += 1;
                    self.skip_ws();
                    let index = match self.parse_expr() {
                        Ok(expr) => expr,
                        Err(_) => {
                            self.pos = save;
                            break;
                        }
                    };
                    self.skip_ws();
                    if !self.eat(']') {
                        self.pos = save;
                        break;
                    }
                    accessors.push(Accessor::Index(index));
                }
                _ => break,
            }
        }

        if braced && !self.eat('}') {
            self.pos = start;
            return Ok(None);
        }

        Ok(Some(Reference {
            quiet,
            root,
            accessors,
            source: self.chars[start..self.pos].iter().collect(),
        }))
    }

    fn parse_args(&mut self) -> Result<Vec<Expr>, TemplateError> {
        let mut args = Vec::new();
        self.skip_ws();
        if self.eat(')') {
            return Ok(args);
        }
        loop {
            args.push(self.parse_expr()?);
            self.skip_ws();
            if self.eat(',') {
                continue;
            }
            if self.eat(')') {
                return Ok(args);
            }
            return Err(self.error("expected ',' or ')' in argument list"));
        }
    }

    fn parse_expr(&mut self) -> Result<Expr, TemplateError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, TemplateError> {
        let mut left = self.parse_and()?;
        loop {
            self.skip_ws();
            if self.eat_str("||") || self.eat_word("or") {
                let right = self.parse_and()?;
                left = binary(BinaryOp::Or, left, right);
            } else {
                return Ok(left);
            }
        }
    }

    fn parse_and(&mut self) -> Result<Expr, TemplateError> {
        let mut left = self.parse_equality()?;
        loop {
            self.skip_ws();
            if self.eat_str("&&") || self.eat_word("and") {
                let right = self.parse_equality()?;
                left = binary(BinaryOp::And, left, right);
            } else {
                return Ok(left);
            }
        }
    }

    fn parse_equality(&mut self) -> Result<Expr, TemplateError> {
        let mut left = self.parse_relational()?;
        loop {
            self.skip_ws();
            let op = if self.eat_str("==") || self.eat_word("eq") {
                BinaryOp::Eq
            } else if self.eat_str("!=") || self.eat_word("ne") {
                BinaryOp::Ne
            } else {
                return Ok(left);
            };
            let right = self.parse_relational()?;
            left = binary(op, left, right);
        }
    }

    fn parse_relational(&mut self) -> Result<Expr, TemplateError> {
        let mut left = self.parse_additive()?;
        loop {
            self.skip_ws();
            let op = if self.eat_str("<=") || self.eat_word("le") {
                BinaryOp::Le
            } else if self.eat_str(">=") || self.eat_word("ge") {
                BinaryOp::Ge
            } else if self.eat('<') || self.eat_word("lt") {
                BinaryOp::Lt
            } else if self.eat('>') || self.eat_word("gt") {
                BinaryOp::Gt
            } else {
                return Ok(left);
            };
            let right = self.parse_additive()?;
            left = binary(op, left, right);
        }
    }

    fn parse_additive(&mut self) -> Result<Expr, TemplateError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            self.skip_ws();
            let op = if self.eat('+') {
                BinaryOp::Add
            } else if self.eat('-') {
                BinaryOp::Sub
            } else {
                return Ok(left);
            };
            let right = self.parse_multiplicative()?;
            left = binary(op, left, right);
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, TemplateError> {
        let mut left = self.parse_unary()?;
        loop {
            self.skip_ws();
            let op = if self.eat('*') {
                BinaryOp::Mul
            } else if self.eat('/') {
                BinaryOp::Div
            } else if self.eat('%') {
                BinaryOp::Rem
            } else {
                return Ok(left);
            };
            let right = self.parse_unary()?;
            left = binary(op, left, right);
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, TemplateError> {
        self.skip_ws();
        if self.peek() == Some('!') && self.peek_at(1) != Some('=') {
            self.pos += 1;
            return Ok(Expr::Not(Box::new(self.parse_unary()?)));
        }
        if self.eat_word("not") {
            return Ok(Expr::Not(Box::new(self.parse_unary()?)));
        }
        if self.eat('-') {
            return Ok(Expr::Negate(Box::new(self.parse_unary()?)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, TemplateError> {
        self.skip_ws();
        match self.peek() {
            Some('(') => {
                self.pos += 1;
                let expr = self.parse_expr()?;
                self.expect(')')?;
                Ok(expr)
            }
            Some('\'') => {
                self.pos += 1;
                let mut value = String::new();
                loop {
                    match self.peek() {
                        Some('\'') if self.peek_at(1) == Some('\'') => {
                            value.push('\'');
                            self.pos += 2;
                        }
                        Some('\'') => {
                            self.pos += 1;
                            break;
                        }
                        Some(c) => {
                            value.push(c);
                            self.pos += 1;
                        }
                        None => return Err(self.error("unterminated string literal")),
                    }
                }
                Ok(Expr::Literal(Value::String(value)))
            }
            Some('"') => {
                self.pos += 1;
                let mut raw = String::new();
                loop {
                    match self.peek() {
                        Some('\\') if self.peek_at(1) == Some('"') => {
                            raw.push('"');
                            self.pos += 2;
                        }
                        Some('"') => {
                            self.pos += 1;
                            break;
                        }
                        Some(c) => {
                            raw.push(c);
                            self.pos += 1;
                        }
                        None => return Err(self.error("unterminated string literal")),
                    }
                }
                if !has_template_syntax(&raw) {
                    return Ok(Expr::Literal(Value::String(raw)));
                }
                Ok(Expr::Interpolated(parse(&raw)?))
            }
            Some('[') => {
                self.pos += 1;
                self.skip_ws();
                if self.eat(']') {
                    return Ok(Expr::List(Vec::new()));
                }
                let first = self.parse_expr()?;
                self.skip_ws();
                if self.eat_str("..") {
                    let last = self.parse_expr()?;
                    self.expect(']')?;
                    return Ok(Expr::Range(Box::new(first), Box::new(last)));
                }
                let mut items = vec![first];
                loop {
                    self.skip_ws();
                    if self.eat(']') {
                        return Ok(Expr::List(items));
                    }
                    if !self.eat(',') {
                        return Err(self.error("expected ',' or ']' in list"));
                    }
                    items.push(self.parse_expr()?);
                }
            }
            Some('{') => {
                self.pos += 1;
                let mut entries = Vec::new();
                self.skip_ws();
                if self.eat('}') {
                    return Ok(Expr::Map(entries));
                }
                loop {
                    let key = self.parse_expr()?;
                    self.expect(':')?;
                    let value = self.parse_expr()?;
                    entries.push((key, value));
                    self.skip_ws();
                    if self.eat('}') {
                        return Ok(Expr::Map(entries));
                    }
                    if !self.eat(',') {
                        return Err(self.error("expected ',' or '}' in map"));
                    }
                }
            }
            Some('$') => self
                .try_reference()?
                .map(Expr::Reference)
                .ok_or_else(|| self.error("invalid reference")),
            Some(c) if c.is_ascii_digit() => Ok(Expr::Literal(self.read_number())),
            _ => {
                if self.eat_word("true") {
                    Ok(Expr::Literal(Value::Bool(true)))
                } else if self.eat_word("false") {
                    Ok(Expr::Literal(Value::Bool(false)))
                } else if self.eat_word("null") {
                    Ok(Expr::Literal(Value::Null))
                } else {
                    Err(self.error("unexpected token in expression"))
                }
            }
        }
    }

    fn read_number(&mut self) -> Value {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        let mut is_float = false;
        if self.peek() == Some('.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            is_float = true;
            self.pos += 1;
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        if is_float {
            text.parse::<f64>().map(Value::from).unwrap_or(Value::Null)
        } else {
            text.parse::<i64>()
                .map(Value::from)
                .or_else(|_| text.parse::<f64>().map(Value::from))
                .unwrap_or(Value::Null)
        }
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary(op, Box::new(left), Box::new(right))
}

fn flush_text(nodes: &mut Vec<Node>, text: &mut String) {
    if !text.is_empty() {
        nodes.push(Node::Text(std::mem::take(text)));
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}
