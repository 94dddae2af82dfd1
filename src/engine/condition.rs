// ABOUTME: Sandboxed expression evaluator for skip conditions
// ABOUTME: Parses comparisons and boolean logic over a read-only context projection

use serde_json::Value;
use thiserror::Error;

use super::context::ContextSnapshot;

#[derive(Error, Debug, Clone)]
pub enum ConditionError {
    #[error("parse error at offset {offset}: {message}")]
    Parse { offset: usize, message: String },

    #[error("evaluation error: {0}")]
    Eval(String),
}

type Result<T> = std::result::Result<T, ConditionError>;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    /// Property access rooted at `stepOutputs` or `globals`.
    Path(Vec<String>),
    /// `getStepOutput('id')` / `getGlobal('key')` with optional trailing
    /// property segments.
    Helper { name: String, arg: String, path: Vec<String> },
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare { op: CompareOp, left: Box<Expr>, right: Box<Expr> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Num(f64),
    True,
    False,
    Null,
    Dot,
    Bang,
    AndAnd,
    OrOr,
    LParen,
    RParen,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

fn tokenize(input: &str) -> Result<Vec<(Token, usize)>> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i] as char;
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '(' => {
                tokens.push((Token::LParen, i));
                i += 1;
            }
            ')' => {
                tokens.push((Token::RParen, i));
                i += 1;
            }
            '.' => {
                tokens.push((Token::Dot, i));
                i += 1;
            }
            '\'' | '"' => {
                let quote = c;
                let start = i;
                i += 1;
                let mut s = String::new();
                loop {
                    if i >= bytes.len() {
                        return Err(ConditionError::Parse {
                            offset: start,
                            message: "unterminated string".into(),
                        });
                    }
                    let ch = bytes[i] as char;
                    i += 1;
                    if ch == quote {
                        break;
                    }
                    s.push(ch);
                }
                tokens.push((Token::Str(s), start));
            }
            '=' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push((Token::Eq, i));
                    i += 2;
                } else {
                    return Err(ConditionError::Parse {
                        offset: i,
                        message: "expected '=='".into(),
                    });
                }
            }
            '!' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push((Token::Ne, i));
                    i += 2;
                } else {
                    tokens.push((Token::Bang, i));
                    i += 1;
                }
            }
            '<' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push((Token::Le, i));
                    i += 2;
                } else {
                    tokens.push((Token::Lt, i));
                    i += 1;
                }
            }
            '>' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push((Token::Ge, i));
                    i += 2;
                } else {
                    tokens.push((Token::Gt, i));
                    i += 1;
                }
            }
            '&' => {
                if bytes.get(i + 1) == Some(&b'&') {
                    tokens.push((Token::AndAnd, i));
                    i += 2;
                } else {
                    return Err(ConditionError::Parse {
                        offset: i,
                        message: "expected '&&'".into(),
                    });
                }
            }
            '|' => {
                if bytes.get(i + 1) == Some(&b'|') {
                    tokens.push((Token::OrOr, i));
                    i += 2;
                } else {
                    return Err(ConditionError::Parse {
                        offset: i,
                        message: "expected '||'".into(),
                    });
                }
            }
            _ if c.is_ascii_digit() || c == '-' => {
                let start = i;
                i += 1;
                while i < bytes.len()
                    && ((bytes[i] as char).is_ascii_digit() || bytes[i] == b'.')
                {
                    i += 1;
                }
                let text = &input[start..i];
                let num = text.parse::<f64>().map_err(|_| ConditionError::Parse {
                    offset: start,
                    message: format!("invalid number '{}'", text),
                })?;
                tokens.push((Token::Num(num), start));
            }
            _ if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < bytes.len()
                    && ((bytes[i] as char).is_ascii_alphanumeric() || bytes[i] == b'_')
                {
                    i += 1;
                }
                let word = &input[start..i];
                let token = match word {
                    "true" => Token::True,
                    "false" => Token::False,
                    "null" => Token::Null,
                    _ => Token::Ident(word.to_string()),
                };
                tokens.push((token, start));
            }
            _ => {
                return Err(ConditionError::Parse {
                    offset: i,
                    message: format!("unexpected character '{}'", c),
                });
            }
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|(_, o)| *o)
            .unwrap_or(usize::MAX)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(t, _)| t.clone());
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: Token, what: &str) -> Result<()> {
        let offset = self.offset();
        match self.advance() {
            Some(t) if t == expected => Ok(()),
            _ => Err(ConditionError::Parse {
                offset,
                message: format!("expected {}", what),
            }),
        }
    }

    fn parse_expr(&mut self) -> Result<Expr> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::OrOr) {
            self.advance();
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut left = self.parse_compare()?;
        while self.peek() == Some(&Token::AndAnd) {
            self.advance();
            let right = self.parse_compare()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_compare(&mut self) -> Result<Expr> {
        let left = self.parse_unary()?;
        let op = match self.peek() {
            Some(Token::Eq) => Some(CompareOp::Eq),
            Some(Token::Ne) => Some(CompareOp::Ne),
            Some(Token::Lt) => Some(CompareOp::Lt),
            Some(Token::Le) => Some(CompareOp::Le),
            Some(Token::Gt) => Some(CompareOp::Gt),
            Some(Token::Ge) => Some(CompareOp::Ge),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let right = self.parse_unary()?;
            Ok(Expr::Compare {
                op,
                left: Box::new(left),
                right: Box::new(right),
            })
        } else {
            Ok(left)
        }
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        if self.peek() == Some(&Token::Bang) {
            self.advance();
            let inner = self.parse_unary()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        let offset = self.offset();
        match self.advance() {
            Some(Token::Num(n)) => Ok(Expr::Literal(
                serde_json::Number::from_f64(n)
                    .map(Value::Number)
                    .unwrap_or(Value::Null),
            )),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::True) => Ok(Expr::Literal(Value::Bool(true))),
            Some(Token::False) => Ok(Expr::Literal(Value::Bool(false))),
            Some(Token::Null) => Ok(Expr::Literal(Value::Null)),
            Some(Token::LParen) => {
                let inner = self.parse_expr()?;
                self.expect(Token::RParen, "')'")?;
                Ok(inner)
            }
            Some(Token::Ident(name)) if name == "getStepOutput" || name == "getGlobal" => {
                self.expect(Token::LParen, "'('")?;
                let arg_offset = self.offset();
                let arg = match self.advance() {
                    Some(Token::Str(s)) => s,
                    _ => {
                        return Err(ConditionError::Parse {
                            offset: arg_offset,
                            message: format!("{} takes a single string argument", name),
                        });
                    }
                };
                self.expect(Token::RParen, "')'")?;
                let path = self.parse_trailing_path()?;
                Ok(Expr::Helper { name, arg, path })
            }
            Some(Token::Ident(root)) if root == "stepOutputs" || root == "globals" => {
                let mut path = vec![root];
                path.extend(self.parse_trailing_path()?);
                Ok(Expr::Path(path))
            }
            Some(Token::Ident(other)) => Err(ConditionError::Parse {
                offset,
                message: format!(
                    "unknown identifier '{}'; paths must start with stepOutputs or globals",
                    other
                ),
            }),
            _ => Err(ConditionError::Parse {
                offset,
                message: "expected expression".into(),
            }),
        }
    }

    fn parse_trailing_path(&mut self) -> Result<Vec<String>> {
        let mut path = Vec::new();
        while self.peek() == Some(&Token::Dot) {
            self.advance();
            let offset = self.offset();
            match self.advance() {
                Some(Token::Ident(segment)) => path.push(segment),
                _ => {
                    return Err(ConditionError::Parse {
                        offset,
                        message: "expected property name after '.'".into(),
                    });
                }
            }
        }
        Ok(path)
    }
}

/// Parse an expression without evaluating it.
pub fn parse(input: &str) -> Result<Expr> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(ConditionError::Parse {
            offset: 0,
            message: "empty expression".into(),
        });
    }
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(ConditionError::Parse {
            offset: parser.offset(),
            message: "trailing input after expression".into(),
        });
    }
    Ok(expr)
}

fn lookup<'a>(value: Option<&'a Value>, path: &[String]) -> Value {
    let mut current = match value {
        Some(v) => v,
        None => return Value::Null,
    };
    for segment in path {
        match current.get(segment) {
            Some(next) => current = next,
            None => return Value::Null,
        }
    }
    current.clone()
}

fn resolve(expr: &Expr, snapshot: &ContextSnapshot) -> Result<Value> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Path(path) => {
            let (root, rest) = path.split_first().expect("path is never empty");
            match (root.as_str(), rest.split_first()) {
                ("stepOutputs", Some((key, tail))) => {
                    Ok(lookup(snapshot.step_outputs.get(key), tail))
                }
                ("globals", Some((key, tail))) => Ok(lookup(snapshot.globals.get(key), tail)),
                // Bare root resolves to the whole namespace as an object.
                ("stepOutputs", None) => Ok(Value::Object(
                    snapshot
                        .step_outputs
                        .iter()
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect(),
                )),
                ("globals", None) => Ok(Value::Object(
                    snapshot
                        .globals
                        .iter()
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect(),
                )),
                _ => Err(ConditionError::Eval(format!("unknown path root '{}'", root))),
            }
        }
        Expr::Helper { name, arg, path } => match name.as_str() {
            "getStepOutput" => Ok(lookup(snapshot.step_outputs.get(arg), path)),
            "getGlobal" => Ok(lookup(snapshot.globals.get(arg), path)),
            _ => Err(ConditionError::Eval(format!("unknown helper '{}'", name))),
        },
        Expr::Not(inner) => Ok(Value::Bool(!is_truthy(&resolve(inner, snapshot)?))),
        Expr::And(l, r) => {
            if !is_truthy(&resolve(l, snapshot)?) {
                Ok(Value::Bool(false))
            } else {
                Ok(Value::Bool(is_truthy(&resolve(r, snapshot)?)))
            }
        }
        Expr::Or(l, r) => {
            if is_truthy(&resolve(l, snapshot)?) {
                Ok(Value::Bool(true))
            } else {
                Ok(Value::Bool(is_truthy(&resolve(r, snapshot)?)))
            }
        }
        Expr::Compare { op, left, right } => {
            let l = resolve(left, snapshot)?;
            let r = resolve(right, snapshot)?;
            Ok(Value::Bool(compare(*op, &l, &r)?))
        }
    }
}

/// Loose truthiness: null, false, 0, "" and empty collections are false.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Loose equality: numbers compare numerically, number/string and
/// bool/string pairs coerce before comparing.
fn loosely_equal(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::String(s), Value::Number(n)) | (Value::Number(n), Value::String(s)) => {
            match s.parse::<f64>() {
                Ok(parsed) => Some(parsed) == n.as_f64(),
                Err(_) => false,
            }
        }
        (Value::Bool(b), Value::String(s)) | (Value::String(s), Value::Bool(b)) => {
            match s.to_lowercase().as_str() {
                "true" => *b,
                "false" => !*b,
                _ => false,
            }
        }
        _ => false,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse::<f64>().ok(),
        Value::Bool(true) => Some(1.0),
        Value::Bool(false) => Some(0.0),
        _ => None,
    }
}

fn compare(op: CompareOp, left: &Value, right: &Value) -> Result<bool> {
    match op {
        CompareOp::Eq => Ok(loosely_equal(left, right)),
        CompareOp::Ne => Ok(!loosely_equal(left, right)),
        _ => {
            let (l, r) = match (as_number(left), as_number(right)) {
                (Some(l), Some(r)) => (l, r),
                _ => {
                    return Err(ConditionError::Eval(format!(
                        "cannot order {:?} against {:?}",
                        left, right
                    )));
                }
            };
            Ok(match op {
                CompareOp::Lt => l < r,
                CompareOp::Le => l <= r,
                CompareOp::Gt => l > r,
                CompareOp::Ge => l >= r,
                CompareOp::Eq | CompareOp::Ne => unreachable!(),
            })
        }
    }
}

/// Evaluate a parsed expression to a boolean against a context snapshot.
pub fn evaluate(expr: &Expr, snapshot: &ContextSnapshot) -> Result<bool> {
    resolve(expr, snapshot).map(|v| is_truthy(&v))
}

/// Parse and evaluate in one call.
pub fn evaluate_str(input: &str, snapshot: &ContextSnapshot) -> Result<bool> {
    let expr = parse(input)?;
    evaluate(&expr, snapshot)
}
