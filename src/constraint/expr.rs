//! The constraint expression language.
//!
//! Treated as an externally-defined predicate language: `compile(expr)` turns
//! source text into a `Program`, `evaluate(program, context)` runs it against
//! the published context (`subject`, `group`, `input`). Deliberately small —
//! boolean/comparison/membership operators over string, integer, boolean and
//! list values — but closed and safe: no loops, no external calls, no
//! unbounded recursion, so it can be evaluated on every constraint check
//! without a sandboxing story beyond "it's a pure tree walk."

use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Str(String),
    List(Vec<Value>),
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Str(_) => "string",
            Value::List(_) => "list",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

/// The published evaluation context: `subject{email, principals}`,
/// `group{environment, system, name}`, `input{<varName>: typed}`.
#[derive(Debug, Clone, Default)]
pub struct Context {
    pub subject_email: String,
    pub subject_principals: Vec<String>,
    pub group_environment: String,
    pub group_system: String,
    pub group_name: String,
    pub input: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EvalError {
    Syntax(String),
    Type(String),
    UndeclaredVariable(String),
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalError::Syntax(s) => write!(f, "syntax error: {s}"),
            EvalError::Type(s) => write!(f, "type error: {s}"),
            EvalError::UndeclaredVariable(s) => write!(f, "reference to undeclared variable `{s}`"),
        }
    }
}

// ─── AST ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    BoolLit(bool),
    IntLit(i64),
    StrLit(String),
    ListLit(Vec<Expr>),
    Field(Vec<String>),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Eq(Box<Expr>, Box<Expr>),
    Ne(Box<Expr>, Box<Expr>),
    Lt(Box<Expr>, Box<Expr>),
    Le(Box<Expr>, Box<Expr>),
    Gt(Box<Expr>, Box<Expr>),
    Ge(Box<Expr>, Box<Expr>),
    In(Box<Expr>, Box<Expr>),
}

/// A compiled expression, ready to evaluate against any `Context`.
#[derive(Debug, Clone, PartialEq)]
pub struct Program(Expr);

pub fn compile(source: &str) -> Result<Program, EvalError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_or()?;
    if parser.pos != parser.tokens.len() {
        return Err(EvalError::Syntax(format!(
            "unexpected trailing token near position {}",
            parser.pos
        )));
    }
    Ok(Program(expr))
}

pub fn evaluate(program: &Program, ctx: &Context) -> Result<bool, EvalError> {
    let value = eval_expr(&program.0, ctx)?;
    value
        .as_bool()
        .ok_or_else(|| EvalError::Type(format!("expression evaluated to {}, not bool", value.type_name())))
}

fn eval_expr(expr: &Expr, ctx: &Context) -> Result<Value, EvalError> {
    match expr {
        Expr::BoolLit(b) => Ok(Value::Bool(*b)),
        Expr::IntLit(i) => Ok(Value::Int(*i)),
        Expr::StrLit(s) => Ok(Value::Str(s.clone())),
        Expr::ListLit(items) => {
            let values = items
                .iter()
                .map(|e| eval_expr(e, ctx))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::List(values))
        }
        Expr::Field(path) => resolve_field(path, ctx),
        Expr::Not(e) => {
            let v = eval_expr(e, ctx)?;
            v.as_bool()
                .map(|b| Value::Bool(!b))
                .ok_or_else(|| EvalError::Type(format!("`!` requires bool, got {}", v.type_name())))
        }
        Expr::And(a, b) => {
            let va = eval_expr(a, ctx)?;
            let ba = va
                .as_bool()
                .ok_or_else(|| EvalError::Type(format!("`&&` requires bool, got {}", va.type_name())))?;
            if !ba {
                return Ok(Value::Bool(false));
            }
            let vb = eval_expr(b, ctx)?;
            let bb = vb
                .as_bool()
                .ok_or_else(|| EvalError::Type(format!("`&&` requires bool, got {}", vb.type_name())))?;
            Ok(Value::Bool(bb))
        }
        Expr::Or(a, b) => {
            let va = eval_expr(a, ctx)?;
            let ba = va
                .as_bool()
                .ok_or_else(|| EvalError::Type(format!("`||` requires bool, got {}", va.type_name())))?;
            if ba {
                return Ok(Value::Bool(true));
            }
            let vb = eval_expr(b, ctx)?;
            let bb = vb
                .as_bool()
                .ok_or_else(|| EvalError::Type(format!("`||` requires bool, got {}", vb.type_name())))?;
            Ok(Value::Bool(bb))
        }
        Expr::Eq(a, b) => Ok(Value::Bool(eval_expr(a, ctx)? == eval_expr(b, ctx)?)),
        Expr::Ne(a, b) => Ok(Value::Bool(eval_expr(a, ctx)? != eval_expr(b, ctx)?)),
        Expr::Lt(a, b) => compare(a, b, ctx, |o| o == std::cmp::Ordering::Less),
        Expr::Le(a, b) => compare(a, b, ctx, |o| o != std::cmp::Ordering::Greater),
        Expr::Gt(a, b) => compare(a, b, ctx, |o| o == std::cmp::Ordering::Greater),
        Expr::Ge(a, b) => compare(a, b, ctx, |o| o != std::cmp::Ordering::Less),
        Expr::In(needle, haystack) => {
            let needle = eval_expr(needle, ctx)?;
            let haystack = eval_expr(haystack, ctx)?;
            match haystack {
                Value::List(items) => Ok(Value::Bool(items.contains(&needle))),
                other => Err(EvalError::Type(format!("`in` requires a list, got {}", other.type_name()))),
            }
        }
    }
}

fn compare(a: &Expr, b: &Expr, ctx: &Context, pred: impl Fn(std::cmp::Ordering) -> bool) -> Result<Value, EvalError> {
    let va = eval_expr(a, ctx)?;
    let vb = eval_expr(b, ctx)?;
    let ordering = match (&va, &vb) {
        (Value::Int(x), Value::Int(y)) => x.cmp(y),
        (Value::Str(x), Value::Str(y)) => x.cmp(y),
        _ => {
            return Err(EvalError::Type(format!(
                "cannot compare {} with {}",
                va.type_name(),
                vb.type_name()
            )))
        }
    };
    Ok(Value::Bool(pred(ordering)))
}

fn resolve_field(path: &[String], ctx: &Context) -> Result<Value, EvalError> {
    match path {
        [root, rest @ ..] if root == "subject" => match rest {
            ["email"] => Ok(Value::Str(ctx.subject_email.clone())),
            ["principals"] => Ok(Value::List(ctx.subject_principals.iter().cloned().map(Value::Str).collect())),
            _ => Err(EvalError::Syntax(format!("unknown field subject.{}", rest.join(".")))),
        },
        [root, rest @ ..] if root == "group" => match rest {
            ["environment"] => Ok(Value::Str(ctx.group_environment.clone())),
            ["system"] => Ok(Value::Str(ctx.group_system.clone())),
            ["name"] => Ok(Value::Str(ctx.group_name.clone())),
            _ => Err(EvalError::Syntax(format!("unknown field group.{}", rest.join(".")))),
        },
        [root, rest @ ..] if root == "input" => match rest {
            [name] => ctx
                .input
                .get(name)
                .cloned()
                .ok_or_else(|| EvalError::UndeclaredVariable(name.clone())),
            _ => Err(EvalError::Syntax("input.<name> takes exactly one segment".into())),
        },
        _ => Err(EvalError::Syntax(format!("unknown root `{}`", path.first().cloned().unwrap_or_default()))),
    }
}

// ─── Tokenizer ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Int(i64),
    Str(String),
    True,
    False,
    Dot,
    Comma,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Not,
    And,
    Or,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
}

fn tokenize(src: &str) -> Result<Vec<Token>, EvalError> {
    let chars: Vec<char> = src.chars().collect();
    let mut i = 0;
    let mut tokens = Vec::new();
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        match c {
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Ne);
                    i += 2;
                } else {
                    tokens.push(Token::Not);
                    i += 1;
                }
            }
            '&' if chars.get(i + 1) == Some(&'&') => {
                tokens.push(Token::And);
                i += 2;
            }
            '|' if chars.get(i + 1) == Some(&'|') => {
                tokens.push(Token::Or);
                i += 2;
            }
            '=' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Eq);
                i += 2;
            }
            '<' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Le);
                    i += 2;
                } else {
                    tokens.push(Token::Lt);
                    i += 1;
                }
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Ge);
                    i += 2;
                } else {
                    tokens.push(Token::Gt);
                    i += 1;
                }
            }
            '"' => {
                let mut s = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(EvalError::Syntax("unterminated string literal".into())),
                        Some('"') => {
                            i += 1;
                            break;
                        }
                        Some('\\') if chars.get(i + 1) == Some(&'"') => {
                            s.push('"');
                            i += 2;
                        }
                        Some(ch) => {
                            s.push(*ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Str(s));
            }
            c if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit())) => {
                let start = i;
                i += 1;
                while chars.get(i).is_some_and(|c| c.is_ascii_digit()) {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let n = text
                    .parse::<i64>()
                    .map_err(|e| EvalError::Syntax(format!("invalid integer `{text}`: {e}")))?;
                tokens.push(Token::Int(n));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while chars.get(i).is_some_and(|c| c.is_alphanumeric() || *c == '_') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                tokens.push(match text.as_str() {
                    "true" => Token::True,
                    "false" => Token::False,
                    "in" => Token::In,
                    _ => Token::Ident(text),
                });
            }
            other => return Err(EvalError::Syntax(format!("unexpected character `{other}`"))),
        }
    }
    Ok(tokens)
}

// ─── Recursive-descent parser ────────────────────────────────────────────

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn expect(&mut self, tok: &Token) -> Result<(), EvalError> {
        match self.advance() {
            Some(ref t) if t == tok => Ok(()),
            other => Err(EvalError::Syntax(format!("expected {tok:?}, got {other:?}"))),
        }
    }

    fn parse_or(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.advance();
            let rhs = self.parse_and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.parse_not()?;
        while self.peek() == Some(&Token::And) {
            self.advance();
            let rhs = self.parse_not()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> Result<Expr, EvalError> {
        if self.peek() == Some(&Token::Not) {
            self.advance();
            let inner = self.parse_not()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, EvalError> {
        let lhs = self.parse_primary()?;
        let ctor: fn(Box<Expr>, Box<Expr>) -> Expr = match self.peek() {
            Some(Token::Eq) => Expr::Eq,
            Some(Token::Ne) => Expr::Ne,
            Some(Token::Lt) => Expr::Lt,
            Some(Token::Le) => Expr::Le,
            Some(Token::Gt) => Expr::Gt,
            Some(Token::Ge) => Expr::Ge,
            Some(Token::In) => Expr::In,
            _ => return Ok(lhs),
        };
        self.advance();
        let rhs = self.parse_primary()?;
        Ok(ctor(Box::new(lhs), Box::new(rhs)))
    }

    fn parse_primary(&mut self) -> Result<Expr, EvalError> {
        match self.advance() {
            Some(Token::True) => Ok(Expr::BoolLit(true)),
            Some(Token::False) => Ok(Expr::BoolLit(false)),
            Some(Token::Int(n)) => Ok(Expr::IntLit(n)),
            Some(Token::Str(s)) => Ok(Expr::StrLit(s)),
            Some(Token::Not) => Ok(Expr::Not(Box::new(self.parse_not()?))),
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Some(Token::LBracket) => {
                let mut items = Vec::new();
                if self.peek() != Some(&Token::RBracket) {
                    loop {
                        items.push(self.parse_or()?);
                        if self.peek() == Some(&Token::Comma) {
                            self.advance();
                        } else {
                            break;
                        }
                    }
                }
                self.expect(&Token::RBracket)?;
                Ok(Expr::ListLit(items))
            }
            Some(Token::Ident(name)) => {
                let mut path = vec![name];
                while self.peek() == Some(&Token::Dot) {
                    self.advance();
                    match self.advance() {
                        Some(Token::Ident(seg)) => path.push(seg),
                        other => return Err(EvalError::Syntax(format!("expected field name, got {other:?}"))),
                    }
                }
                Ok(Expr::Field(path))
            }
            other => Err(EvalError::Syntax(format!("unexpected token {other:?}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> Context {
        Context {
            subject_email: "alice@example.com".into(),
            subject_principals: vec!["user:alice@example.com".into(), "group:approvers@example.com".into()],
            group_environment: "env-1".into(),
            group_system: "sys-1".into(),
            group_name: "g-1".into(),
            input: BTreeMap::from([("ticket".to_string(), Value::Str("INC-1".into()))]),
        }
    }

    #[test]
    fn literal_true() {
        let p = compile("true").unwrap();
        assert!(evaluate(&p, &ctx()).unwrap());
    }

    #[test]
    fn field_equality() {
        let p = compile(r#"subject.email == "alice@example.com""#).unwrap();
        assert!(evaluate(&p, &ctx()).unwrap());
    }

    #[test]
    fn membership_in_list() {
        let p = compile(r#""group:approvers@example.com" in subject.principals"#).unwrap();
        assert!(evaluate(&p, &ctx()).unwrap());
    }

    #[test]
    fn and_or_not() {
        let p = compile(r#"!(group.environment == "env-2") && (group.system == "sys-1" || false)"#).unwrap();
        assert!(evaluate(&p, &ctx()).unwrap());
    }

    #[test]
    fn input_reference() {
        let p = compile(r#"input.ticket == "INC-1""#).unwrap();
        assert!(evaluate(&p, &ctx()).unwrap());
    }

    #[test]
    fn undeclared_variable_fails() {
        let p = compile("input.missing == \"x\"").unwrap();
        let err = evaluate(&p, &ctx()).unwrap_err();
        assert!(matches!(err, EvalError::UndeclaredVariable(_)));
    }

    #[test]
    fn type_error_on_non_bool_result() {
        let p = compile("input.ticket").unwrap();
        let err = evaluate(&p, &ctx()).unwrap_err();
        assert!(matches!(err, EvalError::Type(_)));
    }

    #[test]
    fn syntax_error_on_malformed_expression() {
        assert!(compile("subject.email ==").is_err());
        assert!(compile("(true").is_err());
    }

    #[test]
    fn integer_comparisons() {
        let mut c = ctx();
        c.input.insert("count".into(), Value::Int(5));
        let p = compile("input.count >= 3 && input.count < 10").unwrap();
        assert!(evaluate(&p, &c).unwrap());
    }
}
