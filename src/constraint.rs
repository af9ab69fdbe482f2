//! Constraint engine.
//!
//! A constraint is either an **Expiry** sentinel (contributes a chosen
//! duration to a Join operation) or an **Expression** (a named, typed-input,
//! boolean-valued check evaluated against the published `subject`/`group`/
//! `input` context via [`expr`]). `Check` is the stateful, per-request
//! evaluation handle a constraint hands out: it owns the `TypedInput` values
//! the caller fills in before calling `evaluate()`.

pub mod expr;

use chrono::Duration;
use std::collections::BTreeMap;

/// Which class of operation a constraint list belongs to — join constraints
/// may carry at most one Expiry, approve constraints may carry none.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintClass {
    Join,
    Approve,
}

#[derive(Debug, Clone, PartialEq)]
pub enum VariableType {
    /// Length bounds, in characters.
    Str { min_len: u32, max_len: u32 },
    Int { min: i64, max: i64 },
    Bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariableDecl {
    pub name: String,
    pub display_name: String,
    pub var_type: VariableType,
}

/// A constraint, as found in a policy document.
#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    Expiry {
        display_name: String,
        min_dur: Duration,
        max_dur: Duration,
    },
    Expression {
        name: String,
        display_name: String,
        variables: Vec<VariableDecl>,
        expression: String,
    },
}

/// Constraints are overridden/appended by name: for every
/// constraint in the child, override in place by `name` if present, else
/// append. The Expiry
/// constraint uses this reserved name for that purpose — a document may
/// declare at most one.
pub const EXPIRY_CONSTRAINT_NAME: &str = "expiry";

impl Constraint {
    pub fn name(&self) -> &str {
        match self {
            Constraint::Expiry { .. } => EXPIRY_CONSTRAINT_NAME,
            Constraint::Expression { name, .. } => name,
        }
    }

    pub fn display_name(&self) -> &str {
        match self {
            Constraint::Expiry { display_name, .. } => display_name,
            Constraint::Expression { display_name, .. } => display_name,
        }
    }

    pub fn is_expiry(&self) -> bool {
        matches!(self, Constraint::Expiry { .. })
    }

    /// Compile the `Expression` variant's source once; does nothing (always
    /// `Ok`) for `Expiry`, which has no expression to compile.
    pub fn compile(&self) -> Result<Option<expr::Program>, expr::EvalError> {
        match self {
            Constraint::Expiry { .. } => Ok(None),
            Constraint::Expression { expression, .. } => expr::compile(expression).map(Some),
        }
    }

    /// The declared `input` slots a `Check` for this constraint carries.
    pub fn create_check(&self) -> Check<'_> {
        let inputs = match self {
            Constraint::Expiry { .. } => vec![TypedInput::new(
                "duration".to_string(),
                VariableType::Int { min: 0, max: i64::MAX },
            )],
            Constraint::Expression { variables, .. } => variables
                .iter()
                .map(|v| TypedInput::new(v.name.clone(), v.var_type.clone()))
                .collect(),
        };
        Check {
            constraint: self,
            inputs,
        }
    }
}

/// A single named, typed input slot. `set` parses (trimmed) and range-checks
/// the raw value; `get` returns the canonical textual form.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedInput {
    name: String,
    var_type: VariableType,
    value: Option<String>,
}

impl TypedInput {
    fn new(name: String, var_type: VariableType) -> Self {
        TypedInput {
            name,
            var_type,
            value: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn var_type(&self) -> &VariableType {
        &self.var_type
    }

    pub fn get(&self) -> Option<&str> {
        self.value.as_deref()
    }

    /// Parse and range-validate `raw` (trimmed first), storing the canonical
    /// textual form on success.
    pub fn set(&mut self, raw: &str) -> Result<(), String> {
        let trimmed = raw.trim();
        match &self.var_type {
            VariableType::Str { min_len, max_len } => {
                let len = trimmed.chars().count() as u32;
                if len < *min_len || len > *max_len {
                    return Err(format!(
                        "`{}` must be between {} and {} characters, got {}",
                        self.name, min_len, max_len, len
                    ));
                }
                self.value = Some(trimmed.to_string());
            }
            VariableType::Int { min, max } => {
                let n: i64 = trimmed
                    .parse()
                    .map_err(|_| format!("`{}` is not a valid integer: `{trimmed}`", self.name))?;
                if n < *min || n > *max {
                    return Err(format!("`{}` must be between {min} and {max}, got {n}", self.name));
                }
                self.value = Some(n.to_string());
            }
            VariableType::Bool => {
                let b: bool = trimmed
                    .parse()
                    .map_err(|_| format!("`{}` is not a valid bool: `{trimmed}`", self.name))?;
                self.value = Some(b.to_string());
            }
        }
        Ok(())
    }

    fn to_expr_value(&self) -> Result<expr::Value, String> {
        let raw = self
            .value
            .as_deref()
            .ok_or_else(|| format!("required input `{}` missing", self.name))?;
        Ok(match &self.var_type {
            VariableType::Str { .. } => expr::Value::Str(raw.to_string()),
            VariableType::Int { .. } => expr::Value::Int(raw.parse().expect("validated by set()")),
            VariableType::Bool => expr::Value::Bool(raw.parse().expect("validated by set()")),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CheckResult {
    Satisfied,
    Unsatisfied,
    Failed(String),
}

impl CheckResult {
    pub fn is_satisfied(&self) -> bool {
        matches!(self, CheckResult::Satisfied)
    }
}

/// The published evaluation context minus `input` (which comes from the
/// `Check`'s own `TypedInput`s).
#[derive(Debug, Clone, Default)]
pub struct EvalContext {
    pub subject_email: String,
    pub subject_principals: Vec<String>,
    pub group_environment: String,
    pub group_system: String,
    pub group_name: String,
}

/// A constraint bound to a set of caller-supplied inputs, ready to evaluate.
pub struct Check<'a> {
    constraint: &'a Constraint,
    inputs: Vec<TypedInput>,
}

impl<'a> Check<'a> {
    pub fn constraint(&self) -> &Constraint {
        self.constraint
    }

    pub fn inputs(&self) -> &[TypedInput] {
        &self.inputs
    }

    pub fn inputs_mut(&mut self) -> &mut [TypedInput] {
        &mut self.inputs
    }

    pub fn input_mut(&mut self, name: &str) -> Option<&mut TypedInput> {
        self.inputs.iter_mut().find(|i| i.name == name)
    }

    pub fn evaluate(&self, ctx: &EvalContext) -> CheckResult {
        match self.constraint {
            // Trivially satisfied once its duration input is present.
            Constraint::Expiry { .. } => match self.inputs.first().and_then(|i| i.get()) {
                Some(_) => CheckResult::Satisfied,
                None => CheckResult::Failed("required input `duration` missing".to_string()),
            },
            Constraint::Expression { expression, .. } => {
                let program = match expr::compile(expression) {
                    Ok(p) => p,
                    Err(e) => return CheckResult::Failed(e.to_string()),
                };
                let mut input = BTreeMap::new();
                for i in &self.inputs {
                    match i.to_expr_value() {
                        Ok(v) => {
                            input.insert(i.name.clone(), v);
                        }
                        Err(msg) => return CheckResult::Failed(msg),
                    }
                }
                let expr_ctx = expr::Context {
                    subject_email: ctx.subject_email.clone(),
                    subject_principals: ctx.subject_principals.clone(),
                    group_environment: ctx.group_environment.clone(),
                    group_system: ctx.group_system.clone(),
                    group_name: ctx.group_name.clone(),
                    input,
                };
                match expr::evaluate(&program, &expr_ctx) {
                    Ok(true) => CheckResult::Satisfied,
                    Ok(false) => CheckResult::Unsatisfied,
                    Err(e) => CheckResult::Failed(e.to_string()),
                }
            }
        }
    }

    /// For an Expiry check only: the chosen duration, clamped to
    /// `[minDur, maxDur]`. Returns `None` for non-expiry checks or when the
    /// input hasn't been set.
    pub fn extract_expiry(&self) -> Option<Duration> {
        let (min_dur, max_dur) = match self.constraint {
            Constraint::Expiry { min_dur, max_dur, .. } => (*min_dur, *max_dur),
            Constraint::Expression { .. } => return None,
        };
        let raw = self.inputs.first()?.get()?;
        let seconds: i64 = raw.parse().ok()?;
        let chosen = Duration::seconds(seconds);
        Some(chosen.clamp(min_dur, max_dur))
    }
}
