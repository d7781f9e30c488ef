#![forbid(unsafe_code)]

use std::fmt;

use miette::Diagnostic;
use thiserror::Error;

use prism_ir::{ExtType, Type, VName};

fn commas<T: fmt::Display>(xs: &[T]) -> String {
    xs.iter()
        .map(|x| x.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn render_unexpected(exp: &str, got: &Type, allowed: &[Type]) -> String {
    if allowed.is_empty() {
        format!("type of expression {exp} cannot have type {got} (possibly a bug in the type checker)")
    } else {
        format!(
            "expression {exp} has type {got}, but one of {{{}}} is required",
            commas(allowed)
        )
    }
}

fn render_perm(perm: &[usize], rank: &usize, array: &Option<VName>) -> String {
    let of = match array {
        Some(a) => format!(" of array {a}"),
        None => String::new(),
    };
    format!(
        "permutation ({}) is not valid for rank {rank}{of}",
        commas(perm)
    )
}

fn render_pattern(pattern: &str, types: &[ExtType], note: &Option<String>) -> String {
    let extra = match note {
        Some(n) => format!(": {n}"),
        None => String::new(),
    };
    format!(
        "pattern {pattern} cannot match value of type {{{}}}{extra}",
        commas(types)
    )
}

fn render_mismatch(func: &Option<String>, expected: &[Type], got: &[Type]) -> String {
    let who = match func {
        Some(f) => format!("function {f}"),
        None => "anonymous function".to_string(),
    };
    format!(
        "{who} expects {} argument(s) of type(s) {{{}}}, but got {} argument(s) of type(s) {{{}}}",
        expected.len(),
        commas(expected),
        got.len(),
        commas(got)
    )
}

/// Every way a program can be rejected. One case per failure mode,
/// each with a structured payload and a canonical rendering.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum ErrorCase {
    #[error("{0}")]
    TypeError(String),
    #[error("cannot unify type {t1} of expression {e1} with type {t2} of expression {e2}")]
    UnifyError {
        e1: String,
        t1: Type,
        e2: String,
        t2: Type,
    },
    #[error("{}", render_unexpected(.exp, .got, .allowed))]
    UnexpectedType {
        exp: String,
        got: Type,
        allowed: Vec<Type>,
    },
    #[error(
        "function {func} declares return type {{{}}}, but body has type {{{}}}",
        commas(.declared),
        commas(.got)
    )]
    ReturnTypeError {
        func: String,
        declared: Vec<ExtType>,
        got: Vec<ExtType>,
    },
    #[error("duplicate definition of function {func}")]
    DupDefinitionError { func: String },
    #[error("parameter {param} bound twice in function {func}")]
    DupParamError { func: String, param: VName },
    #[error("variable {name} bound twice in pattern")]
    DupPatternError { name: VName },
    #[error("{}", render_pattern(.pattern, .types, .note))]
    InvalidPatternError {
        pattern: String,
        types: Vec<ExtType>,
        note: Option<String>,
    },
    #[error("unknown variable {name}")]
    UnknownVariableError { name: VName },
    #[error("unknown function {func}")]
    UnknownFunctionError { func: String },
    #[error("{}", render_mismatch(.func, .expected, .got))]
    ParameterMismatch {
        func: Option<String>,
        expected: Vec<Type>,
        got: Vec<Type>,
    },
    #[error("variable {name} referenced after being consumed")]
    UseAfterConsume { name: VName },
    #[error("array has rank {rank}, but is indexed with {got} index(es)")]
    IndexingError { rank: usize, got: usize },
    #[error("annotation of {desc} is {{{}}}, but derived to be {{{}}}", commas(.expected), commas(.got))]
    BadAnnotation {
        desc: String,
        expected: Vec<ExtType>,
        got: Vec<ExtType>,
    },
    #[error("unique return value of function {func} is aliased to parameter {name}, which is not consumed")]
    ReturnAliased { func: String, name: VName },
    #[error("unique return value of function {func} is aliased to another return value")]
    UniqueReturnAliased { func: String },
    #[error("variable {name} has type {ty}; expected an array")]
    NotAnArray { name: VName, ty: Type },
    #[error("{}", render_perm(.perm, .rank, .array))]
    PermutationError {
        perm: Vec<usize>,
        rank: usize,
        array: Option<VName>,
    },
}

fn render_error(breadcrumbs: &[String], case: &ErrorCase) -> String {
    let mut out = String::new();
    for crumb in breadcrumbs {
        out.push_str(crumb);
        out.push_str(":\n");
    }
    out.push_str(&case.to_string());
    out
}

/// A rejected program: the failure case together with the breadcrumb
/// trail as it stood at the raise site, outermost context first.
#[derive(Clone, Debug, PartialEq, Error, Diagnostic)]
#[error("{}", render_error(.breadcrumbs, .case))]
#[diagnostic(code(prism::check))]
pub struct TypeError {
    pub breadcrumbs: Vec<String>,
    pub case: ErrorCase,
}

impl TypeError {
    /// An error raised outside any context.
    pub fn bare(case: ErrorCase) -> Self {
        TypeError {
            breadcrumbs: Vec::new(),
            case,
        }
    }
}
