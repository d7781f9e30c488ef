#![forbid(unsafe_code)]

//! The type checker and uniqueness/aliasing analyzer of the prism IR.
//!
//! The checker takes an alias-annotated program and either accepts it
//! as well-typed and correctly consuming, or returns one structured
//! [`TypeError`] describing the first violation, with the breadcrumb
//! trail of the context it was found in. [`check_prog`] enforces the
//! full uniqueness discipline; [`check_prog_no_uniqueness`] verifies
//! types and shapes only.
//!
//! The checker is generic over the IR flavor via [`Checkable`]; the
//! flavor supplies checks for its own annotations and operators, with
//! the full machinery of [`TypeChecker`] available to its hooks.

pub mod capability;
pub mod check;
pub mod error;
pub mod occurrence;

mod soacs;

pub use capability::Checkable;
pub use check::{
    builtin_ftable, check_prog, check_prog_no_uniqueness, Arg, FunBinding, NameInfo, TypeChecker,
};
pub use error::{ErrorCase, TypeError};
pub use occurrence::{
    all_consumed, alt_occurrences, seq_occurrences, unoccur, Consumption, Occurrence,
};
