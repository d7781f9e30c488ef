#![forbid(unsafe_code)]

use std::fmt;

use crate::alias::{analyze_lambda, AliasTable};
use crate::ir::{Lambda, SubExp};
use crate::lore::{Lore, OpAliases};
use crate::name::{Names, VName};
use crate::types::{static_shapes, ExtType, Type, Uniqueness};

/// The lore of the SOAC-bearing IR stage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Soacs;

impl Lore for Soacs {
    type ExpAttr = ();
    type BodyAttr = ();
    type LetAttr = ();
    type FParamAttr = ();
    type LParamAttr = ();
    type Op = Soac;
}

/// Second-order array combinators. The combinators themselves are
/// opaque to the checker; their widths, array arguments and argument
/// lambdas are not.
#[derive(Clone, Debug, PartialEq)]
pub enum Soac {
    Map {
        width: SubExp,
        lambda: Lambda<Soacs>,
        arrays: Vec<VName>,
    },
    Reduce {
        width: SubExp,
        lambda: Lambda<Soacs>,
        neutral: Vec<SubExp>,
        arrays: Vec<VName>,
    },
    Scan {
        width: SubExp,
        lambda: Lambda<Soacs>,
        neutral: Vec<SubExp>,
        arrays: Vec<VName>,
    },
}

impl Soac {
    pub fn lambda(&self) -> &Lambda<Soacs> {
        match self {
            Soac::Map { lambda, .. } | Soac::Reduce { lambda, .. } | Soac::Scan { lambda, .. } => {
                lambda
            }
        }
    }

    pub fn width(&self) -> &SubExp {
        match self {
            Soac::Map { width, .. } | Soac::Reduce { width, .. } | Soac::Scan { width, .. } => {
                width
            }
        }
    }

    /// The statically known result types.
    pub fn ext_type(&self) -> Vec<ExtType> {
        match self {
            Soac::Map { width, lambda, .. } | Soac::Scan { width, lambda, .. } => static_shapes(
                &lambda
                    .ret
                    .iter()
                    .map(|t| Type::array_of(t, width.clone(), Uniqueness::Nonunique))
                    .collect::<Vec<_>>(),
            ),
            Soac::Reduce { lambda, .. } => static_shapes(&lambda.ret),
        }
    }
}

impl OpAliases for Soac {
    fn analyze(&self, table: &AliasTable) -> Self {
        match self {
            Soac::Map {
                width,
                lambda,
                arrays,
            } => Soac::Map {
                width: width.clone(),
                lambda: analyze_lambda(table, lambda),
                arrays: arrays.clone(),
            },
            Soac::Reduce {
                width,
                lambda,
                neutral,
                arrays,
            } => Soac::Reduce {
                width: width.clone(),
                lambda: analyze_lambda(table, lambda),
                neutral: neutral.clone(),
                arrays: arrays.clone(),
            },
            Soac::Scan {
                width,
                lambda,
                neutral,
                arrays,
            } => Soac::Scan {
                width: width.clone(),
                lambda: analyze_lambda(table, lambda),
                neutral: neutral.clone(),
                arrays: arrays.clone(),
            },
        }
    }

    fn result_aliases(&self, _: &AliasTable) -> Vec<Names> {
        // combinator results are fresh arrays
        vec![Names::new(); self.lambda().ret.len()]
    }
}

impl fmt::Display for Soac {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (name, arrays) = match self {
            Soac::Map { arrays, .. } => ("map", arrays),
            Soac::Reduce { arrays, .. } => ("reduce", arrays),
            Soac::Scan { arrays, .. } => ("scan", arrays),
        };
        write!(f, "{name}(<fun>")?;
        for a in arrays {
            write!(f, ", {a}")?;
        }
        write!(f, ")")
    }
}
