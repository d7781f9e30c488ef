#![forbid(unsafe_code)]

use std::fmt;

use crate::ir::SubExp;
use crate::name::{Names, VName};
use crate::prim::PrimType;

/// Whether a declared value may be destructively consumed.
///
/// `Unique` is the stronger mode: a unique value may stand wherever a
/// nonunique one is expected, never the other way around.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Uniqueness {
    Nonunique,
    Unique,
}

/// What a call does to an argument, derived from the parameter's
/// declared uniqueness.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Diet {
    Consume,
    Observe,
}

/// A concrete array shape: one size expression per dimension,
/// outermost first.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Shape {
    pub dims: Vec<SubExp>,
}

impl Shape {
    pub fn new(dims: Vec<SubExp>) -> Self {
        Shape { dims }
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }
}

/// A dimension that is either concrete or an existential placeholder
/// bound at a pattern position.
#[derive(Clone, Debug, PartialEq)]
pub enum ExtDim {
    Free(SubExp),
    Ext(usize),
}

impl fmt::Display for ExtDim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtDim::Free(se) => write!(f, "{se}"),
            ExtDim::Ext(i) => write!(f, "?{i}"),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExtShape {
    pub dims: Vec<ExtDim>,
}

impl ExtShape {
    pub fn new(dims: Vec<ExtDim>) -> Self {
        ExtShape { dims }
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }
}

/// A value type: scalar, or array of scalars with a concrete shape.
#[derive(Clone, Debug, PartialEq)]
pub enum Type {
    Prim(PrimType),
    Array {
        elem: PrimType,
        shape: Shape,
        uniqueness: Uniqueness,
    },
}

impl Type {
    pub fn array(elem: PrimType, dims: Vec<SubExp>, uniqueness: Uniqueness) -> Self {
        Type::Array {
            elem,
            shape: Shape::new(dims),
            uniqueness,
        }
    }

    pub fn is_prim(&self) -> bool {
        matches!(self, Type::Prim(_))
    }

    pub fn rank(&self) -> usize {
        match self {
            Type::Prim(_) => 0,
            Type::Array { shape, .. } => shape.rank(),
        }
    }

    pub fn elem_type(&self) -> PrimType {
        match self {
            Type::Prim(t) => *t,
            Type::Array { elem, .. } => *elem,
        }
    }

    pub fn uniqueness(&self) -> Uniqueness {
        match self {
            Type::Prim(_) => Uniqueness::Nonunique,
            Type::Array { uniqueness, .. } => *uniqueness,
        }
    }

    pub fn is_unique(&self) -> bool {
        self.uniqueness() == Uniqueness::Unique
    }

    pub fn diet(&self) -> Diet {
        if self.is_unique() {
            Diet::Consume
        } else {
            Diet::Observe
        }
    }

    pub fn set_uniqueness(self, uniqueness: Uniqueness) -> Type {
        match self {
            Type::Prim(t) => Type::Prim(t),
            Type::Array { elem, shape, .. } => Type::Array {
                elem,
                shape,
                uniqueness,
            },
        }
    }

    /// The type with `n` outer dimensions removed. Scalar once the
    /// shape runs out.
    pub fn strip_dims(&self, n: usize) -> Type {
        match self {
            Type::Prim(t) => Type::Prim(*t),
            Type::Array {
                elem,
                shape,
                uniqueness,
            } => {
                if n >= shape.rank() {
                    Type::Prim(*elem)
                } else {
                    Type::Array {
                        elem: *elem,
                        shape: Shape::new(shape.dims[n..].to_vec()),
                        uniqueness: *uniqueness,
                    }
                }
            }
        }
    }

    /// The type of one element along the outermost dimension.
    pub fn row_type(&self) -> Type {
        self.strip_dims(1)
    }

    /// An array of `row`s with the given outer size.
    pub fn array_of(row: &Type, outer: SubExp, uniqueness: Uniqueness) -> Type {
        match row {
            Type::Prim(t) => Type::Array {
                elem: *t,
                shape: Shape::new(vec![outer]),
                uniqueness,
            },
            Type::Array { elem, shape, .. } => {
                let mut dims = Vec::with_capacity(shape.rank() + 1);
                dims.push(outer);
                dims.extend(shape.dims.iter().cloned());
                Type::Array {
                    elem: *elem,
                    shape: Shape::new(dims),
                    uniqueness,
                }
            }
        }
    }

    /// Replace the outermost dimension.
    pub fn set_outer_dim(&self, outer: SubExp) -> Type {
        Type::array_of(&self.row_type(), outer, self.uniqueness())
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Prim(t) => write!(f, "{t}"),
            Type::Array {
                elem,
                shape,
                uniqueness,
            } => {
                if *uniqueness == Uniqueness::Unique {
                    write!(f, "*")?;
                }
                for d in &shape.dims {
                    write!(f, "[{d}]")?;
                }
                write!(f, "{elem}")
            }
        }
    }
}

/// A type whose shape may contain existential dimensions.
#[derive(Clone, Debug, PartialEq)]
pub enum ExtType {
    Prim(PrimType),
    Array {
        elem: PrimType,
        shape: ExtShape,
        uniqueness: Uniqueness,
    },
}

impl ExtType {
    pub fn array(elem: PrimType, dims: Vec<ExtDim>, uniqueness: Uniqueness) -> Self {
        ExtType::Array {
            elem,
            shape: ExtShape::new(dims),
            uniqueness,
        }
    }

    pub fn rank(&self) -> usize {
        match self {
            ExtType::Prim(_) => 0,
            ExtType::Array { shape, .. } => shape.rank(),
        }
    }

    pub fn elem_type(&self) -> PrimType {
        match self {
            ExtType::Prim(t) => *t,
            ExtType::Array { elem, .. } => *elem,
        }
    }

    pub fn uniqueness(&self) -> Uniqueness {
        match self {
            ExtType::Prim(_) => Uniqueness::Nonunique,
            ExtType::Array { uniqueness, .. } => *uniqueness,
        }
    }

    pub fn set_uniqueness(self, uniqueness: Uniqueness) -> ExtType {
        match self {
            ExtType::Prim(t) => ExtType::Prim(t),
            ExtType::Array { elem, shape, .. } => ExtType::Array {
                elem,
                shape,
                uniqueness,
            },
        }
    }

    /// The largest existential index mentioned, if any.
    fn max_ext(&self) -> Option<usize> {
        match self {
            ExtType::Prim(_) => None,
            ExtType::Array { shape, .. } => shape
                .dims
                .iter()
                .filter_map(|d| match d {
                    ExtDim::Ext(i) => Some(*i),
                    ExtDim::Free(_) => None,
                })
                .max(),
        }
    }
}

impl From<&Type> for ExtType {
    fn from(t: &Type) -> ExtType {
        match t {
            Type::Prim(p) => ExtType::Prim(*p),
            Type::Array {
                elem,
                shape,
                uniqueness,
            } => ExtType::Array {
                elem: *elem,
                shape: ExtShape::new(shape.dims.iter().cloned().map(ExtDim::Free).collect()),
                uniqueness: *uniqueness,
            },
        }
    }
}

impl fmt::Display for ExtType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtType::Prim(t) => write!(f, "{t}"),
            ExtType::Array {
                elem,
                shape,
                uniqueness,
            } => {
                if *uniqueness == Uniqueness::Unique {
                    write!(f, "*")?;
                }
                for d in &shape.dims {
                    write!(f, "[{d}]")?;
                }
                write!(f, "{elem}")
            }
        }
    }
}

/// Lift concrete types into extended types with all dimensions free.
pub fn static_shapes(ts: &[Type]) -> Vec<ExtType> {
    ts.iter().map(ExtType::from).collect()
}

/// Abstract every dimension that names a member of `bound` into an
/// existential. The same name always maps to the same index; fresh
/// indices start above any already present.
pub fn existentialize(bound: &Names, ts: Vec<ExtType>) -> Vec<ExtType> {
    let mut next = ts
        .iter()
        .filter_map(ExtType::max_ext)
        .max()
        .map_or(0, |m| m + 1);
    let mut assigned: Vec<(VName, usize)> = Vec::new();
    ts.into_iter()
        .map(|t| match t {
            ExtType::Prim(p) => ExtType::Prim(p),
            ExtType::Array {
                elem,
                shape,
                uniqueness,
            } => {
                let dims = shape
                    .dims
                    .into_iter()
                    .map(|d| match d {
                        ExtDim::Free(SubExp::Var(v)) if bound.contains(&v) => {
                            if let Some((_, i)) = assigned.iter().find(|(n, _)| *n == v) {
                                ExtDim::Ext(*i)
                            } else {
                                let i = next;
                                next += 1;
                                assigned.push((v, i));
                                ExtDim::Ext(i)
                            }
                        }
                        other => other,
                    })
                    .collect();
                ExtType::Array {
                    elem,
                    shape: ExtShape::new(dims),
                    uniqueness,
                }
            }
        })
        .collect()
}

/// The pointwise least upper bound of two extended type lists:
/// dimensions the sides agree on are kept, disagreeing dimensions are
/// replaced by existentials, consistently (the same pair of dims maps
/// to the same index).
pub fn generalize_ext_types(ts1: &[ExtType], ts2: &[ExtType]) -> Vec<ExtType> {
    let mut next = ts1
        .iter()
        .chain(ts2.iter())
        .filter_map(ExtType::max_ext)
        .max()
        .map_or(0, |m| m + 1);
    let mut memo: Vec<((ExtDim, ExtDim), usize)> = Vec::new();
    ts1.iter()
        .zip(ts2.iter())
        .map(|(t1, t2)| match (t1, t2) {
            (
                ExtType::Array {
                    elem: e1,
                    shape: s1,
                    uniqueness,
                },
                ExtType::Array {
                    elem: e2, shape: s2, ..
                },
            ) if e1 == e2 && s1.rank() == s2.rank() => {
                let dims = s1
                    .dims
                    .iter()
                    .zip(s2.dims.iter())
                    .map(|(d1, d2)| {
                        if d1 == d2 {
                            d1.clone()
                        } else if let Some((_, i)) =
                            memo.iter().find(|(pair, _)| pair.0 == *d1 && pair.1 == *d2)
                        {
                            ExtDim::Ext(*i)
                        } else {
                            let i = next;
                            next += 1;
                            memo.push(((d1.clone(), d2.clone()), i));
                            ExtDim::Ext(i)
                        }
                    })
                    .collect();
                ExtType::Array {
                    elem: *e1,
                    shape: ExtShape::new(dims),
                    uniqueness: *uniqueness,
                }
            }
            _ => t1.clone(),
        })
        .collect()
}

/// Structural subtyping on extended types. A dimension in the
/// supertype that is existential accepts anything; concrete dimensions
/// must agree. `Unique` is a subtype of `Nonunique`.
pub fn ext_subtype_of(sub: &ExtType, sup: &ExtType) -> bool {
    match (sub, sup) {
        (ExtType::Prim(a), ExtType::Prim(b)) => a == b,
        (
            ExtType::Array {
                elem: e1,
                shape: s1,
                uniqueness: u1,
            },
            ExtType::Array {
                elem: e2,
                shape: s2,
                uniqueness: u2,
            },
        ) => {
            e1 == e2
                && u1 >= u2
                && s1.rank() == s2.rank()
                && s1.dims.iter().zip(s2.dims.iter()).all(|(d1, d2)| match d2 {
                    ExtDim::Ext(_) => true,
                    ExtDim::Free(_) => d1 == d2,
                })
        }
        _ => false,
    }
}

pub fn ext_subtypes_of(subs: &[ExtType], sups: &[ExtType]) -> bool {
    subs.len() == sups.len()
        && subs
            .iter()
            .zip(sups.iter())
            .all(|(a, b)| ext_subtype_of(a, b))
}

/// Shape-insensitive compatibility: element type and rank only,
/// uniqueness ignored. Used at call and return boundaries, where exact
/// sizes are the business of the shape context rather than this
/// comparison.
pub fn rank_compatible(got: &Type, want: &Type) -> bool {
    got.elem_type() == want.elem_type()
        && got.rank() == want.rank()
        && got.is_prim() == want.is_prim()
}

pub fn ranks_compatible(got: &[Type], want: &[Type]) -> bool {
    got.len() == want.len()
        && got
            .iter()
            .zip(want.iter())
            .all(|(g, w)| rank_compatible(g, w))
}

pub fn ext_rank_compatible(got: &ExtType, want: &ExtType) -> bool {
    got.elem_type() == want.elem_type()
        && got.rank() == want.rank()
        && matches!(got, ExtType::Prim(_)) == matches!(want, ExtType::Prim(_))
}

pub fn ext_ranks_compatible(got: &[ExtType], want: &[ExtType]) -> bool {
    got.len() == want.len()
        && got
            .iter()
            .zip(want.iter())
            .all(|(g, w)| ext_rank_compatible(g, w))
}

/// Instantiate a declared return type against concrete arguments:
/// every free dimension naming a parameter is replaced by the
/// corresponding argument subexpression. `None` on arity mismatch.
pub fn apply_ret_type(
    ret: &[ExtType],
    param_names: &[VName],
    args: &[SubExp],
) -> Option<Vec<ExtType>> {
    if param_names.len() != args.len() {
        return None;
    }
    let subst = |d: &ExtDim| -> ExtDim {
        if let ExtDim::Free(SubExp::Var(v)) = d {
            if let Some(pos) = param_names.iter().position(|p| p == v) {
                return ExtDim::Free(args[pos].clone());
            }
        }
        d.clone()
    };
    Some(
        ret.iter()
            .map(|t| match t {
                ExtType::Prim(p) => ExtType::Prim(*p),
                ExtType::Array {
                    elem,
                    shape,
                    uniqueness,
                } => ExtType::Array {
                    elem: *elem,
                    shape: ExtShape::new(shape.dims.iter().map(subst).collect()),
                    uniqueness: *uniqueness,
                },
            })
            .collect(),
    )
}
