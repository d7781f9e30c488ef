#![forbid(unsafe_code)]

use std::fmt;

use crate::lore::Lore;
use crate::name::{Names, VName};
use crate::prim::{BinOp, CmpOp, ConvOp, PrimType, PrimValue, UnOp};
use crate::types::{Diet, ExtType, Type};

/// The leaves of expressions: constants and variable references.
#[derive(Clone, Debug, PartialEq)]
pub enum SubExp {
    Constant(PrimValue),
    Var(VName),
}

impl SubExp {
    pub fn int32(v: i64) -> Self {
        SubExp::Constant(PrimValue::int32(v))
    }
}

impl fmt::Display for SubExp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubExp::Constant(v) => write!(f, "{v}"),
            SubExp::Var(v) => write!(f, "{v}"),
        }
    }
}

/// A function or lambda parameter with its declared type.
#[derive(Clone, Debug, PartialEq)]
pub struct Param<A> {
    pub name: VName,
    pub ty: Type,
    pub attr: A,
}

impl<A> Param<A> {
    pub fn new(name: VName, ty: Type, attr: A) -> Self {
        Param { name, ty, attr }
    }

    pub fn diet(&self) -> Diet {
        self.ty.diet()
    }
}

impl<A> fmt::Display for Param<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.ty)
    }
}

/// One bound name in a pattern. `aliases` is filled in by the alias
/// pass; a freshly built element carries the empty set.
#[derive(Clone, Debug, PartialEq)]
pub struct PatElem<L: Lore> {
    pub name: VName,
    pub ty: Type,
    pub aliases: Names,
    pub attr: L::LetAttr,
}

impl<L: Lore> PatElem<L> {
    pub fn new(name: VName, ty: Type, attr: L::LetAttr) -> Self {
        PatElem {
            name,
            ty,
            aliases: Names::new(),
            attr,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Pattern<L: Lore> {
    pub elems: Vec<PatElem<L>>,
}

impl<L: Lore> Pattern<L> {
    pub fn new(elems: Vec<PatElem<L>>) -> Self {
        Pattern { elems }
    }

    pub fn names(&self) -> impl Iterator<Item = &VName> {
        self.elems.iter().map(|pe| &pe.name)
    }
}

impl<L: Lore> fmt::Display for Pattern<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        let mut sep = "";
        for pe in &self.elems {
            write!(f, "{sep}{}", pe.name)?;
            sep = ", ";
        }
        write!(f, "}}")
    }
}

/// A let-binding: pattern, flavor attribute, expression.
#[derive(Clone, Debug, PartialEq)]
pub struct Stmt<L: Lore> {
    pub pattern: Pattern<L>,
    pub attr: L::ExpAttr,
    pub exp: Exp<L>,
}

/// A sequence of bindings ending in a result list.
#[derive(Clone, Debug, PartialEq)]
pub struct Body<L: Lore> {
    pub attr: L::BodyAttr,
    pub stmts: Vec<Stmt<L>>,
    pub result: Vec<SubExp>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum LoopForm {
    For { var: VName, bound: SubExp },
    While(VName),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Exp<L: Lore> {
    SubExp(SubExp),
    ArrayLit {
        elems: Vec<SubExp>,
        elem_ty: Type,
    },
    BinOp {
        op: BinOp,
        x: SubExp,
        y: SubExp,
    },
    UnOp {
        op: UnOp,
        x: SubExp,
    },
    CmpOp {
        op: CmpOp,
        x: SubExp,
        y: SubExp,
    },
    ConvOp {
        op: ConvOp,
        x: SubExp,
    },
    /// `array[i_0, ..., i_k]`, guarded by certificates.
    Index {
        certs: Vec<VName>,
        array: VName,
        indexes: Vec<SubExp>,
    },
    Iota {
        n: SubExp,
    },
    Replicate {
        n: SubExp,
        value: SubExp,
    },
    /// An uninitialised array of the given element type and dims.
    Scratch {
        elem: PrimType,
        dims: Vec<SubExp>,
    },
    Reshape {
        certs: Vec<VName>,
        new_shape: Vec<SubExp>,
        array: VName,
    },
    Rearrange {
        certs: Vec<VName>,
        perm: Vec<usize>,
        array: VName,
    },
    Split {
        certs: Vec<VName>,
        sizes: Vec<SubExp>,
        array: VName,
    },
    Concat {
        certs: Vec<VName>,
        first: VName,
        rest: Vec<VName>,
        result_size: SubExp,
    },
    Copy {
        array: VName,
    },
    Assert {
        cond: SubExp,
    },
    /// Split `arrays` into `n` equivalence classes per `flags`.
    /// Results are the `n` class sizes followed by the permuted arrays.
    Partition {
        certs: Vec<VName>,
        n: usize,
        flags: VName,
        arrays: Vec<VName>,
    },
    If {
        cond: SubExp,
        then_body: Body<L>,
        else_body: Body<L>,
        ret: Vec<ExtType>,
    },
    Apply {
        func: String,
        args: Vec<SubExp>,
        ret: Vec<ExtType>,
    },
    DoLoop {
        merge: Vec<(Param<L::FParamAttr>, SubExp)>,
        form: LoopForm,
        body: Body<L>,
    },
    Op(L::Op),
}

impl<L: Lore> fmt::Display for Exp<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn commas<T: fmt::Display>(f: &mut fmt::Formatter<'_>, xs: &[T]) -> fmt::Result {
            let mut sep = "";
            for x in xs {
                write!(f, "{sep}{x}")?;
                sep = ", ";
            }
            Ok(())
        }
        match self {
            Exp::SubExp(se) => write!(f, "{se}"),
            Exp::ArrayLit { elems, .. } => {
                write!(f, "[")?;
                commas(f, elems)?;
                write!(f, "]")
            }
            Exp::BinOp { op, x, y } => write!(f, "{op}({x}, {y})"),
            Exp::UnOp { op, x } => write!(f, "{op}({x})"),
            Exp::CmpOp { op, x, y } => write!(f, "{op}({x}, {y})"),
            Exp::ConvOp { op, x } => write!(f, "{op}({x})"),
            Exp::Index { array, indexes, .. } => {
                write!(f, "{array}[")?;
                commas(f, indexes)?;
                write!(f, "]")
            }
            Exp::Iota { n } => write!(f, "iota({n})"),
            Exp::Replicate { n, value } => write!(f, "replicate({n}, {value})"),
            Exp::Scratch { elem, dims } => {
                write!(f, "scratch({elem}")?;
                for d in dims {
                    write!(f, ", {d}")?;
                }
                write!(f, ")")
            }
            Exp::Reshape {
                new_shape, array, ..
            } => {
                write!(f, "reshape((")?;
                commas(f, new_shape)?;
                write!(f, "), {array})")
            }
            Exp::Rearrange { perm, array, .. } => {
                write!(f, "rearrange((")?;
                commas(f, perm)?;
                write!(f, "), {array})")
            }
            Exp::Split { sizes, array, .. } => {
                write!(f, "split((")?;
                commas(f, sizes)?;
                write!(f, "), {array})")
            }
            Exp::Concat { first, rest, .. } => {
                write!(f, "concat({first}")?;
                for r in rest {
                    write!(f, ", {r}")?;
                }
                write!(f, ")")
            }
            Exp::Copy { array } => write!(f, "copy({array})"),
            Exp::Assert { cond } => write!(f, "assert({cond})"),
            Exp::Partition { n, flags, arrays, .. } => {
                write!(f, "partition({n}, {flags}")?;
                for a in arrays {
                    write!(f, ", {a}")?;
                }
                write!(f, ")")
            }
            Exp::If { cond, .. } => write!(f, "if {cond} then ... else ..."),
            Exp::Apply { func, args, .. } => {
                write!(f, "{func}(")?;
                commas(f, args)?;
                write!(f, ")")
            }
            Exp::DoLoop { merge, form, .. } => {
                write!(f, "loop {{")?;
                let mut sep = "";
                for (p, se) in merge {
                    write!(f, "{sep}{} = {se}", p.name)?;
                    sep = ", ";
                }
                write!(f, "}} ")?;
                match form {
                    LoopForm::For { var, bound } => write!(f, "for {var} < {bound}"),
                    LoopForm::While(cond) => write!(f, "while {cond}"),
                }
            }
            Exp::Op(op) => write!(f, "{op}"),
        }
    }
}

/// An anonymous function with concrete return types.
#[derive(Clone, Debug, PartialEq)]
pub struct Lambda<L: Lore> {
    pub params: Vec<Param<L::LParamAttr>>,
    pub body: Body<L>,
    pub ret: Vec<Type>,
}

/// An anonymous function whose return types may be existential.
#[derive(Clone, Debug, PartialEq)]
pub struct ExtLambda<L: Lore> {
    pub params: Vec<Param<L::LParamAttr>>,
    pub body: Body<L>,
    pub ret: Vec<ExtType>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FunDef<L: Lore> {
    pub name: String,
    pub ret: Vec<ExtType>,
    pub params: Vec<Param<L::FParamAttr>>,
    pub body: Body<L>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Prog<L: Lore> {
    pub funs: Vec<FunDef<L>>,
}
