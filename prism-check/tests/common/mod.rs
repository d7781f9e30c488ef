#![allow(dead_code)]

use prism_ir::{
    Body, Exp, ExtType, FunDef, Lore, Param, PatElem, Pattern, Prog, Stmt, SubExp, Type,
    Uniqueness, VName, INT32,
};

pub fn v(base: &str, tag: u32) -> VName {
    VName::new(base, tag)
}

pub fn var(base: &str, tag: u32) -> SubExp {
    SubExp::Var(v(base, tag))
}

pub fn c(i: i64) -> SubExp {
    SubExp::int32(i)
}

pub fn i32_t() -> Type {
    Type::Prim(INT32)
}

pub fn arr(dims: &[SubExp]) -> Type {
    Type::array(INT32, dims.to_vec(), Uniqueness::Nonunique)
}

pub fn uarr(dims: &[SubExp]) -> Type {
    Type::array(INT32, dims.to_vec(), Uniqueness::Unique)
}

pub fn ext(t: &Type) -> ExtType {
    t.into()
}

pub fn param(name: VName, ty: Type) -> Param<()> {
    Param::new(name, ty, ())
}

pub fn pat<L: Lore<LetAttr = ()>>(elems: Vec<(VName, Type)>) -> Pattern<L> {
    Pattern::new(
        elems
            .into_iter()
            .map(|(name, ty)| PatElem::new(name, ty, ()))
            .collect(),
    )
}

pub fn let_bind<L: Lore<LetAttr = (), ExpAttr = ()>>(
    name: VName,
    ty: Type,
    exp: Exp<L>,
) -> Stmt<L> {
    Stmt {
        pattern: pat(vec![(name, ty)]),
        attr: (),
        exp,
    }
}

pub fn let_pat<L: Lore<LetAttr = (), ExpAttr = ()>>(
    elems: Vec<(VName, Type)>,
    exp: Exp<L>,
) -> Stmt<L> {
    Stmt {
        pattern: pat(elems),
        attr: (),
        exp,
    }
}

pub fn body_of<L: Lore<BodyAttr = ()>>(stmts: Vec<Stmt<L>>, result: Vec<SubExp>) -> Body<L> {
    Body {
        attr: (),
        stmts,
        result,
    }
}

pub fn fundef<L: Lore<FParamAttr = ()>>(
    name: &str,
    params: Vec<Param<()>>,
    ret: Vec<ExtType>,
    body: Body<L>,
) -> FunDef<L> {
    FunDef {
        name: name.to_string(),
        ret,
        params,
        body,
    }
}

pub fn prog_of<L: Lore>(funs: Vec<FunDef<L>>) -> Prog<L> {
    Prog { funs }
}
