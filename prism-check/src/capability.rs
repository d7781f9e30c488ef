#![forbid(unsafe_code)]

use prism_ir::{Body, Exp, ExtType, Lore, NoOp, Param, Pattern, Plain, PrimType, Type, VName};

use crate::check::TypeChecker;
use crate::error::TypeError;

/// What an IR flavor must supply for its programs to be checkable.
///
/// The attribute hooks verify flavor-specific annotations; the match
/// hooks decide how patterns and declared return types are compared
/// against derived types; `check_op` verifies the flavor's own
/// operators. Every hook has the full checker machinery at its
/// disposal. The capability is fixed per top-level invocation — all
/// dispatch is static.
pub trait Checkable: Lore {
    fn check_exp_attr(_ck: &mut TypeChecker<Self>, _attr: &Self::ExpAttr) -> Result<(), TypeError> {
        Ok(())
    }

    fn check_body_attr(
        _ck: &mut TypeChecker<Self>,
        _attr: &Self::BodyAttr,
    ) -> Result<(), TypeError> {
        Ok(())
    }

    fn check_let_bound_attr(
        _ck: &mut TypeChecker<Self>,
        _name: &VName,
        _attr: &Self::LetAttr,
    ) -> Result<(), TypeError> {
        Ok(())
    }

    fn check_fparam_attr(
        _ck: &mut TypeChecker<Self>,
        _name: &VName,
        _attr: &Self::FParamAttr,
    ) -> Result<(), TypeError> {
        Ok(())
    }

    fn check_lparam_attr(
        _ck: &mut TypeChecker<Self>,
        _name: &VName,
        _attr: &Self::LParamAttr,
    ) -> Result<(), TypeError> {
        Ok(())
    }

    /// Check a declared return type; by default its free dimensions
    /// must be in scope with type `i32`.
    fn check_ret_type(ck: &mut TypeChecker<Self>, ret: &[ExtType]) -> Result<(), TypeError> {
        ck.check_ret_type_dims(ret)
    }

    /// Check that a pattern can bind the results of an expression.
    fn match_pattern(
        ck: &mut TypeChecker<Self>,
        pattern: &Pattern<Self>,
        exp: &Exp<Self>,
    ) -> Result<(), TypeError> {
        ck.match_pattern_default(pattern, exp)
    }

    /// Check a body's result against a declared return type.
    fn match_return_type(
        ck: &mut TypeChecker<Self>,
        fname: &str,
        ret: &[ExtType],
        body: &Body<Self>,
    ) -> Result<(), TypeError> {
        ck.match_return_type_default(fname, ret, body)
    }

    /// A scalar function parameter, used when seeding the builtin
    /// function table.
    fn prim_fparam(name: VName, t: PrimType) -> Param<Self::FParamAttr>;

    /// Check a flavor-specific operator.
    fn check_op(ck: &mut TypeChecker<Self>, op: &Self::Op) -> Result<(), TypeError>;

    /// The statically known result types of a flavor-specific operator.
    fn op_ext_type(op: &Self::Op) -> Vec<ExtType>;
}

impl Checkable for Plain {
    fn prim_fparam(name: VName, t: PrimType) -> Param<()> {
        Param::new(name, Type::Prim(t), ())
    }

    fn check_op(_ck: &mut TypeChecker<Self>, op: &NoOp) -> Result<(), TypeError> {
        match *op {}
    }

    fn op_ext_type(op: &NoOp) -> Vec<ExtType> {
        match *op {}
    }
}
