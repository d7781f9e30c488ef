//! The uniqueness and aliasing discipline: consumption at most once
//! per control-flow path, alias invalidation, unique-return rules.

use prism_check::{check_prog, check_prog_no_uniqueness, ErrorCase};
use prism_ir::{Exp, ExtType, FunDef, LoopForm, Param, Plain, PrimType, PrimValue, SubExp, Type, INT32};

mod common;
use common::*;

type PExp = Exp<Plain>;

/// A function with one unique parameter it never touches.
fn sink() -> FunDef<Plain> {
    fundef(
        "sink",
        vec![param(v("s", 90), uarr(&[c(3)]))],
        vec![ExtType::Prim(INT32)],
        body_of(vec![], vec![c(0)]),
    )
}

/// A function returning its unique parameter uniquely.
fn reuse() -> FunDef<Plain> {
    fundef(
        "reuse",
        vec![param(v("r", 91), uarr(&[c(3)]))],
        vec![ext(&uarr(&[c(3)]))],
        body_of(vec![], vec![var("r", 91)]),
    )
}

fn apply_sink(x: &str, tag: u32) -> PExp {
    PExp::Apply {
        func: "sink".to_string(),
        args: vec![var(x, tag)],
        ret: vec![ExtType::Prim(INT32)],
    }
}

#[test]
fn s1_unique_return_of_unique_parameter_is_accepted() {
    let a = v("a", 0);
    let fun = fundef::<Plain>(
        "f",
        vec![param(a.clone(), uarr(&[c(3)]))],
        vec![ext(&uarr(&[c(3)]))],
        body_of(vec![], vec![SubExp::Var(a)]),
    );
    assert_eq!(check_prog(&prog_of(vec![fun])), Ok(()));
}

#[test]
fn unique_return_aliasing_observed_parameter_is_rejected() {
    let a = v("a", 0);
    let fun = fundef::<Plain>(
        "f",
        vec![param(a.clone(), arr(&[c(3)]))],
        vec![ext(&uarr(&[c(3)]))],
        body_of(vec![], vec![SubExp::Var(a.clone())]),
    );
    let err = check_prog(&prog_of(vec![fun])).unwrap_err();
    assert_eq!(
        err.case,
        ErrorCase::ReturnAliased {
            func: "f".to_string(),
            name: a
        }
    );
}

#[test]
fn s2_unique_return_of_copy_is_accepted() {
    let a = v("a", 0);
    let b = v("b", 1);
    let b2 = v("b2", 2);
    let fun = fundef::<Plain>(
        "f",
        vec![
            param(a, arr(&[c(3)])),
            param(b.clone(), uarr(&[c(3)])),
        ],
        vec![ext(&uarr(&[c(3)]))],
        body_of(
            vec![let_bind(b2.clone(), arr(&[c(3)]), PExp::Copy { array: b })],
            vec![SubExp::Var(b2)],
        ),
    );
    assert_eq!(check_prog(&prog_of(vec![fun])), Ok(()));
}

#[test]
fn s3_unique_tuple_element_aliasing_another_is_rejected() {
    let a = v("a", 0);
    let x = v("x", 1);
    let fun = fundef::<Plain>(
        "f",
        vec![param(a.clone(), arr(&[c(3)]))],
        vec![ext(&uarr(&[c(3)])), ext(&arr(&[c(3)]))],
        body_of(
            vec![let_bind(
                x.clone(),
                arr(&[c(3)]),
                PExp::SubExp(SubExp::Var(a)),
            )],
            vec![SubExp::Var(x.clone()), SubExp::Var(x)],
        ),
    );
    let err = check_prog(&prog_of(vec![fun])).unwrap_err();
    assert_eq!(
        err.case,
        ErrorCase::UniqueReturnAliased {
            func: "f".to_string()
        }
    );
}

#[test]
fn s4_use_through_alias_after_consumption_is_rejected() {
    let a = v("a", 0);
    let x = v("x", 1);
    let fun = fundef::<Plain>(
        "f",
        vec![param(a.clone(), uarr(&[c(3)]))],
        vec![ExtType::Prim(INT32)],
        body_of(
            vec![
                let_bind(x.clone(), arr(&[c(3)]), PExp::SubExp(SubExp::Var(a))),
                let_bind(v("t", 2), i32_t(), apply_sink("x", 1)),
                let_bind(
                    v("w", 3),
                    i32_t(),
                    PExp::Index {
                        certs: vec![],
                        array: x,
                        indexes: vec![c(0)],
                    },
                ),
            ],
            vec![var("w", 3)],
        ),
    );
    let err = check_prog(&prog_of(vec![sink(), fun])).unwrap_err();
    assert!(matches!(err.case, ErrorCase::UseAfterConsume { .. }));
}

#[test]
fn s4_is_accepted_without_uniqueness_checking() {
    let a = v("a", 0);
    let x = v("x", 1);
    let fun = fundef::<Plain>(
        "f",
        vec![param(a.clone(), uarr(&[c(3)]))],
        vec![ExtType::Prim(INT32)],
        body_of(
            vec![
                let_bind(x.clone(), arr(&[c(3)]), PExp::SubExp(SubExp::Var(a))),
                let_bind(v("t", 2), i32_t(), apply_sink("x", 1)),
                let_bind(
                    v("w", 3),
                    i32_t(),
                    PExp::Index {
                        certs: vec![],
                        array: x,
                        indexes: vec![c(0)],
                    },
                ),
            ],
            vec![var("w", 3)],
        ),
    );
    assert_eq!(
        check_prog_no_uniqueness(&prog_of(vec![sink(), fun])),
        Ok(())
    );
}

fn branching_consumer(observe_after: bool) -> Vec<FunDef<Plain>> {
    let cb = v("c", 0);
    let xs = v("xs", 1);
    let then_body = body_of(
        vec![let_bind(v("t", 2), i32_t(), apply_sink("xs", 1))],
        vec![var("t", 2)],
    );
    let else_body = body_of(
        vec![let_bind(
            v("u", 3),
            i32_t(),
            PExp::Index {
                certs: vec![],
                array: xs.clone(),
                indexes: vec![c(0)],
            },
        )],
        vec![var("u", 3)],
    );
    let mut stmts = vec![let_bind(
        v("r", 4),
        i32_t(),
        PExp::If {
            cond: SubExp::Var(cb.clone()),
            then_body,
            else_body,
            ret: vec![ExtType::Prim(INT32)],
        },
    )];
    let result = if observe_after {
        stmts.push(let_bind(
            v("w", 5),
            i32_t(),
            PExp::Index {
                certs: vec![],
                array: xs.clone(),
                indexes: vec![c(0)],
            },
        ));
        vec![var("w", 5)]
    } else {
        vec![var("r", 4)]
    };
    vec![
        sink(),
        fundef(
            "f",
            vec![
                param(cb, Type::Prim(PrimType::Bool)),
                param(xs, uarr(&[c(3)])),
            ],
            vec![ExtType::Prim(INT32)],
            body_of(stmts, result),
        ),
    ]
}

#[test]
fn s5_observation_after_branch_consumption_is_rejected() {
    let err = check_prog(&prog_of(branching_consumer(true))).unwrap_err();
    assert!(matches!(err.case, ErrorCase::UseAfterConsume { .. }));
}

#[test]
fn branch_consumption_without_later_use_is_accepted() {
    assert_eq!(check_prog(&prog_of(branching_consumer(false))), Ok(()));
}

#[test]
fn consuming_an_observed_parameter_is_rejected() {
    let a = v("a", 0);
    let fun = fundef::<Plain>(
        "f",
        vec![param(a, arr(&[c(3)]))],
        vec![ExtType::Prim(INT32)],
        body_of(
            vec![let_bind(v("t", 1), i32_t(), apply_sink("a", 0))],
            vec![var("t", 1)],
        ),
    );
    let err = check_prog(&prog_of(vec![sink(), fun])).unwrap_err();
    match err.case {
        ErrorCase::TypeError(msg) => assert!(msg.contains("invalidly consumed")),
        other => panic!("expected TypeError, got {other:?}"),
    }
}

#[test]
fn loop_may_consume_its_unique_merge_parameter() {
    let a = v("a", 0);
    let xs = v("xs", 1);
    let i = v("i", 2);
    let ys = v("ys", 3);
    let z = v("z", 4);
    let loop_body = body_of(
        vec![let_bind(
            ys.clone(),
            arr(&[c(3)]),
            PExp::Apply {
                func: "reuse".to_string(),
                args: vec![SubExp::Var(xs.clone())],
                ret: vec![ext(&uarr(&[c(3)]))],
            },
        )],
        vec![SubExp::Var(ys)],
    );
    let fun = fundef::<Plain>(
        "f",
        vec![param(a.clone(), uarr(&[c(3)]))],
        vec![ExtType::Prim(INT32)],
        body_of(
            vec![let_bind(
                z,
                arr(&[c(3)]),
                PExp::DoLoop {
                    merge: vec![(Param::new(xs, uarr(&[c(3)]), ()), SubExp::Var(a))],
                    form: LoopForm::For { var: i, bound: c(3) },
                    body: loop_body,
                },
            )],
            vec![c(0)],
        ),
    );
    assert_eq!(check_prog(&prog_of(vec![reuse(), fun])), Ok(()));
}

#[test]
fn loop_consuming_an_observed_parameter_is_rejected() {
    let a = v("a", 0);
    let xs = v("xs", 1);
    let fun = fundef::<Plain>(
        "f",
        vec![param(a.clone(), arr(&[c(3)]))],
        vec![ExtType::Prim(INT32)],
        body_of(
            vec![let_bind(
                v("z", 2),
                arr(&[c(3)]),
                PExp::DoLoop {
                    merge: vec![(Param::new(xs.clone(), uarr(&[c(3)]), ()), SubExp::Var(a))],
                    form: LoopForm::For {
                        var: v("i", 3),
                        bound: c(3),
                    },
                    body: body_of(vec![], vec![SubExp::Var(xs)]),
                },
            )],
            vec![c(0)],
        ),
    );
    let err = check_prog(&prog_of(vec![fun])).unwrap_err();
    match err.case {
        ErrorCase::TypeError(msg) => assert!(msg.contains("invalidly consumed")),
        other => panic!("expected TypeError, got {other:?}"),
    }
}

#[test]
fn observing_after_the_loop_consumed_the_argument_is_rejected() {
    let a = v("a", 0);
    let xs = v("xs", 1);
    let fun = fundef::<Plain>(
        "f",
        vec![param(a.clone(), uarr(&[c(3)]))],
        vec![ExtType::Prim(INT32)],
        body_of(
            vec![
                let_bind(
                    v("z", 2),
                    arr(&[c(3)]),
                    PExp::DoLoop {
                        merge: vec![(
                            Param::new(xs.clone(), uarr(&[c(3)]), ()),
                            SubExp::Var(a.clone()),
                        )],
                        form: LoopForm::For {
                            var: v("i", 3),
                            bound: c(3),
                        },
                        body: body_of(vec![], vec![SubExp::Var(xs)]),
                    },
                ),
                let_bind(
                    v("w", 4),
                    i32_t(),
                    PExp::Index {
                        certs: vec![],
                        array: a,
                        indexes: vec![c(0)],
                    },
                ),
            ],
            vec![var("w", 4)],
        ),
    );
    let err = check_prog(&prog_of(vec![fun])).unwrap_err();
    assert!(matches!(err.case, ErrorCase::UseAfterConsume { .. }));
}

#[test]
fn while_loop_condition_must_be_a_boolean_merge_parameter() {
    let go = v("go", 0);
    let acc = v("acc", 1);
    let mk = |form: LoopForm| {
        fundef::<Plain>(
            "f",
            vec![],
            vec![ExtType::Prim(INT32)],
            body_of(
                vec![let_pat(
                    vec![(v("g2", 2), Type::Prim(PrimType::Bool)), (v("a2", 3), i32_t())],
                    PExp::DoLoop {
                        merge: vec![
                            (
                                Param::new(go.clone(), Type::Prim(PrimType::Bool), ()),
                                SubExp::Constant(PrimValue::Bool(true)),
                            ),
                            (Param::new(acc.clone(), i32_t(), ()), c(0)),
                        ],
                        form,
                        body: body_of(
                            vec![],
                            vec![
                                SubExp::Constant(PrimValue::Bool(false)),
                                SubExp::Var(acc.clone()),
                            ],
                        ),
                    },
                )],
                vec![var("a2", 3)],
            ),
        )
    };
    assert_eq!(
        check_prog(&prog_of(vec![mk(LoopForm::While(v("go", 0)))])),
        Ok(())
    );
    let unknown = check_prog(&prog_of(vec![mk(LoopForm::While(v("zzz", 9)))])).unwrap_err();
    assert!(matches!(unknown.case, ErrorCase::TypeError(_)));
    let not_bool = check_prog(&prog_of(vec![mk(LoopForm::While(v("acc", 1)))])).unwrap_err();
    assert!(matches!(not_bool.case, ErrorCase::UnexpectedType { .. }));
}
