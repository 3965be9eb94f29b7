//! Demo program shared by the integration tests.
//!
//! - `Demo.Calculator`: `static int32 Add(int32, int32)`, `static int32 SafeDivide(int32, int32)`
//!   catching `DivideByZeroException`, `static int32 GuardedAdd()` catching any exception
//!   raised by `Add`
//! - `Demo.Point`: field `X`, constructor `.ctor(int32)` storing its argument
//! - `Demo.Shape` (virtual `Area` returning 0) and `Demo.Circle` (override returning 3)
//! - `Demo.Scalars`: `static T Echo{n}(T)` for every scalar kind
//! - `Demo.Clock`: native `static int64 Ticks()` returning 42
//!
//! `Demo.Calculator` also has `static int32 Fail()`, which always throws an `Exception`.

#![allow(dead_code)]

use std::sync::Arc;

use cilplant::{
    config::EngineConfig,
    emulation::{
        corlib::{self, DIVIDE_BY_ZERO_EXCEPTION, EXCEPTION, OBJECT},
        EmulatedRuntime, MethodBuilder, TypeBuilder,
    },
    metadata::{
        method::FunctionIdentity,
        signatures::{MethodSig, ScalarKind, TypeName, TypeSig},
    },
    Engine, Result, Value,
};

pub fn i4() -> TypeSig {
    TypeSig::Scalar(ScalarKind::I4)
}

pub fn r8() -> TypeSig {
    TypeSig::Scalar(ScalarKind::R8)
}

fn binary() -> MethodSig {
    MethodSig::static_method(i4(), vec![i4(), i4()])
}

pub fn add() -> FunctionIdentity {
    FunctionIdentity::new(TypeName::parse("Demo.Calculator"), "Add", binary())
}

pub fn safe_divide() -> FunctionIdentity {
    FunctionIdentity::new(TypeName::parse("Demo.Calculator"), "SafeDivide", binary())
}

pub fn guarded_add() -> FunctionIdentity {
    FunctionIdentity::new(
        TypeName::parse("Demo.Calculator"),
        "GuardedAdd",
        MethodSig::static_method(i4(), vec![]),
    )
}

pub fn fail() -> FunctionIdentity {
    FunctionIdentity::new(
        TypeName::parse("Demo.Calculator"),
        "Fail",
        MethodSig::static_method(i4(), vec![]),
    )
}

pub fn ticks() -> FunctionIdentity {
    FunctionIdentity::new(
        TypeName::parse("Demo.Clock"),
        "Ticks",
        MethodSig::static_method(TypeSig::Scalar(ScalarKind::I8), vec![]),
    )
}

pub fn point_ctor() -> FunctionIdentity {
    corlib::constructor("Demo.Point", vec![i4()])
}

pub fn area(ty: &str) -> FunctionIdentity {
    FunctionIdentity::new(TypeName::parse(ty), "Area", MethodSig::instance(r8(), vec![]))
}

/// One sample value per scalar kind.
pub fn scalar_samples() -> Vec<Value> {
    vec![
        Value::Bool(true),
        Value::Char(0x41),
        Value::I1(-5),
        Value::U1(200),
        Value::I2(-300),
        Value::U2(60_000),
        Value::I4(-70_000),
        Value::U4(4_000_000_000),
        Value::I8(-(1 << 40)),
        Value::U8(u64::MAX),
        Value::R4(1.5),
        Value::R8(-2.25),
    ]
}

pub fn echo(index: usize, kind: ScalarKind) -> FunctionIdentity {
    FunctionIdentity::new(
        TypeName::parse("Demo.Scalars"),
        format!("Echo{index}"),
        MethodSig::static_method(TypeSig::Scalar(kind), vec![TypeSig::Scalar(kind)]),
    )
}

fn calculator() -> Result<cilplant::image::TypeImage> {
    TypeBuilder::new("Demo.Calculator")
        .method(MethodBuilder::new("Add", binary()).body(|asm, _| {
            asm.ldarg(0)?.ldarg(1)?.add()?.ret()?;
            Ok(())
        }))
        .method(
            MethodBuilder::new("SafeDivide", binary())
                .local(i4())
                .catch(
                    "try",
                    "try_end",
                    "handler",
                    "end",
                    TypeSig::class(DIVIDE_BY_ZERO_EXCEPTION),
                )
                .body(|asm, _| {
                    asm.label("try")?
                        .ldarg(0)?
                        .ldarg(1)?
                        .div()?
                        .stloc(0)?
                        .leave("end")?
                        .label("try_end")?
                        .handler_label("handler")?
                        .pop()?
                        .ldc_i4(-1)?
                        .stloc(0)?
                        .leave("end")?
                        .label("end")?
                        .ldloc(0)?
                        .ret()?;
                    Ok(())
                }),
        )
        .method(
            MethodBuilder::new("GuardedAdd", MethodSig::static_method(i4(), vec![]))
                .local(i4())
                .catch("try", "try_end", "handler", "end", TypeSig::class(EXCEPTION))
                .body(|asm, refs| {
                    let add = refs.own_method("Add", binary())?;
                    asm.label("try")?
                        .ldc_i4(1)?
                        .ldc_i4(2)?
                        .call(add, 2, true)?
                        .stloc(0)?
                        .leave("end")?
                        .label("try_end")?
                        .handler_label("handler")?
                        .pop()?
                        .ldc_i4(-100)?
                        .stloc(0)?
                        .leave("end")?
                        .label("end")?
                        .ldloc(0)?
                        .ret()?;
                    Ok(())
                }),
        )
        .method(
            MethodBuilder::new("Fail", MethodSig::static_method(i4(), vec![])).body(|asm, refs| {
                let ctor = refs.method(&corlib::constructor(EXCEPTION, vec![TypeSig::String]))?;
                let message = refs.string("fail")?;
                asm.ldstr(message)?.newobj(ctor, 1)?.throw()?;
                Ok(())
            }),
        )
        .build()
}

fn clock() -> Result<cilplant::image::TypeImage> {
    TypeBuilder::new("Demo.Clock")
        .method(MethodBuilder::new("Ticks", ticks().signature).native())
        .build()
}

fn point() -> Result<cilplant::image::TypeImage> {
    TypeBuilder::new("Demo.Point")
        .field("X", i4())
        .method(MethodBuilder::constructor(vec![i4()]).body(|asm, refs| {
            let base = refs.method(&corlib::constructor(OBJECT, vec![]))?;
            let x = refs.field("X")?;
            asm.ldarg(0)?
                .call(base, 1, false)?
                .ldarg(0)?
                .ldarg(1)?
                .stfld(x)?
                .ret()?;
            Ok(())
        }))
        .build()
}

fn shapes() -> Result<Vec<cilplant::image::TypeImage>> {
    let default_ctor = |base: &'static str| {
        MethodBuilder::constructor(vec![]).body(move |asm, refs| {
            let base = refs.method(&corlib::constructor(base, vec![]))?;
            asm.ldarg(0)?.call(base, 1, false)?.ret()?;
            Ok(())
        })
    };
    let area = |value: f64| {
        MethodBuilder::new("Area", MethodSig::instance(r8(), vec![]))
            .virtual_()
            .body(move |asm, _| {
                asm.ldc_r8(value)?.ret()?;
                Ok(())
            })
    };

    Ok(vec![
        TypeBuilder::new("Demo.Shape")
            .method(default_ctor(OBJECT))
            .method(area(0.0))
            .build()?,
        TypeBuilder::new("Demo.Circle")
            .base(Some("Demo.Shape"))
            .method(default_ctor("Demo.Shape"))
            .method(area(3.0))
            .build()?,
    ])
}

fn scalars() -> Result<cilplant::image::TypeImage> {
    let mut builder = TypeBuilder::new("Demo.Scalars");
    for (index, sample) in scalar_samples().iter().enumerate() {
        let Some(kind) = sample.scalar_kind() else {
            continue;
        };
        let sig = echo(index, kind).signature;
        builder = builder.method(MethodBuilder::new(format!("Echo{index}"), sig).body(|asm, _| {
            asm.ldarg(0)?.ret()?;
            Ok(())
        }));
    }
    builder.build()
}

/// Routes the crate's log output through the test harness; set `RUST_LOG` to see it.
pub fn init_logging() {
    let _ = env_logger::Builder::new()
        .filter_module("cilplant", log::LevelFilter::Warn)
        .parse_default_env()
        .is_test(true)
        .format_timestamp(None)
        .try_init();
}

/// A runtime with the demo program loaded.
pub fn runtime() -> Arc<EmulatedRuntime> {
    init_logging();
    let runtime = EmulatedRuntime::new().unwrap();
    runtime.load(calculator().unwrap()).unwrap();
    runtime.load(point().unwrap()).unwrap();
    runtime.load_all(shapes().unwrap()).unwrap();
    runtime.load(scalars().unwrap()).unwrap();
    runtime.load(clock().unwrap()).unwrap();
    runtime
        .register_native(&ticks(), |_, _| Ok(Value::I8(42)))
        .unwrap();
    Arc::new(runtime)
}

/// The demo runtime with an engine attached.
pub fn setup() -> (Arc<EmulatedRuntime>, Engine) {
    let runtime = runtime();
    let engine = Engine::initialize(runtime.clone(), EngineConfig::default()).unwrap();
    (runtime, engine)
}

pub fn call_add(runtime: &EmulatedRuntime, a: i32, b: i32) -> Value {
    runtime
        .invoke(&add(), None, &[Value::I4(a), Value::I4(b)])
        .unwrap()
}
