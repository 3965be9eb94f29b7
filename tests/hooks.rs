//! End-to-end hooking against the reference runtime.
//!
//! Every test builds the demo program, attaches an engine and calls the program the way
//! managed code would, through [`EmulatedRuntime::invoke`] and
//! [`EmulatedRuntime::construct`].

mod common;

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

use cilplant::{
    config::EngineConfig,
    emulation::corlib::EXCEPTION,
    hook::{HookPriority, MethodHook},
    metadata::{
        method::FunctionIdentity,
        signatures::{MethodSig, TypeName, TypeSig},
    },
    runtime::RuntimeBridge,
    value::ObjectRef,
    Error, Value,
};
use common::*;

#[test]
fn test_override_and_unhook_add() {
    let (runtime, engine) = setup();
    assert_eq!(call_add(&runtime, 1, 2), Value::I4(3));

    let handle = engine
        .hook_before(&add(), HookPriority::NORMAL, |ctx| {
            let sum = ctx.arg(0)?.as_i4()? + ctx.arg(1)?.as_i4()?;
            ctx.set_result(Value::I4(-sum))
        })
        .unwrap();
    assert!(engine.is_hooked(&add()));
    assert_eq!(call_add(&runtime, 1, 2), Value::I4(-3));

    handle.unhook().unwrap();
    assert!(!handle.is_active());
    assert!(!engine.is_hooked(&add()));
    assert_eq!(call_add(&runtime, 1, 2), Value::I4(3));
}

#[test]
fn test_priorities_compose_results() {
    let (runtime, engine) = setup();

    let _plus_one = engine
        .hook_before(&add(), HookPriority(53), |ctx| {
            let sum = ctx.arg(0)?.as_i4()? + ctx.arg(1)?.as_i4()?;
            ctx.set_result(Value::I4(sum + 1))
        })
        .unwrap();
    let _double = engine
        .hook_before(&add(), HookPriority(51), |ctx| {
            let current = ctx.result()?.as_i4()?;
            ctx.set_result(Value::I4(current * 2))
        })
        .unwrap();

    assert_eq!(engine.active_chain(&add()).len(), 2);
    assert_eq!(call_add(&runtime, 1, 2), Value::I4(8));
}

#[test]
fn test_after_callback_doubles_result() {
    let (runtime, engine) = setup();
    let _handle = engine
        .hook_after(&add(), HookPriority::NORMAL, |ctx| {
            ctx.set_result(Value::I4(ctx.result()?.as_i4()? * 2))
        })
        .unwrap();

    assert_eq!(call_add(&runtime, 1, 2), Value::I4(6));
}

#[test]
fn test_constructor_argument_rewrite() {
    let (runtime, engine) = setup();
    let _handle = engine
        .hook_before(&point_ctor(), HookPriority::NORMAL, |ctx| {
            assert_eq!(ctx.arg(0)?, Value::I4(1));
            ctx.set_arg(0, Value::I4(-1))
        })
        .unwrap();

    let point = runtime.construct(&point_ctor(), &[Value::I4(1)]).unwrap();
    assert_eq!(point.as_object().unwrap().field("X"), Value::I4(-1));
}

#[test]
fn test_unhook_restores_pristine_representation() {
    let (runtime, engine) = setup();
    let calculator = TypeName::parse("Demo.Calculator");
    let pristine = runtime.compiled_representation(&calculator).unwrap();

    let first = engine
        .hook_before(&add(), HookPriority::NORMAL, |_| Ok(()))
        .unwrap();
    let second = engine
        .hook_after(&safe_divide(), HookPriority::NORMAL, |_| Ok(()))
        .unwrap();
    assert_ne!(runtime.compiled_representation(&calculator).unwrap(), pristine);

    first.unhook().unwrap();
    assert_ne!(runtime.compiled_representation(&calculator).unwrap(), pristine);
    second.unhook().unwrap();
    assert_eq!(runtime.compiled_representation(&calculator).unwrap(), pristine);

    // unhooking twice is a no-op
    first.unhook().unwrap();
    assert_eq!(call_add(&runtime, 20, 22), Value::I4(42));
}

#[test]
fn test_scalar_round_trip() {
    let (runtime, engine) = setup();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let mut handles = Vec::new();
    for (index, sample) in scalar_samples().into_iter().enumerate() {
        let kind = sample.scalar_kind().unwrap();
        let seen = seen.clone();
        let handle = engine
            .hook(
                &echo(index, kind),
                Arc::new(
                    MethodHook::new("echo")
                        .before(|ctx| {
                            let value = ctx.arg(0)?;
                            ctx.set_arg(0, value)
                        })
                        .after(move |ctx| {
                            seen.lock().unwrap().push(ctx.result()?);
                            Ok(())
                        }),
                ),
                HookPriority::NORMAL,
            )
            .unwrap();
        handles.push(handle);

        let result = runtime
            .invoke(&echo(index, kind), None, &[sample.clone()])
            .unwrap();
        assert_eq!(result, sample);
        assert_eq!(result.scalar_kind(), Some(kind));
    }

    assert_eq!(*seen.lock().unwrap(), scalar_samples());
}

#[test]
fn test_exception_clauses_survive_rewriting() {
    let (runtime, engine) = setup();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let _handle = engine
        .hook_before(&safe_divide(), HookPriority::NORMAL, move |_| {
            counter.fetch_add(1, Ordering::Relaxed);
            Ok(())
        })
        .unwrap();

    let divide = |a, b| runtime.invoke(&safe_divide(), None, &[Value::I4(a), Value::I4(b)]);
    assert_eq!(divide(8, 2).unwrap(), Value::I4(4));
    assert_eq!(divide(7, 0).unwrap(), Value::I4(-1));
    assert_eq!(calls.load(Ordering::Relaxed), 2);
}

#[test]
fn test_thrown_override_reaches_managed_caller() {
    let (runtime, engine) = setup();
    let _handle = engine
        .hook_before(&add(), HookPriority::NORMAL, |ctx| {
            ctx.set_throwable(Value::Object(ObjectRef::exception(
                TypeName::parse(EXCEPTION),
                "add is disabled",
            )))
        })
        .unwrap();

    match runtime.invoke(&add(), None, &[Value::I4(1), Value::I4(2)]) {
        Err(Error::TargetInvocation(Value::Object(exception))) => {
            assert_eq!(exception.message().as_deref(), Some("add is disabled"));
        }
        other => panic!("expected a managed exception, got {:?}", other),
    }
    assert_eq!(runtime.invoke(&guarded_add(), None, &[]).unwrap(), Value::I4(-100));
}

#[test]
fn test_failing_callbacks_are_isolated() {
    let (runtime, engine) = setup();
    let observed = Arc::new(AtomicUsize::new(0));

    let _failing = engine
        .hook_before(&add(), HookPriority::HIGH, |_| {
            Err(Error::Runtime("callback failed".to_string()))
        })
        .unwrap();
    let _panicking = engine
        .hook_after(&add(), HookPriority::LOW, |_| panic!("callback panicked"))
        .unwrap();
    let counter = observed.clone();
    let _observer = engine
        .hook_after(&add(), HookPriority::LOWEST, move |_| {
            counter.fetch_add(1, Ordering::Relaxed);
            Ok(())
        })
        .unwrap();

    assert_eq!(call_add(&runtime, 1, 2), Value::I4(3));
    assert_eq!(observed.load(Ordering::Relaxed), 1);
}

#[test]
fn test_mistyped_result_throws_invalid_cast() {
    let (runtime, engine) = setup();
    let _handle = engine
        .hook_before(&add(), HookPriority::NORMAL, |ctx| {
            ctx.set_result(Value::from("three"))
        })
        .unwrap();

    match runtime.invoke(&add(), None, &[Value::I4(1), Value::I4(2)]) {
        Err(Error::TargetInvocation(Value::Object(exception))) => {
            assert_eq!(
                exception.type_name().full_name(),
                "System.InvalidCastException"
            );
        }
        other => panic!("expected InvalidCastException, got {:?}", other),
    }
}

#[test]
fn test_invalid_targets() {
    let (_runtime, engine) = setup();
    let invalid = |target: FunctionIdentity| {
        matches!(
            engine.hook_before(&target, HookPriority::NORMAL, |_| Ok(())),
            Err(Error::InvalidTarget(_))
        )
    };

    assert!(invalid(cilplant::emulation::corlib::constructor(EXCEPTION, vec![])));
    let mut unknown = add();
    unknown.name = "Subtract".to_string();
    assert!(invalid(unknown));
    assert_eq!(engine.hook_counter(), 0);
}

#[test]
fn test_unhookable_functions_register_nothing() {
    let runtime = runtime();
    let engine = cilplant::Engine::initialize(
        runtime.clone(),
        EngineConfig::default().with_foundational_types_denied(false),
    )
    .unwrap();
    let rejected = |target: &FunctionIdentity, reason: &str| {
        let result = engine.hook_before(target, HookPriority::NORMAL, |_| Ok(()));
        assert!(
            matches!(&result, Err(Error::InvalidTarget(message)) if message.contains(reason)),
            "{target}: {:?}",
            result.map(|handle| handle.id())
        );
        assert!(!engine.is_hooked(target));
    };

    rejected(&ticks(), "native");
    rejected(
        &FunctionIdentity::new(
            TypeName::parse("System.Int32"),
            "GetHashCode",
            MethodSig::instance(i4(), vec![]),
        ),
        "Primitive",
    );
    rejected(
        &FunctionIdentity::new(
            TypeName::parse("Demo.Point[]"),
            "Get",
            MethodSig::instance(TypeSig::class("Demo.Point"), vec![i4()]),
        ),
        "Array",
    );

    assert_eq!(engine.hook_counter(), 0);
    assert_eq!(runtime.invoke(&ticks(), None, &[]).unwrap(), Value::I8(42));
}

#[test]
fn test_mistyped_argument_rewrite_throws_invalid_cast() {
    let (runtime, engine) = setup();
    let _handle = engine
        .hook_before(&add(), HookPriority::NORMAL, |ctx| ctx.set_arg(0, Value::R8(2.9)))
        .unwrap();

    match runtime.invoke(&add(), None, &[Value::I4(1), Value::I4(2)]) {
        Err(Error::TargetInvocation(Value::Object(exception))) => {
            assert_eq!(
                exception.type_name().full_name(),
                "System.InvalidCastException"
            );
        }
        other => panic!("expected InvalidCastException, got {:?}", other),
    }
}

#[test]
fn test_shutdown_restores_everything() {
    let (runtime, engine) = setup();
    let calculator = TypeName::parse("Demo.Calculator");
    let pristine = runtime.compiled_representation(&calculator).unwrap();

    let handle = engine
        .hook_before(&add(), HookPriority::NORMAL, |ctx| ctx.set_result(Value::I4(0)))
        .unwrap();
    engine.shutdown().unwrap();

    assert!(!handle.is_active());
    assert_eq!(runtime.compiled_representation(&calculator).unwrap(), pristine);
    assert_eq!(call_add(&runtime, 1, 2), Value::I4(3));
    assert!(matches!(
        engine.hook_before(&add(), HookPriority::NORMAL, |_| Ok(())),
        Err(Error::IllegalState(_))
    ));

    // the runtime can host a new engine, with its own entry type
    let second = cilplant::Engine::initialize(runtime.clone(), Default::default()).unwrap();
    let _handle = second
        .hook_before(&add(), HookPriority::NORMAL, |ctx| ctx.set_result(Value::I4(7)))
        .unwrap();
    assert_eq!(call_add(&runtime, 1, 2), Value::I4(7));
    second.shutdown().unwrap();
    assert_eq!(call_add(&runtime, 1, 2), Value::I4(3));
}
