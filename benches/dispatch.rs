//! Benchmarks for intercepted calls.
//!
//! Measures the cost of a call through the reference runtime:
//! - unhooked
//! - hooked with a single pass-through callback
//! - hooked with a chain of four callbacks
//! - overridden in a before callback (original skipped)
//! - original invocation of a hooked function

extern crate cilplant;

use std::{hint::black_box, sync::Arc};

use cilplant::{
    config::EngineConfig,
    emulation::{EmulatedRuntime, MethodBuilder, TypeBuilder},
    hook::HookPriority,
    metadata::{
        method::FunctionIdentity,
        signatures::{MethodSig, ScalarKind, TypeName, TypeSig},
    },
    Engine, Value,
};
use criterion::{criterion_group, criterion_main, Criterion};

fn add_sig() -> MethodSig {
    let i4 = TypeSig::Scalar(ScalarKind::I4);
    MethodSig::static_method(i4.clone(), vec![i4.clone(), i4])
}

fn add() -> FunctionIdentity {
    FunctionIdentity::new(TypeName::parse("Bench.Calculator"), "Add", add_sig())
}

fn setup() -> (Arc<EmulatedRuntime>, Engine) {
    let runtime = EmulatedRuntime::new().unwrap();
    runtime
        .load(
            TypeBuilder::new("Bench.Calculator")
                .method(MethodBuilder::new("Add", add_sig()).body(|asm, _| {
                    asm.ldarg(0)?.ldarg(1)?.add()?.ret()?;
                    Ok(())
                }))
                .build()
                .unwrap(),
        )
        .unwrap();
    let runtime = Arc::new(runtime);
    let engine = Engine::initialize(runtime.clone(), EngineConfig::default()).unwrap();
    (runtime, engine)
}

fn call(runtime: &EmulatedRuntime) -> Value {
    runtime
        .invoke(&add(), None, black_box(&[Value::I4(1), Value::I4(2)]))
        .unwrap()
}

/// Benchmark a call of a function that is not intercepted.
fn bench_unhooked(c: &mut Criterion) {
    let (runtime, _engine) = setup();

    c.bench_function("dispatch_unhooked", |b| {
        b.iter(|| black_box(call(&runtime)));
    });
}

/// Benchmark a call through one pass-through callback.
fn bench_single_callback(c: &mut Criterion) {
    let (runtime, engine) = setup();
    let _handle = engine
        .hook_before(&add(), HookPriority::NORMAL, |_| Ok(()))
        .unwrap();

    c.bench_function("dispatch_single_callback", |b| {
        b.iter(|| black_box(call(&runtime)));
    });
}

/// Benchmark a call through a chain of four callbacks with both phases.
fn bench_callback_chain(c: &mut Criterion) {
    let (runtime, engine) = setup();
    let _handles: Vec<_> = (0..4)
        .map(|priority| {
            engine
                .hook_after(&add(), HookPriority(priority), |ctx| {
                    ctx.set_result(ctx.result()?)
                })
                .unwrap()
        })
        .collect();

    c.bench_function("dispatch_callback_chain", |b| {
        b.iter(|| black_box(call(&runtime)));
    });
}

/// Benchmark a call overridden before the original runs.
fn bench_override(c: &mut Criterion) {
    let (runtime, engine) = setup();
    let _handle = engine
        .hook_before(&add(), HookPriority::NORMAL, |ctx| ctx.set_result(Value::I4(0)))
        .unwrap();

    c.bench_function("dispatch_override", |b| {
        b.iter(|| black_box(call(&runtime)));
    });
}

/// Benchmark original invocation of a hooked function.
fn bench_invoke_original(c: &mut Criterion) {
    let (_runtime, engine) = setup();
    let _handle = engine
        .hook_before(&add(), HookPriority::NORMAL, |ctx| ctx.set_result(Value::I4(0)))
        .unwrap();

    c.bench_function("dispatch_invoke_original", |b| {
        b.iter(|| {
            black_box(
                engine
                    .invoke_original(&add(), None, black_box(&[Value::I4(1), Value::I4(2)]))
                    .unwrap(),
            )
        });
    });
}

criterion_group!(
    benches,
    bench_unhooked,
    bench_single_callback,
    bench_callback_chain,
    bench_override,
    bench_invoke_original
);
criterion_main!(benches);
