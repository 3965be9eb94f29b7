//! Target validation.
//!
//! A function can be hooked only if it has a CIL body the rewriter can prepend a prologue
//! to, and if intercepting it cannot break the engine itself: the dispatcher, the
//! interpreter of callbacks and the runtime bridge all rely on the foundational types
//! listed here.

use std::{collections::HashSet, sync::OnceLock};

use strum::IntoEnumIterator;

use crate::{
    config::EngineConfig,
    metadata::{
        method::{FunctionIdentity, MethodDef},
        signatures::{ScalarKind, TypeName, TypeSig},
        typesystem::{TypeKind, TypeResolver},
    },
    value::Value,
    Result,
};

const FOUNDATIONAL_TYPES: &[&str] = &[
    "System.Object",
    "System.String",
    "System.Type",
    "System.ValueType",
    "System.Enum",
    "System.Array",
    "System.Buffer",
    "System.Delegate",
    "System.MulticastDelegate",
    "System.Exception",
    "System.SystemException",
    "System.InvalidCastException",
    "System.NullReferenceException",
    "System.IndexOutOfRangeException",
    "System.Text.StringBuilder",
    "System.Collections.Hashtable",
    "System.Collections.Generic.List`1",
    "System.Collections.Generic.Dictionary`2",
    "System.Collections.Concurrent.ConcurrentDictionary`2",
    "System.Runtime.CompilerServices.RuntimeHelpers",
];

/// Namespaces whose every type is foundational.
const FOUNDATIONAL_NAMESPACES: &[&str] = &["System.Reflection"];

/// Functions that stay denied even when exempted.
const ALWAYS_DENIED: &[(&str, &str)] = &[("System.Array", "Copy"), ("System.Buffer", "BlockCopy")];

fn foundational_types() -> &'static HashSet<TypeName> {
    static TYPES: OnceLock<HashSet<TypeName>> = OnceLock::new();
    TYPES.get_or_init(|| {
        FOUNDATIONAL_TYPES
            .iter()
            .map(|name| TypeName::parse(name))
            .chain(ScalarKind::iter().map(ScalarKind::wrapper))
            .collect()
    })
}

/// True if `ty` is on the foundational deny list.
#[must_use]
pub fn is_foundational(ty: &TypeName) -> bool {
    foundational_types().contains(ty)
        || FOUNDATIONAL_NAMESPACES
            .iter()
            .any(|namespace| ty.in_namespace(namespace))
}

/// Resolves `function` to its definition and checks that it has a CIL body.
///
/// # Errors
/// Returns [`crate::Error::InvalidTarget`] for unknown functions, functions of array and
/// primitive types, abstract and native functions.
pub fn resolve_function<R>(resolver: &R, function: &FunctionIdentity) -> Result<MethodDef>
where
    R: TypeResolver + ?Sized,
{
    let declaring = resolver
        .resolve_type(&function.declaring)
        .ok_or_else(|| invalid_target!("Unknown type {}", function.declaring))?;

    if matches!(declaring.kind, TypeKind::Array | TypeKind::Primitive) {
        return Err(invalid_target!(
            "{} is declared on {:?} type {}",
            function,
            declaring.kind,
            declaring.name
        ));
    }

    let method = declaring
        .methods
        .iter()
        .find(|method| &method.identity == function)
        .ok_or_else(|| invalid_target!("No function {}", function))?;

    if method.is_abstract() {
        return Err(invalid_target!("{} is abstract", function));
    }
    if method.is_native() {
        return Err(invalid_target!("{} is native", function));
    }

    Ok(method.clone())
}

/// Finds the first argument that cannot be stored in its parameter of `function`.
///
/// Returns the parameter index and type. Reference parameters accept `null`; scalar
/// parameters require the exact scalar kind.
pub fn mismatched_argument<'a, R>(
    resolver: &R,
    function: &'a FunctionIdentity,
    args: &[Value],
) -> Option<(usize, &'a TypeSig)>
where
    R: TypeResolver + ?Sized,
{
    function
        .signature
        .params
        .iter()
        .zip(args)
        .enumerate()
        .find(|(_, (param, arg))| !resolver.is_instance(arg, param))
        .map(|(index, (param, _))| (index, param))
}

/// Checks that `args` match the parameter list of `function` in number and type.
///
/// # Errors
/// Returns [`crate::Error::InvalidTarget`] on a count or type mismatch.
pub fn check_arguments<R>(resolver: &R, function: &FunctionIdentity, args: &[Value]) -> Result<()>
where
    R: TypeResolver + ?Sized,
{
    if args.len() != function.signature.params.len() {
        return Err(invalid_target!(
            "{} takes {} arguments, {} given",
            function,
            function.signature.params.len(),
            args.len()
        ));
    }
    match mismatched_argument(resolver, function, args) {
        Some((index, param)) => Err(invalid_target!(
            "Argument {} of {} must be {}, got {}",
            index,
            function,
            param,
            args[index].type_description()
        )),
        None => Ok(()),
    }
}

/// Checks that `function` may be hooked under `config`.
///
/// # Errors
/// Returns [`crate::Error::InvalidTarget`] for every rejected target; see
/// [`resolve_function`] for the structural checks.
pub fn check_hook_target<R>(
    config: &EngineConfig,
    resolver: &R,
    function: &FunctionIdentity,
) -> Result<MethodDef>
where
    R: TypeResolver + ?Sized,
{
    if function.declaring.in_namespace(&config.generated_namespace) {
        return Err(invalid_target!(
            "{} belongs to the engine's generated types",
            function
        ));
    }

    let declaring = function.declaring.full_name();
    if ALWAYS_DENIED
        .iter()
        .any(|(ty, name)| declaring == *ty && function.name == *name)
    {
        return Err(invalid_target!("Hooking {} is not allowed", function));
    }

    if function.is_static_initializer() {
        return Err(invalid_target!("Static initializers cannot be hooked"));
    }

    if !config.exempt_functions.contains(function) {
        if config.denied_types.contains(&function.declaring) {
            return Err(invalid_target!("Type {} is denied", function.declaring));
        }
        if config.deny_foundational_types && is_foundational(&function.declaring) {
            return Err(invalid_target!(
                "Hooking foundational type {} is not allowed",
                function.declaring
            ));
        }
    }

    resolve_function(resolver, function)
}
