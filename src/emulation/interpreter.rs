//! CIL interpreter of the reference runtime.
//!
//! Executes one method body at a time; calls re-enter the runtime, which starts a new
//! frame. Managed exceptions travel as [`Error::TargetInvocation`] and are matched against
//! the typed catch clauses of every frame they pass. Finally and fault clauses are not
//! executed; `leave` only transfers control.

use std::collections::HashMap;

use crate::{
    assembly::{decode_stream, Instruction},
    emulation::{
        corlib::{
            DIVIDE_BY_ZERO_EXCEPTION, INDEX_OUT_OF_RANGE_EXCEPTION, INVALID_CAST_EXCEPTION,
            NULL_REFERENCE_EXCEPTION, OVERFLOW_EXCEPTION,
        },
        EmulatedRuntime,
    },
    image::{FieldRef, MethodImage, TypeImage},
    metadata::{
        method::{ExceptionClause, MethodDef},
        signatures::{ScalarKind, TypeSig},
        token::Token,
        typesystem::TypeResolver,
    },
    value::{ArrayRef, Value},
    Error, Result,
};

/// What the interpreter does after an instruction.
enum Flow {
    Next,
    Jump(u64),
    Return(Value),
}

/// Stack view of a numeric value.
#[derive(Clone, Copy)]
enum Numeric {
    I4(i32),
    I8(i64),
    F(f64),
}

impl Numeric {
    fn of(value: &Value) -> Result<Numeric> {
        match *value {
            Value::R4(v) => Ok(Numeric::F(f64::from(v))),
            Value::R8(v) => Ok(Numeric::F(v)),
            Value::I8(v) => Ok(Numeric::I8(v)),
            #[allow(clippy::cast_possible_wrap)]
            Value::U8(v) => Ok(Numeric::I8(v as i64)),
            _ => value.as_i4().map(Numeric::I4),
        }
    }

    /// Widens both operands to a common stack type.
    #[allow(clippy::cast_precision_loss)]
    fn widen(a: Numeric, b: Numeric) -> (Numeric, Numeric) {
        match (a, b) {
            (Numeric::I4(x), Numeric::I4(y)) => (Numeric::I4(x), Numeric::I4(y)),
            (Numeric::F(_), _) | (_, Numeric::F(_)) => (Numeric::F(a.as_f64()), Numeric::F(b.as_f64())),
            _ => (Numeric::I8(a.as_i64()), Numeric::I8(b.as_i64())),
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn as_i64(self) -> i64 {
        match self {
            Numeric::I4(v) => i64::from(v),
            Numeric::I8(v) => v,
            Numeric::F(v) => v as i64,
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn as_f64(self) -> f64 {
        match self {
            Numeric::I4(v) => f64::from(v),
            Numeric::I8(v) => v as f64,
            Numeric::F(v) => v,
        }
    }

    fn into_value(self) -> Value {
        match self {
            Numeric::I4(v) => Value::I4(v),
            Numeric::I8(v) => Value::I8(v),
            Numeric::F(v) => Value::R8(v),
        }
    }
}

/// Converts a stack value to the declared type of the location it is stored to.
///
/// Numeric values change representation; everything else is stored as is.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub(crate) fn coerce(value: Value, sig: &TypeSig) -> Value {
    let Some(kind) = sig.as_scalar() else {
        return value;
    };
    match value.scalar_kind() {
        Some(actual) if actual != kind => {}
        _ => return value,
    }
    let Ok(numeric) = Numeric::of(&value) else {
        return value;
    };

    let bits = numeric.as_i64();
    match kind {
        ScalarKind::Bool => Value::Bool(bits != 0),
        ScalarKind::Char => Value::Char(bits as u16),
        ScalarKind::I1 => Value::I1(bits as i8),
        ScalarKind::U1 => Value::U1(bits as u8),
        ScalarKind::I2 => Value::I2(bits as i16),
        ScalarKind::U2 => Value::U2(bits as u16),
        ScalarKind::I4 => Value::I4(bits as i32),
        ScalarKind::U4 => Value::U4(bits as u32),
        ScalarKind::I8 => Value::I8(bits),
        ScalarKind::U8 => Value::U8(bits as u64),
        ScalarKind::R4 => Value::R4(numeric.as_f64() as f32),
        ScalarKind::R8 => Value::R8(numeric.as_f64()),
    }
}

/// Runs `method` of `image` with `receiver` and `args` already coerced to its signature.
///
/// # Errors
/// Returns [`Error::TargetInvocation`] for uncaught managed exceptions and
/// [`Error::Malformed`] or [`Error::Runtime`] for code the interpreter cannot run.
pub(crate) fn execute(
    runtime: &EmulatedRuntime,
    image: &TypeImage,
    method: &MethodImage,
    receiver: Option<&Value>,
    args: &[Value],
) -> Result<Value> {
    let body = method
        .parsed_body()?
        .ok_or_else(|| Error::Runtime(format!("{} has no body", method.def)))?;
    let instructions = decode_stream(&body.code)?;
    let index: HashMap<u64, usize> = instructions
        .iter()
        .enumerate()
        .map(|(i, instruction)| (instruction.offset, i))
        .collect();

    let local_sigs = if body.local_var_sig_token.is_null() {
        Vec::new()
    } else {
        image.resolve_local_sig(body.local_var_sig_token)?.to_vec()
    };

    let mut frame = Frame {
        runtime,
        image,
        method: &method.def,
        args: receiver.cloned().into_iter().chain(args.iter().cloned()).collect(),
        locals: local_sigs.iter().map(Value::default_for).collect(),
        local_sigs,
        stack: Vec::with_capacity(usize::from(body.max_stack)),
        caught: None,
    };

    let jump = |target: u64| {
        index
            .get(&target)
            .copied()
            .ok_or_else(|| malformed_error!("Jump to 0x{:04x} in {}", target, method.def))
    };

    let mut pc = 0;
    loop {
        let Some(instruction) = instructions.get(pc) else {
            return Err(malformed_error!("Execution ran off the end of {}", method.def));
        };
        match frame.step(instruction) {
            Ok(Flow::Next) => pc += 1,
            Ok(Flow::Jump(target)) => pc = jump(target)?,
            Ok(Flow::Return(value)) => return Ok(value),
            Err(Error::TargetInvocation(exception)) => {
                let Some(handler) =
                    frame.find_handler(&body.exception_clauses, instruction.offset, &exception)?
                else {
                    return Err(Error::TargetInvocation(exception));
                };
                frame.stack.clear();
                frame.stack.push(exception.clone());
                frame.caught = Some(exception);
                pc = jump(handler)?;
            }
            Err(error) => return Err(error),
        }
    }
}

struct Frame<'a> {
    runtime: &'a EmulatedRuntime,
    image: &'a TypeImage,
    method: &'a MethodDef,
    args: Vec<Value>,
    locals: Vec<Value>,
    local_sigs: Vec<TypeSig>,
    stack: Vec<Value>,
    /// Exception of the innermost catch handler entered, for `rethrow`.
    caught: Option<Value>,
}

impl Frame<'_> {
    fn find_handler(
        &self,
        clauses: &[ExceptionClause],
        offset: u64,
        exception: &Value,
    ) -> Result<Option<u64>> {
        let Ok(offset) = u32::try_from(offset) else {
            return Ok(None);
        };
        for clause in clauses.iter().filter(|clause| clause.covers(offset)) {
            let Some(class) = clause.class_token() else {
                continue;
            };
            if self
                .runtime
                .is_instance(exception, self.image.resolve_type_ref(class)?)
            {
                return Ok(Some(u64::from(clause.handler_offset)));
            }
        }
        Ok(None)
    }

    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Result<Value> {
        self.stack
            .pop()
            .ok_or_else(|| malformed_error!("Stack underflow in {}", self.method))
    }

    fn pop_n(&mut self, count: usize) -> Result<Vec<Value>> {
        let split = self
            .stack
            .len()
            .checked_sub(count)
            .ok_or_else(|| malformed_error!("Stack underflow in {}", self.method))?;
        Ok(self.stack.split_off(split))
    }

    fn token(instruction: &Instruction) -> Result<Token> {
        instruction
            .operand
            .token()
            .ok_or_else(|| malformed_error!("{:?} lacks its token", instruction))
    }

    fn target(instruction: &Instruction) -> Result<u64> {
        instruction
            .branch_target()
            .ok_or_else(|| malformed_error!("{:?} lacks its target", instruction))
    }

    /// Argument or local index, from the operand or the short form suffix.
    fn slot(instruction: &Instruction) -> Result<usize> {
        let index = match instruction.int_operand() {
            Some(index) => usize::try_from(index).ok(),
            None => instruction
                .mnemonic
                .rsplit('.')
                .next()
                .and_then(|suffix| suffix.parse().ok()),
        };
        index.ok_or_else(|| malformed_error!("{:?} has no slot index", instruction))
    }

    fn param_sig(&self, slot: usize) -> Option<&TypeSig> {
        let sig = &self.method.identity.signature;
        if sig.has_this {
            slot.checked_sub(1).and_then(|index| sig.params.get(index))
        } else {
            sig.params.get(slot)
        }
    }

    fn throw(&self, ty: &str, message: impl Into<String>) -> Error {
        self.runtime.managed_exception(ty, message)
    }

    #[allow(clippy::too_many_lines)]
    fn step(&mut self, instruction: &Instruction) -> Result<Flow> {
        match instruction.mnemonic {
            "nop" => {}
            "ldarg.0" | "ldarg.1" | "ldarg.2" | "ldarg.3" | "ldarg.s" | "ldarg" => {
                let slot = Self::slot(instruction)?;
                let value = self
                    .args
                    .get(slot)
                    .cloned()
                    .ok_or_else(|| malformed_error!("No argument {} in {}", slot, self.method))?;
                self.push(value);
            }
            "starg.s" | "starg" => {
                let slot = Self::slot(instruction)?;
                let value = self.pop()?;
                let value = match self.param_sig(slot) {
                    Some(sig) => coerce(value, sig),
                    None => value,
                };
                let arg = self
                    .args
                    .get_mut(slot)
                    .ok_or_else(|| malformed_error!("No argument {}", slot))?;
                *arg = value;
            }
            "ldloc.0" | "ldloc.1" | "ldloc.2" | "ldloc.3" | "ldloc.s" | "ldloc" => {
                let slot = Self::slot(instruction)?;
                let value = self
                    .locals
                    .get(slot)
                    .cloned()
                    .ok_or_else(|| malformed_error!("No local {} in {}", slot, self.method))?;
                self.push(value);
            }
            "stloc.0" | "stloc.1" | "stloc.2" | "stloc.3" | "stloc.s" | "stloc" => {
                let slot = Self::slot(instruction)?;
                let value = self.pop()?;
                let sig = self
                    .local_sigs
                    .get(slot)
                    .ok_or_else(|| malformed_error!("No local {} in {}", slot, self.method))?;
                self.locals[slot] = coerce(value, sig);
            }
            "ldnull" => self.push(Value::Null),
            "ldc.i4.m1" => self.push(Value::I4(-1)),
            "ldc.i4.0" | "ldc.i4.1" | "ldc.i4.2" | "ldc.i4.3" | "ldc.i4.4" | "ldc.i4.5"
            | "ldc.i4.6" | "ldc.i4.7" | "ldc.i4.8" => {
                let value = i32::try_from(Self::slot(instruction)?)
                    .map_err(|_| malformed_error!("Bad constant {:?}", instruction))?;
                self.push(Value::I4(value));
            }
            "ldc.i4.s" | "ldc.i4" => {
                let value = instruction
                    .int_operand()
                    .and_then(|v| i32::try_from(v).ok())
                    .ok_or_else(|| malformed_error!("Bad constant {:?}", instruction))?;
                self.push(Value::I4(value));
            }
            "ldc.i8" => {
                let value = instruction
                    .int_operand()
                    .ok_or_else(|| malformed_error!("Bad constant {:?}", instruction))?;
                self.push(Value::I8(value));
            }
            "ldc.r4" | "ldc.r8" => {
                let value = match instruction.operand.immediate() {
                    Some(crate::assembly::Immediate::Float32(v)) => f64::from(v),
                    Some(crate::assembly::Immediate::Float64(v)) => v,
                    _ => return Err(malformed_error!("Bad constant {:?}", instruction)),
                };
                self.push(Value::R8(value));
            }
            "dup" => {
                let value = self.pop()?;
                self.push(value.clone());
                self.push(value);
            }
            "pop" => {
                self.pop()?;
            }
            "call" => self.call(Self::token(instruction)?, false)?,
            "callvirt" => self.call(Self::token(instruction)?, true)?,
            "newobj" => {
                let ctor = self.image.resolve_method(Self::token(instruction)?)?;
                let args = self.pop_n(ctor.signature.params.len())?;
                let instance = self.runtime.construct(&ctor, &args)?;
                self.push(instance);
            }
            "ret" => {
                let sig = &self.method.identity.signature;
                if sig.ret.is_void() || self.method.is_constructor() {
                    return Ok(Flow::Return(Value::Null));
                }
                let ret = sig.ret.clone();
                let value = self.pop()?;
                return Ok(Flow::Return(coerce(value, &ret)));
            }
            "br" | "br.s" => return Ok(Flow::Jump(Self::target(instruction)?)),
            "leave" | "leave.s" => {
                self.stack.clear();
                return Ok(Flow::Jump(Self::target(instruction)?));
            }
            "brfalse" | "brfalse.s" | "brtrue" | "brtrue.s" => {
                let taken = self.pop()?.is_truthy() == instruction.mnemonic.starts_with("brtrue");
                if taken {
                    return Ok(Flow::Jump(Self::target(instruction)?));
                }
            }
            "beq" | "beq.s" | "bne.un" | "bne.un.s" | "bge" | "bge.s" | "bgt" | "bgt.s" | "ble"
            | "ble.s" | "blt" | "blt.s" => {
                let b = self.pop()?;
                let a = self.pop()?;
                let op = instruction.mnemonic.trim_end_matches(".s");
                let taken = match op {
                    "beq" => equal(&a, &b),
                    "bne.un" => !equal(&a, &b),
                    "bge" => compare(&a, &b)?.is_some_and(|o| o.is_ge()),
                    "bgt" => compare(&a, &b)?.is_some_and(|o| o.is_gt()),
                    "ble" => compare(&a, &b)?.is_some_and(|o| o.is_le()),
                    _ => compare(&a, &b)?.is_some_and(|o| o.is_lt()),
                };
                if taken {
                    return Ok(Flow::Jump(Self::target(instruction)?));
                }
            }
            "add" | "sub" | "mul" | "div" | "rem" => {
                let b = Numeric::of(&self.pop()?)?;
                let a = Numeric::of(&self.pop()?)?;
                let result = self.arithmetic(instruction.mnemonic, a, b)?;
                self.push(result.into_value());
            }
            "neg" => {
                let value = match Numeric::of(&self.pop()?)? {
                    Numeric::I4(v) => Numeric::I4(v.wrapping_neg()),
                    Numeric::I8(v) => Numeric::I8(v.wrapping_neg()),
                    Numeric::F(v) => Numeric::F(-v),
                };
                self.push(value.into_value());
            }
            "ceq" | "cgt" | "clt" => {
                let b = self.pop()?;
                let a = self.pop()?;
                let result = match instruction.mnemonic {
                    "ceq" => equal(&a, &b),
                    "cgt" => compare(&a, &b)?.is_some_and(|o| o.is_gt()),
                    _ => compare(&a, &b)?.is_some_and(|o| o.is_lt()),
                };
                self.push(Value::I4(i32::from(result)));
            }
            "conv.i4" => {
                let value = Numeric::of(&self.pop()?)?;
                self.push(coerce(value.into_value(), &TypeSig::Scalar(ScalarKind::I4)));
            }
            "conv.i8" => {
                let value = Numeric::of(&self.pop()?)?;
                self.push(Value::I8(value.as_i64()));
            }
            "conv.r8" => {
                let value = Numeric::of(&self.pop()?)?;
                self.push(Value::R8(value.as_f64()));
            }
            "ldstr" => {
                let value = self.image.resolve_string(Self::token(instruction)?)?;
                self.push(Value::from(value));
            }
            "ldfld" => {
                let field = self.image.resolve_field(Self::token(instruction)?)?;
                let object = self.pop()?;
                let value = match &object {
                    Value::Object(object) => object.field(&field.name),
                    Value::Null => return Err(self.null_access(&field)),
                    other => {
                        return Err(Error::Runtime(format!(
                            "ldfld {} on {}",
                            field,
                            other.type_description()
                        )))
                    }
                };
                self.push(if value.is_null() {
                    Value::default_for(&field.sig)
                } else {
                    value
                });
            }
            "stfld" => {
                let field = self.image.resolve_field(Self::token(instruction)?)?;
                let value = self.pop()?;
                match self.pop()? {
                    Value::Object(object) => object.set_field(&field.name, coerce(value, &field.sig)),
                    Value::Null => return Err(self.null_access(&field)),
                    other => {
                        return Err(Error::Runtime(format!(
                            "stfld {} on {}",
                            field,
                            other.type_description()
                        )))
                    }
                }
            }
            "ldsfld" => {
                let field = self.image.resolve_field(Self::token(instruction)?)?;
                self.runtime.ensure_initialized(&field.declaring)?;
                let value = self.runtime.load_static(&field);
                self.push(value);
            }
            "stsfld" => {
                let field = self.image.resolve_field(Self::token(instruction)?)?;
                let value = self.pop()?;
                self.runtime.ensure_initialized(&field.declaring)?;
                self.runtime.store_static(&field, coerce(value, &field.sig));
            }
            "castclass" | "isinst" => {
                let sig = self.image.resolve_type_ref(Self::token(instruction)?)?.clone();
                let value = self.pop()?;
                let fits = value.is_null() || self.runtime.is_instance(&value, &sig);
                match (fits, instruction.mnemonic) {
                    (true, _) => self.push(value),
                    (false, "isinst") => self.push(Value::Null),
                    (false, _) => return Err(self.cast_failure(&value, &sig)),
                }
            }
            "box" => {
                let sig = self.image.resolve_type_ref(Self::token(instruction)?)?.clone();
                let value = self.pop()?;
                self.push(coerce(value, &sig));
            }
            "unbox.any" => {
                let sig = self.image.resolve_type_ref(Self::token(instruction)?)?.clone();
                let value = self.pop()?;
                match sig.as_scalar() {
                    Some(_) if value.is_null() => {
                        return Err(self.throw(
                            NULL_REFERENCE_EXCEPTION,
                            format!("Unboxing null as {sig}"),
                        ))
                    }
                    Some(kind) if value.scalar_kind() != Some(kind) => {
                        return Err(self.cast_failure(&value, &sig))
                    }
                    None if !value.is_null() && !self.runtime.is_instance(&value, &sig) => {
                        return Err(self.cast_failure(&value, &sig))
                    }
                    _ => self.push(value),
                }
            }
            "newarr" => {
                let element = self.image.resolve_type_ref(Self::token(instruction)?)?.clone();
                let length = Numeric::of(&self.pop()?)?.as_i64();
                let Ok(length) = usize::try_from(length) else {
                    return Err(self.throw(OVERFLOW_EXCEPTION, format!("Array length {length}")));
                };
                self.push(Value::Array(ArrayRef::new(element, length)));
            }
            "ldlen" => {
                let array = self.pop_array()?;
                let length = i32::try_from(array.len())
                    .map_err(|_| self.throw(OVERFLOW_EXCEPTION, "Array too long"))?;
                self.push(Value::I4(length));
            }
            "ldelem.ref" => {
                let index = Numeric::of(&self.pop()?)?.as_i64();
                let array = self.pop_array()?;
                let index = self.element_index(&array, index)?;
                self.push(array.get(index)?);
            }
            "stelem.ref" => {
                let value = self.pop()?;
                let index = Numeric::of(&self.pop()?)?.as_i64();
                let array = self.pop_array()?;
                let index = self.element_index(&array, index)?;
                array.set(index, value)?;
            }
            "throw" => {
                let exception = self.pop()?;
                if exception.is_null() {
                    return Err(self.throw(NULL_REFERENCE_EXCEPTION, "Throwing null"));
                }
                return Err(Error::TargetInvocation(exception));
            }
            "rethrow" => {
                let exception = self
                    .caught
                    .clone()
                    .ok_or_else(|| malformed_error!("rethrow outside a catch handler"))?;
                return Err(Error::TargetInvocation(exception));
            }
            other => {
                return Err(Error::Runtime(format!(
                    "Instruction {} is not supported by the interpreter",
                    other
                )))
            }
        }
        Ok(Flow::Next)
    }

    fn call(&mut self, token: Token, virtual_call: bool) -> Result<()> {
        let callee = self.image.resolve_method(token)?;
        let args = self.pop_n(callee.signature.params.len())?;
        let receiver = if callee.signature.has_this {
            Some(self.pop()?)
        } else {
            None
        };

        let target = match &receiver {
            Some(this) if virtual_call => {
                if this.is_null() {
                    return Err(self.throw(
                        NULL_REFERENCE_EXCEPTION,
                        format!("callvirt {} on null", callee),
                    ));
                }
                self.runtime.resolve_virtual(&callee, this)?
            }
            _ => callee,
        };

        let result = self.runtime.call_exact(&target, receiver.as_ref(), &args)?;
        if !target.signature.ret.is_void() && !target.is_constructor() {
            self.push(result);
        }
        Ok(())
    }

    fn arithmetic(&self, op: &str, a: Numeric, b: Numeric) -> Result<Numeric> {
        let divide_by_zero = || self.throw(DIVIDE_BY_ZERO_EXCEPTION, "Attempted to divide by zero.");
        let overflow = || self.throw(OVERFLOW_EXCEPTION, "Arithmetic operation overflowed.");

        Ok(match Numeric::widen(a, b) {
            (Numeric::I4(x), Numeric::I4(y)) => Numeric::I4(match op {
                "add" => x.wrapping_add(y),
                "sub" => x.wrapping_sub(y),
                "mul" => x.wrapping_mul(y),
                _ if y == 0 => return Err(divide_by_zero()),
                "div" => x.checked_div(y).ok_or_else(overflow)?,
                _ => x.checked_rem(y).ok_or_else(overflow)?,
            }),
            (Numeric::I8(x), Numeric::I8(y)) => Numeric::I8(match op {
                "add" => x.wrapping_add(y),
                "sub" => x.wrapping_sub(y),
                "mul" => x.wrapping_mul(y),
                _ if y == 0 => return Err(divide_by_zero()),
                "div" => x.checked_div(y).ok_or_else(overflow)?,
                _ => x.checked_rem(y).ok_or_else(overflow)?,
            }),
            (x, y) => {
                let (x, y) = (x.as_f64(), y.as_f64());
                Numeric::F(match op {
                    "add" => x + y,
                    "sub" => x - y,
                    "mul" => x * y,
                    "div" => x / y,
                    _ => x % y,
                })
            }
        })
    }

    fn pop_array(&mut self) -> Result<ArrayRef> {
        match self.pop()? {
            Value::Array(array) => Ok(array),
            Value::Null => Err(self.throw(NULL_REFERENCE_EXCEPTION, "Array access on null")),
            other => Err(Error::Runtime(format!(
                "Array access on {}",
                other.type_description()
            ))),
        }
    }

    fn element_index(&self, array: &ArrayRef, index: i64) -> Result<usize> {
        usize::try_from(index)
            .ok()
            .filter(|index| *index < array.len())
            .ok_or_else(|| {
                self.throw(
                    INDEX_OUT_OF_RANGE_EXCEPTION,
                    "Index was outside the bounds of the array.",
                )
            })
    }

    fn null_access(&self, field: &FieldRef) -> Error {
        self.throw(NULL_REFERENCE_EXCEPTION, format!("Field {} accessed on null", field))
    }

    fn cast_failure(&self, value: &Value, sig: &TypeSig) -> Error {
        self.throw(
            INVALID_CAST_EXCEPTION,
            format!(
                "Unable to cast object of type '{}' to type '{}'.",
                value.type_description(),
                sig
            ),
        )
    }
}

fn equal(a: &Value, b: &Value) -> bool {
    match (Numeric::of(a), Numeric::of(b)) {
        (Ok(x), Ok(y)) => match Numeric::widen(x, y) {
            (Numeric::I4(x), Numeric::I4(y)) => x == y,
            (Numeric::I8(x), Numeric::I8(y)) => x == y,
            (x, y) => x.as_f64() == y.as_f64(),
        },
        _ => a == b,
    }
}

/// Ordered comparison; `None` when unordered (NaN).
fn compare(a: &Value, b: &Value) -> Result<Option<std::cmp::Ordering>> {
    Ok(match Numeric::widen(Numeric::of(a)?, Numeric::of(b)?) {
        (Numeric::I4(x), Numeric::I4(y)) => Some(x.cmp(&y)),
        (Numeric::I8(x), Numeric::I8(y)) => Some(x.cmp(&y)),
        (x, y) => x.as_f64().partial_cmp(&y.as_f64()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coercion_follows_the_declared_type() {
        let i1 = TypeSig::Scalar(ScalarKind::I1);
        assert_eq!(coerce(Value::I4(-1), &i1), Value::I1(-1));
        assert_eq!(coerce(Value::I4(300), &TypeSig::Scalar(ScalarKind::U1)), Value::U1(44));
        assert_eq!(coerce(Value::I4(1), &TypeSig::Scalar(ScalarKind::Bool)), Value::Bool(true));
        assert_eq!(coerce(Value::R8(2.5), &TypeSig::Scalar(ScalarKind::R4)), Value::R4(2.5));
        assert_eq!(coerce(Value::I4(7), &TypeSig::Object), Value::I4(7));
        assert_eq!(coerce(Value::from("x"), &i1), Value::from("x"));
    }

    #[test]
    fn comparisons_widen() {
        assert!(equal(&Value::I4(3), &Value::I8(3)));
        assert!(equal(&Value::Null, &Value::Null));
        assert!(!equal(&Value::I4(3), &Value::Null));
        assert_eq!(
            compare(&Value::I4(2), &Value::R8(2.5)).unwrap(),
            Some(std::cmp::Ordering::Less)
        );
        assert_eq!(compare(&Value::R8(f64::NAN), &Value::R8(1.0)).unwrap(), None);
    }
}
