//! Managed values as seen by the engine, hook callbacks and the runtime bridge.
//!
//! A [`Value`] is either a scalar, `null`, a string, or a reference to a heap object or
//! array. Scalars are immutable and copied; object and array references share their
//! target, and two references are equal only if they point to the same heap cell.

use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
};

use crate::{
    metadata::signatures::{ScalarKind, TypeName, TypeSig},
    Error, Result,
};

/// Field holding the message of exception objects.
pub const EXCEPTION_MESSAGE_FIELD: &str = "_message";

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

/// A heap allocated instance of a class.
pub struct ManagedObject {
    id: u64,
    ty: TypeName,
    fields: Mutex<HashMap<String, Value>>,
}

/// Shared reference to a [`ManagedObject`].
#[derive(Clone)]
pub struct ObjectRef(Arc<ManagedObject>);

impl ObjectRef {
    /// Allocates a new object of type `ty` with no fields set.
    #[must_use]
    pub fn new(ty: TypeName) -> Self {
        ObjectRef(Arc::new(ManagedObject {
            id: NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed),
            ty,
            fields: Mutex::new(HashMap::new()),
        }))
    }

    /// Allocates an exception object of type `ty` carrying `message`.
    #[must_use]
    pub fn exception(ty: TypeName, message: impl Into<String>) -> Self {
        let message: String = message.into();
        let object = ObjectRef::new(ty);
        object.set_field(EXCEPTION_MESSAGE_FIELD, Value::from(message));
        object
    }

    /// Process-unique identifier of the object.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.0.id
    }

    /// The runtime type of the object.
    #[must_use]
    pub fn type_name(&self) -> &TypeName {
        &self.0.ty
    }

    /// Reads a field, `Null` when the field was never written.
    #[must_use]
    pub fn field(&self, name: &str) -> Value {
        lock!(self.0.fields).get(name).cloned().unwrap_or(Value::Null)
    }

    /// Writes a field.
    pub fn set_field(&self, name: &str, value: Value) {
        lock!(self.0.fields).insert(name.to_string(), value);
    }

    /// The exception message, if this object carries one.
    #[must_use]
    pub fn message(&self) -> Option<String> {
        match self.field(EXCEPTION_MESSAGE_FIELD) {
            Value::Str(message) => Some(message.to_string()),
            _ => None,
        }
    }

    /// True if both references point to the same object.
    #[must_use]
    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.0.ty, self.0.id)
    }
}

/// A heap allocated single-dimension array.
pub struct ManagedArray {
    element: TypeSig,
    items: Mutex<Vec<Value>>,
}

/// Shared reference to a [`ManagedArray`].
#[derive(Clone)]
pub struct ArrayRef(Arc<ManagedArray>);

impl ArrayRef {
    /// Allocates an array of `len` default elements.
    #[must_use]
    pub fn new(element: TypeSig, len: usize) -> Self {
        let default = Value::default_for(&element);
        ArrayRef(Arc::new(ManagedArray {
            element,
            items: Mutex::new(vec![default; len]),
        }))
    }

    /// Wraps existing items.
    #[must_use]
    pub fn from_values(element: TypeSig, items: Vec<Value>) -> Self {
        ArrayRef(Arc::new(ManagedArray {
            element,
            items: Mutex::new(items),
        }))
    }

    /// The declared element type.
    #[must_use]
    pub fn element_type(&self) -> &TypeSig {
        &self.0.element
    }

    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        lock!(self.0.items).len()
    }

    /// True for zero-length arrays.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reads element `index`.
    ///
    /// # Errors
    /// Returns [`Error::OutOfBounds`] if `index` is past the end.
    pub fn get(&self, index: usize) -> Result<Value> {
        lock!(self.0.items)
            .get(index)
            .cloned()
            .ok_or(Error::OutOfBounds)
    }

    /// Writes element `index`.
    ///
    /// # Errors
    /// Returns [`Error::OutOfBounds`] if `index` is past the end.
    pub fn set(&self, index: usize, value: Value) -> Result<()> {
        let mut items = lock!(self.0.items);
        let slot = items.get_mut(index).ok_or(Error::OutOfBounds)?;
        *slot = value;
        Ok(())
    }

    /// Copies the elements out.
    #[must_use]
    pub fn to_vec(&self) -> Vec<Value> {
        lock!(self.0.items).clone()
    }

    /// True if both references point to the same array.
    #[must_use]
    pub fn ptr_eq(&self, other: &ArrayRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for ArrayRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.0.element, self.len())
    }
}

/// A managed value.
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// The null reference
    #[default]
    Null,
    /// `bool`
    Bool(bool),
    /// `char`, a UTF-16 code unit
    Char(u16),
    /// `int8`
    I1(i8),
    /// `uint8`
    U1(u8),
    /// `int16`
    I2(i16),
    /// `uint16`
    U2(u16),
    /// `int32`
    I4(i32),
    /// `uint32`
    U4(u32),
    /// `int64`
    I8(i64),
    /// `uint64`
    U8(u64),
    /// `float32`
    R4(f32),
    /// `float64`
    R8(f64),
    /// An immutable string
    Str(Arc<str>),
    /// A reference to a class instance
    Object(ObjectRef),
    /// A reference to an array
    Array(ArrayRef),
}

impl Value {
    /// The zero value of a location of type `sig`.
    #[must_use]
    pub fn default_for(sig: &TypeSig) -> Value {
        match sig.as_scalar() {
            Some(ScalarKind::Bool) => Value::Bool(false),
            Some(ScalarKind::Char) => Value::Char(0),
            Some(ScalarKind::I1) => Value::I1(0),
            Some(ScalarKind::U1) => Value::U1(0),
            Some(ScalarKind::I2) => Value::I2(0),
            Some(ScalarKind::U2) => Value::U2(0),
            Some(ScalarKind::I4) => Value::I4(0),
            Some(ScalarKind::U4) => Value::U4(0),
            Some(ScalarKind::I8) => Value::I8(0),
            Some(ScalarKind::U8) => Value::U8(0),
            Some(ScalarKind::R4) => Value::R4(0.0),
            Some(ScalarKind::R8) => Value::R8(0.0),
            None => Value::Null,
        }
    }

    /// True for `null`.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The scalar kind of a primitive value.
    #[must_use]
    pub fn scalar_kind(&self) -> Option<ScalarKind> {
        Some(match self {
            Value::Bool(_) => ScalarKind::Bool,
            Value::Char(_) => ScalarKind::Char,
            Value::I1(_) => ScalarKind::I1,
            Value::U1(_) => ScalarKind::U1,
            Value::I2(_) => ScalarKind::I2,
            Value::U2(_) => ScalarKind::U2,
            Value::I4(_) => ScalarKind::I4,
            Value::U4(_) => ScalarKind::U4,
            Value::I8(_) => ScalarKind::I8,
            Value::U8(_) => ScalarKind::U8,
            Value::R4(_) => ScalarKind::R4,
            Value::R8(_) => ScalarKind::R8,
            _ => return None,
        })
    }

    /// The runtime type of the value, `None` for `null`.
    ///
    /// Scalars report their boxed wrapper type.
    #[must_use]
    pub fn runtime_type_name(&self) -> Option<TypeName> {
        match self {
            Value::Null => None,
            Value::Str(_) => Some(TypeName::new("System", "String")),
            Value::Object(object) => Some(object.type_name().clone()),
            Value::Array(array) => array.element_type().type_name().map(|n| n.array_of()),
            scalar => scalar.scalar_kind().map(ScalarKind::wrapper),
        }
    }

    /// The value as `int32`, widening narrower integers.
    ///
    /// # Errors
    /// Returns [`Error::InvalidCast`] for non-integer values.
    pub fn as_i4(&self) -> Result<i32> {
        match *self {
            Value::Bool(v) => Ok(i32::from(v)),
            Value::Char(v) => Ok(i32::from(v)),
            Value::I1(v) => Ok(i32::from(v)),
            Value::U1(v) => Ok(i32::from(v)),
            Value::I2(v) => Ok(i32::from(v)),
            Value::U2(v) => Ok(i32::from(v)),
            Value::I4(v) => Ok(v),
            #[allow(clippy::cast_possible_wrap)]
            Value::U4(v) => Ok(v as i32),
            _ => Err(self.cast_error("int32")),
        }
    }

    /// The value as `int64`, widening any integer.
    ///
    /// # Errors
    /// Returns [`Error::InvalidCast`] for non-integer values.
    pub fn as_i8(&self) -> Result<i64> {
        match *self {
            Value::I8(v) => Ok(v),
            #[allow(clippy::cast_possible_wrap)]
            Value::U8(v) => Ok(v as i64),
            Value::U4(v) => Ok(i64::from(v)),
            _ => self.as_i4().map(i64::from),
        }
    }

    /// The value as `float64`.
    ///
    /// # Errors
    /// Returns [`Error::InvalidCast`] for non-numeric values.
    pub fn as_r8(&self) -> Result<f64> {
        match *self {
            Value::R8(v) => Ok(v),
            Value::R4(v) => Ok(f64::from(v)),
            #[allow(clippy::cast_precision_loss)]
            _ => self.as_i8().map(|v| v as f64),
        }
    }

    /// The value as `bool`.
    ///
    /// # Errors
    /// Returns [`Error::InvalidCast`] for values other than `bool`.
    pub fn as_bool(&self) -> Result<bool> {
        match self {
            Value::Bool(v) => Ok(*v),
            _ => Err(self.cast_error("bool")),
        }
    }

    /// The string contents, `None` for non-string values.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// The object reference, `None` for other values.
    #[must_use]
    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(object) => Some(object),
            _ => None,
        }
    }

    /// The array reference, `None` for other values.
    #[must_use]
    pub fn as_array(&self) -> Option<&ArrayRef> {
        match self {
            Value::Array(array) => Some(array),
            _ => None,
        }
    }

    /// True if the value is truthy in the CIL sense: non-zero or non-null.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(v) => *v,
            Value::R4(v) => *v != 0.0,
            Value::R8(v) => *v != 0.0,
            Value::Str(_) | Value::Object(_) | Value::Array(_) => true,
            other => other.as_i8().is_ok_and(|v| v != 0),
        }
    }

    /// Short description of the value's type for diagnostics.
    #[must_use]
    pub fn type_description(&self) -> String {
        self.runtime_type_name()
            .map_or_else(|| "null".to_string(), |name| name.to_string())
    }

    fn cast_error(&self, expected: &str) -> Error {
        Error::InvalidCast {
            expected: expected.to_string(),
            found: self.type_description(),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Char(a), Value::Char(b)) | (Value::U2(a), Value::U2(b)) => a == b,
            (Value::I1(a), Value::I1(b)) => a == b,
            (Value::U1(a), Value::U1(b)) => a == b,
            (Value::I2(a), Value::I2(b)) => a == b,
            (Value::I4(a), Value::I4(b)) => a == b,
            (Value::U4(a), Value::U4(b)) => a == b,
            (Value::I8(a), Value::I8(b)) => a == b,
            (Value::U8(a), Value::U8(b)) => a == b,
            (Value::R4(a), Value::R4(b)) => a.to_bits() == b.to_bits(),
            (Value::R8(a), Value::R8(b)) => a.to_bits() == b.to_bits(),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            (Value::Array(a), Value::Array(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Char(v) => match char::from_u32(u32::from(*v)) {
                Some(c) => write!(f, "'{c}'"),
                None => write!(f, "'\\u{v:04x}'"),
            },
            Value::I1(v) => write!(f, "{v}"),
            Value::U1(v) => write!(f, "{v}"),
            Value::I2(v) => write!(f, "{v}"),
            Value::U2(v) => write!(f, "{v}"),
            Value::I4(v) => write!(f, "{v}"),
            Value::U4(v) => write!(f, "{v}"),
            Value::I8(v) => write!(f, "{v}L"),
            Value::U8(v) => write!(f, "{v}UL"),
            Value::R4(v) => write!(f, "{v}f"),
            Value::R8(v) => write!(f, "{v}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Object(object) => match object.message() {
                Some(message) => write!(f, "{object:?}: {message}"),
                None => write!(f, "{object:?}"),
            },
            Value::Array(array) => write!(f, "{array:?}"),
        }
    }
}

macro_rules! impl_value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v)
                }
            }
        )*
    };
}

impl_value_from! {
    bool => Bool,
    i8 => I1,
    u8 => U1,
    i16 => I2,
    u16 => U2,
    i32 => I4,
    u32 => U4,
    i64 => I8,
    u64 => U8,
    f32 => R4,
    f64 => R8,
    ObjectRef => Object,
    ArrayRef => Array,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(Arc::from(v))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(Arc::from(v))
    }
}
