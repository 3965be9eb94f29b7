//! Fluent construction of type images.
//!
//! [`TypeBuilder`] assembles a [`TypeImage`] from fields and [`MethodBuilder`]s. Method
//! bodies are written against an [`InstructionAssembler`]; the [`BodyRefs`] handed to the
//! body closure interns the tokens the code refers to.
//!
//! ```rust,no_run
//! use cilplant::{
//!     emulation::{MethodBuilder, TypeBuilder},
//!     metadata::signatures::{MethodSig, ScalarKind, TypeSig},
//! };
//!
//! # fn main() -> cilplant::Result<()> {
//! let i4 = TypeSig::Scalar(ScalarKind::I4);
//! let image = TypeBuilder::new("Demo.Calculator")
//!     .method(
//!         MethodBuilder::new("Add", MethodSig::static_method(i4.clone(), vec![i4.clone(), i4]))
//!             .body(|asm, _| {
//!                 asm.ldarg(0)?.ldarg(1)?.add()?.ret()?;
//!                 Ok(())
//!             }),
//!     )
//!     .build()?;
//! # Ok(())
//! # }
//! ```

use crate::{
    assembly::InstructionAssembler,
    image::{FieldRef, MemberRef, MethodImage, TypeImage},
    metadata::{
        method::{
            ExceptionClause, FunctionIdentity, MethodAttributes, MethodBody, MethodDef,
            MethodImplAttributes, CONSTRUCTOR_NAME, STATIC_INITIALIZER_NAME,
        },
        signatures::{MethodSig, TypeName, TypeSig},
        token::Token,
        typesystem::{FieldDef, TypeAttributes, TypeKind},
    },
    Error, Result,
};

/// Writes the code of one method body.
pub type BodyFn = Box<dyn FnOnce(&mut InstructionAssembler, &mut BodyRefs<'_>) -> Result<()>>;

/// Token interning for code under construction.
pub struct BodyRefs<'a> {
    image: &'a mut TypeImage,
}

impl BodyRefs<'_> {
    /// The type being built.
    #[must_use]
    pub fn this_type(&self) -> &TypeName {
        &self.image.name
    }

    /// Token of any method.
    ///
    /// # Errors
    /// Returns [`Error::Malformed`] if the reference table overflows.
    pub fn method(&mut self, identity: &FunctionIdentity) -> Result<Token> {
        self.image
            .intern_member_ref(&MemberRef::Method(identity.clone()))
    }

    /// Token of a method of the type being built.
    ///
    /// # Errors
    /// Returns [`Error::Malformed`] if the reference table overflows.
    pub fn own_method(&mut self, name: &str, sig: MethodSig) -> Result<Token> {
        let identity = FunctionIdentity::new(self.image.name.clone(), name, sig);
        self.method(&identity)
    }

    /// Token of a field declared on the type being built.
    ///
    /// # Errors
    /// Returns [`Error::Malformed`] if no such field was declared.
    pub fn field(&mut self, name: &str) -> Result<Token> {
        self.image.field_token(name)
    }

    /// Token of a field of another type.
    ///
    /// # Errors
    /// Returns [`Error::Malformed`] if the reference table overflows.
    pub fn foreign_field(&mut self, field: FieldRef) -> Result<Token> {
        self.image.intern_member_ref(&MemberRef::Field(field))
    }

    /// Token of a type.
    ///
    /// # Errors
    /// Returns [`Error::Malformed`] if the reference table overflows.
    pub fn type_ref(&mut self, sig: &TypeSig) -> Result<Token> {
        self.image.intern_type_ref(sig)
    }

    /// Token of a string literal.
    ///
    /// # Errors
    /// Returns [`Error::Malformed`] if the string table overflows.
    pub fn string(&mut self, value: &str) -> Result<Token> {
        self.image.intern_string(value)
    }
}

struct CatchSpec {
    try_start: String,
    try_end: String,
    handler_start: String,
    handler_end: String,
    class: TypeSig,
}

/// Builder of one method.
pub struct MethodBuilder {
    name: String,
    sig: MethodSig,
    flags: MethodAttributes,
    impl_flags: MethodImplAttributes,
    locals: Vec<TypeSig>,
    catches: Vec<CatchSpec>,
    body: Option<BodyFn>,
}

impl MethodBuilder {
    /// A public method; static unless `sig` has a receiver.
    #[must_use]
    pub fn new(name: impl Into<String>, sig: MethodSig) -> Self {
        let mut flags = MethodAttributes::PUBLIC | MethodAttributes::HIDE_BY_SIG;
        if !sig.has_this {
            flags |= MethodAttributes::STATIC;
        }
        MethodBuilder {
            name: name.into(),
            sig,
            flags,
            impl_flags: MethodImplAttributes::IL,
            locals: Vec::new(),
            catches: Vec::new(),
            body: None,
        }
    }

    /// A public instance constructor taking `params`.
    #[must_use]
    pub fn constructor(params: Vec<TypeSig>) -> Self {
        let mut builder = Self::new(CONSTRUCTOR_NAME, MethodSig::instance(TypeSig::Void, params));
        builder.flags |= MethodAttributes::SPECIAL_NAME | MethodAttributes::RT_SPECIAL_NAME;
        builder
    }

    /// The static initializer.
    #[must_use]
    pub fn static_initializer() -> Self {
        let mut builder = Self::new(
            STATIC_INITIALIZER_NAME,
            MethodSig::static_method(TypeSig::Void, vec![]),
        )
        .private();
        builder.flags |= MethodAttributes::SPECIAL_NAME | MethodAttributes::RT_SPECIAL_NAME;
        builder
    }

    /// Makes the method private.
    #[must_use]
    pub fn private(mut self) -> Self {
        self.flags.remove(MethodAttributes::PUBLIC);
        self.flags |= MethodAttributes::PRIVATE;
        self
    }

    /// Makes the method virtual.
    #[must_use]
    pub fn virtual_(mut self) -> Self {
        self.flags |= MethodAttributes::VIRTUAL;
        self
    }

    /// Makes the method abstract and virtual; it gets no body.
    #[must_use]
    pub fn abstract_(mut self) -> Self {
        self.flags |= MethodAttributes::VIRTUAL | MethodAttributes::ABSTRACT;
        self
    }

    /// Makes the method native; the runtime binds its implementation.
    #[must_use]
    pub fn native(mut self) -> Self {
        self.impl_flags |= MethodImplAttributes::INTERNAL_CALL;
        self
    }

    /// Declares a local variable; locals are numbered in declaration order.
    #[must_use]
    pub fn local(mut self, sig: TypeSig) -> Self {
        self.locals.push(sig);
        self
    }

    /// Adds a typed catch clause delimited by labels of the body.
    #[must_use]
    pub fn catch(
        mut self,
        try_start: &str,
        try_end: &str,
        handler_start: &str,
        handler_end: &str,
        class: TypeSig,
    ) -> Self {
        self.catches.push(CatchSpec {
            try_start: try_start.to_string(),
            try_end: try_end.to_string(),
            handler_start: handler_start.to_string(),
            handler_end: handler_end.to_string(),
            class,
        });
        self
    }

    /// Sets the code of the method.
    #[must_use]
    pub fn body<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&mut InstructionAssembler, &mut BodyRefs<'_>) -> Result<()> + 'static,
    {
        self.body = Some(Box::new(f));
        self
    }

    fn build(self, image: &mut TypeImage) -> Result<MethodImage> {
        let def = MethodDef {
            identity: FunctionIdentity::new(image.name.clone(), self.name, self.sig),
            flags: self.flags,
            impl_flags: self.impl_flags,
        };

        if !def.has_body() {
            if self.body.is_some() {
                return Err(malformed_error!("{} cannot have a body", def));
            }
            return Ok(MethodImage { def, body: None });
        }

        let Some(write) = self.body else {
            return Err(malformed_error!("{} has no body", def));
        };

        let mut asm = InstructionAssembler::new();
        write(&mut asm, &mut BodyRefs { image: &mut *image })?;
        let (code, max_stack, labels) = asm.finish_with_labels()?;

        let offset = |label: &str| {
            labels
                .get(label)
                .copied()
                .ok_or_else(|| Error::UndefinedLabel(label.to_string()))
        };
        let mut clauses = Vec::with_capacity(self.catches.len());
        for catch in &self.catches {
            let try_start = offset(&catch.try_start)?;
            let handler_start = offset(&catch.handler_start)?;
            let try_length = offset(&catch.try_end)?
                .checked_sub(try_start)
                .ok_or_else(|| malformed_error!("Try region of {} ends before it starts", def))?;
            let handler_length = offset(&catch.handler_end)?
                .checked_sub(handler_start)
                .ok_or_else(|| malformed_error!("Handler of {} ends before it starts", def))?;
            clauses.push(ExceptionClause::catch(
                try_start,
                try_length,
                handler_start,
                handler_length,
                image.intern_type_ref(&catch.class)?,
            ));
        }

        let mut body = MethodBody::new(code, max_stack);
        if !self.locals.is_empty() {
            body.local_var_sig_token = image.intern_local_sig(&self.locals)?;
            body.init_locals = true;
        }
        body.exception_clauses = clauses;

        Ok(MethodImage {
            def,
            body: Some(body.encode()?),
        })
    }
}

/// Builder of one type image.
pub struct TypeBuilder {
    image: TypeImage,
    methods: Vec<MethodBuilder>,
}

impl TypeBuilder {
    /// A public class deriving from `System.Object`.
    #[must_use]
    pub fn new(full_name: &str) -> Self {
        TypeBuilder {
            image: TypeImage::new(
                TypeName::parse(full_name),
                TypeKind::Class,
                TypeAttributes::PUBLIC,
                Some(TypeName::new("System", "Object")),
            ),
            methods: Vec::new(),
        }
    }

    /// Sets the base type; `None` only for the root of the hierarchy and interfaces.
    #[must_use]
    pub fn base(mut self, base: Option<&str>) -> Self {
        self.image.base = base.map(TypeName::parse);
        self
    }

    /// Sets the kind.
    #[must_use]
    pub fn kind(mut self, kind: TypeKind) -> Self {
        self.image.kind = kind;
        self
    }

    /// Adds type attributes.
    #[must_use]
    pub fn flags(mut self, flags: TypeAttributes) -> Self {
        self.image.flags |= flags;
        self
    }

    /// Adds an implemented interface.
    #[must_use]
    pub fn interface(mut self, name: &str) -> Self {
        self.image.interfaces.push(TypeName::parse(name));
        self
    }

    /// Declares an instance field.
    #[must_use]
    pub fn field(mut self, name: &str, sig: TypeSig) -> Self {
        self.image.fields.push(FieldDef {
            name: name.to_string(),
            sig,
            is_static: false,
        });
        self
    }

    /// Declares a static field.
    #[must_use]
    pub fn static_field(mut self, name: &str, sig: TypeSig) -> Self {
        self.image.fields.push(FieldDef {
            name: name.to_string(),
            sig,
            is_static: true,
        });
        self
    }

    /// Adds a method.
    #[must_use]
    pub fn method(mut self, method: MethodBuilder) -> Self {
        self.methods.push(method);
        self
    }

    /// Assembles the image.
    ///
    /// # Errors
    /// Returns [`Error::Malformed`] for methods whose body does not match their flags,
    /// [`Error::UndefinedLabel`] for catch clauses naming unknown labels, and encoder
    /// errors raised by the body closures.
    pub fn build(mut self) -> Result<TypeImage> {
        for method in std::mem::take(&mut self.methods) {
            let built = method.build(&mut self.image)?;
            if self.image.method_index(&built.def.identity).is_some() {
                return Err(malformed_error!("Duplicate method {}", built.def));
            }
            self.image.methods.push(built);
        }
        Ok(self.image)
    }
}
