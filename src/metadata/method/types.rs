//! Method attribute and method body bitflags.
//!
//! Values follow ECMA-335 II.23.1.10 (`MethodAttributes`), II.23.1.11
//! (`MethodImplAttributes`) and II.25.4 (method header and data section flags).

use bitflags::bitflags;

/// Mask of the member access bits in [`MethodAttributes`].
pub const METHOD_ACCESS_MASK: u16 = 0x0007;
/// Mask of the code type bits in [`MethodImplAttributes`].
pub const METHOD_IMPL_CODE_TYPE_MASK: u16 = 0x0003;

bitflags! {
    /// Method definition attributes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MethodAttributes: u16 {
        /// Accessible only by the declaring type
        const PRIVATE = 0x0001;
        /// Accessible by anyone
        const PUBLIC = 0x0006;
        /// Defined on the type rather than per instance
        const STATIC = 0x0010;
        /// Cannot be overridden
        const FINAL = 0x0020;
        /// Participates in virtual dispatch
        const VIRTUAL = 0x0040;
        /// Hidden by name and signature
        const HIDE_BY_SIG = 0x0080;
        /// Always gets a new vtable slot
        const NEW_SLOT = 0x0100;
        /// Has no implementation
        const ABSTRACT = 0x0400;
        /// Name has special meaning to tools
        const SPECIAL_NAME = 0x0800;
        /// Name has special meaning to the runtime (`.ctor`, `.cctor`)
        const RT_SPECIAL_NAME = 0x1000;
        /// Implementation is forwarded through platform invoke
        const PINVOKE_IMPL = 0x2000;
    }
}

impl MethodAttributes {
    /// True when the access bits are exactly `private`.
    #[must_use]
    pub fn is_private(self) -> bool {
        self.bits() & METHOD_ACCESS_MASK == MethodAttributes::PRIVATE.bits()
    }
}

bitflags! {
    /// Method implementation attributes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MethodImplAttributes: u16 {
        /// Method implementation is CIL
        const IL = 0x0000;
        /// Method implementation is native code
        const NATIVE = 0x0001;
        /// Method implementation is provided by the runtime
        const RUNTIME = 0x0003;
        /// Method cannot be inlined
        const NO_INLINING = 0x0008;
        /// Method is implemented inside the runtime itself
        const INTERNAL_CALL = 0x1000;
    }
}

impl MethodImplAttributes {
    /// True if the body is not CIL.
    #[must_use]
    pub fn is_native(self) -> bool {
        self.bits() & METHOD_IMPL_CODE_TYPE_MASK != 0 || self.contains(Self::INTERNAL_CALL)
    }
}

bitflags! {
    /// Flags of the first byte(s) of a method body header.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MethodBodyFlags: u16 {
        /// Tiny header, code size in the upper six bits
        const TINY_FORMAT = 0x2;
        /// Fat header
        const FAT_FORMAT = 0x3;
        /// Data sections follow the code
        const MORE_SECTS = 0x8;
        /// Zero-initialize local variables
        const INIT_LOCALS = 0x10;
    }
}

bitflags! {
    /// Flags of a method data section header.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SectionFlags: u8 {
        /// Exception handling table
        const EHTABLE = 0x1;
        /// Optimized IL table, unused
        const OPT_ILTABLE = 0x2;
        /// Fat section layout
        const FAT_FORMAT = 0x40;
        /// Another section follows
        const MORE_SECTS = 0x80;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_bits() {
        assert!((MethodAttributes::PRIVATE | MethodAttributes::VIRTUAL).is_private());
        assert!(!MethodAttributes::PUBLIC.is_private());
        assert!(!MethodAttributes::empty().is_private());
    }

    #[test]
    fn native_code_types() {
        assert!(!MethodImplAttributes::IL.is_native());
        assert!(MethodImplAttributes::NATIVE.is_native());
        assert!(MethodImplAttributes::RUNTIME.is_native());
        assert!(MethodImplAttributes::INTERNAL_CALL.is_native());
        assert!(!MethodImplAttributes::NO_INLINING.is_native());
    }
}
