use bitflags::bitflags;

use crate::metadata::token::Token;

bitflags! {
    /// Kind of an exception handling clause, ECMA-335 II.25.4.6.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ExceptionClauseFlags: u16 {
        /// A typed catch clause
        const EXCEPTION = 0x0000;
        /// An exception filter
        const FILTER = 0x0001;
        /// A finally clause
        const FINALLY = 0x0002;
        /// A fault clause
        const FAULT = 0x0004;
    }
}

/// One entry of a method's exception handling table.
///
/// Offsets are relative to the start of the method's CIL code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionClause {
    /// Clause kind
    pub flags: ExceptionClauseFlags,
    /// Start of the protected region
    pub try_offset: u32,
    /// Length of the protected region
    pub try_length: u32,
    /// Start of the handler
    pub handler_offset: u32,
    /// Length of the handler
    pub handler_length: u32,
    /// Type reference token for catch clauses, filter offset for filter clauses
    pub class_token_or_filter: u32,
}

impl ExceptionClause {
    /// A typed catch clause.
    #[must_use]
    pub fn catch(
        try_offset: u32,
        try_length: u32,
        handler_offset: u32,
        handler_length: u32,
        class: Token,
    ) -> Self {
        ExceptionClause {
            flags: ExceptionClauseFlags::EXCEPTION,
            try_offset,
            try_length,
            handler_offset,
            handler_length,
            class_token_or_filter: class.value(),
        }
    }

    /// True for typed catch clauses.
    #[must_use]
    pub fn is_catch(&self) -> bool {
        self.flags == ExceptionClauseFlags::EXCEPTION
    }

    /// The caught type for catch clauses.
    #[must_use]
    pub fn class_token(&self) -> Option<Token> {
        self.is_catch()
            .then(|| Token::new(self.class_token_or_filter))
    }

    /// True if `offset` lies inside the protected region.
    #[must_use]
    pub fn covers(&self, offset: u32) -> bool {
        offset >= self.try_offset && offset - self.try_offset < self.try_length
    }

    /// Returns a copy with every offset moved by `delta` bytes.
    #[must_use]
    pub fn shifted(&self, delta: u32) -> Self {
        let mut clause = self.clone();
        clause.try_offset += delta;
        clause.handler_offset += delta;
        if self.flags.contains(ExceptionClauseFlags::FILTER) {
            clause.class_token_or_filter += delta;
        }
        clause
    }

    /// True when every offset and length fits the 16/8-bit small section layout.
    #[must_use]
    pub fn fits_small(&self) -> bool {
        self.try_offset <= u32::from(u16::MAX)
            && self.try_length <= u32::from(u8::MAX)
            && self.handler_offset <= u32::from(u16::MAX)
            && self.handler_length <= u32::from(u8::MAX)
    }
}
