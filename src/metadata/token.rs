//! Metadata tokens.
//!
//! A [`Token`] is a 32-bit reference to a row of one of the tables carried by a
//! [`crate::image::TypeImage`]. The high byte selects the table, the low 24 bits hold the
//! 1-based row. CIL instructions such as `call`, `ldfld`, `box` and `ldstr` carry tokens as
//! their operand.
//!
//! | Table | Prefix | Contents |
//! |-------|--------|----------|
//! | [`Token::TYPE_REF`] | `0x01` | Type signatures referenced by `box`, `newarr`, `castclass`, ... |
//! | [`Token::FIELD`] | `0x04` | Fields declared by the image's own type |
//! | [`Token::METHOD_DEF`] | `0x06` | Methods declared by the image's own type |
//! | [`Token::MEMBER_REF`] | `0x0A` | Methods and fields of other types |
//! | [`Token::LOCAL_SIG`] | `0x11` | Local variable signatures |
//! | [`Token::STRING`] | `0x70` | User strings loaded by `ldstr` |

use std::fmt;
use std::hash::{Hash, Hasher};

/// A metadata token: table id in the high byte, 1-based row in the low 24 bits.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Token(pub u32);

impl Token {
    /// Table id of type references.
    pub const TYPE_REF: u8 = 0x01;
    /// Table id of field definitions.
    pub const FIELD: u8 = 0x04;
    /// Table id of method definitions.
    pub const METHOD_DEF: u8 = 0x06;
    /// Table id of member references.
    pub const MEMBER_REF: u8 = 0x0A;
    /// Table id of local variable signatures.
    pub const LOCAL_SIG: u8 = 0x11;
    /// Table id of user strings.
    pub const STRING: u8 = 0x70;

    /// Creates a token from its raw value.
    #[must_use]
    pub fn new(value: u32) -> Self {
        Token(value)
    }

    /// Creates a token for the `row` of `table`.
    #[must_use]
    pub fn from_parts(table: u8, row: u32) -> Self {
        Token((u32::from(table) << 24) | (row & 0x00FF_FFFF))
    }

    /// Builds the token for the zero-based `index` into `table`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the row does not fit into 24 bits.
    pub fn for_index(table: u8, index: usize) -> crate::Result<Self> {
        let row = u32::try_from(index + 1)
            .ok()
            .filter(|row| *row <= 0x00FF_FFFF)
            .ok_or_else(|| malformed_error!("Table 0x{:02x} overflowed at row {}", table, index))?;
        Ok(Token::from_parts(table, row))
    }

    /// Raw token value.
    #[must_use]
    pub fn value(&self) -> u32 {
        self.0
    }

    /// Table id stored in the high byte.
    #[must_use]
    pub fn table(&self) -> u8 {
        (self.0 >> 24) as u8
    }

    /// 1-based row index.
    #[must_use]
    pub fn row(&self) -> u32 {
        self.0 & 0x00FF_FFFF
    }

    /// Zero-based index for table lookups, `None` for the null row.
    #[must_use]
    pub fn index(&self) -> Option<usize> {
        (self.row() as usize).checked_sub(1)
    }

    /// True for the null token.
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl From<u32> for Token {
    fn from(value: u32) -> Self {
        Token(value)
    }
}

impl From<Token> for u32 {
    fn from(token: Token) -> Self {
        token.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Token(0x{:08x}, table: 0x{:02x}, row: {})",
            self.0,
            self.table(),
            self.row()
        )
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

impl Hash for Token {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_parts() {
        let token = Token::from_parts(Token::MEMBER_REF, 3);
        assert_eq!(token.value(), 0x0A00_0003);
        assert_eq!(token.table(), Token::MEMBER_REF);
        assert_eq!(token.row(), 3);
        assert_eq!(token.index(), Some(2));
    }

    #[test]
    fn test_token_for_index() {
        let token = Token::for_index(Token::STRING, 0).unwrap();
        assert_eq!(token.value(), 0x7000_0001);
        assert!(Token::for_index(Token::STRING, 0x00FF_FFFF).is_err());
    }

    #[test]
    fn test_token_is_null() {
        assert!(Token(0).is_null());
        assert_eq!(Token(0).index(), None);
        assert!(!Token(0x0600_0001).is_null());
    }

    #[test]
    fn test_token_display() {
        let token = Token(0x06000001);
        assert_eq!(format!("{}", token), "0x06000001");
        let debug_str = format!("{:?}", token);
        assert!(debug_str.contains("table: 0x06"));
        assert!(debug_str.contains("row: 1"));
    }
}
