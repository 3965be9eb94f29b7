//! Method body header codec, ECMA-335 II.25.4.
//!
//! A method body is a tiny or fat header, the CIL code, and for fat bodies optional
//! data sections holding the exception handling table. [`MethodBody::parse`] accepts
//! both small and fat exception sections; [`MethodBody::encode`] chooses the tiny header
//! whenever the body allows it and always writes fat exception sections.

use crate::{
    file::io::{read_le, read_le_at, write_le},
    metadata::{
        method::{ExceptionClause, ExceptionClauseFlags, MethodBodyFlags, SectionFlags},
        token::Token,
    },
    Error::OutOfBounds,
    Result,
};

/// Size of a fat header in bytes.
const FAT_HEADER_SIZE: usize = 12;
/// Implicit evaluation stack size of a tiny header.
const TINY_MAX_STACK: u16 = 8;
/// Largest code size a tiny header can describe.
const TINY_MAX_CODE: usize = 63;

/// A decoded method body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodBody {
    /// Maximum evaluation stack depth
    pub max_stack: u16,
    /// Zero-initialize locals on entry
    pub init_locals: bool,
    /// Local variable signature, null if the method has no locals
    pub local_var_sig_token: Token,
    /// The CIL instruction stream
    pub code: Vec<u8>,
    /// Exception handling clauses
    pub exception_clauses: Vec<ExceptionClause>,
    /// True if the body was read from a fat header
    pub is_fat: bool,
}

impl MethodBody {
    /// A body without locals or exception clauses.
    #[must_use]
    pub fn new(code: Vec<u8>, max_stack: u16) -> Self {
        MethodBody {
            max_stack,
            init_locals: false,
            local_var_sig_token: Token::new(0),
            code,
            exception_clauses: Vec::new(),
            is_fat: false,
        }
    }

    /// Parses a method body including its exception handling sections.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the header is neither tiny nor fat and
    /// [`crate::Error::OutOfBounds`] if the code extends past `data`.
    pub fn parse(data: &[u8]) -> Result<MethodBody> {
        if data.is_empty() {
            return Err(malformed_error!("Provided data for body parsing is empty"));
        }

        let first_byte = read_le::<u8>(data)?;
        match MethodBodyFlags::from_bits_truncate(u16::from(first_byte & 0b_00000011_u8)) {
            MethodBodyFlags::TINY_FORMAT => {
                let size_code = (first_byte >> 2) as usize;
                if size_code + 1 > data.len() {
                    return Err(OutOfBounds);
                }

                Ok(MethodBody {
                    max_stack: TINY_MAX_STACK,
                    init_locals: false,
                    local_var_sig_token: Token::new(0),
                    code: data[1..=size_code].to_vec(),
                    exception_clauses: Vec::new(),
                    is_fat: false,
                })
            }
            MethodBodyFlags::FAT_FORMAT => {
                if data.len() < FAT_HEADER_SIZE {
                    return Err(OutOfBounds);
                }

                let first_duo = read_le::<u16>(data)?;
                let size_header = ((first_duo >> 12) * 4) as usize;
                if size_header < FAT_HEADER_SIZE {
                    return Err(malformed_error!("Fat header size {} too small", size_header));
                }

                let size_code = read_le::<u32>(&data[4..])? as usize;
                let code_end = size_header.checked_add(size_code).ok_or(OutOfBounds)?;
                if data.len() < code_end {
                    return Err(OutOfBounds);
                }

                let flags_header =
                    MethodBodyFlags::from_bits_truncate(first_duo & 0b_0000111111111111_u16);
                let max_stack = read_le::<u16>(&data[2..])?;
                let local_var_sig_token = Token::new(read_le::<u32>(&data[8..])?);

                let exception_clauses = if flags_header.contains(MethodBodyFlags::MORE_SECTS) {
                    Self::parse_sections(data, code_end)?
                } else {
                    Vec::new()
                };

                Ok(MethodBody {
                    max_stack,
                    init_locals: flags_header.contains(MethodBodyFlags::INIT_LOCALS),
                    local_var_sig_token,
                    code: data[size_header..code_end].to_vec(),
                    exception_clauses,
                    is_fat: true,
                })
            }
            _ => Err(malformed_error!(
                "MethodHeader is neither FAT nor TINY - {}",
                first_byte
            )),
        }
    }

    /// Exception Handling -> II.25.4.6
    fn parse_sections(data: &[u8], code_end: usize) -> Result<Vec<ExceptionClause>> {
        let mut clauses = Vec::new();
        let mut cursor = (code_end + 3) & !3;

        while data.len() >= cursor + 4 {
            let section_flags = SectionFlags::from_bits_truncate(read_le::<u8>(&data[cursor..])?);
            if !section_flags.contains(SectionFlags::EHTABLE) {
                break;
            }

            if section_flags.contains(SectionFlags::FAT_FORMAT) {
                let section_size = (read_le::<u32>(&data[cursor..])? >> 8) as usize;
                if section_size < 4 || data.len() < cursor + section_size {
                    return Err(malformed_error!("Fat EH section of {} bytes", section_size));
                }

                let mut offset = cursor + 4;
                for _ in 0..(section_size - 4) / 24 {
                    clauses.push(ExceptionClause {
                        // Intentionally truncating u32 to u16 for exception handler flags
                        #[allow(clippy::cast_possible_truncation)]
                        flags: ExceptionClauseFlags::from_bits_truncate(
                            read_le_at::<u32>(data, &mut offset)? as u16,
                        ),
                        try_offset: read_le_at::<u32>(data, &mut offset)?,
                        try_length: read_le_at::<u32>(data, &mut offset)?,
                        handler_offset: read_le_at::<u32>(data, &mut offset)?,
                        handler_length: read_le_at::<u32>(data, &mut offset)?,
                        class_token_or_filter: read_le_at::<u32>(data, &mut offset)?,
                    });
                }
                cursor += section_size;
            } else {
                let section_size = read_le::<u8>(&data[cursor + 1..])? as usize;
                if section_size < 4 || data.len() < cursor + section_size {
                    return Err(malformed_error!("Small EH section of {} bytes", section_size));
                }

                let mut offset = cursor + 4;
                for _ in 0..(section_size - 4) / 12 {
                    clauses.push(ExceptionClause {
                        flags: ExceptionClauseFlags::from_bits_truncate(read_le_at::<u16>(
                            data,
                            &mut offset,
                        )?),
                        try_offset: u32::from(read_le_at::<u16>(data, &mut offset)?),
                        try_length: u32::from(read_le_at::<u8>(data, &mut offset)?),
                        handler_offset: u32::from(read_le_at::<u16>(data, &mut offset)?),
                        handler_length: u32::from(read_le_at::<u8>(data, &mut offset)?),
                        class_token_or_filter: read_le_at::<u32>(data, &mut offset)?,
                    });
                }
                cursor += section_size;
            }

            if !section_flags.contains(SectionFlags::MORE_SECTS) {
                break;
            }
            cursor = (cursor + 3) & !3;
        }

        Ok(clauses)
    }

    /// True if this body can be written with a tiny header.
    #[must_use]
    pub fn fits_tiny(&self) -> bool {
        self.code.len() <= TINY_MAX_CODE
            && self.max_stack <= TINY_MAX_STACK
            && !self.init_locals
            && self.local_var_sig_token.is_null()
            && self.exception_clauses.is_empty()
    }

    /// Serializes the body.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the code or the exception table is too
    /// large for the fat layout.
    pub fn encode(&self) -> Result<Vec<u8>> {
        if self.fits_tiny() {
            let mut out = Vec::with_capacity(self.code.len() + 1);
            out.push(((self.code.len() as u8) << 2) | MethodBodyFlags::TINY_FORMAT.bits() as u8);
            out.extend_from_slice(&self.code);
            return Ok(out);
        }

        let mut flags = MethodBodyFlags::FAT_FORMAT;
        if self.init_locals {
            flags |= MethodBodyFlags::INIT_LOCALS;
        }
        if !self.exception_clauses.is_empty() {
            flags |= MethodBodyFlags::MORE_SECTS;
        }

        let code_size = u32::try_from(self.code.len())
            .map_err(|_| malformed_error!("Method code of {} bytes", self.code.len()))?;

        let mut out = Vec::with_capacity(FAT_HEADER_SIZE + self.code.len());
        write_le(&mut out, flags.bits() | ((FAT_HEADER_SIZE as u16 / 4) << 12));
        write_le(&mut out, self.max_stack);
        write_le(&mut out, code_size);
        write_le(&mut out, self.local_var_sig_token.value());
        out.extend_from_slice(&self.code);

        if !self.exception_clauses.is_empty() {
            while out.len() % 4 != 0 {
                out.push(0);
            }

            let section_size = 4 + self.exception_clauses.len() * 24;
            if section_size > 0x00FF_FFFF {
                return Err(malformed_error!(
                    "{} exception clauses do not fit one section",
                    self.exception_clauses.len()
                ));
            }
            let header = (section_size as u32) << 8
                | u32::from((SectionFlags::EHTABLE | SectionFlags::FAT_FORMAT).bits());
            write_le(&mut out, header);

            for clause in &self.exception_clauses {
                write_le(&mut out, u32::from(clause.flags.bits()));
                write_le(&mut out, clause.try_offset);
                write_le(&mut out, clause.try_length);
                write_le(&mut out, clause.handler_offset);
                write_le(&mut out, clause.handler_length);
                write_le(&mut out, clause.class_token_or_filter);
            }
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiny() {
        // ldarg.1, ldarg.2, add, ret
        let data = [0x12, 0x03, 0x04, 0x58, 0x2A];

        let body = MethodBody::parse(&data).unwrap();

        assert!(!body.is_fat);
        assert!(!body.init_locals);
        assert_eq!(body.max_stack, 8);
        assert_eq!(body.code, vec![0x03, 0x04, 0x58, 0x2A]);
        assert!(body.local_var_sig_token.is_null());
        assert_eq!(body.encode().unwrap(), data);
    }

    #[test]
    fn fat_with_locals() {
        let mut body = MethodBody::new(vec![0x16, 0x0A, 0x06, 0x2A], 1);
        body.init_locals = true;
        body.local_var_sig_token = Token::new(0x1100_0001);

        let data = body.encode().unwrap();
        assert_eq!(data.len(), FAT_HEADER_SIZE + 4);
        assert_eq!(data[0] & 0x3, 0x3);

        let parsed = MethodBody::parse(&data).unwrap();
        assert!(parsed.is_fat);
        assert!(parsed.init_locals);
        assert_eq!(parsed.max_stack, 1);
        assert_eq!(parsed.local_var_sig_token, Token::new(0x1100_0001));
        assert_eq!(parsed.code, body.code);
    }

    #[test]
    fn fat_exception_section() {
        let mut body = MethodBody::new(vec![0x00; 13], 2);
        body.exception_clauses
            .push(ExceptionClause::catch(0, 5, 5, 8, Token::new(0x0100_0002)));

        let data = body.encode().unwrap();
        // Header + 13 bytes code, padded to 28, then the 28 byte fat section
        assert_eq!(data.len(), 28 + 28);

        let parsed = MethodBody::parse(&data).unwrap();
        assert_eq!(parsed.exception_clauses, body.exception_clauses);
        assert_eq!(
            parsed.exception_clauses[0].class_token(),
            Some(Token::new(0x0100_0002))
        );
    }

    #[test]
    fn small_exception_section() {
        let mut data = vec![0x1B, 0x30, 0x02, 0x00, 0x04, 0x00, 0x00, 0x00];
        data.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]);
        data.extend_from_slice(&[0x00, 0x00, 0xDE, 0x00]);
        // Small EH section with one clause: flags, try 0+1, handler 1+2, class token
        data.extend_from_slice(&[0x01, 0x10, 0x00, 0x00]);
        data.extend_from_slice(&[0x00, 0x00, 0x00, 0x00, 0x01, 0x01, 0x00, 0x02]);
        data.extend_from_slice(&0x0100_0001u32.to_le_bytes());

        let parsed = MethodBody::parse(&data).unwrap();
        assert_eq!(parsed.exception_clauses.len(), 1);
        let clause = &parsed.exception_clauses[0];
        assert_eq!((clause.try_offset, clause.try_length), (0, 1));
        assert_eq!((clause.handler_offset, clause.handler_length), (1, 2));
    }

    #[test]
    fn truncated_bodies() {
        assert!(MethodBody::parse(&[]).is_err());
        assert!(matches!(
            MethodBody::parse(&[0x12, 0x03]),
            Err(crate::Error::OutOfBounds)
        ));
        assert!(matches!(
            MethodBody::parse(&[0x01]),
            Err(crate::Error::Malformed { .. })
        ));
    }
}
