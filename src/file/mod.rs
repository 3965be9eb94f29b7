//! Byte-level reading and writing for type images and method bodies.
//!
//! # Key Components
//!
//! - [`crate::file::io`] - Endian-aware primitive reads and writes plus ECMA-335 compressed
//!   integer encoding
//! - [`crate::file::parser::Parser`] - Cursor-based reader used by every decoder in the crate

pub mod io;
pub mod parser;
