//! Metadata model: tokens, signatures, method and type definitions.
//!
//! This is the vocabulary shared by type images, the rewriter, the hook registry and the
//! runtime bridge.

pub mod method;
pub mod signatures;
pub mod token;
pub mod typesystem;
