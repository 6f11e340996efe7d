//! Domain model module declarations.

pub mod certificate;
pub mod session;
