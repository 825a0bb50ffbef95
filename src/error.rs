//! Host-facing typed extraction errors.

use thiserror::Error;

/// Failure to read a host-level value out of an evaluation result.
///
/// Inside the engine, errors are ordinary values carrying their origin
/// (see the `Error` chunk type); this enum only exists at the API
/// boundary, where a host asks for a concrete Rust type.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueError {
    #[error("reference is null")]
    Null,
    #[error("expected an atom, found a structured value")]
    NotAnAtom,
    #[error("atom is not a canonical small integer")]
    NotAnInt,
    #[error("evaluation produced an error value")]
    ErrorValue,
}
