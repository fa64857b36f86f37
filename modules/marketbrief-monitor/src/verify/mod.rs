//! The verification subsystem: numeral canonicalization and entity
//! alignment. Everything here is pure and deterministic; the non-
//! deterministic collaborators never reach into it.

pub mod entity;
pub mod numeral;

pub use entity::{align, extract_claims, AlignmentOutcome, Claim, EntityAlignment};
pub use numeral::{CanonicalValue, ParsedNumeral, UnitScale};
