//! Collaborator traits supplied by the caller at parse time: the
//! externally-supplied `$name` value provider, the custom-type processor,
//! and the `var` handler (spec.md §6).

use crate::bitstream::{BitStreamReader, ByteOrder};
use crate::error::ParseError;

/// Arity with which a scalar-family instruction was declared: a plain
/// scalar, a fixed-size array, or a whole-stream ("`_`") array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Scalar,
    Fixed(i64),
    WholeStream,
}

/// Resolves `$name` references in expressions.
pub trait ValueProvider {
    fn get(&self, name: &str) -> Option<i64>;
}

/// The result of an external (`var`/custom-type) read: either a single
/// element's raw bytes, or — for array arities — one entry per element.
#[derive(Debug, Clone, PartialEq)]
pub enum ExternalRead {
    Scalar(Vec<u8>),
    Array(Vec<Vec<u8>>),
}

/// Handles `CUSTOM_TYPE` instructions for type names the compiler doesn't
/// know natively. Receives the whole declared arity in one call — a
/// whole-stream custom-type array is the processor's responsibility to
/// terminate, typically by consulting [`BitStreamReader::has_available_data`].
pub trait CustomTypeProcessor {
    fn recognises(&self, type_name: &str) -> bool;

    fn read(
        &self,
        type_name: &str,
        reader: &mut BitStreamReader,
        byte_order: ByteOrder,
        extra: i64,
        arity: Arity,
        field_path: &str,
    ) -> Result<ExternalRead, ParseError>;
}

/// Handles `VAR` instructions. `extra` is the resolved extra-data value,
/// defaulting to `0` when the schema token omitted a `:extra` slot.
pub trait VarHandler {
    fn handle(
        &self,
        reader: &mut BitStreamReader,
        byte_order: ByteOrder,
        extra: i64,
        field_path: &str,
        arity: Arity,
    ) -> Result<ExternalRead, ParseError>;
}
