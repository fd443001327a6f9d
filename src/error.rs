//! The crate's single error type.
//!
//! One variant per entry in the error taxonomy from spec.md §7
//! (`TokenizationError`, `CompilationError`, `ExpressionError`,
//! `ParsingError`, `EndOfStreamError`, `InternalError`), several of which
//! fan out into multiple concrete variants so each carries precise
//! positional context: a byte offset into the schema text at compile time,
//! or a bytecode offset plus dotted field path at parse time.

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq, Clone)]
pub enum ParseError {
    // ---- TokenizationError ----------------------------------------------------
    #[error("unexpected character {ch:?} at byte {pos} while tokenizing schema")]
    UnexpectedChar { ch: char, pos: usize },

    #[error("malformed token at byte {pos}: {message}")]
    MalformedToken { pos: usize, message: String },

    #[error("unterminated struct/array block starting at byte {pos}")]
    UnterminatedBlock { pos: usize },

    // ---- CompilationError -------------------------------------------------------
    #[error("unbalanced struct nesting: {open} unclosed struct(s) at end of schema")]
    UnbalancedStruct { open: usize },

    #[error("'{name}' closes a struct that was never opened, at byte {pos}")]
    UnmatchedStructEnd { name: String, pos: usize },

    #[error("duplicate field name '{name}' in the same struct scope at byte {pos}")]
    DuplicateFieldName { name: String, pos: usize },

    #[error("field name '{name}' contains a forbidden '.' character at byte {pos}")]
    IllegalNameCharacter { name: String, pos: usize },

    #[error("a second whole-stream ('_') array is not allowed at byte {pos}")]
    TwoWholeStreamArrays { pos: usize },

    #[error("instruction at byte {pos} follows a whole-stream array without closing its struct")]
    InstructionAfterWholeStream { pos: usize },

    #[error("bit field width must be in 1..=8, got {width} at byte {pos}")]
    BitWidthOutOfRange { width: i64, pos: usize },

    #[error("align modulus must be > 0, got {modulus} at byte {pos}")]
    InvalidAlignModulus { modulus: i64, pos: usize },

    #[error("fixed array size must be >= 0, got {size} at byte {pos}")]
    InvalidArraySize { size: i64, pos: usize },

    #[error("skip count must be >= 0, got {count} at byte {pos}")]
    InvalidSkipCount { count: i64, pos: usize },

    #[error("'{opcode}' cannot be named or used as an array, at byte {pos}")]
    UnexpectedlyNamedOrArrayed { opcode: String, pos: usize },

    #[error("unknown type '{name}' at byte {pos}")]
    UnknownType { name: String, pos: usize },

    #[error("custom type '{name}' rejected by the configured type processor, at byte {pos}")]
    CustomTypeRejected { name: String, pos: usize },

    // ---- ExpressionError -------------------------------------------------------
    #[error("unresolved name '{name}' in expression")]
    UnresolvedName { name: String },

    #[error("division or modulus by zero in expression")]
    DivisionByZero,

    // ---- ParsingError -----------------------------------------------------------
    #[error("computed array length {length} is negative for field '{path}'")]
    NegativeLength { length: i64, path: String },

    #[error("custom-type handler for '{name}' failed: {message}")]
    CustomTypeHandlerFailed { name: String, message: String },

    #[error("var handler failed for field '{path}': {message}")]
    VarHandlerFailed { path: String, message: String },

    #[error("no custom-type processor configured for type '{name}'")]
    NoCustomTypeProcessor { name: String },

    #[error("no var handler configured for field '{path}'")]
    NoVarHandler { path: String },

    #[error("invalid packed-integer prefix byte {0:#04x}")]
    InvalidPackedIntPrefix(u8),

    // ---- EndOfStreamError -------------------------------------------------------
    #[error("end of stream reached while reading {context}")]
    EndOfStream { context: String },

    // ---- InternalError -----------------------------------------------------------
    #[error("internal error (this is a bug): {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, ParseError>;
