//! Declarative binary-format parsing: compiles a textual schema into
//! bytecode, then interprets that bytecode against a bit-stream to produce
//! a typed, path-addressable field tree.
//!
//! The pipeline mirrors the dependency order laid out in `spec.md` §2:
//! bit-stream reader → tokenizer → expression compiler/evaluator → schema
//! compiler → parser runtime → field model.
//!
//! ```ignore
//! let schema = binschema::CompiledSchema::compile("ubyte len; byte[len] data;")?;
//! let parsed = schema.parse(&[3, 10, 20, 30], &binschema::ParseOptions::new())?;
//! assert_eq!(parsed.get_as_int("len"), Some(3));
//! ```

pub mod bitstream;
pub mod bytecode;
pub mod compiler;
pub mod error;
pub mod expr;
pub mod external;
pub mod field;
pub mod runtime;
pub mod token;

pub use bitstream::{BitOrder, ByteOrder};
pub use compiler::CompiledSchema;
pub use error::ParseError;
pub use external::{Arity, CustomTypeProcessor, ExternalRead, ValueProvider, VarHandler};
pub use field::{Field, Scalar, ScalarArray, StructField};
pub use runtime::ParseOptions;
