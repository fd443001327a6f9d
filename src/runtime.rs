//! Bytecode interpreter: walks a compiled schema's bytecode against a byte
//! slice, producing a field tree (spec.md §4.5).
//!
//! `Parser` keeps two cursors that matter across a struct-array's
//! iterations — the bytecode position and the named-field-index position —
//! both captured at a struct-array's opening and rewound before each
//! iteration. Length-expression and custom-type lookups are addressed
//! directly by the index baked into their instruction's operand at compile
//! time (see `compiler.rs`'s module doc comment), so they need no cursor of
//! their own.

use crate::bitstream::{BitOrder, BitStreamReader, ByteOrder};
use crate::bytecode::{flags, unpack_i32, wide_flags, Opcode};
use crate::compiler::CompiledSchema;
use crate::error::ParseError;
use crate::expr::ExprEnv;
use crate::external::{Arity, CustomTypeProcessor, ExternalRead, ValueProvider, VarHandler};
use crate::field::{Field, Scalar, ScalarArray, StructField};

/// Parse-time configuration: bit order plus the optional collaborator
/// hooks a schema's `var`/custom-type/`$name` instructions need (spec.md
/// §6). Built with the same consuming-builder style as the rest of the
/// crate's options types.
pub struct ParseOptions {
    bit_order: BitOrder,
    value_provider: Option<Box<dyn ValueProvider>>,
    custom_type_processor: Option<Box<dyn CustomTypeProcessor>>,
    var_handler: Option<Box<dyn VarHandler>>,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self { bit_order: BitOrder::default(), value_provider: None, custom_type_processor: None, var_handler: None }
    }
}

impl ParseOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bit_order(mut self, bit_order: BitOrder) -> Self {
        self.bit_order = bit_order;
        self
    }

    pub fn with_value_provider(mut self, provider: impl ValueProvider + 'static) -> Self {
        self.value_provider = Some(Box::new(provider));
        self
    }

    pub fn with_custom_type_processor(mut self, processor: impl CustomTypeProcessor + 'static) -> Self {
        self.custom_type_processor = Some(Box::new(processor));
        self
    }

    pub fn with_var_handler(mut self, handler: impl VarHandler + 'static) -> Self {
        self.var_handler = Some(Box::new(handler));
        self
    }
}

/// The arity a scalar-family or struct instruction was declared with, once
/// its array-size operand (literal or expression) has been resolved to a
/// concrete count.
#[derive(Debug, Clone, Copy)]
enum ArityKind {
    Scalar,
    Fixed(i64),
    WholeStream,
}

impl ArityKind {
    fn into_external(self) -> Arity {
        match self {
            ArityKind::Scalar => Arity::Scalar,
            ArityKind::Fixed(n) => Arity::Fixed(n),
            ArityKind::WholeStream => Arity::WholeStream,
        }
    }
}

struct Env<'a> {
    named_values: &'a [Option<i64>],
    options: &'a ParseOptions,
    stream_pos: i64,
}

impl ExprEnv for Env<'_> {
    fn field(&self, slot: usize) -> Option<i64> {
        self.named_values.get(slot).copied().flatten()
    }

    fn external(&self, name: &str) -> Option<i64> {
        self.options.value_provider.as_deref().and_then(|p| p.get(name))
    }

    fn stream_pos(&self) -> i64 {
        self.stream_pos
    }
}

struct Parser<'a> {
    schema: &'a CompiledSchema,
    reader: BitStreamReader<'a>,
    options: &'a ParseOptions,
    /// Most recently parsed value of each named scalar field, indexed by
    /// the same slot as `schema.named_fields`. Re-written on every struct-
    /// array iteration; struct/array-typed named fields keep their `None`.
    named_values: Vec<Option<i64>>,
    /// Bytecode cursor.
    pos: usize,
    /// Next unclaimed slot in `schema.named_fields`.
    named_idx: usize,
}

impl<'a> Parser<'a> {
    fn read_bc_byte(&mut self) -> Result<u8, ParseError> {
        let b = *self
            .schema
            .bytecode
            .get(self.pos)
            .ok_or_else(|| ParseError::Internal(format!("bytecode cursor {} past end", self.pos)))?;
        self.pos += 1;
        Ok(b)
    }

    fn read_bc_int(&mut self) -> Result<i32, ParseError> {
        let (v, n) = unpack_i32(&self.schema.bytecode, self.pos)?;
        self.pos += n;
        Ok(v)
    }

    fn peek_opcode(&self) -> Result<Opcode, ParseError> {
        let b = *self
            .schema
            .bytecode
            .get(self.pos)
            .ok_or_else(|| ParseError::Internal(format!("bytecode cursor {} past end", self.pos)))?;
        Opcode::from_nibble(b & Opcode::MASK)
    }

    fn eval_length_expr(&self, idx: usize) -> Result<i64, ParseError> {
        let expr = self
            .schema
            .length_exprs
            .get(idx)
            .ok_or_else(|| ParseError::Internal(format!("length-expression index {idx} out of range")))?;
        let env = Env { named_values: &self.named_values, options: self.options, stream_pos: self.reader.counter() as i64 };
        Ok(expr.eval(&env)? as i64)
    }

    /// Runs one struct's body: reads instructions until bytecode runs out
    /// (the implicit root scope) or a `STRUCT_END` belonging to the
    /// current scope is reached (left unconsumed for the caller). When
    /// `nonskip` is false this still reads every instruction's real data —
    /// including recursing into nested structs and evaluating expressions —
    /// it just doesn't accumulate the resulting fields, matching the
    /// schema's own "skip-parse" pass over a struct-array body (spec.md §9).
    fn parse_struct(&mut self, nonskip: bool) -> Result<Vec<Field>, ParseError> {
        let mut children = Vec::new();
        loop {
            if self.pos >= self.schema.bytecode.len() {
                break;
            }
            if self.peek_opcode()? == Opcode::StructEnd {
                break;
            }
            if let Some(field) = self.step(nonskip)? {
                if nonskip {
                    children.push(field);
                }
            }
        }
        Ok(children)
    }

    /// Consumes a `STRUCT_END` opcode byte and its back-pointer operand,
    /// assuming the cursor sits exactly at the matching `STRUCT_END`.
    fn consume_struct_end(&mut self) -> Result<(), ParseError> {
        let b = self.read_bc_byte()?;
        if Opcode::from_nibble(b & Opcode::MASK)? != Opcode::StructEnd {
            return Err(ParseError::Internal(format!("expected STRUCT_END at bytecode offset {}", self.pos - 1)));
        }
        self.read_bc_int()?; // back-pointer, unused during forward parsing
        Ok(())
    }

    /// Scans forward from `start` purely by instruction shape — no bit
    /// reads — until the matching `STRUCT_END` is consumed. Used only when
    /// a whole-stream struct array is declared with no data left to read at
    /// all: there is nothing to parse even in skip mode, so the cursor must
    /// be moved on bytecode shape alone.
    fn skip_bytecode_only(&mut self, start: usize) -> Result<(), ParseError> {
        self.pos = start;
        let mut depth: i32 = 0;
        loop {
            let first_byte = self.read_bc_byte()?;
            let opcode = Opcode::from_nibble(first_byte & Opcode::MASK)?;
            let wide = first_byte & flags::WIDE != 0;
            let array = first_byte & flags::ARRAY != 0;
            let wide_byte = if wide { self.read_bc_byte()? } else { 0 };

            if opcode == Opcode::StructEnd {
                self.read_bc_int()?;
                if depth == 0 {
                    return Ok(());
                }
                depth -= 1;
                continue;
            }

            if array {
                self.read_bc_int()?;
            }
            let needs_extra = matches!(opcode, Opcode::Bit | Opcode::Align | Opcode::Skip | Opcode::Var | Opcode::CustomType);
            if needs_extra {
                self.read_bc_int()?;
            }
            if opcode == Opcode::CustomType {
                self.read_bc_int()?;
            }
            let _ = wide_byte;
            if opcode == Opcode::StructStart {
                depth += 1;
            }
        }
    }

    fn step(&mut self, nonskip: bool) -> Result<Option<Field>, ParseError> {
        let start_offset = self.pos;
        let first_byte = self.read_bc_byte()?;
        let opcode = Opcode::from_nibble(first_byte & Opcode::MASK)?;
        let named = first_byte & flags::NAMED != 0;
        let array = first_byte & flags::ARRAY != 0;
        let little_endian = first_byte & flags::LITTLE_ENDIAN != 0;
        let wide = first_byte & flags::WIDE != 0;
        let wide_byte = if wide { self.read_bc_byte()? } else { 0 };
        let expr_or_wholestream = wide_byte & wide_flags::EXPR_OR_WHOLESTREAM != 0;
        let extra_as_expr = wide_byte & wide_flags::EXTRA_AS_EXPRESSION != 0;
        let byte_order = if little_endian { ByteOrder::Little } else { ByteOrder::Big };

        let name_slot = if named {
            let slot = self.named_idx;
            self.named_idx += 1;
            Some(slot)
        } else {
            None
        };
        let leaf_name = name_slot.map(|slot| self.schema.named_fields[slot].leaf_name.clone());
        let field_path = name_slot
            .map(|slot| self.schema.named_fields[slot].full_path.clone())
            .unwrap_or_else(|| format!("<anonymous@{start_offset}>"));

        let arity = if array && !expr_or_wholestream {
            let v = self.read_bc_int()? as i64;
            if v < 0 {
                return Err(ParseError::NegativeLength { length: v, path: field_path.clone() });
            }
            ArityKind::Fixed(v)
        } else if array && expr_or_wholestream {
            let idx = self.read_bc_int()? as usize;
            let v = self.eval_length_expr(idx)?;
            if v < 0 {
                return Err(ParseError::NegativeLength { length: v, path: field_path.clone() });
            }
            ArityKind::Fixed(v)
        } else if !array && expr_or_wholestream {
            ArityKind::WholeStream
        } else {
            ArityKind::Scalar
        };

        let needs_extra = matches!(opcode, Opcode::Bit | Opcode::Align | Opcode::Skip | Opcode::Var | Opcode::CustomType);
        let extra_value: i64 = if needs_extra {
            let raw = self.read_bc_int()?;
            if extra_as_expr {
                self.eval_length_expr(raw as usize)?
            } else {
                raw as i64
            }
        } else {
            0
        };

        let custom_type_idx = if opcode == Opcode::CustomType { Some(self.read_bc_int()? as usize) } else { None };

        // The compiler only range-checks literal extras (compiler.rs); an
        // expression-valued extra is checked here, once evaluated, so a
        // schema that's valid only for some inputs fails as a controlled
        // error rather than truncating silently or panicking in the reader.
        match opcode {
            Opcode::Bit if !(1..=8).contains(&extra_value) => {
                return Err(ParseError::BitWidthOutOfRange { width: extra_value, pos: start_offset })
            }
            Opcode::Align if extra_value <= 0 => {
                return Err(ParseError::InvalidAlignModulus { modulus: extra_value, pos: start_offset })
            }
            Opcode::Skip if extra_value < 0 => {
                return Err(ParseError::InvalidSkipCount { count: extra_value, pos: start_offset })
            }
            _ => {}
        }

        match opcode {
            Opcode::StructStart => self.handle_struct_start(arity, leaf_name, nonskip),
            Opcode::StructEnd => Err(ParseError::Internal("STRUCT_END reached via step()".into())),
            Opcode::Align => {
                self.reader.align_to_modulus(extra_value as u64)?;
                Ok(None)
            }
            Opcode::Skip => {
                self.reader.skip_bytes(extra_value as u64)?;
                Ok(None)
            }
            Opcode::ResetCounter => {
                self.reader.reset_counter()?;
                Ok(None)
            }
            Opcode::Bit => self.handle_bit(arity, extra_value, leaf_name, name_slot, nonskip),
            Opcode::Bool | Opcode::UByte | Opcode::Byte | Opcode::UShort | Opcode::Short | Opcode::Int | Opcode::Long => {
                self.handle_scalar_family(opcode, arity, byte_order, leaf_name, name_slot, nonskip)
            }
            Opcode::Var => self.handle_var(arity, byte_order, extra_value, leaf_name, &field_path, nonskip),
            Opcode::CustomType => self.handle_custom_type(
                arity,
                byte_order,
                extra_value,
                custom_type_idx.expect("CUSTOM_TYPE always carries a descriptor index"),
                start_offset,
                leaf_name,
                &field_path,
                nonskip,
            ),
        }
    }

    fn handle_bit(
        &mut self,
        arity: ArityKind,
        width: i64,
        leaf_name: Option<String>,
        name_slot: Option<usize>,
        nonskip: bool,
    ) -> Result<Option<Field>, ParseError> {
        let width = width as u32;
        let value = match arity {
            ArityKind::Scalar => {
                let v = self.reader.read_bits(width)? as u8;
                if let Some(slot) = name_slot {
                    self.named_values[slot] = Some(v as i64);
                }
                Field::Scalar { name: leaf_name, value: Scalar::Bit(v) }
            }
            ArityKind::Fixed(n) => {
                let vs = self.reader.read_bits_array(n, width)?.into_iter().map(|v| v as u8).collect();
                Field::ScalarArray { name: leaf_name, value: ScalarArray::Bit(vs) }
            }
            ArityKind::WholeStream => {
                let vs = self.reader.read_bits_array(-1, width)?.into_iter().map(|v| v as u8).collect();
                Field::ScalarArray { name: leaf_name, value: ScalarArray::Bit(vs) }
            }
        };
        Ok(if nonskip { Some(value) } else { None })
    }

    fn read_scalar(&mut self, opcode: Opcode, byte_order: ByteOrder) -> Result<Scalar, ParseError> {
        Ok(match opcode {
            Opcode::Bool => Scalar::Bool(self.reader.read_bool()?),
            Opcode::UByte => Scalar::UByte(self.reader.read_unsigned_byte()?),
            Opcode::Byte => Scalar::Byte(self.reader.read_byte()?),
            Opcode::UShort => Scalar::UShort(self.reader.read_unsigned_short(byte_order)?),
            Opcode::Short => Scalar::Short(self.reader.read_short(byte_order)?),
            Opcode::Int => Scalar::Int(self.reader.read_int(byte_order)?),
            Opcode::Long => Scalar::Long(self.reader.read_long(byte_order)?),
            other => return Err(ParseError::Internal(format!("{other:?} is not a scalar-family opcode"))),
        })
    }

    fn read_scalar_array(&mut self, opcode: Opcode, n: i64, byte_order: ByteOrder) -> Result<ScalarArray, ParseError> {
        Ok(match opcode {
            Opcode::Bool => ScalarArray::Bool(self.reader.read_bool_array(n)?),
            Opcode::UByte => ScalarArray::UByte(self.reader.read_unsigned_byte_array(n)?),
            Opcode::Byte => ScalarArray::Byte(self.reader.read_byte_array(n)?),
            Opcode::UShort => ScalarArray::UShort(self.reader.read_unsigned_short_array(n, byte_order)?),
            Opcode::Short => ScalarArray::Short(self.reader.read_short_array(n, byte_order)?),
            Opcode::Int => ScalarArray::Int(self.reader.read_int_array(n, byte_order)?),
            Opcode::Long => ScalarArray::Long(self.reader.read_long_array(n, byte_order)?),
            other => return Err(ParseError::Internal(format!("{other:?} is not a scalar-family opcode"))),
        })
    }

    fn handle_scalar_family(
        &mut self,
        opcode: Opcode,
        arity: ArityKind,
        byte_order: ByteOrder,
        leaf_name: Option<String>,
        name_slot: Option<usize>,
        nonskip: bool,
    ) -> Result<Option<Field>, ParseError> {
        let field = match arity {
            ArityKind::Scalar => {
                let v = self.read_scalar(opcode, byte_order)?;
                if let Some(slot) = name_slot {
                    if let Some(n) = v.as_i64() {
                        self.named_values[slot] = Some(n);
                    }
                }
                Field::Scalar { name: leaf_name, value: v }
            }
            ArityKind::Fixed(n) => {
                Field::ScalarArray { name: leaf_name, value: self.read_scalar_array(opcode, n, byte_order)? }
            }
            ArityKind::WholeStream => {
                Field::ScalarArray { name: leaf_name, value: self.read_scalar_array(opcode, -1, byte_order)? }
            }
        };
        Ok(if nonskip { Some(field) } else { None })
    }

    fn handle_var(
        &mut self,
        arity: ArityKind,
        byte_order: ByteOrder,
        extra: i64,
        leaf_name: Option<String>,
        field_path: &str,
        nonskip: bool,
    ) -> Result<Option<Field>, ParseError> {
        let handler = self
            .options
            .var_handler
            .as_deref()
            .ok_or_else(|| ParseError::NoVarHandler { path: field_path.to_string() })?;
        let read = handler
            .handle(&mut self.reader, byte_order, extra, field_path, arity.into_external())
            .map_err(|e| match e {
                ParseError::VarHandlerFailed { .. } => e,
                other => ParseError::VarHandlerFailed { path: field_path.to_string(), message: other.to_string() },
            })?;
        let field = match read {
            ExternalRead::Scalar(bytes) => Field::Scalar { name: leaf_name, value: Scalar::Var(bytes) },
            ExternalRead::Array(arrs) => Field::ScalarArray { name: leaf_name, value: ScalarArray::Var(arrs) },
        };
        Ok(if nonskip { Some(field) } else { None })
    }

    fn handle_custom_type(
        &mut self,
        arity: ArityKind,
        byte_order: ByteOrder,
        extra: i64,
        type_idx: usize,
        start_offset: usize,
        leaf_name: Option<String>,
        field_path: &str,
        nonskip: bool,
    ) -> Result<Option<Field>, ParseError> {
        let type_name = self.schema.custom_types[type_idx].type_name.clone();
        let processor = self
            .options
            .custom_type_processor
            .as_deref()
            .ok_or_else(|| ParseError::NoCustomTypeProcessor { name: type_name.clone() })?;
        if !processor.recognises(&type_name) {
            // Reuses the compile-time-grouped variant: the processor is a
            // parse-time collaborator, so "rejected" can only be observed
            // here, against the bytecode offset rather than a schema-text one.
            return Err(ParseError::CustomTypeRejected { name: type_name, pos: start_offset });
        }
        let read = processor
            .read(&type_name, &mut self.reader, byte_order, extra, arity.into_external(), field_path)
            .map_err(|e| match e {
                ParseError::CustomTypeHandlerFailed { .. } => e,
                other => ParseError::CustomTypeHandlerFailed { name: type_name.clone(), message: other.to_string() },
            })?;
        let field = match read {
            ExternalRead::Scalar(bytes) => Field::Scalar { name: leaf_name, value: Scalar::Custom(bytes) },
            ExternalRead::Array(arrs) => Field::ScalarArray { name: leaf_name, value: ScalarArray::Custom(arrs) },
        };
        Ok(if nonskip { Some(field) } else { None })
    }

    fn handle_struct_start(
        &mut self,
        arity: ArityKind,
        leaf_name: Option<String>,
        nonskip: bool,
    ) -> Result<Option<Field>, ParseError> {
        let body_start = self.pos;
        let named_at_open = self.named_idx;

        match arity {
            ArityKind::Scalar => {
                let children = self.parse_struct(nonskip)?;
                self.consume_struct_end()?;
                Ok(if nonskip { Some(Field::Struct(StructField { name: leaf_name, children })) } else { None })
            }
            ArityKind::Fixed(n) => {
                if n == 0 {
                    // Preserved quirk (spec.md §9 open question): even a
                    // zero-length struct array advances the bytecode cursor
                    // past its body before the back-pointer is consumed.
                    // This is a pure bytecode-shape skip, not a stream read —
                    // the array may legitimately be zero-length at
                    // end-of-stream, with no body bytes left to read at all.
                    self.skip_bytecode_only(body_start)?;
                    return Ok(if nonskip {
                        Some(Field::StructArray { name: leaf_name, elements: Vec::new() })
                    } else {
                        None
                    });
                }
                let mut elements = Vec::with_capacity(n as usize);
                for _ in 0..n {
                    self.pos = body_start;
                    self.named_idx = named_at_open;
                    let children = self.parse_struct(nonskip)?;
                    self.consume_struct_end()?;
                    if nonskip {
                        elements.push(StructField { name: None, children });
                    }
                }
                Ok(if nonskip { Some(Field::StructArray { name: leaf_name, elements }) } else { None })
            }
            ArityKind::WholeStream => {
                if !self.reader.has_available_data() {
                    self.skip_bytecode_only(body_start)?;
                    return Ok(if nonskip {
                        Some(Field::StructArray { name: leaf_name, elements: Vec::new() })
                    } else {
                        None
                    });
                }
                let mut elements = Vec::new();
                loop {
                    self.pos = body_start;
                    self.named_idx = named_at_open;
                    let children = self.parse_struct(nonskip)?;
                    self.consume_struct_end()?;
                    if nonskip {
                        elements.push(StructField { name: None, children });
                    }
                    if !self.reader.has_available_data() {
                        break;
                    }
                }
                Ok(if nonskip { Some(Field::StructArray { name: leaf_name, elements }) } else { None })
            }
        }
    }
}

impl CompiledSchema {
    /// Parses `data` against this schema (spec.md §4.5), producing the root
    /// struct's children. The schema is immutable and shareable across
    /// concurrent calls to this method (spec.md §5).
    pub fn parse(&self, data: &[u8], options: &ParseOptions) -> Result<StructField, ParseError> {
        let mut parser = Parser {
            schema: self,
            reader: BitStreamReader::new(data, options.bit_order),
            options,
            named_values: vec![None; self.named_fields.len()],
            pos: 0,
            named_idx: 0,
        };
        let children = parser.parse_struct(true)?;
        Ok(StructField { name: None, children })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::Field;

    #[test]
    fn scalar_len_example() {
        // spec.md §8 scenario 1: `ubyte len; byte[len] data;` on `03 0A 0B 0C`.
        let schema = CompiledSchema::compile("ubyte len; byte[len] data;").unwrap();
        let result = schema.parse(&[0x03, 0x0A, 0x0B, 0x0C], &ParseOptions::new()).unwrap();
        assert_eq!(result.get_as_int("len"), Some(3));
        let data = result.get("data").unwrap().as_scalar_array().unwrap();
        assert_eq!(data.len(), 3);
        assert_eq!(data.get_as_i64(0), Some(0x0A));
    }

    #[test]
    fn bit_fields_lsb_order() {
        // spec.md §8 scenario 3: `bit:4 a; bit:4 b;` on `A5`, LSB bit order.
        let schema = CompiledSchema::compile("bit:4 a; bit:4 b;").unwrap();
        let result = schema.parse(&[0xA5], &ParseOptions::new().with_bit_order(BitOrder::Lsb)).unwrap();
        assert_eq!(result.get_as_int("a"), Some(5));
        assert_eq!(result.get_as_int("b"), Some(10));
    }

    #[test]
    fn nested_struct_fields() {
        let schema = CompiledSchema::compile("header { int version; }").unwrap();
        let result = schema.parse(&[0, 0, 0, 7], &ParseOptions::new()).unwrap();
        assert_eq!(result.get_as_int("header.version"), Some(7));
    }

    #[test]
    fn fixed_struct_array_reuses_named_slot_each_iteration() {
        let schema = CompiledSchema::compile("ubyte n; entry[n] { ubyte v; }").unwrap();
        let result = schema.parse(&[3, 10, 20, 30], &ParseOptions::new()).unwrap();
        let elements = result.get("entry").unwrap().as_struct_array().unwrap();
        assert_eq!(elements.len(), 3);
        assert_eq!(elements[0].get_as_int("v"), Some(10));
        assert_eq!(elements[2].get_as_int("v"), Some(30));
    }

    #[test]
    fn zero_length_struct_array_consumes_no_stream_bytes() {
        // Preserved quirk: n == 0 still advances the bytecode cursor past
        // the body, but as a pure bytecode-shape skip — no stream bytes are
        // read, so the very next byte belongs to whatever follows.
        let schema = CompiledSchema::compile("ubyte n; entry[n] { ubyte v; } ubyte after;").unwrap();
        let result = schema.parse(&[0, 0xFF], &ParseOptions::new()).unwrap();
        let elements = result.get("entry").unwrap().as_struct_array().unwrap();
        assert!(elements.is_empty());
        assert_eq!(result.get_as_int("after"), Some(0xFF));
    }

    #[test]
    fn zero_length_struct_array_succeeds_at_end_of_stream() {
        // A fixed-size array computed as zero must succeed with no
        // elements even when there is no data left at all to skip over.
        let schema = CompiledSchema::compile("ubyte n; entry[n] { ubyte v; }").unwrap();
        let result = schema.parse(&[0], &ParseOptions::new()).unwrap();
        let elements = result.get("entry").unwrap().as_struct_array().unwrap();
        assert!(elements.is_empty());
    }

    #[test]
    fn whole_stream_scalar_array_reads_until_exhausted() {
        let schema = CompiledSchema::compile("ubyte[_] rest;").unwrap();
        let result = schema.parse(&[1, 2, 3], &ParseOptions::new()).unwrap();
        let rest = result.get("rest").unwrap().as_scalar_array().unwrap();
        assert_eq!(rest.len(), 3);
    }

    #[test]
    fn whole_stream_struct_array_with_no_data_yields_no_elements() {
        let schema = CompiledSchema::compile("chunk[_] { ubyte v; }").unwrap();
        let result = schema.parse(&[], &ParseOptions::new()).unwrap();
        let elements = result.get("chunk").unwrap().as_struct_array().unwrap();
        assert!(elements.is_empty());
    }

    #[test]
    fn whole_stream_struct_array_reads_all_chunks() {
        let schema = CompiledSchema::compile("chunk[_] { ubyte v; }").unwrap();
        let result = schema.parse(&[1, 2, 3], &ParseOptions::new()).unwrap();
        let elements = result.get("chunk").unwrap().as_struct_array().unwrap();
        assert_eq!(elements.len(), 3);
        assert_eq!(elements[1].get_as_int("v"), Some(2));
    }

    #[test]
    fn align_and_skip_and_reset_counter() {
        let schema = CompiledSchema::compile("ubyte a; align:4; reset$$; skip:2; ubyte b;").unwrap();
        let result = schema.parse(&[1, 0, 0, 0, 9, 9, 2], &ParseOptions::new()).unwrap();
        assert_eq!(result.get_as_int("a"), Some(1));
        assert_eq!(result.get_as_int("b"), Some(2));
    }

    #[test]
    fn out_of_range_bit_width_expression_is_a_controlled_error() {
        // The compiler can't range-check an expression-valued extra at
        // compile time; the runtime must catch it once evaluated, rather
        // than silently truncating a too-wide read.
        let schema = CompiledSchema::compile("ubyte w; bit:w a;").unwrap();
        let err = schema.parse(&[9, 0xFF], &ParseOptions::new()).unwrap_err();
        assert!(matches!(err, ParseError::BitWidthOutOfRange { width: 9, .. }));
    }

    #[test]
    fn zero_align_modulus_expression_is_a_controlled_error_not_a_panic() {
        let schema = CompiledSchema::compile("ubyte m; align:m;").unwrap();
        let err = schema.parse(&[0], &ParseOptions::new()).unwrap_err();
        assert!(matches!(err, ParseError::InvalidAlignModulus { modulus: 0, .. }));
    }

    #[test]
    fn negative_skip_count_expression_is_a_controlled_error_not_a_panic() {
        // `compiler.rs` only range-checks a literal skip count; an
        // expression-valued one can go negative only once evaluated, and
        // must not reach `BitStreamReader::skip_bytes`'s `u64` cast.
        let schema = CompiledSchema::compile("int n; skip:n; ubyte after;").unwrap();
        let data = [0xFF, 0xFF, 0xFF, 0xFF, 9, 9, 9];
        let err = schema.parse(&data, &ParseOptions::new()).unwrap_err();
        assert!(matches!(err, ParseError::InvalidSkipCount { count: -1, .. }));
    }

    #[test]
    fn var_handler_is_invoked_for_var_fields() {
        use crate::bitstream::BitStreamReader;

        struct FixedVar;
        impl VarHandler for FixedVar {
            fn handle(
                &self,
                reader: &mut BitStreamReader,
                _byte_order: ByteOrder,
                extra: i64,
                _field_path: &str,
                _arity: Arity,
            ) -> Result<ExternalRead, ParseError> {
                let n = extra as usize;
                let mut bytes = Vec::with_capacity(n);
                for _ in 0..n {
                    bytes.push(reader.read_unsigned_byte()?);
                }
                Ok(ExternalRead::Scalar(bytes))
            }
        }

        let schema = CompiledSchema::compile("var:3 payload;").unwrap();
        let options = ParseOptions::new().with_var_handler(FixedVar);
        let result = schema.parse(&[1, 2, 3], &options).unwrap();
        match result.get("payload").unwrap() {
            Field::Scalar { value: Scalar::Var(bytes), .. } => assert_eq!(bytes, &vec![1, 2, 3]),
            other => panic!("expected a Var scalar, got {other:?}"),
        }
    }

    #[test]
    fn missing_var_handler_is_an_error() {
        let schema = CompiledSchema::compile("var payload;").unwrap();
        let err = schema.parse(&[1], &ParseOptions::new()).unwrap_err();
        assert!(matches!(err, ParseError::NoVarHandler { .. }));
    }

    #[test]
    fn custom_type_dispatches_to_the_configured_processor() {
        use crate::bitstream::BitStreamReader;

        struct Fixed32;
        impl CustomTypeProcessor for Fixed32 {
            fn recognises(&self, type_name: &str) -> bool {
                type_name == "fixed32"
            }

            fn read(
                &self,
                _type_name: &str,
                reader: &mut BitStreamReader,
                byte_order: ByteOrder,
                _extra: i64,
                _arity: Arity,
                _field_path: &str,
            ) -> Result<ExternalRead, ParseError> {
                Ok(ExternalRead::Scalar(reader.read_int(byte_order)?.to_be_bytes().to_vec()))
            }
        }

        let schema = CompiledSchema::compile("fixed32 val;").unwrap();
        let options = ParseOptions::new().with_custom_type_processor(Fixed32);
        let result = schema.parse(&[0, 0, 1, 0], &options).unwrap();
        match result.get("val").unwrap() {
            Field::Scalar { value: Scalar::Custom(bytes), .. } => assert_eq!(bytes, &vec![0, 0, 1, 0]),
            other => panic!("expected a Custom scalar, got {other:?}"),
        }
    }

    #[test]
    fn array_length_expression_reads_a_prior_field() {
        let schema = CompiledSchema::compile("int n; int[n - 1] vals;").unwrap();
        let data = [0, 0, 0, 3, 0, 0, 0, 10, 0, 0, 0, 20];
        let result = schema.parse(&data, &ParseOptions::new()).unwrap();
        let vals = result.get("vals").unwrap().as_scalar_array().unwrap();
        assert_eq!(vals.len(), 2);
    }
}
