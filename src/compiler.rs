//! Single-pass schema compiler: token stream -> bytecode + side tables
//! (spec.md §4.4).
//!
//! Two deliberate departures from the literal step-by-step description in
//! spec.md §4.4, both producing identical final bytecode:
//!
//! - Step 5/9 describe marking a "whole-stream offset" with the ARRAY flag
//!   set, then retroactively clearing it once the whole token stream has
//!   been seen. This compiler simply never sets the ARRAY flag for a `_`
//!   array to begin with — the runtime still detects the whole-stream case
//!   purely from the WIDE+EXPR_OR_WHOLESTREAM combination, exactly as step
//!   9 requires of it.
//! - Step 8 describes rewriting already-emitted named-field paths when a
//!   struct closes. This compiler instead threads the currently-open named
//!   struct names as a prefix stack and builds each field's full path
//!   eagerly, at the point the field is registered — the prefix of
//!   currently-open names is already known then, so no later rewrite is
//!   needed.
//!
//! The named-field side table is both a `Vec` (the positional slots the
//! runtime's named-numeric map and named-field cursor consume, in bytecode
//! order) and an `IndexMap` from dotted path to slot (the lookup the
//! expression compiler's name resolution needs) — a pair, not a
//! contradiction, per the ambient-stack note in SPEC_FULL.md §2.

use crate::bytecode::{flags, pack_i32, wide_flags, Opcode};
use crate::error::ParseError;
use crate::expr::{compile_expr, CompiledExpr};
use crate::token::{AtomToken, Endian, ExtraSpec, SizeSpec, StructOpenToken, Token, Tokenizer};
use indexmap::IndexMap;
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedFieldEntry {
    pub full_path: String,
    pub leaf_name: String,
    pub bytecode_offset: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomTypeDescriptor {
    pub type_name: String,
    pub byte_order: Option<Endian>,
    pub extra_text: String,
}

/// The immutable output of [`CompiledSchema::compile`]: bytecode plus its
/// three side tables. Shareable across concurrent parses (spec.md §5).
#[derive(Debug, Clone, Default)]
pub struct CompiledSchema {
    pub(crate) bytecode: Vec<u8>,
    pub(crate) named_fields: Vec<NamedFieldEntry>,
    pub(crate) name_index: IndexMap<String, usize>,
    pub(crate) length_exprs: Vec<CompiledExpr>,
    pub(crate) custom_types: Vec<CustomTypeDescriptor>,
}

struct StructFrame {
    name: Option<String>,
    names_seen: HashSet<String>,
    struct_start_offset: usize,
}

struct Compiler {
    bytecode: Vec<u8>,
    named_fields: Vec<NamedFieldEntry>,
    name_index: IndexMap<String, usize>,
    length_exprs: Vec<CompiledExpr>,
    custom_types: Vec<CustomTypeDescriptor>,
    stack: Vec<StructFrame>,
    prefix: Vec<String>,
    saw_whole_stream: bool,
    /// Depth at which the (single) whole-stream array was declared; any
    /// further non-`StructClose` token at this depth or shallower is
    /// rejected, until the close that pops exactly this depth clears it.
    restriction: Option<usize>,
}

fn opcode_for_type_name(name: &str) -> Opcode {
    match name {
        "bit" => Opcode::Bit,
        "bool" => Opcode::Bool,
        "ubyte" => Opcode::UByte,
        "byte" => Opcode::Byte,
        "ushort" => Opcode::UShort,
        "short" => Opcode::Short,
        "int" => Opcode::Int,
        "long" => Opcode::Long,
        "skip" => Opcode::Skip,
        "align" => Opcode::Align,
        "var" => Opcode::Var,
        "reset$$" => Opcode::ResetCounter,
        _ => Opcode::CustomType,
    }
}

fn resolve_name(prefix: &[String], name_index: &IndexMap<String, usize>, name: &str) -> Option<usize> {
    for i in (0..=prefix.len()).rev() {
        let candidate = if i == 0 { name.to_string() } else { format!("{}.{}", prefix[..i].join("."), name) };
        if let Some(&slot) = name_index.get(&candidate) {
            return Some(slot);
        }
    }
    None
}

fn extra_text_repr(extra: &Option<ExtraSpec>) -> String {
    match extra {
        None => String::new(),
        Some(ExtraSpec::Literal(v)) => v.to_string(),
        Some(ExtraSpec::Expr(s)) => s.clone(),
    }
}

impl Compiler {
    fn new() -> Self {
        Self {
            bytecode: Vec::new(),
            named_fields: Vec::new(),
            name_index: IndexMap::new(),
            length_exprs: Vec::new(),
            custom_types: Vec::new(),
            stack: vec![StructFrame { name: None, names_seen: HashSet::new(), struct_start_offset: 0 }],
            prefix: Vec::new(),
            saw_whole_stream: false,
            restriction: None,
        }
    }

    fn current_depth(&self) -> usize {
        self.stack.len() - 1
    }

    fn add_named_entry(&mut self, name: String, bytecode_offset: usize, pos: usize) -> Result<(), ParseError> {
        if name.contains('.') {
            return Err(ParseError::IllegalNameCharacter { name, pos });
        }
        {
            let frame = self.stack.last_mut().unwrap();
            if !frame.names_seen.insert(name.clone()) {
                return Err(ParseError::DuplicateFieldName { name, pos });
            }
        }
        let full_path =
            if self.prefix.is_empty() { name.clone() } else { format!("{}.{}", self.prefix.join("."), name) };
        let slot = self.named_fields.len();
        self.named_fields.push(NamedFieldEntry { full_path: full_path.clone(), leaf_name: name, bytecode_offset });
        if self.name_index.insert(full_path.clone(), slot).is_some() {
            return Err(ParseError::DuplicateFieldName { name: full_path, pos });
        }
        Ok(())
    }

    fn register_expr(&mut self, text: &str) -> Result<usize, ParseError> {
        let prefix = self.prefix.clone();
        let name_index = &self.name_index;
        let mut resolve = |name: &str| resolve_name(&prefix, name_index, name);
        let expr = compile_expr(text, &mut resolve)?;
        let idx = self.length_exprs.len();
        self.length_exprs.push(expr);
        Ok(idx)
    }

    /// Returns `(array_flag_set, wide_bits, operand_bytes, is_whole_stream)`.
    fn compute_array_flags(
        &mut self,
        size: &Option<SizeSpec>,
    ) -> Result<(bool, u8, Option<Vec<u8>>, bool), ParseError> {
        match size {
            None => Ok((false, 0, None, false)),
            Some(SizeSpec::Literal(n)) => Ok((true, 0, Some(pack_i32(*n as i32)), false)),
            Some(SizeSpec::Expr(text)) => {
                let idx = self.register_expr(text)?;
                Ok((true, wide_flags::EXPR_OR_WHOLESTREAM, Some(pack_i32(idx as i32)), false))
            }
            Some(SizeSpec::WholeStream) => Ok((false, wide_flags::EXPR_OR_WHOLESTREAM, None, true)),
        }
    }

    fn mark_whole_stream(&mut self, pos: usize) -> Result<(), ParseError> {
        if self.saw_whole_stream {
            return Err(ParseError::TwoWholeStreamArrays { pos });
        }
        self.saw_whole_stream = true;
        self.restriction = Some(self.current_depth());
        Ok(())
    }

    fn open_struct(&mut self, s: StructOpenToken) -> Result<(), ParseError> {
        let named = s.name.is_some();
        let (array_flag, array_wide, array_operand, is_whole_stream) = self.compute_array_flags(&s.array_size)?;
        if let Some(SizeSpec::Literal(n)) = &s.array_size {
            if *n < 0 {
                return Err(ParseError::InvalidArraySize { size: *n, pos: s.pos });
            }
        }

        let mut first_byte = Opcode::StructStart as u8;
        if named {
            first_byte |= flags::NAMED;
        }
        if array_flag {
            first_byte |= flags::ARRAY;
        }
        if s.byte_order == Some(Endian::Little) {
            first_byte |= flags::LITTLE_ENDIAN;
        }
        if array_wide != 0 {
            first_byte |= flags::WIDE;
        }

        let struct_start_offset = self.bytecode.len();
        self.bytecode.push(first_byte);
        if array_wide != 0 {
            self.bytecode.push(array_wide);
        }
        if let Some(op) = array_operand {
            self.bytecode.extend(op);
        }

        if let Some(name) = s.name.clone() {
            self.add_named_entry(name, struct_start_offset, s.pos)?;
        }
        if is_whole_stream {
            self.mark_whole_stream(s.pos)?;
        }

        let frame_name = s.name;
        self.stack.push(StructFrame { name: frame_name.clone(), names_seen: HashSet::new(), struct_start_offset });
        if let Some(name) = frame_name {
            self.prefix.push(name);
        }
        Ok(())
    }

    fn close_struct(&mut self, pos: usize) -> Result<(), ParseError> {
        if self.stack.len() <= 1 {
            return Err(ParseError::UnmatchedStructEnd { name: "}".into(), pos });
        }
        let depth_before_pop = self.current_depth();
        let frame = self.stack.pop().unwrap();
        self.bytecode.push(Opcode::StructEnd as u8);
        self.bytecode.extend(pack_i32(frame.struct_start_offset as i32));
        if frame.name.is_some() {
            self.prefix.pop();
        }
        if self.restriction == Some(depth_before_pop) {
            self.restriction = None;
        }
        Ok(())
    }

    fn atom(&mut self, a: AtomToken) -> Result<(), ParseError> {
        let opcode = opcode_for_type_name(&a.type_name);
        let named = a.name.is_some();
        let restricted = matches!(opcode, Opcode::Align | Opcode::Skip | Opcode::ResetCounter);
        if restricted && (named || a.array_size.is_some()) {
            return Err(ParseError::UnexpectedlyNamedOrArrayed { opcode: a.type_name.clone(), pos: a.pos });
        }

        let (array_flag, array_wide, array_operand, is_whole_stream) = self.compute_array_flags(&a.array_size)?;
        if let Some(SizeSpec::Literal(n)) = &a.array_size {
            if *n < 0 {
                return Err(ParseError::InvalidArraySize { size: *n, pos: a.pos });
            }
        }

        let needs_extra = matches!(opcode, Opcode::Bit | Opcode::Align | Opcode::Skip | Opcode::Var | Opcode::CustomType);
        let (extra_wide, extra_operand) = if needs_extra {
            match &a.extra {
                None => (0u8, pack_i32(0)),
                Some(ExtraSpec::Literal(v)) => (0u8, pack_i32(*v as i32)),
                Some(ExtraSpec::Expr(text)) => {
                    let idx = self.register_expr(text)?;
                    (wide_flags::EXTRA_AS_EXPRESSION, pack_i32(idx as i32))
                }
            }
        } else {
            (0u8, Vec::new())
        };

        match opcode {
            Opcode::Bit => match &a.extra {
                Some(ExtraSpec::Literal(v)) if (1..=8).contains(v) => {}
                Some(ExtraSpec::Literal(v)) => return Err(ParseError::BitWidthOutOfRange { width: *v, pos: a.pos }),
                Some(ExtraSpec::Expr(_)) => {}
                None => return Err(ParseError::BitWidthOutOfRange { width: 0, pos: a.pos }),
            },
            Opcode::Align => match &a.extra {
                Some(ExtraSpec::Literal(v)) if *v > 0 => {}
                Some(ExtraSpec::Literal(v)) => return Err(ParseError::InvalidAlignModulus { modulus: *v, pos: a.pos }),
                Some(ExtraSpec::Expr(_)) => {}
                None => return Err(ParseError::InvalidAlignModulus { modulus: 0, pos: a.pos }),
            },
            Opcode::Skip => {
                if let Some(ExtraSpec::Literal(v)) = &a.extra {
                    if *v < 0 {
                        return Err(ParseError::InvalidSkipCount { count: *v, pos: a.pos });
                    }
                }
            }
            _ => {}
        }

        let mut first_byte = opcode as u8;
        if named {
            first_byte |= flags::NAMED;
        }
        if array_flag {
            first_byte |= flags::ARRAY;
        }
        if a.byte_order == Some(Endian::Little) {
            first_byte |= flags::LITTLE_ENDIAN;
        }
        let wide_byte = array_wide | extra_wide;
        if wide_byte != 0 {
            first_byte |= flags::WIDE;
        }

        let offset = self.bytecode.len();
        self.bytecode.push(first_byte);
        if wide_byte != 0 {
            self.bytecode.push(wide_byte);
        }
        if let Some(op) = array_operand {
            self.bytecode.extend(op);
        }
        if needs_extra {
            self.bytecode.extend(extra_operand);
        }

        if let Opcode::CustomType = opcode {
            let descriptor = CustomTypeDescriptor {
                type_name: a.type_name.clone(),
                byte_order: a.byte_order,
                extra_text: extra_text_repr(&a.extra),
            };
            let idx = self.custom_types.len();
            self.custom_types.push(descriptor);
            self.bytecode.extend(pack_i32(idx as i32));
        }

        if let Some(name) = a.name.clone() {
            self.add_named_entry(name, offset, a.pos)?;
        }
        if is_whole_stream {
            self.mark_whole_stream(a.pos)?;
        }

        Ok(())
    }

    fn process(&mut self, token: Token) -> Result<(), ParseError> {
        let pos = token.pos();
        let is_close = matches!(token, Token::StructClose { .. });
        if let Some(d) = self.restriction {
            if !is_close && self.current_depth() <= d {
                return Err(ParseError::InstructionAfterWholeStream { pos });
            }
        }
        match token {
            Token::StructClose { pos } => self.close_struct(pos),
            Token::StructOpen(s) => self.open_struct(s),
            Token::Atom(a) => self.atom(a),
            Token::Comment { .. } => Ok(()),
        }
    }
}

impl CompiledSchema {
    /// Compiles schema text into bytecode and side tables (spec.md §4.4).
    pub fn compile(text: &str) -> Result<CompiledSchema, ParseError> {
        let tokens = Tokenizer::new(text).tokenize_all()?;
        let mut compiler = Compiler::new();
        for token in tokens {
            compiler.process(token)?;
        }
        if compiler.stack.len() > 1 {
            return Err(ParseError::UnbalancedStruct { open: compiler.stack.len() - 1 });
        }
        Ok(CompiledSchema {
            bytecode: compiler.bytecode,
            named_fields: compiler.named_fields,
            name_index: compiler.name_index,
            length_exprs: compiler.length_exprs,
            custom_types: compiler.custom_types,
        })
    }
}
