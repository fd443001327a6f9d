//! Typed representation of parsed values (spec.md §4.6): scalars, scalar
//! arrays, structs, and struct arrays, addressable by dotted path.

use crate::error::ParseError;

#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Bit(u8),
    Bool(bool),
    Byte(i8),
    UByte(u8),
    Short(i16),
    UShort(u16),
    Int(i32),
    Long(i64),
    /// Raw bytes produced by a custom-type processor.
    Custom(Vec<u8>),
    /// Raw bytes produced by a `var` handler.
    Var(Vec<u8>),
}

impl Scalar {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Scalar::Bit(v) => Some(*v as i64),
            Scalar::Bool(v) => Some(*v as i64),
            Scalar::Byte(v) => Some(*v as i64),
            Scalar::UByte(v) => Some(*v as i64),
            Scalar::Short(v) => Some(*v as i64),
            Scalar::UShort(v) => Some(*v as i64),
            Scalar::Int(v) => Some(*v as i64),
            Scalar::Long(v) => Some(*v),
            Scalar::Custom(_) | Scalar::Var(_) => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Scalar::Bool(v) => Some(*v),
            _ => self.as_i64().map(|v| v != 0),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScalarArray {
    Bit(Vec<u8>),
    Bool(Vec<bool>),
    Byte(Vec<i8>),
    UByte(Vec<u8>),
    Short(Vec<i16>),
    UShort(Vec<u16>),
    Int(Vec<i32>),
    Long(Vec<i64>),
    Custom(Vec<Vec<u8>>),
    Var(Vec<Vec<u8>>),
}

impl ScalarArray {
    pub fn len(&self) -> usize {
        match self {
            ScalarArray::Bit(v) => v.len(),
            ScalarArray::Bool(v) => v.len(),
            ScalarArray::Byte(v) => v.len(),
            ScalarArray::UByte(v) => v.len(),
            ScalarArray::Short(v) => v.len(),
            ScalarArray::UShort(v) => v.len(),
            ScalarArray::Int(v) => v.len(),
            ScalarArray::Long(v) => v.len(),
            ScalarArray::Custom(v) => v.len(),
            ScalarArray::Var(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get_as_i64(&self, index: usize) -> Option<i64> {
        match self {
            ScalarArray::Bit(v) => v.get(index).map(|x| *x as i64),
            ScalarArray::Bool(v) => v.get(index).map(|x| *x as i64),
            ScalarArray::Byte(v) => v.get(index).map(|x| *x as i64),
            ScalarArray::UByte(v) => v.get(index).map(|x| *x as i64),
            ScalarArray::Short(v) => v.get(index).map(|x| *x as i64),
            ScalarArray::UShort(v) => v.get(index).map(|x| *x as i64),
            ScalarArray::Int(v) => v.get(index).map(|x| *x as i64),
            ScalarArray::Long(v) => v.get(index).copied(),
            ScalarArray::Custom(_) | ScalarArray::Var(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructField {
    pub name: Option<String>,
    pub children: Vec<Field>,
}

impl StructField {
    /// Resolves a dotted path against this struct's children.
    pub fn get(&self, path: &str) -> Option<&Field> {
        let mut cur = self;
        let mut parts = path.split('.').peekable();
        while let Some(part) = parts.next() {
            let field = cur.children.iter().find(|f| f.name() == Some(part))?;
            if parts.peek().is_none() {
                return Some(field);
            }
            cur = match field {
                Field::Struct(s) => s,
                _ => return None,
            };
        }
        None
    }

    pub fn get_as_int(&self, path: &str) -> Option<i64> {
        self.get(path).and_then(Field::as_i64)
    }

    /// Like [`Self::get_as_int`], but resolves through [`get_path`], so a
    /// bare integer path segment indexes into an intervening struct array
    /// (e.g. `"chunk.2.length"`).
    pub fn get_as_int_path(&self, path: &str) -> Option<i32> {
        get_path(self, path).ok().and_then(Field::as_i64).map(|v| v as i32)
    }

    /// Same as [`Self::get_as_int_path`] but without truncation to `i32`,
    /// for fields parsed as `long`.
    pub fn get_as_long_path(&self, path: &str) -> Option<i64> {
        get_path(self, path).ok().and_then(Field::as_i64)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    Scalar { name: Option<String>, value: Scalar },
    ScalarArray { name: Option<String>, value: ScalarArray },
    Struct(StructField),
    StructArray { name: Option<String>, elements: Vec<StructField> },
}

impl Field {
    pub fn name(&self) -> Option<&str> {
        match self {
            Field::Scalar { name, .. } => name.as_deref(),
            Field::ScalarArray { name, .. } => name.as_deref(),
            Field::Struct(s) => s.name.as_deref(),
            Field::StructArray { name, .. } => name.as_deref(),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Field::Scalar { value, .. } => value.as_i64(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Field::Scalar { value, .. } => value.as_bool(),
            _ => None,
        }
    }

    pub fn as_scalar_array(&self) -> Option<&ScalarArray> {
        match self {
            Field::ScalarArray { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&StructField> {
        match self {
            Field::Struct(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_struct_array(&self) -> Option<&[StructField]> {
        match self {
            Field::StructArray { elements, .. } => Some(elements),
            _ => None,
        }
    }

    pub fn size(&self) -> usize {
        match self {
            Field::Scalar { .. } => 1,
            Field::ScalarArray { value, .. } => value.len(),
            Field::Struct(s) => s.children.len(),
            Field::StructArray { elements, .. } => elements.len(),
        }
    }
}

/// Dotted-path lookup at the element level: `root.get_path("a.b.2.c")`
/// indexes into struct arrays with a bare integer path segment.
pub fn get_path<'a>(root: &'a StructField, path: &str) -> Result<&'a Field, ParseError> {
    let mut current_struct = root;
    let mut pending: Option<&'a Field> = None;
    let parts: Vec<&str> = path.split('.').collect();
    let mut i = 0;
    while i < parts.len() {
        let part = parts[i];
        if let Ok(index) = part.parse::<usize>() {
            let elements = pending
                .and_then(Field::as_struct_array)
                .ok_or_else(|| ParseError::Internal(format!("'{part}' is not an array index position in path '{path}'")))?;
            let elem = elements
                .get(index)
                .ok_or_else(|| ParseError::Internal(format!("index {index} out of range in path '{path}'")))?;
            current_struct = elem;
            pending = None;
        } else {
            let field = current_struct
                .children
                .iter()
                .find(|f| f.name() == Some(part))
                .ok_or_else(|| ParseError::Internal(format!("no field named '{part}' in path '{path}'")))?;
            if i + 1 == parts.len() {
                return Ok(field);
            }
            match field {
                Field::Struct(s) => current_struct = s,
                Field::StructArray { .. } => pending = Some(field),
                _ => {
                    return Err(ParseError::Internal(format!(
                        "'{part}' is a scalar field, cannot descend further in path '{path}'"
                    )))
                }
            }
        }
        i += 1;
    }
    Err(ParseError::Internal(format!("empty path '{path}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_path_lookup() {
        let root = StructField {
            name: None,
            children: vec![Field::Scalar { name: Some("len".into()), value: Scalar::UByte(3) }],
        };
        assert_eq!(root.get_as_int("len"), Some(3));
    }

    #[test]
    fn nested_path_lookup() {
        let inner = StructField {
            name: Some("header".into()),
            children: vec![Field::Scalar { name: Some("version".into()), value: Scalar::Int(7) }],
        };
        let root = StructField { name: None, children: vec![Field::Struct(inner)] };
        assert_eq!(root.get_as_int("header.version"), Some(7));
    }
}
