//! Struct registry shared between the parser and the code generator
//!
//! The parser registers a definition as a side effect of parsing
//! `struct Name ... end`; the generator consults the registry to lay
//! out constructor calls and to resolve `.field` access. A struct can
//! only be referenced after its definition has been parsed.

use crate::ast::DataType;
use crate::config::Limits;

/// One field of a struct: name, type, and byte offset within the value.
/// Every field occupies 8 bytes, so the k-th field sits at offset 8·k.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub name: String,
    pub dtype: DataType,
    pub offset: usize,
}

/// A struct definition with its ordered field layout.
#[derive(Debug, Clone, PartialEq)]
pub struct StructDef {
    pub name: String,
    pub fields: Vec<FieldDef>,
}

impl StructDef {
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// Total byte size of a value of this struct.
    pub fn size(&self) -> usize {
        self.fields.len() * 8
    }
}

/// Ordered table of struct definitions for one compile.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StructRegistry {
    defs: Vec<StructDef>,
}

impl StructRegistry {
    pub fn new() -> Self {
        StructRegistry::default()
    }

    /// Register a definition. Lookup returns the earliest registration,
    /// so a duplicate name never shadows the original.
    pub fn register(&mut self, def: StructDef, limits: &Limits) -> Result<(), String> {
        if self.defs.len() >= limits.max_structs {
            return Err(format!(
                "Parse error: too many struct definitions (max {})",
                limits.max_structs
            ));
        }
        if def.fields.len() > limits.max_struct_fields {
            return Err(format!(
                "Parse error: struct '{}' has too many fields (max {})",
                def.name, limits.max_struct_fields
            ));
        }
        self.defs.push(def);
        Ok(())
    }

    pub fn find(&self, name: &str) -> Option<&StructDef> {
        self.defs.iter().find(|d| d.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }
}
