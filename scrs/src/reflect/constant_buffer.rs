//! Constant buffer and variable reflection

use super::c_string;
use crate::DataType;
use shaderconductor::ffi::{ScConstantBufferDesc, ScVariableDesc};

/// A constant buffer and its variables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstantBuffer {
    /// Buffer name
    pub name: String,
    /// Size in bytes, rounded to 16
    pub size: u32,
    /// Variables in declaration order
    pub variables: Vec<Variable>,
}

impl ConstantBuffer {
    pub(crate) unsafe fn from_raw(raw: &ScConstantBufferDesc, variables: Vec<Variable>) -> Self {
        ConstantBuffer {
            name: unsafe { c_string(raw.name) },
            size: raw.size,
            variables,
        }
    }

    /// Looks up a variable by name.
    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.variables.iter().find(|v| v.name == name)
    }
}

/// A constant buffer variable or struct member
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    /// Variable name
    pub name: String,
    /// Byte offset inside the enclosing buffer or struct
    pub offset: u32,
    /// Size in bytes
    pub size: u32,
    /// HLSL type name (`float4x4`, or the struct name)
    pub type_name: String,
    /// Element data type
    pub data_type: DataType,
    /// Matrix rows, 1 for vectors and scalars
    pub rows: u32,
    /// Columns, or total scalar components for structs
    pub columns: u32,
    /// Array length, 0 when not an array
    pub elements: u32,
    /// Array stride in bytes
    pub element_stride: u32,
    /// Struct members, empty otherwise
    pub members: Vec<Variable>,
}

impl Variable {
    pub(crate) unsafe fn from_raw(raw: &ScVariableDesc, members: Vec<Variable>) -> Self {
        Variable {
            name: unsafe { c_string(raw.name) },
            offset: raw.offset,
            size: raw.size,
            type_name: unsafe { c_string(raw.type_name) },
            data_type: DataType::from_u32(raw.data_type).unwrap_or_default(),
            rows: raw.rows,
            columns: raw.columns,
            elements: raw.elements,
            element_stride: raw.element_stride,
            members,
        }
    }

    /// Whether the variable is an array.
    pub fn is_array(&self) -> bool {
        self.elements > 0
    }
}
