//! Input/output signature parameter reflection

use super::c_string;
use crate::DataType;
use shaderconductor::ffi::ScSignatureParameter;

/// Shader input/output signature parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureParameter {
    /// Semantic name without its index (e.g., "TEXCOORD")
    pub semantic_name: String,
    /// Semantic index (e.g., 1 for TEXCOORD1)
    pub semantic_index: u32,
    /// Signature register
    pub location: u32,
    /// Component type
    pub component_type: DataType,
    /// Components used, bit 0 is `x`
    pub mask: u8,
}

impl SignatureParameter {
    pub(crate) unsafe fn from_raw(raw: &ScSignatureParameter) -> Self {
        SignatureParameter {
            semantic_name: unsafe { c_string(raw.semantic) },
            semantic_index: raw.semantic_index,
            location: raw.location,
            component_type: DataType::from_u32(raw.component_type).unwrap_or_default(),
            mask: raw.mask,
        }
    }

    /// Semantic with its index appended when non-zero (`TEXCOORD1`).
    pub fn semantic(&self) -> String {
        if self.semantic_index > 0 {
            format!("{}{}", self.semantic_name, self.semantic_index)
        } else {
            self.semantic_name.clone()
        }
    }

    /// Number of components in use.
    pub fn component_count(&self) -> u32 {
        self.mask.count_ones()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn param(name: &str, index: u32, mask: u8) -> SignatureParameter {
        SignatureParameter {
            semantic_name: name.to_string(),
            semantic_index: index,
            location: 0,
            component_type: DataType::Float,
            mask,
        }
    }

    #[test]
    fn test_semantic_with_index() {
        assert_eq!(param("TEXCOORD", 1, 0x3).semantic(), "TEXCOORD1");
        assert_eq!(param("POSITION", 0, 0xf).semantic(), "POSITION");
    }

    #[test]
    fn test_component_count() {
        assert_eq!(param("TEXCOORD", 0, 0x3).component_count(), 2);
        assert_eq!(param("SV_Position", 0, 0xf).component_count(), 4);
    }
}
