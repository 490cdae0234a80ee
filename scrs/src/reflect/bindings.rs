//! Resource binding reflection

use super::c_string;
use crate::ResourceKind;
use shaderconductor::ffi::{ScCombinedSampler, ScResourceDesc};

/// A bound resource: constant buffer, texture, sampler or buffer view
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceBinding {
    /// Resource name
    pub name: String,
    /// Resource kind
    pub kind: ResourceKind,
    /// Register space
    pub space: u32,
    /// Starting register after binding shifts
    pub bind_point: u32,
    /// Number of registers (array length)
    pub bind_count: u32,
}

impl ResourceBinding {
    pub(crate) unsafe fn from_raw(raw: &ScResourceDesc) -> Option<Self> {
        Some(ResourceBinding {
            name: unsafe { c_string(raw.name) },
            kind: ResourceKind::from_u32(raw.kind)?,
            space: raw.space,
            bind_point: raw.bind_point,
            bind_count: raw.bind_count,
        })
    }

    /// HLSL register letter of the resource kind.
    pub fn register_letter(&self) -> char {
        match self.kind {
            ResourceKind::ConstantBuffer => 'b',
            ResourceKind::Sampler => 's',
            ResourceKind::Texture | ResourceKind::ShaderResourceView => 't',
            ResourceKind::UnorderedAccessView => 'u',
        }
    }
}

/// Texture and sampler merged into one combined image sampler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CombinedSampler {
    /// Name of the combined sampler in the output
    pub name: String,
    /// Texture it samples
    pub texture: String,
    /// Sampler state, `None` for texel fetches
    pub sampler: Option<String>,
    /// Binding in the output
    pub binding: u32,
}

impl CombinedSampler {
    pub(crate) unsafe fn from_raw(raw: &ScCombinedSampler) -> Self {
        CombinedSampler {
            name: unsafe { c_string(raw.name) },
            texture: unsafe { c_string(raw.texture) },
            sampler: (!raw.sampler.is_null()).then(|| unsafe { c_string(raw.sampler) }),
            binding: raw.binding,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_letters() {
        let binding = |kind| ResourceBinding {
            name: String::new(),
            kind,
            space: 0,
            bind_point: 0,
            bind_count: 1,
        };
        assert_eq!(binding(ResourceKind::ConstantBuffer).register_letter(), 'b');
        assert_eq!(binding(ResourceKind::Texture).register_letter(), 't');
        assert_eq!(binding(ResourceKind::ShaderResourceView).register_letter(), 't');
        assert_eq!(binding(ResourceKind::Sampler).register_letter(), 's');
        assert_eq!(binding(ResourceKind::UnorderedAccessView).register_letter(), 'u');
    }

    #[test]
    fn test_from_raw_rejects_unknown_kind() {
        let raw = ScResourceDesc {
            name: c"tex".as_ptr(),
            kind: 99,
            space: 0,
            bind_point: 0,
            bind_count: 1,
        };
        assert!(unsafe { ResourceBinding::from_raw(&raw) }.is_none());
    }
}
