//! Shader reflection API
//!
//! Reflection is produced by the compiler alongside a target when
//! [`CompileFlags::NEED_REFLECTION`](crate::CompileFlags::NEED_REFLECTION)
//! is set. It reports the input/output signatures, bound resources,
//! constant buffer layouts and the compute block size.
//!
//! # Example
//! ```no_run
//! use scrs::{CompileBuilder, ShaderStage};
//!
//! let reflection = CompileBuilder::new(
//!     r#"
//!     cbuffer Constants : register(b0) {
//!         float4x4 worldViewProj;
//!     };
//!     float4 main(float4 pos : POSITION) : SV_POSITION {
//!         return mul(pos, worldViewProj);
//!     }
//!     "#,
//!     ShaderStage::Vertex,
//! )
//! .reflect()
//! .unwrap();
//!
//! for cb in reflection.constant_buffers() {
//!     println!("CB: {} ({} bytes)", cb.name, cb.size);
//! }
//! ```

mod bindings;
mod constant_buffer;
mod signature;

pub use bindings::{CombinedSampler, ResourceBinding};
pub use constant_buffer::{ConstantBuffer, Variable};
pub use signature::SignatureParameter;

use shaderconductor::ffi::{
    ScDestroyResult, ScReflection, ScReflectionGetBlockSize, ScReflectionGetCombinedSampler,
    ScReflectionGetConstantBuffer, ScReflectionGetInput, ScReflectionGetMember,
    ScReflectionGetOutput, ScReflectionGetResource, ScReflectionGetVariable,
    ScReflectionNumCombinedSamplers, ScReflectionNumConstantBuffers, ScReflectionNumInputs,
    ScReflectionNumOutputs, ScReflectionNumResources, ScResultDesc, ScSignatureParameter, S_OK,
};
use std::ffi::{CStr, c_char};
use std::mem::MaybeUninit;

/// Copies a name owned by the reflection; null reads as empty.
pub(crate) unsafe fn c_string(ptr: *const c_char) -> String {
    if ptr.is_null() {
        String::new()
    } else {
        unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
    }
}

/// Runs a reflection getter that fills `T`, `None` on failure.
fn fetch<T>(getter: impl FnOnce(*mut T) -> i32) -> Option<T> {
    let mut out = MaybeUninit::<T>::uninit();
    if getter(out.as_mut_ptr()) == S_OK {
        Some(unsafe { out.assume_init() })
    } else {
        None
    }
}

/// RAII wrapper for the reflection data of one compile
///
/// Provides safe access to shader reflection data. The data is released
/// when the wrapper is dropped.
pub struct ShaderReflection {
    // Only `reflection` is ever set
    raw: ScResultDesc,
}

impl ShaderReflection {
    /// Takes ownership of reflection data detached from a result.
    ///
    /// # Safety
    /// `ptr` must be null or come from a result of the compile functions,
    /// and must not be released elsewhere.
    pub(crate) unsafe fn from_raw(ptr: *mut ScReflection) -> Option<Self> {
        if ptr.is_null() {
            return None;
        }
        Some(ShaderReflection {
            raw: ScResultDesc {
                reflection: ptr,
                ..ScResultDesc::default()
            },
        })
    }

    fn ptr(&self) -> *const ScReflection {
        self.raw.reflection
    }

    /// Number of input parameters.
    pub fn num_inputs(&self) -> u32 {
        unsafe { ScReflectionNumInputs(self.ptr()) }
    }

    /// Number of output parameters.
    pub fn num_outputs(&self) -> u32 {
        unsafe { ScReflectionNumOutputs(self.ptr()) }
    }

    /// Number of bound resources.
    pub fn num_resources(&self) -> u32 {
        unsafe { ScReflectionNumResources(self.ptr()) }
    }

    /// Number of constant buffers.
    pub fn num_constant_buffers(&self) -> u32 {
        unsafe { ScReflectionNumConstantBuffers(self.ptr()) }
    }

    /// Gets an input parameter by index.
    pub fn input_parameter(&self, index: u32) -> Option<SignatureParameter> {
        let raw = fetch::<ScSignatureParameter>(|out| unsafe {
            ScReflectionGetInput(self.ptr(), index, out)
        })?;
        Some(unsafe { SignatureParameter::from_raw(&raw) })
    }

    /// Gets an output parameter by index.
    pub fn output_parameter(&self, index: u32) -> Option<SignatureParameter> {
        let raw = fetch::<ScSignatureParameter>(|out| unsafe {
            ScReflectionGetOutput(self.ptr(), index, out)
        })?;
        Some(unsafe { SignatureParameter::from_raw(&raw) })
    }

    /// Iterates over the input parameters in register order.
    pub fn input_parameters(&self) -> impl Iterator<Item = SignatureParameter> + '_ {
        (0..self.num_inputs()).filter_map(move |i| self.input_parameter(i))
    }

    /// Iterates over the output parameters in register order.
    pub fn output_parameters(&self) -> impl Iterator<Item = SignatureParameter> + '_ {
        (0..self.num_outputs()).filter_map(move |i| self.output_parameter(i))
    }

    /// Gets a resource binding by index.
    pub fn resource_binding(&self, index: u32) -> Option<ResourceBinding> {
        let raw = fetch(|out| unsafe { ScReflectionGetResource(self.ptr(), index, out) })?;
        unsafe { ResourceBinding::from_raw(&raw) }
    }

    /// Iterates over the bound resources, ordered by class, space and register.
    pub fn resource_bindings(&self) -> impl Iterator<Item = ResourceBinding> + '_ {
        (0..self.num_resources()).filter_map(move |i| self.resource_binding(i))
    }

    /// Finds a resource binding by name.
    pub fn resource_binding_by_name(&self, name: &str) -> Option<ResourceBinding> {
        self.resource_bindings().find(|r| r.name == name)
    }

    fn variable(&self, buffer: u32, index: u32) -> Option<Variable> {
        let raw = fetch::<shaderconductor::ffi::ScVariableDesc>(|out| unsafe {
            ScReflectionGetVariable(self.ptr(), buffer, index, out)
        })?;
        let members = (0..raw.num_members)
            .filter_map(|m| {
                let member = fetch(|out| unsafe {
                    ScReflectionGetMember(self.ptr(), buffer, index, m, out)
                })?;
                Some(unsafe { Variable::from_raw(&member, Vec::new()) })
            })
            .collect();
        Some(unsafe { Variable::from_raw(&raw, members) })
    }

    /// Gets a constant buffer with its variables by index.
    pub fn constant_buffer(&self, index: u32) -> Option<ConstantBuffer> {
        let raw = fetch::<shaderconductor::ffi::ScConstantBufferDesc>(|out| unsafe {
            ScReflectionGetConstantBuffer(self.ptr(), index, out)
        })?;
        let variables = (0..raw.num_variables)
            .filter_map(|v| self.variable(index, v))
            .collect();
        Some(unsafe { ConstantBuffer::from_raw(&raw, variables) })
    }

    /// Iterates over the constant buffers.
    pub fn constant_buffers(&self) -> impl Iterator<Item = ConstantBuffer> + '_ {
        (0..self.num_constant_buffers()).filter_map(move |i| self.constant_buffer(i))
    }

    /// Finds a constant buffer by name.
    pub fn constant_buffer_by_name(&self, name: &str) -> Option<ConstantBuffer> {
        self.constant_buffers().find(|cb| cb.name == name)
    }

    /// Iterates over the texture/sampler pairs merged for the target.
    pub fn combined_samplers(&self) -> impl Iterator<Item = CombinedSampler> + '_ {
        let count = unsafe { ScReflectionNumCombinedSamplers(self.ptr()) };
        (0..count).filter_map(move |i| {
            let raw = fetch(|out| unsafe { ScReflectionGetCombinedSampler(self.ptr(), i, out) })?;
            Some(unsafe { CombinedSampler::from_raw(&raw) })
        })
    }

    /// `[numthreads]` of a compute shader, zeros for other stages.
    pub fn block_size(&self) -> [u32; 3] {
        let mut size = [0u32; 3];
        unsafe { ScReflectionGetBlockSize(self.ptr(), size.as_mut_ptr()) };
        size
    }
}

impl Drop for ShaderReflection {
    fn drop(&mut self) {
        unsafe { ScDestroyResult(&mut self.raw) };
    }
}

impl std::fmt::Debug for ShaderReflection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShaderReflection")
            .field("inputs", &self.num_inputs())
            .field("outputs", &self.num_outputs())
            .field("resources", &self.num_resources())
            .field("constant_buffers", &self.num_constant_buffers())
            .finish()
    }
}

// Reflection data is immutable after the compile that produced it
unsafe impl Send for ShaderReflection {}
unsafe impl Sync for ShaderReflection {}

#[cfg(test)]
mod tests {
    use crate::{BindingShifts, CompileBuilder, CompileFlags, DataType, ResourceKind, ShaderStage};
    use pretty_assertions::assert_eq;

    const VERTEX: &str = r#"
cbuffer Constants : register(b0) {
    float4x4 worldViewProj;
};

float4 main(float3 pos : POSITION, float2 uv : TEXCOORD0) : SV_POSITION {
    return mul(float4(pos, 1.0), worldViewProj) + float4(uv, 0.0, 0.0);
}
"#;

    const COMPUTE: &str = r#"
RWStructuredBuffer<float> output : register(u0);
StructuredBuffer<float> input : register(t0);

[numthreads(64, 1, 1)]
void main(uint3 id : SV_DispatchThreadID) {
    output[id.x] = input[id.x] * 2.0;
}
"#;

    #[test]
    fn test_vertex_reflection() {
        let reflection = CompileBuilder::new(VERTEX, ShaderStage::Vertex)
            .reflect()
            .unwrap();

        let inputs: Vec<_> = reflection.input_parameters().collect();
        assert_eq!(inputs.len(), 2);
        assert_eq!(inputs[0].semantic_name, "POSITION");
        assert_eq!(inputs[1].semantic_name, "TEXCOORD");
        assert_eq!(inputs[1].mask, 0x3);
        assert_eq!(inputs[1].component_type, DataType::Float);

        let cb = reflection.constant_buffer_by_name("Constants").unwrap();
        assert_eq!(cb.size, 64);
        let var = cb.variable("worldViewProj").unwrap();
        assert_eq!(var.type_name, "float4x4");
        assert_eq!((var.rows, var.columns, var.offset), (4, 4, 0));
        assert!(!var.is_array());

        assert_eq!(reflection.block_size(), [0, 0, 0]);
    }

    #[test]
    fn test_binding_shifts_apply() {
        let reflection = CompileBuilder::new(VERTEX, ShaderStage::Vertex)
            .binding_shifts(BindingShifts {
                cbuffers: 2,
                ..BindingShifts::default()
            })
            .reflect()
            .unwrap();
        let binding = reflection.resource_binding_by_name("Constants").unwrap();
        assert_eq!(binding.kind, ResourceKind::ConstantBuffer);
        assert_eq!(binding.bind_point, 2);
        assert_eq!(binding.register_letter(), 'b');
    }

    #[test]
    fn test_compute_reflection() {
        let result = CompileBuilder::new(COMPUTE, ShaderStage::Compute)
            .with_flags(CompileFlags::NEED_REFLECTION)
            .target(crate::ShadingLanguage::SpirV)
            .compile()
            .unwrap();
        let reflection = result.reflection.unwrap();
        assert_eq!(reflection.block_size(), [64, 1, 1]);
        assert_eq!(reflection.num_constant_buffers(), 0);
        let kinds: Vec<_> = reflection.resource_bindings().map(|r| r.kind).collect();
        assert!(kinds.contains(&ResourceKind::UnorderedAccessView));
        assert!(reflection.input_parameter(10).is_none());
    }
}
