//! Shader reflection.
//!
//! Built from the IR once bindings and shifts are final, so every target
//! reports the same signature, resources and constant-buffer layout. The
//! ordering follows D3D reflection: resources by register class (constant
//! buffers, samplers, shader resources, unordered access) then bind point,
//! signature parameters by register.

use crate::desc::ShaderStage;
use crate::emit::dxil::{component_mask, in_signature};
use crate::emit::{CombinedSampler, ReflectionHints};
use crate::ir::layout::{LayoutRules, array_stride, struct_layout, type_layout};
use crate::ir::{
    BufferKind, GlobalKind, MatrixLayout, Module, RegisterClass, Scalar, ScalarKind, Type, Varying,
};
use std::fmt;

/// Component or element type of a variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u32)]
pub enum DataType {
    #[default]
    Unknown = 0,
    Void = 1,
    Bool = 2,
    Int = 3,
    Uint = 4,
    Float = 5,
    Half = 6,
    Int16 = 7,
    Uint16 = 8,
    Double = 9,
    Int64 = 10,
    Uint64 = 11,
    Struct = 12,
}

impl DataType {
    pub fn of_scalar(scalar: Scalar) -> Self {
        match (scalar.kind, scalar.width) {
            (ScalarKind::Bool, _) => DataType::Bool,
            (ScalarKind::Sint, 2) => DataType::Int16,
            (ScalarKind::Sint, 8) => DataType::Int64,
            (ScalarKind::Sint, _) => DataType::Int,
            (ScalarKind::Uint, 2) => DataType::Uint16,
            (ScalarKind::Uint, 8) => DataType::Uint64,
            (ScalarKind::Uint, _) => DataType::Uint,
            (ScalarKind::Float, 2) => DataType::Half,
            (ScalarKind::Float, 8) => DataType::Double,
            (ScalarKind::Float, _) => DataType::Float,
        }
    }

    pub fn from_u32(value: u32) -> Option<Self> {
        Some(match value {
            0 => DataType::Unknown,
            1 => DataType::Void,
            2 => DataType::Bool,
            3 => DataType::Int,
            4 => DataType::Uint,
            5 => DataType::Float,
            6 => DataType::Half,
            7 => DataType::Int16,
            8 => DataType::Uint16,
            9 => DataType::Double,
            10 => DataType::Int64,
            11 => DataType::Uint64,
            12 => DataType::Struct,
            _ => return None,
        })
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DataType::Unknown => "unknown",
            DataType::Void => "void",
            DataType::Bool => "bool",
            DataType::Int => "int",
            DataType::Uint => "uint",
            DataType::Float => "float",
            DataType::Half => "half",
            DataType::Int16 => "int16",
            DataType::Uint16 => "uint16",
            DataType::Double => "double",
            DataType::Int64 => "int64",
            DataType::Uint64 => "uint64",
            DataType::Struct => "struct",
        })
    }
}

/// How a resource is bound
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ResourceKind {
    ConstantBuffer = 0,
    Texture = 1,
    Sampler = 2,
    ShaderResourceView = 3,
    UnorderedAccessView = 4,
}

impl ResourceKind {
    pub fn from_u32(value: u32) -> Option<Self> {
        Some(match value {
            0 => ResourceKind::ConstantBuffer,
            1 => ResourceKind::Texture,
            2 => ResourceKind::Sampler,
            3 => ResourceKind::ShaderResourceView,
            4 => ResourceKind::UnorderedAccessView,
            _ => return None,
        })
    }

    fn of(ty: &Type) -> Option<Self> {
        Some(match ty {
            Type::Array(elem, _) => return ResourceKind::of(elem),
            Type::Texture(t) if t.rw => ResourceKind::UnorderedAccessView,
            Type::Texture(_) => ResourceKind::Texture,
            Type::Sampler { .. } => ResourceKind::Sampler,
            Type::Buffer { rw: true, .. } => ResourceKind::UnorderedAccessView,
            Type::Buffer {
                kind: BufferKind::Typed,
                ..
            } => ResourceKind::Texture,
            Type::Buffer { .. } => ResourceKind::ShaderResourceView,
            _ => return None,
        })
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ResourceKind::ConstantBuffer => "cbuffer",
            ResourceKind::Texture => "texture",
            ResourceKind::Sampler => "sampler",
            ResourceKind::ShaderResourceView => "srv",
            ResourceKind::UnorderedAccessView => "uav",
        })
    }
}

/// One element of the input or output signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureParameter {
    pub semantic: String,
    pub semantic_index: u32,
    /// Signature register
    pub location: u32,
    pub component_type: DataType,
    /// Components used, bit 0 is `x`
    pub mask: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceDesc {
    pub name: String,
    pub kind: ResourceKind,
    pub space: u32,
    pub bind_point: u32,
    pub bind_count: u32,
}

/// Type of a constant-buffer variable or struct member
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VariableType {
    /// HLSL name of the element type (`float4x4`, or the struct name)
    pub name: String,
    pub data_type: DataType,
    pub rows: u32,
    /// Columns for numeric types; total scalar components for structs
    pub columns: u32,
    /// Array length, 0 when not an array
    pub elements: u32,
    pub element_stride: u32,
    pub members: Vec<Variable>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    pub name: String,
    /// Byte offset inside the enclosing buffer or struct
    pub offset: u32,
    pub size: u32,
    pub ty: VariableType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstantBuffer {
    pub name: String,
    pub size: u32,
    pub variables: Vec<Variable>,
}

/// Everything reflection reports about a compiled entry point
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Reflection {
    pub input_parameters: Vec<SignatureParameter>,
    pub output_parameters: Vec<SignatureParameter>,
    pub resources: Vec<ResourceDesc>,
    pub constant_buffers: Vec<ConstantBuffer>,
    /// `[numthreads]` of a compute shader, zeros otherwise
    pub cs_block_size: [u32; 3],
    /// Texture/sampler pairs the target merged (GLSL, ESSL, old HLSL)
    pub combined_samplers: Vec<CombinedSampler>,
}

impl Reflection {
    /// Collects reflection data for the module's entry point.
    pub fn build(module: &Module, hints: &ReflectionHints) -> Self {
        let mut reflection = Reflection {
            combined_samplers: hints.combined_samplers.clone(),
            ..Reflection::default()
        };
        if let Some(entry) = module.entry() {
            reflection.input_parameters = signature(&entry.inputs);
            reflection.output_parameters = signature(&entry.outputs);
            if entry.stage == ShaderStage::Compute {
                reflection.cs_block_size = entry.workgroup_size;
            }
        }

        let mut bound = Vec::new();
        for (_, global) in module.resources() {
            let (Some(class), Some(binding)) = (global.register_class(), global.binding) else {
                continue;
            };
            let kind = match &global.kind {
                GlobalKind::ConstantBuffer { .. } => ResourceKind::ConstantBuffer,
                _ => match ResourceKind::of(&global.ty) {
                    Some(kind) => kind,
                    None => continue,
                },
            };
            let bind_count = match &global.ty {
                Type::Array(_, n) => *n,
                _ => 1,
            };
            bound.push((
                class_order(class),
                ResourceDesc {
                    name: global.name.clone(),
                    kind,
                    space: binding.space,
                    bind_point: binding.register,
                    bind_count,
                },
                global,
            ));
        }
        bound.sort_by_key(|(order, desc, _)| (*order, desc.space, desc.bind_point));

        for (_, desc, global) in bound {
            if let GlobalKind::ConstantBuffer { members, size } = &global.kind {
                reflection.constant_buffers.push(ConstantBuffer {
                    name: global.name.clone(),
                    size: *size,
                    variables: members
                        .iter()
                        .map(|m| Variable {
                            name: m.name.clone(),
                            offset: m.offset,
                            size: m.size,
                            ty: variable_type(module, &m.ty, m.matrix_layout),
                        })
                        .collect(),
                });
            }
            reflection.resources.push(desc);
        }
        debug_log!(
            "reflection: {} inputs, {} outputs, {} resources",
            reflection.input_parameters.len(),
            reflection.output_parameters.len(),
            reflection.resources.len()
        );
        reflection
    }

    pub fn resource_by_name(&self, name: &str) -> Option<&ResourceDesc> {
        self.resources.iter().find(|r| r.name == name)
    }

    pub fn constant_buffer_by_name(&self, name: &str) -> Option<&ConstantBuffer> {
        self.constant_buffers.iter().find(|c| c.name == name)
    }
}

fn class_order(class: RegisterClass) -> u32 {
    match class {
        RegisterClass::ConstantBuffer => 0,
        RegisterClass::Sampler => 1,
        RegisterClass::ShaderResource => 2,
        RegisterClass::UnorderedAccess => 3,
    }
}

fn signature(varyings: &[Varying]) -> Vec<SignatureParameter> {
    varyings
        .iter()
        .filter(|v| in_signature(v))
        .enumerate()
        .map(|(location, v)| SignatureParameter {
            semantic: v.semantic.name.clone(),
            semantic_index: v.semantic.index,
            location: location as u32,
            component_type: v.ty.scalar().map_or(DataType::Unknown, DataType::of_scalar),
            mask: component_mask(&v.ty),
        })
        .collect()
}

fn variable_type(module: &Module, ty: &Type, matrix_layout: MatrixLayout) -> VariableType {
    match ty {
        Type::Scalar(s) => numeric(module, ty, *s, 1, 1),
        Type::Vector(s, n) => numeric(module, ty, *s, 1, *n as u32),
        Type::Matrix { scalar, rows, cols } => {
            numeric(module, ty, *scalar, *rows as u32, *cols as u32)
        }
        Type::Array(elem, n) => VariableType {
            elements: *n,
            element_stride: array_stride(elem, &module.structs, LayoutRules::HlslCBuffer, matrix_layout),
            ..variable_type(module, elem, matrix_layout)
        },
        Type::Struct(h) => {
            let decl = &module.structs[*h];
            let (offsets, _, _) =
                struct_layout(decl, &module.structs, LayoutRules::HlslCBuffer, matrix_layout);
            let members: Vec<Variable> = decl
                .members
                .iter()
                .zip(offsets)
                .map(|(member, offset)| {
                    let layout = member.matrix_layout.unwrap_or(matrix_layout);
                    Variable {
                        name: member.name.clone(),
                        offset,
                        size: type_layout(&member.ty, &module.structs, LayoutRules::HlslCBuffer, layout).size,
                        ty: variable_type(module, &member.ty, layout),
                    }
                })
                .collect();
            VariableType {
                name: decl.name.clone(),
                data_type: DataType::Struct,
                rows: 1,
                columns: members.iter().map(|m| component_total(&m.ty)).sum(),
                members,
                ..VariableType::default()
            }
        }
        _ => VariableType {
            name: module.type_name(ty),
            ..VariableType::default()
        },
    }
}

fn numeric(module: &Module, ty: &Type, scalar: Scalar, rows: u32, columns: u32) -> VariableType {
    VariableType {
        name: module.type_name(ty),
        data_type: DataType::of_scalar(scalar),
        rows,
        columns,
        ..VariableType::default()
    }
}

/// Scalar components in a whole variable, counting every array element.
fn component_total(ty: &VariableType) -> u32 {
    let one = if ty.data_type == DataType::Struct {
        ty.columns
    } else {
        ty.rows * ty.columns
    };
    one * ty.elements.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emit::test_support::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_vertex_signature_and_cbuffer() {
        let module = module(VERTEX, "VS", ShaderStage::Vertex);
        let reflection = Reflection::build(&module, &ReflectionHints::default());

        let inputs: Vec<_> = reflection
            .input_parameters
            .iter()
            .map(|p| (p.semantic.as_str(), p.location, p.mask))
            .collect();
        assert_eq!(inputs, [("POSITION", 0, 0x7), ("TEXCOORD", 1, 0x3)]);
        assert_eq!(reflection.output_parameters[0].semantic, "SV_Position");
        assert_eq!(reflection.output_parameters[0].component_type, DataType::Float);
        assert_eq!(reflection.cs_block_size, [0, 0, 0]);

        assert_eq!(
            reflection.resources,
            [ResourceDesc {
                name: "Transform".into(),
                kind: ResourceKind::ConstantBuffer,
                space: 0,
                bind_point: 0,
                bind_count: 1,
            }]
        );
        let cbuffer = reflection.constant_buffer_by_name("Transform").unwrap();
        assert_eq!(cbuffer.size, 80);
        let mvp = &cbuffer.variables[0];
        assert_eq!(mvp.ty.name, "float4x4");
        assert_eq!((mvp.ty.rows, mvp.ty.columns, mvp.size), (4, 4, 64));
        assert_eq!(cbuffer.variables[1].offset, 64);
    }

    #[test]
    fn test_resources_sorted_by_class() {
        let module = module(PIXEL, "PS", ShaderStage::Pixel);
        let reflection = Reflection::build(&module, &ReflectionHints::default());
        let kinds: Vec<_> = reflection.resources.iter().map(|r| r.kind).collect();
        assert_eq!(kinds, [ResourceKind::Sampler, ResourceKind::Texture]);
        assert_eq!(reflection.output_parameters[0].semantic, "SV_Target");
    }

    #[test]
    fn test_compute_block_size_and_views() {
        let module = module(COMPUTE, "CS", ShaderStage::Compute);
        let reflection = Reflection::build(&module, &ReflectionHints::default());
        assert_eq!(reflection.cs_block_size, [64, 1, 1]);
        assert!(reflection.input_parameters.is_empty());
        assert_eq!(
            reflection.resource_by_name("input").unwrap().kind,
            ResourceKind::ShaderResourceView
        );
        assert_eq!(
            reflection.resource_by_name("output").unwrap().kind,
            ResourceKind::UnorderedAccessView
        );
    }

    #[test]
    fn test_struct_variable_layout() {
        let source = r#"
struct Scene
{
    float wallStiffness;
    float4 gravity;
    float3 planes[4];
};

cbuffer cbSimulationConstants : register(b0)
{
    float timeStep;
    Scene scene;
};

float4 PS() : SV_Target
{
    return scene.gravity * timeStep + scene.planes[1].xyzz * scene.wallStiffness;
}
"#;
        let module = module(source, "PS", ShaderStage::Pixel);
        let reflection = Reflection::build(&module, &ReflectionHints::default());
        let cbuffer = &reflection.constant_buffers[0];
        assert_eq!(cbuffer.size, 112);
        let scene = &cbuffer.variables[1];
        assert_eq!((scene.offset, scene.size), (16, 92));
        assert_eq!(scene.ty.data_type, DataType::Struct);
        assert_eq!(scene.ty.columns, 17);
        let planes = &scene.ty.members[2];
        assert_eq!(planes.ty.name, "float3");
        assert_eq!((planes.ty.elements, planes.ty.element_stride), (4, 16));
        assert_eq!((planes.offset, planes.size), (32, 60));
    }
}
