//! Integration tests driving the C ABI the way a native host would.

#![allow(unsafe_op_in_unsafe_fn)]

use shaderconductor::ffi::*;
use shaderconductor::{ShaderStage, ShadingLanguage};
use std::ffi::{CStr, c_char, c_void};
use std::ptr;

unsafe fn blob_bytes(blob: *const ScBlob) -> Vec<u8> {
    if blob.is_null() {
        return Vec::new();
    }
    let data = ScGetBlobData(blob) as *const u8;
    std::slice::from_raw_parts(data, ScGetBlobSize(blob)).to_vec()
}

unsafe fn blob_text(blob: *const ScBlob) -> String {
    String::from_utf8_lossy(&blob_bytes(blob)).into_owned()
}

unsafe fn c_str(ptr: *const c_char) -> String {
    CStr::from_ptr(ptr).to_string_lossy().into_owned()
}

fn source_desc(source: &CStr, entry: &CStr, stage: ShaderStage) -> ScSourceDesc {
    ScSourceDesc {
        source: source.as_ptr(),
        file_name: ptr::null(),
        entry_point: entry.as_ptr(),
        stage: stage as u32,
        defines: ptr::null(),
        num_defines: 0,
        include_callback: None,
        include_user_data: ptr::null_mut(),
    }
}

fn target(language: ShadingLanguage) -> ScTargetDesc {
    ScTargetDesc {
        language: language as u32,
        version: ptr::null(),
        as_module: false,
    }
}

const VERTEX_SHADER: &CStr = c"
struct VS_INPUT {
    float3 pos : POSITION;
    float2 uv : TEXCOORD0;
};

struct VS_OUTPUT {
    float4 pos : SV_POSITION;
    float2 uv : TEXCOORD0;
};

cbuffer Constants : register(b0) {
    float4x4 worldViewProj;
};

VS_OUTPUT main(VS_INPUT input) {
    VS_OUTPUT output;
    output.pos = mul(float4(input.pos, 1.0), worldViewProj);
    output.uv = input.uv;
    return output;
}
";

const PIXEL_SHADER: &CStr = c"
Texture2D tex : register(t0);
SamplerState samp : register(s0);

struct PS_INPUT {
    float4 pos : SV_POSITION;
    float2 uv : TEXCOORD0;
};

float4 main(PS_INPUT input) : SV_TARGET {
    return tex.Sample(samp, input.uv);
}
";

const COMPUTE_SHADER: &CStr = c"
RWStructuredBuffer<float> output : register(u0);
StructuredBuffer<float> input : register(t0);

[numthreads(64, 1, 1)]
void main(uint3 id : SV_DispatchThreadID) {
    output[id.x] = input[id.x] * 2.0;
}
";

const BAD_SHADER: &CStr = c"
float4 main() : SV_TARGET {
    return undefined_variable;
}
";

const INCLUDING_SHADER: &CStr = c"
#include \"lighting.hlsli\"

float4 main(float3 n : NORMAL) : SV_TARGET {
    return float4((lambert(n) * INTENSITY).xxx, 1.0);
}
";

#[test]
fn test_compile_vertex_shader_to_spirv() {
    unsafe {
        let source = source_desc(VERTEX_SHADER, c"main", ShaderStage::Vertex);
        let mut result = ScResultDesc::default();
        let status = ScCompile(&source, ptr::null(), &target(ShadingLanguage::SpirV), &mut result);
        assert_eq!(status, S_OK, "{}", blob_text(result.error_warning_msg));
        assert!(!result.is_text);

        let code = blob_bytes(result.target);
        assert_eq!(code.len() % 4, 0);
        assert_eq!(&code[0..4], &0x0723_0203u32.to_le_bytes());
        ScDestroyResult(&mut result);
    }
}

#[test]
fn test_compile_pixel_shader_to_dxil() {
    unsafe {
        let source = source_desc(PIXEL_SHADER, c"main", ShaderStage::Pixel);
        let mut result = ScResultDesc::default();
        let status = ScCompile(&source, ptr::null(), &target(ShadingLanguage::Dxil), &mut result);
        assert_eq!(status, S_OK, "{}", blob_text(result.error_warning_msg));

        let code = blob_bytes(result.target);
        assert_eq!(&code[0..4], b"DXBC");
        ScDestroyResult(&mut result);
    }
}

#[test]
fn test_compile_multi_shares_one_front_end() {
    unsafe {
        let source = source_desc(COMPUTE_SHADER, c"main", ShaderStage::Compute);
        let targets = [
            target(ShadingLanguage::Hlsl),
            target(ShadingLanguage::Glsl),
            target(ShadingLanguage::MslMacOs),
        ];
        let mut results: [ScResultDesc; 3] = Default::default();
        let status = ScCompileMulti(
            &source,
            ptr::null(),
            targets.as_ptr(),
            targets.len() as u32,
            results.as_mut_ptr(),
        );
        assert_eq!(status, S_OK);
        assert!(blob_text(results[0].target).contains("numthreads"));
        assert!(blob_text(results[1].target).contains("local_size_x = 64"));
        assert!(blob_text(results[2].target).contains("kernel"));
        for result in &mut results {
            assert!(result.is_text);
            ScDestroyResult(result);
        }
    }
}

#[test]
fn test_compile_with_error() {
    unsafe {
        let source = source_desc(BAD_SHADER, c"main", ShaderStage::Pixel);
        let mut result = ScResultDesc::default();
        let status = ScCompile(&source, ptr::null(), &target(ShadingLanguage::Glsl), &mut result);
        assert_eq!(status, E_FAIL);
        assert!(result.has_error);
        assert!(result.target.is_null());
        let message = blob_text(result.error_warning_msg);
        assert!(message.contains("undeclared identifier 'undefined_variable'"), "{}", message);
        ScDestroyResult(&mut result);
        assert!(result.error_warning_msg.is_null());
    }
}

unsafe extern "C" fn include_lighting(
    user_data: *mut c_void,
    name: *const c_char,
    _includer: *const c_char,
) -> *mut ScBlob {
    *(user_data as *mut u32) += 1;
    if c_str(name) != "lighting.hlsli" {
        return ptr::null_mut();
    }
    let text = b"float lambert(float3 n) { return saturate(dot(n, float3(0, 0, 1))); }\n";
    ScCreateBlob(text.as_ptr() as *const c_void, text.len())
}

#[test]
fn test_include_callback_and_defines() {
    unsafe {
        let mut calls = 0u32;
        let defines = [ScMacroDefine {
            name: c"INTENSITY".as_ptr(),
            value: c"0.8".as_ptr(),
        }];
        let mut source = source_desc(INCLUDING_SHADER, c"main", ShaderStage::Pixel);
        source.defines = defines.as_ptr();
        source.num_defines = 1;
        source.include_callback = Some(include_lighting);
        source.include_user_data = &mut calls as *mut u32 as *mut c_void;

        let mut result = ScResultDesc::default();
        let status = ScCompile(&source, ptr::null(), &target(ShadingLanguage::Essl), &mut result);
        assert_eq!(status, S_OK, "{}", blob_text(result.error_warning_msg));
        assert_eq!(calls, 1);
        assert!(blob_text(result.target).contains("#version 310 es"));
        ScDestroyResult(&mut result);

        let mut result = ScResultDesc::default();
        assert_eq!(ScPreprocess(&source, &mut result), S_OK);
        let text = blob_text(result.target);
        assert!(text.contains("float lambert(float3 n)"));
        assert!(text.contains("0.8"));
        ScDestroyResult(&mut result);
    }
}

#[test]
fn test_reflection_accessors() {
    unsafe {
        let source = source_desc(VERTEX_SHADER, c"main", ShaderStage::Vertex);
        let options = ScOptionsDesc {
            need_reflection: true,
            shift_all_cbuffers_bindings: 2,
            ..ScOptionsDesc::default()
        };
        let mut result = ScResultDesc::default();
        let status = ScCompile(&source, &options, &target(ShadingLanguage::Dxil), &mut result);
        assert_eq!(status, S_OK, "{}", blob_text(result.error_warning_msg));
        let refl = result.reflection;
        assert!(!refl.is_null());

        assert_eq!(ScReflectionNumInputs(refl), 2);
        let mut param = std::mem::zeroed::<ScSignatureParameter>();
        assert_eq!(ScReflectionGetInput(refl, 1, &mut param), S_OK);
        assert_eq!(c_str(param.semantic), "TEXCOORD");
        assert_eq!((param.location, param.mask), (1, 0x3));
        assert_eq!(ScReflectionGetInput(refl, 5, &mut param), E_INVALIDARG);

        assert_eq!(ScReflectionNumResources(refl), 1);
        let mut resource = std::mem::zeroed::<ScResourceDesc>();
        assert_eq!(ScReflectionGetResource(refl, 0, &mut resource), S_OK);
        assert_eq!(c_str(resource.name), "Constants");
        assert_eq!(resource.bind_point, 2);

        let mut cbuffer = std::mem::zeroed::<ScConstantBufferDesc>();
        assert_eq!(ScReflectionGetConstantBuffer(refl, 0, &mut cbuffer), S_OK);
        assert_eq!((cbuffer.size, cbuffer.num_variables), (64, 1));
        let mut variable = std::mem::zeroed::<ScVariableDesc>();
        assert_eq!(ScReflectionGetVariable(refl, 0, 0, &mut variable), S_OK);
        assert_eq!(c_str(variable.name), "worldViewProj");
        assert_eq!(c_str(variable.type_name), "float4x4");
        assert_eq!((variable.rows, variable.columns), (4, 4));

        let mut block = [1u32; 3];
        assert_eq!(ScReflectionGetBlockSize(refl, block.as_mut_ptr()), S_OK);
        assert_eq!(block, [0, 0, 0]);
        ScDestroyResult(&mut result);
        assert!(result.reflection.is_null());
    }
}

#[test]
fn test_disassemble_and_parts() {
    unsafe {
        let source = source_desc(PIXEL_SHADER, c"main", ShaderStage::Pixel);
        let options = ScOptionsDesc {
            enable_debug_info: true,
            ..ScOptionsDesc::default()
        };
        let mut compiled = ScResultDesc::default();
        assert_eq!(
            ScCompile(&source, &options, &target(ShadingLanguage::Dxil), &mut compiled),
            S_OK
        );
        let code = blob_bytes(compiled.target);

        let desc = ScDisassembleDesc {
            language: ShadingLanguage::Dxil as u32,
            binary: code.as_ptr() as *const c_void,
            binary_size: code.len(),
        };
        let mut listing = ScResultDesc::default();
        assert_eq!(ScDisassemble(&desc, &mut listing), S_OK);
        assert!(listing.is_text);
        assert!(blob_text(listing.target).contains("ps_6_0"));
        ScDestroyResult(&mut listing);

        // Input signature part
        let mut part = ptr::null_mut();
        assert_eq!(ScGetBlobPart(code.as_ptr() as *const c_void, code.len(), 0, &mut part), S_OK);
        assert!(ScGetBlobSize(part) > 8);
        ScDestroyBlob(part);

        let mut stripped = ptr::null_mut();
        assert_eq!(
            ScStripShader(code.as_ptr() as *const c_void, code.len(), 0x2, &mut stripped),
            S_OK
        );
        let stripped_bytes = blob_bytes(stripped);
        assert!(stripped_bytes.len() < code.len());
        // Debug info part is gone
        let mut part = ptr::null_mut();
        assert_eq!(
            ScGetBlobPart(stripped_bytes.as_ptr() as *const c_void, stripped_bytes.len(), 5, &mut part),
            E_FAIL
        );
        assert!(part.is_null());
        ScDestroyBlob(stripped);
        ScDestroyResult(&mut compiled);
    }
}

#[test]
fn test_disassemble_rejects_text_target() {
    unsafe {
        let text = b"#version 450\nvoid main() {}\n";
        let desc = ScDisassembleDesc {
            language: ShadingLanguage::Glsl as u32,
            binary: text.as_ptr() as *const c_void,
            binary_size: text.len(),
        };
        let mut result = ScResultDesc::default();
        assert_eq!(ScDisassemble(&desc, &mut result), E_FAIL);
        assert!(result.has_error);
        assert!(blob_text(result.error_warning_msg).starts_with("Invalid argument"));
        ScDestroyResult(&mut result);
    }
}

#[test]
fn test_abi_version() {
    assert_eq!(ScGetAbiVersion(), SC_ABI_VERSION);
    assert_eq!(ScGetAbiVersion(), 1);
}
