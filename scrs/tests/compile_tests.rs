//! End-to-end tests through the safe API.

use pretty_assertions::assert_eq;
use scrs::{
    BindingShifts, BlobPart, CompileBuilder, CompileFlags, DisassembleFlags, Error, IncludeHandler,
    MemoryInclude, PreprocessBuilder, ShaderStage, ShadingLanguage, StripFlags, Target,
    disassemble, get_blob_part, strip_shader,
};

const VERTEX_SHADER: &str = r#"
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
"#;

const PIXEL_SHADER: &str = r#"
Texture2D tex : register(t0);
SamplerState samp : register(s0);

struct PS_INPUT {
    float4 pos : SV_POSITION;
    float2 uv : TEXCOORD0;
};

float4 main(PS_INPUT input) : SV_TARGET {
    return tex.Sample(samp, input.uv);
}
"#;

const COMPUTE_SHADER: &str = r#"
RWStructuredBuffer<float> output : register(u0);
StructuredBuffer<float> input : register(t0);

[numthreads(64, 1, 1)]
void main(uint3 id : SV_DispatchThreadID) {
    output[id.x] = input[id.x] * 2.0;
}
"#;

const BAD_SHADER: &str = r#"
float4 main() : SV_TARGET {
    return undefined_variable;
}
"#;

const INCLUDING_SHADER: &str = r#"
#include "lighting.hlsli"

float4 main(float3 n : NORMAL) : SV_TARGET {
    return float4((lambert(n) * INTENSITY).xxx, 1.0);
}
"#;

const LIGHTING: &str = "float lambert(float3 n) { return saturate(dot(n, float3(0, 0, 1))); }\n";

#[test]
fn test_vertex_shader_to_spirv() {
    let result = CompileBuilder::new(VERTEX_SHADER, ShaderStage::Vertex)
        .target(ShadingLanguage::SpirV)
        .compile()
        .unwrap();
    assert!(!result.is_text);
    assert_eq!(result.target.len() % 4, 0);
    assert_eq!(&result.target[0..4], &0x0723_0203u32.to_le_bytes());
}

#[test]
fn test_compute_shader_to_every_text_target() {
    let results = CompileBuilder::new(COMPUTE_SHADER, ShaderStage::Compute)
        .target(ShadingLanguage::Hlsl)
        .target(ShadingLanguage::Glsl)
        .target(ShadingLanguage::MslMacOs)
        .compile_all();
    assert_eq!(results.len(), 3);

    let texts: Vec<String> = results
        .into_iter()
        .map(|r| {
            let r = r.unwrap();
            assert!(r.is_text);
            r.target.to_string_lossy()
        })
        .collect();
    assert!(texts[0].contains("numthreads"));
    assert!(texts[1].contains("local_size_x = 64"));
    assert!(texts[2].contains("kernel"));
}

#[test]
fn test_compile_all_reports_each_target() {
    let results = CompileBuilder::new(BAD_SHADER, ShaderStage::Pixel)
        .target(ShadingLanguage::Dxil)
        .target(ShadingLanguage::Glsl)
        .compile_all();
    assert_eq!(results.len(), 2);
    for result in results {
        assert!(matches!(
            result,
            Err(Error::Compilation { message, .. })
                if message.contains("undeclared identifier 'undefined_variable'")
        ));
    }
}

#[test]
fn test_error_message() {
    let err = CompileBuilder::new(BAD_SHADER, ShaderStage::Pixel)
        .target(ShadingLanguage::Glsl)
        .compile()
        .unwrap_err();
    let text = err.to_string();
    assert!(text.starts_with("Compilation failed: "), "{}", text);
    assert!(text.contains("undeclared identifier 'undefined_variable'"), "{}", text);
}

/// Counts lookups while serving files from memory.
struct CountingInclude {
    files: MemoryInclude,
    lookups: Vec<String>,
}

impl IncludeHandler for CountingInclude {
    fn open(&mut self, name: &str, includer: &str) -> scrs::Result<Vec<u8>> {
        self.lookups.push(format!("{} <- {}", name, includer));
        self.files.open(name, includer)
    }
}

#[test]
fn test_include_handler_and_defines() {
    let mut handler = CountingInclude {
        files: MemoryInclude::new().with_file("lighting.hlsli", LIGHTING),
        lookups: Vec::new(),
    };
    let result = CompileBuilder::new(INCLUDING_SHADER, ShaderStage::Pixel)
        .file_name("lit.hlsl")
        .define("INTENSITY", "0.8")
        .include_handler(&mut handler)
        .target(ShadingLanguage::Essl)
        .compile()
        .unwrap();
    assert!(result.target.to_string_lossy().contains("#version 310 es"));
    assert_eq!(handler.lookups, vec!["lighting.hlsli <- lit.hlsl".to_string()]);

    let mut files = MemoryInclude::new().with_file("lighting.hlsli", LIGHTING);
    let preprocessed = PreprocessBuilder::new(INCLUDING_SHADER)
        .define("INTENSITY", "0.8")
        .include_handler(&mut files)
        .preprocess()
        .unwrap();
    let text = preprocessed.source.to_string_lossy();
    assert!(text.contains("float lambert(float3 n)"));
    assert!(text.contains("0.8"));
}

#[test]
fn test_reflection() {
    let result = CompileBuilder::new(VERTEX_SHADER, ShaderStage::Vertex)
        .with_flags(CompileFlags::NEED_REFLECTION)
        .binding_shifts(BindingShifts {
            cbuffers: 2,
            ..BindingShifts::default()
        })
        .compile()
        .unwrap();
    let reflection = result.reflection.unwrap();

    let inputs: Vec<_> = reflection.input_parameters().collect();
    assert_eq!(inputs.len(), 2);
    assert_eq!(inputs[1].semantic_name, "TEXCOORD");
    assert_eq!((inputs[1].location, inputs[1].mask), (1, 0x3));

    let resources: Vec<_> = reflection.resource_bindings().collect();
    assert_eq!(resources.len(), 1);
    assert_eq!(resources[0].name, "Constants");
    assert_eq!(resources[0].bind_point, 2);

    let buffers: Vec<_> = reflection.constant_buffers().collect();
    assert_eq!(buffers.len(), 1);
    assert_eq!(buffers[0].size, 64);
    assert_eq!(buffers[0].variables.len(), 1);
    assert_eq!(buffers[0].variables[0].name, "worldViewProj");
    assert_eq!(buffers[0].variables[0].type_name, "float4x4");
}

#[test]
fn test_disassemble_and_parts() {
    let result = CompileBuilder::new(PIXEL_SHADER, ShaderStage::Pixel)
        .with_flags(CompileFlags::DEBUG_INFO)
        .target(Target::new(ShadingLanguage::Dxil))
        .compile()
        .unwrap();
    let code = &result.target;

    let listing = disassemble(ShadingLanguage::Dxil, code).unwrap();
    assert!(listing.contains("ps_6_0"));

    let numbered = scrs::DisassembleBuilder::new(ShadingLanguage::Dxil, code)
        .flags(DisassembleFlags::ENABLE_INSTRUCTION_NUMBERING | DisassembleFlags::INSTRUCTION_ONLY)
        .disassemble()
        .unwrap();
    assert!(numbered.lines().all(|l| !l.starts_with(';')));

    let input_sig = get_blob_part(code, BlobPart::InputSignature).unwrap();
    assert!(input_sig.len() > 8);

    let stripped = strip_shader(code, StripFlags::DEBUG_INFO).unwrap();
    assert!(stripped.len() < code.len());
    assert!(matches!(
        get_blob_part(&stripped, BlobPart::DebugInfo),
        Err(Error::BlobPart { .. })
    ));
    // Stripped containers still disassemble
    assert!(disassemble(ShadingLanguage::Dxil, &stripped).is_ok());
}

#[test]
fn test_abi_version() {
    assert_eq!(scrs::abi_version(), 1);
}
