//! Compilation driver.
//!
//! A compile walks `Preprocess -> Parse -> Analyze -> BuildIr -> Optimize`
//! once, then emits every requested target from the same module. The first
//! phase that reports an error stops the walk; warnings collected up to
//! that point are reported ahead of the errors.

use crate::blob::Blob;
use crate::desc::{DisassembleDesc, OptionsDesc, ResultDesc, ShaderModel, SourceDesc, TargetDesc};
use crate::diag::{Diagnostics, ErrorKind};
use crate::disasm::disassemble_binary;
use crate::emit::{EmitContext, emit};
use crate::front::lexer::tokenize;
use crate::front::parser::parse;
use crate::front::preprocess::preprocess_source;
use crate::front::sema::{SemaOptions, analyze};
use crate::ir::{Module, builder};
use crate::opt::optimize;
use crate::reflect::Reflection;
use std::fmt;
use std::sync::Arc;

/// HLSL language version reported through `__HLSL_VERSION`
const HLSL_VERSION: &str = "2018";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Start,
    Preprocess,
    Parse,
    Analyze,
    BuildIr,
    Optimize,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Start => "start",
            Phase::Preprocess => "preprocess",
            Phase::Parse => "parse",
            Phase::Analyze => "analyze",
            Phase::BuildIr => "build IR",
            Phase::Optimize => "optimize",
        })
    }
}

/// Output of the shared front half of a compile
struct Frontend {
    module: Module,
    warnings: Diagnostics,
}

/// Tracks the current phase and the warnings seen so far.
struct Pipeline {
    phase: Phase,
    warnings: Diagnostics,
}

impl Pipeline {
    fn new() -> Self {
        Pipeline {
            phase: Phase::Start,
            warnings: Diagnostics::new(),
        }
    }

    fn enter(&mut self, phase: Phase) {
        debug_log!("compile phase: {} -> {}", self.phase, phase);
        self.phase = phase;
    }

    /// Earlier warnings followed by the failing phase's diagnostics.
    fn fail(&self, errors: Diagnostics) -> Diagnostics {
        debug_log!("compile failed in phase {}", self.phase);
        let mut all = self.warnings.clone();
        all.extend(errors);
        all
    }

    fn step<T>(&mut self, phase: Phase, result: Result<T, Diagnostics>) -> Result<T, Diagnostics> {
        self.enter(phase);
        result.map_err(|errors| self.fail(errors))
    }
}

/// Macros every compile starts with.
fn predefined_macros(options: &OptionsDesc) -> Vec<(String, String)> {
    let ShaderModel { major, minor } = options.shader_model;
    let mut macros = vec![
        ("__HLSL_VERSION".to_string(), HLSL_VERSION.to_string()),
        ("__SHADER_TARGET_MAJOR".to_string(), major.to_string()),
        ("__SHADER_TARGET_MINOR".to_string(), minor.to_string()),
    ];
    if options.enable_16bit_types {
        macros.push(("__HLSL_ENABLE_16_BIT".to_string(), "1".to_string()));
    }
    macros
}

fn run_frontend(source: &SourceDesc, options: &OptionsDesc) -> Result<Frontend, Diagnostics> {
    let mut pipeline = Pipeline::new();
    if options.enable_16bit_types && !options.shader_model.supports_16bit_types() {
        return Err(Diagnostics::single(
            ErrorKind::UnsupportedFeature,
            None,
            "16-bit types requires shader model 6.2 or up.",
        ));
    }

    let file_name = source.file_name();
    let preprocessed = pipeline.step(
        Phase::Preprocess,
        preprocess_source(source, &predefined_macros(options)),
    )?;
    pipeline.warnings.extend(preprocessed.warnings);

    let tokens = pipeline.step(Phase::Parse, tokenize(&preprocessed.text, Arc::from(file_name)))?;
    let unit = pipeline.step(Phase::Parse, parse(tokens).map_err(Diagnostics::from))?;

    let sema_options = SemaOptions::new(source.entry_point(), source.stage, options);
    let mut checked = pipeline.step(Phase::Analyze, analyze(&unit, &sema_options, file_name))?;
    pipeline
        .warnings
        .extend(std::mem::take(&mut checked.warnings));

    let mut module = pipeline.step(Phase::BuildIr, builder::build(checked, options))?;
    if options.enable_debug_info {
        module.debug_source = Some(preprocessed.text);
    }
    dump_ir!("build", &module);

    pipeline.enter(Phase::Optimize);
    optimize(&mut module, options);
    dump_ir!("optimize", &module);

    Ok(Frontend {
        module,
        warnings: pipeline.warnings,
    })
}

fn emit_target(frontend: &Frontend, options: &OptionsDesc, target: &TargetDesc) -> ResultDesc {
    debug_log!("emitting {}", target.language);
    let ctx = EmitContext::new(options, target);
    match emit(&frontend.module, &ctx) {
        Ok(output) => {
            let mut result =
                ResultDesc::success(output.blob, output.is_text, frontend.warnings.render());
            if options.need_reflection {
                result.reflection = Some(Reflection::build(
                    &frontend.module,
                    &output.reflection_hints,
                ));
            }
            result
        }
        Err(errors) => {
            let mut all = frontend.warnings.clone();
            all.extend(errors);
            ResultDesc::failure(all.render())
        }
    }
}

/// Compiles `source` for one target.
pub fn compile(source: &SourceDesc, options: &OptionsDesc, target: &TargetDesc) -> ResultDesc {
    compile_multi(source, options, std::slice::from_ref(target))
        .into_iter()
        .next()
        .unwrap_or_else(|| ResultDesc::failure(String::new()))
}

/// Compiles `source` once and emits it for each target, in order.
pub fn compile_multi(
    source: &SourceDesc,
    options: &OptionsDesc,
    targets: &[TargetDesc],
) -> Vec<ResultDesc> {
    debug_log!(
        "compiling {} ({}, entry {}) for {} target(s)",
        source.file_name(),
        source.stage,
        source.entry_point(),
        targets.len()
    );
    match run_frontend(source, options) {
        Ok(frontend) => targets
            .iter()
            .map(|target| emit_target(&frontend, options, target))
            .collect(),
        Err(errors) => {
            let message = errors.render();
            targets
                .iter()
                .map(|_| ResultDesc::failure(message.clone()))
                .collect()
        }
    }
}

/// Runs only the preprocessor; the target blob holds the expanded text.
pub fn preprocess(source: &SourceDesc) -> ResultDesc {
    let options = OptionsDesc::default();
    match preprocess_source(source, &predefined_macros(&options)) {
        Ok(out) => ResultDesc::success(Blob::from(out.text), true, out.warnings.render()),
        Err(errors) => ResultDesc::failure(errors.render()),
    }
}

/// Turns a DXIL or SPIR-V binary back into text.
pub fn disassemble(desc: &DisassembleDesc) -> ResultDesc {
    match disassemble_binary(desc.language, desc.binary.data()) {
        Ok(text) => ResultDesc::success(Blob::from(text), true, String::new()),
        Err(err) => ResultDesc::failure(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::desc::{MacroDefine, ShaderStage, ShadingLanguage};
    use crate::emit::test_support::{COMPUTE, PIXEL, VERTEX};
    use crate::front::include::MemoryInclude;
    use pretty_assertions::assert_eq;

    const BROKEN: &str = r#"
float4 PS(float2 uv : TEXCOORD0) : SV_Target
{
    return undeclared * uv.x;
}
"#;

    const TRUNCATING: &str = r#"
float4 PS(float4 c : COLOR0) : SV_Target
{
    float2 t = c;
    return float4(t, 0, 1);
}
"#;

    fn all_languages() -> Vec<TargetDesc> {
        [
            ShadingLanguage::Dxil,
            ShadingLanguage::SpirV,
            ShadingLanguage::Hlsl,
            ShadingLanguage::Glsl,
            ShadingLanguage::Essl,
            ShadingLanguage::MslMacOs,
            ShadingLanguage::MslIos,
        ]
        .into_iter()
        .map(TargetDesc::new)
        .collect()
    }

    const GEOMETRY: &str = r#"
struct V
{
    float4 pos : SV_Position;
};

[maxvertexcount(3)]
void GS(triangle V input[3], inout TriangleStream<V> stream)
{
    for (uint i = 0; i < 3; ++i)
        stream.Append(input[i]);
    stream.RestartStrip();
}
"#;

    const TESSELLATION: &str = r#"
struct ControlPoint
{
    float3 pos : POSITION;
};

struct PatchConstants
{
    float edges[3] : SV_TessFactor;
    float inside : SV_InsideTessFactor;
};

PatchConstants ConstantsHS(InputPatch<ControlPoint, 3> patch)
{
    PatchConstants output;
    output.edges[0] = output.edges[1] = output.edges[2] = 4;
    output.inside = 4;
    return output;
}

[domain("tri")]
[partitioning("fractional_odd")]
[outputtopology("triangle_cw")]
[outputcontrolpoints(3)]
[patchconstantfunc("ConstantsHS")]
ControlPoint HS(InputPatch<ControlPoint, 3> patch, uint i : SV_OutputControlPointID)
{
    return patch[i];
}

[domain("tri")]
float4 DS(PatchConstants constants, float3 bary : SV_DomainLocation,
          const OutputPatch<ControlPoint, 3> patch) : SV_Position
{
    float3 pos = patch[0].pos * bary.x + patch[1].pos * bary.y + patch[2].pos * bary.z;
    return float4(pos, 1);
}
"#;

    #[test]
    fn test_compile_every_target() {
        let source = SourceDesc::new(PIXEL, "PS", ShaderStage::Pixel);
        let targets = all_languages();
        let results = compile_multi(&source, &OptionsDesc::default(), &targets);
        assert_eq!(results.len(), targets.len());
        for (target, result) in targets.iter().zip(&results) {
            assert!(!result.has_error, "{}: {}", target.language, result.messages());
            assert!(!result.target.is_empty());
            assert_eq!(result.is_text, !target.language.is_binary());
            assert!(result.reflection.is_none());
        }
    }

    #[test]
    fn test_undeclared_identifier_fails_every_target() {
        let source = SourceDesc::new(BROKEN, "PS", ShaderStage::Pixel);
        let results = compile_multi(&source, &OptionsDesc::default(), &all_languages());
        for result in results {
            assert!(result.has_error);
            assert!(result.target.is_empty());
            let message = result.messages();
            assert!(message.contains("use of undeclared identifier 'undeclared'"), "{}", message);
            assert!(message.starts_with("shader.hlsl(4,"), "{}", message);
        }
    }

    #[test]
    fn test_warnings_accompany_success() {
        let source = SourceDesc::new(TRUNCATING, "PS", ShaderStage::Pixel);
        let result = compile(
            &source,
            &OptionsDesc::default(),
            &TargetDesc::new(ShadingLanguage::Glsl),
        );
        assert!(!result.has_error);
        assert!(!result.target.is_empty());
        assert!(result.messages().contains("warning: implicit truncation of vector type"));
    }

    #[test]
    fn test_missing_entry_point() {
        let source = SourceDesc::new(PIXEL, "", ShaderStage::Pixel);
        let result = compile(
            &source,
            &OptionsDesc::default(),
            &TargetDesc::new(ShadingLanguage::SpirV),
        );
        assert!(result.has_error);
        assert!(result.messages().contains("main"));
    }

    #[test]
    fn test_16bit_types_need_shader_model_6_2() {
        let source = SourceDesc::new(PIXEL, "PS", ShaderStage::Pixel);
        let options = OptionsDesc {
            enable_16bit_types: true,
            ..OptionsDesc::default()
        };
        let result = compile(&source, &options, &TargetDesc::new(ShadingLanguage::SpirV));
        assert!(result.has_error);
        assert_eq!(
            result.messages(),
            "error: 16-bit types requires shader model 6.2 or up."
        );

        let options = OptionsDesc {
            shader_model: ShaderModel::SM_6_2,
            ..options
        };
        let result = compile(&source, &options, &TargetDesc::new(ShadingLanguage::SpirV));
        assert!(!result.has_error, "{}", result.messages());
    }

    #[test]
    fn test_reflection_on_request() {
        let source = SourceDesc::new(COMPUTE, "CS", ShaderStage::Compute);
        let options = OptionsDesc {
            need_reflection: true,
            ..OptionsDesc::default()
        };
        let result = compile(&source, &options, &TargetDesc::new(ShadingLanguage::Dxil));
        assert!(!result.has_error, "{}", result.messages());
        let reflection = result.reflection.unwrap();
        assert_eq!(reflection.cs_block_size, [64, 1, 1]);
        assert_eq!(reflection.resources.len(), 2);
    }

    #[test]
    fn test_binding_shift_reaches_reflection() {
        let source = SourceDesc::new(VERTEX, "VS", ShaderStage::Vertex);
        let options = OptionsDesc {
            need_reflection: true,
            shift_all_cbuffers_bindings: 3,
            ..OptionsDesc::default()
        };
        let result = compile(&source, &options, &TargetDesc::new(ShadingLanguage::SpirV));
        let reflection = result.reflection.unwrap();
        assert_eq!(reflection.resources[0].bind_point, 3);
    }

    #[test]
    fn test_defines_and_includes() {
        let shader = r#"
#include "common.hlsli"
float4 PS() : SV_Target
{
    return float4(SCALE, SCALE, SCALE, 1) * tint();
}
"#;
        let mut source = SourceDesc::new(shader, "PS", ShaderStage::Pixel);
        source.defines.push(MacroDefine::new("SCALE", "0.5"));
        source.include_handler = Some(Arc::new(
            MemoryInclude::new().with_file("common.hlsli", "float4 tint() { return 1; }\n"),
        ));
        let result = compile(
            &source,
            &OptionsDesc::default(),
            &TargetDesc::new(ShadingLanguage::Hlsl),
        );
        assert!(!result.has_error, "{}", result.messages());

        let result = preprocess(&source);
        assert!(!result.has_error);
        let text = result.target.to_string_lossy();
        assert!(text.contains("float4 tint()"));
        assert!(text.contains("float4(0.5, 0.5, 0.5, 1)"));
    }

    #[test]
    fn test_missing_include_is_reported() {
        let source = SourceDesc::new("#include \"nowhere.hlsli\"\n", "main", ShaderStage::Pixel);
        let result = preprocess(&source);
        assert!(result.has_error);
        assert!(result.messages().contains("Couldn't load included file nowhere.hlsli."));
    }

    #[test]
    fn test_disassemble_round_trip() {
        let source = SourceDesc::new(VERTEX, "VS", ShaderStage::Vertex);
        for language in [ShadingLanguage::SpirV, ShadingLanguage::Dxil] {
            let compiled = compile(&source, &OptionsDesc::default(), &TargetDesc::new(language));
            assert!(!compiled.has_error, "{}", compiled.messages());
            let listing = disassemble(&DisassembleDesc {
                language,
                binary: compiled.target,
            });
            assert!(!listing.has_error, "{}", listing.messages());
            assert!(listing.is_text);
            assert!(!listing.target.is_empty());
        }
    }

    #[test]
    fn test_disassemble_rejects_text_and_garbage() {
        let result = disassemble(&DisassembleDesc {
            language: ShadingLanguage::Glsl,
            binary: Blob::from_text("void main() {}"),
        });
        assert!(result.has_error);
        assert!(result.messages().starts_with("Invalid argument"));

        let result = disassemble(&DisassembleDesc {
            language: ShadingLanguage::SpirV,
            binary: Blob::new(&[1, 2, 3, 4, 5]),
        });
        assert!(result.has_error);
        assert!(result.target.is_empty());
    }

    #[test]
    fn test_geometry_source_reaches_capability_check() {
        let source = SourceDesc::new(GEOMETRY, "GS", ShaderStage::Geometry);
        let targets = all_languages();
        let results = compile_multi(&source, &OptionsDesc::default(), &targets);
        for (target, result) in targets.iter().zip(&results) {
            assert!(result.has_error);
            let message = result.messages();
            let expected = format!("geometry shaders are not supported when targeting {}", target.language);
            assert!(message.contains(&expected), "{}", message);
            assert!(!message.contains("expected"), "{}", message);
        }
    }

    #[test]
    fn test_tessellation_sources_reach_capability_check() {
        for (entry, stage, name) in [
            ("HS", ShaderStage::Hull, "hull"),
            ("DS", ShaderStage::Domain, "domain"),
        ] {
            let source = SourceDesc::new(TESSELLATION, entry, stage);
            let result = compile(&source, &OptionsDesc::default(), &TargetDesc::new(ShadingLanguage::SpirV));
            assert!(result.has_error);
            let message = result.messages();
            assert!(
                message.contains(&format!("{} shaders are not supported when targeting", name)),
                "{}",
                message
            );
        }
    }

    #[test]
    fn test_geometry_entry_needs_max_vertex_count() {
        let shader = GEOMETRY.replace("[maxvertexcount(3)]", "");
        let source = SourceDesc::new(&shader, "GS", ShaderStage::Geometry);
        let result = compile(&source, &OptionsDesc::default(), &TargetDesc::new(ShadingLanguage::Hlsl));
        assert!(result.has_error);
        assert!(result.messages().contains("maxvertexcount"), "{}", result.messages());
    }

    #[test]
    fn test_primitive_keywords_stay_identifiers() {
        let shader = r#"
float4 PS(float4 c : COLOR0) : SV_Target
{
    float point = c.x;
    float line = point * 2;
    return float4(point, line, 0, 1);
}
"#;
        let source = SourceDesc::new(shader, "PS", ShaderStage::Pixel);
        let result = compile(&source, &OptionsDesc::default(), &TargetDesc::new(ShadingLanguage::Glsl));
        assert!(!result.has_error, "{}", result.messages());
    }

    #[test]
    fn test_zero_shifts_match_default_bindings() {
        let explicit = OptionsDesc {
            shift_all_textures_bindings: 0,
            shift_all_samplers_bindings: 0,
            shift_all_cbuffers_bindings: 0,
            shift_all_ua_buffers_bindings: 0,
            need_reflection: true,
            ..OptionsDesc::default()
        };
        let omitted = OptionsDesc {
            need_reflection: true,
            ..OptionsDesc::default()
        };
        for (shader, entry, stage) in [
            (VERTEX, "VS", ShaderStage::Vertex),
            (PIXEL, "PS", ShaderStage::Pixel),
            (COMPUTE, "CS", ShaderStage::Compute),
        ] {
            let source = SourceDesc::new(shader, entry, stage);
            let targets = all_languages();
            let shifted = compile_multi(&source, &explicit, &targets);
            let plain = compile_multi(&source, &omitted, &targets);
            for ((target, a), b) in targets.iter().zip(&shifted).zip(&plain) {
                assert!(!a.has_error, "{} {}: {}", entry, target.language, a.messages());
                assert_eq!(a.target, b.target, "{} {}", entry, target.language);
                assert_eq!(a.reflection, b.reflection, "{} {}", entry, target.language);
            }
        }
    }

    #[test]
    fn test_optimization_keeps_interface_and_bindings() {
        let mut configurations: Vec<OptionsDesc> = (0..=3)
            .map(|level| OptionsDesc {
                optimization_level: level,
                need_reflection: true,
                ..OptionsDesc::default()
            })
            .collect();
        configurations.push(OptionsDesc {
            disable_optimizations: true,
            need_reflection: true,
            ..OptionsDesc::default()
        });
        for (shader, entry, stage) in [
            (VERTEX, "VS", ShaderStage::Vertex),
            (PIXEL, "PS", ShaderStage::Pixel),
            (COMPUTE, "CS", ShaderStage::Compute),
        ] {
            let source = SourceDesc::new(shader, entry, stage);
            for language in [ShadingLanguage::SpirV, ShadingLanguage::Glsl, ShadingLanguage::MslMacOs] {
                let target = TargetDesc::new(language);
                let reflections: Vec<_> = configurations
                    .iter()
                    .map(|options| {
                        let result = compile(&source, options, &target);
                        assert!(!result.has_error, "{} {}: {}", entry, language, result.messages());
                        result.reflection.unwrap()
                    })
                    .collect();
                for reflection in &reflections[1..] {
                    assert_eq!(reflection, &reflections[0], "{} {}", entry, language);
                }
            }
        }
    }
}
