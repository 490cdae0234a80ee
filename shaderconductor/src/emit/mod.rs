//! Target emitters.
//!
//! Every output language implements [`Emitter`]. Before a module reaches an
//! emitter, [`check_capabilities`] rejects combinations the target cannot
//! express (stage, version, 16/64-bit types) with a target-capability
//! diagnostic instead of degrading the output.

pub mod dxil;
pub mod glsl;
pub mod hlsl;
pub mod msl;
pub mod spirv;
mod text;

use crate::blob::Blob;
use crate::desc::{OptionsDesc, ShaderStage, ShadingLanguage, TargetDesc};
use crate::diag::{Diagnostics, ErrorKind};
use crate::ir::Module;
use std::fmt::Debug;

/// Options an emitter runs under.
#[derive(Debug, Clone, Copy)]
pub struct EmitContext<'a> {
    pub options: &'a OptionsDesc,
    pub target: &'a TargetDesc,
}

impl<'a> EmitContext<'a> {
    pub fn new(options: &'a OptionsDesc, target: &'a TargetDesc) -> Self {
        EmitContext { options, target }
    }

    pub fn language(&self) -> ShadingLanguage {
        self.target.language
    }

    /// The requested version string, if any.
    pub fn version(&self) -> Option<&str> {
        self.target
            .version
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }
}

/// A texture/sampler pair merged into one combined sampler by the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CombinedSampler {
    /// Name in the emitted code
    pub name: String,
    pub texture: String,
    /// `None` for the dummy sampler used by texel fetches
    pub sampler: Option<String>,
    pub binding: u32,
}

/// Target-specific facts the reflection data cannot derive from the IR.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReflectionHints {
    pub combined_samplers: Vec<CombinedSampler>,
}

#[derive(Debug, Clone)]
pub struct EmitOutput {
    pub blob: Blob,
    pub is_text: bool,
    pub reflection_hints: ReflectionHints,
}

impl EmitOutput {
    pub fn text(source: String) -> Self {
        EmitOutput {
            blob: Blob::from(source),
            is_text: true,
            reflection_hints: ReflectionHints::default(),
        }
    }

    pub fn binary(bytes: Vec<u8>) -> Self {
        EmitOutput {
            blob: Blob::from(bytes),
            is_text: false,
            reflection_hints: ReflectionHints::default(),
        }
    }
}

/// Lowers a built, optimized module to one output language.
pub trait Emitter: Debug {
    /// Human-readable name used in logs.
    fn name(&self) -> &'static str;

    /// Languages this emitter produces.
    fn languages(&self) -> &'static [ShadingLanguage];

    /// Target-specific capability checks; push errors into `diags`.
    fn check(&self, _module: &Module, _ctx: &EmitContext, _diags: &mut Diagnostics) {}

    fn emit(&self, module: &Module, ctx: &EmitContext) -> Result<EmitOutput, Diagnostics>;
}

/// The emitter for `language`.
pub fn emitter_for(language: ShadingLanguage) -> Box<dyn Emitter> {
    match language {
        ShadingLanguage::Dxil => Box::new(dxil::DxilEmitter),
        ShadingLanguage::SpirV => Box::new(spirv::SpirvEmitter),
        ShadingLanguage::Hlsl => Box::new(hlsl::HlslEmitter),
        ShadingLanguage::Glsl | ShadingLanguage::Essl => Box::new(glsl::GlslEmitter),
        ShadingLanguage::MslMacOs | ShadingLanguage::MslIos => Box::new(msl::MslEmitter),
    }
}

pub(crate) fn stage_name(stage: ShaderStage) -> &'static str {
    match stage {
        ShaderStage::Vertex => "vertex",
        ShaderStage::Pixel => "pixel",
        ShaderStage::Geometry => "geometry",
        ShaderStage::Hull => "hull",
        ShaderStage::Domain => "domain",
        ShaderStage::Compute => "compute",
    }
}

/// Rejects what `emitter` cannot express for this module and target.
pub fn check_capabilities(
    emitter: &dyn Emitter,
    module: &Module,
    ctx: &EmitContext,
) -> Result<(), Diagnostics> {
    let mut diags = Diagnostics::new();
    let Some(entry) = module.entry() else {
        return Err(Diagnostics::single(
            ErrorKind::Internal,
            None,
            "module has no entry point",
        ));
    };
    if !emitter.languages().contains(&ctx.language()) {
        diags.error(
            ErrorKind::Internal,
            None,
            format!("{} emitter cannot produce {}", emitter.name(), ctx.language()),
        );
    }
    match entry.stage {
        ShaderStage::Geometry | ShaderStage::Hull | ShaderStage::Domain => {
            diags.error(
                ErrorKind::UnsupportedFeature,
                None,
                format!(
                    "{} shaders are not supported when targeting {}",
                    stage_name(entry.stage),
                    ctx.language()
                ),
            );
        }
        _ => emitter.check(module, ctx, &mut diags),
    }
    if diags.has_errors() {
        Err(diags)
    } else {
        Ok(())
    }
}

/// Checks capabilities and emits `module` for the target in `ctx`.
pub fn emit(module: &Module, ctx: &EmitContext) -> Result<EmitOutput, Diagnostics> {
    let emitter = emitter_for(ctx.language());
    check_capabilities(emitter.as_ref(), module, ctx)?;
    debug_log!(
        "emitting {} with {} (version {:?})",
        module.source_name,
        emitter.name(),
        ctx.version()
    );
    let output = emitter.emit(module, ctx)?;
    debug_log!(
        "{} produced {} bytes{}",
        emitter.name(),
        output.blob.len(),
        if output.is_text { " of text" } else { "" }
    );
    Ok(output)
}

pub(crate) fn capability(diags: &mut Diagnostics, message: impl Into<String>) {
    diags.error(ErrorKind::TargetCapability, None, message);
}

/// Parses `major.minor` or packed versions (`"2.1"`, `"21"`, `"20100"`).
pub(crate) fn parse_dotted(text: &str) -> Option<(u32, u32)> {
    if let Some((major, minor)) = text.split_once('.') {
        return Some((major.parse().ok()?, minor.parse().ok()?));
    }
    let value: u32 = text.parse().ok()?;
    Some(match value {
        0..=9 => (value, 0),
        10..=99 => (value / 10, value % 10),
        10000.. => (value / 10000, value / 100 % 100),
        _ => return None,
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::desc::{OptionsDesc, ShaderStage};
    use crate::front::lexer::tokenize;
    use crate::front::parser::parse;
    use crate::front::sema::{SemaOptions, analyze};
    use crate::ir::Module;
    use std::sync::Arc;

    pub const VERTEX: &str = r#"
cbuffer Transform : register(b0)
{
    float4x4 mvp;
    float4 tint;
};

struct VsOut
{
    float4 pos : SV_Position;
    float2 uv : TEXCOORD0;
    float4 color : COLOR0;
};

VsOut VS(float3 pos : POSITION, float2 uv : TEXCOORD0)
{
    VsOut output;
    output.pos = mul(float4(pos, 1.0), mvp);
    output.uv = uv;
    output.color = tint;
    return output;
}
"#;

    pub const PIXEL: &str = r#"
Texture2D albedo : register(t0);
SamplerState linearSampler : register(s0);

float4 PS(float2 uv : TEXCOORD0) : SV_Target
{
    float4 c = albedo.Sample(linearSampler, uv);
    if (c.a < 0.5)
        discard;
    return c;
}
"#;

    pub const COMPUTE: &str = r#"
RWStructuredBuffer<float> output : register(u0);
StructuredBuffer<float> input : register(t0);

[numthreads(64, 1, 1)]
void CS(uint3 id : SV_DispatchThreadID)
{
    float sum = 0;
    for (uint i = 0; i < 4; ++i)
        sum += input[id.x * 4 + i];
    output[id.x] = sum;
}
"#;

    pub fn module_with(source: &str, entry: &str, stage: ShaderStage, options: &OptionsDesc) -> Module {
        let tokens = tokenize(source, Arc::from("test.hlsl")).unwrap();
        let unit = parse(tokens).unwrap();
        let checked = analyze(&unit, &SemaOptions::new(entry, stage, options), "test.hlsl").unwrap();
        let mut module = crate::ir::builder::build(checked, options).unwrap();
        crate::opt::optimize(&mut module, options);
        module
    }

    pub fn module(source: &str, entry: &str, stage: ShaderStage) -> Module {
        module_with(source, entry, stage, &OptionsDesc::default())
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_dotted_versions() {
        assert_eq!(parse_dotted("2.1"), Some((2, 1)));
        assert_eq!(parse_dotted("21"), Some((2, 1)));
        assert_eq!(parse_dotted("20100"), Some((2, 1)));
        assert_eq!(parse_dotted("1"), Some((1, 0)));
        assert_eq!(parse_dotted("abc"), None);
    }

    #[test]
    fn test_geometry_stage_rejected_everywhere() {
        let mut module = module(PIXEL, "PS", ShaderStage::Pixel);
        if let Some(entry) = module.entry.as_mut() {
            entry.stage = ShaderStage::Geometry;
        }
        let options = OptionsDesc::default();
        for language in [ShadingLanguage::SpirV, ShadingLanguage::Glsl, ShadingLanguage::Hlsl] {
            let target = TargetDesc::new(language);
            let diags = emit(&module, &EmitContext::new(&options, &target)).unwrap_err();
            let first = diags.first_error().unwrap();
            assert_eq!(first.kind, ErrorKind::UnsupportedFeature);
            assert!(first.message.contains("geometry"));
        }
    }

    #[test]
    fn test_emitters_cover_every_language() {
        for language in [
            ShadingLanguage::Dxil,
            ShadingLanguage::SpirV,
            ShadingLanguage::Hlsl,
            ShadingLanguage::Glsl,
            ShadingLanguage::Essl,
            ShadingLanguage::MslMacOs,
            ShadingLanguage::MslIos,
        ] {
            assert!(emitter_for(language).languages().contains(&language));
        }
    }
}
