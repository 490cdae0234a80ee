//! Shader compilation API

use crate::include::{IncludeBridge, include_callback};
use crate::reflect::ShaderReflection;
use crate::{
    BindingShifts, Blob, CompileFlags, Error, IncludeHandler, Result, ShaderModel, ShaderStage,
    ShadingLanguage, Status,
};
use shaderconductor::ffi::{
    ScCompile, ScCompileMulti, ScDestroyResult, ScIncludeCallback, ScMacroDefine, ScOptionsDesc,
    ScResultDesc, ScShaderModel, ScSourceDesc, ScTargetDesc,
};
use std::ffi::{CString, c_void};
use std::ptr;

/// A preprocessor macro definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Define {
    pub(crate) name: String,
    pub(crate) value: String,
}

impl Define {
    /// Creates a new preprocessor define
    ///
    /// # Example
    /// ```
    /// use scrs::Define;
    /// let define = Define::new("DEBUG", "1");
    /// ```
    pub fn new(name: &str, value: &str) -> Self {
        Define {
            name: name.to_string(),
            value: value.to_string(),
        }
    }

    /// Creates a define with an empty value
    pub fn flag(name: &str) -> Self {
        Self::new(name, "")
    }

    /// Parses `NAME=VALUE`; a bare `NAME` gets the value `1`.
    pub fn parse(text: &str) -> Self {
        match text.split_once('=') {
            Some((name, value)) => Self::new(name, value),
            None => Self::new(text, "1"),
        }
    }
}

/// Output language plus version for one compile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Output language
    pub language: ShadingLanguage,
    /// Language version such as `"450"` or `"20100"`; `None` uses the default
    pub version: Option<String>,
    /// Compile as a library module without an entry point
    pub as_module: bool,
}

impl Target {
    /// Targets `language` at its default version.
    pub fn new(language: ShadingLanguage) -> Self {
        Target {
            language,
            version: None,
            as_module: false,
        }
    }

    /// Sets the language version.
    pub fn version(mut self, version: &str) -> Self {
        self.version = Some(version.to_string());
        self
    }
}

impl From<ShadingLanguage> for Target {
    fn from(language: ShadingLanguage) -> Self {
        Target::new(language)
    }
}

/// Result of a successful shader compilation
#[derive(Debug)]
pub struct CompileResult {
    /// Language the target was produced in
    pub language: ShadingLanguage,
    /// The compiled binary or source text
    pub target: Blob,
    /// Whether `target` holds source text
    pub is_text: bool,
    /// Any warning messages from the compiler (if present)
    pub warnings: Option<String>,
    /// Reflection data when `CompileFlags::NEED_REFLECTION` was set
    pub reflection: Option<ShaderReflection>,
}

/// Owns an `ScResultDesc` and releases whatever is still in it.
pub(crate) struct RawResult(pub(crate) ScResultDesc);

impl RawResult {
    pub(crate) fn new() -> Self {
        RawResult(ScResultDesc::default())
    }

    pub(crate) fn take_target(&mut self) -> Option<Blob> {
        unsafe { Blob::from_raw(std::mem::replace(&mut self.0.target, ptr::null_mut())) }
    }

    /// Takes the diagnostics text, `None` when the compiler reported nothing.
    pub(crate) fn take_messages(&mut self) -> Option<String> {
        let blob = unsafe {
            Blob::from_raw(std::mem::replace(
                &mut self.0.error_warning_msg,
                ptr::null_mut(),
            ))
        }?;
        Some(blob.to_string_lossy()).filter(|s| !s.is_empty())
    }

    pub(crate) fn take_reflection(&mut self) -> Option<ShaderReflection> {
        let raw = std::mem::replace(&mut self.0.reflection, ptr::null_mut());
        unsafe { ShaderReflection::from_raw(raw) }
    }

    /// Splits a finished call into its output and warnings, or the error
    /// built by `fail` from the status and diagnostics.
    pub(crate) fn finish(
        &mut self,
        status: Status,
        fail: impl FnOnce(Status, String) -> Error,
    ) -> Result<(Blob, Option<String>)> {
        let messages = self.take_messages();
        if self.0.has_error || status.is_error() {
            let status = if status.is_error() {
                status
            } else {
                Status::E_FAIL
            };
            let message =
                messages.unwrap_or_else(|| format!("Unknown error (status: {})", status));
            return Err(fail(status, message));
        }
        let target = match self.take_target() {
            Some(blob) => blob,
            None => Blob::empty()?,
        };
        Ok((target, messages))
    }
}

impl Drop for RawResult {
    fn drop(&mut self) {
        unsafe { ScDestroyResult(&mut self.0) };
    }
}

fn c_string(text: &str, what: &str) -> Result<CString> {
    CString::new(text).map_err(|_| Error::InvalidParameter(format!("{} contains a null byte", what)))
}

/// Nul-terminated copies of a source descriptor's strings. The pointers in
/// `defines` refer into `_define_strings`.
pub(crate) struct RawSource {
    source: CString,
    file_name: Option<CString>,
    entry_point: CString,
    stage: ShaderStage,
    _define_strings: Vec<(CString, CString)>,
    defines: Vec<ScMacroDefine>,
}

impl RawSource {
    pub(crate) fn new(
        source: &str,
        file_name: Option<&str>,
        entry_point: &str,
        stage: ShaderStage,
        defines: &[Define],
    ) -> Result<Self> {
        let define_strings = defines
            .iter()
            .map(|d| Ok((c_string(&d.name, "Define name")?, c_string(&d.value, "Define value")?)))
            .collect::<Result<Vec<_>>>()?;
        let raw_defines = define_strings
            .iter()
            .map(|(name, value)| ScMacroDefine {
                name: name.as_ptr(),
                value: value.as_ptr(),
            })
            .collect();
        Ok(RawSource {
            source: c_string(source, "Source")?,
            file_name: file_name.map(|n| c_string(n, "File name")).transpose()?,
            entry_point: c_string(entry_point, "Entry point")?,
            stage,
            _define_strings: define_strings,
            defines: raw_defines,
        })
    }

    /// Descriptor valid while `self` and `bridge` are alive.
    pub(crate) fn desc(&self, bridge: Option<&mut IncludeBridge<'_>>) -> ScSourceDesc {
        let (callback, user_data): (ScIncludeCallback, *mut c_void) = match bridge {
            Some(bridge) => (Some(include_callback), bridge.user_data()),
            None => (None, ptr::null_mut()),
        };
        ScSourceDesc {
            source: self.source.as_ptr(),
            file_name: self.file_name.as_ref().map_or(ptr::null(), |n| n.as_ptr()),
            entry_point: self.entry_point.as_ptr(),
            stage: self.stage as u32,
            defines: if self.defines.is_empty() {
                ptr::null()
            } else {
                self.defines.as_ptr()
            },
            num_defines: self.defines.len() as u32,
            include_callback: callback,
            include_user_data: user_data,
        }
    }
}

/// Builder for shader compilation with fluent API
///
/// # Example
/// ```no_run
/// use scrs::{CompileBuilder, CompileFlags, ShaderStage, ShadingLanguage, Target};
///
/// let source = "float4 main() : SV_TARGET { return float4(1,0,0,1); }";
///
/// let result = CompileBuilder::new(source, ShaderStage::Pixel)
///     .file_name("my_shader.hlsl")
///     .define("DEBUG", "1")
///     .flags(CompileFlags::default() | CompileFlags::DEBUG_INFO)
///     .target(Target::new(ShadingLanguage::Glsl).version("450"))
///     .compile()
///     .unwrap();
/// println!("{}", result.target.to_string_lossy());
/// ```
pub struct CompileBuilder<'a> {
    source: &'a str,
    file_name: Option<String>,
    entry_point: String,
    stage: ShaderStage,
    defines: Vec<Define>,
    include: Option<&'a mut dyn IncludeHandler>,
    flags: CompileFlags,
    optimization_level: u32,
    shader_model: ShaderModel,
    shifts: BindingShifts,
    targets: Vec<Target>,
}

impl<'a> CompileBuilder<'a> {
    /// Creates a builder for `source` with entry point `main`, targeting DXIL
    /// unless targets are added.
    pub fn new(source: &'a str, stage: ShaderStage) -> Self {
        CompileBuilder {
            source,
            file_name: None,
            entry_point: "main".to_string(),
            stage,
            defines: Vec::new(),
            include: None,
            flags: CompileFlags::default(),
            optimization_level: 3,
            shader_model: ShaderModel::new(6, 0),
            shifts: BindingShifts::default(),
            targets: Vec::new(),
        }
    }

    /// Sets the entry point function name.
    pub fn entry_point(mut self, name: &str) -> Self {
        self.entry_point = name.to_string();
        self
    }

    /// Sets the shader stage.
    pub fn stage(mut self, stage: ShaderStage) -> Self {
        self.stage = stage;
        self
    }

    /// Sets the source file name (used in error messages and as the
    /// includer of top-level includes).
    pub fn file_name(mut self, name: &str) -> Self {
        self.file_name = Some(name.to_string());
        self
    }

    /// Adds a preprocessor define.
    pub fn define(mut self, name: &str, value: &str) -> Self {
        self.defines.push(Define::new(name, value));
        self
    }

    /// Adds multiple preprocessor defines from an iterator.
    pub fn defines<I>(mut self, defines: I) -> Self
    where
        I: IntoIterator<Item = Define>,
    {
        self.defines.extend(defines);
        self
    }

    /// Sets compilation flags (replaces any existing flags).
    pub fn flags(mut self, flags: CompileFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Adds compilation flags (bitwise OR with existing).
    pub fn with_flags(mut self, flags: CompileFlags) -> Self {
        self.flags |= flags;
        self
    }

    /// Sets the optimization level (0-3). Values above 3 are clamped.
    pub fn optimization_level(mut self, level: u32) -> Self {
        self.optimization_level = level.min(3);
        self
    }

    /// Sets the shader model. 16-bit types need 6.2 or later.
    pub fn shader_model(mut self, model: ShaderModel) -> Self {
        self.shader_model = model;
        self
    }

    /// Sets per-class register shifts.
    pub fn binding_shifts(mut self, shifts: BindingShifts) -> Self {
        self.shifts = shifts;
        self
    }

    /// Resolves `#include` through `handler` instead of the file system.
    pub fn include_handler(mut self, handler: &'a mut dyn IncludeHandler) -> Self {
        self.include = Some(handler);
        self
    }

    /// Adds an output target.
    pub fn target(mut self, target: impl Into<Target>) -> Self {
        self.targets.push(target.into());
        self
    }

    fn options(&self) -> ScOptionsDesc {
        let flags = self.flags;
        ScOptionsDesc {
            pack_matrices_in_row_major: flags.contains(CompileFlags::PACK_MATRIX_ROW_MAJOR),
            enable_16bit_types: flags.contains(CompileFlags::ENABLE_16BIT_TYPES),
            enable_debug_info: flags.contains(CompileFlags::DEBUG_INFO),
            disable_optimizations: flags.contains(CompileFlags::SKIP_OPTIMIZATION),
            optimization_level: self.optimization_level,
            shader_model: ScShaderModel {
                major: self.shader_model.major,
                minor: self.shader_model.minor,
            },
            shift_all_textures_bindings: self.shifts.textures,
            shift_all_samplers_bindings: self.shifts.samplers,
            shift_all_cbuffers_bindings: self.shifts.cbuffers,
            shift_all_ua_buffers_bindings: self.shifts.ua_buffers,
            need_reflection: flags.contains(CompileFlags::NEED_REFLECTION),
            inherit_combined_sampler_bindings: flags
                .contains(CompileFlags::INHERIT_COMBINED_SAMPLER_BINDINGS),
        }
    }

    fn raw_source(&self) -> Result<RawSource> {
        RawSource::new(
            self.source,
            self.file_name.as_deref(),
            &self.entry_point,
            self.stage,
            &self.defines,
        )
    }

    /// Compiles for the first target added, DXIL when none was.
    pub fn compile(mut self) -> Result<CompileResult> {
        let target = self
            .targets
            .first()
            .cloned()
            .unwrap_or_else(|| Target::new(ShadingLanguage::Dxil));
        let source = self.raw_source()?;
        let options = self.options();
        let version = target
            .version
            .as_deref()
            .map(|v| c_string(v, "Target version"))
            .transpose()?;
        let raw_target = ScTargetDesc {
            language: target.language as u32,
            version: version.as_ref().map_or(ptr::null(), |v| v.as_ptr()),
            as_module: target.as_module,
        };

        let mut bridge = self.include.take().map(|handler| IncludeBridge { handler });
        let desc = source.desc(bridge.as_mut());
        let mut out = RawResult::new();
        let status = Status(unsafe { ScCompile(&desc, &options, &raw_target, &mut out.0) });
        collect(&mut out, status, target.language)
    }

    /// Compiles once for every target added. The front end runs a single
    /// time; each target reports its own outcome.
    pub fn compile_all(mut self) -> Vec<Result<CompileResult>> {
        if self.targets.is_empty() {
            return Vec::new();
        }
        let prepared = self.raw_source().and_then(|source| {
            let versions = self
                .targets
                .iter()
                .map(|t| t.version.as_deref().map(|v| c_string(v, "Target version")).transpose())
                .collect::<Result<Vec<_>>>()?;
            Ok((source, versions))
        });
        let (source, versions) = match prepared {
            Ok(prepared) => prepared,
            Err(err) => {
                let message = err.to_string();
                return self
                    .targets
                    .iter()
                    .map(|_| Err(Error::InvalidParameter(message.clone())))
                    .collect();
            }
        };
        let raw_targets: Vec<ScTargetDesc> = self
            .targets
            .iter()
            .zip(&versions)
            .map(|(target, version)| ScTargetDesc {
                language: target.language as u32,
                version: version.as_ref().map_or(ptr::null(), |v| v.as_ptr()),
                as_module: target.as_module,
            })
            .collect();
        let options = self.options();

        let mut bridge = self.include.take().map(|handler| IncludeBridge { handler });
        let desc = source.desc(bridge.as_mut());
        let mut raw_results: Vec<ScResultDesc> =
            self.targets.iter().map(|_| ScResultDesc::default()).collect();
        let status = Status(unsafe {
            ScCompileMulti(
                &desc,
                &options,
                raw_targets.as_ptr(),
                raw_targets.len() as u32,
                raw_results.as_mut_ptr(),
            )
        });
        let mut outs: Vec<RawResult> = raw_results.into_iter().map(RawResult).collect();

        // Only argument and pointer errors apply to every target alike
        let shared = if status == Status::E_INVALIDARG || status == Status::E_POINTER {
            status
        } else {
            Status::S_OK
        };
        outs.iter_mut()
            .zip(&self.targets)
            .map(|(out, target)| collect(out, shared, target.language))
            .collect()
    }

    /// Compiles to DXIL with reflection and returns only the reflection.
    pub fn reflect(self) -> Result<ShaderReflection> {
        let mut builder = self.with_flags(CompileFlags::NEED_REFLECTION);
        builder.targets = vec![Target::new(ShadingLanguage::Dxil)];
        builder
            .compile()?
            .reflection
            .ok_or_else(|| Error::Reflection("compiler returned no reflection data".to_string()))
    }
}

fn collect(out: &mut RawResult, status: Status, language: ShadingLanguage) -> Result<CompileResult> {
    let is_text = out.0.is_text;
    let reflection = out.take_reflection();
    let (target, warnings) =
        out.finish(status, |status, message| Error::Compilation { status, message })?;
    Ok(CompileResult {
        language,
        target,
        is_text,
        warnings,
        reflection,
    })
}

/// Convenience function for simple compilation.
///
/// # Example
/// ```no_run
/// use scrs::{compile, ShaderStage, ShadingLanguage};
///
/// let spirv = compile(
///     "float4 main() : SV_TARGET { return float4(1,0,0,1); }",
///     "main",
///     ShaderStage::Pixel,
///     ShadingLanguage::SpirV,
/// ).unwrap();
/// ```
pub fn compile(
    source: &str,
    entry_point: &str,
    stage: ShaderStage,
    language: ShadingLanguage,
) -> Result<Blob> {
    CompileBuilder::new(source, stage)
        .entry_point(entry_point)
        .target(language)
        .compile()
        .map(|r| r.target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryInclude;

    const PIXEL: &str = r#"
Texture2D tex : register(t0);
SamplerState samp : register(s0);

float4 main(float4 pos : SV_POSITION, float2 uv : TEXCOORD0) : SV_TARGET {
    return tex.Sample(samp, uv);
}
"#;

    #[test]
    fn test_compile_simple_pixel_shader() {
        let result = compile(PIXEL, "main", ShaderStage::Pixel, ShadingLanguage::Dxil);
        let bytecode = result.unwrap();
        assert_eq!(&bytecode[0..4], b"DXBC");
    }

    #[test]
    fn test_compile_text_target() {
        let result = CompileBuilder::new(PIXEL, ShaderStage::Pixel)
            .target(Target::new(ShadingLanguage::Glsl).version("450"))
            .compile()
            .unwrap();
        assert!(result.is_text);
        assert_eq!(result.language, ShadingLanguage::Glsl);
        assert!(result.target.as_str().unwrap().starts_with("#version 450"));
        assert!(result.reflection.is_none());
    }

    #[test]
    fn test_compile_with_defines() {
        let source = r#"
            #ifdef USE_RED
            float4 main() : SV_TARGET { return float4(1,0,0,1); }
            #else
            float4 main() : SV_TARGET { return float4(0,1,0,1); }
            #endif
        "#;

        let result = CompileBuilder::new(source, ShaderStage::Pixel)
            .define("USE_RED", "1")
            .target(ShadingLanguage::Hlsl)
            .compile();
        assert!(result.is_ok());
    }

    #[test]
    fn test_compile_error() {
        let source = "float4 main() : SV_TARGET { return undefined_variable; }";
        let err = compile(source, "main", ShaderStage::Pixel, ShadingLanguage::SpirV).unwrap_err();
        match err {
            Error::Compilation { status, message } => {
                assert_eq!(status, Status::E_FAIL);
                assert!(message.contains("undefined_variable"), "{}", message);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_nul_in_entry_point_is_rejected() {
        let err = CompileBuilder::new(PIXEL, ShaderStage::Pixel)
            .entry_point("ma\0in")
            .compile()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidParameter(message) if message.contains("Entry point")));
    }

    #[test]
    fn test_include_handler_is_used() {
        let source = "#include \"color.hlsli\"\nfloat4 main() : SV_TARGET { return COLOR; }\n";
        let mut files = MemoryInclude::new().with_file("color.hlsli", "#define COLOR float4(1, 0, 0, 1)\n");
        let result = CompileBuilder::new(source, ShaderStage::Pixel)
            .include_handler(&mut files)
            .target(ShadingLanguage::Glsl)
            .compile();
        assert!(result.is_ok(), "{:?}", result.err());
    }

    #[test]
    fn test_compile_all_without_targets() {
        assert!(CompileBuilder::new(PIXEL, ShaderStage::Pixel).compile_all().is_empty());
    }

    #[test]
    fn test_define_parse() {
        assert_eq!(Define::parse("A=2"), Define::new("A", "2"));
        assert_eq!(Define::parse("FLAG"), Define::new("FLAG", "1"));
        assert_eq!(Define::parse("E="), Define::flag("E"));
    }
}
