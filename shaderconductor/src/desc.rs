//! Descriptor schema for compile, disassemble and preprocess requests

use crate::Blob;
use crate::front::include::IncludeHandler;
use crate::reflect::Reflection;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Version of the descriptor schema exposed through the C ABI.
pub const ABI_VERSION: u32 = 1;

/// Pipeline stage targeted by an entry point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ShaderStage {
    Vertex = 0,
    Pixel = 1,
    Geometry = 2,
    Hull = 3,
    Domain = 4,
    Compute = 5,
}

impl ShaderStage {
    /// Short name as used on the command line (`vs`, `ps`, ...).
    pub fn short_name(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vs",
            ShaderStage::Pixel => "ps",
            ShaderStage::Geometry => "gs",
            ShaderStage::Hull => "hs",
            ShaderStage::Domain => "ds",
            ShaderStage::Compute => "cs",
        }
    }

    pub fn from_u32(value: u32) -> Option<Self> {
        Some(match value {
            0 => ShaderStage::Vertex,
            1 => ShaderStage::Pixel,
            2 => ShaderStage::Geometry,
            3 => ShaderStage::Hull,
            4 => ShaderStage::Domain,
            5 => ShaderStage::Compute,
            _ => return None,
        })
    }
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

impl FromStr for ShaderStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "vs" => Ok(ShaderStage::Vertex),
            "ps" => Ok(ShaderStage::Pixel),
            "gs" => Ok(ShaderStage::Geometry),
            "hs" => Ok(ShaderStage::Hull),
            "ds" => Ok(ShaderStage::Domain),
            "cs" => Ok(ShaderStage::Compute),
            other => Err(format!("Invalid shader stage: {}", other)),
        }
    }
}

/// Input or output representation handled by the compiler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ShadingLanguage {
    Dxil = 0,
    SpirV = 1,
    Hlsl = 2,
    Glsl = 3,
    Essl = 4,
    MslMacOs = 5,
    MslIos = 6,
}

impl ShadingLanguage {
    /// Whether the language is a binary format (DXIL, SPIR-V).
    pub fn is_binary(self) -> bool {
        matches!(self, ShadingLanguage::Dxil | ShadingLanguage::SpirV)
    }

    /// Conventional file extension for output in this language.
    pub fn extension(self) -> &'static str {
        match self {
            ShadingLanguage::Dxil => "dxil",
            ShadingLanguage::SpirV => "spv",
            ShadingLanguage::Hlsl => "hlsl",
            ShadingLanguage::Glsl => "glsl",
            ShadingLanguage::Essl => "essl",
            ShadingLanguage::MslMacOs | ShadingLanguage::MslIos => "msl",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ShadingLanguage::Dxil => "dxil",
            ShadingLanguage::SpirV => "spirv",
            ShadingLanguage::Hlsl => "hlsl",
            ShadingLanguage::Glsl => "glsl",
            ShadingLanguage::Essl => "essl",
            ShadingLanguage::MslMacOs => "msl_macos",
            ShadingLanguage::MslIos => "msl_ios",
        }
    }

    pub fn from_u32(value: u32) -> Option<Self> {
        Some(match value {
            0 => ShadingLanguage::Dxil,
            1 => ShadingLanguage::SpirV,
            2 => ShadingLanguage::Hlsl,
            3 => ShadingLanguage::Glsl,
            4 => ShadingLanguage::Essl,
            5 => ShadingLanguage::MslMacOs,
            6 => ShadingLanguage::MslIos,
            _ => return None,
        })
    }
}

impl fmt::Display for ShadingLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ShadingLanguage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dxil" => Ok(ShadingLanguage::Dxil),
            "spirv" => Ok(ShadingLanguage::SpirV),
            "hlsl" => Ok(ShadingLanguage::Hlsl),
            "glsl" => Ok(ShadingLanguage::Glsl),
            "essl" => Ok(ShadingLanguage::Essl),
            "msl_macos" => Ok(ShadingLanguage::MslMacOs),
            "msl_ios" => Ok(ShadingLanguage::MslIos),
            other => Err(format!("Invalid shading language: {}", other)),
        }
    }
}

/// Shader model (major.minor)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ShaderModel {
    pub major: u8,
    pub minor: u8,
}

impl ShaderModel {
    pub const SM_6_0: ShaderModel = ShaderModel::new(6, 0);
    pub const SM_6_2: ShaderModel = ShaderModel::new(6, 2);

    pub const fn new(major: u8, minor: u8) -> Self {
        ShaderModel { major, minor }
    }

    /// Packed form used in containers and the HLSL target version (`62`).
    pub fn as_u32(self) -> u32 {
        self.major as u32 * 10 + self.minor as u32
    }

    /// Native 16-bit scalar types are available from 6.2.
    pub fn supports_16bit_types(self) -> bool {
        self >= ShaderModel::SM_6_2
    }
}

impl Default for ShaderModel {
    fn default() -> Self {
        ShaderModel::SM_6_0
    }
}

impl fmt::Display for ShaderModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// A preprocessor macro supplied by the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacroDefine {
    pub name: String,
    pub value: String,
}

impl MacroDefine {
    pub fn new(name: &str, value: &str) -> Self {
        MacroDefine {
            name: name.to_string(),
            value: value.to_string(),
        }
    }

    /// Parses `NAME=VALUE` or `NAME`.
    pub fn parse(text: &str) -> Self {
        match text.split_once('=') {
            Some((name, value)) => MacroDefine::new(name.trim(), value.trim()),
            None => MacroDefine::new(text.trim(), ""),
        }
    }
}

/// Shader source plus everything needed to locate its entry point
#[derive(Clone)]
pub struct SourceDesc {
    pub source: String,
    pub file_name: Option<String>,
    pub entry_point: String,
    pub stage: ShaderStage,
    pub defines: Vec<MacroDefine>,
    pub include_handler: Option<Arc<dyn IncludeHandler>>,
}

impl SourceDesc {
    pub fn new(source: &str, entry_point: &str, stage: ShaderStage) -> Self {
        SourceDesc {
            source: source.to_string(),
            file_name: None,
            entry_point: entry_point.to_string(),
            stage,
            defines: Vec::new(),
            include_handler: None,
        }
    }

    /// Entry point name, defaulting to `main` when empty.
    pub fn entry_point(&self) -> &str {
        if self.entry_point.is_empty() {
            "main"
        } else {
            &self.entry_point
        }
    }

    /// File name used in diagnostics.
    pub fn file_name(&self) -> &str {
        match &self.file_name {
            Some(name) if !name.is_empty() => name,
            _ => "shader.hlsl",
        }
    }
}

impl fmt::Debug for SourceDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceDesc")
            .field("file_name", &self.file_name)
            .field("entry_point", &self.entry_point)
            .field("stage", &self.stage)
            .field("defines", &self.defines)
            .field("include_handler", &self.include_handler.is_some())
            .finish()
    }
}

/// Compilation options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionsDesc {
    pub pack_matrices_in_row_major: bool,
    pub enable_16bit_types: bool,
    pub enable_debug_info: bool,
    pub disable_optimizations: bool,
    pub optimization_level: u32,
    pub shader_model: ShaderModel,
    pub shift_all_textures_bindings: i32,
    pub shift_all_samplers_bindings: i32,
    pub shift_all_cbuffers_bindings: i32,
    pub shift_all_ua_buffers_bindings: i32,
    pub need_reflection: bool,
    pub inherit_combined_sampler_bindings: bool,
}

impl Default for OptionsDesc {
    fn default() -> Self {
        OptionsDesc {
            pack_matrices_in_row_major: true,
            enable_16bit_types: false,
            enable_debug_info: false,
            disable_optimizations: false,
            optimization_level: 3,
            shader_model: ShaderModel::SM_6_0,
            shift_all_textures_bindings: 0,
            shift_all_samplers_bindings: 0,
            shift_all_cbuffers_bindings: 0,
            shift_all_ua_buffers_bindings: 0,
            need_reflection: false,
            inherit_combined_sampler_bindings: false,
        }
    }
}

/// Output language and version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetDesc {
    pub language: ShadingLanguage,
    pub version: Option<String>,
    pub as_module: bool,
}

impl TargetDesc {
    pub fn new(language: ShadingLanguage) -> Self {
        TargetDesc {
            language,
            version: None,
            as_module: false,
        }
    }

    pub fn with_version(language: ShadingLanguage, version: &str) -> Self {
        TargetDesc {
            language,
            version: if version.is_empty() {
                None
            } else {
                Some(version.to_string())
            },
            as_module: false,
        }
    }
}

/// Outcome of a compile, preprocess or disassemble call.
///
/// Exactly one of `target` and `error_warning_msg` carries the payload when
/// `has_error` is set; on success `error_warning_msg` may still hold warnings.
#[derive(Debug, Clone, Default)]
pub struct ResultDesc {
    pub target: Blob,
    pub is_text: bool,
    pub error_warning_msg: Blob,
    pub has_error: bool,
    pub reflection: Option<Reflection>,
}

impl ResultDesc {
    pub(crate) fn success(target: Blob, is_text: bool, warnings: String) -> Self {
        ResultDesc {
            target,
            is_text,
            error_warning_msg: Blob::from(warnings),
            has_error: false,
            reflection: None,
        }
    }

    pub(crate) fn failure(message: String) -> Self {
        let message = if message.is_empty() {
            "Unknown error.".to_string()
        } else {
            message
        };
        ResultDesc {
            target: Blob::empty(),
            is_text: false,
            error_warning_msg: Blob::from(message),
            has_error: true,
            reflection: None,
        }
    }

    /// Warnings or errors as text.
    pub fn messages(&self) -> String {
        self.error_warning_msg.to_string_lossy()
    }
}

/// A binary to turn back into text
#[derive(Debug, Clone)]
pub struct DisassembleDesc {
    pub language: ShadingLanguage,
    pub binary: Blob,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_names_round_trip() {
        for stage in [
            ShaderStage::Vertex,
            ShaderStage::Pixel,
            ShaderStage::Geometry,
            ShaderStage::Hull,
            ShaderStage::Domain,
            ShaderStage::Compute,
        ] {
            assert_eq!(stage.short_name().parse::<ShaderStage>().unwrap(), stage);
        }
        assert!("xs".parse::<ShaderStage>().is_err());
    }

    #[test]
    fn test_language_extensions() {
        assert_eq!(ShadingLanguage::SpirV.extension(), "spv");
        assert_eq!(ShadingLanguage::MslIos.extension(), "msl");
        assert_eq!(
            "msl_macos".parse::<ShadingLanguage>().unwrap(),
            ShadingLanguage::MslMacOs
        );
        assert!(ShadingLanguage::Dxil.is_binary());
        assert!(!ShadingLanguage::Glsl.is_binary());
    }

    #[test]
    fn test_default_options() {
        let options = OptionsDesc::default();
        assert!(options.pack_matrices_in_row_major);
        assert_eq!(options.optimization_level, 3);
        assert_eq!(options.shader_model, ShaderModel::new(6, 0));
        assert!(!options.shader_model.supports_16bit_types());
        assert!(ShaderModel::new(6, 2).supports_16bit_types());
    }

    #[test]
    fn test_entry_point_defaults_to_main() {
        let desc = SourceDesc::new("", "", ShaderStage::Pixel);
        assert_eq!(desc.entry_point(), "main");
        assert_eq!(desc.file_name(), "shader.hlsl");
    }

    #[test]
    fn test_macro_define_parse() {
        assert_eq!(MacroDefine::parse("A=1"), MacroDefine::new("A", "1"));
        assert_eq!(MacroDefine::parse("FLAG"), MacroDefine::new("FLAG", ""));
    }
}
