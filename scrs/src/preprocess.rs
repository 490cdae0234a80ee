//! HLSL preprocessing API

use crate::compile::{Define, RawResult, RawSource};
use crate::include::IncludeBridge;
use crate::{Blob, Error, IncludeHandler, Result, ShaderStage, Status};
use shaderconductor::ffi::ScPreprocess;

/// Result of successful preprocessing
#[derive(Debug)]
pub struct PreprocessResult {
    /// The preprocessed source code
    pub source: Blob,
    /// Any warning messages
    pub warnings: Option<String>,
}

/// Builder for HLSL preprocessing
///
/// # Example
/// ```no_run
/// use scrs::PreprocessBuilder;
///
/// let source = r#"
///     #define PI 3.14159
///     float4 main() : SV_TARGET { return float4(PI, 0, 0, 1); }
/// "#;
///
/// let result = PreprocessBuilder::new(source)
///     .file_name("my_shader.hlsl")
///     .define("EXTRA", "1")
///     .preprocess()
///     .unwrap();
///
/// println!("Preprocessed: {}", result.source.to_string_lossy());
/// ```
pub struct PreprocessBuilder<'a> {
    source: &'a str,
    file_name: Option<String>,
    defines: Vec<Define>,
    include: Option<&'a mut dyn IncludeHandler>,
}

impl<'a> PreprocessBuilder<'a> {
    /// Creates a new preprocess builder.
    pub fn new(source: &'a str) -> Self {
        PreprocessBuilder {
            source,
            file_name: None,
            defines: Vec::new(),
            include: None,
        }
    }

    /// Sets the source file name (used in error messages).
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

    /// Resolves `#include` through `handler` instead of the file system.
    pub fn include_handler(mut self, handler: &'a mut dyn IncludeHandler) -> Self {
        self.include = Some(handler);
        self
    }

    /// Preprocesses the source.
    pub fn preprocess(mut self) -> Result<PreprocessResult> {
        // The stage only matters to the compile functions
        let source = RawSource::new(
            self.source,
            self.file_name.as_deref(),
            "main",
            ShaderStage::Pixel,
            &self.defines,
        )?;
        let mut bridge = self.include.take().map(|handler| IncludeBridge { handler });
        let desc = source.desc(bridge.as_mut());
        let mut out = RawResult::new();
        let status = Status(unsafe { ScPreprocess(&desc, &mut out.0) });
        let (source, warnings) =
            out.finish(status, |status, message| Error::Preprocessing { status, message })?;
        Ok(PreprocessResult { source, warnings })
    }
}

/// Convenience function for simple preprocessing.
///
/// # Example
/// ```no_run
/// use scrs::preprocess;
///
/// let source = "#define X 1\nfloat4 main() : SV_TARGET { return X; }";
/// let preprocessed = preprocess(source).unwrap();
/// ```
pub fn preprocess(source: &str) -> Result<Blob> {
    PreprocessBuilder::new(source)
        .preprocess()
        .map(|r| r.source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryInclude;

    #[test]
    fn test_expands_macros_and_keeps_line_markers() {
        let source = "#define TAU 6.2831\nfloat turn(float t) { return t * TAU; }\n";
        let text = preprocess(source).unwrap().to_string_lossy();
        assert!(text.contains("t * 6.2831"), "{}", text);
        assert!(!text.contains("#define"), "{}", text);
        assert!(text.contains("#line 2 \"shader.hlsl\""), "{}", text);
    }

    #[test]
    fn test_preprocess_with_define_and_include() {
        let source = "#include \"consts.hlsli\"\nfloat scale() { return SCALE * BIAS; }\n";
        let mut files = MemoryInclude::new().with_file("consts.hlsli", "#define BIAS 0.25\n");
        let result = PreprocessBuilder::new(source)
            .define("SCALE", "4.0")
            .include_handler(&mut files)
            .preprocess()
            .unwrap();
        let text = result.source.to_string_lossy();
        assert!(text.contains("4.0"), "{}", text);
        assert!(text.contains("0.25"), "{}", text);
    }

    #[test]
    fn test_preprocess_missing_include() {
        let source = "#include \"nowhere.hlsli\"\n";
        let mut files = MemoryInclude::new();
        let err = PreprocessBuilder::new(source)
            .include_handler(&mut files)
            .preprocess()
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Preprocessing { message, .. } if message.contains("nowhere.hlsli")
        ));
    }
}
