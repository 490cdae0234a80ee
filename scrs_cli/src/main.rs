//! ShaderConductor CLI tool using the safe Rust API

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use log::{LevelFilter, debug, info};
use scrs::{
    BindingShifts, Blob, BlobPart, CompileBuilder, CompileFlags, Define, DisassembleBuilder,
    DisassembleFlags, FileSystemInclude, PreprocessBuilder, ShaderModel, ShaderReflection,
    ShaderStage, ShadingLanguage, StripFlags, Target, get_blob_part, get_debug_info,
    get_input_signature, get_output_signature, strip_shader,
};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "scrs")]
#[command(about = "ShaderConductor command-line tool", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile HLSL to DXIL, SPIR-V, HLSL, GLSL, ESSL or MSL
    Compile(CompileArgs),

    /// Disassemble DXIL or SPIR-V
    #[command(alias = "disassemble")]
    Disasm {
        /// Input binary file
        input: PathBuf,

        /// Binary language (detected from the file header when omitted)
        #[arg(short = 'T', long)]
        language: Option<ShadingLanguage>,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Prefix each instruction with its index
        #[arg(long)]
        number: bool,

        /// Drop comment lines from the listing
        #[arg(long)]
        instructions_only: bool,
    },

    /// Preprocess HLSL source
    #[command(alias = "pp")]
    Preprocess {
        /// Input HLSL file
        input: PathBuf,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Preprocessor defines (NAME=VALUE or NAME)
        #[arg(short = 'D', long = "define", value_name = "NAME=VALUE")]
        defines: Vec<String>,

        /// Additional include directories
        #[arg(long = "include-dir", value_name = "DIR")]
        include_dirs: Vec<PathBuf>,
    },

    /// Show shader reflection info
    Reflect {
        /// Input HLSL file
        input: PathBuf,

        /// Shader stage
        #[arg(short = 'S', long)]
        stage: ShaderStage,

        /// Entry point function name
        #[arg(short = 'E', long, default_value = "main")]
        entry: String,

        /// Preprocessor defines (NAME=VALUE or NAME)
        #[arg(short = 'D', long = "define", value_name = "NAME=VALUE")]
        defines: Vec<String>,
    },

    /// Strip debug info and/or signatures from a DXIL container
    Strip {
        /// Input DXIL file
        input: PathBuf,

        /// Output file (default: <input>.stripped.dxil)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Keep debug information (stripped by default)
        #[arg(long)]
        keep_debug: bool,

        /// Also strip the input and output signatures
        #[arg(long)]
        signatures: bool,
    },

    /// Extract a part from a DXIL container
    Extract {
        /// Input DXIL file
        input: PathBuf,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Part to extract
        #[arg(short, long, value_enum)]
        part: ExtractPart,
    },
}

#[derive(clap::Args)]
struct CompileArgs {
    /// Input HLSL file
    #[arg(short = 'I', long)]
    input: PathBuf,

    /// Entry point function name
    #[arg(short = 'E', long, default_value = "main")]
    entry: String,

    /// Output file (default: <input>.<target extension>)
    #[arg(short = 'O', long)]
    output: Option<PathBuf>,

    /// Shader stage: vs, ps, gs, hs, ds or cs
    #[arg(short = 'S', long)]
    stage: ShaderStage,

    /// Target language: dxil, spirv, hlsl, glsl, essl, msl_macos or msl_ios
    #[arg(short = 'T', long, default_value = "dxil")]
    target: ShadingLanguage,

    /// Target language version (e.g. 450 for GLSL, 20000 for MSL)
    #[arg(short = 'V', long)]
    version: Option<String>,

    /// Preprocessor defines (NAME=VALUE or NAME)
    #[arg(short = 'D', long = "define", value_name = "NAME=VALUE")]
    defines: Vec<String>,

    /// Additional include directories
    #[arg(long = "include-dir", value_name = "DIR")]
    include_dirs: Vec<PathBuf>,

    /// Pack matrices in row-major order
    #[arg(long)]
    row_major: bool,

    /// Enable native 16-bit types (shader model 6.2+)
    #[arg(long)]
    half_types: bool,

    /// Embed debug information
    #[arg(long)]
    debug_info: bool,

    /// Skip optimizations
    #[arg(long)]
    disable_optimizations: bool,

    /// Optimization level 0-3
    #[arg(long, default_value = "3", value_parser = clap::value_parser!(u32).range(0..=3))]
    optimization: u32,

    /// Shader model major version
    #[arg(long, default_value = "6")]
    sm_major: u8,

    /// Shader model minor version
    #[arg(long, default_value = "0")]
    sm_minor: u8,

    /// Register shift for textures
    #[arg(long, default_value = "0", allow_negative_numbers = true)]
    shift_textures: i32,

    /// Register shift for samplers
    #[arg(long, default_value = "0", allow_negative_numbers = true)]
    shift_samplers: i32,

    /// Register shift for constant buffers
    #[arg(long, default_value = "0", allow_negative_numbers = true)]
    shift_cbuffers: i32,

    /// Register shift for unordered access buffers
    #[arg(long, default_value = "0", allow_negative_numbers = true)]
    shift_ua_buffers: i32,

    /// Print reflection after compiling
    #[arg(long)]
    reflect: bool,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum ExtractPart {
    /// Input signature
    #[value(name = "input-sig")]
    InputSignature,
    /// Output signature
    #[value(name = "output-sig")]
    OutputSignature,
    /// Debug info
    #[value(name = "debug")]
    DebugInfo,
    /// DXIL program
    #[value(name = "program")]
    Program,
    /// All blob parts info (list only)
    #[value(name = "list")]
    List,
}

fn read_source(input: &Path) -> Result<String, String> {
    std::fs::read_to_string(input).map_err(|e| format!("Failed to read {}: {}", input.display(), e))
}

fn read_binary(input: &Path) -> Result<Vec<u8>, String> {
    std::fs::read(input).map_err(|e| format!("Failed to read {}: {}", input.display(), e))
}

fn write_file(output: &Path, bytes: &[u8]) -> Result<(), String> {
    std::fs::write(output, bytes).map_err(|e| format!("Failed to write {}: {}", output.display(), e))
}

fn include_handler(dirs: Vec<PathBuf>) -> Option<FileSystemInclude> {
    if dirs.is_empty() {
        return None;
    }
    let mut handler = FileSystemInclude::new();
    for dir in dirs {
        handler.add_path(dir);
    }
    Some(handler)
}

fn mask_to_string(mask: u8) -> String {
    let s: String = "xyzw"
        .chars()
        .enumerate()
        .filter(|(i, _)| mask & (1 << i) != 0)
        .map(|(_, c)| c)
        .collect();
    if s.is_empty() { "none".to_string() } else { s }
}

fn compile_shader(args: CompileArgs) -> Result<(), String> {
    let source = read_source(&args.input)?;
    let output = args.output.unwrap_or_else(|| {
        PathBuf::from(format!(
            "{}.{}",
            args.input.display(),
            args.target.extension()
        ))
    });

    let mut flags = CompileFlags::empty();
    flags.set(CompileFlags::PACK_MATRIX_ROW_MAJOR, args.row_major);
    flags.set(CompileFlags::ENABLE_16BIT_TYPES, args.half_types);
    flags.set(CompileFlags::DEBUG_INFO, args.debug_info);
    flags.set(CompileFlags::SKIP_OPTIMIZATION, args.disable_optimizations);
    flags.set(CompileFlags::NEED_REFLECTION, args.reflect);

    let mut target = Target::new(args.target);
    if let Some(version) = &args.version {
        target = target.version(version);
    }

    let file_name = args.input.to_string_lossy();
    let mut includes = include_handler(args.include_dirs);
    let mut builder = CompileBuilder::new(&source, args.stage)
        .entry_point(&args.entry)
        .file_name(&file_name)
        .defines(args.defines.iter().map(|d| Define::parse(d)))
        .flags(flags)
        .optimization_level(args.optimization)
        .shader_model(ShaderModel::new(args.sm_major, args.sm_minor))
        .binding_shifts(BindingShifts {
            textures: args.shift_textures,
            samplers: args.shift_samplers,
            cbuffers: args.shift_cbuffers,
            ua_buffers: args.shift_ua_buffers,
        })
        .target(target);
    if let Some(handler) = includes.as_mut() {
        builder = builder.include_handler(handler);
    }

    info!(
        "Compiling {} ({}, entry {}) to {}",
        args.input.display(),
        args.stage,
        args.entry,
        args.target
    );
    let result = builder.compile().map_err(|e| e.to_string())?;

    if let Some(warnings) = &result.warnings {
        eprintln!("{}", warnings);
    }

    write_file(&output, result.target.as_bytes())?;
    debug!("Wrote {} bytes", result.target.len());
    println!("The compiled file is saved to {}", output.display());

    if let Some(reflection) = &result.reflection {
        println!();
        print_reflection(reflection);
    }

    Ok(())
}

fn detect_language(bytes: &[u8]) -> Result<ShadingLanguage, String> {
    match bytes.get(..4) {
        Some(b"DXBC") => Ok(ShadingLanguage::Dxil),
        Some(magic) if magic == 0x0723_0203u32.to_le_bytes() => Ok(ShadingLanguage::SpirV),
        _ => Err("Unrecognized binary format, pass --language".to_string()),
    }
}

fn disassemble_shader(
    input: PathBuf,
    language: Option<ShadingLanguage>,
    output: Option<PathBuf>,
    number: bool,
    instructions_only: bool,
) -> Result<(), String> {
    let bytes = read_binary(&input)?;
    let language = match language {
        Some(language) => language,
        None => detect_language(&bytes)?,
    };
    debug!("Disassembling {} as {}", input.display(), language);

    let mut flags = DisassembleFlags::empty();
    flags.set(DisassembleFlags::ENABLE_INSTRUCTION_NUMBERING, number);
    flags.set(DisassembleFlags::INSTRUCTION_ONLY, instructions_only);

    let listing = DisassembleBuilder::new(language, &bytes)
        .flags(flags)
        .disassemble()
        .map_err(|e| e.to_string())?;

    if let Some(output) = output {
        write_file(&output, listing.as_bytes())?;
        eprintln!("Disassembled {} -> {}", input.display(), output.display());
    } else {
        print!("{}", listing);
    }

    Ok(())
}

fn preprocess_shader(
    input: PathBuf,
    output: Option<PathBuf>,
    defines: Vec<String>,
    include_dirs: Vec<PathBuf>,
) -> Result<(), String> {
    let source = read_source(&input)?;
    let file_name = input.to_string_lossy();
    let mut includes = include_handler(include_dirs);

    let mut builder = PreprocessBuilder::new(&source)
        .file_name(&file_name)
        .defines(defines.iter().map(|d| Define::parse(d)));
    if let Some(handler) = includes.as_mut() {
        builder = builder.include_handler(handler);
    }

    let result = builder.preprocess().map_err(|e| e.to_string())?;
    let text = result.source.to_string_lossy();

    if let Some(output) = output {
        write_file(&output, text.as_bytes())?;
        eprintln!("Preprocessed {} -> {}", input.display(), output.display());
    } else {
        print!("{}", text);
    }

    if let Some(warnings) = result.warnings {
        eprintln!("Warnings:\n{}", warnings);
    }

    Ok(())
}

fn reflect_shader(
    input: PathBuf,
    stage: ShaderStage,
    entry: String,
    defines: Vec<String>,
) -> Result<(), String> {
    let source = read_source(&input)?;
    let file_name = input.to_string_lossy();
    let reflection = CompileBuilder::new(&source, stage)
        .entry_point(&entry)
        .file_name(&file_name)
        .defines(defines.iter().map(|d| Define::parse(d)))
        .reflect()
        .map_err(|e| format!("Reflection failed: {}", e))?;

    println!("Shader: {} ({})", input.display(), stage);
    println!("Entry point: {}", entry);
    println!();
    print_reflection(&reflection);
    Ok(())
}

fn print_reflection(reflection: &ShaderReflection) {
    for (title, params) in [
        ("Input Parameters", reflection.input_parameters().collect::<Vec<_>>()),
        ("Output Parameters", reflection.output_parameters().collect()),
    ] {
        if params.is_empty() {
            continue;
        }
        println!("{} ({}):", title, params.len());
        for param in params {
            println!(
                "  [{:2}] {}: {:?} {}",
                param.location,
                param.semantic(),
                param.component_type,
                mask_to_string(param.mask)
            );
        }
        println!();
    }

    let bindings: Vec<_> = reflection.resource_bindings().collect();
    if !bindings.is_empty() {
        println!("Bound Resources ({}):", bindings.len());
        for binding in bindings {
            let count = if binding.bind_count > 1 {
                format!("[{}]", binding.bind_count)
            } else {
                String::new()
            };
            println!(
                "  [{}{}, space{}] {}{} ({:?})",
                binding.register_letter(),
                binding.bind_point,
                binding.space,
                binding.name,
                count,
                binding.kind
            );
        }
        println!();
    }

    let cbs: Vec<_> = reflection.constant_buffers().collect();
    if !cbs.is_empty() {
        println!("Constant Buffers ({}):", cbs.len());
        for (i, cb) in cbs.iter().enumerate() {
            println!(
                "  [{}] {} ({} bytes, {} variables)",
                i,
                cb.name,
                cb.size,
                cb.variables.len()
            );
            for var in &cb.variables {
                println!(
                    "      +{:3}: {} {} ({} bytes)",
                    var.offset, var.type_name, var.name, var.size
                );
                for member in &var.members {
                    println!(
                        "          +{:3}: {} {}",
                        member.offset, member.type_name, member.name
                    );
                }
            }
        }
        println!();
    }

    let samplers: Vec<_> = reflection.combined_samplers().collect();
    if !samplers.is_empty() {
        println!("Combined Samplers ({}):", samplers.len());
        for sampler in samplers {
            println!(
                "  [{}] {} = {} + {}",
                sampler.binding,
                sampler.name,
                sampler.texture,
                sampler.sampler.as_deref().unwrap_or("<none>")
            );
        }
        println!();
    }

    let [x, y, z] = reflection.block_size();
    if x > 0 {
        println!("Block size: [{}, {}, {}]", x, y, z);
    }
}

fn strip_shader_cmd(
    input: PathBuf,
    output: Option<PathBuf>,
    keep_debug: bool,
    signatures: bool,
) -> Result<(), String> {
    let output = output.unwrap_or_else(|| {
        let stem = input.file_stem().unwrap_or_default().to_string_lossy();
        input.with_file_name(format!("{}.stripped.dxil", stem))
    });

    let bytes = read_binary(&input)?;

    let mut flags = StripFlags::empty();
    flags.set(StripFlags::DEBUG_INFO, !keep_debug);
    flags.set(StripFlags::SIGNATURES, signatures);
    if flags.is_empty() {
        return Err("Nothing to strip (--keep-debug without --signatures)".into());
    }

    let stripped = strip_shader(&bytes, flags).map_err(|e| e.to_string())?;
    write_file(&output, stripped.as_bytes())?;

    eprintln!(
        "Stripped {} -> {} ({} -> {} bytes, saved {})",
        input.display(),
        output.display(),
        bytes.len(),
        stripped.len(),
        bytes.len().saturating_sub(stripped.len())
    );

    Ok(())
}

fn extract_part(input: PathBuf, output: Option<PathBuf>, part: ExtractPart) -> Result<(), String> {
    let bytes = read_binary(&input)?;

    let (blob, name) = match part {
        ExtractPart::InputSignature => (get_input_signature(&bytes), "input signature"),
        ExtractPart::OutputSignature => (get_output_signature(&bytes), "output signature"),
        ExtractPart::DebugInfo => (get_debug_info(&bytes), "debug info"),
        ExtractPart::Program => (get_blob_part(&bytes, BlobPart::Program), "program"),
        ExtractPart::List => {
            println!("Blob parts in {}:", input.display());
            println!("  Size: {} bytes", bytes.len());
            let parts = [
                ("Input Signature", BlobPart::InputSignature),
                ("Output Signature", BlobPart::OutputSignature),
                ("Debug Info", BlobPart::DebugInfo),
                ("Debug Name", BlobPart::DebugName),
                ("Program", BlobPart::Program),
                ("Hash", BlobPart::Hash),
            ];
            for (name, part) in parts {
                if let Ok(blob) = get_blob_part(&bytes, part) {
                    println!("  {}: {} bytes", name, blob.len())
                }
            }
            return Ok(());
        }
    };
    let blob = blob.map_err(|e| e.to_string())?;
    write_blob_output(&blob, output, name)
}

fn write_blob_output(blob: &Blob, output: Option<PathBuf>, name: &str) -> Result<(), String> {
    if let Some(output) = output {
        write_file(&output, blob.as_bytes())?;
        eprintln!(
            "Extracted {} -> {} ({} bytes)",
            name,
            output.display(),
            blob.len()
        );
    } else {
        use std::io::Write;
        std::io::stdout()
            .write_all(blob.as_bytes())
            .map_err(|e| format!("Failed to write to stdout: {}", e))?;
    }
    Ok(())
}

fn init_logger(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logger(cli.verbose);

    let result = match cli.command {
        Commands::Compile(args) => compile_shader(args),
        Commands::Disasm {
            input,
            language,
            output,
            number,
            instructions_only,
        } => disassemble_shader(input, language, output, number, instructions_only),
        Commands::Preprocess {
            input,
            output,
            defines,
            include_dirs,
        } => preprocess_shader(input, output, defines, include_dirs),
        Commands::Reflect {
            input,
            stage,
            entry,
            defines,
        } => reflect_shader(input, stage, entry, defines),
        Commands::Strip {
            input,
            output,
            keep_debug,
            signatures,
        } => strip_shader_cmd(input, output, keep_debug, signatures),
        Commands::Extract {
            input,
            output,
            part,
        } => extract_part(input, output, part),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_to_string() {
        assert_eq!(mask_to_string(0x0), "none");
        assert_eq!(mask_to_string(0x3), "xy");
        assert_eq!(mask_to_string(0xf), "xyzw");
        assert_eq!(mask_to_string(0x4), "z");
    }

    #[test]
    fn test_detect_language() {
        assert_eq!(detect_language(b"DXBC\0\0\0\0"), Ok(ShadingLanguage::Dxil));
        assert_eq!(
            detect_language(&0x0723_0203u32.to_le_bytes()),
            Ok(ShadingLanguage::SpirV)
        );
        assert!(detect_language(b"#version 450").is_err());
        assert!(detect_language(b"ab").is_err());
    }

    #[test]
    fn test_cli_parses_compile_options() {
        let cli = Cli::try_parse_from([
            "scrs", "compile", "-I", "shader.hlsl", "-S", "ps", "-T", "glsl", "-V", "300",
            "-D", "FOO=1", "--shift-textures", "-2",
        ])
        .unwrap();
        let Commands::Compile(args) = cli.command else {
            panic!("expected compile");
        };
        assert_eq!(args.stage, ShaderStage::Pixel);
        assert_eq!(args.target, ShadingLanguage::Glsl);
        assert_eq!(args.version.as_deref(), Some("300"));
        assert_eq!(args.entry, "main");
        assert_eq!(args.optimization, 3);
        assert_eq!(args.shift_textures, -2);
        assert!(!args.row_major);
    }

    #[test]
    fn test_cli_rejects_unknown_stage() {
        assert!(Cli::try_parse_from(["scrs", "compile", "-I", "a.hlsl", "-S", "xs"]).is_err());
    }
}
