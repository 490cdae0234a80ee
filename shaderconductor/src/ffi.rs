//! C ABI.
//!
//! Descriptors mirror the Rust ones field for field. Every exported
//! function validates its pointers, converts to the Rust descriptors,
//! runs the operation and writes owned blobs back. Blobs and results are
//! released by the caller through [`ScDestroyBlob`] and [`ScDestroyResult`].
//! Panics are caught at each export and reported as `E_FAIL`.

#![allow(non_snake_case)]

use crate::blob::Blob;
use crate::compiler;
use crate::container::{BlobPart, get_blob_part, strip};
use crate::desc::{
    ABI_VERSION, DisassembleDesc, MacroDefine, OptionsDesc, ResultDesc, ShaderModel, ShaderStage,
    ShadingLanguage, SourceDesc, TargetDesc,
};
use crate::front::include::{IncludeHandler, IncludedSource};
use crate::reflect::{Reflection, Variable};
use std::collections::HashMap;
use std::ffi::{CStr, CString, c_char, c_void};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

pub type ScStatus = i32;

pub const S_OK: ScStatus = 0;
pub const E_NOTIMPL: ScStatus = 0x80004001u32 as i32;
pub const E_POINTER: ScStatus = 0x80004003u32 as i32;
pub const E_FAIL: ScStatus = 0x80004005u32 as i32;
pub const E_INVALIDARG: ScStatus = 0x80070057u32 as i32;

pub const SC_ABI_VERSION: u32 = ABI_VERSION;

/// Opaque byte buffer handed across the boundary
pub struct ScBlob {
    blob: Blob,
}

impl ScBlob {
    fn into_raw(blob: Blob) -> *mut ScBlob {
        Box::into_raw(Box::new(ScBlob { blob }))
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ScMacroDefine {
    pub name: *const c_char,
    /// May be null, meaning `1`
    pub value: *const c_char,
}

/// Loads an included file. Returns a blob created with [`ScCreateBlob`]
/// (ownership passes to the compiler) or null when the file is missing.
pub type ScIncludeCallback = Option<
    unsafe extern "C" fn(
        user_data: *mut c_void,
        name: *const c_char,
        includer: *const c_char,
    ) -> *mut ScBlob,
>;

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ScSourceDesc {
    /// Nul-terminated HLSL source
    pub source: *const c_char,
    pub file_name: *const c_char,
    pub entry_point: *const c_char,
    pub stage: u32,
    pub defines: *const ScMacroDefine,
    pub num_defines: u32,
    /// Null reads includes from the file system
    pub include_callback: ScIncludeCallback,
    pub include_user_data: *mut c_void,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct ScShaderModel {
    pub major: u8,
    pub minor: u8,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ScOptionsDesc {
    pub pack_matrices_in_row_major: bool,
    pub enable_16bit_types: bool,
    pub enable_debug_info: bool,
    pub disable_optimizations: bool,
    pub optimization_level: u32,
    pub shader_model: ScShaderModel,
    pub shift_all_textures_bindings: i32,
    pub shift_all_samplers_bindings: i32,
    pub shift_all_cbuffers_bindings: i32,
    pub shift_all_ua_buffers_bindings: i32,
    pub need_reflection: bool,
    pub inherit_combined_sampler_bindings: bool,
}

impl Default for ScOptionsDesc {
    fn default() -> Self {
        ScOptionsDesc::from(&OptionsDesc::default())
    }
}

impl From<&OptionsDesc> for ScOptionsDesc {
    fn from(o: &OptionsDesc) -> Self {
        ScOptionsDesc {
            pack_matrices_in_row_major: o.pack_matrices_in_row_major,
            enable_16bit_types: o.enable_16bit_types,
            enable_debug_info: o.enable_debug_info,
            disable_optimizations: o.disable_optimizations,
            optimization_level: o.optimization_level,
            shader_model: ScShaderModel {
                major: o.shader_model.major,
                minor: o.shader_model.minor,
            },
            shift_all_textures_bindings: o.shift_all_textures_bindings,
            shift_all_samplers_bindings: o.shift_all_samplers_bindings,
            shift_all_cbuffers_bindings: o.shift_all_cbuffers_bindings,
            shift_all_ua_buffers_bindings: o.shift_all_ua_buffers_bindings,
            need_reflection: o.need_reflection,
            inherit_combined_sampler_bindings: o.inherit_combined_sampler_bindings,
        }
    }
}

impl From<&ScOptionsDesc> for OptionsDesc {
    fn from(o: &ScOptionsDesc) -> Self {
        OptionsDesc {
            pack_matrices_in_row_major: o.pack_matrices_in_row_major,
            enable_16bit_types: o.enable_16bit_types,
            enable_debug_info: o.enable_debug_info,
            disable_optimizations: o.disable_optimizations,
            optimization_level: o.optimization_level,
            shader_model: ShaderModel::new(o.shader_model.major, o.shader_model.minor),
            shift_all_textures_bindings: o.shift_all_textures_bindings,
            shift_all_samplers_bindings: o.shift_all_samplers_bindings,
            shift_all_cbuffers_bindings: o.shift_all_cbuffers_bindings,
            shift_all_ua_buffers_bindings: o.shift_all_ua_buffers_bindings,
            need_reflection: o.need_reflection,
            inherit_combined_sampler_bindings: o.inherit_combined_sampler_bindings,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ScTargetDesc {
    pub language: u32,
    /// Null selects the language's default version
    pub version: *const c_char,
    pub as_module: bool,
}

/// Filled by the compile functions; release with [`ScDestroyResult`].
#[repr(C)]
#[derive(Debug)]
pub struct ScResultDesc {
    pub target: *mut ScBlob,
    pub is_text: bool,
    pub error_warning_msg: *mut ScBlob,
    pub has_error: bool,
    /// Null unless reflection was requested and the compile succeeded
    pub reflection: *mut ScReflection,
}

impl Default for ScResultDesc {
    fn default() -> Self {
        ScResultDesc {
            target: std::ptr::null_mut(),
            is_text: false,
            error_warning_msg: std::ptr::null_mut(),
            has_error: false,
            reflection: std::ptr::null_mut(),
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ScDisassembleDesc {
    pub language: u32,
    pub binary: *const c_void,
    pub binary_size: usize,
}

/// Reflection data plus nul-terminated copies of every name in it
pub struct ScReflection {
    reflection: Reflection,
    names: HashMap<String, CString>,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ScSignatureParameter {
    pub semantic: *const c_char,
    pub semantic_index: u32,
    pub location: u32,
    pub component_type: u32,
    pub mask: u8,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ScResourceDesc {
    pub name: *const c_char,
    pub kind: u32,
    pub space: u32,
    pub bind_point: u32,
    pub bind_count: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ScConstantBufferDesc {
    pub name: *const c_char,
    pub size: u32,
    pub num_variables: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ScVariableDesc {
    pub name: *const c_char,
    pub offset: u32,
    pub size: u32,
    pub type_name: *const c_char,
    pub data_type: u32,
    pub rows: u32,
    pub columns: u32,
    pub elements: u32,
    pub element_stride: u32,
    pub num_members: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ScCombinedSampler {
    pub name: *const c_char,
    pub texture: *const c_char,
    /// Null for the dummy sampler of texel fetches
    pub sampler: *const c_char,
    pub binding: u32,
}

static EMPTY: &CStr = c"";

impl ScReflection {
    fn new(reflection: Reflection) -> Self {
        let mut names = HashMap::new();
        let mut add = |name: &str| {
            names
                .entry(name.to_string())
                .or_insert_with(|| CString::new(name).unwrap_or_default());
        };
        for p in reflection
            .input_parameters
            .iter()
            .chain(&reflection.output_parameters)
        {
            add(&p.semantic);
        }
        for r in &reflection.resources {
            add(&r.name);
        }
        fn add_variables(vars: &[Variable], add: &mut dyn FnMut(&str)) {
            for v in vars {
                add(&v.name);
                add(&v.ty.name);
                add_variables(&v.ty.members, add);
            }
        }
        for cb in &reflection.constant_buffers {
            add(&cb.name);
            add_variables(&cb.variables, &mut add);
        }
        for s in &reflection.combined_samplers {
            add(&s.name);
            add(&s.texture);
            if let Some(sampler) = &s.sampler {
                add(sampler);
            }
        }
        ScReflection { reflection, names }
    }

    fn c_name(&self, name: &str) -> *const c_char {
        self.names.get(name).map_or(EMPTY.as_ptr(), |c| c.as_ptr())
    }

    fn variable_desc(&self, v: &Variable) -> ScVariableDesc {
        ScVariableDesc {
            name: self.c_name(&v.name),
            offset: v.offset,
            size: v.size,
            type_name: self.c_name(&v.ty.name),
            data_type: v.ty.data_type as u32,
            rows: v.ty.rows,
            columns: v.ty.columns,
            elements: v.ty.elements,
            element_stride: v.ty.element_stride,
            num_members: v.ty.members.len() as u32,
        }
    }
}

/// Runs an export body, turning a panic into `E_FAIL`.
fn guard(body: impl FnOnce() -> ScStatus) -> ScStatus {
    catch_unwind(AssertUnwindSafe(body)).unwrap_or_else(|_| {
        log::error!(target: "shaderconductor", "panic caught at the C ABI boundary");
        E_FAIL
    })
}

/// Like `guard`, but a panic also marks the `count` entries at `results`
/// as failed so `has_error` always comes with a message.
fn guard_results(
    results: *mut ScResultDesc,
    count: usize,
    body: impl FnOnce() -> ScStatus,
) -> ScStatus {
    catch_unwind(AssertUnwindSafe(body)).unwrap_or_else(|_| {
        log::error!(target: "shaderconductor", "panic caught at the C ABI boundary");
        if !results.is_null() {
            for i in 0..count {
                let failure = ResultDesc::failure("internal error: the compiler panicked".to_string());
                unsafe { write_result(results.add(i), failure) };
            }
        }
        E_FAIL
    })
}

/// Reads an optional nul-terminated UTF-8 string.
unsafe fn opt_str(ptr: *const c_char, what: &str) -> Result<Option<String>, String> {
    if ptr.is_null() {
        return Ok(None);
    }
    unsafe { CStr::from_ptr(ptr) }
        .to_str()
        .map(|s| Some(s.to_string()))
        .map_err(|_| format!("{} is not valid UTF-8", what))
}

/// Include handler forwarding to a C callback.
struct CallbackInclude {
    callback: unsafe extern "C" fn(*mut c_void, *const c_char, *const c_char) -> *mut ScBlob,
    user_data: *mut c_void,
}

// The callback only runs inside the export that received it, on the
// caller's thread.
unsafe impl Send for CallbackInclude {}
unsafe impl Sync for CallbackInclude {}

impl IncludeHandler for CallbackInclude {
    fn load(&self, name: &str, includer: &str) -> Option<IncludedSource> {
        let c_name = CString::new(name).ok()?;
        let c_includer = CString::new(includer).ok()?;
        let raw = unsafe { (self.callback)(self.user_data, c_name.as_ptr(), c_includer.as_ptr()) };
        if raw.is_null() {
            debug_log!("include callback found nothing for {}", name);
            return None;
        }
        let owned = unsafe { Box::from_raw(raw) };
        Some(IncludedSource {
            name: name.to_string(),
            source: owned.blob.to_string_lossy(),
        })
    }
}

unsafe fn source_desc(desc: &ScSourceDesc) -> Result<SourceDesc, String> {
    let source = unsafe { opt_str(desc.source, "source") }?
        .ok_or_else(|| "source is null".to_string())?;
    let entry_point = unsafe { opt_str(desc.entry_point, "entry point") }?.unwrap_or_default();
    let stage = ShaderStage::from_u32(desc.stage)
        .ok_or_else(|| format!("unknown shader stage {}", desc.stage))?;
    let mut out = SourceDesc::new(&source, &entry_point, stage);
    out.file_name = unsafe { opt_str(desc.file_name, "file name") }?;
    if desc.num_defines > 0 {
        if desc.defines.is_null() {
            return Err("defines is null".to_string());
        }
        let defines = unsafe { std::slice::from_raw_parts(desc.defines, desc.num_defines as usize) };
        for define in defines {
            let name = unsafe { opt_str(define.name, "define name") }?
                .ok_or_else(|| "define name is null".to_string())?;
            let value = unsafe { opt_str(define.value, "define value") }?.unwrap_or_default();
            out.defines.push(MacroDefine::new(&name, &value));
        }
    }
    if let Some(callback) = desc.include_callback {
        out.include_handler = Some(Arc::new(CallbackInclude {
            callback,
            user_data: desc.include_user_data,
        }));
    }
    Ok(out)
}

unsafe fn target_desc(desc: &ScTargetDesc) -> Result<TargetDesc, String> {
    let language = ShadingLanguage::from_u32(desc.language)
        .ok_or_else(|| format!("unknown shading language {}", desc.language))?;
    Ok(TargetDesc {
        language,
        version: unsafe { opt_str(desc.version, "target version") }?,
        as_module: desc.as_module,
    })
}

/// Moves `result` into `out`, transferring blob ownership.
unsafe fn write_result(out: *mut ScResultDesc, result: ResultDesc) {
    let target = if result.target.is_empty() {
        std::ptr::null_mut()
    } else {
        ScBlob::into_raw(result.target)
    };
    let error_warning_msg = if result.error_warning_msg.is_empty() {
        std::ptr::null_mut()
    } else {
        ScBlob::into_raw(result.error_warning_msg)
    };
    let reflection = result
        .reflection
        .map_or(std::ptr::null_mut(), |r| Box::into_raw(Box::new(ScReflection::new(r))));
    unsafe {
        *out = ScResultDesc {
            target,
            is_text: result.is_text,
            error_warning_msg,
            has_error: result.has_error,
            reflection,
        };
    }
}

/// Reports an argument error through `out` when it is writable.
unsafe fn invalid_argument(out: *mut ScResultDesc, message: String) -> ScStatus {
    debug_log!("invalid argument: {}", message);
    if !out.is_null() {
        unsafe { write_result(out, ResultDesc::failure(format!("Invalid argument: {}", message))) };
    }
    E_INVALIDARG
}

fn status_of(result: &ResultDesc) -> ScStatus {
    if result.has_error { E_FAIL } else { S_OK }
}

#[unsafe(no_mangle)]
pub extern "C" fn ScGetAbiVersion() -> u32 {
    SC_ABI_VERSION
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn ScCompile(
    source: *const ScSourceDesc,
    options: *const ScOptionsDesc,
    target: *const ScTargetDesc,
    result: *mut ScResultDesc,
) -> ScStatus {
    guard_results(result, 1, || {
        if source.is_null() || target.is_null() || result.is_null() {
            return E_POINTER;
        }
        let source = match unsafe { source_desc(&*source) } {
            Ok(source) => source,
            Err(message) => return unsafe { invalid_argument(result, message) },
        };
        let target = match unsafe { target_desc(&*target) } {
            Ok(target) => target,
            Err(message) => return unsafe { invalid_argument(result, message) },
        };
        let options = if options.is_null() {
            OptionsDesc::default()
        } else {
            OptionsDesc::from(unsafe { &*options })
        };
        let out = compiler::compile(&source, &options, &target);
        let status = status_of(&out);
        unsafe { write_result(result, out) };
        debug_log_return!("ScCompile", "{:#x}", status)
    })
}

/// Compiles once for `num_targets` targets; `results` must hold as many
/// entries. Returns `E_FAIL` if any target failed.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ScCompileMulti(
    source: *const ScSourceDesc,
    options: *const ScOptionsDesc,
    targets: *const ScTargetDesc,
    num_targets: u32,
    results: *mut ScResultDesc,
) -> ScStatus {
    let slots = if targets.is_null() { 0 } else { num_targets as usize };
    guard_results(results, slots, || {
        if source.is_null() || (num_targets > 0 && (targets.is_null() || results.is_null())) {
            return E_POINTER;
        }
        let count = num_targets as usize;
        let fail_all = |message: String| {
            for i in 0..count {
                unsafe { invalid_argument(results.add(i), message.clone()) };
            }
            E_INVALIDARG
        };
        let source = match unsafe { source_desc(&*source) } {
            Ok(source) => source,
            Err(message) => return fail_all(message),
        };
        let mut parsed = Vec::with_capacity(count);
        if count > 0 {
            for desc in unsafe { std::slice::from_raw_parts(targets, count) } {
                match unsafe { target_desc(desc) } {
                    Ok(target) => parsed.push(target),
                    Err(message) => return fail_all(message),
                }
            }
        }
        let options = if options.is_null() {
            OptionsDesc::default()
        } else {
            OptionsDesc::from(unsafe { &*options })
        };
        let mut status = S_OK;
        for (i, out) in compiler::compile_multi(&source, &options, &parsed)
            .into_iter()
            .enumerate()
        {
            if out.has_error {
                status = E_FAIL;
            }
            unsafe { write_result(results.add(i), out) };
        }
        status
    })
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn ScPreprocess(source: *const ScSourceDesc, result: *mut ScResultDesc) -> ScStatus {
    guard_results(result, 1, || {
        if source.is_null() || result.is_null() {
            return E_POINTER;
        }
        let source = match unsafe { source_desc(&*source) } {
            Ok(source) => source,
            Err(message) => return unsafe { invalid_argument(result, message) },
        };
        let out = compiler::preprocess(&source);
        let status = status_of(&out);
        unsafe { write_result(result, out) };
        status
    })
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn ScDisassemble(
    desc: *const ScDisassembleDesc,
    result: *mut ScResultDesc,
) -> ScStatus {
    guard_results(result, 1, || {
        if desc.is_null() || result.is_null() {
            return E_POINTER;
        }
        let desc = unsafe { &*desc };
        let Some(language) = ShadingLanguage::from_u32(desc.language) else {
            return unsafe {
                invalid_argument(result, format!("unknown shading language {}", desc.language))
            };
        };
        if desc.binary.is_null() && desc.binary_size > 0 {
            return E_POINTER;
        }
        let binary = if desc.binary_size == 0 {
            Blob::empty()
        } else {
            Blob::new(unsafe { std::slice::from_raw_parts(desc.binary.cast::<u8>(), desc.binary_size) })
        };
        let out = compiler::disassemble(&DisassembleDesc { language, binary });
        let status = status_of(&out);
        unsafe { write_result(result, out) };
        debug_log_return!("ScDisassemble", "{:#x}", status)
    })
}

/// Releases every blob and the reflection held by `result` and nulls them.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ScDestroyResult(result: *mut ScResultDesc) {
    if result.is_null() {
        return;
    }
    let _ = guard(|| {
        let result = unsafe { &mut *result };
        unsafe {
            ScDestroyBlob(std::mem::replace(&mut result.target, std::ptr::null_mut()));
            ScDestroyBlob(std::mem::replace(
                &mut result.error_warning_msg,
                std::ptr::null_mut(),
            ));
        }
        let reflection = std::mem::replace(&mut result.reflection, std::ptr::null_mut());
        if !reflection.is_null() {
            drop(unsafe { Box::from_raw(reflection) });
        }
        S_OK
    });
}

/// Copies `size` bytes into a new blob. Null or zero-size input gives an
/// empty blob.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ScCreateBlob(data: *const c_void, size: usize) -> *mut ScBlob {
    if data.is_null() || size == 0 {
        return ScBlob::into_raw(Blob::empty());
    }
    ScBlob::into_raw(Blob::new(unsafe { std::slice::from_raw_parts(data.cast::<u8>(), size) }))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn ScDestroyBlob(blob: *mut ScBlob) {
    if !blob.is_null() {
        drop(unsafe { Box::from_raw(blob) });
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn ScGetBlobData(blob: *const ScBlob) -> *const c_void {
    if blob.is_null() {
        return std::ptr::null();
    }
    unsafe { (*blob).blob.data().as_ptr().cast() }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn ScGetBlobSize(blob: *const ScBlob) -> usize {
    if blob.is_null() {
        return 0;
    }
    unsafe { (*blob).blob.len() }
}

unsafe fn container_bytes<'a>(data: *const c_void, size: usize) -> Option<&'a [u8]> {
    if data.is_null() || size == 0 {
        None
    } else {
        Some(unsafe { std::slice::from_raw_parts(data.cast::<u8>(), size) })
    }
}

/// Extracts one part of a DXIL container into `*part_out`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ScGetBlobPart(
    data: *const c_void,
    size: usize,
    part: u32,
    part_out: *mut *mut ScBlob,
) -> ScStatus {
    guard(|| {
        if part_out.is_null() {
            return E_POINTER;
        }
        unsafe { *part_out = std::ptr::null_mut() };
        let Some(bytes) = (unsafe { container_bytes(data, size) }) else {
            return E_INVALIDARG;
        };
        let Some(part) = BlobPart::from_u32(part) else {
            return E_INVALIDARG;
        };
        match get_blob_part(bytes, part) {
            Ok(blob) => {
                unsafe { *part_out = ScBlob::into_raw(blob) };
                S_OK
            }
            Err(err) => {
                debug_log!("ScGetBlobPart: {}", err);
                E_FAIL
            }
        }
    })
}

/// Rebuilds a DXIL container without the parts `flags` selects.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ScStripShader(
    data: *const c_void,
    size: usize,
    flags: u32,
    stripped_out: *mut *mut ScBlob,
) -> ScStatus {
    guard(|| {
        if stripped_out.is_null() {
            return E_POINTER;
        }
        unsafe { *stripped_out = std::ptr::null_mut() };
        let Some(bytes) = (unsafe { container_bytes(data, size) }) else {
            return E_INVALIDARG;
        };
        match strip(bytes, flags) {
            Ok(blob) => {
                unsafe { *stripped_out = ScBlob::into_raw(blob) };
                S_OK
            }
            Err(err) => {
                debug_log!("ScStripShader: {}", err);
                E_FAIL
            }
        }
    })
}

// Reflection accessors. Names stay valid until the owning result is destroyed.

unsafe fn reflection<'a>(ptr: *const ScReflection) -> Option<&'a ScReflection> {
    unsafe { ptr.as_ref() }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn ScReflectionNumInputs(refl: *const ScReflection) -> u32 {
    unsafe { reflection(refl) }.map_or(0, |r| r.reflection.input_parameters.len() as u32)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn ScReflectionNumOutputs(refl: *const ScReflection) -> u32 {
    unsafe { reflection(refl) }.map_or(0, |r| r.reflection.output_parameters.len() as u32)
}

unsafe fn signature_parameter(
    refl: *const ScReflection,
    outputs: bool,
    index: u32,
    out: *mut ScSignatureParameter,
) -> ScStatus {
    let Some(r) = (unsafe { reflection(refl) }) else {
        return E_POINTER;
    };
    if out.is_null() {
        return E_POINTER;
    }
    let list = if outputs {
        &r.reflection.output_parameters
    } else {
        &r.reflection.input_parameters
    };
    let Some(p) = list.get(index as usize) else {
        return E_INVALIDARG;
    };
    unsafe {
        *out = ScSignatureParameter {
            semantic: r.c_name(&p.semantic),
            semantic_index: p.semantic_index,
            location: p.location,
            component_type: p.component_type as u32,
            mask: p.mask,
        };
    }
    S_OK
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn ScReflectionGetInput(
    refl: *const ScReflection,
    index: u32,
    out: *mut ScSignatureParameter,
) -> ScStatus {
    unsafe { signature_parameter(refl, false, index, out) }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn ScReflectionGetOutput(
    refl: *const ScReflection,
    index: u32,
    out: *mut ScSignatureParameter,
) -> ScStatus {
    unsafe { signature_parameter(refl, true, index, out) }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn ScReflectionNumResources(refl: *const ScReflection) -> u32 {
    unsafe { reflection(refl) }.map_or(0, |r| r.reflection.resources.len() as u32)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn ScReflectionGetResource(
    refl: *const ScReflection,
    index: u32,
    out: *mut ScResourceDesc,
) -> ScStatus {
    let Some(r) = (unsafe { reflection(refl) }) else {
        return E_POINTER;
    };
    if out.is_null() {
        return E_POINTER;
    }
    let Some(res) = r.reflection.resources.get(index as usize) else {
        return E_INVALIDARG;
    };
    unsafe {
        *out = ScResourceDesc {
            name: r.c_name(&res.name),
            kind: res.kind as u32,
            space: res.space,
            bind_point: res.bind_point,
            bind_count: res.bind_count,
        };
    }
    S_OK
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn ScReflectionNumConstantBuffers(refl: *const ScReflection) -> u32 {
    unsafe { reflection(refl) }.map_or(0, |r| r.reflection.constant_buffers.len() as u32)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn ScReflectionGetConstantBuffer(
    refl: *const ScReflection,
    index: u32,
    out: *mut ScConstantBufferDesc,
) -> ScStatus {
    let Some(r) = (unsafe { reflection(refl) }) else {
        return E_POINTER;
    };
    if out.is_null() {
        return E_POINTER;
    }
    let Some(cb) = r.reflection.constant_buffers.get(index as usize) else {
        return E_INVALIDARG;
    };
    unsafe {
        *out = ScConstantBufferDesc {
            name: r.c_name(&cb.name),
            size: cb.size,
            num_variables: cb.variables.len() as u32,
        };
    }
    S_OK
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn ScReflectionGetVariable(
    refl: *const ScReflection,
    buffer: u32,
    index: u32,
    out: *mut ScVariableDesc,
) -> ScStatus {
    let Some(r) = (unsafe { reflection(refl) }) else {
        return E_POINTER;
    };
    if out.is_null() {
        return E_POINTER;
    }
    let Some(v) = r
        .reflection
        .constant_buffers
        .get(buffer as usize)
        .and_then(|cb| cb.variables.get(index as usize))
    else {
        return E_INVALIDARG;
    };
    unsafe { *out = r.variable_desc(v) };
    S_OK
}

/// Member `member` of a struct-typed variable.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ScReflectionGetMember(
    refl: *const ScReflection,
    buffer: u32,
    index: u32,
    member: u32,
    out: *mut ScVariableDesc,
) -> ScStatus {
    let Some(r) = (unsafe { reflection(refl) }) else {
        return E_POINTER;
    };
    if out.is_null() {
        return E_POINTER;
    }
    let Some(m) = r
        .reflection
        .constant_buffers
        .get(buffer as usize)
        .and_then(|cb| cb.variables.get(index as usize))
        .and_then(|v| v.ty.members.get(member as usize))
    else {
        return E_INVALIDARG;
    };
    unsafe { *out = r.variable_desc(m) };
    S_OK
}

/// Writes the `[numthreads]` size into `out[0..3]`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ScReflectionGetBlockSize(refl: *const ScReflection, out: *mut u32) -> ScStatus {
    let Some(r) = (unsafe { reflection(refl) }) else {
        return E_POINTER;
    };
    if out.is_null() {
        return E_POINTER;
    }
    for (i, size) in r.reflection.cs_block_size.iter().enumerate() {
        unsafe { *out.add(i) = *size };
    }
    S_OK
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn ScReflectionNumCombinedSamplers(refl: *const ScReflection) -> u32 {
    unsafe { reflection(refl) }.map_or(0, |r| r.reflection.combined_samplers.len() as u32)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn ScReflectionGetCombinedSampler(
    refl: *const ScReflection,
    index: u32,
    out: *mut ScCombinedSampler,
) -> ScStatus {
    let Some(r) = (unsafe { reflection(refl) }) else {
        return E_POINTER;
    };
    if out.is_null() {
        return E_POINTER;
    }
    let Some(s) = r.reflection.combined_samplers.get(index as usize) else {
        return E_INVALIDARG;
    };
    unsafe {
        *out = ScCombinedSampler {
            name: r.c_name(&s.name),
            texture: r.c_name(&s.texture),
            sampler: s.sampler.as_deref().map_or(std::ptr::null(), |n| r.c_name(n)),
            binding: s.binding,
        };
    }
    S_OK
}

/// Not provided: the core has no linker for `lib_6_x` libraries.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ScLinkShader(
    _modules: *const *const ScBlob,
    _num_modules: u32,
    result: *mut ScResultDesc,
) -> ScStatus {
    if !result.is_null() {
        unsafe { write_result(result, ResultDesc::failure("Linking is not supported.".to_string())) };
    }
    E_NOTIMPL
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emit::test_support::PIXEL;
    use pretty_assertions::assert_eq;

    fn source(text: &CStr, entry: &CStr, stage: ShaderStage) -> ScSourceDesc {
        ScSourceDesc {
            source: text.as_ptr(),
            file_name: std::ptr::null(),
            entry_point: entry.as_ptr(),
            stage: stage as u32,
            defines: std::ptr::null(),
            num_defines: 0,
            include_callback: None,
            include_user_data: std::ptr::null_mut(),
        }
    }

    fn blob_text(blob: *const ScBlob) -> String {
        unsafe {
            let data = ScGetBlobData(blob).cast::<u8>();
            let size = ScGetBlobSize(blob);
            String::from_utf8_lossy(std::slice::from_raw_parts(data, size)).into_owned()
        }
    }

    #[test]
    fn test_options_round_trip() {
        let options = OptionsDesc {
            shift_all_samplers_bindings: 7,
            enable_debug_info: true,
            ..OptionsDesc::default()
        };
        assert_eq!(OptionsDesc::from(&ScOptionsDesc::from(&options)), options);
    }

    #[test]
    fn test_compile_to_glsl() {
        let text = CString::new(PIXEL).unwrap();
        let desc = source(&text, c"PS", ShaderStage::Pixel);
        let target = ScTargetDesc {
            language: ShadingLanguage::Glsl as u32,
            version: std::ptr::null(),
            as_module: false,
        };
        let mut result = ScResultDesc::default();
        let status = unsafe { ScCompile(&desc, std::ptr::null(), &target, &mut result) };
        assert_eq!(status, S_OK);
        assert!(!result.has_error);
        assert!(result.is_text);
        assert!(blob_text(result.target).starts_with("#version 450"));
        unsafe { ScDestroyResult(&mut result) };
        assert!(result.target.is_null());
    }

    #[test]
    fn test_bad_stage_is_invalid_argument() {
        let text = CString::new(PIXEL).unwrap();
        let mut desc = source(&text, c"PS", ShaderStage::Pixel);
        desc.stage = 42;
        let target = ScTargetDesc {
            language: ShadingLanguage::SpirV as u32,
            version: std::ptr::null(),
            as_module: false,
        };
        let mut result = ScResultDesc::default();
        let status = unsafe { ScCompile(&desc, std::ptr::null(), &target, &mut result) };
        assert_eq!(status, E_INVALIDARG);
        assert!(result.has_error);
        assert!(blob_text(result.error_warning_msg).contains("unknown shader stage 42"));
        unsafe { ScDestroyResult(&mut result) };
    }

    #[test]
    fn test_null_pointers() {
        let mut result = ScResultDesc::default();
        let status =
            unsafe { ScCompile(std::ptr::null(), std::ptr::null(), std::ptr::null(), &mut result) };
        assert_eq!(status, E_POINTER);
        assert_eq!(unsafe { ScGetBlobSize(std::ptr::null()) }, 0);
        unsafe { ScDestroyBlob(std::ptr::null_mut()) };
        assert_eq!(unsafe { ScReflectionNumInputs(std::ptr::null()) }, 0);
    }

    #[test]
    fn test_panic_marks_results_failed() {
        let mut results = [ScResultDesc::default(), ScResultDesc::default()];
        let status = guard_results(results.as_mut_ptr(), results.len(), || panic!("lowering bug"));
        assert_eq!(status, E_FAIL);
        for result in &mut results {
            assert!(result.has_error);
            assert!(result.target.is_null());
            assert!(blob_text(result.error_warning_msg).starts_with("internal error"));
            unsafe { ScDestroyResult(result) };
        }
        assert_eq!(guard_results(std::ptr::null_mut(), 1, || panic!("no slot")), E_FAIL);
    }

    #[test]
    fn test_blob_quartet() {
        let bytes = [1u8, 2, 3];
        let blob = unsafe { ScCreateBlob(bytes.as_ptr().cast(), bytes.len()) };
        assert_eq!(unsafe { ScGetBlobSize(blob) }, 3);
        let data = unsafe { std::slice::from_raw_parts(ScGetBlobData(blob).cast::<u8>(), 3) };
        assert_eq!(data, &bytes);
        unsafe { ScDestroyBlob(blob) };

        let empty = unsafe { ScCreateBlob(std::ptr::null(), 10) };
        assert_eq!(unsafe { ScGetBlobSize(empty) }, 0);
        unsafe { ScDestroyBlob(empty) };
    }
}
