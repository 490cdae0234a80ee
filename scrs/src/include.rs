//! Include handler trait for custom #include resolution

use crate::{Error, Result};
use shaderconductor::ffi::{ScBlob, ScCreateBlob};
use std::collections::HashMap;
use std::ffi::{CStr, c_char, c_void};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::ptr;

/// Trait for custom include file resolution
///
/// Implement this trait to provide custom handling for #include directives
/// in your HLSL shaders. Without a handler the compiler reads includes
/// from the file system relative to the including file.
///
/// # Example
/// ```no_run
/// use scrs::{IncludeHandler, Result};
///
/// struct MyIncludeHandler {
///     base_path: std::path::PathBuf,
/// }
///
/// impl IncludeHandler for MyIncludeHandler {
///     fn open(&mut self, name: &str, _includer: &str) -> Result<Vec<u8>> {
///         let path = self.base_path.join(name);
///         std::fs::read(&path).map_err(|_| scrs::Error::IncludeNotFound(name.to_string()))
///     }
/// }
/// ```
pub trait IncludeHandler {
    /// Opens an include file and returns its contents.
    ///
    /// # Arguments
    /// * `name` - The file name from the #include directive
    /// * `includer` - The name of the file containing the directive
    fn open(&mut self, name: &str, includer: &str) -> Result<Vec<u8>>;
}

/// File system include handler that resolves includes from specified directories.
///
/// The directory of the including file is searched first.
///
/// # Example
/// ```no_run
/// use scrs::FileSystemInclude;
///
/// let include = FileSystemInclude::new()
///     .with_path("shaders/include")
///     .with_path("/usr/local/share/hlsl");
/// ```
#[derive(Debug, Clone, Default)]
pub struct FileSystemInclude {
    search_paths: Vec<PathBuf>,
}

impl FileSystemInclude {
    /// Creates a new file system include handler with no search paths.
    pub fn new() -> Self {
        FileSystemInclude {
            search_paths: Vec::new(),
        }
    }

    /// Adds a search path (builder pattern).
    pub fn with_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.search_paths.push(path.into());
        self
    }

    /// Adds a search path.
    pub fn add_path<P: Into<PathBuf>>(&mut self, path: P) {
        self.search_paths.push(path.into());
    }

    /// Returns the search paths.
    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }
}

impl IncludeHandler for FileSystemInclude {
    fn open(&mut self, name: &str, includer: &str) -> Result<Vec<u8>> {
        let local = Path::new(includer).parent().map(|dir| dir.join(name));
        let candidates = local
            .into_iter()
            .chain(self.search_paths.iter().map(|dir| dir.join(name)));
        for path in candidates {
            if path.is_file() {
                return std::fs::read(&path).map_err(Into::into);
            }
        }
        Err(Error::IncludeNotFound(name.to_string()))
    }
}

/// In-memory include handler for testing or embedded includes.
///
/// # Example
/// ```
/// use scrs::MemoryInclude;
///
/// let mut handler = MemoryInclude::new();
/// handler.add("common.hlsli", b"static const float4 white = float4(1,1,1,1);");
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryInclude {
    files: HashMap<String, Vec<u8>>,
}

impl MemoryInclude {
    /// Creates an empty in-memory include handler.
    pub fn new() -> Self {
        MemoryInclude {
            files: HashMap::new(),
        }
    }

    /// Adds a file.
    pub fn add<N: Into<String>, C: Into<Vec<u8>>>(&mut self, name: N, content: C) {
        self.files.insert(name.into(), content.into());
    }

    /// Adds a file (builder pattern).
    pub fn with_file<N: Into<String>, C: Into<Vec<u8>>>(mut self, name: N, content: C) -> Self {
        self.add(name, content);
        self
    }
}

impl IncludeHandler for MemoryInclude {
    fn open(&mut self, name: &str, _includer: &str) -> Result<Vec<u8>> {
        self.files
            .get(name)
            .cloned()
            .ok_or_else(|| Error::IncludeNotFound(name.to_string()))
    }
}

/// Carries a handler through the `user_data` pointer of the include callback.
pub(crate) struct IncludeBridge<'h> {
    pub(crate) handler: &'h mut dyn IncludeHandler,
}

impl IncludeBridge<'_> {
    pub(crate) fn user_data(&mut self) -> *mut c_void {
        (self as *mut Self).cast()
    }
}

/// Include callback handed to the compiler. `user_data` is an
/// `IncludeBridge` that outlives the call.
pub(crate) unsafe extern "C" fn include_callback(
    user_data: *mut c_void,
    name: *const c_char,
    includer: *const c_char,
) -> *mut ScBlob {
    if user_data.is_null() || name.is_null() {
        return ptr::null_mut();
    }
    let loaded = catch_unwind(AssertUnwindSafe(|| {
        let bridge = unsafe { &mut *user_data.cast::<IncludeBridge<'_>>() };
        let name = unsafe { CStr::from_ptr(name) }.to_string_lossy();
        let includer = if includer.is_null() {
            String::new()
        } else {
            unsafe { CStr::from_ptr(includer) }.to_string_lossy().into_owned()
        };
        bridge.handler.open(&name, &includer).ok()
    }));
    match loaded {
        Ok(Some(bytes)) => unsafe { ScCreateBlob(bytes.as_ptr().cast(), bytes.len()) },
        _ => ptr::null_mut(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shaderconductor::ffi::{ScDestroyBlob, ScGetBlobSize};

    #[test]
    fn test_memory_include() {
        let mut handler = MemoryInclude::new();
        handler.add("test.hlsli", b"float4 x;".to_vec());

        let content = handler.open("test.hlsli", "shader.hlsl").unwrap();
        assert_eq!(content, b"float4 x;");

        assert!(matches!(
            handler.open("missing.hlsli", "shader.hlsl"),
            Err(Error::IncludeNotFound(name)) if name == "missing.hlsli"
        ));
    }

    #[test]
    fn test_filesystem_include_paths() {
        let mut handler = FileSystemInclude::new().with_path("/path/one");
        handler.add_path("/path/two");
        assert_eq!(handler.search_paths().len(), 2);
        assert!(matches!(
            handler.open("definitely_not_here.hlsli", "shader.hlsl"),
            Err(Error::IncludeNotFound(_))
        ));
    }

    #[test]
    fn test_filesystem_include_reads_from_includer_dir() {
        let dir = std::env::temp_dir().join(format!("scrs_include_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("common.hlsli"), b"#define ONE 1\n").unwrap();

        let mut handler = FileSystemInclude::new();
        let includer = dir.join("shader.hlsl");
        let content = handler
            .open("common.hlsli", &includer.to_string_lossy())
            .unwrap();
        assert_eq!(content, b"#define ONE 1\n");
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_callback_bridges_handler() {
        let mut files = MemoryInclude::new().with_file("a.hlsli", "float a;");
        let mut bridge = IncludeBridge {
            handler: &mut files,
        };
        unsafe {
            let found = include_callback(bridge.user_data(), c"a.hlsli".as_ptr(), c"s.hlsl".as_ptr());
            assert!(!found.is_null());
            assert_eq!(ScGetBlobSize(found), 8);
            ScDestroyBlob(found);

            let missing = include_callback(bridge.user_data(), c"b.hlsli".as_ptr(), ptr::null());
            assert!(missing.is_null());
        }
    }
}
