//! RAII wrapper for ScBlob

use crate::{Error, Result, Status};
use shaderconductor::ffi::{ScBlob, ScCreateBlob, ScDestroyBlob, ScGetBlobData, ScGetBlobSize};
use std::ops::Deref;
use std::slice;

/// RAII wrapper for ScBlob
///
/// Provides safe access to blob data and automatic cleanup via Drop.
/// When dropped, the blob is released through `ScDestroyBlob`.
pub struct Blob {
    ptr: *mut ScBlob,
}

impl Blob {
    /// Creates a new Blob from a raw pointer.
    ///
    /// # Safety
    /// The pointer must be a valid ScBlob pointer or null.
    /// Takes ownership of the blob.
    pub(crate) unsafe fn from_raw(ptr: *mut ScBlob) -> Option<Self> {
        if ptr.is_null() {
            None
        } else {
            Some(Blob { ptr })
        }
    }

    /// Copies `data` into a new blob.
    pub fn new(data: &[u8]) -> Result<Self> {
        let ptr = unsafe { ScCreateBlob(data.as_ptr().cast(), data.len()) };
        unsafe { Self::from_raw(ptr) }.ok_or(Error::CreateBlob {
            status: Status::E_FAIL,
        })
    }

    /// Creates an empty blob.
    pub fn empty() -> Result<Self> {
        Self::new(&[])
    }

    /// Returns the blob data as a byte slice.
    pub fn as_bytes(&self) -> &[u8] {
        unsafe {
            let size = ScGetBlobSize(self.ptr);
            if size == 0 {
                return &[];
            }
            slice::from_raw_parts(ScGetBlobData(self.ptr).cast::<u8>(), size)
        }
    }

    /// Returns the size of the blob in bytes.
    pub fn len(&self) -> usize {
        unsafe { ScGetBlobSize(self.ptr) }
    }

    /// Returns true if the blob is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Interprets the blob as a UTF-8 string.
    ///
    /// Trailing null bytes are trimmed.
    pub fn as_str(&self) -> Result<&str> {
        std::str::from_utf8(trim_nuls(self.as_bytes())).map_err(Into::into)
    }

    /// Converts the blob to a String, trimming trailing nulls and replacing
    /// invalid UTF-8.
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(trim_nuls(self.as_bytes())).into_owned()
    }
}

fn trim_nuls(bytes: &[u8]) -> &[u8] {
    bytes
        .iter()
        .rposition(|&b| b != 0)
        .map(|i| &bytes[..=i])
        .unwrap_or(&[])
}

impl Drop for Blob {
    fn drop(&mut self) {
        unsafe { ScDestroyBlob(self.ptr) };
    }
}

impl Deref for Blob {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.as_bytes()
    }
}

impl AsRef<[u8]> for Blob {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl std::fmt::Debug for Blob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Blob")
            .field("len", &self.len())
            .field("ptr", &self.ptr)
            .finish()
    }
}

// The bytes behind an ScBlob are immutable once created
unsafe impl Send for Blob {}
unsafe impl Sync for Blob {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_create() {
        let blob = Blob::new(&[1, 2, 3, 4]).unwrap();
        assert_eq!(blob.len(), 4);
        assert!(!blob.is_empty());
        assert_eq!(&blob[..], &[1, 2, 3, 4]);
    }

    #[test]
    fn test_empty_blob() {
        let blob = Blob::empty().unwrap();
        assert!(blob.is_empty());
        assert_eq!(blob.as_bytes(), &[] as &[u8]);
        assert_eq!(blob.as_str().unwrap(), "");
    }

    #[test]
    fn test_text_trims_trailing_nuls() {
        let blob = Blob::new(b"ps_6_0\0\0").unwrap();
        assert_eq!(blob.as_str().unwrap(), "ps_6_0");
        assert_eq!(blob.to_string_lossy(), "ps_6_0");
    }

    #[test]
    fn test_invalid_utf8() {
        let blob = Blob::new(&[0xff, 0xfe, b'a']).unwrap();
        assert!(matches!(blob.as_str(), Err(Error::Utf8(_))));
        assert!(blob.to_string_lossy().ends_with('a'));
    }
}
