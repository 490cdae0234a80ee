//! Reference-counted byte buffers returned by every compiler operation

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// Immutable, reference-counted byte buffer.
///
/// Cloning a blob shares the underlying allocation. Text payloads are stored
/// without a trailing NUL.
#[derive(Clone, PartialEq, Eq)]
pub struct Blob {
    data: Arc<[u8]>,
}

impl Blob {
    /// Creates a blob holding a copy of `data`.
    pub fn new(data: &[u8]) -> Self {
        Blob {
            data: Arc::from(data),
        }
    }

    /// Creates an empty blob.
    pub fn empty() -> Self {
        Blob {
            data: Arc::from(&[][..]),
        }
    }

    /// Creates a blob from UTF-8 text.
    pub fn from_text(text: &str) -> Self {
        Blob::new(text.as_bytes())
    }

    /// Creates a blob from little-endian 32-bit words.
    pub fn from_words(words: &[u32]) -> Self {
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        Blob::from(bytes)
    }

    /// Returns the contents.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Returns the size in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the blob holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Interprets the blob as UTF-8, trimming trailing NUL bytes.
    pub fn as_str(&self) -> crate::Result<&str> {
        std::str::from_utf8(trim_nul(&self.data)).map_err(Into::into)
    }

    /// Converts the blob to a String, replacing invalid UTF-8.
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(trim_nul(&self.data)).into_owned()
    }

    /// Reads the blob as little-endian 32-bit words.
    ///
    /// Returns `None` when the size is not a multiple of four.
    pub fn to_words(&self) -> Option<Vec<u32>> {
        if self.data.len() % 4 != 0 {
            return None;
        }
        Some(
            self.data
                .chunks_exact(4)
                .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        )
    }
}

fn trim_nul(bytes: &[u8]) -> &[u8] {
    let end = bytes.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    &bytes[..end]
}

impl Default for Blob {
    fn default() -> Self {
        Blob::empty()
    }
}

impl From<Vec<u8>> for Blob {
    fn from(data: Vec<u8>) -> Self {
        Blob {
            data: Arc::from(data),
        }
    }
}

impl From<String> for Blob {
    fn from(text: String) -> Self {
        Blob::from(text.into_bytes())
    }
}

impl Deref for Blob {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

impl AsRef<[u8]> for Blob {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl fmt::Debug for Blob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Blob").field("len", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_clone_shares_data() {
        let blob = Blob::new(b"hello");
        let copy = blob.clone();
        assert_eq!(blob.data().as_ptr(), copy.data().as_ptr());
        assert_eq!(copy.len(), 5);
    }

    #[test]
    fn test_blob_text_trims_nul() {
        let blob = Blob::new(b"abc\0\0");
        assert_eq!(blob.as_str().unwrap(), "abc");
        assert_eq!(blob.to_string_lossy(), "abc");
    }

    #[test]
    fn test_blob_words() {
        let blob = Blob::from_words(&[0x0723_0203, 1]);
        assert_eq!(blob.len(), 8);
        assert_eq!(blob.to_words().unwrap(), vec![0x0723_0203, 1]);
        assert!(Blob::new(&[1, 2, 3]).to_words().is_none());
    }

    #[test]
    fn test_empty_blob() {
        let blob = Blob::default();
        assert!(blob.is_empty());
        assert_eq!(blob.as_str().unwrap(), "");
    }
}
