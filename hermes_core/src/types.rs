//! Core Pod-safe types used by the control protocol.

use std::fmt;

/// Fixed-size string for zero-copy control messages.
///
/// Channel names, log file paths and error messages cross process
/// boundaries inside fixed-layout records; a `FixedString<N>` carries up
/// to `N` UTF-8 bytes plus a length byte and is `Pod`-safe.
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct FixedString<const N: usize> {
    data: [u8; N],
    len: u8,
}

impl<const N: usize> FixedString<N> {
    /// Maximum capacity of this fixed string
    pub const CAPACITY: usize = N;

    // Compile-time check: len is u8, so N must not exceed 255
    const _ASSERT_N_FITS_U8: () = assert!(N <= 255, "FixedString<N>: N must be <= 255 (len is u8)");

    /// Create a new empty fixed string
    #[inline]
    pub const fn new() -> Self {
        // Trigger the compile-time assertion
        let _ = Self::_ASSERT_N_FITS_U8;
        Self {
            data: [0; N],
            len: 0,
        }
    }

    /// Create a fixed string from a string slice.
    ///
    /// If the string is longer than capacity, it will be truncated at a
    /// valid UTF-8 char boundary.
    #[inline]
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Self {
        let mut result = Self::new();
        let truncated = if s.len() <= N {
            s
        } else {
            let mut end = N;
            while end > 0 && !s.is_char_boundary(end) {
                end -= 1;
            }
            &s[..end]
        };
        let bytes = truncated.as_bytes();
        result.data[..bytes.len()].copy_from_slice(bytes);
        result.len = bytes.len() as u8;
        result
    }

    /// Get the string contents as a string slice.
    ///
    /// Uses checked conversion: data arriving from shared memory may
    /// contain invalid UTF-8, which reads as an empty string.
    #[inline]
    pub fn as_str(&self) -> &str {
        let len = (self.len as usize).min(N);
        std::str::from_utf8(&self.data[..len]).unwrap_or("")
    }

    /// Get the current length
    #[inline]
    pub fn len(&self) -> usize {
        self.len as usize
    }

    /// Check if the string is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl<const N: usize> Default for FixedString<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> fmt::Debug for FixedString<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

impl<const N: usize> fmt::Display for FixedString<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl<const N: usize> From<&str> for FixedString<N> {
    fn from(s: &str) -> Self {
        Self::from_str(s)
    }
}

// SAFETY: FixedString is repr(C), contains only plain bytes, has no
// padding ([u8; N] followed by u8 with align 1), and any bit pattern is a
// valid value (as_str handles invalid UTF-8).
unsafe impl<const N: usize> bytemuck::Zeroable for FixedString<N> {}
unsafe impl<const N: usize> bytemuck::Pod for FixedString<N> where [u8; N]: bytemuck::Pod {}
