//! Output resolution shared by every per-pixel buffer.

use serde::{Deserialize, Serialize};

use super::{Error, Result};

/// Width and height of the output, both non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "(u32, u32)", into = "(u32, u32)")]
pub struct Resolution {
    width: u32,
    height: u32,
}

impl Resolution {
    /// Validate a resolution. Zero in either dimension is rejected.
    pub fn new(width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::InvalidResolution { width, height });
        }
        Ok(Self { width, height })
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Number of pixels.
    #[inline]
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// `1 / height`, used by the kernels to build camera rays.
    #[inline]
    pub fn height_inv(&self) -> f32 {
        1.0 / self.height as f32
    }

    pub fn as_array(&self) -> [u32; 2] {
        [self.width, self.height]
    }
}

impl TryFrom<(u32, u32)> for Resolution {
    type Error = Error;

    fn try_from((width, height): (u32, u32)) -> Result<Self> {
        Self::new(width, height)
    }
}

impl From<Resolution> for (u32, u32) {
    fn from(r: Resolution) -> Self {
        (r.width, r.height)
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_zero() {
        assert!(matches!(
            Resolution::new(0, 8),
            Err(Error::InvalidResolution { width: 0, height: 8 })
        ));
        assert!(Resolution::new(8, 0).is_err());
    }

    #[test]
    fn test_pixel_count() {
        let r = Resolution::new(4, 3).unwrap();
        assert_eq!(r.pixel_count(), 12);
        assert_eq!(r.to_string(), "4x3");
    }

    #[test]
    fn test_serde_validates() {
        let r: Resolution = serde_json::from_str("[640, 480]").unwrap();
        assert_eq!(r.width(), 640);
        assert!(serde_json::from_str::<Resolution>("[0, 480]").is_err());
    }
}
