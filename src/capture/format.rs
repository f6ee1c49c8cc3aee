//! The single image format the device reports, and its descriptors.

use serde::{Deserialize, Serialize};

use crate::error::{DeviceError, Result};

pub const IMG_WIDTH: u32 = 320;
pub const IMG_HEIGHT: u32 = 240;

/// Pixel formats we support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    /// Single-channel 8-bit greyscale.
    Grey,
}

impl PixelFormat {
    /// Four character code as used on the wire.
    pub const fn fourcc(self) -> [u8; 4] {
        match self {
            Self::Grey => *b"GREY",
        }
    }

    pub const fn bytes_per_pixel(self) -> u32 {
        match self {
            Self::Grey => 1,
        }
    }

    pub const fn description(self) -> &'static str {
        match self {
            Self::Grey => "8-bit Greyscale",
        }
    }
}

/// Field layout of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Field {
    /// Progressive, no interlacing.
    None,
    Interlaced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColorSpace {
    Srgb,
    Rec709,
}

/// Video format specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Format {
    pub pixel_format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub field: Field,
    /// Bytes per line (stride).
    pub bytes_per_line: u32,
    /// Total image size in bytes.
    pub size_image: u32,
    pub color_space: ColorSpace,
}

impl Format {
    /// The only format the device ever produces: 320x240 GREY, 76800 bytes.
    pub const FIXED: Self = Self {
        pixel_format: PixelFormat::Grey,
        width: IMG_WIDTH,
        height: IMG_HEIGHT,
        field: Field::None,
        bytes_per_line: IMG_WIDTH * PixelFormat::Grey.bytes_per_pixel(),
        size_image: IMG_WIDTH * IMG_HEIGHT * PixelFormat::Grey.bytes_per_pixel(),
        color_space: ColorSpace::Srgb,
    };

    /// Image size as a byte count.
    pub const fn size(&self) -> usize {
        self.size_image as usize
    }

    /// Negotiation always converges on [`Format::FIXED`], whatever was asked for.
    pub fn negotiate(_requested: &Self) -> Self {
        Self::FIXED
    }
}

impl Default for Format {
    fn default() -> Self {
        Self::FIXED
    }
}

/// Entry returned by format enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatDesc {
    pub index: u32,
    pub pixel_format: PixelFormat,
    pub description: &'static str,
}

/// Enumerate supported formats; only index 0 exists.
pub fn enum_format(index: u32) -> Result<FormatDesc> {
    if index != 0 {
        return Err(DeviceError::InvalidArgument(format!(
            "format index {index} out of range"
        )));
    }
    let pixel_format = Format::FIXED.pixel_format;
    Ok(FormatDesc {
        index,
        pixel_format,
        description: pixel_format.description(),
    })
}
