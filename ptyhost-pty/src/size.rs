//! Terminal geometry
//!
//! Rows and columns map one to one onto the kernel's `winsize`, so every
//! `u16` value is representable and nothing is clamped. Zero is passed
//! through unchanged; the kernel reads it as "size unknown".

use std::fmt;

use serde::{Deserialize, Serialize};

/// Window size in characters and pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Geometry {
    /// Number of rows (characters)
    pub rows: u16,
    /// Number of columns (characters)
    pub cols: u16,
    /// Width in pixels (optional, can be 0)
    #[serde(default)]
    pub pixel_width: u16,
    /// Height in pixels (optional, can be 0)
    #[serde(default)]
    pub pixel_height: u16,
}

impl Geometry {
    pub fn new(rows: u16, cols: u16) -> Self {
        Self {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        }
    }

    pub fn with_pixels(rows: u16, cols: u16, pixel_width: u16, pixel_height: u16) -> Self {
        Self {
            rows,
            cols,
            pixel_width,
            pixel_height,
        }
    }

    /// Convert to libc winsize structure
    pub fn to_winsize(&self) -> libc::winsize {
        libc::winsize {
            ws_row: self.rows,
            ws_col: self.cols,
            ws_xpixel: self.pixel_width,
            ws_ypixel: self.pixel_height,
        }
    }
}

impl Default for Geometry {
    fn default() -> Self {
        Self::new(24, 80)
    }
}

/// `COLSxROWS`, the order terminals are usually described in
impl fmt::Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.cols, self.rows)
    }
}

impl From<libc::winsize> for Geometry {
    fn from(ws: libc::winsize) -> Self {
        Self {
            rows: ws.ws_row,
            cols: ws.ws_col,
            pixel_width: ws.ws_xpixel,
            pixel_height: ws.ws_ypixel,
        }
    }
}
