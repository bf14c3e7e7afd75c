//! Raw frame ingestion and reconstruction remapping.
//!
//! Everything here operates on caller-owned [`FrameBuffer`]s: readers fill a
//! hardware-ready input buffer from a byte stream, and the remapper turns the
//! encoder's tiled reconstruction planes back into a raster frame. No state is
//! kept between calls.

pub mod error;
pub mod reader;
pub mod recon;

use std::io::Read;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

pub use error::{FrameError, Plane};
pub use reader::{read_packed_422, read_planar_420, read_semi_planar_420};
pub use recon::{MacroblockPlane, macroblock_grid, remap_reconstruction};

/// Edge of a macroblock in luma samples.
pub const MACROBLOCK_SIZE: usize = 16;
/// Bytes in one 16x16 luma tile.
pub const LUMA_TILE_BYTES: usize = MACROBLOCK_SIZE * MACROBLOCK_SIZE;
/// Bytes in one 16x8 interleaved chroma tile.
pub const CHROMA_TILE_BYTES: usize = MACROBLOCK_SIZE * MACROBLOCK_SIZE / 2;
/// Tiles preceding the first data tile of a reconstructed plane.
pub const HEADER_TILES: usize = 1;
/// Padding tiles stored after every macroblock column.
pub const PADDING_TILES_PER_COLUMN: usize = 2;
/// Input buffer heights are rounded up to this multiple for the encoder.
pub const HEIGHT_ALIGNMENT: usize = 16;
/// Packed 4:2:2 stores one chroma and one luma byte per pixel.
pub const PACKED_BYTES_PER_PIXEL: usize = 2;

/// Storage layout of a [`FrameBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PlaneLayout {
    Planar,
    SemiPlanar,
    Packed422,
}

impl PlaneLayout {
    /// Minimum bytes a single row of `width` pixels occupies.
    pub fn min_line_length(self, width: usize) -> usize {
        match self {
            PlaneLayout::Planar | PlaneLayout::SemiPlanar => width,
            PlaneLayout::Packed422 => width.saturating_mul(PACKED_BYTES_PER_PIXEL),
        }
    }

    pub fn is_420(self) -> bool {
        !matches!(self, PlaneLayout::Packed422)
    }

    /// Allocation size for `rows` rows of `line_length` bytes. 4:2:0 layouts
    /// add half again for chroma so that the chroma plane starts at 2/3 of
    /// the capacity. `None` if the size overflows `usize`.
    pub fn capacity_for(self, line_length: usize, rows: usize) -> Option<usize> {
        let luma = line_length.checked_mul(rows)?;
        if self.is_420() {
            luma.checked_mul(3).map(|bytes| bytes / 2)
        } else {
            Some(luma)
        }
    }
}

/// Layout of the raw input stream; selects which reader fills the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
pub enum SourceFormat {
    /// Y, Cb and Cr as three sequential planes (I420).
    #[serde(rename = "planar-420", alias = "i420")]
    #[value(name = "planar-420", alias = "i420")]
    Planar420,
    /// Y plane followed by an interleaved CbCr plane (NV12).
    #[serde(rename = "semi-planar-420", alias = "nv12")]
    #[value(name = "semi-planar-420", alias = "nv12")]
    SemiPlanar420,
    /// Interleaved chroma-first 4:2:2 (UYVY).
    #[serde(rename = "packed-422", alias = "uyvy")]
    #[value(name = "packed-422", alias = "uyvy")]
    Packed422,
}

impl SourceFormat {
    /// Layout of the hardware buffer this format is read into.
    pub fn destination_layout(self) -> PlaneLayout {
        match self {
            SourceFormat::Planar420 | SourceFormat::SemiPlanar420 => PlaneLayout::SemiPlanar,
            SourceFormat::Packed422 => PlaneLayout::Packed422,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SourceFormat::Planar420 => "planar-420",
            SourceFormat::SemiPlanar420 => "semi-planar-420",
            SourceFormat::Packed422 => "packed-422",
        }
    }

    /// File extension for the converted (hardware layout) output.
    pub fn output_extension(self) -> &'static str {
        match self.destination_layout() {
            PlaneLayout::Packed422 => "uyvy",
            _ => "nv12",
        }
    }

    /// Bytes one visible frame occupies in the source stream.
    pub fn frame_bytes(self, width: usize, height: usize) -> usize {
        match self {
            SourceFormat::Planar420 | SourceFormat::SemiPlanar420 => {
                width * height + width * (height / 2)
            }
            SourceFormat::Packed422 => width * height * PACKED_BYTES_PER_PIXEL,
        }
    }
}

/// Fills `dest` with one frame of `format` read from `reader`.
pub fn read_frame<R: Read>(
    format: SourceFormat,
    reader: &mut R,
    dest: &mut FrameBuffer,
    image_height: usize,
) -> Result<(), FrameError> {
    match format {
        SourceFormat::Planar420 => read_planar_420(reader, dest, image_height),
        SourceFormat::SemiPlanar420 => read_semi_planar_420(reader, dest, image_height),
        SourceFormat::Packed422 => read_packed_422(reader, dest, image_height),
    }
}

/// A rectangular pixel buffer with row stride and plane layout.
///
/// Capacity is the length of the owned storage. For 4:2:0 layouts the chroma
/// plane begins at [`FrameBuffer::chroma_offset`]; bytes past `width` in each
/// row are stride padding and are never written by the readers.
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    width: usize,
    height: usize,
    line_length: usize,
    layout: PlaneLayout,
    data: Vec<u8>,
    bytes_used: usize,
}

impl FrameBuffer {
    /// Zero-filled buffer of exactly `capacity` bytes.
    pub fn new(
        width: usize,
        height: usize,
        line_length: usize,
        layout: PlaneLayout,
        capacity: usize,
    ) -> Self {
        Self::from_vec(width, height, line_length, layout, vec![0; capacity])
    }

    pub fn from_vec(
        width: usize,
        height: usize,
        line_length: usize,
        layout: PlaneLayout,
        data: Vec<u8>,
    ) -> Self {
        Self {
            width,
            height,
            line_length,
            layout,
            data,
            bytes_used: 0,
        }
    }

    /// Buffer with the tightest line length for `layout`.
    pub fn alloc(width: usize, height: usize, layout: PlaneLayout) -> Result<Self, FrameError> {
        Self::with_line_length(width, height, layout, layout.min_line_length(width))
    }

    /// Buffer sized the way the encoder's pool sizes input buffers: height
    /// rounded up to [`HEIGHT_ALIGNMENT`], capacity from the layout.
    pub fn with_line_length(
        width: usize,
        height: usize,
        layout: PlaneLayout,
        line_length: usize,
    ) -> Result<Self, FrameError> {
        let too_large = FrameError::FrameTooLarge {
            line_length,
            rows: height,
        };
        let aligned_height = height
            .checked_next_multiple_of(HEIGHT_ALIGNMENT)
            .ok_or(too_large)?;
        let capacity = layout
            .capacity_for(line_length, aligned_height)
            .ok_or(FrameError::FrameTooLarge {
                line_length,
                rows: aligned_height,
            })?;
        Ok(Self::new(width, aligned_height, line_length, layout, capacity))
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn line_length(&self) -> usize {
        self.line_length
    }

    pub fn layout(&self) -> PlaneLayout {
        self.layout
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Start of the chroma plane for 4:2:0 layouts.
    pub fn chroma_offset(&self) -> usize {
        self.capacity() * 2 / 3
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn bytes_used(&self) -> usize {
        self.bytes_used
    }

    pub(crate) fn set_bytes_used(&mut self, bytes: usize) {
        self.bytes_used = bytes.min(self.data.len());
    }

    /// The meaningful prefix of the buffer as reported by the last writer.
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.bytes_used]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_rounds_height_and_places_chroma_after_luma() {
        let buffer = FrameBuffer::alloc(352, 280, PlaneLayout::SemiPlanar).unwrap();
        assert_eq!(buffer.height(), 288);
        assert_eq!(buffer.line_length(), 352);
        assert_eq!(buffer.capacity(), 352 * 288 * 3 / 2);
        assert_eq!(buffer.chroma_offset(), 352 * 288);
    }

    #[test]
    fn packed_capacity_has_no_chroma_plane() {
        let buffer = FrameBuffer::with_line_length(32, 16, PlaneLayout::Packed422, 80).unwrap();
        assert_eq!(buffer.capacity(), 80 * 16);
    }

    #[test]
    fn oversized_geometry_is_an_error() {
        assert!(matches!(
            FrameBuffer::with_line_length(16, 16, PlaneLayout::SemiPlanar, usize::MAX),
            Err(FrameError::FrameTooLarge { .. })
        ));
        assert!(matches!(
            FrameBuffer::alloc(16, usize::MAX, PlaneLayout::Packed422),
            Err(FrameError::FrameTooLarge { .. })
        ));
        assert_eq!(PlaneLayout::SemiPlanar.capacity_for(usize::MAX / 2, 2), None);
    }

    #[test]
    fn source_frame_sizes() {
        assert_eq!(SourceFormat::Planar420.frame_bytes(16, 16), 384);
        assert_eq!(SourceFormat::SemiPlanar420.frame_bytes(16, 16), 384);
        assert_eq!(SourceFormat::Packed422.frame_bytes(16, 16), 512);
    }
}
