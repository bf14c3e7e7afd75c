//! Remapping of the encoder's reconstructed frames.
//!
//! The encoder stores reconstructed planes as macroblock tiles in column-major
//! order: one header tile, then every tile of column 0 top to bottom, two
//! padding tiles, column 1, and so on. [`remap_reconstruction`] turns a luma
//! and chroma plane pair back into a raster packed 4:2:2 frame with luma in
//! the odd byte and chroma in the even byte of each pixel.

use crate::frame::{
    CHROMA_TILE_BYTES, FrameBuffer, FrameError, HEADER_TILES, LUMA_TILE_BYTES, MACROBLOCK_SIZE,
    PACKED_BYTES_PER_PIXEL, PADDING_TILES_PER_COLUMN, PlaneLayout,
};

/// One tiled plane of a reconstructed frame.
#[derive(Debug, Clone, Copy)]
pub struct MacroblockPlane<'a> {
    data: &'a [u8],
    tile_bytes: usize,
    mb_count_x: usize,
    mb_count_y: usize,
}

impl<'a> MacroblockPlane<'a> {
    /// Luma plane of 16x16 tiles.
    pub fn luma(data: &'a [u8], mb_count_x: usize, mb_count_y: usize) -> Result<Self, FrameError> {
        Self::new(data, LUMA_TILE_BYTES, mb_count_x, mb_count_y)
    }

    /// Chroma plane of 16x8 interleaved CbCr tiles.
    pub fn chroma(
        data: &'a [u8],
        mb_count_x: usize,
        mb_count_y: usize,
    ) -> Result<Self, FrameError> {
        Self::new(data, CHROMA_TILE_BYTES, mb_count_x, mb_count_y)
    }

    fn new(
        data: &'a [u8],
        tile_bytes: usize,
        mb_count_x: usize,
        mb_count_y: usize,
    ) -> Result<Self, FrameError> {
        match plane_len(tile_bytes, mb_count_x, mb_count_y) {
            Some(required) if data.len() >= required => {}
            required => {
                return Err(FrameError::BufferTooSmall {
                    expected: required.unwrap_or(usize::MAX),
                    received: data.len(),
                });
            }
        }
        Ok(Self {
            data,
            tile_bytes,
            mb_count_x,
            mb_count_y,
        })
    }

    /// Storage size of a luma plane for the given grid, `None` on overflow.
    pub fn luma_len(mb_count_x: usize, mb_count_y: usize) -> Option<usize> {
        plane_len(LUMA_TILE_BYTES, mb_count_x, mb_count_y)
    }

    /// Storage size of a chroma plane for the given grid, `None` on overflow.
    pub fn chroma_len(mb_count_x: usize, mb_count_y: usize) -> Option<usize> {
        plane_len(CHROMA_TILE_BYTES, mb_count_x, mb_count_y)
    }

    pub fn mb_count_x(&self) -> usize {
        self.mb_count_x
    }

    pub fn mb_count_y(&self) -> usize {
        self.mb_count_y
    }

    pub fn tile_bytes(&self) -> usize {
        self.tile_bytes
    }

    /// Bytes between the first tiles of two adjacent columns.
    pub fn column_stride(&self) -> usize {
        column_stride(self.tile_bytes, self.mb_count_y)
    }

    /// Offset of the tile for macroblock column `i`, row `j`.
    pub fn tile_offset(&self, i: usize, j: usize) -> usize {
        self.tile_bytes * HEADER_TILES + self.column_stride() * i + self.tile_bytes * j
    }

    pub fn tile(&self, i: usize, j: usize) -> &'a [u8] {
        let start = self.tile_offset(i, j);
        &self.data[start..start + self.tile_bytes]
    }
}

fn column_stride(tile_bytes: usize, mb_count_y: usize) -> usize {
    tile_bytes * (mb_count_y + PADDING_TILES_PER_COLUMN)
}

fn plane_len(tile_bytes: usize, mb_count_x: usize, mb_count_y: usize) -> Option<usize> {
    mb_count_y
        .checked_add(PADDING_TILES_PER_COLUMN)?
        .checked_mul(tile_bytes)?
        .checked_mul(mb_count_x)?
        .checked_add(tile_bytes * HEADER_TILES)
}

/// Macroblock grid `(columns, rows)` of a frame. Both dimensions must be
/// multiples of [`MACROBLOCK_SIZE`].
pub fn macroblock_grid(width: usize, height: usize) -> Result<(usize, usize), FrameError> {
    if width % MACROBLOCK_SIZE != 0 || height % MACROBLOCK_SIZE != 0 {
        return Err(FrameError::NotMacroblockAligned { width, height });
    }
    Ok((width / MACROBLOCK_SIZE, height / MACROBLOCK_SIZE))
}

/// Writes the reconstructed `luma`/`chroma` planes of a `width`x`height` frame
/// into `dest` as raster packed 4:2:2. Each chroma row is duplicated onto the
/// two luma rows it covers.
pub fn remap_reconstruction(
    luma: &MacroblockPlane<'_>,
    chroma: &MacroblockPlane<'_>,
    width: usize,
    height: usize,
    dest: &mut FrameBuffer,
) -> Result<(), FrameError> {
    let (mb_count_x, mb_count_y) = macroblock_grid(width, height)?;
    for plane in [luma, chroma] {
        if plane.mb_count_x() != mb_count_x || plane.mb_count_y() != mb_count_y {
            return Err(FrameError::PlaneGeometryMismatch {
                mb_count_x: plane.mb_count_x(),
                mb_count_y: plane.mb_count_y(),
                width,
                height,
            });
        }
    }
    if dest.layout() != PlaneLayout::Packed422 {
        return Err(FrameError::LayoutMismatch {
            expected: PlaneLayout::Packed422,
            actual: dest.layout(),
        });
    }

    // 32 bytes per macroblock across: 16 pixels of 2 bytes.
    let pitch = width.saturating_mul(PACKED_BYTES_PER_PIXEL);
    if dest.line_length() != pitch {
        return Err(FrameError::StrideMismatch {
            line_length: dest.line_length(),
            expected: pitch,
        });
    }
    let frame_bytes = pitch.checked_mul(height).ok_or(FrameError::FrameTooLarge {
        line_length: pitch,
        rows: height,
    })?;
    if dest.capacity() < frame_bytes {
        return Err(FrameError::BufferTooSmall {
            expected: frame_bytes,
            received: dest.capacity(),
        });
    }

    let macroblock_bytes = MACROBLOCK_SIZE * PACKED_BYTES_PER_PIXEL;
    let out = dest.data_mut();
    for i in 0..mb_count_x {
        for j in 0..mb_count_y {
            let origin = j * MACROBLOCK_SIZE * pitch + i * macroblock_bytes;

            for (k, row) in luma.tile(i, j).chunks_exact(MACROBLOCK_SIZE).enumerate() {
                let line = origin + k * pitch;
                for (l, sample) in row.iter().enumerate() {
                    out[line + l * PACKED_BYTES_PER_PIXEL + 1] = *sample;
                }
            }

            for (k, row) in chroma.tile(i, j).chunks_exact(MACROBLOCK_SIZE).enumerate() {
                for line in [origin + 2 * k * pitch, origin + (2 * k + 1) * pitch] {
                    for (l, sample) in row.iter().enumerate() {
                        out[line + l * PACKED_BYTES_PER_PIXEL] = *sample;
                    }
                }
            }
        }
    }

    dest.set_bytes_used(frame_bytes);
    Ok(())
}
