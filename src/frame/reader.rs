//! Stream readers that fill stride-padded hardware input buffers.
//!
//! Each reader consumes exactly one frame from the stream, writes only the
//! visible `width` bytes of every row, and leaves the padding up to
//! `line_length` untouched.

use std::io::Read;

use tracing::debug;

use crate::frame::{FrameBuffer, FrameError, PACKED_BYTES_PER_PIXEL, Plane, PlaneLayout};

/// Reads an I420 frame (Y, Cb, Cr planes) into a semi-planar buffer,
/// interleaving Cb into the even and Cr into the odd chroma bytes.
pub fn read_planar_420<R: Read>(
    reader: &mut R,
    dest: &mut FrameBuffer,
    image_height: usize,
) -> Result<(), FrameError> {
    check_420_destination(dest, image_height)?;
    read_luma(reader, dest, image_height)?;

    let width = dest.width();
    let line_length = dest.line_length();
    let chroma_base = dest.chroma_offset();
    let chroma_rows = image_height / 2;

    // Cb lands on columns 0, 2, 4..; Cr on 1, 3, 5..
    for (plane, first_column) in [(Plane::Cb, 0), (Plane::Cr, 1)] {
        let mut samples = vec![0u8; width.saturating_sub(first_column).div_ceil(2)];
        for row in 0..chroma_rows {
            reader
                .read_exact(&mut samples)
                .map_err(|err| FrameError::from_read(err, plane, row))?;
            let start = chroma_base + row * line_length;
            let chroma_row = &mut dest.data_mut()[start..start + width];
            for (sample, slot) in samples
                .iter()
                .zip(chroma_row.iter_mut().skip(first_column).step_by(2))
            {
                *slot = *sample;
            }
        }
    }

    debug!(
        payload_bytes = width * 3 / 2 * image_height,
        width,
        height = image_height,
        "Read planar 4:2:0 frame"
    );
    let capacity = dest.capacity();
    dest.set_bytes_used(capacity);
    Ok(())
}

/// Reads an NV12 frame (Y plane, interleaved CbCr plane) into a buffer of the
/// same layout.
pub fn read_semi_planar_420<R: Read>(
    reader: &mut R,
    dest: &mut FrameBuffer,
    image_height: usize,
) -> Result<(), FrameError> {
    check_420_destination(dest, image_height)?;
    read_luma(reader, dest, image_height)?;

    let width = dest.width();
    let chroma_base = dest.chroma_offset();
    read_rows(
        reader,
        dest,
        chroma_base,
        width,
        image_height / 2,
        Plane::Chroma,
    )?;

    debug!(
        payload_bytes = width * 3 / 2 * image_height,
        width,
        height = image_height,
        "Read semi-planar 4:2:0 frame"
    );
    let capacity = dest.capacity();
    dest.set_bytes_used(capacity);
    Ok(())
}

/// Reads a packed chroma-first 4:2:2 frame into a packed buffer. Unlike the
/// 4:2:0 readers, `bytes_used` is the exact payload without stride padding.
pub fn read_packed_422<R: Read>(
    reader: &mut R,
    dest: &mut FrameBuffer,
    image_height: usize,
) -> Result<(), FrameError> {
    expect_layout(dest, PlaneLayout::Packed422)?;
    let row_bytes = dest.width() * PACKED_BYTES_PER_PIXEL;
    check_rows(dest, 0, row_bytes, image_height)?;

    read_rows(reader, dest, 0, row_bytes, image_height, Plane::Packed)?;

    let width = dest.width();
    debug!(
        payload_bytes = row_bytes * image_height,
        width,
        height = image_height,
        "Read packed 4:2:2 frame"
    );
    dest.set_bytes_used(row_bytes * image_height);
    Ok(())
}

fn read_luma<R: Read>(
    reader: &mut R,
    dest: &mut FrameBuffer,
    image_height: usize,
) -> Result<(), FrameError> {
    let width = dest.width();
    read_rows(reader, dest, 0, width, image_height, Plane::Luma)
}

/// Reads `rows` runs of `row_bytes`, starting at `base` and advancing by the
/// buffer's line length.
fn read_rows<R: Read>(
    reader: &mut R,
    dest: &mut FrameBuffer,
    base: usize,
    row_bytes: usize,
    rows: usize,
    plane: Plane,
) -> Result<(), FrameError> {
    let line_length = dest.line_length();
    for row in 0..rows {
        let start = base + row * line_length;
        reader
            .read_exact(&mut dest.data_mut()[start..start + row_bytes])
            .map_err(|err| FrameError::from_read(err, plane, row))?;
    }
    Ok(())
}

fn expect_layout(dest: &FrameBuffer, expected: PlaneLayout) -> Result<(), FrameError> {
    if dest.layout() != expected {
        return Err(FrameError::LayoutMismatch {
            expected,
            actual: dest.layout(),
        });
    }
    Ok(())
}

fn check_420_destination(dest: &FrameBuffer, image_height: usize) -> Result<(), FrameError> {
    expect_layout(dest, PlaneLayout::SemiPlanar)?;
    let width = dest.width();
    check_rows(dest, 0, width, image_height)?;
    check_rows(dest, dest.chroma_offset(), width, image_height / 2)
}

/// Verifies `rows` rows of `row_bytes` starting at `base` fit in the buffer.
/// An end offset that overflows `usize` is reported as too small a buffer.
fn check_rows(
    dest: &FrameBuffer,
    base: usize,
    row_bytes: usize,
    rows: usize,
) -> Result<(), FrameError> {
    if dest.line_length() < row_bytes {
        return Err(FrameError::StrideTooSmall {
            line_length: dest.line_length(),
            required: row_bytes,
        });
    }
    if rows == 0 {
        return Ok(());
    }
    let end = (rows - 1)
        .checked_mul(dest.line_length())
        .and_then(|offset| offset.checked_add(base))
        .and_then(|offset| offset.checked_add(row_bytes));
    match end {
        Some(end) if end <= dest.capacity() => Ok(()),
        _ => Err(FrameError::BufferTooSmall {
            expected: end.unwrap_or(usize::MAX),
            received: dest.capacity(),
        }),
    }
}
