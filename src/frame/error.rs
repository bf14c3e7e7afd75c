use std::fmt;
use std::io;

use thiserror::Error;

use crate::frame::PlaneLayout;

/// Portion of a frame a reader was filling when the stream ran dry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plane {
    Luma,
    Cb,
    Cr,
    Chroma,
    Packed,
}

impl fmt::Display for Plane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Plane::Luma => "luma",
            Plane::Cb => "cb",
            Plane::Cr => "cr",
            Plane::Chroma => "cbcr",
            Plane::Packed => "packed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Error)]
pub enum FrameError {
    /// The source stream ended before the frame layout was filled.
    #[error("short read in {plane} plane at row {row}")]
    ShortRead { plane: Plane, row: usize },
    #[error("stream read failed: {0}")]
    Io(#[source] io::Error),
    #[error("destination layout mismatch: expected {expected:?}, got {actual:?}")]
    LayoutMismatch {
        expected: PlaneLayout,
        actual: PlaneLayout,
    },
    #[error("buffer must hold at least {expected} bytes but it holds {received}")]
    BufferTooSmall { expected: usize, received: usize },
    #[error("line length {line_length} is below the {required} bytes a row needs")]
    StrideTooSmall { line_length: usize, required: usize },
    #[error("line length {line_length} does not match the {expected} byte raster pitch")]
    StrideMismatch { line_length: usize, expected: usize },
    #[error("{rows} rows of {line_length} bytes overflow the addressable frame size")]
    FrameTooLarge { line_length: usize, rows: usize },
    #[error("{width}x{height} is not a whole number of 16x16 macroblocks")]
    NotMacroblockAligned { width: usize, height: usize },
    #[error(
        "macroblock grid {mb_count_x}x{mb_count_y} does not match {width}x{height} frame"
    )]
    PlaneGeometryMismatch {
        mb_count_x: usize,
        mb_count_y: usize,
        width: usize,
        height: usize,
    },
}

impl FrameError {
    /// Maps a failed `read_exact` into the frame error taxonomy.
    pub(crate) fn from_read(err: io::Error, plane: Plane, row: usize) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            FrameError::ShortRead { plane, row }
        } else {
            FrameError::Io(err)
        }
    }

    pub fn is_short_read(&self) -> bool {
        matches!(self, FrameError::ShortRead { .. })
    }
}
