use std::io::{self, Cursor, Read};

use frame_convert::frame::{
    FrameBuffer, FrameError, PlaneLayout, SourceFormat, read_frame, read_packed_422,
    read_planar_420, read_semi_planar_420,
};

const PADDING: u8 = 0xEE;

fn planar_frame(width: usize, height: usize) -> (Vec<u8>, Vec<u8>, Vec<u8>) {
    let luma = (0..width * height).map(|i| (i * 7 % 251) as u8).collect();
    let chroma_len = width / 2 * height / 2;
    let cb = (0..chroma_len).map(|i| (i % 256) as u8).collect();
    let cr = (0..chroma_len).map(|i| 255 - (i % 256) as u8).collect();
    (luma, cb, cr)
}

fn padded_buffer(width: usize, height: usize, line_length: usize, layout: PlaneLayout) -> FrameBuffer {
    let mut buffer = FrameBuffer::with_line_length(width, height, layout, line_length).unwrap();
    buffer.data_mut().fill(PADDING);
    buffer
}

#[test]
fn planar_reader_interleaves_chroma_in_sample_order() {
    let (width, height) = (32, 32);
    let (luma, cb, cr) = planar_frame(width, height);
    let stream = [luma.as_slice(), &cb, &cr].concat();
    let mut dest = FrameBuffer::alloc(width, height, PlaneLayout::SemiPlanar).unwrap();

    read_planar_420(&mut Cursor::new(stream), &mut dest, height).unwrap();

    let chroma_base = dest.chroma_offset();
    for row in 0..height / 2 {
        for col in 0..width / 2 {
            let offset = chroma_base + row * dest.line_length() + col * 2;
            assert_eq!(dest.data()[offset], cb[row * width / 2 + col]);
            assert_eq!(dest.data()[offset + 1], cr[row * width / 2 + col]);
        }
    }
    for row in 0..height {
        let start = row * dest.line_length();
        assert_eq!(
            &dest.data()[start..start + width],
            &luma[row * width..(row + 1) * width]
        );
    }
    assert_eq!(dest.bytes_used(), dest.capacity());
}

#[test]
fn all_zero_planar_frame_fills_whole_buffer() {
    let mut dest = FrameBuffer::with_line_length(16, 16, PlaneLayout::SemiPlanar, 16).unwrap();
    dest.data_mut().fill(0x55);
    let mut stream = Cursor::new(vec![0u8; 384]);

    read_planar_420(&mut stream, &mut dest, 16).unwrap();

    assert_eq!(stream.position(), 384);
    assert_eq!(dest.bytes_used(), dest.capacity());
    assert!(dest.data().iter().all(|byte| *byte == 0));
}

#[test]
fn readers_leave_stride_padding_untouched() {
    let (width, height, line_length) = (24, 16, 32);
    for format in [
        SourceFormat::Planar420,
        SourceFormat::SemiPlanar420,
        SourceFormat::Packed422,
    ] {
        let layout = format.destination_layout();
        let line_length = if layout.is_420() { line_length } else { line_length * 2 };
        let row_bytes = layout.min_line_length(width);
        let frame_bytes = format.frame_bytes(width, height);
        let mut dest = padded_buffer(width, height, line_length, layout);
        let mut stream = Cursor::new(vec![0x11u8; frame_bytes]);

        read_frame(format, &mut stream, &mut dest, height).unwrap();

        assert_eq!(stream.position() as usize, frame_bytes, "{format:?}");
        let mut rows: Vec<usize> = (0..height).map(|row| row * line_length).collect();
        if layout.is_420() {
            let base = dest.chroma_offset();
            rows.extend((0..height / 2).map(|row| base + row * line_length));
        }
        for start in rows {
            let row = &dest.data()[start..start + line_length];
            assert!(row[..row_bytes].iter().all(|b| *b == 0x11), "{format:?}");
            assert!(row[row_bytes..].iter().all(|b| *b == PADDING), "{format:?}");
        }
    }
}

#[test]
fn truncated_stream_reports_short_read_at_every_offset() {
    let (width, height) = (16, 16);
    let frame_bytes = SourceFormat::Planar420.frame_bytes(width, height);
    for format in [SourceFormat::Planar420, SourceFormat::SemiPlanar420] {
        for cut in 0..frame_bytes {
            let mut dest = padded_buffer(width, height, 24, PlaneLayout::SemiPlanar);
            let mut stream = Cursor::new(vec![0x42u8; cut]);
            let err = read_frame(format, &mut stream, &mut dest, height).unwrap_err();
            assert!(err.is_short_read(), "{format:?} cut at {cut}: {err}");
        }
    }

    let packed_bytes = SourceFormat::Packed422.frame_bytes(width, height);
    for cut in (0..packed_bytes).step_by(7) {
        let mut dest = FrameBuffer::alloc(width, height, PlaneLayout::Packed422).unwrap();
        let err = read_packed_422(&mut Cursor::new(vec![0u8; cut]), &mut dest, height)
            .unwrap_err();
        assert!(matches!(err, FrameError::ShortRead { .. }), "cut at {cut}");
    }
}

#[test]
fn short_read_names_the_plane() {
    let mut dest = FrameBuffer::alloc(16, 16, PlaneLayout::SemiPlanar).unwrap();
    let stream = vec![0u8; 256 + 64 + 10];
    let err = read_planar_420(&mut Cursor::new(stream), &mut dest, 16).unwrap_err();
    assert_eq!(err.to_string(), "short read in cr plane at row 1");
}

#[test]
fn semi_planar_reader_copies_chroma_rows() {
    let (width, height) = (16, 16);
    let luma = vec![0x10u8; width * height];
    let chroma: Vec<u8> = (0..width * height / 2).map(|i| i as u8).collect();
    let stream = [luma.as_slice(), &chroma].concat();
    let mut dest = padded_buffer(width, height, 20, PlaneLayout::SemiPlanar);

    read_semi_planar_420(&mut Cursor::new(stream), &mut dest, height).unwrap();

    let base = dest.chroma_offset();
    for row in 0..height / 2 {
        let start = base + row * 20;
        assert_eq!(
            &dest.data()[start..start + width],
            &chroma[row * width..(row + 1) * width]
        );
    }
    assert_eq!(dest.bytes_used(), dest.capacity());
}

#[test]
fn packed_reader_reports_exact_payload() {
    let (width, height) = (16, 8);
    let stream: Vec<u8> = (0..width * height * 2).map(|i| (i % 256) as u8).collect();
    let mut dest = padded_buffer(width, height, 48, PlaneLayout::Packed422);

    read_packed_422(&mut Cursor::new(stream.clone()), &mut dest, height).unwrap();

    assert_eq!(dest.bytes_used(), width * height * 2);
    for row in 0..height {
        assert_eq!(
            &dest.data()[row * 48..row * 48 + 32],
            &stream[row * 32..(row + 1) * 32]
        );
    }
}

#[test]
fn stride_below_row_width_is_rejected() {
    let mut dest = FrameBuffer::new(16, 16, 12, PlaneLayout::SemiPlanar, 12 * 16 * 3 / 2);
    let err = read_semi_planar_420(&mut Cursor::new(vec![0u8; 384]), &mut dest, 16).unwrap_err();
    assert!(matches!(
        err,
        FrameError::StrideTooSmall {
            line_length: 12,
            required: 16
        }
    ));
}

/// Serves `remaining` zero bytes, then fails like a detached device.
struct FailingReader {
    remaining: usize,
}

impl Read for FailingReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device detached"));
        }
        let n = buf.len().min(self.remaining);
        buf[..n].fill(0);
        self.remaining -= n;
        Ok(n)
    }
}

#[test]
fn stream_failure_is_not_a_short_read() {
    for format in [
        SourceFormat::Planar420,
        SourceFormat::SemiPlanar420,
        SourceFormat::Packed422,
    ] {
        let mut dest = FrameBuffer::alloc(16, 16, format.destination_layout()).unwrap();
        let mut reader = FailingReader { remaining: 300 };
        let err = read_frame(format, &mut reader, &mut dest, 16).unwrap_err();
        assert!(!err.is_short_read(), "{format:?}");
        match err {
            FrameError::Io(source) => assert_eq!(source.kind(), io::ErrorKind::BrokenPipe),
            other => panic!("{format:?}: expected an I/O error, got {other}"),
        }
    }
}

#[test]
fn maximal_line_length_is_rejected_not_wrapped() {
    let mut dest = FrameBuffer::new(16, 16, usize::MAX, PlaneLayout::SemiPlanar, 384);
    let mut stream = Cursor::new(vec![0u8; 384]);

    let err = read_semi_planar_420(&mut stream, &mut dest, 16).unwrap_err();

    assert!(matches!(err, FrameError::BufferTooSmall { received: 384, .. }));
    assert_eq!(stream.position(), 0);
    assert!(matches!(
        FrameBuffer::with_line_length(16, 16, PlaneLayout::SemiPlanar, usize::MAX),
        Err(FrameError::FrameTooLarge { .. })
    ));
}
