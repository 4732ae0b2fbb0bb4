use std::io::{self, Write};

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};

pub mod backward;
pub mod files;
pub mod forward;
pub mod header;
pub mod scanline;
pub mod wav;

pub use backward::{BackwardConverter, BackwardWorker};
pub use forward::{EncodeSummary, ForwardConverter, ForwardWorker};
pub use header::{ConverterSettings, ImageFileHeader, RawImageLayout};
pub use scanline::ScanlineCache;
pub use wav::{WavHeader, WavReader, WavWriter};

/// size of one [`Pixel`] on disk
pub const PIXEL_BYTES: usize = 6;

/// # Description
/// One FFT bin of one analysis frame, stored as three little-endian `u16`s (R, G, B)
/// ## Comments
/// - `real`/`imag` hold the unit phase vector mapped linearly from `[-1,1]`
/// - `magnitude` holds the companded magnitude
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Pixel {
    pub real: u16,
    pub magnitude: u16,
    pub imag: u16,
}

impl Pixel {
    pub fn write_row<W: Write>(row: &[Pixel], dst: &mut W) -> io::Result<()> {
        for p in row {
            dst.write_u16::<LittleEndian>(p.real)?;
            dst.write_u16::<LittleEndian>(p.magnitude)?;
            dst.write_u16::<LittleEndian>(p.imag)?;
        }
        Ok(())
    }

    /// decodes `row.len()` pixels from `bytes`
    pub fn decode_row(bytes: &[u8], row: &mut [Pixel]) {
        for (p, raw) in row.iter_mut().zip(bytes.chunks_exact(PIXEL_BYTES)) {
            p.real = LittleEndian::read_u16(&raw[0..2]);
            p.magnitude = LittleEndian::read_u16(&raw[2..4]);
            p.imag = LittleEndian::read_u16(&raw[4..6]);
        }
    }
}

/// number of analysis frames (image rows) needed to cover `total_samples` at stride `hop`
pub fn frame_count(total_samples: u64, hop: u32) -> u64 {
    let hop = hop as u64;
    (total_samples + hop - 1) / hop
}

#[cfg(test)]
mod tests {
    use super::{frame_count, Pixel, PIXEL_BYTES};

    #[test]
    fn pixels_are_little_endian_rgb() {
        let row = [
            Pixel {
                real: 0x0102,
                magnitude: 0x0304,
                imag: 0x0506,
            },
            Pixel {
                real: 0xffff,
                magnitude: 0,
                imag: 0x8000,
            },
        ];
        let mut bytes = Vec::new();
        Pixel::write_row(&row, &mut bytes).unwrap();
        assert_eq!(2 * PIXEL_BYTES, bytes.len());
        assert_eq!(&[0x02, 0x01, 0x04, 0x03, 0x06, 0x05], &bytes[0..6]);

        let mut decoded = [Pixel::default(); 2];
        Pixel::decode_row(&bytes, &mut decoded);
        assert_eq!(row, decoded);
    }

    #[test]
    fn frame_count_rounds_up() {
        assert_eq!(0, frame_count(0, 1024));
        assert_eq!(1, frame_count(1, 1024));
        assert_eq!(1, frame_count(1024, 1024));
        assert_eq!(2, frame_count(1025, 1024));
        // 4 seconds at 44.1kHz
        assert_eq!(173, frame_count(176_400, 1024));
    }
}
