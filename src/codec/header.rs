use std::{
    fmt,
    fs::File,
    io::{self, BufReader, Read, Write},
    path::Path,
};

use serde::{Deserialize, Serialize};

use super::{wav::WavHeader, PIXEL_BYTES};
use crate::{
    error::{Error, Result},
    math::{Compander, CompandingMethod, WindowShape},
};

pub const MAGIC_NUMBER: u32 = 0x42069AB6;
pub const HEADER_VERSION: u32 = 1;

/// # Description
/// Everything that controls how audio is turned into an image.
/// ## Comments
/// - immutable for the duration of a run, every worker gets its own copy
/// - stored verbatim in each encoded image so decoding needs no extra input
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConverterSettings {
    /// samples per analysis frame, a power of two
    pub block_size: u32,
    pub companding: CompandingMethod,
    pub window: WindowShape,
    pub companding_params: [f32; 2],
    /// replace existing output files instead of failing
    pub force_overwrite: bool,
}

impl Default for ConverterSettings {
    fn default() -> Self {
        Self {
            block_size: 2048,
            companding: CompandingMethod::UvLaw,
            window: WindowShape::BlackmanHarris,
            companding_params: [768.0, 0.125],
            force_overwrite: false,
        }
    }
}

impl ConverterSettings {
    pub fn with_block_size(mut self, block_size: u32) -> Self {
        self.block_size = block_size;
        self
    }

    /// selects `method` together with its default parameters
    pub fn with_companding(mut self, method: CompandingMethod) -> Self {
        self.companding = method;
        self.companding_params = method.default_params();
        self
    }

    pub fn with_companding_params(mut self, params: [f32; 2]) -> Self {
        self.companding_params = params;
        self
    }

    pub fn with_window(mut self, window: WindowShape) -> Self {
        self.window = window;
        self
    }

    pub fn with_force_overwrite(mut self, force_overwrite: bool) -> Self {
        self.force_overwrite = force_overwrite;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.block_size.is_power_of_two() || self.block_size < 4 {
            return Err(Error::InvalidBlockSize(self.block_size));
        }
        Ok(())
    }

    /// distance between consecutive analysis frames
    pub fn hop(&self) -> u32 {
        self.block_size / 2
    }

    /// pixels per scanline
    pub fn bins(&self) -> usize {
        self.block_size as usize / 2 + 1
    }

    pub fn compander(&self) -> Compander {
        Compander::new(self.companding, self.companding_params)
    }
}

/// # Description
/// Fixed-size record at the start of every encoded channel file
/// ## Comments
/// - serialized with bincode (fixed-width little-endian ints), so every header of a given
/// version has the same length
/// - `header_size` may be larger than the encoded length, the extra bytes are skipped when reading
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImageFileHeader {
    pub magic: u32,
    pub version: u32,
    pub header_size: u32,
    pub settings: ConverterSettings,
    pub source: WavHeader,
}

impl ImageFileHeader {
    pub fn new(settings: ConverterSettings, source: WavHeader) -> Result<Self> {
        let mut header = Self {
            magic: MAGIC_NUMBER,
            version: HEADER_VERSION,
            header_size: 0,
            settings,
            source,
        };
        header.header_size = Self::encoded_len()? as u32;
        Ok(header)
    }

    /// number of bytes the current header version occupies on disk
    pub fn encoded_len() -> Result<u64> {
        let blank = Self {
            magic: MAGIC_NUMBER,
            version: HEADER_VERSION,
            header_size: 0,
            settings: ConverterSettings::default(),
            source: WavHeader::default(),
        };
        Ok(bincode::serialized_size(&blank)?)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn write_to<W: Write>(&self, dst: &mut W) -> Result<()> {
        dst.write_all(&self.to_bytes()?)?;
        Ok(())
    }

    /// reads and validates a header, leaving `src` positioned at the first scanline
    pub fn read_from<R: Read>(src: &mut R) -> Result<Self> {
        let header: Self = bincode::deserialize_from(&mut *src)?;
        if header.magic != MAGIC_NUMBER {
            return Err(Error::InvalidImage(format!(
                "magic number {:#010x} does not match {:#010x}",
                header.magic, MAGIC_NUMBER
            )));
        }
        if header.version != HEADER_VERSION {
            return Err(Error::InvalidImage(format!(
                "unsupported header version {}",
                header.version
            )));
        }
        let encoded_len = Self::encoded_len()?;
        let declared_len = header.header_size as u64;
        if declared_len < encoded_len {
            return Err(Error::InvalidImage(format!(
                "header size {} is smaller than the {} bytes it occupies",
                declared_len, encoded_len
            )));
        }
        io::copy(&mut src.take(declared_len - encoded_len), &mut io::sink())?;
        Ok(header)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut reader = BufReader::new(File::open(path)?);
        Self::read_from(&mut reader)
    }

    pub fn layout(&self, height: u64) -> RawImageLayout {
        RawImageLayout {
            header_size: self.header_size as u64,
            width: self.settings.bins() as u64,
            height,
        }
    }
}

/// # Description
/// What an image editor needs to know to open an encoded channel file as a raw image
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RawImageLayout {
    pub header_size: u64,
    pub width: u64,
    pub height: u64,
}

impl RawImageLayout {
    /// exact size of the file in bytes
    pub fn file_size(&self) -> u64 {
        self.header_size + self.width * self.height * PIXEL_BYTES as u64
    }
}

impl fmt::Display for RawImageLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Header size: {} bytes (keep the header when saving)",
            self.header_size
        )?;
        writeln!(f, "Byte order: little-endian (IBM PC, Intel)")?;
        writeln!(f, "Channels: 3 (interleaved)")?;
        writeln!(f, "Depth: R16G16B16 (48bpp)")?;
        write!(f, "Dimensions: {}x{}", self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample_header() -> ImageFileHeader {
        let settings = ConverterSettings::default()
            .with_block_size(1024)
            .with_companding(CompandingMethod::MuLaw)
            .with_companding_params([63.5, 0.1])
            .with_window(WindowShape::Hamming)
            .with_force_overwrite(true);
        let source = WavHeader::new(1, 2, 48000, 24, 123_457).unwrap();
        ImageFileHeader::new(settings, source).unwrap()
    }

    #[test]
    fn header_round_trip_is_bit_exact() {
        let header = sample_header();
        let bytes = header.to_bytes().unwrap();
        assert_eq!(header.header_size as usize, bytes.len());
        assert_eq!(ImageFileHeader::encoded_len().unwrap(), bytes.len() as u64);

        let decoded = ImageFileHeader::read_from(&mut Cursor::new(&bytes)).unwrap();
        assert_eq!(header, decoded);
        assert_eq!(
            header.settings.companding_params[1].to_bits(),
            decoded.settings.companding_params[1].to_bits()
        );
        assert_eq!(bytes, decoded.to_bytes().unwrap());
        assert_eq!(123_457, decoded.source.total_samples());
    }

    #[test]
    fn header_size_does_not_depend_on_content() {
        let a = ImageFileHeader::new(ConverterSettings::default(), WavHeader::default()).unwrap();
        let b = sample_header();
        assert_eq!(a.header_size, b.header_size);
    }

    #[test]
    fn reader_skips_extended_header_bytes() {
        let mut header = sample_header();
        header.header_size += 16;
        let mut bytes = header.to_bytes().unwrap();
        bytes.extend_from_slice(&[0xAA; 16]);
        bytes.extend_from_slice(&[1, 2, 3]);

        let mut cursor = Cursor::new(&bytes);
        let decoded = ImageFileHeader::read_from(&mut cursor).unwrap();
        assert_eq!(header, decoded);
        assert_eq!(header.header_size as u64, cursor.position());
    }

    #[test]
    fn rejects_foreign_or_corrupt_headers() {
        let mut header = sample_header();
        header.magic = 0xDEADBEEF;
        let bytes = header.to_bytes().unwrap();
        assert!(matches!(
            ImageFileHeader::read_from(&mut Cursor::new(&bytes)),
            Err(Error::InvalidImage(_))
        ));

        let mut header = sample_header();
        header.version = 2;
        let bytes = header.to_bytes().unwrap();
        assert!(matches!(
            ImageFileHeader::read_from(&mut Cursor::new(&bytes)),
            Err(Error::InvalidImage(_))
        ));

        let mut header = sample_header();
        header.header_size = 4;
        let bytes = header.to_bytes().unwrap();
        assert!(matches!(
            ImageFileHeader::read_from(&mut Cursor::new(&bytes)),
            Err(Error::InvalidImage(_))
        ));

        let bytes = sample_header().to_bytes().unwrap();
        assert!(matches!(
            ImageFileHeader::read_from(&mut Cursor::new(&bytes[..10])),
            Err(Error::Header(_))
        ));
    }

    #[test]
    fn unknown_companding_id_is_fatal() {
        let mut bytes = sample_header().to_bytes().unwrap();
        // magic, version, header size, block size, then the companding id
        bytes[16..20].copy_from_slice(&99u32.to_le_bytes());
        assert!(matches!(
            ImageFileHeader::read_from(&mut Cursor::new(&bytes)),
            Err(Error::Header(_))
        ));
    }

    #[test]
    fn unknown_window_id_decodes_as_rectangular() {
        let mut bytes = sample_header().to_bytes().unwrap();
        bytes[20..24].copy_from_slice(&77u32.to_le_bytes());
        let decoded = ImageFileHeader::read_from(&mut Cursor::new(&bytes)).unwrap();
        assert_eq!(WindowShape::Rectangular, decoded.settings.window);
    }

    #[test]
    fn settings_validation() {
        assert!(ConverterSettings::default().validate().is_ok());
        for bad in [0, 2, 3, 1000, 2047] {
            assert!(matches!(
                ConverterSettings::default().with_block_size(bad).validate(),
                Err(Error::InvalidBlockSize(_))
            ));
        }
        let settings = ConverterSettings::default();
        assert_eq!(1024, settings.hop());
        assert_eq!(1025, settings.bins());
    }

    #[test]
    fn layout_reports_exact_file_size() {
        let header = sample_header();
        let layout = header.layout(10);
        assert_eq!(513, layout.width);
        assert_eq!(
            header.header_size as u64 + 10 * 513 * 6,
            layout.file_size()
        );
        assert!(layout.to_string().contains("Dimensions: 513x10"));
    }
}
