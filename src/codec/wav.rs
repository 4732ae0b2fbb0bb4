use std::{
    fmt,
    fs::File,
    io::{self, BufReader, Read, Seek, Write},
    path::Path,
};

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const FORMAT_PCM: u16 = 1;
pub const FORMAT_IEEE_FLOAT: u16 = 3;

/// size of the canonical RIFF/WAVE header this crate writes
pub const CANONICAL_HEADER_LEN: u64 = 44;

/// files smaller than this can't hold a header plus one sample
const MIN_FILE_LEN: u64 = 45;

/// # Description
/// The `fmt ` chunk fields plus the size of the `data` chunk.
/// ## Comments
/// - embedded verbatim in every encoded image header so the original audio format survives the trip
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WavHeader {
    pub audio_format: u16,
    pub channels: u16,
    pub sample_rate: u32,
    pub byte_rate: u32,
    pub block_align: u16,
    pub bits_per_sample: u16,
    /// size of the sample data in bytes
    pub data_size: u32,
}

fn byte_rate(sample_rate: u32, block_align: u16) -> Result<u32> {
    sample_rate.checked_mul(block_align as u32).ok_or_else(|| {
        Error::InvalidWav(format!(
            "{} Hz with {} byte frames overflows the byte rate",
            sample_rate, block_align
        ))
    })
}

impl WavHeader {
    /// builds a consistent header for `total_samples` sample frames
    pub fn new(
        audio_format: u16,
        channels: u16,
        sample_rate: u32,
        bits_per_sample: u16,
        total_samples: u64,
    ) -> Result<Self> {
        let block_align = channels * (bits_per_sample / 8);
        Ok(Self {
            audio_format,
            channels,
            sample_rate,
            byte_rate: byte_rate(sample_rate, block_align)?,
            block_align,
            bits_per_sample,
            data_size: (total_samples * block_align as u64).min(u32::MAX as u64) as u32,
        })
    }

    /// sample frames in the data chunk (one frame = one sample per channel)
    pub fn total_samples(&self) -> u64 {
        if self.block_align == 0 {
            return 0;
        }
        self.data_size as u64 / self.block_align as u64
    }

    pub fn bytes_per_sample(&self) -> usize {
        self.bits_per_sample as usize / 8
    }

    pub fn is_float(&self) -> bool {
        self.audio_format == FORMAT_IEEE_FLOAT
    }

    /// the same stream re-described as 32-bit IEEE float
    pub fn as_float32(&self) -> Result<WavHeader> {
        let block_align = self.channels as u64 * 4;
        let data_size = self.total_samples() * block_align;
        let data_size = u32::try_from(data_size).map_err(|_| {
            Error::InvalidWav(format!(
                "{} bytes of float samples do not fit in a wav file",
                data_size
            ))
        })?;
        Ok(WavHeader {
            audio_format: FORMAT_IEEE_FLOAT,
            channels: self.channels,
            sample_rate: self.sample_rate,
            byte_rate: byte_rate(self.sample_rate, block_align as u16)?,
            block_align: block_align as u16,
            bits_per_sample: 32,
            data_size,
        })
    }

    fn validate(&self) -> Result<()> {
        if self.channels == 0 || self.channels > 2 {
            return Err(Error::UnsupportedChannelCount(self.channels));
        }
        match (self.audio_format, self.bits_per_sample) {
            (FORMAT_IEEE_FLOAT, 32) => {}
            (FORMAT_IEEE_FLOAT, bits) => return Err(Error::UnsupportedBitDepth(bits)),
            (_, 8) | (_, 16) | (_, 24) | (_, 32) => {}
            (_, bits) => return Err(Error::UnsupportedBitDepth(bits)),
        }
        if self.block_align as usize != self.channels as usize * self.bytes_per_sample() {
            return Err(Error::InvalidWav(format!(
                "block align {} does not match {} channels of {} bits",
                self.block_align, self.channels, self.bits_per_sample
            )));
        }
        byte_rate(self.sample_rate, self.block_align)?;
        Ok(())
    }

    /// writes the canonical 44 byte header
    pub fn write_to<W: Write>(&self, dst: &mut W) -> io::Result<()> {
        dst.write_all(b"RIFF")?;
        dst.write_u32::<LittleEndian>(self.data_size.saturating_add(36))?;
        dst.write_all(b"WAVE")?;
        dst.write_all(b"fmt ")?;
        dst.write_u32::<LittleEndian>(16)?;
        dst.write_u16::<LittleEndian>(self.audio_format)?;
        dst.write_u16::<LittleEndian>(self.channels)?;
        dst.write_u32::<LittleEndian>(self.sample_rate)?;
        dst.write_u32::<LittleEndian>(self.byte_rate)?;
        dst.write_u16::<LittleEndian>(self.block_align)?;
        dst.write_u16::<LittleEndian>(self.bits_per_sample)?;
        dst.write_all(b"data")?;
        dst.write_u32::<LittleEndian>(self.data_size)
    }

    /// # Description
    /// Walks the RIFF chunk list up to the start of the `data` chunk
    /// ## Comments
    /// - unknown chunks (`LIST`, `fact`, ...) are skipped, odd sized chunks are padded
    /// - extended `fmt ` chunks (size > 16) are accepted, the extension is ignored
    pub fn read_from<R: Read>(src: &mut R) -> Result<Self> {
        let mut riff = [0u8; 12];
        src.read_exact(&mut riff)?;
        if &riff[0..4] != b"RIFF" || &riff[8..12] != b"WAVE" {
            return Err(Error::InvalidWav("missing RIFF/WAVE magic".into()));
        }

        let mut format: Option<WavHeader> = None;
        loop {
            let mut id = [0u8; 4];
            match src.read_exact(&mut id) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    return Err(Error::InvalidWav("no data chunk found".into()))
                }
                Err(e) => return Err(e.into()),
            }
            let size = src.read_u32::<LittleEndian>()?;

            match &id {
                b"fmt " => {
                    if size < 16 {
                        return Err(Error::InvalidWav(format!("fmt chunk is {} bytes", size)));
                    }
                    format = Some(WavHeader {
                        audio_format: src.read_u16::<LittleEndian>()?,
                        channels: src.read_u16::<LittleEndian>()?,
                        sample_rate: src.read_u32::<LittleEndian>()?,
                        byte_rate: src.read_u32::<LittleEndian>()?,
                        block_align: src.read_u16::<LittleEndian>()?,
                        bits_per_sample: src.read_u16::<LittleEndian>()?,
                        data_size: 0,
                    });
                    skip(src, padded(size) - 16)?;
                }
                b"data" => {
                    let mut header = format
                        .ok_or_else(|| Error::InvalidWav("data chunk before fmt chunk".into()))?;
                    header.data_size = size;
                    header.validate()?;
                    return Ok(header);
                }
                _ => skip(src, padded(size))?,
            }
        }
    }
}

impl fmt::Display for WavHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.is_float() { "float" } else { "pcm" };
        write!(
            f,
            "{} Hz, {} channel(s), {}-bit {}, {} samples",
            self.sample_rate,
            self.channels,
            self.bits_per_sample,
            kind,
            self.total_samples()
        )
    }
}

fn padded(size: u32) -> u64 {
    size as u64 + (size & 1) as u64
}

fn skip<R: Read>(src: &mut R, len: u64) -> Result<()> {
    let skipped = io::copy(&mut src.take(len), &mut io::sink())?;
    if skipped != len {
        return Err(Error::InvalidWav("truncated chunk".into()));
    }
    Ok(())
}

/// # Description
/// Streams a wav file in fixed size blocks, split per channel and normalized to `[-1,1]`
/// ## Comments
/// - the last block is zero padded
/// - samples are read `block_count` blocks at a time with [`WavReader::buffer`] and fetched
/// with [`WavReader::buffered_block`]
pub struct WavReader<R = BufReader<File>> {
    src: R,
    header: WavHeader,
    samples_read: u64,
    raw: Vec<u8>,
    /// one deinterleaved buffer per channel
    channels: Vec<Vec<f32>>,
    block_len: usize,
    blocks_buffered: usize,
}

impl WavReader<BufReader<File>> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();
        if file_len < MIN_FILE_LEN {
            return Err(Error::InvalidWav(format!(
                "file is {} bytes, too small to hold any audio",
                file_len
            )));
        }
        let mut reader = Self::new(BufReader::with_capacity(1 << 16, file))?;
        let data_start = reader.src.stream_position()?;
        if data_start + reader.header.data_size as u64 > file_len {
            return Err(Error::InvalidWav(format!(
                "data chunk claims {} bytes but only {} follow the header",
                reader.header.data_size,
                file_len - data_start.min(file_len)
            )));
        }
        Ok(reader)
    }
}

impl<R: Read> WavReader<R> {
    pub fn new(mut src: R) -> Result<Self> {
        let header = WavHeader::read_from(&mut src)?;
        let channels = (0..header.channels).map(|_| Vec::new()).collect();
        Ok(Self {
            src,
            header,
            samples_read: 0,
            raw: Vec::new(),
            channels,
            block_len: 0,
            blocks_buffered: 0,
        })
    }

    pub fn header(&self) -> &WavHeader {
        &self.header
    }

    pub fn channels(&self) -> usize {
        self.header.channels as usize
    }

    pub fn total_samples(&self) -> u64 {
        self.header.total_samples()
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.samples_read >= self.total_samples()
    }

    /// # Description
    /// Reads up to `block_count` blocks of `block_len` sample frames into the internal buffers.
    /// Returns the number of blocks now buffered.
    /// ## Comments
    /// - returns 0 once the stream is exhausted
    /// - running out of bytes before the declared data size is an error
    pub fn buffer(&mut self, block_len: usize, block_count: usize) -> Result<usize> {
        let remaining = self.total_samples() - self.samples_read.min(self.total_samples());
        let wanted = (block_len * block_count) as u64;
        let frames = remaining.min(wanted) as usize;

        let frame_bytes = self.header.block_align as usize;
        self.raw.resize(frames * frame_bytes, 0);
        let got = read_full(&mut self.src, &mut self.raw)?;
        if got < self.raw.len() {
            return Err(Error::InvalidWav(format!(
                "sample data ends after {} of {} samples",
                self.samples_read + (got / frame_bytes) as u64,
                self.total_samples()
            )));
        }
        self.samples_read += frames as u64;

        let blocks = (frames + block_len - 1) / block_len;
        self.block_len = block_len;
        self.blocks_buffered = blocks;
        for channel in self.channels.iter_mut() {
            channel.clear();
            channel.resize(blocks * block_len, 0.0);
        }
        self.deinterleave(frames);
        Ok(blocks)
    }

    /// a block previously loaded by [`WavReader::buffer`]
    pub fn buffered_block(&self, channel: usize, block: usize) -> &[f32] {
        let start = block * self.block_len;
        &self.channels[channel][start..start + self.block_len]
    }

    pub fn blocks_buffered(&self) -> usize {
        self.blocks_buffered
    }

    fn deinterleave(&mut self, frames: usize) {
        let width = self.header.bytes_per_sample();
        let frame_bytes = self.header.block_align as usize;
        let decode: fn(&[u8]) -> f32 = match (self.header.is_float(), width) {
            (true, _) => |b| LittleEndian::read_f32(b),
            (false, 1) => |b| (b[0] as f32 - 128.0) / 128.0,
            (false, 2) => |b| LittleEndian::read_i16(b) as f32 / 32768.0,
            (false, 3) => |b| LittleEndian::read_i24(b) as f32 / 8388608.0,
            (false, _) => |b| (LittleEndian::read_i32(b) as f64 / 2147483648.0) as f32,
        };

        for (k, frame) in self.raw[..frames * frame_bytes]
            .chunks_exact(frame_bytes)
            .enumerate()
        {
            for (channel, sample) in self.channels.iter_mut().zip(frame.chunks_exact(width)) {
                channel[k] = decode(sample);
            }
        }
    }
}

/// like `read_exact` but a short read is not an error
fn read_full<R: Read>(src: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match src.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// # Description
/// Writes interleaved `[-1,1]` samples in whatever format `header` describes
/// ## Comments
/// - the header is written up front, `header.data_size` must already be final
pub struct WavWriter<W: Write> {
    dst: W,
    header: WavHeader,
}

impl<W: Write> WavWriter<W> {
    pub fn new(mut dst: W, header: WavHeader) -> Result<Self> {
        header.validate()?;
        header.write_to(&mut dst)?;
        Ok(Self { dst, header })
    }

    pub fn header(&self) -> &WavHeader {
        &self.header
    }

    /// writes interleaved samples
    pub fn write_samples(&mut self, samples: &[f32]) -> Result<()> {
        let dst = &mut self.dst;
        match (self.header.is_float(), self.header.bytes_per_sample()) {
            (true, _) => {
                for &s in samples {
                    dst.write_f32::<LittleEndian>(s)?;
                }
            }
            (false, 1) => {
                for &s in samples {
                    dst.write_u8((s * 128.0 + 128.0).clamp(0.0, 255.0) as u8)?;
                }
            }
            (false, 2) => {
                for &s in samples {
                    dst.write_i16::<LittleEndian>((s * 32768.0).clamp(-32768.0, 32767.0) as i16)?;
                }
            }
            (false, 3) => {
                for &s in samples {
                    let v = (s * 8388608.0).clamp(-8388608.0, 8388607.0) as i32;
                    dst.write_i24::<LittleEndian>(v)?;
                }
            }
            (false, _) => {
                for &s in samples {
                    let v = (s as f64 * 2147483648.0).clamp(-2147483648.0, 2147483647.0) as i32;
                    dst.write_i32::<LittleEndian>(v)?;
                }
            }
        }
        Ok(())
    }

    pub fn write_silence(&mut self, samples: u64) -> Result<()> {
        let zeros = [0.0f32; 1024];
        let mut remaining = samples;
        while remaining > 0 {
            let n = remaining.min(zeros.len() as u64) as usize;
            self.write_samples(&zeros[..n])?;
            remaining -= n as u64;
        }
        Ok(())
    }

    /// flushes and hands back the sink
    pub fn finish(mut self) -> Result<W> {
        self.dst.flush()?;
        Ok(self.dst)
    }
}
