use std::{
    fs::File,
    io::{BufWriter, Read},
    path::{Path, PathBuf},
    sync::Arc,
};

use rayon::prelude::*;
use realfft::{num_complex::Complex, ComplexToReal, RealFftPlanner};

use super::{
    files::{decoded_file_name, find_channel_files, preallocate},
    frame_count,
    header::{ConverterSettings, ImageFileHeader},
    scanline::ScanlineCache,
    wav::{WavHeader, WavWriter, CANONICAL_HEADER_LEN},
    Pixel,
};
use crate::{
    error::{Error, Result},
    math::{overlap_add_normalization, Compander},
};

/// forward scaling (`2/N`) followed by the unnormalized inverse (`N`) leaves a factor of 2
const SYNTHESIS_GAIN: f32 = 0.5;

fn dequantize_phase(code: u16) -> f32 {
    (code as f32 - 32768.0) / 32768.0
}

/// # Description
/// Rebuilds audio from three neighbouring scanlines at a time.
/// ## Comments
/// - every odd center row yields `block_size` samples, so walking centers 1, 3, 5, ... covers
/// the whole signal without overlap
/// - rows outside the image count as silence
pub struct BackwardWorker {
    ifft: Arc<dyn ComplexToReal<f32>>,
    compander: Arc<Compander>,
    window: Vec<f32>,
    normalization: Vec<f32>,
    line: Vec<Pixel>,
    codes: Vec<u16>,
    magnitude: Vec<f32>,
    spectrum: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    /// synthesized frames of the previous, center and next rows
    frames: [Vec<f32>; 3],
}

impl BackwardWorker {
    pub fn new(settings: &ConverterSettings, compander: Arc<Compander>) -> Self {
        let block_size = settings.block_size as usize;
        let ifft = RealFftPlanner::<f32>::new().plan_fft_inverse(block_size);
        let spectrum = ifft.make_input_vec();
        let scratch = ifft.make_scratch_vec();
        let bins = spectrum.len();
        let window = settings.window.make(block_size);
        Self {
            normalization: overlap_add_normalization(&window),
            window,
            ifft,
            compander,
            line: vec![Pixel::default(); bins],
            codes: vec![0; bins],
            magnitude: vec![0.0; bins],
            spectrum,
            scratch,
            frames: [
                vec![0.0; block_size],
                vec![0.0; block_size],
                vec![0.0; block_size],
            ],
        }
    }

    pub fn block_size(&self) -> usize {
        self.window.len()
    }

    /// # Description
    /// Writes the `block_size` samples starting at `(center_row - 1) * hop` into `out`
    pub fn process_block(
        &mut self,
        cache: &mut ScanlineCache,
        center_row: i64,
        out: &mut [f32],
    ) -> Result<()> {
        for (slot, row) in (center_row - 1..=center_row + 1).enumerate() {
            self.synthesize(cache, row, slot)?;
        }

        let hop = self.block_size() / 2;
        let [prev, center, next] = &self.frames;
        for (n, (sample, &norm)) in out.iter_mut().zip(&self.normalization).enumerate() {
            let neighbour = if n < hop { prev[n + hop] } else { next[n - hop] };
            *sample = (center[n] + neighbour) * norm;
        }
        Ok(())
    }

    /// inverse transforms scanline `row` into `frames[slot]`, windowed and scaled
    fn synthesize(&mut self, cache: &mut ScanlineCache, row: i64, slot: usize) -> Result<()> {
        cache.scanline(row, &mut self.line)?;

        for (code, pixel) in self.codes.iter_mut().zip(&self.line) {
            *code = pixel.magnitude;
        }
        self.compander.expand(&self.codes, &mut self.magnitude);
        for ((bin, pixel), &m) in self
            .spectrum
            .iter_mut()
            .zip(&self.line)
            .zip(&self.magnitude)
        {
            *bin = Complex::new(dequantize_phase(pixel.real) * m, dequantize_phase(pixel.imag) * m);
        }
        // a real signal has no imaginary DC or Nyquist component
        if let Some(dc) = self.spectrum.first_mut() {
            dc.im = 0.0;
        }
        if let Some(nyquist) = self.spectrum.last_mut() {
            nyquist.im = 0.0;
        }

        let frame = &mut self.frames[slot];
        self.ifft
            .process_with_scratch(&mut self.spectrum, frame, &mut self.scratch)?;
        for (x, &w) in frame.iter_mut().zip(&self.window) {
            *x *= w * SYNTHESIS_GAIN;
        }
        Ok(())
    }
}

/// the header of a channel file together with its stored bytes, extension bytes included
fn stored_header(path: &Path) -> Result<(ImageFileHeader, Vec<u8>)> {
    let header = ImageFileHeader::load(path)?;
    let mut raw = vec![0u8; header.header_size as usize];
    File::open(path)?.read_exact(&mut raw)?;
    Ok((header, raw))
}

struct ChannelLane {
    worker: BackwardWorker,
    cache: ScanlineCache,
    samples: Vec<f32>,
}

/// # Description
/// Rebuilds a wav file from a set of encoded channel files.
/// ## Comments
/// - every channel file must carry a byte-identical header, extension bytes included
/// - there must be one channel file per source channel
/// - output is always 32-bit float at the source sample rate
/// - an existing output is only replaced after [`BackwardConverter::with_force_overwrite`]
/// - channels are decoded in parallel, one lane per channel
pub struct BackwardConverter {
    header: ImageFileHeader,
    files: Vec<PathBuf>,
    lanes: Vec<ChannelLane>,
    force_overwrite: bool,
}

impl BackwardConverter {
    /// # Description
    /// Finds and validates the channel files for `name`
    /// ## Comments
    /// - `name` is a base name, the source wav name or the name of any channel file
    pub fn open<P: AsRef<Path>>(name: P) -> Result<Self> {
        let name = name.as_ref();
        let files = find_channel_files(name);
        let first = files
            .first()
            .ok_or_else(|| Error::NoInputFiles(name.to_path_buf()))?;

        let (header, reference) = stored_header(first)?;
        for path in &files[1..] {
            if stored_header(path)?.1 != reference {
                return Err(Error::HeaderMismatch(path.clone()));
            }
        }
        if files.len() != header.source.channels as usize {
            return Err(Error::ChannelCountMismatch {
                files: files.len(),
                channels: header.source.channels,
            });
        }

        let settings = header.settings;
        settings.validate()?;
        header.source.as_float32()?;
        let expected_rows = frame_count(header.source.total_samples(), settings.hop());
        let compander = Arc::new(settings.compander());
        let lanes = files
            .iter()
            .map(|path| -> Result<ChannelLane> {
                let cache =
                    ScanlineCache::open(path, settings.bins(), header.header_size as u64)?;
                if cache.height() != expected_rows {
                    log::warn!(
                        "{} has {} scanlines, expected {}; missing rows decode as silence",
                        path.display(),
                        cache.height(),
                        expected_rows
                    );
                }
                Ok(ChannelLane {
                    worker: BackwardWorker::new(&settings, compander.clone()),
                    cache,
                    samples: vec![0.0; settings.block_size as usize],
                })
            })
            .collect::<Result<Vec<_>>>()?;

        log::info!(
            "decoding {} channel file(s) starting with {} ({})",
            files.len(),
            first.display(),
            header.source
        );
        Ok(Self {
            header,
            files,
            lanes,
            force_overwrite: false,
        })
    }

    /// allows replacing an existing output file
    pub fn with_force_overwrite(mut self, force: bool) -> Self {
        self.force_overwrite = force;
        self
    }

    pub fn header(&self) -> &ImageFileHeader {
        &self.header
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// `<base>_modified.wav` next to the channel files
    pub fn default_output_path(&self) -> PathBuf {
        decoded_file_name(&self.files[0])
    }

    /// header of the wav file this converter writes
    pub fn output_header(&self) -> Result<WavHeader> {
        self.header.source.as_float32()
    }

    /// decodes to [`BackwardConverter::default_output_path`]
    pub fn convert(self) -> Result<PathBuf> {
        let path = self.default_output_path();
        self.convert_to(&path)?;
        Ok(path)
    }

    /// # Description
    /// Decodes every channel into a single interleaved 32-bit float wav at `path`
    /// ## Comments
    /// - overwrites `path` only after [`BackwardConverter::with_force_overwrite`], whatever the
    /// encoder was told
    /// - padding added by the encoder is cut, so the output has exactly the source's sample count
    pub fn convert_to<P: AsRef<Path>>(mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        let out_header = self.output_header()?;
        let settings = self.header.settings;
        let channels = self.lanes.len();
        let block_size = settings.block_size as usize;
        let total_samples = out_header.total_samples();
        let total_rows = frame_count(total_samples, settings.hop());

        let file = preallocate(
            path,
            CANONICAL_HEADER_LEN + out_header.data_size as u64,
            self.force_overwrite,
        )?;
        let mut writer = WavWriter::new(BufWriter::with_capacity(1 << 20, file), out_header)?;

        let mut interleaved = vec![0.0f32; block_size * channels];
        let mut remaining = total_samples;
        for center in (1..=total_rows).step_by(2) {
            self.lanes.par_iter_mut().try_for_each(|lane| {
                lane.worker
                    .process_block(&mut lane.cache, center as i64, &mut lane.samples)
            })?;

            for (channel, lane) in self.lanes.iter().enumerate() {
                for (n, &sample) in lane.samples.iter().enumerate() {
                    interleaved[n * channels + channel] = sample;
                }
            }
            let take = remaining.min(block_size as u64) as usize;
            writer.write_samples(&interleaved[..take * channels])?;
            remaining -= take as u64;
            if center % 64 == 1 {
                log::debug!("{}/{} scanlines decoded", center, total_rows);
            }
        }
        if remaining > 0 {
            writer.write_silence(remaining * channels as u64)?;
        }

        writer.finish()?.into_inner().map_err(|e| e.into_error())?.sync_data()?;
        log::info!("wrote {} samples to {}", total_samples, path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        codec::{
            files::channel_file_name,
            forward::ForwardConverter,
            wav::{WavReader, FORMAT_IEEE_FLOAT},
        },
        math::{rms, rms_error, CompandingMethod, WindowShape},
    };
    use std::{f32::consts::PI, fs, fs::File};

    fn write_wav(path: &Path, channels: u16, sample_rate: u32, samples: &[f32]) {
        let frames = samples.len() as u64 / channels as u64;
        let header = WavHeader::new(1, channels, sample_rate, 16, frames).unwrap();
        let file = BufWriter::new(File::create(path).unwrap());
        let mut writer = WavWriter::new(file, header).unwrap();
        writer.write_samples(samples).unwrap();
        writer.finish().unwrap();
    }

    fn read_all(path: &Path) -> (WavHeader, Vec<Vec<f32>>) {
        let mut reader = WavReader::open(path).unwrap();
        let header = *reader.header();
        let total = reader.total_samples() as usize;
        let mut channels = vec![Vec::new(); reader.channels()];
        if total > 0 {
            reader.buffer(total, 1).unwrap();
            for (c, samples) in channels.iter_mut().enumerate() {
                samples.extend_from_slice(reader.buffered_block(c, 0));
            }
        }
        (header, channels)
    }

    fn encode(path: &Path, settings: ConverterSettings) {
        ForwardConverter::with_worker_count(settings, 4)
            .unwrap()
            .convert(path)
            .unwrap();
    }

    #[test]
    fn sine_survives_the_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("sine.wav");
        let sample_rate = 44100;
        let signal = (0..2 * sample_rate)
            .map(|i| 0.5 * (2.0 * PI * 440.0 * i as f32 / sample_rate as f32).sin())
            .collect::<Vec<_>>();
        write_wav(&input, 1, sample_rate, &signal);

        let settings = ConverterSettings::default()
            .with_block_size(2048)
            .with_companding(CompandingMethod::UvLaw)
            .with_companding_params([256.0, 0.25]);
        encode(&input, settings);

        let output = BackwardConverter::open(dir.path().join("sine"))
            .unwrap()
            .convert()
            .unwrap();
        assert_eq!(dir.path().join("sine_modified.wav"), output);

        let (header, decoded) = read_all(&output);
        assert_eq!(FORMAT_IEEE_FLOAT, header.audio_format);
        assert_eq!(32, header.bits_per_sample);
        assert_eq!(sample_rate, header.sample_rate);
        assert_eq!(signal.len() as u64, header.total_samples());

        // the final hop only has one frame covering it
        let body = signal.len() - 2048;
        let error = rms_error(&signal[..body], &decoded[0][..body]);
        assert!(error < 0.01 * rms(&signal[..body]), "rms error {}", error);
    }

    #[test]
    fn every_window_and_method_reconstructs() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("mix.wav");
        let signal = (0..16_000)
            .map(|i| {
                let t = i as f32 / 8000.0;
                0.3 * (2.0 * PI * 300.0 * t).sin() + 0.2 * (2.0 * PI * 1250.0 * t).cos()
            })
            .collect::<Vec<_>>();
        write_wav(&input, 1, 8000, &signal);

        for window in [WindowShape::Hann, WindowShape::Hamming, WindowShape::BlackmanHarris] {
            for method in CompandingMethod::ALL {
                let settings = ConverterSettings::default()
                    .with_block_size(512)
                    .with_window(window)
                    .with_companding(method)
                    .with_force_overwrite(true);
                encode(&input, settings);
                let output = dir.path().join("mix_out.wav");
                BackwardConverter::open(&input)
                    .unwrap()
                    .with_force_overwrite(true)
                    .convert_to(&output)
                    .unwrap();

                let (_, decoded) = read_all(&output);
                let body = signal.len() - 512;
                let error = rms_error(&signal[..body], &decoded[0][..body]);
                assert!(
                    error < 0.02 * rms(&signal[..body]),
                    "{} / {}: rms error {}",
                    window,
                    method,
                    error
                );
            }
        }
    }

    #[test]
    fn stereo_silence_decodes_to_float_silence() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("quiet.wav");
        write_wav(&input, 2, 44100, &vec![0.0; 2 * 4 * 44100]);
        encode(
            &input,
            ConverterSettings::default()
                .with_companding(CompandingMethod::UvLaw)
                .with_companding_params([256.0, 0.25]),
        );

        let converter = BackwardConverter::open(dir.path().join("quiet_ch1.raw")).unwrap();
        assert_eq!(2, converter.files().len());
        let output = converter.convert().unwrap();

        let len = fs::metadata(&output).unwrap().len();
        assert_eq!(CANONICAL_HEADER_LEN + 4 * 44100 * 2 * 4, len);
        let (header, decoded) = read_all(&output);
        assert_eq!(2, header.channels);
        assert_eq!(32, header.bits_per_sample);
        assert_eq!(4 * 44100, header.total_samples());
        assert!(decoded.iter().flatten().all(|&s| s == 0.0));
    }

    #[test]
    fn channels_stay_separate() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("split.wav");
        let frames = 12_000;
        let mut interleaved = Vec::with_capacity(frames * 2);
        for i in 0..frames {
            interleaved.push(0.4 * (2.0 * PI * 500.0 * i as f32 / 8000.0).sin());
            interleaved.push(0.0);
        }
        write_wav(&input, 2, 8000, &interleaved);
        encode(&input, ConverterSettings::default().with_block_size(256));

        let output = BackwardConverter::open(&input).unwrap().convert().unwrap();
        let (_, decoded) = read_all(&output);
        assert!(rms(&decoded[0]) > 0.2);
        assert!(rms(&decoded[1]) < 1e-4);
    }

    #[test]
    fn short_input_is_padded_then_cut() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("blip.wav");
        write_wav(&input, 1, 8000, &[0.5; 100]);
        encode(&input, ConverterSettings::default().with_block_size(1024));

        let converter = BackwardConverter::open(&input).unwrap();
        assert_eq!(1, frame_count(converter.header().source.total_samples(), 512));
        let output = converter.convert().unwrap();
        let (header, decoded) = read_all(&output);
        assert_eq!(100, header.total_samples());
        assert_eq!(100, decoded[0].len());
    }

    #[test]
    fn mismatched_headers_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("pair.wav");
        write_wav(&input, 2, 8000, &vec![0.1; 4000]);
        encode(&input, ConverterSettings::default().with_block_size(256));

        let second = channel_file_name(&input, 1);
        let mut bytes = fs::read(&second).unwrap();
        let mut header = ImageFileHeader::read_from(&mut &bytes[..]).unwrap();
        header.settings.window = WindowShape::Hann;
        let patched = header.to_bytes().unwrap();
        bytes[..patched.len()].copy_from_slice(&patched);
        fs::write(&second, &bytes).unwrap();

        assert!(matches!(
            BackwardConverter::open(&input),
            Err(Error::HeaderMismatch(path)) if path == second
        ));
    }

    /// grows the stored header by `extension` bytes placed right before the scanlines
    fn extend_header(path: &Path, extension: &[u8]) {
        let bytes = fs::read(path).unwrap();
        let mut header = ImageFileHeader::read_from(&mut &bytes[..]).unwrap();
        let old_len = header.header_size as usize;
        header.header_size += extension.len() as u32;

        let mut patched = header.to_bytes().unwrap();
        patched.extend_from_slice(extension);
        patched.extend_from_slice(&bytes[old_len..]);
        fs::write(path, patched).unwrap();
    }

    #[test]
    fn header_extension_bytes_must_match() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("ext.wav");
        write_wav(&input, 2, 8000, &vec![0.1; 4000]);
        encode(&input, ConverterSettings::default().with_block_size(256));

        let first = channel_file_name(&input, 0);
        let second = channel_file_name(&input, 1);
        extend_header(&first, &[7, 7, 7, 7]);
        extend_header(&second, &[7, 7, 7, 7]);
        let converter = BackwardConverter::open(&input).unwrap();
        assert_eq!(
            ImageFileHeader::encoded_len().unwrap() + 4,
            converter.header().header_size as u64
        );
        converter.convert().unwrap();

        // same fields, different extension
        encode(
            &input,
            ConverterSettings::default()
                .with_block_size(256)
                .with_force_overwrite(true),
        );
        extend_header(&first, &[7, 7, 7, 7]);
        extend_header(&second, &[7, 7, 7, 8]);
        assert!(matches!(
            BackwardConverter::open(&input),
            Err(Error::HeaderMismatch(path)) if path == second
        ));
    }

    #[test]
    fn missing_channel_files_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("half.wav");
        write_wav(&input, 2, 8000, &vec![0.1; 4000]);
        encode(&input, ConverterSettings::default().with_block_size(256));
        fs::remove_file(channel_file_name(&input, 1)).unwrap();

        assert!(matches!(
            BackwardConverter::open(&input),
            Err(Error::ChannelCountMismatch {
                files: 1,
                channels: 2
            })
        ));
        assert!(matches!(
            BackwardConverter::open(dir.path().join("nothing")),
            Err(Error::NoInputFiles(_))
        ));
    }

    #[test]
    fn existing_output_is_kept_unless_forced() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("twice.wav");
        write_wav(&input, 1, 8000, &vec![0.1; 4000]);
        encode(&input, ConverterSettings::default().with_block_size(256));

        let output = BackwardConverter::open(&input).unwrap().convert().unwrap();
        assert!(matches!(
            BackwardConverter::open(&input).unwrap().convert(),
            Err(Error::OutputExists(_))
        ));

        // forcing the encode says nothing about the decoded file
        fs::write(&output, b"edited").unwrap();
        encode(
            &input,
            ConverterSettings::default()
                .with_block_size(256)
                .with_force_overwrite(true),
        );
        assert!(matches!(
            BackwardConverter::open(&input).unwrap().convert(),
            Err(Error::OutputExists(_))
        ));
        assert_eq!(b"edited".to_vec(), fs::read(&output).unwrap());

        BackwardConverter::open(&input)
            .unwrap()
            .with_force_overwrite(true)
            .convert()
            .unwrap();
        assert_ne!(b"edited".to_vec(), fs::read(&output).unwrap());
    }
}
