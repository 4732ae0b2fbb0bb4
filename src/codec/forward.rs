use std::{
    fs::File,
    io::{self, BufWriter},
    mem,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    sync::Arc,
    thread,
};

use rayon::prelude::*;
use realfft::{num_complex::Complex, RealFftPlanner, RealToComplex};

use super::{
    files::{channel_file_name, preallocate},
    frame_count,
    header::{ConverterSettings, ImageFileHeader, RawImageLayout},
    wav::{WavHeader, WavReader},
    Pixel,
};
use crate::{
    collections::FixedRingBuffer,
    error::{Error, Result},
    math::{quantize, Compander},
};

/// analysis frames handed out per pass are clamped to this range
const MIN_BLOCKS_PER_PASS: u64 = 64;
const MAX_BLOCKS_PER_PASS: u64 = 4096;

/// two workers per logical processor
pub fn default_worker_count() -> usize {
    thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
        * 2
}

/// # Description
/// Turns windowed analysis frames into scanlines.
/// ## Comments
/// - owns its FFT plan and scratch space, nothing is shared with other workers but the compander
/// - frames for a pass are queued with [`ForwardWorker::assign`] and their scanlines collected with
/// [`ForwardWorker::take_output`]
pub struct ForwardWorker {
    fft: Arc<dyn RealToComplex<f32>>,
    compander: Arc<Compander>,
    window: Vec<f32>,
    frame: Vec<f32>,
    spectrum: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    magnitude: Vec<f32>,
    codes: Vec<u16>,
    inputs: Vec<f32>,
    outputs: Vec<Pixel>,
}

impl ForwardWorker {
    pub fn new(settings: &ConverterSettings, compander: Arc<Compander>) -> Self {
        let block_size = settings.block_size as usize;
        let fft = RealFftPlanner::<f32>::new().plan_fft_forward(block_size);
        let frame = fft.make_input_vec();
        let spectrum = fft.make_output_vec();
        let scratch = fft.make_scratch_vec();
        let bins = spectrum.len();
        Self {
            window: settings.window.make(block_size),
            fft,
            compander,
            frame,
            spectrum,
            scratch,
            magnitude: vec![0.0; bins],
            codes: vec![0; bins],
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn block_size(&self) -> usize {
        self.frame.len()
    }

    pub fn bins(&self) -> usize {
        self.spectrum.len()
    }

    /// # Description
    /// Encodes one frame of `block_size` samples into one scanline of `bins` pixels
    /// ## Comments
    /// - the spectrum is scaled by `2/block_size` so a full scale sinusoid has a magnitude near 1
    /// - the phase of a silent bin is stored as `(0,0)`
    pub fn process_block(&mut self, input: &[f32], output: &mut [Pixel]) -> Result<()> {
        for ((x, &s), &w) in self.frame.iter_mut().zip(input).zip(&self.window) {
            *x = s * w;
        }
        self.fft
            .process_with_scratch(&mut self.frame, &mut self.spectrum, &mut self.scratch)?;

        let scale = 2.0 / self.frame.len() as f32;
        for ((bin, pixel), magnitude) in self
            .spectrum
            .iter()
            .zip(output.iter_mut())
            .zip(self.magnitude.iter_mut())
        {
            let re = bin.re * scale;
            let im = bin.im * scale;
            let m = (re * re + im * im).sqrt();
            let (unit_re, unit_im) = if m > 0.0 { (re / m, im / m) } else { (0.0, 0.0) };
            pixel.real = quantize(0.5 * unit_re + 0.5);
            pixel.imag = quantize(0.5 * unit_im + 0.5);
            *magnitude = m;
        }

        self.compander.compress(&self.magnitude, &mut self.codes);
        for (pixel, &code) in output.iter_mut().zip(&self.codes) {
            pixel.magnitude = code;
        }
        Ok(())
    }

    /// queues `frames` (whole frames, back to back) for the next [`ForwardWorker::process`],
    /// leaving `frames` empty
    pub fn assign(&mut self, frames: &mut Vec<f32>) {
        mem::swap(&mut self.inputs, frames);
        frames.clear();
    }

    /// encodes every queued frame
    pub fn process(&mut self) -> Result<()> {
        let block_size = self.block_size();
        let bins = self.bins();
        let inputs = mem::take(&mut self.inputs);
        let mut outputs = mem::take(&mut self.outputs);

        outputs.clear();
        outputs.resize((inputs.len() / block_size) * bins, Pixel::default());
        for (input, output) in inputs
            .chunks_exact(block_size)
            .zip(outputs.chunks_exact_mut(bins))
        {
            self.process_block(input, output)?;
        }

        self.inputs = inputs;
        self.inputs.clear();
        self.outputs = outputs;
        Ok(())
    }

    /// swaps the scanlines of the last pass into `slot`
    pub fn take_output(&mut self, slot: &mut Vec<Pixel>) {
        slot.clear();
        mem::swap(&mut self.outputs, slot);
    }
}

/// what a finished encode produced
#[derive(Clone, Debug)]
pub struct EncodeSummary {
    pub outputs: Vec<PathBuf>,
    pub layout: RawImageLayout,
    pub source: WavHeader,
}

/// # Description
/// Converts a wav file into one raw image per channel.
/// ## Comments
/// - each pass reads the next batch of frames on the calling thread, encodes the previous batch on
/// the worker pool and writes the batch before that on a writer thread
/// - every channel gets `workers/channels` workers, each owning a contiguous run of a batch so
/// scanlines come out in order
pub struct ForwardConverter {
    settings: ConverterSettings,
    workers: Vec<ForwardWorker>,
    pool: rayon::ThreadPool,
}

impl ForwardConverter {
    pub fn new(settings: ConverterSettings) -> Result<Self> {
        Self::with_worker_count(settings, default_worker_count())
    }

    /// `count` is rounded up to an even number, so stereo channels split the workers evenly
    pub fn with_worker_count(settings: ConverterSettings, count: usize) -> Result<Self> {
        settings.validate()?;
        let count = (count.max(2) + 1) & !1;
        let compander = Arc::new(settings.compander());
        let workers = (0..count)
            .map(|_| ForwardWorker::new(&settings, compander.clone()))
            .collect();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(count)
            .thread_name(|i| format!("encode-{}", i))
            .build()?;
        log::info!(
            "{} logical processors available, using {} encode workers",
            thread::available_parallelism().map(NonZeroUsize::get).unwrap_or(1),
            count
        );
        Ok(Self {
            settings,
            workers,
            pool,
        })
    }

    pub fn settings(&self) -> &ConverterSettings {
        &self.settings
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// # Description
    /// Encodes `input` into `<input without extension>_ch<N>.raw`, one file per channel
    /// ## Comments
    /// - all output files are created at their final size before anything is encoded
    pub fn convert<P: AsRef<Path>>(&mut self, input: P) -> Result<EncodeSummary> {
        let input = input.as_ref();
        let settings = self.settings;
        let mut reader = WavReader::open(input)?;
        let source = *reader.header();
        let channels = reader.channels();

        let block_size = settings.block_size as usize;
        let bins = settings.bins();
        let total_frames = frame_count(source.total_samples(), settings.hop());
        let blocks_per_pass =
            (total_frames / 8).clamp(MIN_BLOCKS_PER_PASS, MAX_BLOCKS_PER_PASS) as usize;

        let header = ImageFileHeader::new(settings, source)?;
        let layout = header.layout(total_frames);
        log::info!("encoding {} ({})", input.display(), source);

        let outputs = (0..channels)
            .map(|channel| channel_file_name(input, channel))
            .collect::<Vec<_>>();
        if !settings.force_overwrite {
            if let Some(existing) = outputs.iter().find(|path| path.exists()) {
                return Err(Error::OutputExists(existing.clone()));
            }
        }
        let mut sinks = outputs
            .iter()
            .map(|path| -> Result<BufWriter<File>> {
                let file = preallocate(path, layout.file_size(), settings.force_overwrite)?;
                let mut sink = BufWriter::with_capacity(1 << 20, file);
                header.write_to(&mut sink)?;
                Ok(sink)
            })
            .collect::<Result<Vec<_>>>()?;

        let mut histories = (0..channels)
            .map(|_| {
                let mut history = FixedRingBuffer::new(settings.block_size);
                while history.push_rear(0.0f32) {}
                history
            })
            .collect::<Vec<_>>();

        let Self { workers, pool, .. } = self;
        let lanes_per_channel = workers.len() / channels;
        let mut pending = vec![Vec::new(); workers.len()];
        let mut ready = vec![Vec::new(); workers.len()];
        let mut rows_written = 0u64;

        loop {
            let idle = pending.iter().all(Vec::is_empty) && ready.iter().all(Vec::is_empty);
            if reader.is_end_of_stream() && idle {
                break;
            }
            for (worker, frames) in workers.iter_mut().zip(pending.iter_mut()) {
                worker.assign(frames);
            }

            let rows = thread::scope(|s| -> Result<u64> {
                let writer = s.spawn(|| write_pass(&mut sinks, &ready, lanes_per_channel, bins));
                let encoder = s.spawn(|| {
                    pool.install(|| workers.par_iter_mut().try_for_each(ForwardWorker::process))
                });
                let read = read_pass(
                    &mut reader,
                    &mut histories,
                    &mut pending,
                    block_size,
                    blocks_per_pass,
                    lanes_per_channel,
                );
                let rows = writer.join().map_err(|_| Error::WorkerPanicked)??;
                encoder.join().map_err(|_| Error::WorkerPanicked)??;
                read?;
                Ok(rows)
            })?;

            for (worker, slot) in workers.iter_mut().zip(ready.iter_mut()) {
                worker.take_output(slot);
            }
            rows_written += rows;
            log::info!("{}/{} scanlines written", rows_written, total_frames);
        }

        for sink in sinks {
            let file: File = sink.into_inner().map_err(io::IntoInnerError::into_error)?;
            file.sync_data()?;
        }
        log::info!(
            "wrote {} scanlines per channel to {}",
            rows_written,
            outputs
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );

        Ok(EncodeSummary {
            outputs,
            layout,
            source,
        })
    }
}

/// reads the next batch and spreads its frames over the lanes of each channel
fn read_pass(
    reader: &mut WavReader,
    histories: &mut [FixedRingBuffer<f32>],
    pending: &mut [Vec<f32>],
    block_size: usize,
    blocks_per_pass: usize,
    lanes_per_channel: usize,
) -> Result<()> {
    if reader.is_end_of_stream() {
        return Ok(());
    }
    let blocks = reader.buffer(block_size / 2, blocks_per_pass)?;
    for (channel, history) in histories.iter_mut().enumerate() {
        for block in 0..blocks {
            for &sample in reader.buffered_block(channel, block) {
                history.push_rear_overwrite(sample);
            }
            let lane = channel * lanes_per_channel + block * lanes_per_channel / blocks_per_pass;
            let frames = &mut pending[lane];
            let start = frames.len();
            frames.resize(start + block_size, 0.0);
            history.copy_to(&mut frames[start..]);
        }
    }
    Ok(())
}

/// writes the scanlines of the previous pass, lane by lane. Returns scanlines written per channel
fn write_pass(
    sinks: &mut [BufWriter<File>],
    ready: &[Vec<Pixel>],
    lanes_per_channel: usize,
    bins: usize,
) -> Result<u64> {
    let mut pixels_per_channel = 0;
    for (lane, pixels) in ready.iter().enumerate() {
        let channel = lane / lanes_per_channel;
        Pixel::write_row(pixels, &mut sinks[channel])?;
        if channel == 0 {
            pixels_per_channel += pixels.len();
        }
    }
    Ok((pixels_per_channel / bins) as u64)
}
