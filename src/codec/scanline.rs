use std::{
    fs::File,
    io::{Read, Seek, SeekFrom},
    path::Path,
};

use super::{Pixel, PIXEL_BYTES};
use crate::{
    collections::FixedRingBuffer,
    error::{Error, Result},
};

/// rows held in memory by default
pub const CACHE_ROWS: u32 = 256;

/// # Description
/// Random access to the scanlines of one encoded channel file through a window of cached rows.
/// ## Comments
/// - the window always starts at a multiple of `capacity/4`, chosen so the requested row
/// sits in its middle half whenever possible, which makes forward and backward sweeps equally cheap
/// - moving the window by less than its size only reads the rows that were not cached yet,
/// evicted rows are recycled for the new ones
/// - rows before the first or after the last scanline read as all-zero pixels
pub struct ScanlineCache {
    file: File,
    rows: FixedRingBuffer<Vec<Pixel>>,
    /// image row held at the front of `rows`
    cursor: u64,
    row_width: usize,
    header_len: u64,
    height: u64,
    raw: Vec<u8>,
    rows_read: u64,
}

impl ScanlineCache {
    pub fn open<P: AsRef<Path>>(path: P, row_width: usize, header_len: u64) -> Result<Self> {
        Self::open_with_capacity(path, row_width, header_len, CACHE_ROWS)
    }

    /// # Description
    /// Opens a channel file whose scanlines start `header_len` bytes in.
    /// ## Comments
    /// - `capacity` must be a power of two and at least 4
    /// - the file must hold a whole number of rows after the header
    pub fn open_with_capacity<P: AsRef<Path>>(
        path: P,
        row_width: usize,
        header_len: u64,
        capacity: u32,
    ) -> Result<Self> {
        let path = path.as_ref();
        if row_width == 0 {
            return Err(Error::InvalidImage("scanlines can't be empty".into()));
        }
        assert!(capacity >= 4, "scanline cache needs at least 4 rows");

        let file = File::open(path)?;
        let file_len = file.metadata()?.len();
        if file_len < header_len {
            return Err(Error::InvalidImage(format!(
                "'{}' is smaller than its {} byte header",
                path.display(),
                header_len
            )));
        }
        let row_bytes = (row_width * PIXEL_BYTES) as u64;
        let body_len = file_len - header_len;
        if body_len % row_bytes != 0 {
            return Err(Error::InvalidImage(format!(
                "'{}' holds {} bytes of pixels, not a whole number of {} byte scanlines",
                path.display(),
                body_len,
                row_bytes
            )));
        }

        let mut rows = FixedRingBuffer::new(capacity);
        for _ in 0..capacity {
            rows.push_rear(vec![Pixel::default(); row_width]);
        }

        let mut cache = Self {
            file,
            rows,
            cursor: 0,
            row_width,
            header_len,
            height: body_len / row_bytes,
            raw: Vec::new(),
            rows_read: 0,
        };
        cache.reload(0)?;
        Ok(cache)
    }

    /// number of scanlines in the file
    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn row_width(&self) -> usize {
        self.row_width
    }

    /// scanlines fetched from disk since the file was opened
    pub fn rows_read(&self) -> u64 {
        self.rows_read
    }

    /// copies scanline `y` into `out`, which must be `row_width` long
    pub fn scanline(&mut self, y: i64, out: &mut [Pixel]) -> Result<()> {
        if y < 0 || y as u64 >= self.height {
            out.fill(Pixel::default());
            return Ok(());
        }
        let y = y as u64;
        self.reposition(y)?;
        let row = self
            .rows
            .get((y - self.cursor) as usize)
            .ok_or_else(|| Error::InvalidImage(format!("scanline {} fell out of the cache", y)))?;
        out.copy_from_slice(row);
        Ok(())
    }

    fn reposition(&mut self, y: u64) -> Result<()> {
        let capacity = self.rows.capacity() as u64;
        let mut start = y - y % (capacity / 2);
        if start >= capacity / 4 {
            start -= capacity / 4;
        }
        if start != self.cursor {
            self.move_window(start)?;
        }
        Ok(())
    }

    fn move_window(&mut self, start: u64) -> Result<()> {
        let capacity = self.rows.capacity() as u64;
        let old = self.cursor;

        if start > old && start < old + capacity {
            // slide forward, rows at the front get reused at the rear
            let shift = (start - old) as usize;
            let mut recycled = self.take_rows(shift, true);
            self.read_rows(old + capacity, &mut recycled)?;
            for row in recycled {
                self.rows.push_rear(row);
            }
        } else if start < old && start + capacity > old {
            // slide backward, rows at the rear get reused at the front
            let shift = (old - start) as usize;
            let mut recycled = self.take_rows(shift, false);
            self.read_rows(start, &mut recycled)?;
            for row in recycled.into_iter().rev() {
                self.rows.push_front(row);
            }
        } else {
            self.cursor = start;
            return self.reload(start);
        }

        log::trace!("scanline window moved from {} to {}", old, start);
        self.cursor = start;
        Ok(())
    }

    fn reload(&mut self, start: u64) -> Result<()> {
        let capacity = self.rows.capacity();
        let mut recycled = self.take_rows(capacity, true);
        self.read_rows(start, &mut recycled)?;
        for row in recycled {
            self.rows.push_rear(row);
        }
        Ok(())
    }

    fn take_rows(&mut self, count: usize, from_front: bool) -> Vec<Vec<Pixel>> {
        let width = self.row_width;
        (0..count)
            .map(|_| {
                let row = if from_front {
                    self.rows.pop_front()
                } else {
                    self.rows.pop_rear()
                };
                row.unwrap_or_else(|| vec![Pixel::default(); width])
            })
            .collect()
    }

    /// fills `rows` with consecutive scanlines starting at `start`
    fn read_rows(&mut self, start: u64, rows: &mut [Vec<Pixel>]) -> Result<()> {
        let row_bytes = self.row_width * PIXEL_BYTES;
        let available = self.height.saturating_sub(start).min(rows.len() as u64) as usize;

        if available > 0 {
            self.raw.resize(available * row_bytes, 0);
            self.file
                .seek(SeekFrom::Start(self.header_len + start * row_bytes as u64))?;
            self.file.read_exact(&mut self.raw)?;
            for (row, bytes) in rows.iter_mut().zip(self.raw.chunks_exact(row_bytes)) {
                Pixel::decode_row(bytes, row);
            }
            self.rows_read += available as u64;
        }
        for row in rows[available..].iter_mut() {
            row.fill(Pixel::default());
        }
        Ok(())
    }
}
