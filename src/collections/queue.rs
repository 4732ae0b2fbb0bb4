use std::mem;

/// # Description
/// A fixed capacity double-ended ring buffer.
/// ## Comments
/// - capacity must be a power of 2, wraparound is a mask instead of a modulo
/// - callers only ever see logical offsets from the front (`0..len`), physical slots never leak out
/// - `pop_*` hands back the owned slot (replacing it with `T::default()`) so big items like
/// scanline rows can be recycled instead of reallocated
pub struct FixedRingBuffer<T> {
    backing: Vec<T>,
    front: u32,
    len: u32,
    capacity: u32,
}

impl<T> FixedRingBuffer<T>
where
    T: Default,
{
    pub fn new(capacity: u32) -> Self {
        if capacity.count_ones() != 1 {
            panic!("capacity must be a power of 2")
        }

        Self {
            backing: (0..capacity).map(|_| T::default()).collect(),
            front: 0,
            len: 0,
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }

    pub fn is_full(&self) -> bool {
        self.len >= self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn mask(&self) -> u32 {
        self.capacity - 1
    }

    fn slot(&self, offset: u32) -> usize {
        ((self.front + offset) & self.mask()) as usize
    }

    /// returns `false` (and drops nothing) when the buffer is full
    pub fn push_front(&mut self, item: T) -> bool {
        if self.is_full() {
            return false;
        }
        self.front = (self.front + self.capacity - 1) & self.mask();
        let front = self.front as usize;
        self.backing[front] = item;
        self.len += 1;
        true
    }

    /// returns `false` (and drops nothing) when the buffer is full
    pub fn push_rear(&mut self, item: T) -> bool {
        if self.is_full() {
            return false;
        }
        let rear = self.slot(self.len);
        self.backing[rear] = item;
        self.len += 1;
        true
    }

    /// pushes at the rear, evicting the front item when full
    pub fn push_rear_overwrite(&mut self, item: T) -> Option<T> {
        let evicted = if self.is_full() { self.pop_front() } else { None };
        self.push_rear(item);
        evicted
    }

    pub fn pop_front(&mut self) -> Option<T> {
        if self.is_empty() {
            return None;
        }
        let old_front = self.front as usize;
        self.front = (self.front + 1) & self.mask();
        self.len -= 1;
        Some(mem::take(&mut self.backing[old_front]))
    }

    pub fn pop_rear(&mut self) -> Option<T> {
        if self.is_empty() {
            return None;
        }
        self.len -= 1;
        let rear = self.slot(self.len);
        Some(mem::take(&mut self.backing[rear]))
    }

    /// fetches the item `offset` places behind the front
    pub fn get(&self, offset: usize) -> Option<&T> {
        (offset < self.len()).then(|| &self.backing[self.slot(offset as u32)])
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        (0..self.len).map(move |offset| &self.backing[self.slot(offset)])
    }
}

impl<T> FixedRingBuffer<T>
where
    T: Default + Copy,
{
    /// copies the contents, front to rear, into `out`. Returns number of items copied
    pub fn copy_to(&self, out: &mut [T]) -> usize {
        let mut copied = 0;
        for (dst, &src) in out.iter_mut().zip(self.iter()) {
            *dst = src;
            copied += 1;
        }
        copied
    }
}
