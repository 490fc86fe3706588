//! Fixed-capacity circular sample store.
//!
//! Writes never fail: once the buffer holds `capacity` samples the next write
//! overwrites the oldest one. Reads are oldest-first and consume the sample.

#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    slots: Vec<T>,
    // Total writes / reads since the last reset. `write_seq - read_seq` is the
    // number of live samples and never exceeds the capacity.
    write_seq: u64,
    read_seq: u64,
}

impl<T: Copy + Default> RingBuffer<T> {
    /// Creates an empty buffer. A zero capacity is bumped to one slot.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![T::default(); capacity.max(1)],
            write_seq: 0,
            read_seq: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn current_size(&self) -> usize {
        (self.write_seq - self.read_seq) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.write_seq == self.read_seq
    }

    pub fn is_full(&self) -> bool {
        self.current_size() == self.capacity()
    }

    /// Appends a value, overwriting the oldest sample when full.
    pub fn put(&mut self, value: T) {
        let cap = self.capacity() as u64;
        if self.is_full() {
            self.read_seq += 1;
        }
        self.slots[(self.write_seq % cap) as usize] = value;
        self.write_seq += 1;
    }

    /// Removes and returns the oldest sample.
    pub fn get(&mut self) -> Option<T> {
        if self.is_empty() {
            return None;
        }
        let cap = self.capacity() as u64;
        let value = self.slots[(self.read_seq % cap) as usize];
        self.read_seq += 1;
        Some(value)
    }

    /// Oldest-first view over the live samples without consuming them.
    pub fn iter(&self) -> impl Iterator<Item = T> + '_ {
        let cap = self.capacity() as u64;
        (self.read_seq..self.write_seq).map(move |seq| self.slots[(seq % cap) as usize])
    }

    /// Drains every live sample, oldest first.
    pub fn drain(&mut self) -> Vec<T> {
        let out: Vec<T> = self.iter().collect();
        self.read_seq = self.write_seq;
        out
    }

    pub fn clear(&mut self) {
        self.write_seq = 0;
        self.read_seq = 0;
        self.slots.fill(T::default());
    }
}

impl RingBuffer<f64> {
    /// Mean of the live samples, `None` when empty.
    pub fn mean(&self) -> Option<f64> {
        if self.is_empty() {
            return None;
        }
        Some(self.iter().sum::<f64>() / self.current_size() as f64)
    }
}
