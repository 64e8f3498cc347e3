//! Sparse per-batch gradient buffers.
//!
//! A [`GradientAccumulator`] is bound to one parameter family. It maps each
//! embedding id touched in the current batch to a slot of a dense buffer that
//! is allocated once, sized to the whole family. `reset` forgets the mapping
//! but keeps the buffer, so steady-state training never reallocates.
//!
//! ```text
//! ids touched:  17   3   17   42
//! slots:         0   1    0    2      (repeat touches sum into one slot)
//! counts:       17→2, 3→1, 42→1
//! ```

use std::collections::HashMap;

use ndarray::{Array2, ArrayView1, ArrayViewMut1};

/// Sparse gradient over the rows of one embedding family.
#[derive(Debug, Clone)]
pub struct GradientAccumulator {
    buffer: Array2<f64>,
    slots: HashMap<usize, usize>,
    /// Slot index -> embedding id, in first-touch order.
    ids: Vec<usize>,
    /// Slot index -> touch count.
    counts: Vec<usize>,
}

impl GradientAccumulator {
    /// Accumulator for a family of `capacity` embeddings of width `dim`.
    pub fn new(capacity: usize, dim: usize) -> Self {
        Self {
            buffer: Array2::zeros((capacity, dim)),
            slots: HashMap::new(),
            ids: Vec::with_capacity(capacity),
            counts: Vec::with_capacity(capacity),
        }
    }

    /// Forget every touched id. The backing buffer is kept.
    pub fn reset(&mut self) {
        self.slots.clear();
        self.ids.clear();
        self.counts.clear();
    }

    /// Number of distinct ids touched since the last reset.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether no id has been touched since the last reset.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Embedding width.
    pub fn dim(&self) -> usize {
        self.buffer.ncols()
    }

    /// Number of embeddings in the family.
    pub fn capacity(&self) -> usize {
        self.buffer.nrows()
    }

    /// Touched ids in first-touch order.
    pub fn ids(&self) -> &[usize] {
        &self.ids
    }

    /// Whether `id` has been touched since the last reset.
    pub fn contains(&self, id: usize) -> bool {
        self.slots.contains_key(&id)
    }

    /// How many times `id` was touched since the last reset.
    pub fn count(&self, id: usize) -> usize {
        self.slots.get(&id).map_or(0, |&slot| self.counts[slot])
    }

    /// Register one touch of `id` and return its slot for accumulation.
    ///
    /// The first touch after a reset zeroes the slot.
    ///
    /// # Panics
    ///
    /// Panics if `id` is outside the family.
    pub fn touch(&mut self, id: usize) -> ArrayViewMut1<'_, f64> {
        assert!(
            id < self.capacity(),
            "embedding id {id} out of range for family of {}",
            self.capacity()
        );
        let slot = match self.slots.get(&id) {
            Some(&slot) => {
                self.counts[slot] += 1;
                slot
            }
            None => {
                let slot = self.ids.len();
                self.slots.insert(id, slot);
                self.ids.push(id);
                self.counts.push(1);
                self.buffer.row_mut(slot).fill(0.0);
                slot
            }
        };
        self.buffer.row_mut(slot)
    }

    /// Add `scale * values` to the gradient of `id`.
    pub fn add_scaled(&mut self, id: usize, scale: f64, values: &ArrayView1<'_, f64>) {
        self.touch(id).scaled_add(scale, values);
    }

    /// Add `values` to the gradient of `id`.
    pub fn add(&mut self, id: usize, values: &ArrayView1<'_, f64>) {
        self.add_scaled(id, 1.0, values);
    }

    /// Overwrite the gradient of `id`, counting as one touch.
    pub fn set(&mut self, id: usize, values: &ArrayView1<'_, f64>) {
        self.touch(id).assign(values);
    }

    /// Accumulated gradient of `id`, if touched.
    pub fn get(&self, id: usize) -> Option<ArrayView1<'_, f64>> {
        self.slots.get(&id).map(|&slot| self.buffer.row(slot))
    }

    /// Mutable access to an already touched slot without counting a touch.
    pub fn get_mut(&mut self, id: usize) -> Option<ArrayViewMut1<'_, f64>> {
        let slot = *self.slots.get(&id)?;
        Some(self.buffer.row_mut(slot))
    }

    /// Iterate over `(id, touch count, gradient)` in first-touch order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, ArrayView1<'_, f64>)> + '_ {
        let buffer = &self.buffer;
        self.ids
            .iter()
            .zip(&self.counts)
            .enumerate()
            .map(move |(slot, (&id, &count))| (id, count, buffer.row(slot)))
    }

    /// Visit every touched slot mutably as `(id, touch count, gradient)`.
    pub fn for_each_mut(&mut self, mut f: impl FnMut(usize, usize, ArrayViewMut1<'_, f64>)) {
        for (slot, (&id, &count)) in self.ids.iter().zip(&self.counts).enumerate() {
            f(id, count, self.buffer.row_mut(slot));
        }
    }
}
