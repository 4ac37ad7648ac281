//! Host-side buffers.
//!
//! A [`HostBuffer`] owns the contiguous data a run reads from or writes
//! to.  Lanes never see raw pointers into it; they receive a
//! [`BlockDescriptor`] and access their part through [`HostBuffer::block`]
//! and [`HostBuffer::block_mut`].  The buffer is fixed-length: it cannot
//! grow or shrink once created, so descriptors computed for it stay valid.

use std::ops::Deref;

use bytemuck::Pod;

use crate::partition::BlockDescriptor;

/// An owned, fixed-length host buffer of `T` elements.
#[derive(Debug, Clone, PartialEq)]
pub struct HostBuffer<T: Pod = f32> {
    data: Box<[T]>,
}

impl<T: Pod> HostBuffer<T> {
    /// A zero-initialised buffer of `len` elements.
    pub fn zeroed(len: usize) -> Self {
        Self {
            data: vec![T::zeroed(); len].into_boxed_slice(),
        }
    }

    pub fn from_vec(data: Vec<T>) -> Self {
        Self {
            data: data.into_boxed_slice(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    /// Size of the buffer contents in bytes.
    pub fn byte_len(&self) -> usize {
        std::mem::size_of_val(&*self.data)
    }

    /// The elements covered by `block`.
    ///
    /// # Panics
    ///
    /// Panics if the block extends past the end of the buffer.
    pub fn block(&self, block: &BlockDescriptor) -> &[T] {
        &self.data[block.range()]
    }

    /// Mutable access to the elements covered by `block`.
    ///
    /// # Panics
    ///
    /// Panics if the block extends past the end of the buffer.
    pub fn block_mut(&mut self, block: &BlockDescriptor) -> &mut [T] {
        &mut self.data[block.range()]
    }

    /// Split the buffer into disjoint mutable slices, one per block.
    ///
    /// The blocks must be sorted by offset and must not overlap, which
    /// holds for every sequence produced by [`crate::partition::partition`].
    ///
    /// # Panics
    ///
    /// Panics if the blocks overlap, are out of order or extend past the
    /// end of the buffer.
    pub fn blocks_mut(&mut self, blocks: &[BlockDescriptor]) -> Vec<&mut [T]> {
        let mut out = Vec::with_capacity(blocks.len());
        let mut rest: &mut [T] = &mut self.data;
        let mut consumed = 0;
        for block in blocks {
            assert!(block.offset >= consumed, "blocks overlap or are out of order");
            let tail = std::mem::take(&mut rest);
            let (_, tail) = tail.split_at_mut(block.offset - consumed);
            let (head, tail) = tail.split_at_mut(block.length);
            out.push(head);
            rest = tail;
            consumed = block.end();
        }
        out
    }

    pub fn into_vec(self) -> Vec<T> {
        self.data.into_vec()
    }
}

impl<T: Pod> Deref for HostBuffer<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.data
    }
}

impl<T: Pod> From<Vec<T>> for HostBuffer<T> {
    fn from(data: Vec<T>) -> Self {
        Self::from_vec(data)
    }
}

impl<T: Pod> Default for HostBuffer<T> {
    fn default() -> Self {
        Self::zeroed(0)
    }
}
