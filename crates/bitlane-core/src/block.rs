use std::sync::Arc;

/// Block is a reference-counted, sliceable byte buffer.
///
/// Application blocks and the fragments cut from them share one allocation:
/// a `Block` holds an `Arc<[u8]>` plus a (start, len) view, so slicing a
/// fragment out of a block costs a refcount bump rather than a copy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    data: Arc<[u8]>,
    start: usize,
    len: usize,
}

impl Block {
    /// Creates a new block from a Vec by taking ownership.
    pub fn from_vec(vec: Vec<u8>) -> Self {
        let arc: Arc<[u8]> = Arc::from(vec.into_boxed_slice());
        let len = arc.len();
        Self { data: arc, start: 0, len }
    }

    /// Creates a new block from an `Arc<[u8]>` covering the full slice.
    pub fn from_arc(data: Arc<[u8]>) -> Self {
        let len = data.len();
        Self { data, start: 0, len }
    }

    /// Creates a sub-slice view into the current buffer without copying.
    /// Panics if the requested range is out of bounds.
    pub fn slice(&self, start: usize, len: usize) -> Self {
        assert!(start <= self.len, "slice start out of bounds");
        assert!(start + len <= self.len, "slice end out of bounds");
        Self { data: self.data.clone(), start: self.start + start, len }
    }

    /// Returns the current view as a byte slice.
    pub fn as_slice(&self) -> &[u8] {
        &self.data[self.start..self.start + self.len]
    }

    /// Returns the length of the current view.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the view is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl From<Vec<u8>> for Block {
    fn from(v: Vec<u8>) -> Self {
        Self::from_vec(v)
    }
}

impl From<Arc<[u8]>> for Block {
    fn from(a: Arc<[u8]>) -> Self {
        Self::from_arc(a)
    }
}

impl AsRef<[u8]> for Block {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slice_shares_allocation() {
        let block = Block::from_vec((0u8..32).collect());
        let fragment = block.slice(8, 8);

        assert_eq!(fragment.len(), 8);
        assert_eq!(fragment.as_slice(), &(8u8..16).collect::<Vec<_>>()[..]);
        // The parent view is unaffected.
        assert_eq!(block.len(), 32);
    }

    #[test]
    fn test_nested_slices() {
        let block = Block::from_vec((0u8..64).collect());
        let middle = block.slice(16, 32);
        let inner = middle.slice(8, 8);

        assert_eq!(inner.as_slice(), &(24u8..32).collect::<Vec<_>>()[..]);
    }

    #[test]
    #[should_panic(expected = "slice end out of bounds")]
    fn test_slice_out_of_bounds_panics() {
        let block = Block::from_vec(vec![0u8; 8]);
        let _ = block.slice(4, 8);
    }
}
