//! Bounded replay buffer
//!
//! Keeps the most recent output of a session so a late attacher can be
//! brought up to date. Output is stored in the chunks it was read in and
//! trimmed from the front once the byte limit is exceeded.

use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct Scrollback {
    chunks: VecDeque<Vec<u8>>,
    len: usize,
    limit: usize,
}

impl Scrollback {
    pub fn new(limit: usize) -> Self {
        Self {
            chunks: VecDeque::new(),
            len: 0,
            limit,
        }
    }

    /// Append output, dropping the oldest bytes beyond the limit
    pub fn push(&mut self, data: &[u8]) {
        if self.limit == 0 || data.is_empty() {
            return;
        }

        // Only the tail of an oversized chunk can survive
        let data = &data[data.len().saturating_sub(self.limit)..];
        self.chunks.push_back(data.to_vec());
        self.len += data.len();

        while self.len > self.limit {
            let excess = self.len - self.limit;
            let Some(front) = self.chunks.front_mut() else {
                break;
            };
            if front.len() <= excess {
                self.len -= front.len();
                self.chunks.pop_front();
            } else {
                front.drain(..excess);
                self.len -= excess;
            }
        }
    }

    /// Buffered output, oldest first
    pub fn contents(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len);
        for chunk in &self.chunks {
            out.extend_from_slice(chunk);
        }
        out
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
        self.len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_keeps_everything_under_limit() {
        let mut sb = Scrollback::new(16);
        sb.push(b"hello ");
        sb.push(b"world");
        assert_eq!(sb.contents(), b"hello world");
        assert_eq!(sb.len(), 11);
    }

    #[test]
    fn test_trims_oldest_first() {
        let mut sb = Scrollback::new(8);
        sb.push(b"abcd");
        sb.push(b"efgh");
        sb.push(b"ij");
        assert_eq!(sb.contents(), b"cdefghij");
        assert_eq!(sb.len(), 8);
    }

    #[test]
    fn test_oversized_chunk_keeps_tail() {
        let mut sb = Scrollback::new(4);
        sb.push(b"0123456789");
        assert_eq!(sb.contents(), b"6789");
    }

    #[test]
    fn test_zero_limit_disables() {
        let mut sb = Scrollback::new(0);
        sb.push(b"data");
        assert!(sb.is_empty());
        assert!(sb.contents().is_empty());
    }

    #[test]
    fn test_clear() {
        let mut sb = Scrollback::new(8);
        sb.push(b"abc");
        sb.clear();
        assert!(sb.is_empty());
        sb.push(b"d");
        assert_eq!(sb.contents(), b"d");
    }

    proptest! {
        #[test]
        fn prop_holds_latest_suffix(
            limit in 0usize..64,
            chunks in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..32), 0..16),
        ) {
            let mut sb = Scrollback::new(limit);
            let mut all = Vec::new();
            for chunk in &chunks {
                sb.push(chunk);
                all.extend_from_slice(chunk);
            }

            let contents = sb.contents();
            prop_assert!(contents.len() <= limit);
            prop_assert_eq!(contents.len(), sb.len());
            prop_assert_eq!(contents.len(), all.len().min(limit));
            prop_assert!(all.ends_with(&contents));
        }
    }
}
