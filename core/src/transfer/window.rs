// Receiver-side acknowledgement window

use std::collections::BTreeSet;

/// The group of chunks the receiver is currently collecting
///
/// `missing` always lies inside `[group_start, group_start + group_size)`,
/// clipped to `total_chunks`; the window only advances once it is empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferWindow {
    group_start: u32,
    group_size: u32,
    total_chunks: u32,
    missing: BTreeSet<u32>,
    received_last: bool,
}

impl TransferWindow {
    pub fn new(total_chunks: u32, group_size: u32) -> Self {
        let group_size = group_size.max(1);
        Self {
            group_start: 0,
            group_size,
            total_chunks,
            missing: (0..group_size.min(total_chunks)).collect(),
            // An empty file has nothing left to wait for
            received_last: total_chunks == 0,
        }
    }

    pub fn group_start(&self) -> u32 {
        self.group_start
    }

    /// One past the last chunk index of the current group
    pub fn group_end(&self) -> u32 {
        self.group_start
            .saturating_add(self.group_size)
            .min(self.total_chunks)
    }

    pub fn total_chunks(&self) -> u32 {
        self.total_chunks
    }

    pub fn received_last(&self) -> bool {
        self.received_last
    }

    /// Record a received chunk; returns whether it was still missing
    pub fn mark_received(&mut self, index: u32) -> bool {
        if self.total_chunks > 0 && index == self.total_chunks - 1 {
            self.received_last = true;
        }
        self.missing.remove(&index)
    }

    /// Missing indices of the current group, ascending
    pub fn missing_list(&self) -> Vec<u32> {
        self.missing.iter().copied().collect()
    }

    pub fn is_group_complete(&self) -> bool {
        self.missing.is_empty()
    }

    /// Every chunk has arrived
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty() && self.received_last
    }

    /// Move to the next group; refused while chunks of this group are missing
    pub fn advance(&mut self) -> bool {
        if !self.missing.is_empty() {
            return false;
        }

        self.group_start = self.group_end();
        self.missing = (self.group_start..self.group_end()).collect();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_window_clipped() {
        let window = TransferWindow::new(5, 32);
        assert_eq!(window.missing_list(), vec![0, 1, 2, 3, 4]);
        assert_eq!(window.group_end(), 5);
        assert!(!window.received_last());
    }

    #[test]
    fn test_out_of_order_receipt() {
        let mut window = TransferWindow::new(4, 32);
        assert!(window.mark_received(2));
        assert!(window.mark_received(0));
        assert!(!window.mark_received(2));
        assert_eq!(window.missing_list(), vec![1, 3]);
    }

    #[test]
    fn test_advance_only_when_empty() {
        let mut window = TransferWindow::new(70, 32);
        for i in 0..31 {
            window.mark_received(i);
        }
        assert!(!window.advance());
        assert_eq!(window.group_start(), 0);

        window.mark_received(31);
        assert!(window.advance());
        assert_eq!(window.group_start(), 32);
        assert_eq!(window.missing_list(), (32..64).collect::<Vec<_>>());

        for i in 32..64 {
            window.mark_received(i);
        }
        assert!(window.advance());
        assert_eq!(window.missing_list(), (64..70).collect::<Vec<_>>());
    }

    #[test]
    fn test_completion_requires_last_chunk() {
        let mut window = TransferWindow::new(2, 32);
        window.mark_received(0);
        assert!(!window.is_complete());
        window.mark_received(1);
        assert!(window.received_last());
        assert!(window.is_complete());
    }

    #[test]
    fn test_empty_transfer_is_complete() {
        let window = TransferWindow::new(0, 32);
        assert!(window.missing_list().is_empty());
        assert!(window.is_complete());
    }
}
