//! Fixed-capacity ring window
//!
//! The evaluators keep their recent history in these. Appending to a full
//! window overwrites the oldest slot; iteration runs newest to oldest.

/// A fixed-capacity circular container of optional slots
#[derive(Debug, Clone)]
pub struct RingWindow<T> {
    slots: Vec<Option<T>>,
    /// Index the next append writes to (the oldest slot once wrapped)
    head: usize,
}

impl<T> RingWindow<T> {
    /// Create a window; capacity is forced to at least 1
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self { slots, head: 0 }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Append a value, overwriting the oldest slot when full
    pub fn push(&mut self, value: T) {
        self.slots[self.head] = Some(value);
        self.head = (self.head + 1) % self.slots.len();
    }

    /// True when every slot is filled
    pub fn is_full(&self) -> bool {
        self.slots.iter().all(|s| s.is_some())
    }

    /// Number of filled slots
    pub fn fill_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Wipe every slot
    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
    }

    /// Empty the slot the next append will overwrite. The evaluators call
    /// this after each emission so one result participates only once before
    /// the window advances again.
    pub fn clear_oldest(&mut self) {
        self.slots[self.head] = None;
    }

    /// The value written `offset` appends ago (0 = most recent)
    pub fn recent(&self, offset: usize) -> Option<&T> {
        if offset >= self.slots.len() {
            return None;
        }
        let len = self.slots.len();
        let index = (self.head + len - 1 - offset) % len;
        self.slots[index].as_ref()
    }

    /// Iterate slots newest to oldest, including empty ones
    pub fn iter_newest_first(&self) -> impl Iterator<Item = Option<&T>> {
        let len = self.slots.len();
        (0..len).map(move |offset| {
            let index = (self.head + len - 1 - offset) % len;
            self.slots[index].as_ref()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_and_capacity() {
        let mut window: RingWindow<i32> = RingWindow::new(3);
        assert_eq!(window.capacity(), 3);
        assert_eq!(window.fill_count(), 0);
        assert!(!window.is_full());

        window.push(1);
        window.push(2);
        assert_eq!(window.fill_count(), 2);
        assert!(!window.is_full());

        window.push(3);
        assert!(window.is_full());
        assert_eq!(window.fill_count(), 3);
    }

    #[test]
    fn test_overwrites_oldest_when_full() {
        let mut window = RingWindow::new(3);
        for i in 1..=5 {
            window.push(i);
        }
        // Holds 3, 4, 5; never more than capacity
        assert_eq!(window.fill_count(), 3);
        assert_eq!(window.recent(0), Some(&5));
        assert_eq!(window.recent(1), Some(&4));
        assert_eq!(window.recent(2), Some(&3));
    }

    #[test]
    fn test_recent_out_of_range() {
        let mut window = RingWindow::new(2);
        window.push(1);
        assert_eq!(window.recent(0), Some(&1));
        assert_eq!(window.recent(1), None);
        assert_eq!(window.recent(5), None);
    }

    #[test]
    fn test_clear() {
        let mut window = RingWindow::new(3);
        window.push(1);
        window.push(2);
        window.clear();
        assert_eq!(window.fill_count(), 0);
        assert_eq!(window.recent(0), None);
    }

    #[test]
    fn test_clear_oldest_leaves_one_empty_slot() {
        let mut window = RingWindow::new(3);
        window.push(1);
        window.push(2);
        window.push(3);
        assert!(window.is_full());

        window.clear_oldest();
        assert_eq!(window.fill_count(), 2);
        // The next push refills it
        window.push(4);
        assert!(window.is_full());
        assert_eq!(window.recent(0), Some(&4));
    }

    #[test]
    fn test_iter_newest_first() {
        let mut window = RingWindow::new(4);
        window.push(1);
        window.push(2);
        window.push(3);
        let seen: Vec<Option<&i32>> = window.iter_newest_first().collect();
        assert_eq!(seen, vec![Some(&3), Some(&2), Some(&1), None]);
    }

    #[test]
    fn test_zero_capacity_is_bumped_to_one() {
        let mut window = RingWindow::new(0);
        assert_eq!(window.capacity(), 1);
        window.push(7);
        assert!(window.is_full());
    }
}
