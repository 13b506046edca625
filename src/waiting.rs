//! Waiting containers for the search algorithms
//!
//! A strict LIFO stack and a strict FIFO queue behind one trait, plus a
//! filtering wrapper that transparently skips elements which stopped
//! satisfying a predicate after they were enqueued (covered nodes). The
//! wrapper scrubs dead elements off the head on `first`/`remove_first`/
//! `is_empty`, so the ordering of live elements is untouched and nothing
//! beyond the first live element is ever scanned.

use std::collections::VecDeque;

/// A waiting container over elements of type `T`.
pub trait Waiting<T> {
    fn is_empty(&mut self) -> bool;
    fn insert(&mut self, t: T);
    /// The element `remove_first` would return, without removing it.
    fn first(&self) -> Option<&T>;
    /// Remove and return the first element, `None` when empty.
    fn remove_first(&mut self) -> Option<T>;
}

/// Last-in-first-out waiting (depth-first search order).
pub struct Lifo<T> {
    stack: Vec<T>,
}

impl<T> Lifo<T> {
    pub fn new() -> Lifo<T> {
        Lifo { stack: Vec::new() }
    }
}

impl<T> Default for Lifo<T> {
    fn default() -> Lifo<T> {
        Lifo::new()
    }
}

impl<T> Waiting<T> for Lifo<T> {
    fn is_empty(&mut self) -> bool {
        self.stack.is_empty()
    }

    fn insert(&mut self, t: T) {
        self.stack.push(t);
    }

    fn first(&self) -> Option<&T> {
        self.stack.last()
    }

    fn remove_first(&mut self) -> Option<T> {
        self.stack.pop()
    }
}

/// First-in-first-out waiting (breadth-first search order).
pub struct Fifo<T> {
    queue: VecDeque<T>,
}

impl<T> Fifo<T> {
    pub fn new() -> Fifo<T> {
        Fifo { queue: VecDeque::new() }
    }
}

impl<T> Default for Fifo<T> {
    fn default() -> Fifo<T> {
        Fifo::new()
    }
}

impl<T> Waiting<T> for Fifo<T> {
    fn is_empty(&mut self) -> bool {
        self.queue.is_empty()
    }

    fn insert(&mut self, t: T) {
        self.queue.push_back(t);
    }

    fn first(&self) -> Option<&T> {
        self.queue.front()
    }

    fn remove_first(&mut self) -> Option<T> {
        self.queue.pop_front()
    }
}

/// Filtering wrapper: the container appears to hold only elements matching
/// the filter. Elements failing it on insertion are rejected; elements that
/// stop matching while enqueued are dropped when they reach the head.
pub struct FilterWaiting<W, F> {
    inner: W,
    filter: F,
}

impl<W, F> FilterWaiting<W, F> {
    pub fn new(inner: W, filter: F) -> FilterWaiting<W, F> {
        FilterWaiting { inner, filter }
    }
}

impl<W, F> FilterWaiting<W, F> {
    /// Drop dead elements until the head is live or the container is empty.
    fn skip_bad<T>(&mut self)
    where
        W: Waiting<T>,
        F: Fn(&T) -> bool,
    {
        loop {
            match self.inner.first() {
                Some(t) if !(self.filter)(t) => {}
                _ => return,
            }
            self.inner.remove_first();
        }
    }
}

impl<W, T, F> Waiting<T> for FilterWaiting<W, F>
where
    W: Waiting<T>,
    F: Fn(&T) -> bool,
{
    fn is_empty(&mut self) -> bool {
        self.skip_bad();
        self.inner.is_empty()
    }

    fn insert(&mut self, t: T) {
        if (self.filter)(&t) {
            self.inner.insert(t);
        }
    }

    fn first(&self) -> Option<&T> {
        // The head may be dead until the next mutating call scrubs it.
        self.inner.first().filter(|t| (self.filter)(*t))
    }

    fn remove_first(&mut self) -> Option<T> {
        self.skip_bad();
        self.inner.remove_first()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn lifo_order() {
        let mut w = Lifo::new();
        w.insert(1);
        w.insert(2);
        w.insert(3);
        assert_eq!(w.remove_first(), Some(3));
        assert_eq!(w.remove_first(), Some(2));
        w.insert(4);
        assert_eq!(w.remove_first(), Some(4));
        assert_eq!(w.remove_first(), Some(1));
        assert!(w.is_empty());
    }

    #[test]
    fn fifo_order() {
        let mut w = Fifo::new();
        w.insert(1);
        w.insert(2);
        w.insert(3);
        assert_eq!(w.remove_first(), Some(1));
        w.insert(4);
        assert_eq!(w.remove_first(), Some(2));
        assert_eq!(w.remove_first(), Some(3));
        assert_eq!(w.remove_first(), Some(4));
        assert!(w.is_empty());
    }

    #[test]
    fn filter_scrubs_dead_elements() {
        let flags: Vec<Rc<Cell<bool>>> = (0..4).map(|_| Rc::new(Cell::new(true))).collect();
        let probe: Vec<Rc<Cell<bool>>> = flags.clone();
        let mut w = FilterWaiting::new(Fifo::new(), move |i: &usize| probe[*i].get());
        for i in 0..4 {
            w.insert(i);
        }
        // 0 and 2 die while enqueued.
        flags[0].set(false);
        flags[2].set(false);
        assert_eq!(w.remove_first(), Some(1));
        assert_eq!(w.remove_first(), Some(3));
        assert!(w.is_empty());
    }

    #[test]
    fn filter_rejects_on_insert() {
        let mut w = FilterWaiting::new(Lifo::new(), |i: &usize| *i % 2 == 0);
        for i in 0..5 {
            w.insert(i);
        }
        assert_eq!(w.remove_first(), Some(4));
        assert_eq!(w.remove_first(), Some(2));
        assert_eq!(w.remove_first(), Some(0));
        assert_eq!(w.remove_first(), None);
    }

    #[test]
    fn filter_preserves_order_of_live_elements() {
        let flags: Vec<Rc<Cell<bool>>> = (0..6).map(|_| Rc::new(Cell::new(true))).collect();
        let probe = flags.clone();
        let mut w = FilterWaiting::new(Lifo::new(), move |i: &usize| probe[*i].get());
        for i in 0..5 {
            w.insert(i);
        }
        flags[4].set(false);
        flags[2].set(false);
        assert_eq!(w.remove_first(), Some(3));
        // A fresh insert pops before older live elements under LIFO.
        w.insert(5);
        assert_eq!(w.remove_first(), Some(5));
        assert_eq!(w.remove_first(), Some(1));
        assert_eq!(w.remove_first(), Some(0));
        assert!(w.is_empty());
    }
}
