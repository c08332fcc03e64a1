//! Per-run heap meter.
//!
//! Every string and list a program creates holds a [`Charge`] against the
//! run's [`Heap`]; the charge is credited back when the object is dropped.
//! Allocation sites call [`Heap::ensure`] before building large values so
//! that a request like `[0] * 10**9` fails before any memory is touched.

use crate::runtime::value::ListObj;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

/// Accounted cost of any heap object beyond its payload
pub const OBJECT_OVERHEAD: u64 = 64;

/// Accounted cost of one list slot
pub const SLOT_SIZE: u64 = std::mem::size_of::<crate::runtime::value::Value>() as u64;

const PRUNE_THRESHOLD: usize = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryExceeded;

impl fmt::Display for MemoryExceeded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "memory limit exceeded")
    }
}

pub struct Heap {
    limit: u64,
    used: Cell<u64>,
    peak: Cell<u64>,
    /// Every list created during the run, so cycles can be broken at teardown
    lists: RefCell<Vec<Weak<ListObj>>>,
}

impl Heap {
    pub fn new(limit: u64) -> Rc<Self> {
        Rc::new(Self {
            limit,
            used: Cell::new(0),
            peak: Cell::new(0),
            lists: RefCell::new(Vec::new()),
        })
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn used(&self) -> u64 {
        self.used.get()
    }

    pub fn peak(&self) -> u64 {
        self.peak.get()
    }

    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.used.get())
    }

    /// Fail if `bytes` more could not be charged right now
    pub fn ensure(&self, bytes: u64) -> Result<(), MemoryExceeded> {
        match self.used.get().checked_add(bytes) {
            Some(total) if total <= self.limit => Ok(()),
            _ => Err(MemoryExceeded),
        }
    }

    pub fn charge(self: &Rc<Self>, bytes: u64) -> Result<Charge, MemoryExceeded> {
        self.debit(bytes)?;
        Ok(Charge {
            heap: Rc::clone(self),
            bytes,
        })
    }

    fn debit(&self, bytes: u64) -> Result<(), MemoryExceeded> {
        self.ensure(bytes)?;
        let used = self.used.get() + bytes;
        self.used.set(used);
        if used > self.peak.get() {
            self.peak.set(used);
        }
        Ok(())
    }

    fn credit(&self, bytes: u64) {
        self.used.set(self.used.get().saturating_sub(bytes));
    }

    pub fn track_list(&self, list: &Rc<ListObj>) {
        let mut lists = self.lists.borrow_mut();
        if lists.len() >= PRUNE_THRESHOLD && lists.len().is_power_of_two() {
            lists.retain(|weak| weak.strong_count() > 0);
        }
        lists.push(Rc::downgrade(list));
    }

    /// Empty every list still alive. Reference cycles between lists are
    /// broken here, and no drop recurses because all of them are held
    /// strongly while their contents are released.
    pub fn release_all(&self) {
        let live: Vec<Rc<ListObj>> = self
            .lists
            .borrow_mut()
            .drain(..)
            .filter_map(|weak| weak.upgrade())
            .collect();
        for list in &live {
            list.clear();
        }
    }
}

/// A live debit against a [`Heap`]
pub struct Charge {
    heap: Rc<Heap>,
    bytes: u64,
}

impl Charge {
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Extend this charge in place
    pub fn grow(&mut self, extra: u64) -> Result<(), MemoryExceeded> {
        self.heap.debit(extra)?;
        self.bytes += extra;
        Ok(())
    }
}

impl Drop for Charge {
    fn drop(&mut self) {
        self.heap.credit(self.bytes);
    }
}

impl fmt::Debug for Charge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Charge").field("bytes", &self.bytes).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::value::Value;

    #[test]
    fn test_charge_and_credit() {
        let heap = Heap::new(1000);
        let a = heap.charge(400).unwrap();
        let b = heap.charge(500).unwrap();
        assert_eq!(heap.used(), 900);
        assert_eq!(heap.charge(200).unwrap_err(), MemoryExceeded);
        drop(a);
        assert_eq!(heap.used(), 500);
        assert_eq!(heap.peak(), 900);
        drop(b);
        assert_eq!(heap.used(), 0);
    }

    #[test]
    fn test_ensure_does_not_debit() {
        let heap = Heap::new(100);
        assert!(heap.ensure(100).is_ok());
        assert!(heap.ensure(101).is_err());
        assert!(heap.ensure(u64::MAX).is_err());
        assert_eq!(heap.used(), 0);
    }

    #[test]
    fn test_grow() {
        let heap = Heap::new(100);
        let mut charge = heap.charge(10).unwrap();
        charge.grow(80).unwrap();
        assert!(charge.grow(20).is_err());
        assert_eq!(charge.bytes(), 90);
        drop(charge);
        assert_eq!(heap.used(), 0);
    }

    #[test]
    fn test_release_all_breaks_cycles() {
        let heap = Heap::new(1 << 20);
        let list = ListObj::new(&heap, vec![Value::None]).unwrap();
        list.set(0, Value::List(Rc::clone(&list)));
        let weak = Rc::downgrade(&list);
        drop(list);
        // The self-reference keeps it alive.
        assert!(weak.upgrade().is_some());
        heap.release_all();
        assert!(weak.upgrade().is_none());
        assert_eq!(heap.used(), 0);
    }
}
