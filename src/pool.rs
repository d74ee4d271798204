//! Fixed-capacity table of TCBs addressed by small integer handles.
//!
//! A handle is the index of the slot a TCB occupies. Slots are reused once
//! freed, so a handle is only meaningful while its TCB is alive.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::StcpError;

pub struct SocketTable<T> {
    slots: Mutex<Vec<Option<Arc<T>>>>,
}

impl<T> SocketTable<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Mutex::new((0..capacity).map(|_| None).collect()),
        }
    }

    /// Place `tcb` in the lowest free slot and return its handle.
    pub fn insert(&self, tcb: Arc<T>) -> Result<usize, StcpError> {
        let mut slots = self.slots.lock();
        let cap = slots.len();
        let (id, slot) = slots
            .iter_mut()
            .enumerate()
            .find(|(_, s)| s.is_none())
            .ok_or(StcpError::NoFreeSlot(cap))?;
        *slot = Some(tcb);
        Ok(id)
    }

    pub fn get(&self, id: usize) -> Result<Arc<T>, StcpError> {
        self.slots
            .lock()
            .get(id)
            .and_then(Clone::clone)
            .ok_or(StcpError::InvalidSocket(id))
    }

    /// Free slot `id` only if it still holds `tcb`. A delayed reaper must not
    /// evict a newer TCB that reused the slot.
    pub fn remove_if(&self, id: usize, tcb: &Arc<T>) -> bool {
        let mut slots = self.slots.lock();
        match slots.get_mut(id) {
            Some(slot) if slot.as_ref().is_some_and(|cur| Arc::ptr_eq(cur, tcb)) => {
                *slot = None;
                true
            }
            _ => false,
        }
    }

    /// First live TCB satisfying `pred`.
    pub fn find(&self, mut pred: impl FnMut(&T) -> bool) -> Option<Arc<T>> {
        self.slots
            .lock()
            .iter()
            .flatten()
            .find(|t| pred(t))
            .cloned()
    }

    /// Snapshot of every live TCB.
    pub fn live(&self) -> Vec<Arc<T>> {
        self.slots.lock().iter().flatten().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_are_lowest_free_slot() {
        let t = SocketTable::new(3);
        let a = Arc::new('a');
        assert_eq!(t.insert(Arc::clone(&a)).unwrap(), 0);
        assert_eq!(t.insert(Arc::new('b')).unwrap(), 1);
        assert!(t.remove_if(0, &a));
        assert_eq!(t.insert(Arc::new('c')).unwrap(), 0);
        assert_eq!(*t.get(0).unwrap(), 'c');
    }

    #[test]
    fn full_table_rejects_insert() {
        let t = SocketTable::new(1);
        t.insert(Arc::new(1)).unwrap();
        assert!(matches!(t.insert(Arc::new(2)), Err(StcpError::NoFreeSlot(1))));
    }

    #[test]
    fn stale_and_out_of_range_handles_are_invalid() {
        let t = SocketTable::<u8>::new(2);
        assert!(matches!(t.get(0), Err(StcpError::InvalidSocket(0))));
        assert!(matches!(t.get(5), Err(StcpError::InvalidSocket(5))));
    }

    #[test]
    fn remove_if_spares_a_reused_slot() {
        let t = SocketTable::new(1);
        let old = Arc::new(1);
        let id = t.insert(Arc::clone(&old)).unwrap();
        assert!(t.remove_if(id, &old));
        let new = Arc::new(2);
        t.insert(Arc::clone(&new)).unwrap();

        assert!(!t.remove_if(id, &old));
        assert_eq!(*t.get(id).unwrap(), 2);
        assert!(t.remove_if(id, &new));
        assert!(t.get(id).is_err());
    }

    #[test]
    fn find_matches_live_entries() {
        let t = SocketTable::new(4);
        t.insert(Arc::new(10)).unwrap();
        t.insert(Arc::new(20)).unwrap();
        assert_eq!(t.find(|v| *v > 15).as_deref(), Some(&20));
        assert!(t.find(|v| *v > 25).is_none());
        assert_eq!(t.live().len(), 2);
    }
}
