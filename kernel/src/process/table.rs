//! Dense id-indexed table used for processes and threads
//!
//! Ids are `slot index + 1`, so 0 is never handed out and can stand for
//! "none" at external interfaces. A freed slot is reused by the next insert,
//! lowest first, which keeps ids dense.

use alloc::vec::Vec;

use crate::error::{KernelError, KernelResult};

/// Fixed-capacity table of `T` keyed by a dense integer id
#[derive(Debug)]
pub struct IdTable<T> {
    slots: Vec<Option<T>>,
    len: usize,
    capacity: usize,
    /// Name reported when the table is full
    resource: &'static str,
}

impl<T> IdTable<T> {
    pub fn new(capacity: usize, resource: &'static str) -> Self {
        Self {
            slots: Vec::new(),
            len: 0,
            capacity,
            resource,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.len >= self.capacity
    }

    /// Allocate the lowest free id and store the entry built for it
    pub fn insert_with(&mut self, build: impl FnOnce(u64) -> T) -> KernelResult<u64> {
        if self.is_full() {
            return Err(KernelError::ResourceExhausted {
                resource: self.resource,
            });
        }

        let index = match self.slots.iter().position(Option::is_none) {
            Some(index) => index,
            None => {
                self.slots.push(None);
                self.slots.len() - 1
            }
        };
        let id = index as u64 + 1;
        self.slots[index] = Some(build(id));
        self.len += 1;
        Ok(id)
    }

    fn index(id: u64) -> Option<usize> {
        id.checked_sub(1).map(|i| i as usize)
    }

    pub fn get(&self, id: u64) -> Option<&T> {
        self.slots.get(Self::index(id)?)?.as_ref()
    }

    pub fn get_mut(&mut self, id: u64) -> Option<&mut T> {
        self.slots.get_mut(Self::index(id)?)?.as_mut()
    }

    pub fn contains(&self, id: u64) -> bool {
        self.get(id).is_some()
    }

    /// Remove an entry, making its id available again
    pub fn remove(&mut self, id: u64) -> Option<T> {
        let entry = self.slots.get_mut(Self::index(id)?)?.take()?;
        self.len -= 1;
        // Keep the vector tight so iteration stays proportional to live ids
        while matches!(self.slots.last(), Some(None)) {
            self.slots.pop();
        }
        Some(entry)
    }

    /// Live entries in id order
    pub fn iter(&self) -> impl Iterator<Item = (u64, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|entry| (i as u64 + 1, entry)))
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.slots.iter_mut().filter_map(Option::as_mut)
    }

    /// Live ids in ascending order
    pub fn ids(&self) -> Vec<u64> {
        self.iter().map(|(id, _)| id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_start_at_one() {
        let mut table = IdTable::new(4, "test table");
        assert_eq!(table.insert_with(|id| id * 10).unwrap(), 1);
        assert_eq!(table.insert_with(|id| id * 10).unwrap(), 2);
        assert_eq!(table.get(2), Some(&20));
        assert_eq!(table.get(0), None);
    }

    #[test]
    fn test_lowest_free_id_reused() {
        let mut table = IdTable::new(4, "test table");
        for _ in 0..3 {
            table.insert_with(|id| id).unwrap();
        }
        assert_eq!(table.remove(2), Some(2));
        assert!(!table.contains(2));
        assert_eq!(table.insert_with(|id| id).unwrap(), 2);
        assert_eq!(table.ids(), alloc::vec![1, 2, 3]);
    }

    #[test]
    fn test_capacity_enforced() {
        let mut table = IdTable::new(2, "test table");
        table.insert_with(|_| ()).unwrap();
        table.insert_with(|_| ()).unwrap();
        assert_eq!(
            table.insert_with(|_| ()),
            Err(KernelError::ResourceExhausted {
                resource: "test table"
            })
        );
        table.remove(1);
        assert!(table.insert_with(|_| ()).is_ok());
    }
}
