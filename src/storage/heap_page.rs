use std::sync::Arc;

use parking_lot::Mutex;

use crate::common::{EngineError, PageId, Result, TransactionId};
use crate::storage::tuple::{RecordId, Tuple};

/// How the buffer pool hands pages out. The page lock held through the
/// lock manager decides who may mutate; the mutex only keeps concurrent
/// reads of the struct itself sound.
pub type PageHandle = Arc<Mutex<HeapPage>>;

/// One resident page of fixed-size tuples: a slot-usage bitmap header
/// followed by the tuple slots. A page of `page_size` bytes fits
/// `page_size * 8 / (tuple_size * 8 + 1)` slots, one header bit per slot.
pub struct HeapPage {
    pid: PageId,
    page_size: usize,
    tuple_size: usize,
    used: Vec<bool>,
    slots: Vec<Vec<u8>>,
    dirtier: Option<TransactionId>,
    before_image: Vec<u8>,
}

pub fn slots_per_page(page_size: usize, tuple_size: usize) -> usize {
    (page_size * 8) / (tuple_size * 8 + 1)
}

impl HeapPage {
    pub fn from_bytes(pid: PageId, bytes: &[u8], tuple_size: usize) -> Self {
        let page_size = bytes.len();
        let num_slots = slots_per_page(page_size, tuple_size);
        let header_len = (num_slots + 7) / 8;

        let mut used = Vec::with_capacity(num_slots);
        for i in 0..num_slots {
            used.push(bytes[i / 8] & (1 << (i % 8)) != 0);
        }
        let mut slots = Vec::with_capacity(num_slots);
        for i in 0..num_slots {
            let start = header_len + i * tuple_size;
            slots.push(bytes[start..start + tuple_size].to_vec());
        }

        Self {
            pid,
            page_size,
            tuple_size,
            used,
            slots,
            dirtier: None,
            before_image: bytes.to_vec(),
        }
    }

    pub fn empty(pid: PageId, page_size: usize, tuple_size: usize) -> Self {
        Self::from_bytes(pid, &vec![0u8; page_size], tuple_size)
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.page_size];
        let header_len = (self.used.len() + 7) / 8;
        for (i, used) in self.used.iter().enumerate() {
            if *used {
                out[i / 8] |= 1 << (i % 8);
            }
        }
        for (i, slot) in self.slots.iter().enumerate() {
            if self.used[i] {
                let start = header_len + i * self.tuple_size;
                out[start..start + self.tuple_size].copy_from_slice(slot);
            }
        }
        out
    }

    pub fn id(&self) -> PageId {
        self.pid
    }

    pub fn num_slots(&self) -> usize {
        self.used.len()
    }

    pub fn free_slots(&self) -> usize {
        self.used.iter().filter(|u| !**u).count()
    }

    /// Puts the tuple in the first free slot and stamps its record id.
    pub fn insert(&mut self, t: &mut Tuple) -> Result<usize> {
        if t.data.len() != self.tuple_size {
            return Err(EngineError::TupleSize {
                got: t.data.len(),
                want: self.tuple_size,
            });
        }
        let slot = self
            .used
            .iter()
            .position(|u| !*u)
            .ok_or(EngineError::PageFull(self.pid))?;
        self.used[slot] = true;
        self.slots[slot].copy_from_slice(&t.data);
        t.record_id = Some(RecordId {
            pid: self.pid,
            slot,
        });
        Ok(slot)
    }

    pub fn delete(&mut self, slot: usize) -> Result<()> {
        if slot >= self.used.len() {
            return Err(EngineError::InvalidSlot(slot));
        }
        if !self.used[slot] {
            return Err(EngineError::EmptySlot(slot));
        }
        self.used[slot] = false;
        Ok(())
    }

    pub fn tuple(&self, slot: usize) -> Result<Tuple> {
        if slot >= self.used.len() {
            return Err(EngineError::InvalidSlot(slot));
        }
        if !self.used[slot] {
            return Err(EngineError::EmptySlot(slot));
        }
        Ok(Tuple {
            record_id: Some(RecordId {
                pid: self.pid,
                slot,
            }),
            data: self.slots[slot].clone(),
        })
    }

    pub fn tuples(&self) -> Vec<Tuple> {
        (0..self.used.len())
            .filter(|i| self.used[*i])
            .filter_map(|i| self.tuple(i).ok())
            .collect()
    }

    /// The transaction that last dirtied this page, if it is dirty at all.
    pub fn dirtier(&self) -> Option<TransactionId> {
        self.dirtier
    }

    pub fn mark_dirty(&mut self, tid: TransactionId) {
        self.dirtier = Some(tid);
    }

    pub fn mark_clean(&mut self) {
        self.dirtier = None;
    }

    /// Page bytes as of the last logged update. Loaded pages start with
    /// their on-disk bytes; the pool advances the snapshot every time it
    /// appends an update record.
    pub fn before_image(&self) -> &[u8] {
        &self.before_image
    }

    pub fn set_before_image(&mut self, bytes: Vec<u8>) {
        self.before_image = bytes;
    }
}
