use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use log::trace;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::buffer::BufferPool;
use crate::common::{EngineError, PageId, Permissions, Result, TransactionId};
use crate::storage::file::{File, MemoryFile, PosixFile};
use crate::storage::heap_page::{slots_per_page, HeapPage, PageHandle};
use crate::storage::tuple::Tuple;
use crate::wal::PageImage;

/// A heap file of fixed-size tuples: the table-side collaborator the
/// buffer pool and recovery read and write pages through.
pub struct TableFile {
    id: u32,
    name: String,
    tuple_size: usize,
    page_size: usize,
    file: Mutex<Box<dyn File>>,
}

impl TableFile {
    pub fn new(
        id: u32,
        name: &str,
        tuple_size: usize,
        page_size: usize,
        file: Box<dyn File>,
    ) -> Result<Self> {
        if slots_per_page(page_size, tuple_size) == 0 {
            return Err(EngineError::Catalog(format!(
                "{}-byte tuples do not fit a {}-byte page",
                tuple_size, page_size
            )));
        }
        Ok(Self {
            id,
            name: name.to_string(),
            tuple_size,
            page_size,
            file: Mutex::new(file),
        })
    }

    pub fn in_memory(id: u32, name: &str, tuple_size: usize, page_size: usize) -> Result<Self> {
        Self::new(id, name, tuple_size, page_size, Box::new(MemoryFile::new()))
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tuple_size(&self) -> usize {
        self.tuple_size
    }

    pub fn num_pages(&self) -> Result<usize> {
        Ok(self.file.lock().size()? / self.page_size)
    }

    pub fn read_page(&self, pid: PageId) -> Result<HeapPage> {
        let mut file = self.file.lock();
        let offset = pid.page_no as usize * self.page_size;
        if offset + self.page_size > file.size()? {
            return Err(EngineError::PageNotFound(pid));
        }
        let bytes = file.read_block(offset, self.page_size)?;
        Ok(HeapPage::from_bytes(pid, &bytes, self.tuple_size))
    }

    pub fn write_page(&self, page: &HeapPage) -> Result<()> {
        let offset = page.id().page_no as usize * self.page_size;
        self.file.lock().write_block(offset, &page.serialize())
    }

    /// Raw page bytes, bypassing the heap-page codec. Recovery compares
    /// and installs log images through these.
    pub fn read_image(&self, pid: PageId) -> Result<PageImage> {
        let mut file = self.file.lock();
        let offset = pid.page_no as usize * self.page_size;
        if offset + self.page_size > file.size()? {
            return Err(EngineError::PageNotFound(pid));
        }
        let data = file.read_block(offset, self.page_size)?;
        Ok(PageImage::new(pid, data))
    }

    /// Installs raw page bytes, extending the file if the page does not
    /// exist yet (redo may replay a page that was never flushed).
    pub fn write_image(&self, image: &PageImage) -> Result<()> {
        let offset = image.pid.page_no as usize * self.page_size;
        self.file.lock().write_block(offset, &image.data)
    }

    /// Finds a page with a free slot (appending a fresh one when the file
    /// is full), inserts, and returns the dirtied pages for the pool to
    /// mark and log.
    pub fn insert_tuple(
        &self,
        tid: TransactionId,
        mut t: Tuple,
        pool: &BufferPool,
    ) -> Result<Vec<PageHandle>> {
        if t.data.len() != self.tuple_size {
            return Err(EngineError::TupleSize {
                got: t.data.len(),
                want: self.tuple_size,
            });
        }

        for page_no in 0..self.num_pages()? as u32 {
            let pid = PageId::new(self.id, page_no);
            let handle = pool.get_page(tid, pid, Permissions::ReadWrite)?;
            {
                let mut page = handle.lock();
                if page.free_slots() > 0 {
                    page.insert(&mut t)?;
                    drop(page);
                    return Ok(vec![handle]);
                }
                if page.dirtier() == Some(tid) {
                    // full, but ours: keep the lock, keep scanning
                    continue;
                }
            }
            // full and untouched by this transaction, so the exclusive
            // lock is not protecting anything yet: give it back
            pool.release_page(tid, pid);
        }

        let pid = self.allocate_page()?;
        trace!("table {} grew to page {}", self.id, pid.page_no);
        let handle = pool.get_page(tid, pid, Permissions::ReadWrite)?;
        {
            let mut page = handle.lock();
            page.insert(&mut t)?;
        }
        Ok(vec![handle])
    }

    pub fn delete_tuple(
        &self,
        tid: TransactionId,
        t: &Tuple,
        pool: &BufferPool,
    ) -> Result<Vec<PageHandle>> {
        let rid = t.record_id.ok_or(EngineError::MissingRecordId)?;
        let handle = pool.get_page(tid, rid.pid, Permissions::ReadWrite)?;
        {
            let mut page = handle.lock();
            page.delete(rid.slot)?;
        }
        Ok(vec![handle])
    }

    fn allocate_page(&self) -> Result<PageId> {
        let mut file = self.file.lock();
        let page_no = file.size()? / self.page_size;
        file.write_block(page_no * self.page_size, &vec![0u8; self.page_size])?;
        Ok(PageId::new(self.id, page_no as u32))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TableMeta {
    id: u32,
    name: String,
    tuple_size: usize,
}

/// Maps table ids to their files. This is the slice of a catalog the core
/// needs; it is an owned component, not ambient global state. When backed
/// by a directory the metadata persists as a bincode file so tables
/// reopen across restarts.
pub struct TableRegistry {
    page_size: usize,
    storage: Option<(PathBuf, PathBuf)>, // (data dir, catalog file)
    tables: Mutex<HashMap<u32, Arc<TableFile>>>,
}

impl TableRegistry {
    /// A registry with no backing directory; tables live on in-memory
    /// files. Used by tests and throwaway engines.
    pub fn in_memory(page_size: usize) -> Self {
        Self {
            page_size,
            storage: None,
            tables: Mutex::new(HashMap::new()),
        }
    }

    pub fn open(data_dir: PathBuf, catalog_path: PathBuf, page_size: usize) -> Result<Self> {
        let mut tables = HashMap::new();
        if catalog_path.exists() {
            let bytes = fs::read(&catalog_path)?;
            let metas: Vec<TableMeta> = bincode::deserialize(&bytes)
                .map_err(|e| EngineError::Catalog(e.to_string()))?;
            for meta in metas {
                let file = PosixFile::open(&data_dir.join(format!("table_{}.dat", meta.id)))?;
                let table =
                    TableFile::new(meta.id, &meta.name, meta.tuple_size, page_size, Box::new(file))?;
                tables.insert(meta.id, Arc::new(table));
            }
        }
        Ok(Self {
            page_size,
            storage: Some((data_dir, catalog_path)),
            tables: Mutex::new(tables),
        })
    }

    pub fn create_table(&self, name: &str, tuple_size: usize) -> Result<u32> {
        let id = {
            let tables = self.tables.lock();
            tables.keys().max().map_or(1, |m| m + 1)
        };
        let table = match &self.storage {
            Some((data_dir, _)) => {
                let file = PosixFile::open(&data_dir.join(format!("table_{}.dat", id)))?;
                TableFile::new(id, name, tuple_size, self.page_size, Box::new(file))?
            }
            None => TableFile::in_memory(id, name, tuple_size, self.page_size)?,
        };
        self.tables.lock().insert(id, Arc::new(table));
        self.persist()?;
        Ok(id)
    }

    /// Adds an already-built table file, returning its id. Test scaffolding
    /// mostly; `create_table` is the normal path.
    pub fn register(&self, table: TableFile) -> u32 {
        let id = table.id();
        self.tables.lock().insert(id, Arc::new(table));
        id
    }

    pub fn get(&self, id: u32) -> Result<Arc<TableFile>> {
        self.tables
            .lock()
            .get(&id)
            .cloned()
            .ok_or(EngineError::UnknownTable(id))
    }

    pub fn table_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.tables.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    fn persist(&self) -> Result<()> {
        let Some((_, catalog_path)) = &self.storage else {
            return Ok(());
        };
        let metas: Vec<TableMeta> = {
            let tables = self.tables.lock();
            tables
                .values()
                .map(|t| TableMeta {
                    id: t.id(),
                    name: t.name().to_string(),
                    tuple_size: t.tuple_size(),
                })
                .collect()
        };
        let bytes =
            bincode::serialize(&metas).map_err(|e| EngineError::Catalog(e.to_string()))?;
        fs::write(catalog_path, bytes)?;
        Ok(())
    }
}
