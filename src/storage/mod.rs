mod db_files;
mod file;
mod heap_page;
mod table_file;
mod tuple;

pub use db_files::DbFiles;
pub use file::{File, MemoryFile, PosixFile};
pub use heap_page::{HeapPage, PageHandle};
pub use table_file::{TableFile, TableRegistry};
pub use tuple::{RecordId, Tuple};
