use env_logger::Builder;
use log::{info, LevelFilter};

use pagevault::{Database, EngineConfig, Permissions, Tuple};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    Builder::new().filter_level(LevelFilter::Info).init();

    let dir = std::env::temp_dir().join(format!("pagevault-demo-{}", std::process::id()));
    let db = Database::open(&dir, EngineConfig::default())?;

    let table = db.create_table("demo", 16)?;
    info!("created table {}", table);

    let tid = db.begin()?;
    for i in 0..4u8 {
        db.pool().insert_tuple(tid, table, Tuple::new(vec![i; 16]))?;
    }
    db.commit(tid)?;
    info!("committed 4 tuples");

    let tid = db.begin()?;
    db.pool().insert_tuple(tid, table, Tuple::new(vec![9; 16]))?;
    db.abort(tid)?;
    info!("aborted a fifth insert");

    db.checkpoint()?;

    let reader = db.begin()?;
    let table_file = db.tables().get(table)?;
    let mut count = 0;
    for page_no in 0..table_file.num_pages()? as u32 {
        let pid = pagevault::PageId::new(table, page_no);
        let page = db.pool().get_page(reader, pid, Permissions::ReadOnly)?;
        count += page.lock().tuples().len();
    }
    db.commit(reader)?;
    info!("table holds {} tuple(s)", count);

    db.files().cleanup()?;
    Ok(())
}
