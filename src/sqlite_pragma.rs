//! Shared SQLite connection tuning

use rusqlite::Connection;
use std::time::Duration;

/// Apply the PRAGMAs every alertflow connection runs with
///
/// WAL journal, NORMAL sync, in-memory temp store, 64 MB page cache and a
/// 5s busy timeout. In-memory databases report `memory` as their journal mode.
pub fn apply_optimized_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    let journal_mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    conn.pragma_update(None, "cache_size", -65_536)?;
    conn.busy_timeout(Duration::from_secs(5))?;

    log::debug!("📊 SQLite PRAGMAs applied (journal_mode={})", journal_mode);
    Ok(())
}
