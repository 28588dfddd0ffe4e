use rusqlite::Connection;

/// Pragmas shared by every ledger connection. `busy_timeout` comes first so
/// the journal mode switch waits on concurrent writers instead of failing.
pub fn configure_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "PRAGMA busy_timeout = 5000;\n\
         PRAGMA journal_mode = WAL;\n\
         PRAGMA synchronous = NORMAL;\n\
         PRAGMA temp_store = MEMORY;\n",
    )
}
