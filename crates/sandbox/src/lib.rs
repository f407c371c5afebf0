//! Read-only query sandbox over the SQLite invoices store.
//!
//! Free-form SQL goes through a validation policy (allowed statement
//! types, forbidden mutating keywords) before execution; results are
//! row-capped and cached.  A fixed catalog of named, parameterized
//! operations ("tools") covers the common question shapes and is the
//! contract the planner's JSON plans reference.

pub mod catalog;
pub mod query;
pub mod schema;
pub mod validate;

pub use catalog::{tool_definitions, ToolReply, EXECUTE_SQL, GET_SCHEMA};
pub use query::{QueryResult, SqliteSandbox};
pub use schema::SchemaInfo;

#[cfg(test)]
pub(crate) mod fixtures {
    use ia_domain::config::SandboxConfig;
    use rusqlite::Connection;

    use crate::query::SqliteSandbox;

    /// A seeded on-disk database with the invoices/items schema.
    /// Returns the tempdir so the file outlives the sandbox.
    pub fn seeded_sandbox(max_result_rows: u64) -> (tempfile::TempDir, SqliteSandbox) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE invoices (
                id INTEGER PRIMARY KEY,
                invoice_number TEXT NOT NULL,
                invoice_date TEXT NOT NULL,
                vendor_name TEXT NOT NULL,
                total_cents INTEGER NOT NULL,
                currency_code TEXT NOT NULL,
                path TEXT,
                raw_text TEXT
            );
            CREATE TABLE items (
                id INTEGER PRIMARY KEY,
                document_id INTEGER NOT NULL REFERENCES invoices(id),
                idx INTEGER NOT NULL,
                description TEXT,
                qty REAL,
                unit_price_cents INTEGER,
                line_total_cents INTEGER,
                category TEXT
            );
            CREATE INDEX idx_items_document ON items(document_id);

            INSERT INTO invoices VALUES
                (1, 'INV-001', '2024-01-10', 'Acme Corp',  125000, 'USD', NULL, 'office chairs'),
                (2, 'INV-002', '2024-02-05', 'Globex',      89000, 'EUR', NULL, 'cloud hosting'),
                (3, 'INV-003', '2024-03-20', 'Acme Corp',  310000, 'USD', NULL, 'standing desks'),
                (4, 'INV-004', '2024-03-22', 'Initech',     45000, 'USD', NULL, 'printer toner');

            INSERT INTO items VALUES
                (1, 1, 0, 'Office chair',   4, 25000, 100000, 'Furniture'),
                (2, 1, 1, 'Floor mat',      5,  5000,  25000, 'Furniture'),
                (3, 3, 0, 'Standing desk',  2, 150000, 300000, 'Furniture'),
                (4, 3, 1, 'Cable tray',     2,   5000,  10000, 'Accessories'),
                (5, 2, 0, 'Hosting (year)', 1,  89000,  89000, 'Services'),
                (6, 4, 0, 'Toner pack',     3,  15000,  45000, 'Supplies');
            "#,
        )
        .unwrap();

        let sandbox = SqliteSandbox::new(SandboxConfig {
            db_path: path,
            max_result_rows,
            query_cache_ttl_secs: 60,
        });
        (dir, sandbox)
    }
}
