//! Database schema migrations for SQLite.
//!
//! Each migration transforms the schema from version N to N+1.

use rusqlite::Connection;

use crate::error::{Result, StoreError};

/// Current schema version.
pub const CURRENT_VERSION: u32 = 2;

/// Initialize or migrate the database schema. Idempotent.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let current: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;

        for version in (current + 1)..=CURRENT_VERSION {
            apply_migration(&tx, version)?;

            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, crate::now_millis()],
            )?;
        }

        tx.commit()?;
    }

    Ok(())
}

fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
        2 => apply_v2(conn),
        _ => Err(StoreError::Migration(format!(
            "unknown migration version: {}",
            version
        ))),
    }
}

/// Migration v1: communities, history, requests, keys.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE communities (
            community_id BLOB PRIMARY KEY,    -- 32 bytes, community public key
            description BLOB NOT NULL,        -- CBOR SignedDescription
            clock INTEGER NOT NULL,
            private_key BLOB,                 -- 32 bytes, control node only
            joined INTEGER NOT NULL DEFAULT 0,
            updated_at INTEGER NOT NULL
        );

        CREATE TABLE description_history (
            community_id BLOB NOT NULL,
            clock INTEGER NOT NULL,
            digest BLOB NOT NULL,             -- 32 bytes
            description BLOB NOT NULL,        -- CBOR SignedDescription
            recorded_at INTEGER NOT NULL,
            PRIMARY KEY (community_id, clock)
        );

        CREATE TABLE requests_to_join (
            request_id BLOB PRIMARY KEY,
            community_id BLOB NOT NULL,
            public_key BLOB NOT NULL,
            clock INTEGER NOT NULL,           -- requester clock, unix seconds
            state TEXT NOT NULL,
            ens_name TEXT,
            our INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE revealed_accounts (
            request_id BLOB NOT NULL,
            position INTEGER NOT NULL,
            address BLOB NOT NULL,            -- 20 bytes
            wallet_key BLOB NOT NULL,         -- 32 bytes
            signature BLOB NOT NULL,          -- 64 bytes
            chain_ids BLOB NOT NULL,          -- CBOR array
            is_airdrop_address INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (request_id, position)
        );

        CREATE TABLE encryption_keys (
            key_id BLOB PRIMARY KEY,
            community_id BLOB NOT NULL,
            chat_id BLOB,                     -- NULL for the community key
            key BLOB NOT NULL,
            created_at INTEGER NOT NULL
        );

        CREATE TABLE key_deliveries (
            key_id BLOB NOT NULL,
            recipient BLOB NOT NULL,
            community_id BLOB NOT NULL,
            state TEXT NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (key_id, recipient)
        );

        CREATE INDEX idx_requests_community_state ON requests_to_join(community_id, state);
        CREATE INDEX idx_keys_community_chat ON encryption_keys(community_id, chat_id, created_at);
        CREATE INDEX idx_deliveries_community_state ON key_deliveries(community_id, state);
        "#,
    )?;

    Ok(())
}

/// Migration v2: members reevaluation bookkeeping.
fn apply_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE members_reevaluations (
            community_id BLOB PRIMARY KEY,
            last_run INTEGER NOT NULL         -- unix ms
        );
        "#,
    )?;

    Ok(())
}
