//! SQLite implementation of the Store trait.
//!
//! This is the primary storage backend. It uses rusqlite with bundled
//! SQLite, wrapped in async via `tokio::task::spawn_blocking`.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use serde::Serialize;

use cohort_core::{
    Address, ChainId, ChatId, CommunityId, KeyId, PublicKey, RequestId, RequestState,
    RequestToJoin, RevealedAccount, Signature, SignedDescription,
};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::now_millis;
use crate::traits::{CommunityRecord, DeliveryMarker, DeliveryState, InsertResult, Store, StoredKey};

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path, running migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().map_err(|_| StoreError::Poisoned)?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Row codecs
// ─────────────────────────────────────────────────────────────────────────────

fn to_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(buf)
}

fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    ciborium::from_reader(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn fixed<const N: usize>(bytes: Vec<u8>, column: &str) -> Result<[u8; N]> {
    bytes.try_into().map_err(|b: Vec<u8>| {
        StoreError::InvalidData(format!("{column}: expected {N} bytes, got {}", b.len()))
    })
}

fn encode_description(description: &SignedDescription) -> Result<Vec<u8>> {
    to_cbor(description)
}

fn decode_description(bytes: &[u8]) -> Result<SignedDescription> {
    from_cbor(bytes)
}

type CommunityRow = (Vec<u8>, Vec<u8>, i64, Option<Vec<u8>>, bool);

fn community_row(row: &Row<'_>) -> rusqlite::Result<CommunityRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn community_from_row((id, description, clock, private_key, joined): CommunityRow) -> Result<CommunityRecord> {
    Ok(CommunityRecord {
        id: CommunityId::from_bytes(fixed(id, "community_id")?),
        description: decode_description(&description)?,
        clock: clock as u64,
        private_key: private_key.map(|k| fixed(k, "private_key")).transpose()?,
        joined,
    })
}

type RequestRow = (Vec<u8>, Vec<u8>, Vec<u8>, i64, String, Option<String>, bool);

fn request_row(row: &Row<'_>) -> rusqlite::Result<RequestRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn load_accounts(conn: &Connection, request_id: &[u8]) -> Result<Vec<RevealedAccount>> {
    let mut stmt = conn.prepare(
        "SELECT address, wallet_key, signature, chain_ids, is_airdrop_address
         FROM revealed_accounts WHERE request_id = ?1 ORDER BY position",
    )?;
    let rows = stmt
        .query_map(params![request_id], |row| {
            Ok((
                row.get::<_, Vec<u8>>(0)?,
                row.get::<_, Vec<u8>>(1)?,
                row.get::<_, Vec<u8>>(2)?,
                row.get::<_, Vec<u8>>(3)?,
                row.get::<_, bool>(4)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    rows.into_iter()
        .map(|(address, wallet_key, signature, chain_ids, is_airdrop_address)| {
            Ok(RevealedAccount {
                address: Address::from_bytes(fixed(address, "address")?),
                wallet_key: PublicKey::from_bytes(fixed(wallet_key, "wallet_key")?),
                signature: Signature::from_bytes(fixed(signature, "signature")?),
                chain_ids: from_cbor::<Vec<ChainId>>(&chain_ids)?,
                is_airdrop_address,
            })
        })
        .collect()
}

fn request_from_row(conn: &Connection, row: RequestRow) -> Result<RequestToJoin> {
    let (id, community_id, public_key, clock, state, ens_name, our) = row;
    let revealed_accounts = load_accounts(conn, &id)?;
    Ok(RequestToJoin {
        id: RequestId::from_bytes(fixed(id, "request_id")?),
        public_key: PublicKey::from_bytes(fixed(public_key, "public_key")?),
        community_id: CommunityId::from_bytes(fixed(community_id, "community_id")?),
        clock: clock as u64,
        ens_name,
        state: RequestState::parse(&state)
            .ok_or_else(|| StoreError::InvalidData(format!("unknown request state {state}")))?,
        revealed_accounts,
        our,
    })
}

type KeyRow = (Vec<u8>, Vec<u8>, Option<Vec<u8>>, Vec<u8>, i64);

fn key_row(row: &Row<'_>) -> rusqlite::Result<KeyRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn key_from_row((key_id, community_id, chat_id, key, created_at): KeyRow) -> Result<StoredKey> {
    Ok(StoredKey {
        community_id: CommunityId::from_bytes(fixed(community_id, "community_id")?),
        chat_id: chat_id
            .map(|c| fixed(c, "chat_id").map(ChatId::from_bytes))
            .transpose()?,
        key_id: KeyId::from_bytes(fixed(key_id, "key_id")?),
        key: fixed(key, "key")?,
        created_at: created_at as u64,
    })
}

const KEY_COLUMNS: &str = "key_id, community_id, chat_id, key, created_at";

#[async_trait]
impl Store for SqliteStore {
    async fn save_community(&self, record: &CommunityRecord) -> Result<()> {
        let description = encode_description(&record.description)?;
        let record = record.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO communities (community_id, description, clock, private_key, joined, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(community_id) DO UPDATE SET
                    description = excluded.description,
                    clock = excluded.clock,
                    private_key = excluded.private_key,
                    joined = excluded.joined,
                    updated_at = excluded.updated_at",
                params![
                    record.id.as_bytes().as_slice(),
                    description,
                    record.clock as i64,
                    record.private_key.as_ref().map(|k| k.as_slice()),
                    record.joined,
                    now_millis(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_community(&self, id: &CommunityId) -> Result<Option<CommunityRecord>> {
        let id = *id;
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT community_id, description, clock, private_key, joined
                 FROM communities WHERE community_id = ?1",
                params![id.as_bytes().as_slice()],
                community_row,
            )
            .optional()?
            .map(community_from_row)
            .transpose()
        })
        .await
    }

    async fn list_communities(&self) -> Result<Vec<CommunityId>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT community_id FROM communities ORDER BY community_id")?;
            let ids = stmt
                .query_map([], |row| row.get::<_, Vec<u8>>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            ids.into_iter()
                .map(|id| fixed(id, "community_id").map(CommunityId::from_bytes))
                .collect()
        })
        .await
    }

    async fn append_description(
        &self,
        community: &CommunityId,
        clock: u64,
        description: &SignedDescription,
    ) -> Result<InsertResult> {
        let community = *community;
        let digest = description.digest();
        let encoded = encode_description(description)?;
        self.with_conn(move |conn| {
            let existing: Option<Vec<u8>> = conn
                .query_row(
                    "SELECT digest FROM description_history WHERE community_id = ?1 AND clock = ?2",
                    params![community.as_bytes().as_slice(), clock as i64],
                    |row| row.get(0),
                )
                .optional()?;

            if let Some(existing) = existing {
                let existing = cohort_core::Digest(fixed(existing, "digest")?);
                return Ok(if existing == digest {
                    InsertResult::AlreadyExists
                } else {
                    InsertResult::Conflict { existing }
                });
            }

            conn.execute(
                "INSERT INTO description_history (community_id, clock, digest, description, recorded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    community.as_bytes().as_slice(),
                    clock as i64,
                    digest.0.as_slice(),
                    encoded,
                    now_millis(),
                ],
            )?;
            Ok(InsertResult::Inserted)
        })
        .await
    }

    async fn get_description_at(
        &self,
        community: &CommunityId,
        clock: u64,
    ) -> Result<Option<SignedDescription>> {
        let community = *community;
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT description FROM description_history WHERE community_id = ?1 AND clock = ?2",
                params![community.as_bytes().as_slice(), clock as i64],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()?
            .map(|bytes| decode_description(&bytes))
            .transpose()
        })
        .await
    }

    async fn description_clocks(&self, community: &CommunityId) -> Result<Vec<u64>> {
        let community = *community;
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT clock FROM description_history WHERE community_id = ?1 ORDER BY clock",
            )?;
            let clocks = stmt
                .query_map(params![community.as_bytes().as_slice()], |row| row.get::<_, i64>(0))?
                .map(|c| c.map(|c| c as u64))
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(clocks)
        })
        .await
    }

    async fn save_request(&self, request: &RequestToJoin) -> Result<()> {
        let request = request.clone();
        let chain_ids = request
            .revealed_accounts
            .iter()
            .map(|a| to_cbor(&a.chain_ids))
            .collect::<Result<Vec<_>>>()?;
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let id = request.id.as_bytes().as_slice();
            tx.execute(
                "INSERT INTO requests_to_join (request_id, community_id, public_key, clock, state, ens_name, our)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(request_id) DO UPDATE SET
                    clock = excluded.clock,
                    state = excluded.state,
                    ens_name = excluded.ens_name,
                    our = excluded.our",
                params![
                    id,
                    request.community_id.as_bytes().as_slice(),
                    request.public_key.as_bytes().as_slice(),
                    request.clock as i64,
                    request.state.as_str(),
                    request.ens_name,
                    request.our,
                ],
            )?;
            tx.execute("DELETE FROM revealed_accounts WHERE request_id = ?1", params![id])?;
            for (position, (account, chains)) in request.revealed_accounts.iter().zip(&chain_ids).enumerate() {
                tx.execute(
                    "INSERT INTO revealed_accounts
                        (request_id, position, address, wallet_key, signature, chain_ids, is_airdrop_address)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        id,
                        position as i64,
                        account.address.as_bytes().as_slice(),
                        account.wallet_key.as_bytes().as_slice(),
                        account.signature.as_bytes().as_slice(),
                        chains,
                        account.is_airdrop_address,
                    ],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn get_request(&self, id: &RequestId) -> Result<Option<RequestToJoin>> {
        let id = *id;
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    "SELECT request_id, community_id, public_key, clock, state, ens_name, our
                     FROM requests_to_join WHERE request_id = ?1",
                    params![id.as_bytes().as_slice()],
                    request_row,
                )
                .optional()?;
            row.map(|row| request_from_row(conn, row)).transpose()
        })
        .await
    }

    async fn list_requests(
        &self,
        community: &CommunityId,
        state: Option<RequestState>,
    ) -> Result<Vec<RequestToJoin>> {
        let community = *community;
        self.with_conn(move |conn| {
            let rows = {
                let mut stmt = conn.prepare(
                    "SELECT request_id, community_id, public_key, clock, state, ens_name, our
                     FROM requests_to_join
                     WHERE community_id = ?1 AND (?2 IS NULL OR state = ?2)
                     ORDER BY clock, request_id",
                )?;
                let rows = stmt
                    .query_map(
                        params![community.as_bytes().as_slice(), state.map(|s| s.as_str())],
                        request_row,
                    )?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            };
            rows.into_iter().map(|row| request_from_row(conn, row)).collect()
        })
        .await
    }

    async fn delete_request(&self, id: &RequestId) -> Result<bool> {
        let id = *id;
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM revealed_accounts WHERE request_id = ?1",
                params![id.as_bytes().as_slice()],
            )?;
            let deleted = tx.execute(
                "DELETE FROM requests_to_join WHERE request_id = ?1",
                params![id.as_bytes().as_slice()],
            )?;
            tx.commit()?;
            Ok(deleted > 0)
        })
        .await
    }

    async fn save_key(&self, key: &StoredKey) -> Result<()> {
        let key = key.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO encryption_keys (key_id, community_id, chat_id, key, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    key.key_id.as_bytes().as_slice(),
                    key.community_id.as_bytes().as_slice(),
                    key.chat_id.as_ref().map(|c| c.as_bytes().as_slice()),
                    key.key.as_slice(),
                    key.created_at as i64,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_key(&self, key_id: &KeyId) -> Result<Option<StoredKey>> {
        let key_id = *key_id;
        self.with_conn(move |conn| {
            conn.query_row(
                &format!("SELECT {KEY_COLUMNS} FROM encryption_keys WHERE key_id = ?1"),
                params![key_id.as_bytes().as_slice()],
                key_row,
            )
            .optional()?
            .map(key_from_row)
            .transpose()
        })
        .await
    }

    async fn latest_key(
        &self,
        community: &CommunityId,
        chat: Option<&ChatId>,
    ) -> Result<Option<StoredKey>> {
        let community = *community;
        let chat = chat.copied();
        self.with_conn(move |conn| {
            conn.query_row(
                &format!(
                    "SELECT {KEY_COLUMNS} FROM encryption_keys
                     WHERE community_id = ?1 AND chat_id IS ?2
                     ORDER BY created_at DESC, key_id DESC LIMIT 1"
                ),
                params![
                    community.as_bytes().as_slice(),
                    chat.as_ref().map(|c| c.as_bytes().as_slice()),
                ],
                key_row,
            )
            .optional()?
            .map(key_from_row)
            .transpose()
        })
        .await
    }

    async fn delete_keys(&self, community: &CommunityId, chat: Option<&ChatId>) -> Result<usize> {
        let community = *community;
        let chat = chat.copied();
        self.with_conn(move |conn| {
            let deleted = conn.execute(
                "DELETE FROM encryption_keys WHERE community_id = ?1 AND chat_id IS ?2",
                params![
                    community.as_bytes().as_slice(),
                    chat.as_ref().map(|c| c.as_bytes().as_slice()),
                ],
            )?;
            Ok(deleted)
        })
        .await
    }

    async fn mark_delivery(&self, marker: &DeliveryMarker) -> Result<()> {
        let marker = marker.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO key_deliveries (key_id, recipient, community_id, state, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(key_id, recipient) DO UPDATE SET
                    state = excluded.state,
                    updated_at = excluded.updated_at",
                params![
                    marker.key_id.as_bytes().as_slice(),
                    marker.recipient.as_bytes().as_slice(),
                    marker.community_id.as_bytes().as_slice(),
                    marker.state.as_str(),
                    marker.updated_at as i64,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn pending_deliveries(&self, community: &CommunityId) -> Result<Vec<DeliveryMarker>> {
        let community = *community;
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT key_id, recipient, updated_at FROM key_deliveries
                 WHERE community_id = ?1 AND state = ?2
                 ORDER BY key_id, recipient",
            )?;
            let rows = stmt
                .query_map(
                    params![community.as_bytes().as_slice(), DeliveryState::Pending.as_str()],
                    |row| {
                        Ok((
                            row.get::<_, Vec<u8>>(0)?,
                            row.get::<_, Vec<u8>>(1)?,
                            row.get::<_, i64>(2)?,
                        ))
                    },
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.into_iter()
                .map(|(key_id, recipient, updated_at)| {
                    Ok(DeliveryMarker {
                        community_id: community,
                        key_id: KeyId::from_bytes(fixed(key_id, "key_id")?),
                        recipient: PublicKey::from_bytes(fixed(recipient, "recipient")?),
                        state: DeliveryState::Pending,
                        updated_at: updated_at as u64,
                    })
                })
                .collect()
        })
        .await
    }

    async fn set_last_reevaluation(&self, community: &CommunityId, at: i64) -> Result<()> {
        let community = *community;
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO members_reevaluations (community_id, last_run) VALUES (?1, ?2)
                 ON CONFLICT(community_id) DO UPDATE SET last_run = excluded.last_run",
                params![community.as_bytes().as_slice(), at],
            )?;
            Ok(())
        })
        .await
    }

    async fn last_reevaluation(&self, community: &CommunityId) -> Result<Option<i64>> {
        let community = *community;
        self.with_conn(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT last_run FROM members_reevaluations WHERE community_id = ?1",
                    params![community.as_bytes().as_slice()],
                    |row| row.get(0),
                )
                .optional()?)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::StoreExt;
    use cohort_core::{AccessSettings, CommunityIdentity, Description, Keypair};

    fn record(community_key: &Keypair) -> (CommunityRecord, Description) {
        let id = CommunityId::from_key(&community_key.public_key());
        let description = Description::new(
            id,
            Keypair::generate().public_key(),
            CommunityIdentity::named("sqlite"),
            AccessSettings::default(),
        );
        let record = CommunityRecord {
            id,
            description: SignedDescription::sign(&description, community_key).unwrap(),
            clock: description.clock,
            private_key: Some(community_key.seed()),
            joined: true,
        };
        (record, description)
    }

    #[tokio::test]
    async fn test_community_roundtrip_and_history() {
        let store = SqliteStore::open_memory().unwrap();
        let key = Keypair::generate();
        let (mut record, mut description) = record(&key);

        assert_eq!(store.commit_community(&record).await.unwrap(), InsertResult::Inserted);
        assert_eq!(store.commit_community(&record).await.unwrap(), InsertResult::AlreadyExists);

        description.increase_clock();
        record.description = SignedDescription::sign(&description, &key).unwrap();
        record.clock = description.clock;
        store.commit_community(&record).await.unwrap();

        let loaded = store.get_community(&record.id).await.unwrap().unwrap();
        assert_eq!(loaded, record);
        assert_eq!(loaded.description.open(&record.id).unwrap(), description);
        assert_eq!(store.description_clocks(&record.id).await.unwrap(), vec![1, 2]);
        assert_eq!(store.list_communities().await.unwrap(), vec![record.id]);
        assert!(store.get_description_at(&record.id, 1).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_request_with_accounts_roundtrip() {
        let store = SqliteStore::open_memory().unwrap();
        let community = CommunityId::from_key(&Keypair::generate().public_key());
        let requester = Keypair::generate();
        let mut first = RevealedAccount::sign(&Keypair::generate(), &requester.public_key(), &community, vec![1, 10]);
        first.is_airdrop_address = true;
        let second = RevealedAccount::sign(&Keypair::generate(), &requester.public_key(), &community, vec![]);

        let mut request = RequestToJoin::new(requester.public_key(), community, 1_700_000_000, vec![first, second]);
        request.ens_name = Some("alice.eth".into());
        store.save_request(&request).await.unwrap();

        let loaded = store.get_request(&request.id).await.unwrap().unwrap();
        assert_eq!(loaded, request);
        assert!(loaded.verify_accounts().is_ok());

        request.state = RequestState::Accepted;
        request.revealed_accounts.truncate(1);
        store.save_request(&request).await.unwrap();
        let listed = store.list_requests(&community, Some(RequestState::Accepted)).await.unwrap();
        assert_eq!(listed, vec![request.clone()]);
        assert!(store.list_requests(&community, Some(RequestState::Pending)).await.unwrap().is_empty());

        assert!(store.delete_request(&request.id).await.unwrap());
        assert!(store.get_request(&request.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_keys_and_deliveries() {
        let store = SqliteStore::open_memory().unwrap();
        let community = CommunityId::from_key(&Keypair::generate().public_key());
        let chat = ChatId::random();
        let community_key = StoredKey {
            community_id: community,
            chat_id: None,
            key_id: KeyId::random(),
            key: [1; 32],
            created_at: 10,
        };
        let channel_key = StoredKey {
            chat_id: Some(chat),
            key_id: KeyId::random(),
            key: [2; 32],
            ..community_key.clone()
        };
        store.save_key(&community_key).await.unwrap();
        store.save_key(&channel_key).await.unwrap();

        assert_eq!(store.latest_key(&community, None).await.unwrap(), Some(community_key.clone()));
        assert_eq!(store.latest_key(&community, Some(&chat)).await.unwrap(), Some(channel_key.clone()));

        let marker = DeliveryMarker {
            community_id: community,
            key_id: channel_key.key_id,
            recipient: Keypair::generate().public_key(),
            state: DeliveryState::Pending,
            updated_at: 11,
        };
        store.mark_delivery(&marker).await.unwrap();
        assert_eq!(store.pending_deliveries(&community).await.unwrap(), vec![marker.clone()]);
        store
            .mark_delivery(&DeliveryMarker {
                state: DeliveryState::Sent,
                ..marker
            })
            .await
            .unwrap();
        assert!(store.pending_deliveries(&community).await.unwrap().is_empty());

        assert_eq!(store.delete_keys(&community, Some(&chat)).await.unwrap(), 1);
        assert!(store.latest_key(&community, Some(&chat)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reevaluation_timestamp_persists_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cohort.db");
        let community = CommunityId::from_key(&Keypair::generate().public_key());
        {
            let store = SqliteStore::open(&path).unwrap();
            store.set_last_reevaluation(&community, 42).await.unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.last_reevaluation(&community).await.unwrap(), Some(42));
    }
}
