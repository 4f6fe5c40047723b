//! redb-backed [WalletStore]
//!
//! Layout:
//! * proofs:       (mint, secret) -> ProofRecord json
//! * counters:     (mint, keyset:pubkey) -> CounterRecord json
//! * transactions: txid -> Transaction json

pub use redb;
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use strum::EnumIs;

use std::path::Path;
use std::sync::Arc;

use super::{ProofRecord, WalletStore};
use crate::types::{CounterRecord, Transaction, TransactionStatus};

const PROOFS: TableDefinition<(&str, &str), &str> = TableDefinition::new("proofs");
const COUNTERS: TableDefinition<(&str, &str), &str> = TableDefinition::new("counters");
const TRANSACTIONS: TableDefinition<&str, &str> = TableDefinition::new("transactions");

#[derive(Debug)]
//
#[derive(EnumIs, thiserror::Error)]
pub enum StoreError {
    #[error("{0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Database(#[from] redb::DatabaseError),
    #[error("{0}")]
    Commit(#[from] redb::CommitError),
    #[error("{0}")]
    Store(#[from] redb::StorageError),
    #[error("{0}")]
    Table(anyhow::Error),
    #[error("{0}")]
    Transaction(#[from] redb::TransactionError),
    #[error("{0}")]
    Custom(#[from] anyhow::Error),
}

impl From<redb::TableError> for StoreError {
    fn from(err: redb::TableError) -> Self {
        Self::Table(err.into())
    }
}

/// redb wrap
pub struct Redb {
    db: Database,
}

impl Redb {
    pub fn new(db: Database) -> Result<Arc<Redb>, StoreError> {
        let this = Self { db };
        this.init()?;
        Ok(Arc::new(this))
    }

    pub fn open<P: AsRef<Path>>(dbpath: P) -> Result<Arc<Redb>, StoreError> {
        let db = Database::builder().create(dbpath)?;
        Self::new(db)
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    fn init(&self) -> Result<(), StoreError> {
        let tn = self.db.begin_write()?;
        {
            tn.open_table(PROOFS)?;
            tn.open_table(COUNTERS)?;
            tn.open_table(TRANSACTIONS)?;
        }
        tn.commit()?;
        Ok(())
    }
}

/// collect all values under `mint` from a (mint, _) keyed table
fn scan_mint<T: serde::de::DeserializeOwned>(
    table: &impl ReadableTable<(&'static str, &'static str), &'static str>,
    mint: &str,
) -> Result<Vec<T>, StoreError> {
    let mut out = Vec::new();
    for kv in table.range((mint, "")..)? {
        let (k, v) = kv?;
        if k.value().0 != mint {
            break;
        }
        out.push(serde_json::from_str(v.value())?);
    }
    Ok(out)
}

#[async_trait]
impl WalletStore for Redb {
    type Error = StoreError;

    async fn add_proofs(&self, mint_url: &str, proofs: &[ProofRecord]) -> Result<(), Self::Error> {
        if proofs.is_empty() {
            return Ok(());
        }

        let tn = self.db.begin_write()?;
        {
            let mut table = tn.open_table(PROOFS)?;
            for p in proofs {
                let json = serde_json::to_string(p)?;
                // overwrite keeps state changes in place
                table.insert((mint_url, p.raw.secret.as_str()), json.as_str())?;
            }
            debug!("add_proofs {}: table.len {:?}", mint_url, table.len());
        }
        tn.commit()?;
        Ok(())
    }

    async fn delete_proofs(
        &self,
        mint_url: &str,
        proofs: &[ProofRecord],
    ) -> Result<(), Self::Error> {
        if proofs.is_empty() {
            return Ok(());
        }

        let tn = self.db.begin_write()?;
        {
            let mut table = tn.open_table(PROOFS)?;
            for p in proofs {
                table.remove((mint_url, p.raw.secret.as_str()))?;
            }
        }
        tn.commit()?;
        Ok(())
    }

    async fn get_proofs(&self, mint_url: &str) -> Result<Vec<ProofRecord>, Self::Error> {
        let tn = self.db.begin_read()?;
        let table = tn.open_table(PROOFS)?;
        scan_mint(&table, mint_url)
    }

    async fn add_counter(&self, record: &CounterRecord) -> Result<(), Self::Error> {
        let json = serde_json::to_string(record)?;
        debug!("add_counter: {}", json);

        let sub = format!("{}:{}", record.keyset_id, record.pubkey);

        let tn = self.db.begin_write()?;
        {
            let mut table = tn.open_table(COUNTERS)?;

            // never move a counter backwards
            let keep = match table.get((record.mint.as_str(), sub.as_str()))? {
                Some(old) => {
                    let old: CounterRecord = serde_json::from_str(old.value())?;
                    old.counter > record.counter
                }
                None => false,
            };

            if !keep {
                table.insert((record.mint.as_str(), sub.as_str()), json.as_str())?;
            }
        }
        tn.commit()?;
        Ok(())
    }

    async fn get_counters(&self, mint_url: &str) -> Result<Vec<CounterRecord>, Self::Error> {
        let tn = self.db.begin_read()?;
        let table = tn.open_table(COUNTERS)?;
        let mut records: Vec<CounterRecord> = scan_mint(&table, mint_url)?;
        records.sort_by_key(|r| r.ts);
        Ok(records)
    }

    async fn delete_counters(&self, mint_url: &str) -> Result<(), Self::Error> {
        let tn = self.db.begin_write()?;
        {
            let mut table = tn.open_table(COUNTERS)?;
            let subs: Vec<String> = {
                let mut subs = vec![];
                for kv in table.range((mint_url, "")..)? {
                    let (k, _) = kv?;
                    if k.value().0 != mint_url {
                        break;
                    }
                    subs.push(k.value().1.to_owned());
                }
                subs
            };
            for sub in subs {
                table.remove((mint_url, sub.as_str()))?;
            }
        }
        tn.commit()?;
        Ok(())
    }

    async fn add_transaction(&self, tx: &Transaction) -> Result<(), Self::Error> {
        let json = serde_json::to_string(tx)?;

        let tn = self.db.begin_write()?;
        {
            let mut table = tn.open_table(TRANSACTIONS)?;
            table.insert(tx.id(), json.as_str())?;
        }
        tn.commit()?;
        Ok(())
    }

    async fn get_transaction(&self, id: &str) -> Result<Option<Transaction>, Self::Error> {
        let tn = self.db.begin_read()?;
        let table = tn.open_table(TRANSACTIONS)?;

        let tx = match table.get(id)? {
            Some(v) => Some(serde_json::from_str(v.value())?),
            None => None,
        };
        Ok(tx)
    }

    async fn get_transactions(
        &self,
        status: &[TransactionStatus],
    ) -> Result<Vec<Transaction>, Self::Error> {
        let tn = self.db.begin_read()?;
        let table = tn.open_table(TRANSACTIONS)?;

        let mut txs = Vec::new();
        for kv in table.iter()? {
            let (_, v) = kv?;
            let tx: Transaction = serde_json::from_str(v.value())?;
            if status.contains(&tx.status) {
                txs.push(tx);
            }
        }
        txs.sort_by_key(|tx| tx.created_at);
        Ok(txs)
    }

    async fn delete_transactions(
        &self,
        status: &[TransactionStatus],
        unix_timestamp_ms_le: u64,
    ) -> Result<u64, Self::Error> {
        let tn = self.db.begin_write()?;
        let removed;
        {
            let mut table = tn.open_table(TRANSACTIONS)?;

            let ids: Vec<String> = {
                let mut ids = vec![];
                for kv in table.iter()? {
                    let (k, v) = kv?;
                    let tx: Transaction = serde_json::from_str(v.value())?;
                    if status.contains(&tx.status) && tx.created_at <= unix_timestamp_ms_le {
                        ids.push(k.value().to_owned());
                    }
                }
                ids
            };

            removed = ids.len() as u64;
            for id in ids {
                table.remove(id.as_str())?;
            }
        }
        tn.commit()?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;
    use crate::amount::Amount;
    use crate::nuts::{Id, Proof, PublicKey};
    use crate::secret::Secret;
    use crate::store::ProofState;
    use crate::types::TransactionKind;

    const MINT: &str = "https://8333.space:3338/";
    const C: &str = "02bc9097997d81afb2cc7346b5e4345a9346bd2a506eb7958598a72f0cf85163ea";

    fn open_tmp() -> (tempfile::TempDir, Arc<Redb>) {
        let dir = tempfile::TempDir::new().unwrap();
        let store = Redb::open(dir.path().join("wallet.redb")).unwrap();
        (dir, store)
    }

    fn record(amount: u64) -> ProofRecord {
        Proof::new(
            Amount::from(amount),
            Id::from_str("009a1f293253e41e").unwrap(),
            Secret::generate(),
            PublicKey::from_hex(C).unwrap(),
        )
        .into()
    }

    #[tokio::test]
    async fn test_proofs_round_trip() {
        let (_dir, store) = open_tmp();

        let records = vec![record(1), record(2), record(8)];
        store.add_proofs(MINT, &records).await.unwrap();

        let mut got = store.get_proofs(MINT).await.unwrap();
        got.sort_by(|a, b| a.raw.amount.cmp(&b.raw.amount));
        assert_eq!(got.len(), 3);
        assert_eq!(got[2].raw.amount, Amount::from(8));

        // other mints see nothing
        let other = store.get_proofs("https://other.mint/").await.unwrap();
        assert!(other.is_empty());

        store.delete_proofs(MINT, &records[..1]).await.unwrap();
        assert_eq!(store.get_proofs(MINT).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_proof_state_overwrite() {
        let (_dir, store) = open_tmp();

        let mut rec = record(4);
        store.add_proofs(MINT, &[rec.clone()]).await.unwrap();

        rec.state = ProofState::Pending;
        store.add_proofs(MINT, &[rec.clone()]).await.unwrap();

        let got = store.get_proofs(MINT).await.unwrap();
        assert_eq!(got.len(), 1);
        assert!(got[0].state.is_pending());
    }

    #[tokio::test]
    async fn test_counters() {
        let (_dir, store) = open_tmp();

        let mut rec = CounterRecord::new(MINT, "009a1f293253e41e".into(), Some("pk".into()));
        rec.counter = 5;
        store.add_counter(&rec).await.unwrap();

        // lower counters do not regress the stored one
        let mut stale = rec.clone();
        stale.counter = 3;
        store.add_counter(&stale).await.unwrap();

        let got = store.get_counters(MINT).await.unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].counter, 5);

        rec.counter = 9;
        store.add_counter(&rec).await.unwrap();
        assert_eq!(store.get_counters(MINT).await.unwrap()[0].counter, 9);

        store.delete_counters(MINT).await.unwrap();
        assert!(store.get_counters(MINT).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_transactions() {
        let (_dir, store) = open_tmp();

        let mut tx = Transaction::new(TransactionKind::Send, MINT, 21, Some("sat"));
        store.add_transaction(&tx).await.unwrap();

        let got = store.get_transaction(tx.id()).await.unwrap().unwrap();
        assert_eq!(got, tx);

        let pending = store
            .get_transactions(&[TransactionStatus::Pending])
            .await
            .unwrap();
        assert_eq!(pending, vec![tx.clone()]);

        tx.succeed();
        store.add_transaction(&tx).await.unwrap();
        assert!(store
            .get_transactions(&[TransactionStatus::Pending])
            .await
            .unwrap()
            .is_empty());

        let deleted = store
            .delete_transactions(&[TransactionStatus::Success], tx.created_at)
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert!(store.get_transaction(tx.id()).await.unwrap().is_none());
    }
}
