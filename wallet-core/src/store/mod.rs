//! Canonical proof set with spend-state tracking and coin selection
//!
//! The store owns the wallet's proofs. Flows work on copies and ask the
//! store to commit or roll back state transitions; nothing else mutates
//! proof state.

use std::collections::{BTreeMap, HashMap};

use strum::{AsRefStr, Display, EnumIs, EnumString, IntoStaticStr};

use crate::amount::Amount;
use crate::nuts::{Id, Proof, Proofs};
use crate::secret::Secret;
use crate::types::unixtime_ms;

pub mod impl_redb;

#[derive(Debug, thiserror::Error, EnumIs)]
pub enum Error {
    #[error("Proof has an empty secret")]
    EmptySecret,
    #[error("Proof amount must be positive")]
    NonPositiveAmount,
    #[error("Duplicate proof secret")]
    DuplicateSecret,
    #[error("Unknown proof")]
    UnknownProof,
    #[error("Insufficient funds: have {have}, need {need}")]
    InsufficientFunds { have: Amount, need: Amount },
    #[error("No spendable proofs")]
    NoSpendableProofs,
    #[error("Proof already spent")]
    AlreadySpent,
}

/// Client-side lifecycle of a proof
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
//
#[derive(Display, AsRefStr, IntoStaticStr, EnumIs, EnumString)]
pub enum ProofState {
    #[default]
    Unspent,
    /// submitted in an in-flight melt or swap
    Pending,
    Spent,
}

/// A proof with its local bookkeeping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofRecord {
    #[serde(flatten)]
    pub raw: Proof,
    #[serde(default)]
    pub state: ProofState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default)]
    pub ts: u64,
}

impl From<Proof> for ProofRecord {
    fn from(raw: Proof) -> Self {
        Self {
            raw,
            state: ProofState::Unspent,
            unit: None,
            ts: unixtime_ms(),
        }
    }
}

impl AsRef<Proof> for ProofRecord {
    fn as_ref(&self) -> &Proof {
        &self.raw
    }
}

/// In-memory canonical proof set.
///
/// Reads hand out snapshots; writers go through the owner's lock.
#[derive(Debug, Default)]
pub struct ProofStore {
    records: HashMap<Secret, ProofRecord>,
}

impl ProofStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert fresh proofs as unspent.
    ///
    /// Rejects empty secrets, zero amounts and duplicates; on error
    /// nothing is inserted.
    pub fn add(&mut self, proofs: Proofs) -> Result<(), Error> {
        for p in &proofs {
            if p.secret.is_empty() {
                return Err(Error::EmptySecret);
            }
            if p.amount.is_zero() {
                return Err(Error::NonPositiveAmount);
            }
            if self.records.contains_key(&p.secret) {
                return Err(Error::DuplicateSecret);
            }
        }

        // also reject duplicates within the batch itself
        let mut seen = std::collections::HashSet::new();
        if !proofs.iter().all(|p| seen.insert(p.secret.clone())) {
            return Err(Error::DuplicateSecret);
        }

        for p in proofs {
            self.records.insert(p.secret.clone(), p.into());
        }
        Ok(())
    }

    /// Load persisted records wholesale, states included. Existing
    /// entries with the same secret are replaced.
    pub fn load(&mut self, records: Vec<ProofRecord>) {
        for r in records {
            self.records.insert(r.raw.secret.clone(), r);
        }
    }

    pub fn remove(&mut self, proofs: &[Proof]) {
        for p in proofs {
            self.records.remove(&p.secret);
        }
    }

    pub fn contains(&self, proof: &Proof) -> bool {
        self.records.contains_key(&proof.secret)
    }

    pub fn state_of(&self, secret: &Secret) -> Option<ProofState> {
        self.records.get(secret).map(|r| r.state)
    }

    pub fn count(&self) -> usize {
        self.records.len()
    }

    pub fn all(&self) -> Vec<ProofRecord> {
        let mut all: Vec<_> = self.records.values().cloned().collect();
        all.sort_by(|a, b| a.raw.secret.cmp(&b.raw.secret));
        all
    }

    fn in_state(&self, state: ProofState) -> Proofs {
        let mut ps: Proofs = self
            .records
            .values()
            .filter(|r| r.state == state)
            .map(|r| r.raw.clone())
            .collect();
        ps.sort_by(|a, b| a.secret.cmp(&b.secret));
        ps
    }

    pub fn unspent(&self) -> Proofs {
        self.in_state(ProofState::Unspent)
    }

    pub fn pending(&self) -> Proofs {
        self.in_state(ProofState::Pending)
    }

    pub fn spent(&self) -> Proofs {
        self.in_state(ProofState::Spent)
    }

    /// Spendable balance
    pub fn total_value(&self) -> Amount {
        self.records
            .values()
            .filter(|r| r.state.is_unspent())
            .map(|r| r.raw.amount)
            .sum()
    }

    pub fn by_keyset(&self, id: &Id) -> Proofs {
        let mut ps: Proofs = self
            .records
            .values()
            .filter(|r| &r.raw.keyset_id == id)
            .map(|r| r.raw.clone())
            .collect();
        ps.sort_by(|a, b| a.secret.cmp(&b.secret));
        ps
    }

    pub fn group_by_keyset(&self) -> BTreeMap<Id, Proofs> {
        let mut map: BTreeMap<Id, Proofs> = BTreeMap::new();
        for r in self.records.values() {
            map.entry(r.raw.keyset_id).or_default().push(r.raw.clone());
        }
        for ps in map.values_mut() {
            ps.sort_by(|a, b| a.secret.cmp(&b.secret));
        }
        map
    }

    /// Move proofs to pending before they go over the wire.
    ///
    /// Marking an already pending proof is a no-op; marking a spent
    /// proof is refused.
    pub fn mark_pending(&mut self, proofs: &[Proof]) -> Result<(), Error> {
        for p in proofs {
            match self.records.get(&p.secret).map(|r| r.state) {
                None => return Err(Error::UnknownProof),
                Some(ProofState::Spent) => return Err(Error::AlreadySpent),
                _ => {}
            }
        }
        for p in proofs {
            if let Some(r) = self.records.get_mut(&p.secret) {
                r.state = ProofState::Pending;
            }
        }
        Ok(())
    }

    /// Commit: the mint acknowledged the operation
    pub fn mark_spent(&mut self, proofs: &[Proof]) -> Result<(), Error> {
        for p in proofs {
            if !self.records.contains_key(&p.secret) {
                return Err(Error::UnknownProof);
            }
        }
        for p in proofs {
            if let Some(r) = self.records.get_mut(&p.secret) {
                r.state = ProofState::Spent;
            }
        }
        Ok(())
    }

    /// Rollback: the operation failed, inputs are spendable again
    pub fn unmark_pending(&mut self, proofs: &[Proof]) -> Result<(), Error> {
        for p in proofs {
            if let Some(r) = self.records.get_mut(&p.secret) {
                if r.state.is_pending() {
                    r.state = ProofState::Unspent;
                }
            }
        }
        Ok(())
    }

    /// Pick unspent proofs summing to at least `target`.
    ///
    /// Greedy over descending amounts, then one improvement pass that
    /// drops the smallest member the sum can spare. Minimises
    /// cardinality first, surplus second.
    pub fn select(&self, target: Amount) -> Result<Proofs, Error> {
        if self.records.is_empty() {
            return Err(Error::NoSpendableProofs);
        }
        if target.is_zero() {
            return Ok(vec![]);
        }

        let mut candidates = self.unspent();
        if candidates.is_empty() {
            return Err(Error::NoSpendableProofs);
        }

        let available: Amount = candidates.iter().map(|p| p.amount).sum();
        if available < target {
            return Err(Error::InsufficientFunds {
                have: available,
                need: target,
            });
        }

        candidates.sort_by(|a, b| b.amount.cmp(&a.amount));

        let mut selected: Proofs = vec![];
        let mut sum = Amount::ZERO;
        for p in candidates {
            if sum >= target {
                break;
            }
            sum += p.amount;
            selected.push(p);
        }

        // drop the smallest proof still leaving the target covered
        while let Some(last) = selected.last() {
            let without = sum - last.amount;
            if without >= target {
                sum = without;
                selected.pop();
            } else {
                break;
            }
        }

        Ok(selected)
    }
}

use crate::types::{CounterRecord, Transaction, TransactionStatus};

/// Persistence behind the in-memory store.
///
/// The unit type is a valid no-op store for ephemeral wallets.
#[async_trait]
pub trait WalletStore {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn add_proofs(&self, mint_url: &str, proofs: &[ProofRecord]) -> Result<(), Self::Error>;
    async fn delete_proofs(&self, mint_url: &str, proofs: &[ProofRecord])
        -> Result<(), Self::Error>;
    async fn get_proofs(&self, mint_url: &str) -> Result<Vec<ProofRecord>, Self::Error>;

    // derivation counter records
    async fn add_counter(&self, record: &CounterRecord) -> Result<(), Self::Error>;
    async fn get_counters(&self, mint_url: &str) -> Result<Vec<CounterRecord>, Self::Error>;
    async fn delete_counters(&self, mint_url: &str) -> Result<(), Self::Error>;

    // transaction history
    async fn add_transaction(&self, tx: &Transaction) -> Result<(), Self::Error>;
    async fn get_transaction(&self, id: &str) -> Result<Option<Transaction>, Self::Error>;
    async fn get_transactions(
        &self,
        status: &[TransactionStatus],
    ) -> Result<Vec<Transaction>, Self::Error>;
    async fn delete_transactions(
        &self,
        status: &[TransactionStatus],
        unix_timestamp_ms_le: u64,
    ) -> Result<u64, Self::Error>;
}

#[async_trait]
impl WalletStore for () {
    type Error = std::convert::Infallible;

    async fn add_proofs(&self, _: &str, _: &[ProofRecord]) -> Result<(), Self::Error> {
        Ok(())
    }
    async fn delete_proofs(&self, _: &str, _: &[ProofRecord]) -> Result<(), Self::Error> {
        Ok(())
    }
    async fn get_proofs(&self, _: &str) -> Result<Vec<ProofRecord>, Self::Error> {
        Ok(vec![])
    }
    async fn add_counter(&self, _: &CounterRecord) -> Result<(), Self::Error> {
        Ok(())
    }
    async fn get_counters(&self, _: &str) -> Result<Vec<CounterRecord>, Self::Error> {
        Ok(vec![])
    }
    async fn delete_counters(&self, _: &str) -> Result<(), Self::Error> {
        Ok(())
    }
    async fn add_transaction(&self, _: &Transaction) -> Result<(), Self::Error> {
        Ok(())
    }
    async fn get_transaction(&self, _: &str) -> Result<Option<Transaction>, Self::Error> {
        Ok(None)
    }
    async fn get_transactions(
        &self,
        _: &[TransactionStatus],
    ) -> Result<Vec<Transaction>, Self::Error> {
        Ok(vec![])
    }
    async fn delete_transactions(
        &self,
        _: &[TransactionStatus],
        _: u64,
    ) -> Result<u64, Self::Error> {
        Ok(0)
    }
}

#[async_trait]
impl<T> WalletStore for std::sync::Arc<T>
where
    T: WalletStore + Send + Sync,
{
    type Error = T::Error;

    async fn add_proofs(&self, mint_url: &str, proofs: &[ProofRecord]) -> Result<(), Self::Error> {
        self.as_ref().add_proofs(mint_url, proofs).await
    }
    async fn delete_proofs(
        &self,
        mint_url: &str,
        proofs: &[ProofRecord],
    ) -> Result<(), Self::Error> {
        self.as_ref().delete_proofs(mint_url, proofs).await
    }
    async fn get_proofs(&self, mint_url: &str) -> Result<Vec<ProofRecord>, Self::Error> {
        self.as_ref().get_proofs(mint_url).await
    }
    async fn add_counter(&self, record: &CounterRecord) -> Result<(), Self::Error> {
        self.as_ref().add_counter(record).await
    }
    async fn get_counters(&self, mint_url: &str) -> Result<Vec<CounterRecord>, Self::Error> {
        self.as_ref().get_counters(mint_url).await
    }
    async fn delete_counters(&self, mint_url: &str) -> Result<(), Self::Error> {
        self.as_ref().delete_counters(mint_url).await
    }
    async fn add_transaction(&self, tx: &Transaction) -> Result<(), Self::Error> {
        self.as_ref().add_transaction(tx).await
    }
    async fn get_transaction(&self, id: &str) -> Result<Option<Transaction>, Self::Error> {
        self.as_ref().get_transaction(id).await
    }
    async fn get_transactions(
        &self,
        status: &[TransactionStatus],
    ) -> Result<Vec<Transaction>, Self::Error> {
        self.as_ref().get_transactions(status).await
    }
    async fn delete_transactions(
        &self,
        status: &[TransactionStatus],
        unix_timestamp_ms_le: u64,
    ) -> Result<u64, Self::Error> {
        self.as_ref()
            .delete_transactions(status, unix_timestamp_ms_le)
            .await
    }
}
