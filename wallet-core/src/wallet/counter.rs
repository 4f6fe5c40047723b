//! Derivation counters for deterministic secrets
//!
//! One monotonically increasing counter per (mint, keyset). A lease
//! hands out counter values for one operation; commit moves the stored
//! record forward, drop without commit rolls the in-memory state back
//! so failed operations reuse their counters.

pub use bip39::Mnemonic;
use bitcoin::bip32::{DerivationPath, ExtendedPrivKey};
use bitcoin::Network;

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::nuts::Id;
use crate::store::WalletStore;
use crate::types::CounterRecord;
use crate::SECP256K1;

// bip32 hardened index bound, with headroom for one restore batch
const COUNTER_CEILING: u64 = (2u64.pow(31) - 1) - 50;

/// A mnemonic with its derived identity pubkey (`m/129372'/0'`).
///
/// The pubkey names the seed in persisted counter records, so switching
/// mnemonics never mixes counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MnemonicInfo {
    mnemonic: Mnemonic,
    pubkey: String,
}

impl MnemonicInfo {
    pub fn new(mnemonic: Mnemonic) -> anyhow::Result<Self> {
        let pubkey = get_ident_pubkey(&mnemonic)?;
        Ok(Self { mnemonic, pubkey })
    }

    pub fn with_words(words: &str) -> anyhow::Result<Self> {
        let mnemonic = words.parse()?;
        Self::new(mnemonic)
    }

    pub fn generate(words: usize) -> anyhow::Result<Self> {
        let mnemonic = Mnemonic::generate(words)?;
        Self::new(mnemonic)
    }

    pub fn pubkey(&self) -> &str {
        &self.pubkey
    }

    pub fn mnemonic(&self) -> &Mnemonic {
        &self.mnemonic
    }

    /// bip32 master key over the bip39 seed (empty passphrase)
    pub fn xpriv(&self) -> anyhow::Result<ExtendedPrivKey> {
        let seed: [u8; 64] = self.mnemonic.to_seed("");
        Ok(ExtendedPrivKey::new_master(Network::Bitcoin, &seed)?)
    }
}

/// m / 129372' / 0' / keyset_k_int' / counter' / secret||r
/// m / 129372' / 0'
fn get_ident_pubkey(mnemonic: &Mnemonic) -> anyhow::Result<String> {
    let path: DerivationPath = "m/129372'/0'".parse()?;

    let seed: [u8; 64] = mnemonic.to_seed("");
    let bip32_root_key = ExtendedPrivKey::new_master(Network::Bitcoin, &seed)?;
    let derived_xpriv = bip32_root_key.derive_priv(&SECP256K1, &path)?;
    let ident = derived_xpriv
        .to_keypair(&SECP256K1)
        .public_key()
        .to_string();
    Ok(ident)
}

#[derive(Debug)]
struct Counter {
    record: CounterRecord,
    state: u64,
}

impl Counter {
    fn next(&mut self) -> u64 {
        let it = self.state;
        self.state += 1;
        it
    }
}

/// Counters of one mint, loaded from and committed to the store
#[derive(Debug, Default)]
pub struct CounterManager {
    mint_url: String,
    mnemonic: Option<Arc<MnemonicInfo>>,
    counters: BTreeMap<String, Counter>,
}

impl CounterManager {
    pub fn new(mint_url: &str) -> Self {
        Self {
            mint_url: mint_url.to_owned(),
            mnemonic: None,
            counters: Default::default(),
        }
    }

    pub fn mnemonic(mut self, mnemonic: Option<Arc<MnemonicInfo>>) -> Self {
        self.mnemonic = mnemonic;
        self
    }

    pub fn mnemonic_info(&self) -> Option<&Arc<MnemonicInfo>> {
        self.mnemonic.as_ref()
    }

    /// Seed counters from stored records, creating zeroed ones for
    /// keysets seen for the first time. Records of other seeds and
    /// counters close to the bip32 ceiling are dropped.
    pub fn records(mut self, records: Vec<CounterRecord>, keyset_ids: &[Id]) -> Self {
        let pubkey = self
            .mnemonic
            .as_ref()
            .map(|m| m.pubkey().to_owned())
            .unwrap_or_default();

        for r in records {
            if r.pubkey != pubkey || r.counter >= COUNTER_CEILING {
                continue;
            }
            let state = r.counter;
            self.counters
                .insert(r.keyset_id.clone(), Counter { record: r, state });
        }

        for id in keyset_ids {
            let key = id.to_string();
            if !self.counters.contains_key(&key) {
                let record = CounterRecord::new(&self.mint_url, key.clone(), Some(pubkey.clone()));
                self.counters.insert(key, Counter { record, state: 0 });
            }
        }

        self
    }

    /// Lease the counter of one keyset for an operation
    pub fn start(&mut self, keyset_id: &Id) -> anyhow::Result<CounterLease<'_>> {
        let mnemonic = self.mnemonic.clone();
        let counter = self
            .counters
            .get_mut(&keyset_id.to_string())
            .ok_or_else(|| format_err!("no counter for keyset {}", keyset_id))?;

        Ok(CounterLease { counter, mnemonic })
    }
}

/// Exclusive access to one counter; cancel on drop, commit explicitly
#[derive(Debug)]
pub struct CounterLease<'a> {
    counter: &'a mut Counter,
    mnemonic: Option<Arc<MnemonicInfo>>,
}

impl<'a> Drop for CounterLease<'a> {
    fn drop(&mut self) {
        self.cancel()
    }
}

impl<'a> CounterLease<'a> {
    /// take the next counter value
    pub fn count(&mut self) -> u64 {
        self.counter.next()
    }

    /// take `n` consecutive values, returning the first
    pub fn count_n(&mut self, n: u64) -> u64 {
        let first = self.counter.state;
        self.counter.state += n;
        first
    }

    pub fn now(&self) -> u64 {
        self.counter.state
    }

    pub fn before(&self) -> u64 {
        self.counter.record.counter
    }

    pub fn record(&self) -> &CounterRecord {
        &self.counter.record
    }

    pub fn mnemonic(&self) -> Option<&Arc<MnemonicInfo>> {
        self.mnemonic.as_ref()
    }

    pub fn cancel(&mut self) {
        self.counter.state = self.counter.record.counter;
    }

    /// Persist the consumed range. Only after this do the used
    /// counters become unavailable to future operations.
    pub async fn commit<S: WalletStore>(&mut self, store: &S) -> anyhow::Result<()> {
        self.counter.record.counter = self.counter.state;
        self.counter.record.ts = crate::types::unixtime_ms();

        if self.mnemonic.is_some() {
            store
                .add_counter(&self.counter.record)
                .await
                .map_err(|e| anyhow::Error::new(e))?;
        }
        Ok(())
    }
}
