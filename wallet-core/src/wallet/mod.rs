//! Per-mint protocol operations
//!
//! [Wallet] talks to one mint: it generates outputs (random or
//! counter-derived), runs mint / swap / melt / restore requests and
//! unblinds what comes back. It never touches the proof store; the
//! facade owns state and feeds it inputs.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use url::Url;

mod cache;
mod client;
mod counter;
mod error;
mod limiter;

pub use cache::ResponseCache;
pub use client::{HttpClient, HttpOptions, MintClient};
pub use counter::{CounterLease, CounterManager, Mnemonic, MnemonicInfo};
pub use error::{ClientError, MintErrorResponse, WalletError};
pub use limiter::{LimiterStatus, RateLimitConfig, RateLimiter};

use crate::amount::Amount;
use crate::dhke;
use crate::keyset::KeysetCache;
use crate::nuts::*;
use crate::store::WalletStore;

use WalletError as Error;

/// Backoff for transient failures; delay doubles per attempt
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    fn delay_for(&self, attempt: u32) -> Duration {
        self.delay * 2u32.saturating_pow(attempt)
    }
}

/// Outcome of a melt
#[derive(Debug, Clone, PartialEq)]
pub struct Melted {
    pub state: MeltQuoteState,
    pub preimage: Option<String>,
    /// unblinded fee-reserve change
    pub change: Option<Proofs>,
}

#[derive(Debug)]
pub struct Wallet {
    client: MintClient,
    info: MintInfo,
    keysets: KeysetCache,
    counters: Mutex<CounterManager>,
    unit: CurrencyUnit,
    retry: RetryPolicy,
}

impl Wallet {
    /// Connect: pull info, keys and keyset flags, load counters.
    pub async fn new<S: WalletStore>(
        client: MintClient,
        unit: CurrencyUnit,
        mnemonic: Option<Arc<MnemonicInfo>>,
        store: &S,
        retry: RetryPolicy,
    ) -> Result<Self, Error> {
        let info = client.get_info().await?;
        if let Some(settings) = info.cache_settings() {
            client.set_cache_settings(settings);
        }

        let keys = client.get_keys(None).await?;
        let infos = client.get_keysets().await?;

        let mut keysets = KeysetCache::new();
        keysets.update(keys.keysets, &infos.keysets)?;
        if keysets.is_empty() {
            return Err(format_err!("empty keysets").into());
        }

        let records = store
            .get_counters(client.url().as_str())
            .await
            .map_err(Error::persist)?;
        let counters = CounterManager::new(client.url().as_str())
            .mnemonic(mnemonic)
            .records(records, &keysets.ids());

        Ok(Self {
            client,
            info,
            keysets,
            counters: Mutex::new(counters),
            unit,
            retry,
        })
    }

    pub fn client(&self) -> &MintClient {
        &self.client
    }

    pub fn url(&self) -> &Url {
        self.client.url()
    }

    pub fn info(&self) -> &MintInfo {
        &self.info
    }

    pub fn unit(&self) -> &CurrencyUnit {
        &self.unit
    }

    pub fn keysets(&self) -> &KeysetCache {
        &self.keysets
    }

    /// The keyset new outputs are issued under
    pub fn active_keyset(&self) -> Result<&KeySet, Error> {
        Ok(self.keysets.active_for_unit(self.unit.as_str())?)
    }

    async fn update_counters<S: WalletStore>(
        &self,
        mnemonic: Option<Arc<MnemonicInfo>>,
        store: &S,
    ) -> Result<(), Error> {
        let records = store
            .get_counters(self.client.url().as_str())
            .await
            .map_err(Error::persist)?;
        let manager = CounterManager::new(self.client.url().as_str())
            .mnemonic(mnemonic)
            .records(records, &self.keysets.ids());
        *self.counters.lock().await = manager;
        Ok(())
    }

    /// Replace the wallet mnemonic; counters reload from the store.
    pub async fn update_mnemonic<S: WalletStore>(
        &self,
        mnemonic: Option<Arc<MnemonicInfo>>,
        store: &S,
    ) -> Result<(), Error> {
        self.update_counters(mnemonic, store).await
    }

    fn outputs_for(
        lease: &mut Option<CounterLease<'_>>,
        keyset_id: Id,
        amount: Amount,
    ) -> Result<PreMintSecrets, Error> {
        match lease {
            Some(lease) => {
                let mi = lease
                    .mnemonic()
                    .cloned()
                    .ok_or_else(|| format_err!("lease without mnemonic"))?;
                let xpriv = mi.xpriv()?;
                let start = lease.count_n(amount.split().len() as u64) as u32;
                Ok(PreMintSecrets::from_xpriv(keyset_id, start, xpriv, amount)
                    .map_err(|e| anyhow::Error::new(e))?)
            }
            None => Ok(PreMintSecrets::random(keyset_id, amount)?),
        }
    }

    fn blank_outputs_for(
        lease: &mut Option<CounterLease<'_>>,
        keyset_id: Id,
        count: u64,
    ) -> Result<PreMintSecrets, Error> {
        let mut pre = match lease {
            Some(lease) => {
                let mi = lease
                    .mnemonic()
                    .cloned()
                    .ok_or_else(|| format_err!("lease without mnemonic"))?;
                let xpriv = mi.xpriv()?;
                let start = lease.count_n(count) as u32;
                PreMintSecrets::restore_batch(keyset_id, xpriv, start, start + count as u32 - 1)
                    .map_err(|e| anyhow::Error::new(e))?
            }
            None => PreMintSecrets::blank(keyset_id, count)?,
        };

        // some mints reject zero-amount outputs; the signed change
        // carries the real amounts regardless
        for p in &mut pre.secrets {
            p.blinded_message.amount = Amount::from(1);
        }
        Ok(pre)
    }

    /// Unblind a batch of promises and check any DLEQ that came along.
    fn process_signatures(
        &self,
        pre: PreMintSecrets,
        signatures: Vec<BlindSignature>,
        keys: &Keys,
    ) -> Result<Proofs, Error> {
        if signatures.len() > pre.len() {
            return Err(format_err!(
                "promises size unexpected: signatures: {}, outputs: {}",
                signatures.len(),
                pre.len(),
            )
            .into());
        }

        let proofs = dhke::construct_proofs(
            signatures,
            pre.rs(),
            pre.secret_values(),
            keys,
        )?;

        for proof in &proofs {
            if proof.dleq.is_some() {
                let key = keys
                    .amount_key(proof.amount)
                    .ok_or(dhke::Error::MissingAmountKey(proof.amount))?;
                proof.verify_dleq(key)?;
            }
        }

        Ok(proofs)
    }

    /// Request a mint quote for `amount`
    pub async fn mint_quote(
        &self,
        amount: Amount,
        description: Option<String>,
    ) -> Result<MintQuoteBolt11Response, Error> {
        Ok(self
            .client
            .mint_quote(amount, &self.unit, description)
            .await?)
    }

    /// Poll the payment state of a mint quote
    pub async fn mint_quote_state(&self, quote: &str) -> Result<MintQuoteBolt11Response, Error> {
        Ok(self.client.get_mint_quote(quote).await?)
    }

    /// Mint proofs against a paid quote.
    ///
    /// Outputs are generated once and reused verbatim across retries;
    /// regenerating them would change the idempotency footprint the
    /// mint keys on the quote id.
    pub async fn mint<S: WalletStore>(
        &self,
        quote: &str,
        amount: Amount,
        store: &S,
    ) -> Result<Proofs, Error> {
        let keyset = self.active_keyset()?;
        let keyset_id = keyset.id;
        let keys = keyset.keys.clone();

        let mut manager = self.counters.lock().await;
        let has_mnemonic = manager.mnemonic_info().is_some();
        let mut lease = if has_mnemonic {
            Some(manager.start(&keyset_id)?)
        } else {
            None
        };

        let pre = Self::outputs_for(&mut lease, keyset_id, amount)?;
        let outputs = pre.blinded_messages();

        let mut attempt = 0u32;
        let res = loop {
            match self.client.mint(quote, outputs.clone()).await {
                Ok(res) => break res,
                Err(e) => {
                    // quote-not-paid clears once the invoice settles,
                    // transport errors may never have reached the mint
                    let retryable = e.is_transient() || e.is_quote_not_paid();
                    if !retryable || attempt + 1 >= self.retry.attempts {
                        return Err(e.into());
                    }
                    let delay = self.retry.delay_for(attempt);
                    debug!("mint attempt {} failed ({}), retry in {:?}", attempt, e, delay);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        };

        if let Some(lease) = lease.as_mut() {
            lease.commit(store).await?;
        }

        self.process_signatures(pre, res.signatures, &keys)
    }

    /// Swap `inputs` for fresh proofs: `keep + send` of value, split
    /// at `send_start` in the returned vector.
    pub async fn swap<S: WalletStore>(
        &self,
        inputs: Proofs,
        keep: Amount,
        send: Amount,
        store: &S,
    ) -> Result<(Proofs, usize), Error> {
        let keyset = self.active_keyset()?;
        let keyset_id = keyset.id;
        let keys = keyset.keys.clone();

        let mut manager = self.counters.lock().await;
        let has_mnemonic = manager.mnemonic_info().is_some();

        // with deterministic secrets an "outputs already signed"
        // answer means our stored counter is stale: burn the range and
        // try the next one
        for round in 0..3 {
            let mut lease = if has_mnemonic {
                Some(manager.start(&keyset_id)?)
            } else {
                None
            };

            let mut pre = Self::outputs_for(&mut lease, keyset_id, keep)?;
            let send_start = pre.len();
            let pre_send = Self::outputs_for(&mut lease, keyset_id, send)?;
            pre.secrets.extend(pre_send.secrets);

            let outputs = pre.blinded_messages();

            match self.client.swap(inputs.clone(), outputs).await {
                Ok(res) => {
                    if res.signatures.is_empty() {
                        return Err(format_err!("empty swap response").into());
                    }
                    if let Some(lease) = lease.as_mut() {
                        lease.commit(store).await?;
                    }
                    let proofs = self.process_signatures(pre, res.signatures, &keys)?;
                    return Ok((proofs, send_start));
                }
                Err(e) => {
                    if has_mnemonic && e.is_outputs_already_signed() && round < 2 {
                        if let Some(lease) = lease.as_mut() {
                            lease.commit(store).await?;
                        }
                        continue;
                    }
                    return Err(e.into());
                }
            }
        }

        unreachable!()
    }

    /// Request a melt quote for a bolt11 invoice
    pub async fn melt_quote(
        &self,
        invoice: &str,
        options: Option<MeltOptions>,
    ) -> Result<MeltQuoteBolt11Response, Error> {
        Ok(self.client.melt_quote(invoice, &self.unit, options).await?)
    }

    /// Melt `inputs` against a quote; blank outputs sized by the fee
    /// reserve collect any overpaid fees.
    ///
    /// <https://github.com/cashubtc/nuts/blob/main/08.md>
    pub async fn melt<S: WalletStore>(
        &self,
        quote: &str,
        inputs: Proofs,
        fee_reserve: Amount,
        store: &S,
    ) -> Result<Melted, Error> {
        let keyset = self.active_keyset()?;
        let keyset_id = keyset.id;
        let keys = keyset.keys.clone();

        let mut manager = self.counters.lock().await;
        let has_mnemonic = manager.mnemonic_info().is_some();
        let mut lease = if has_mnemonic {
            Some(manager.start(&keyset_id)?)
        } else {
            None
        };

        let blank_count = fee_reserve.blank_count();
        let pre = if blank_count > 0 {
            Self::blank_outputs_for(&mut lease, keyset_id, blank_count)?
        } else {
            PreMintSecrets::default()
        };

        let outputs = if pre.is_empty() {
            None
        } else {
            Some(pre.blinded_messages())
        };

        let res = self.client.melt(quote, inputs, outputs).await?;

        if let Some(lease) = lease.as_mut() {
            lease.commit(store).await?;
        }

        let change = match res.change.clone() {
            Some(signatures) if !signatures.is_empty() => {
                Some(self.process_signatures(pre, signatures, &keys)?)
            }
            _ => None,
        };

        Ok(Melted {
            state: res.state,
            preimage: res.payment_preimage,
            change,
        })
    }

    /// Ys for a batch of proofs, order preserved
    pub fn ys(proofs: &[Proof]) -> Result<Vec<PublicKey>, Error> {
        let mut ys = Vec::with_capacity(proofs.len());
        for p in proofs {
            ys.push(dhke::hash_to_curve(p.secret.as_bytes())?);
        }
        Ok(ys)
    }

    /// 07 check whether the mint has seen these proofs spent
    pub async fn check_proofs(&self, proofs: &[Proof]) -> Result<CheckStateResponse, Error> {
        let ys = Self::ys(proofs)?;
        let res = self.client.check_state(ys).await?;
        if res.states.len() != proofs.len() {
            return Err(format_err!(
                "invalid checkstate response {}->{}",
                proofs.len(),
                res.states.len()
            )
            .into());
        }
        Ok(res)
    }

    /// Rediscover proofs of this wallet's seed via NUT-09.
    ///
    /// Walks each keyset's counter space in `batch_size` steps until
    /// `empty_rounds` consecutive batches return nothing; spent proofs
    /// are filtered out through checkstate.
    pub async fn restore<S: WalletStore>(
        &self,
        keyset_ids: &[Id],
        batch_size: u32,
        empty_rounds: u32,
        store: &S,
    ) -> Result<Proofs, Error> {
        let manager = self.counters.lock().await;
        let mi = manager
            .mnemonic_info()
            .cloned()
            .ok_or_else(|| format_err!("restore needs a mnemonic"))?;
        drop(manager);

        let batch_size = batch_size.max(1);
        let xpriv = mi.xpriv()?;
        let ids = if keyset_ids.is_empty() {
            self.keysets.ids()
        } else {
            keyset_ids.to_vec()
        };

        let mut restored: Proofs = Vec::new();

        for keyset_id in ids {
            let keys = self.keysets.keys(&keyset_id)?.clone();

            let mut start: u32 = 0;
            let mut emptys: u32 = 0;
            let mut last_used: Option<u64> = None;

            while emptys < empty_rounds {
                let end = start + batch_size - 1;
                let pre = PreMintSecrets::restore_batch(keyset_id, xpriv, start, end)
                    .map_err(|e| anyhow::Error::new(e))?;

                let res = self.client.restore(pre.blinded_messages()).await?;
                let (outputs, signatures) = res.into_signatures();

                if outputs.is_empty() {
                    emptys += 1;
                    start = end + 1;
                    continue;
                }
                emptys = 0;

                // the mint answers with the subset it signed; line the
                // pre-mint data up with it
                let mut matched = PreMintSecrets::default();
                for output in &outputs {
                    if let Some(pm) = pre
                        .secrets
                        .iter()
                        .find(|pm| pm.blinded_message.blinded_secret == output.blinded_secret)
                    {
                        matched.secrets.push(pm.clone());
                    }
                }
                if matched.len() != signatures.len() {
                    return Err(format_err!(
                        "restore response unmatched: {} outputs, {} signatures",
                        matched.len(),
                        signatures.len()
                    )
                    .into());
                }

                if let Some(last) = matched.secrets.last() {
                    if let Some(idx) = pre
                        .secrets
                        .iter()
                        .position(|pm| pm.blinded_message == last.blinded_message)
                    {
                        last_used = Some(start as u64 + idx as u64);
                    }
                }

                let proofs = self.process_signatures(matched, signatures, &keys)?;

                let states = self.check_proofs(&proofs).await?.states;
                let unspent = proofs
                    .into_iter()
                    .zip(states)
                    .filter(|(_, s)| s.state != State::Spent)
                    .map(|(p, _)| p);
                restored.extend(unspent);

                start = end + 1;
            }

            if let Some(last) = last_used {
                let mut record = crate::types::CounterRecord::new(
                    self.client.url().as_str(),
                    keyset_id.to_string(),
                    Some(mi.pubkey().to_owned()),
                );
                record.counter = last + 1;
                store.add_counter(&record).await.map_err(Error::persist)?;
            }
        }

        // reload counters moved forward by the restore
        self.update_counters(Some(mi), store).await?;

        Ok(restored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_policy_backoff() {
        let retry = RetryPolicy {
            attempts: 3,
            delay: Duration::from_secs(1),
        };
        assert_eq!(retry.delay_for(0), Duration::from_secs(1));
        assert_eq!(retry.delay_for(1), Duration::from_secs(2));
        assert_eq!(retry.delay_for(2), Duration::from_secs(4));
    }

    #[test]
    fn test_blank_outputs_amounts() {
        let keyset_id = "009a1f293253e41e".parse().unwrap();
        let mut lease = None;
        let pre = Wallet::blank_outputs_for(&mut lease, keyset_id, 4).unwrap();
        assert_eq!(pre.len(), 4);
        // wire amount forced to one, local amount stays blank
        assert!(pre
            .secrets
            .iter()
            .all(|p| p.blinded_message.amount == Amount::from(1)));
        assert!(pre.secrets.iter().all(|p| p.amount.is_zero()));
    }

    #[test]
    fn test_outputs_for_random() {
        let keyset_id = "009a1f293253e41e".parse().unwrap();
        let mut lease = None;
        let pre = Wallet::outputs_for(&mut lease, keyset_id, Amount::from(100)).unwrap();
        let amounts: Vec<u64> = pre.secrets.iter().map(|p| p.amount.to_u64()).collect();
        assert_eq!(amounts, vec![4, 32, 64]);
    }
}
