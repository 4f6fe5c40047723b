//! Serialized wallet facade
//!
//! The single entry point callers talk to. One `tokio::sync::Mutex`
//! guards the proof store, the parent state machine and the per-flow
//! machines, so externally observable operations are linearizable:
//! whatever op A committed is visible to op B started after it.
//!
//! Flows mark their inputs pending under the lock before anything goes
//! over the wire; the terminal FSM transition decides commit (spent)
//! or rollback (back to unspent). A cancellation between request and
//! response leaves the pending marks in place for [EcashWallet::check_pending]
//! to reconcile against the mint.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::amount::Amount;
use crate::config::WalletConfig;
use crate::machine::{
    MeltEvent, MeltMachine, MintEvent, MintMachine, SwapEvent, SwapMachine, Transition,
    WalletEvent, WalletState, WalletStateMachine,
};
use crate::nuts::{CurrencyUnit, MeltOptions, Proofs, ProofsHelper, QuoteState};
use crate::secure::SecureStore;
use crate::store::{ProofRecord, ProofStore, WalletStore};
use crate::token::{Token, TokenVersion};
use crate::types::{Transaction, TransactionKind, TransactionStatus};
use crate::wallet::{MintClient, MnemonicInfo, Wallet, WalletError};

use WalletError as Error;

struct Inner {
    machine: WalletStateMachine,
    proofs: ProofStore,
    wallet: Option<Arc<Wallet>>,
    mnemonic: Option<Arc<MnemonicInfo>>,
    /// a mint flow survives between quote request and issuance
    pending_mint: Option<MintMachine>,
}

impl Inner {
    fn wallet(&self) -> Result<Arc<Wallet>, Error> {
        self.wallet
            .clone()
            .ok_or_else(|| format_err!("wallet not initialized").into())
    }

    /// the coordinator admits one non-terminal flow at a time
    fn guard_no_active_flow(&self) -> Result<(), Error> {
        if let Some(m) = &self.pending_mint {
            if m.is_active() {
                return Err(format_err!(
                    "a mint flow is awaiting payment; finish or fail it first"
                )
                .into());
            }
        }
        Ok(())
    }
}

/// Client-side ecash wallet against one mint
pub struct EcashWallet<S: WalletStore> {
    config: WalletConfig,
    unit: CurrencyUnit,
    store: S,
    secure: std::sync::Mutex<Option<SecureStore>>,
    inner: Mutex<Inner>,
    cancel: CancellationToken,
}

impl<S> EcashWallet<S>
where
    S: WalletStore + Send + Sync,
{
    pub fn new(config: WalletConfig, store: S) -> Result<Self, Error> {
        let unit: CurrencyUnit = config
            .unit
            .parse()
            .map_err(|_| format_err!("invalid currency unit: {}", config.unit))?;

        Ok(Self {
            config,
            unit,
            store,
            secure: std::sync::Mutex::new(None),
            inner: Mutex::new(Inner {
                machine: WalletStateMachine::new(),
                proofs: ProofStore::new(),
                wallet: None,
                mnemonic: None,
                pending_mint: None,
            }),
            cancel: CancellationToken::new(),
        })
    }

    /// Attach encrypted storage; the mnemonic (if stored) is picked up
    /// during initialize.
    pub fn with_secure_store(self, secure: SecureStore) -> Self {
        *self.secure.lock().expect("secure store lock") = Some(secure);
        self
    }

    pub fn config(&self) -> &WalletConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Cooperative cancellation for every suspending operation
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn state(&self) -> WalletState {
        self.inner.lock().await.machine.state()
    }

    pub async fn subscribe(&self) -> tokio::sync::mpsc::UnboundedReceiver<Transition> {
        self.inner.lock().await.machine.subscribe()
    }

    pub async fn balance(&self) -> Amount {
        self.inner.lock().await.proofs.total_value()
    }

    pub async fn pending_proofs(&self) -> Proofs {
        self.inner.lock().await.proofs.pending()
    }

    pub async fn transactions(&self) -> Result<Vec<Transaction>, Error> {
        self.store
            .get_transactions(&[
                TransactionStatus::Pending,
                TransactionStatus::Success,
                TransactionStatus::Failed,
                TransactionStatus::Expired,
            ])
            .await
            .map_err(Error::persist)
    }

    async fn cancellable<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, Error>>,
    ) -> Result<T, Error> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            res = fut => res,
        }
    }

    /// Connect to the mint and load persisted state.
    pub async fn initialize(&self) -> Result<(), Error> {
        let mut inner = self.inner.lock().await;
        inner.machine.apply(WalletEvent::Initialize)?;

        match self.initialize_inner(&mut inner).await {
            Ok(()) => {
                inner.machine.apply(WalletEvent::InitializationComplete)?;
                Ok(())
            }
            Err(e) => {
                inner
                    .machine
                    .apply(WalletEvent::ErrorOccurred(e.to_string()))?;
                Err(e)
            }
        }
    }

    async fn initialize_inner(&self, inner: &mut Inner) -> Result<(), Error> {
        // seed material first; only the identity leaves the secure store
        let mnemonic = {
            let secure = self.secure.lock().expect("secure store lock");
            match secure.as_ref() {
                Some(s) => s
                    .load_mnemonic()?
                    .map(|words| MnemonicInfo::with_words(&words))
                    .transpose()?
                    .map(Arc::new),
                None => None,
            }
        };

        let mint_url: Url = self
            .config
            .mint_url
            .parse()
            .map_err(|e| format_err!("invalid mint url: {}", e))?;
        let client = MintClient::new(mint_url, self.config.http_options())?;
        if let Some(cache) = &self.config.response_cache {
            client.set_cache_settings(cache.clone());
        }

        let wallet = self
            .cancellable(Wallet::new(
                client,
                self.unit.clone(),
                mnemonic.clone(),
                &self.store,
                self.config.retry_policy(),
            ))
            .await?;

        let records = self
            .store
            .get_proofs(wallet.url().as_str())
            .await
            .map_err(Error::persist)?;
        inner.proofs.load(records);

        inner.wallet = Some(Arc::new(wallet));
        inner.mnemonic = mnemonic;
        Ok(())
    }

    pub async fn lock(&self) -> Result<(), Error> {
        let mut inner = self.inner.lock().await;
        inner.machine.apply(WalletEvent::Lock)?;
        // seed material stays only in the secure store while locked
        inner.mnemonic = None;
        Ok(())
    }

    pub async fn unlock(&self) -> Result<(), Error> {
        let mut inner = self.inner.lock().await;
        inner.machine.apply(WalletEvent::Unlock)?;

        let mnemonic = {
            let secure = self.secure.lock().expect("secure store lock");
            match secure.as_ref() {
                Some(s) => s
                    .load_mnemonic()?
                    .map(|words| MnemonicInfo::with_words(&words))
                    .transpose()?
                    .map(Arc::new),
                None => None,
            }
        };

        if let (Some(w), Some(mi)) = (&inner.wallet, &mnemonic) {
            w.update_mnemonic(Some(mi.clone()), &self.store).await?;
        }
        inner.mnemonic = mnemonic;
        Ok(())
    }

    pub async fn resolve_error(&self) -> Result<(), Error> {
        let mut inner = self.inner.lock().await;
        inner.machine.apply(WalletEvent::ErrorResolved)?;
        Ok(())
    }

    /// Cancel in-flight work and reset to uninitialized.
    pub async fn shutdown(&self) -> Result<(), Error> {
        self.cancel.cancel();
        let mut inner = self.inner.lock().await;
        inner.machine.apply(WalletEvent::Shutdown)?;
        inner.wallet = None;
        inner.mnemonic = None;
        inner.pending_mint = None;
        Ok(())
    }

    // ---- helpers around the parent machine ----

    fn begin(inner: &mut Inner, tx_id: &str) -> Result<(), Error> {
        inner
            .machine
            .apply(WalletEvent::StartTransaction(tx_id.to_owned()))?;
        Ok(())
    }

    fn finish(inner: &mut Inner) {
        // the op already holds a terminal result; a failure to record
        // completion is unrecoverable and would wedge the machine
        let _ = inner.machine.apply(WalletEvent::TransactionComplete);
    }

    fn fail(inner: &mut Inner, error: &Error) {
        let _ = inner
            .machine
            .apply(WalletEvent::ErrorOccurred(error.to_string()));
        // rollback already happened; the wallet is consistent again
        let _ = inner.machine.apply(WalletEvent::ErrorResolved);
    }

    async fn persist_states(&self, inner: &Inner, proofs: &[crate::nuts::Proof]) -> Result<(), Error> {
        let wallet = inner.wallet()?;
        let mut records = Vec::with_capacity(proofs.len());
        for p in proofs {
            let state = inner.proofs.state_of(&p.secret).unwrap_or_default();
            let mut record = ProofRecord::from(p.clone());
            record.state = state;
            record.unit = Some(self.unit.as_str().to_owned());
            records.push(record);
        }
        self.store
            .add_proofs(wallet.url().as_str(), &records)
            .await
            .map_err(Error::persist)
    }

    async fn record_tx(&self, tx: &Transaction) -> Result<(), Error> {
        self.store.add_transaction(tx).await.map_err(Error::persist)
    }

    // ---- mint ----

    /// Ask the mint for a bolt11 invoice to pay. The flow then waits
    /// in the background for [EcashWallet::mint_tokens] once paid.
    pub async fn request_mint(
        &self,
        amount: Amount,
        description: Option<String>,
    ) -> Result<Transaction, Error> {
        let mut inner = self.inner.lock().await;
        inner.guard_no_active_flow()?;

        let mut tx = Transaction::new(
            TransactionKind::Mint,
            self.config.mint_url.as_str(),
            amount.to_u64(),
            Some(self.unit.as_str()),
        );
        Self::begin(&mut inner, &tx.id)?;

        let mut flow = MintMachine::new(amount);
        flow.meta.tx_id = Some(tx.id.clone());
        flow.apply(MintEvent::Start).map_err(Error::from)?;

        let res = async {
            let wallet = inner.wallet()?;
            self.cancellable(wallet.mint_quote(amount, description))
                .await
        }
        .await;

        match res {
            Ok(quote) => {
                flow.apply(MintEvent::QuoteReceived(quote.quote.clone()))
                    .map_err(Error::from)?;

                tx.info = Some(quote.request.clone());
                self.record_tx(&tx).await?;

                inner.pending_mint = Some(flow);
                Self::finish(&mut inner);
                Ok(tx)
            }
            Err(e) => {
                let _ = flow.apply(MintEvent::Fail(e.to_string()));
                Self::fail(&mut inner, &e);
                Err(e)
            }
        }
    }

    /// Issue proofs for the pending mint quote. Safe to call before
    /// the invoice settles: the flow stays in awaiting-payment and the
    /// call reports quote-not-paid.
    pub async fn mint_tokens(&self) -> Result<Transaction, Error> {
        let mut inner = self.inner.lock().await;

        let (quote, amount, tx_id) = {
            let flow = inner
                .pending_mint
                .as_ref()
                .ok_or_else(|| format_err!("no mint flow awaiting payment"))?;
            let quote = flow
                .meta
                .quote
                .clone()
                .ok_or_else(|| format_err!("mint flow has no quote"))?;
            (quote, flow.meta.amount, flow.meta.tx_id.clone())
        };

        Self::begin(&mut inner, tx_id.as_deref().unwrap_or("mint"))?;
        let mut flow = inner.pending_mint.take().expect("checked above");
        if let Err(e) = flow.apply(MintEvent::CheckPayment) {
            let e: Error = e.into();
            Self::fail(&mut inner, &e);
            return Err(e);
        }

        let res = self.mint_tokens_inner(&inner, &mut flow, &quote, amount).await;

        let mut tx = match tx_id {
            Some(id) => self
                .store
                .get_transaction(&id)
                .await
                .map_err(Error::persist)?
                .unwrap_or_else(|| {
                    Transaction::new(
                        TransactionKind::Mint,
                        self.config.mint_url.as_str(),
                        amount.to_u64(),
                        Some(self.unit.as_str()),
                    )
                }),
            None => Transaction::new(
                TransactionKind::Mint,
                self.config.mint_url.as_str(),
                amount.to_u64(),
                Some(self.unit.as_str()),
            ),
        };

        match res {
            Ok(MintOutcome::Unpaid) => {
                // not an error state; the quote simply needs paying
                inner.pending_mint = Some(flow);
                Self::finish(&mut inner);
                Err(crate::wallet::ClientError::Mint(
                    20001,
                    "quote not paid".to_owned(),
                )
                .into())
            }
            Ok(MintOutcome::Expired) => {
                let _ = flow.apply(MintEvent::Fail("quote expired".to_owned()));
                tx.status = TransactionStatus::Expired;
                self.record_tx(&tx).await?;
                Self::finish(&mut inner);
                Err(crate::wallet::ClientError::Mint(20007, "quote expired".to_owned()).into())
            }
            Ok(MintOutcome::Minted(proofs)) => {
                let secrets: Vec<String> =
                    proofs.iter().map(|p| p.secret.to_string()).collect();

                inner.proofs.add(proofs.clone())?;
                self.persist_states(&inner, &proofs).await?;

                flow.apply(MintEvent::Minted).map_err(Error::from)?;
                tx.outputs = secrets;
                tx.succeed();
                self.record_tx(&tx).await?;
                Self::finish(&mut inner);
                Ok(tx)
            }
            Err(e) => {
                let _ = flow.apply(MintEvent::Fail(e.to_string()));
                tx.fail(&e);
                self.record_tx(&tx).await?;
                Self::fail(&mut inner, &e);
                Err(e)
            }
        }
    }

    async fn mint_tokens_inner(
        &self,
        inner: &Inner,
        flow: &mut MintMachine,
        quote: &str,
        amount: Amount,
    ) -> Result<MintOutcome, Error> {
        let wallet = inner.wallet()?;

        let state = self
            .cancellable(wallet.mint_quote_state(quote))
            .await?
            .state;

        match state {
            QuoteState::Unpaid => {
                flow.apply(MintEvent::StillUnpaid).map_err(Error::from)?;
                Ok(MintOutcome::Unpaid)
            }
            QuoteState::Expired => Ok(MintOutcome::Expired),
            QuoteState::Issued => Err(crate::wallet::ClientError::Mint(
                20002,
                "quote already issued".to_owned(),
            )
            .into()),
            QuoteState::Paid => {
                flow.apply(MintEvent::Paid).map_err(Error::from)?;
                // outputs are kept identical across retries inside;
                // deterministic wallets re-derive the same ones even
                // across calls, since counters only advance on success
                let proofs = self
                    .cancellable(wallet.mint(quote, amount, &self.store))
                    .await?;
                Ok(MintOutcome::Minted(proofs))
            }
        }
    }

    // ---- melt ----

    /// Pay a bolt11 invoice with proofs.
    ///
    /// On any failure the selected inputs return to the unspent set;
    /// retrying with the same invoice reselects them. On cancellation
    /// mid-flight they stay pending until [EcashWallet::check_pending]
    /// learns their fate from the mint.
    pub async fn melt(
        &self,
        invoice: &str,
        options: Option<MeltOptions>,
    ) -> Result<Transaction, Error> {
        let mut inner = self.inner.lock().await;
        inner.guard_no_active_flow()?;

        let mut flow = MeltMachine::new(invoice.to_owned());
        let mut tx = Transaction::new(
            TransactionKind::Melt,
            self.config.mint_url.as_str(),
            0,
            Some(self.unit.as_str()),
        );
        Self::begin(&mut inner, &tx.id)?;
        flow.apply(MeltEvent::Start).map_err(Error::from)?;

        match self.melt_inner(&mut inner, &mut flow, invoice, options, &mut tx).await {
            Ok(tx) => {
                Self::finish(&mut inner);
                Ok(tx)
            }
            Err(e) => {
                if e.is_cancelled() {
                    // unknown server state: inputs stay pending, the
                    // transaction stays open for reconciliation
                    self.record_tx(&tx).await.ok();
                    Self::finish(&mut inner);
                    return Err(e);
                }

                let _ = flow.apply(MeltEvent::Fail(e.to_string()));

                // rollback completeness: every pending input returns
                inner.proofs.unmark_pending(&flow.meta.inputs)?;
                self.persist_states(&inner, &flow.meta.inputs).await.ok();

                tx.fail(&e);
                self.record_tx(&tx).await.ok();
                Self::fail(&mut inner, &e);
                Err(e)
            }
        }
    }

    async fn melt_inner(
        &self,
        inner: &mut Inner,
        flow: &mut MeltMachine,
        invoice: &str,
        options: Option<MeltOptions>,
        tx: &mut Transaction,
    ) -> Result<Transaction, Error> {
        let wallet = inner.wallet()?;

        let quote = self
            .cancellable(wallet.melt_quote(invoice, options))
            .await?;
        flow.apply(MeltEvent::QuoteReceived(quote.quote.clone()))
            .map_err(Error::from)?;
        flow.meta.amount = quote.amount;
        flow.meta.fee_reserve = quote.fee_reserve;

        tx.amount = quote.amount.to_u64();
        tx.fee = Some(quote.fee_reserve.to_u64());

        let total = quote
            .amount
            .checked_add(quote.fee_reserve)
            .ok_or_else(|| format_err!("melt amount overflow"))?;

        // pick inputs; swap to the exact figure when the selection
        // overshoots, so no more than the fee reserve is at stake
        let selected = inner.proofs.select(total)?;
        let selected_sum = selected.sum();

        let inputs = if selected_sum > total {
            inner.proofs.mark_pending(&selected)?;
            self.persist_states(inner, &selected).await?;
            tx.inputs = selected.iter().map(|p| p.secret.to_string()).collect();

            let keep = selected_sum - total;
            let swapped = self
                .cancellable(wallet.swap(selected.clone(), keep, total, &self.store))
                .await;

            match swapped {
                Ok((mut proofs, send_start)) => {
                    inner.proofs.mark_spent(&selected)?;
                    self.persist_states(inner, &selected).await?;

                    let send = proofs.split_off(send_start);
                    inner.proofs.add(proofs.clone())?;
                    inner.proofs.add(send.clone())?;
                    self.persist_states(inner, &proofs).await?;
                    send
                }
                Err(e) => {
                    // a cancelled swap may have landed; leave the marks
                    // for reconciliation
                    if !e.is_cancelled() {
                        inner.proofs.unmark_pending(&selected)?;
                        self.persist_states(inner, &selected).await.ok();
                    }
                    return Err(e);
                }
            }
        } else {
            selected
        };

        // inputs go pending before they go over the wire
        inner.proofs.mark_pending(&inputs)?;
        self.persist_states(inner, &inputs).await?;
        flow.meta.inputs = inputs.clone();
        tx.inputs = inputs.iter().map(|p| p.secret.to_string()).collect();
        flow.apply(MeltEvent::ProofsSelected).map_err(Error::from)?;

        let melted = self
            .cancellable(wallet.melt(&quote.quote, inputs.clone(), quote.fee_reserve, &self.store))
            .await?;

        if !melted.state.is_paid() {
            return Err(crate::wallet::ClientError::Mint(
                20001,
                format!("melt not paid, state {}", melted.state),
            )
            .into());
        }

        flow.apply(MeltEvent::Settled).map_err(Error::from)?;
        flow.meta.preimage = melted.preimage.clone();

        // commit: inputs spent, fee change back into the wallet
        inner.proofs.mark_spent(&inputs)?;
        self.persist_states(inner, &inputs).await?;

        let mut fee = quote.fee_reserve.to_u64();
        if let Some(change) = melted.change {
            fee = fee.saturating_sub(change.sum().to_u64());
            inner.proofs.add(change.clone())?;
            self.persist_states(inner, &change).await?;
        }

        tx.fee = Some(fee);
        tx.info = melted.preimage;
        tx.succeed();
        self.record_tx(tx).await?;

        Ok(tx.clone())
    }

    // ---- send / swap ----

    /// Split off `amount` into a bearer token for someone else.
    pub async fn send(
        &self,
        amount: Amount,
        memo: Option<String>,
        version: TokenVersion,
    ) -> Result<(Transaction, String), Error> {
        let mut inner = self.inner.lock().await;
        inner.guard_no_active_flow()?;

        let mut flow = SwapMachine::new(amount);
        let mut tx = Transaction::new(
            TransactionKind::Send,
            self.config.mint_url.as_str(),
            amount.to_u64(),
            Some(self.unit.as_str()),
        );
        Self::begin(&mut inner, &tx.id)?;
        flow.apply(SwapEvent::Start).map_err(Error::from)?;

        match self
            .send_inner(&mut inner, &mut flow, amount, memo, version, &mut tx)
            .await
        {
            Ok(out) => {
                Self::finish(&mut inner);
                Ok(out)
            }
            Err(e) => {
                if e.is_cancelled() {
                    self.record_tx(&tx).await.ok();
                    Self::finish(&mut inner);
                    return Err(e);
                }

                let _ = flow.apply(SwapEvent::Fail(e.to_string()));
                inner.proofs.unmark_pending(&flow.meta.inputs)?;
                self.persist_states(&inner, &flow.meta.inputs).await.ok();
                tx.fail(&e);
                self.record_tx(&tx).await.ok();
                Self::fail(&mut inner, &e);
                Err(e)
            }
        }
    }

    async fn send_inner(
        &self,
        inner: &mut Inner,
        flow: &mut SwapMachine,
        amount: Amount,
        memo: Option<String>,
        version: TokenVersion,
        tx: &mut Transaction,
    ) -> Result<(Transaction, String), Error> {
        let wallet = inner.wallet()?;

        let selected = inner.proofs.select(amount)?;
        let selected_sum = selected.sum();

        inner.proofs.mark_pending(&selected)?;
        self.persist_states(inner, &selected).await?;
        flow.meta.inputs = selected.clone();
        tx.inputs = selected.iter().map(|p| p.secret.to_string()).collect();
        flow.apply(SwapEvent::InputsReady).map_err(Error::from)?;

        let send_proofs = if selected_sum == amount {
            // exact denominations already on hand, hand them over as-is
            flow.apply(SwapEvent::OutputsReady).map_err(Error::from)?;
            flow.apply(SwapEvent::Swapped).map_err(Error::from)?;
            selected.clone()
        } else {
            flow.apply(SwapEvent::OutputsReady).map_err(Error::from)?;

            let keep = selected_sum - amount;
            let (mut proofs, send_start) = self
                .cancellable(wallet.swap(selected.clone(), keep, amount, &self.store))
                .await?;
            flow.apply(SwapEvent::Swapped).map_err(Error::from)?;

            // inputs burned, change kept, send split leaves custody
            // the moment the token is handed out
            inner.proofs.mark_spent(&selected)?;
            self.persist_states(inner, &selected).await?;

            let send = proofs.split_off(send_start);
            inner.proofs.add(proofs.clone())?;
            self.persist_states(inner, &proofs).await?;
            inner.proofs.add(send.clone())?;
            inner.proofs.mark_pending(&send)?;
            self.persist_states(inner, &send).await?;

            send
        };

        let token = Token::new(
            wallet.url().clone(),
            send_proofs.clone(),
            memo,
            Some(self.unit.clone()),
        )?;
        let encoded = token.encode(version)?;

        tx.outputs = send_proofs.iter().map(|p| p.secret.to_string()).collect();
        tx.info = Some(encoded.clone());
        self.record_tx(tx).await?;

        Ok((tx.clone(), encoded))
    }

    /// Redeem a bearer token: swap its proofs for fresh ones only this
    /// wallet can spend.
    pub async fn receive(&self, token_str: &str) -> Result<Transaction, Error> {
        let mut inner = self.inner.lock().await;
        inner.guard_no_active_flow()?;

        let token = Token::decode(token_str)?;
        if let Some(unit) = &token.unit {
            if unit != &self.unit {
                return Err(format_err!("token unit {} not supported", unit).into());
            }
        }

        let amount = token.value();
        let mut flow = SwapMachine::new(amount);
        let mut tx = Transaction::new(
            TransactionKind::Receive,
            self.config.mint_url.as_str(),
            amount.to_u64(),
            Some(self.unit.as_str()),
        );
        Self::begin(&mut inner, &tx.id)?;
        flow.apply(SwapEvent::Start).map_err(Error::from)?;

        match self.receive_inner(&mut inner, &mut flow, token, &mut tx).await {
            Ok(tx) => {
                Self::finish(&mut inner);
                Ok(tx)
            }
            Err(e) => {
                let _ = flow.apply(SwapEvent::Fail(e.to_string()));
                tx.fail(&e);
                self.record_tx(&tx).await.ok();
                Self::fail(&mut inner, &e);
                Err(e)
            }
        }
    }

    async fn receive_inner(
        &self,
        inner: &mut Inner,
        flow: &mut SwapMachine,
        token: Token,
        tx: &mut Transaction,
    ) -> Result<Transaction, Error> {
        let wallet = inner.wallet()?;

        let wallet_url = wallet.url().as_str().trim_end_matches('/');
        for entry in &token.entries {
            if entry.mint.as_str().trim_end_matches('/') != wallet_url {
                return Err(Error::MintUrlUnmatched);
            }
        }

        let inputs = token.proofs();
        tx.inputs = inputs.iter().map(|p| p.secret.to_string()).collect();
        flow.apply(SwapEvent::InputsReady).map_err(Error::from)?;

        let amount = inputs.sum();
        flow.apply(SwapEvent::OutputsReady).map_err(Error::from)?;

        let (proofs, _) = self
            .cancellable(wallet.swap(inputs, amount, Amount::ZERO, &self.store))
            .await?;
        flow.apply(SwapEvent::Swapped).map_err(Error::from)?;

        inner.proofs.add(proofs.clone())?;
        self.persist_states(inner, &proofs).await?;

        tx.outputs = proofs.iter().map(|p| p.secret.to_string()).collect();
        tx.succeed();
        self.record_tx(tx).await?;

        Ok(tx.clone())
    }

    // ---- reconciliation & restore ----

    /// Resolve pending proofs and pending send transactions against
    /// the mint's view. Safe to run any time; in-flight operations are
    /// excluded by the wallet lock.
    pub async fn check_pending(&self) -> Result<(usize, usize), Error> {
        let mut inner = self.inner.lock().await;
        let wallet = inner.wallet()?;

        let pending = inner.proofs.pending();
        if pending.is_empty() {
            return Ok((0, 0));
        }

        // secrets referenced by open send transactions stay reserved
        // until the receiver redeems them
        let open_sends: std::collections::HashSet<String> = self
            .store
            .get_transactions(&[TransactionStatus::Pending])
            .await
            .map_err(Error::persist)?
            .into_iter()
            .filter(|tx| tx.kind == TransactionKind::Send)
            .flat_map(|tx| tx.outputs)
            .collect();

        let states = self
            .cancellable(wallet.check_proofs(&pending))
            .await?
            .states;

        let mut resolved = 0usize;
        let mut spent_secrets: Vec<String> = vec![];
        for (proof, state) in pending.iter().zip(states) {
            match state.state {
                crate::nuts::State::Spent => {
                    inner.proofs.mark_spent(std::slice::from_ref(proof))?;
                    spent_secrets.push(proof.secret.to_string());
                    resolved += 1;
                }
                crate::nuts::State::Unspent => {
                    if !open_sends.contains(proof.secret.as_str()) {
                        inner.proofs.unmark_pending(std::slice::from_ref(proof))?;
                        resolved += 1;
                    }
                }
                crate::nuts::State::Pending => {}
            }
        }
        self.persist_states(&inner, &pending).await?;

        // a send whose outputs got spent has been redeemed
        let mut sends = self
            .store
            .get_transactions(&[TransactionStatus::Pending])
            .await
            .map_err(Error::persist)?;
        for tx in sends.iter_mut() {
            if tx.kind == TransactionKind::Send
                && tx.outputs.iter().any(|s| spent_secrets.contains(s))
            {
                tx.succeed();
                self.record_tx(tx).await?;
            }
        }

        Ok((resolved, pending.len()))
    }

    /// Rediscover proofs of the stored seed (NUT-09) and fold the
    /// unspent ones into the wallet.
    pub async fn restore_from_seed(&self, batch_size: u32) -> Result<Amount, Error> {
        let mut inner = self.inner.lock().await;
        let wallet = inner.wallet()?;

        let restored = self
            .cancellable(wallet.restore(&[], batch_size.max(1), 3, &self.store))
            .await?;

        // skip anything the store already tracks
        let fresh: Proofs = restored
            .into_iter()
            .filter(|p| !inner.proofs.contains(p))
            .collect();

        let amount = fresh.sum();
        if !fresh.is_empty() {
            inner.proofs.add(fresh.clone())?;
            self.persist_states(&inner, &fresh).await?;
        }

        Ok(amount)
    }
}

enum MintOutcome {
    Unpaid,
    Expired,
    Minted(Proofs),
}
