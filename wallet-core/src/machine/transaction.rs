//! Per-flow transaction state machines
//!
//! Mint, melt and swap each walk a small FSM. The machines hold flow
//! metadata (quote ids, pre-mint data, selected inputs) but never
//! touch the proof store; the facade commits or rolls back when a
//! machine reaches a terminal state.

use strum::{AsRefStr, Display, EnumIs, IntoStaticStr};

use super::Error;
use crate::amount::Amount;
use crate::nuts::{PreMintSecrets, Proofs};
use crate::types::unixtime_ms;

/// shared shape of the three flows
macro_rules! fsm_common {
    ($state:ty, $event:ty) => {
        pub fn state(&self) -> $state {
            self.state
        }

        pub fn history(&self) -> &[($state, $state, $event, u64)] {
            &self.history
        }

        pub fn is_terminal(&self) -> bool {
            self.state.is_complete() || self.state.is_failed()
        }

        /// a started, not yet finished flow
        pub fn is_active(&self) -> bool {
            !self.state.is_idle() && !self.is_terminal()
        }

        fn transition(&mut self, to: $state, event: $event) {
            debug!("{} -> {} ({:?})", self.state, to, event);
            self.history.push((self.state, to, event, unixtime_ms()));
            self.state = to;
        }
    };
}

// ---- mint ----

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
//
#[derive(Display, AsRefStr, IntoStaticStr, EnumIs)]
pub enum MintState {
    #[default]
    Idle,
    RequestingQuote,
    AwaitingPayment,
    CheckingPayment,
    Minting,
    Complete,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
//
#[derive(Display, AsRefStr, IntoStaticStr, EnumIs)]
pub enum MintEvent {
    Start,
    /// quote issued by the mint
    QuoteReceived(String),
    CheckPayment,
    /// invoice still unpaid, keep waiting
    StillUnpaid,
    Paid,
    Minted,
    Fail(String),
}

/// Everything an in-flight mint needs to be retried or reconciled
#[derive(Debug, Default)]
pub struct MintMetadata {
    pub quote: Option<String>,
    pub amount: Amount,
    /// history record this flow reports into
    pub tx_id: Option<String>,
    /// outputs submitted to the mint; unchanged across retries
    pub pre: Option<PreMintSecrets>,
    pub error: Option<String>,
}

#[derive(Debug, Default)]
pub struct MintMachine {
    state: MintState,
    pub meta: MintMetadata,
    history: Vec<(MintState, MintState, MintEvent, u64)>,
}

impl MintMachine {
    pub fn new(amount: Amount) -> Self {
        Self {
            meta: MintMetadata {
                amount,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fsm_common!(MintState, MintEvent);

    pub fn apply(&mut self, event: MintEvent) -> Result<MintState, Error> {
        use MintEvent as E;
        use MintState as S;

        let to = match (self.state, &event) {
            (S::Idle, E::Start) => S::RequestingQuote,
            (S::RequestingQuote, E::QuoteReceived(quote)) => {
                self.meta.quote = Some(quote.clone());
                S::AwaitingPayment
            }
            (S::AwaitingPayment, E::CheckPayment) => S::CheckingPayment,
            (S::CheckingPayment, E::StillUnpaid) => S::AwaitingPayment,
            (S::CheckingPayment, E::Paid) => S::Minting,
            (S::Minting, E::Minted) => S::Complete,
            (s, E::Fail(error)) if !s.is_complete() && !s.is_failed() && !s.is_idle() => {
                self.meta.error = Some(error.clone());
                S::Failed
            }
            _ => return Err(Error::illegal(self.state, &event)),
        };

        self.transition(to, event);
        Ok(to)
    }
}

// ---- melt ----

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
//
#[derive(Display, AsRefStr, IntoStaticStr, EnumIs)]
pub enum MeltState {
    #[default]
    Idle,
    RequestingQuote,
    PreparingProofs,
    Melting,
    Complete,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
//
#[derive(Display, AsRefStr, IntoStaticStr, EnumIs)]
pub enum MeltEvent {
    Start,
    QuoteReceived(String),
    /// inputs selected and marked pending
    ProofsSelected,
    Settled,
    Fail(String),
}

#[derive(Debug, Default)]
pub struct MeltMetadata {
    pub quote: Option<String>,
    pub amount: Amount,
    pub fee_reserve: Amount,
    /// invoice being paid, opaque to the wallet
    pub request: Option<String>,
    /// inputs sitting pending in the proof store
    pub inputs: Proofs,
    pub preimage: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Default)]
pub struct MeltMachine {
    state: MeltState,
    pub meta: MeltMetadata,
    history: Vec<(MeltState, MeltState, MeltEvent, u64)>,
}

impl MeltMachine {
    pub fn new(request: String) -> Self {
        Self {
            meta: MeltMetadata {
                request: Some(request),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fsm_common!(MeltState, MeltEvent);

    pub fn apply(&mut self, event: MeltEvent) -> Result<MeltState, Error> {
        use MeltEvent as E;
        use MeltState as S;

        let to = match (self.state, &event) {
            (S::Idle, E::Start) => S::RequestingQuote,
            (S::RequestingQuote, E::QuoteReceived(quote)) => {
                self.meta.quote = Some(quote.clone());
                S::PreparingProofs
            }
            (S::PreparingProofs, E::ProofsSelected) => S::Melting,
            (S::Melting, E::Settled) => S::Complete,
            (s, E::Fail(error)) if !s.is_complete() && !s.is_failed() && !s.is_idle() => {
                self.meta.error = Some(error.clone());
                S::Failed
            }
            _ => return Err(Error::illegal(self.state, &event)),
        };

        self.transition(to, event);
        Ok(to)
    }
}

// ---- swap ----

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
//
#[derive(Display, AsRefStr, IntoStaticStr, EnumIs)]
pub enum SwapState {
    #[default]
    Idle,
    PreparingInputs,
    PreparingOutputs,
    Swapping,
    Complete,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
//
#[derive(Display, AsRefStr, IntoStaticStr, EnumIs)]
pub enum SwapEvent {
    Start,
    InputsReady,
    OutputsReady,
    Swapped,
    Fail(String),
}

#[derive(Debug, Default)]
pub struct SwapMetadata {
    pub amount: Amount,
    /// inputs sitting pending in the proof store
    pub inputs: Proofs,
    pub error: Option<String>,
}

#[derive(Debug, Default)]
pub struct SwapMachine {
    state: SwapState,
    pub meta: SwapMetadata,
    history: Vec<(SwapState, SwapState, SwapEvent, u64)>,
}

impl SwapMachine {
    pub fn new(amount: Amount) -> Self {
        Self {
            meta: SwapMetadata {
                amount,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fsm_common!(SwapState, SwapEvent);

    pub fn apply(&mut self, event: SwapEvent) -> Result<SwapState, Error> {
        use SwapEvent as E;
        use SwapState as S;

        let to = match (self.state, &event) {
            (S::Idle, E::Start) => S::PreparingInputs,
            (S::PreparingInputs, E::InputsReady) => S::PreparingOutputs,
            (S::PreparingOutputs, E::OutputsReady) => S::Swapping,
            (S::Swapping, E::Swapped) => S::Complete,
            (s, E::Fail(error)) if !s.is_complete() && !s.is_failed() && !s.is_idle() => {
                self.meta.error = Some(error.clone());
                S::Failed
            }
            _ => return Err(Error::illegal(self.state, &event)),
        };

        self.transition(to, event);
        Ok(to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mint_flow_with_payment_poll() {
        let mut m = MintMachine::new(Amount::from(100));
        assert!(!m.is_active());

        m.apply(MintEvent::Start).unwrap();
        assert!(m.is_active());
        m.apply(MintEvent::QuoteReceived("q-1".into())).unwrap();
        assert_eq!(m.meta.quote.as_deref(), Some("q-1"));

        // poll twice before the invoice settles
        m.apply(MintEvent::CheckPayment).unwrap();
        m.apply(MintEvent::StillUnpaid).unwrap();
        m.apply(MintEvent::CheckPayment).unwrap();
        m.apply(MintEvent::Paid).unwrap();
        assert_eq!(m.state(), MintState::Minting);

        m.apply(MintEvent::Minted).unwrap();
        assert!(m.is_terminal());
        assert_eq!(m.history().len(), 7);
    }

    #[test]
    fn test_mint_illegal_events() {
        let mut m = MintMachine::new(Amount::from(1));

        // can't mint from idle
        assert!(m.apply(MintEvent::Minted).is_err());
        assert_eq!(m.state(), MintState::Idle);
        // idle can't fail either, there is nothing to roll back
        assert!(m.apply(MintEvent::Fail("x".into())).is_err());

        m.apply(MintEvent::Start).unwrap();
        assert!(m.apply(MintEvent::Paid).is_err());
        assert_eq!(m.state(), MintState::RequestingQuote);
        assert_eq!(m.history().len(), 1);
    }

    #[test]
    fn test_mint_failure_records_error() {
        let mut m = MintMachine::new(Amount::from(1));
        m.apply(MintEvent::Start).unwrap();
        m.apply(MintEvent::QuoteReceived("q".into())).unwrap();
        m.apply(MintEvent::Fail("quote expired".into())).unwrap();

        assert_eq!(m.state(), MintState::Failed);
        assert_eq!(m.meta.error.as_deref(), Some("quote expired"));
        // terminal states accept nothing further
        assert!(m.apply(MintEvent::Fail("again".into())).is_err());
    }

    #[test]
    fn test_melt_flow() {
        let mut m = MeltMachine::new("lnbc1...".into());
        m.apply(MeltEvent::Start).unwrap();
        m.apply(MeltEvent::QuoteReceived("mq".into())).unwrap();
        assert_eq!(m.state(), MeltState::PreparingProofs);
        m.apply(MeltEvent::ProofsSelected).unwrap();
        assert_eq!(m.state(), MeltState::Melting);
        m.apply(MeltEvent::Settled).unwrap();
        assert!(m.state().is_complete());
    }

    #[test]
    fn test_melt_fail_from_melting() {
        let mut m = MeltMachine::new("lnbc1...".into());
        m.apply(MeltEvent::Start).unwrap();
        m.apply(MeltEvent::QuoteReceived("mq".into())).unwrap();
        m.apply(MeltEvent::ProofsSelected).unwrap();
        m.apply(MeltEvent::Fail("payment failed".into())).unwrap();
        assert!(m.state().is_failed());
        assert!(m.is_terminal());
    }

    #[test]
    fn test_swap_flow() {
        let mut m = SwapMachine::new(Amount::from(64));
        m.apply(SwapEvent::Start).unwrap();
        m.apply(SwapEvent::InputsReady).unwrap();
        m.apply(SwapEvent::OutputsReady).unwrap();
        assert!(m.is_active());
        m.apply(SwapEvent::Swapped).unwrap();
        assert!(m.state().is_complete());

        // history equals the applied events
        let events: Vec<&SwapEvent> = m.history().iter().map(|(_, _, e, _)| e).collect();
        assert_eq!(events.len(), 4);
        assert!(matches!(events[3], SwapEvent::Swapped));
    }
}
