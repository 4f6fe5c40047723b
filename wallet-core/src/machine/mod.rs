//! Wallet lifecycle state machine
//!
//! Event-dispatched transitions with an ordered history; illegal
//! events return an error and leave the state untouched.

use strum::{AsRefStr, Display, EnumIs, EnumString, IntoStaticStr};
use tokio::sync::mpsc;

use crate::types::unixtime_ms;

mod transaction;
pub use transaction::*;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    #[error("Illegal event {event} in state {state}")]
    IllegalTransition { state: String, event: String },
}

impl Error {
    pub(crate) fn illegal(state: impl ToString, event: impl ToString) -> Self {
        Self::IllegalTransition {
            state: state.to_string(),
            event: event.to_string(),
        }
    }
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
//
#[derive(Display, AsRefStr, IntoStaticStr, EnumIs, EnumString)]
pub enum WalletState {
    #[default]
    Uninitialized,
    Initializing,
    Ready,
    /// exactly one transaction flow is running
    Transacting,
    Locked,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
//
#[derive(Display, AsRefStr, IntoStaticStr, EnumIs)]
pub enum WalletEvent {
    Initialize,
    InitializationComplete,
    StartTransaction(String),
    TransactionComplete,
    Lock,
    Unlock,
    ErrorOccurred(String),
    ErrorResolved,
    Shutdown,
}

/// One applied transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub from: WalletState,
    pub to: WalletState,
    pub event: WalletEvent,
    pub ts: u64,
}

/// The parent machine every wallet operation runs under
#[derive(Debug, Default)]
pub struct WalletStateMachine {
    state: WalletState,
    history: Vec<Transition>,
    observers: Vec<mpsc::UnboundedSender<Transition>>,
}

impl WalletStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> WalletState {
        self.state
    }

    pub fn history(&self) -> &[Transition] {
        &self.history
    }

    /// Observe every transition; the receiver side is async
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<Transition> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.observers.push(tx);
        rx
    }

    fn next_state(&self, event: &WalletEvent) -> Option<WalletState> {
        use WalletEvent::*;
        use WalletState::*;

        // shutdown resets from anywhere
        if matches!(event, Shutdown) {
            return Some(Uninitialized);
        }

        match (self.state, event) {
            (Uninitialized, Initialize) => Some(Initializing),
            (Initializing, InitializationComplete) => Some(Ready),
            (Initializing, ErrorOccurred(_)) => Some(Error),
            (Ready, StartTransaction(_)) => Some(Transacting),
            (Transacting, TransactionComplete) => Some(Ready),
            (Transacting, ErrorOccurred(_)) => Some(Error),
            (Ready, Lock) => Some(Locked),
            (Locked, Unlock) => Some(Ready),
            (Error, ErrorResolved) => Some(Ready),
            _ => None,
        }
    }

    /// Apply one event. Errors leave the state unchanged and do not
    /// show up in the history.
    pub fn apply(&mut self, event: WalletEvent) -> Result<WalletState, Error> {
        let to = self
            .next_state(&event)
            .ok_or_else(|| Error::illegal(self.state, &event))?;

        let transition = Transition {
            from: self.state,
            to,
            event,
            ts: unixtime_ms(),
        };

        debug!("wallet {} -> {} ({})", transition.from, to, transition.event);
        self.state = to;
        self.history.push(transition.clone());

        // dead observers just drop off
        self.observers
            .retain(|tx| tx.send(transition.clone()).is_ok());

        Ok(to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_with_history() {
        let mut machine = WalletStateMachine::new();

        let events = vec![
            WalletEvent::Initialize,
            WalletEvent::InitializationComplete,
            WalletEvent::StartTransaction("tx-1".into()),
            WalletEvent::TransactionComplete,
            WalletEvent::Lock,
            WalletEvent::Unlock,
        ];
        for e in events.clone() {
            machine.apply(e).unwrap();
        }

        assert_eq!(machine.state(), WalletState::Ready);

        // history is exactly the applied events, in order
        let applied: Vec<WalletEvent> =
            machine.history().iter().map(|t| t.event.clone()).collect();
        assert_eq!(applied, events);

        // from/to chain is contiguous
        for pair in machine.history().windows(2) {
            assert_eq!(pair[0].to, pair[1].from);
        }
    }

    #[test]
    fn test_illegal_events_leave_state() {
        let mut machine = WalletStateMachine::new();

        let err = machine.apply(WalletEvent::Lock).unwrap_err();
        assert!(matches!(err, Error::IllegalTransition { .. }));
        assert_eq!(machine.state(), WalletState::Uninitialized);
        assert!(machine.history().is_empty());

        machine.apply(WalletEvent::Initialize).unwrap();
        assert!(machine
            .apply(WalletEvent::StartTransaction("t".into()))
            .is_err());
        assert_eq!(machine.state(), WalletState::Initializing);
        assert_eq!(machine.history().len(), 1);
    }

    #[test]
    fn test_error_and_recovery() {
        let mut machine = WalletStateMachine::new();
        machine.apply(WalletEvent::Initialize).unwrap();
        machine.apply(WalletEvent::InitializationComplete).unwrap();
        machine
            .apply(WalletEvent::StartTransaction("t".into()))
            .unwrap();
        machine
            .apply(WalletEvent::ErrorOccurred("mint 500".into()))
            .unwrap();
        assert_eq!(machine.state(), WalletState::Error);

        machine.apply(WalletEvent::ErrorResolved).unwrap();
        assert_eq!(machine.state(), WalletState::Ready);
    }

    #[test]
    fn test_shutdown_from_anywhere() {
        for setup in [
            vec![],
            vec![WalletEvent::Initialize],
            vec![WalletEvent::Initialize, WalletEvent::InitializationComplete],
            vec![
                WalletEvent::Initialize,
                WalletEvent::InitializationComplete,
                WalletEvent::Lock,
            ],
        ] {
            let mut machine = WalletStateMachine::new();
            for e in setup {
                machine.apply(e).unwrap();
            }
            machine.apply(WalletEvent::Shutdown).unwrap();
            assert_eq!(machine.state(), WalletState::Uninitialized);
        }
    }

    #[tokio::test]
    async fn test_observer_sees_transitions() {
        let mut machine = WalletStateMachine::new();
        let mut rx = machine.subscribe();

        machine.apply(WalletEvent::Initialize).unwrap();
        machine.apply(WalletEvent::InitializationComplete).unwrap();

        let t1 = rx.recv().await.unwrap();
        assert_eq!(t1.from, WalletState::Uninitialized);
        assert_eq!(t1.to, WalletState::Initializing);

        let t2 = rx.recv().await.unwrap();
        assert_eq!(t2.to, WalletState::Ready);
    }
}
