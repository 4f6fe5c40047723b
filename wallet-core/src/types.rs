use strum::{AsRefStr, Display, EnumIs, EnumString, IntoStaticStr};

#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
//
#[derive(Display, AsRefStr, IntoStaticStr, EnumIs, EnumString)]
pub enum TransactionStatus {
    Pending,
    Success,
    Failed,
    Expired,
}

#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
//
#[derive(Display, AsRefStr, IntoStaticStr, EnumIs, EnumString)]
pub enum TransactionKind {
    Mint,
    Melt,
    Swap,
    Send,
    Receive,
}

/// One history entry. Inputs and outputs reference proofs by secret so
/// a later reconciliation can re-check them against the mint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// 128 random bits, hex
    pub id: String,
    pub kind: TransactionKind,
    pub status: TransactionStatus,
    pub created_at: u64,
    pub mint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    pub amount: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee: Option<u64>,
    /// input proof secrets
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<String>,
    /// output proof secrets
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<String>,
    /// free-form payload: serialized token, quote id, invoice
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Transaction {
    pub fn new(kind: TransactionKind, mint: &str, amount: u64, unit: Option<&str>) -> Self {
        Self {
            id: new_transaction_id(),
            kind,
            status: TransactionStatus::Pending,
            created_at: unixtime_ms(),
            mint: mint.to_owned(),
            unit: unit.map(|s| s.to_owned()),
            amount,
            fee: None,
            inputs: vec![],
            outputs: vec![],
            info: None,
            error: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_pending(&self) -> bool {
        self.status.is_pending()
    }

    pub fn succeed(&mut self) {
        self.status = TransactionStatus::Success;
    }

    pub fn fail(&mut self, error: impl ToString) {
        self.status = TransactionStatus::Failed;
        self.error = Some(error.to_string());
    }

    pub fn as_json(&self) -> String {
        serde_json::to_string(self).expect("json encode")
    }
}

/// 128-bit random identifier, hex encoded
pub fn new_transaction_id() -> String {
    crate::rng::random_hex(16)
}

/// Per-(mint, keyset) derivation counter, committed only after the
/// derived outputs were used against the mint
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterRecord {
    pub mint: String,
    pub keyset_id: String,
    pub counter: u64,
    pub ts: u64,
    /// identity pubkey of the mnemonic the counter belongs to
    pub pubkey: String,
}

impl CounterRecord {
    pub fn new(mint: &str, keyset_id: String, pubkey: Option<String>) -> Self {
        Self {
            mint: mint.to_owned(),
            keyset_id,
            counter: 0,
            ts: unixtime_ms(),
            pubkey: pubkey.unwrap_or_default(),
        }
    }
}

pub fn unixtime_ms() -> u64 {
    use std::time::SystemTime;

    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|x| x.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_id_shape() {
        let id = new_transaction_id();
        assert_eq!(id.len(), 32);
        assert!(hex::decode(&id).is_ok());
    }

    #[test]
    fn test_transaction_round_trip() {
        let mut tx = Transaction::new(
            TransactionKind::Melt,
            "https://8333.space:3338/",
            21,
            Some("sat"),
        );
        tx.inputs = vec!["s1".into(), "s2".into()];
        tx.fee = Some(2);

        let js = tx.as_json();
        let back: Transaction = serde_json::from_str(&js).unwrap();
        assert_eq!(back, tx);
        assert!(back.is_pending());
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(TransactionStatus::Pending.to_string(), "Pending");
        assert_eq!(
            "Failed".parse::<TransactionStatus>().unwrap(),
            TransactionStatus::Failed
        );
        assert_eq!(TransactionKind::Receive.as_ref(), "Receive");
    }

    #[test]
    fn test_fail_records_error() {
        let mut tx = Transaction::new(TransactionKind::Swap, "https://mint/", 4, None);
        tx.fail("mint returned 11001");
        assert!(tx.status.is_failed());
        assert_eq!(tx.error.as_deref(), Some("mint returned 11001"));
    }
}
