//! UR-style fragmenting for animated QR transport
//!
//! A serialized token is chopped into chunks small enough for one QR
//! frame; frames cycle until the reader has every index.

use std::collections::BTreeMap;

/// `ur:cashu-token/{seq}-{total}/{msg_id}/{chunk_hex}`
const FRAGMENT_PREFIX: &str = "ur:cashu-token/";

/// Upper bound on raw chunk bytes per frame
pub const MAX_FRAGMENT_LEN: usize = 200;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Nothing to fragment")]
    Empty,
    #[error("Malformed fragment frame")]
    MalformedFrame,
    #[error("Fragment index out of range: {0}/{1}")]
    IndexOutOfRange(usize, usize),
    #[error("Fragment total changed mid stream")]
    TotalMismatch,
    #[error(transparent)]
    Hex(#[from] hex::FromHexError),
}

/// Splits a payload into QR-frame sized fragments
#[derive(Debug, Clone)]
pub struct Fragments {
    msg_id: String,
    chunks: Vec<Vec<u8>>,
}

impl Fragments {
    pub fn new(payload: &[u8]) -> Result<Self, Error> {
        Self::with_fragment_len(payload, MAX_FRAGMENT_LEN)
    }

    pub fn with_fragment_len(payload: &[u8], fragment_len: usize) -> Result<Self, Error> {
        if payload.is_empty() || fragment_len == 0 {
            return Err(Error::Empty);
        }

        Ok(Self {
            msg_id: crate::rng::random_hex(4),
            chunks: payload.chunks(fragment_len).map(|c| c.to_vec()).collect(),
        })
    }

    pub fn msg_id(&self) -> &str {
        &self.msg_id
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Frame `seq` (1-based, wrapping); callers animate by stepping seq
    pub fn frame(&self, seq: usize) -> String {
        let total = self.chunks.len();
        let idx = seq % total;
        format!(
            "{}{}-{}/{}/{}",
            FRAGMENT_PREFIX,
            idx + 1,
            total,
            self.msg_id,
            hex::encode(&self.chunks[idx])
        )
    }

    /// All frames once through
    pub fn frames(&self) -> Vec<String> {
        (0..self.chunks.len()).map(|i| self.frame(i)).collect()
    }
}

/// Reassembles frames scanned in any order.
///
/// Locks onto the msg id of the first accepted frame; frames for other
/// ids are dropped silently (camera may catch a stale animation).
#[derive(Debug, Default)]
pub struct FragmentReader {
    msg_id: Option<String>,
    total: usize,
    received: BTreeMap<usize, Vec<u8>>,
}

impl FragmentReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one scanned frame. Returns the full payload once every
    /// index has arrived.
    pub fn receive(&mut self, frame: &str) -> Result<Option<Vec<u8>>, Error> {
        let body = frame
            .strip_prefix(FRAGMENT_PREFIX)
            .ok_or(Error::MalformedFrame)?;

        let mut parts = body.splitn(3, '/');
        let seq_part = parts.next().ok_or(Error::MalformedFrame)?;
        let msg_id = parts.next().ok_or(Error::MalformedFrame)?;
        let chunk_hex = parts.next().ok_or(Error::MalformedFrame)?;

        let (seq, total) = seq_part
            .split_once('-')
            .ok_or(Error::MalformedFrame)?;
        let seq: usize = seq.parse().map_err(|_| Error::MalformedFrame)?;
        let total: usize = total.parse().map_err(|_| Error::MalformedFrame)?;

        if seq == 0 || total == 0 || seq > total {
            return Err(Error::IndexOutOfRange(seq, total));
        }

        match &self.msg_id {
            None => {
                self.msg_id = Some(msg_id.to_owned());
                self.total = total;
            }
            Some(current) if current != msg_id => {
                // different animation, not ours
                return Ok(None);
            }
            Some(_) => {
                if total != self.total {
                    return Err(Error::TotalMismatch);
                }
            }
        }

        self.received.insert(seq, hex::decode(chunk_hex)?);

        if self.received.len() == self.total {
            let payload = self.received.values().flatten().copied().collect();
            Ok(Some(payload))
        } else {
            Ok(None)
        }
    }

    /// fraction of fragments seen so far
    pub fn progress(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.received.len() as f64 / self.total as f64
    }
}
