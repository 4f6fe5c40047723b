use std::sync::Mutex;

use rand::RngCore;

/// Source of random bytes used everywhere the wallet needs entropy
/// (secrets, blinding factors, nonces, transaction ids).
pub trait EntropySource: Send {
    fn fill(&mut self, buf: &mut [u8]);
}

impl<T> EntropySource for T
where
    T: RngCore + Send,
{
    fn fill(&mut self, buf: &mut [u8]) {
        self.fill_bytes(buf)
    }
}

lazy_static::lazy_static! {
    static ref OVERRIDES: Mutex<Vec<Box<dyn EntropySource>>> = Mutex::new(Vec::new());
}

/// Fill `buf` from the innermost scoped override, or the platform
/// generator when none is installed.
pub fn fill_bytes(buf: &mut [u8]) {
    let mut lock = OVERRIDES.lock().expect("rng overrides poisoned");
    if let Some(top) = lock.last_mut() {
        top.fill(buf);
    } else {
        rand::rngs::OsRng.fill_bytes(buf);
    }
}

pub fn random_array<const N: usize>() -> [u8; N] {
    let mut buf = [0u8; N];
    fill_bytes(&mut buf);
    buf
}

/// `n` random bytes, hex encoded
pub fn random_hex(n: usize) -> String {
    let mut buf = vec![0u8; n];
    fill_bytes(&mut buf);
    hex::encode(buf)
}

/// Installs a generator override for the lifetime of the guard.
///
/// Scopes nest LIFO: the innermost live guard serves all entropy requests,
/// dropping it restores the next one out (or the platform generator).
pub struct ScopedRng {
    _private: (),
}

impl ScopedRng {
    pub fn install(source: impl EntropySource + 'static) -> Self {
        OVERRIDES
            .lock()
            .expect("rng overrides poisoned")
            .push(Box::new(source));
        Self { _private: () }
    }
}

impl Drop for ScopedRng {
    fn drop(&mut self) {
        let _ = OVERRIDES
            .lock()
            .expect("rng overrides poisoned")
            .pop();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// cycles through a fixed byte; only for tests
    pub struct Fixed(pub u8);

    impl EntropySource for Fixed {
        fn fill(&mut self, buf: &mut [u8]) {
            buf.iter_mut().for_each(|b| *b = self.0);
        }
    }

    #[test]
    fn test_override_and_restore() {
        // platform randomness: two draws should differ
        let a: [u8; 32] = random_array();
        let b: [u8; 32] = random_array();
        assert_ne!(a, b);

        {
            let _g = ScopedRng::install(Fixed(7));
            assert_eq!(random_array::<4>(), [7u8; 4]);

            {
                let _inner = ScopedRng::install(Fixed(9));
                assert_eq!(random_array::<4>(), [9u8; 4]);
            }

            // inner scope dropped, outer override visible again
            assert_eq!(random_array::<4>(), [7u8; 4]);
        }

        let c: [u8; 32] = random_array();
        let d: [u8; 32] = random_array();
        assert_ne!(c, d);
    }

    #[test]
    fn test_random_hex_len() {
        assert_eq!(random_hex(32).len(), 64);
        assert_eq!(random_hex(16).len(), 32);
    }
}
