//! Encrypted at-rest storage for seed material and mint access tokens
//!
//! Layout under one directory (0700):
//!
//! ```text
//! mnemonic.enc                 sealed bip39 mnemonic
//! seed.enc                     sealed raw seed bytes
//! accesstoken-<hash>.enc       per-mint access token
//! accesstokenlist-<hash>.enc   per-mint blinded token list
//! master.key                   raw master key (absent with a password)
//! master.kdf                   pbkdf2 salt + rounds (password mode)
//! master.check.enc             sentinel to detect a wrong password
//! ```
//!
//! `<hash>` is `sha256(mint_url)[..8]` as lowercase hex. Every sealed
//! file is `version ‖ nonce(12) ‖ chacha20poly1305(key, nonce, data,
//! aad = file name)`; writes go through tmp-fsync-rename so a crash
//! leaves either the old or the new file, never a torn one.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use bitcoin_hashes::{sha256, Hash};
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};

const VERSION: u8 = 1;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;
const SALT_LEN: usize = 16;
const DEFAULT_ROUNDS: u32 = 600_000;

const MASTER_KEY_FILE: &str = "master.key";
const MASTER_KDF_FILE: &str = "master.kdf";
const CHECK_FILE: &str = "master.check.enc";
const CHECK_PLAINTEXT: &[u8] = b"cashu-wallet-core.check";

const MNEMONIC_FILE: &str = "mnemonic.enc";
const SEED_FILE: &str = "seed.enc";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Json(#[from] serde_json::Error),
    #[error("Decrypt failed (wrong key or corrupted file)")]
    DecryptFailed,
    #[error("Unsupported envelope version {0}")]
    VersionMismatch(u8),
    #[error("Sealed file too short")]
    Truncated,
    #[error("Interrupted key rotation detected ({0} tmp files); refusing to open")]
    InterruptedRotation(usize),
    #[error("Password required")]
    PasswordRequired,
    #[error("{0}")]
    Custom(#[from] anyhow::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct KdfParams {
    salt: String,
    rounds: u32,
}

impl KdfParams {
    fn derive(&self, password: &str) -> Result<[u8; KEY_LEN], Error> {
        let salt = hex::decode(&self.salt).map_err(|e| anyhow::Error::new(e))?;
        let mut key = [0u8; KEY_LEN];
        pbkdf2::pbkdf2_hmac::<sha2::Sha256>(password.as_bytes(), &salt, self.rounds, &mut key);
        Ok(key)
    }
}

/// Sealed file store holding the wallet's long lived secrets.
///
/// Exclusive owner of everything under its directory; nothing else
/// reads raw seed bytes after startup.
pub struct SecureStore {
    dir: PathBuf,
    key: [u8; KEY_LEN],
    kdf: Option<KdfParams>,
}

impl std::fmt::Debug for SecureStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // never expose the key
        f.debug_struct("SecureStore")
            .field("dir", &self.dir)
            .field("kdf", &self.kdf.is_some())
            .finish()
    }
}

impl SecureStore {
    /// Open with a random master key persisted in `master.key` (0600).
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, Error> {
        let dir = dir.as_ref().to_path_buf();
        prepare_dir(&dir)?;
        reject_tmp_leftovers(&dir)?;

        let key_path = dir.join(MASTER_KEY_FILE);
        let key: [u8; KEY_LEN] = if key_path.exists() {
            let bytes = fs::read(&key_path)?;
            bytes.try_into().map_err(|_| Error::Truncated)?
        } else {
            let key: [u8; KEY_LEN] = crate::rng::random_array();
            write_atomic(&key_path, &key)?;
            key
        };

        let store = Self {
            dir,
            key,
            kdf: None,
        };
        store.verify_or_create_check()?;
        Ok(store)
    }

    /// Open with a password-derived master key; no key material lands
    /// on disk, only salt and rounds.
    pub fn open_with_password<P: AsRef<Path>>(dir: P, password: &str) -> Result<Self, Error> {
        let dir = dir.as_ref().to_path_buf();
        prepare_dir(&dir)?;
        reject_tmp_leftovers(&dir)?;

        let kdf_path = dir.join(MASTER_KDF_FILE);
        let kdf: KdfParams = if kdf_path.exists() {
            serde_json::from_slice(&fs::read(&kdf_path)?)?
        } else {
            let salt: [u8; SALT_LEN] = crate::rng::random_array();
            let kdf = KdfParams {
                salt: hex::encode(salt),
                rounds: DEFAULT_ROUNDS,
            };
            write_atomic(&kdf_path, serde_json::to_vec(&kdf)?.as_slice())?;
            kdf
        };

        let key = kdf.derive(password)?;
        let store = Self {
            dir,
            key,
            kdf: Some(kdf),
        };
        store.verify_or_create_check()?;
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn verify_or_create_check(&self) -> Result<(), Error> {
        if self.dir.join(CHECK_FILE).exists() {
            // wrong password fails here, before any real file is touched
            let plain = self.unseal(CHECK_FILE)?;
            if plain != CHECK_PLAINTEXT {
                return Err(Error::DecryptFailed);
            }
        } else {
            self.seal(CHECK_FILE, CHECK_PLAINTEXT)?;
        }
        Ok(())
    }

    fn seal_with(key: &[u8; KEY_LEN], name: &str, plaintext: &[u8]) -> Result<Vec<u8>, Error> {
        let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
        let nonce: [u8; NONCE_LEN] = crate::rng::random_array();

        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad: name.as_bytes(),
                },
            )
            .map_err(|_| Error::DecryptFailed)?;

        let mut out = Vec::with_capacity(1 + NONCE_LEN + ciphertext.len());
        out.push(VERSION);
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn unseal_with(key: &[u8; KEY_LEN], name: &str, data: &[u8]) -> Result<Vec<u8>, Error> {
        if data.len() < 1 + NONCE_LEN {
            return Err(Error::Truncated);
        }
        if data[0] != VERSION {
            return Err(Error::VersionMismatch(data[0]));
        }

        let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
        cipher
            .decrypt(
                Nonce::from_slice(&data[1..1 + NONCE_LEN]),
                Payload {
                    msg: &data[1 + NONCE_LEN..],
                    aad: name.as_bytes(),
                },
            )
            .map_err(|_| Error::DecryptFailed)
    }

    fn seal(&self, name: &str, plaintext: &[u8]) -> Result<(), Error> {
        let sealed = Self::seal_with(&self.key, name, plaintext)?;
        write_atomic(&self.dir.join(name), &sealed)
    }

    fn unseal(&self, name: &str) -> Result<Vec<u8>, Error> {
        let data = fs::read(self.dir.join(name))?;
        Self::unseal_with(&self.key, name, &data)
    }

    fn unseal_optional(&self, name: &str) -> Result<Option<Vec<u8>>, Error> {
        if !self.dir.join(name).exists() {
            return Ok(None);
        }
        self.unseal(name).map(Some)
    }

    pub fn save_mnemonic(&self, words: &str) -> Result<(), Error> {
        self.seal(MNEMONIC_FILE, words.as_bytes())
    }

    pub fn load_mnemonic(&self) -> Result<Option<String>, Error> {
        let plain = self.unseal_optional(MNEMONIC_FILE)?;
        plain
            .map(|p| String::from_utf8(p).map_err(|e| Error::Custom(e.into())))
            .transpose()
    }

    pub fn save_seed(&self, seed: &[u8]) -> Result<(), Error> {
        self.seal(SEED_FILE, seed)
    }

    pub fn load_seed(&self) -> Result<Option<Vec<u8>>, Error> {
        self.unseal_optional(SEED_FILE)
    }

    pub fn save_access_token(&self, mint_url: &str, token: &str) -> Result<(), Error> {
        self.seal(&access_token_file(mint_url), token.as_bytes())
    }

    pub fn load_access_token(&self, mint_url: &str) -> Result<Option<String>, Error> {
        let plain = self.unseal_optional(&access_token_file(mint_url))?;
        plain
            .map(|p| String::from_utf8(p).map_err(|e| Error::Custom(e.into())))
            .transpose()
    }

    pub fn save_access_token_list(
        &self,
        mint_url: &str,
        tokens: &[String],
    ) -> Result<(), Error> {
        let js = serde_json::to_vec(tokens)?;
        self.seal(&access_token_list_file(mint_url), &js)
    }

    pub fn load_access_token_list(&self, mint_url: &str) -> Result<Option<Vec<String>>, Error> {
        let plain = self.unseal_optional(&access_token_list_file(mint_url))?;
        plain
            .map(|p| serde_json::from_slice(&p).map_err(Error::from))
            .transpose()
    }

    pub fn delete_access_token(&self, mint_url: &str) -> Result<(), Error> {
        let path = self.dir.join(access_token_file(mint_url));
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    /// Re-key every sealed file.
    ///
    /// Decrypts each with the old key, seals with the new one, renames
    /// atomically, and persists the key material last. A crash mid-way
    /// leaves tmp files behind and the next open refuses to proceed,
    /// with the old key still valid for every fully-renamed state.
    pub fn rotate_master_key(&mut self, password: Option<&str>) -> Result<(), Error> {
        let (new_key, new_kdf) = match (&self.kdf, password) {
            (Some(_), Some(password)) => {
                let salt: [u8; SALT_LEN] = crate::rng::random_array();
                let kdf = KdfParams {
                    salt: hex::encode(salt),
                    rounds: DEFAULT_ROUNDS,
                };
                (kdf.derive(password)?, Some(kdf))
            }
            (Some(_), None) => return Err(Error::PasswordRequired),
            (None, _) => {
                let key: [u8; KEY_LEN] = crate::rng::random_array();
                (key, None)
            }
        };

        // re-seal every encrypted file under the new key
        for name in sealed_files(&self.dir)? {
            let data = fs::read(self.dir.join(&name))?;
            let plain = Self::unseal_with(&self.key, &name, &data)?;
            let resealed = Self::seal_with(&new_key, &name, &plain)?;
            write_atomic(&self.dir.join(&name), &resealed)?;
        }

        // key material switches over last
        match &new_kdf {
            Some(kdf) => {
                write_atomic(&self.dir.join(MASTER_KDF_FILE), serde_json::to_vec(kdf)?.as_slice())?;
            }
            None => {
                write_atomic(&self.dir.join(MASTER_KEY_FILE), &new_key)?;
            }
        }

        self.key = new_key;
        self.kdf = new_kdf;
        Ok(())
    }
}

fn access_token_file(mint_url: &str) -> String {
    format!("accesstoken-{}.enc", mint_hash(mint_url))
}

fn access_token_list_file(mint_url: &str) -> String {
    format!("accesstokenlist-{}.enc", mint_hash(mint_url))
}

/// `sha256(mint_url)[..8]`, 16 lowercase hex chars
fn mint_hash(mint_url: &str) -> String {
    let hash = sha256::Hash::hash(mint_url.as_bytes());
    hex::encode(&hash.to_byte_array()[..8])
}

fn prepare_dir(dir: &Path) -> Result<(), Error> {
    fs::create_dir_all(dir)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(dir, fs::Permissions::from_mode(0o700))?;
    }
    Ok(())
}

fn reject_tmp_leftovers(dir: &Path) -> Result<(), Error> {
    let mut count = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.path().extension().map(|e| e == "tmp").unwrap_or(false) {
            count += 1;
        }
    }
    if count > 0 {
        return Err(Error::InterruptedRotation(count));
    }
    Ok(())
}

fn sealed_files(dir: &Path) -> Result<Vec<String>, Error> {
    let mut names = vec![];
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.ends_with(".enc") {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

/// write tmp, fsync, rename over the destination
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), Error> {
    let tmp = path.with_extension("tmp");

    {
        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut f = options.open(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
    }

    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmpdir() -> tempfile::TempDir {
        tempfile::TempDir::new().unwrap()
    }

    #[test]
    fn test_round_trip() {
        let dir = tmpdir();
        let store = SecureStore::open(dir.path()).unwrap();

        store.save_mnemonic("rough ahead uncle sport").unwrap();
        store.save_seed(&[7u8; 64]).unwrap();

        assert_eq!(
            store.load_mnemonic().unwrap().as_deref(),
            Some("rough ahead uncle sport")
        );
        assert_eq!(store.load_seed().unwrap().unwrap(), vec![7u8; 64]);

        // reopen picks up the same key file
        drop(store);
        let store = SecureStore::open(dir.path()).unwrap();
        assert_eq!(store.load_seed().unwrap().unwrap(), vec![7u8; 64]);
    }

    #[test]
    fn test_missing_files_are_none() {
        let dir = tmpdir();
        let store = SecureStore::open(dir.path()).unwrap();
        assert!(store.load_mnemonic().unwrap().is_none());
        assert!(store.load_seed().unwrap().is_none());
        assert!(store.load_access_token("https://mint/").unwrap().is_none());
    }

    #[test]
    fn test_access_tokens_per_mint() {
        let dir = tmpdir();
        let store = SecureStore::open(dir.path()).unwrap();

        store.save_access_token("https://a.mint/", "token-a").unwrap();
        store.save_access_token("https://b.mint/", "token-b").unwrap();
        store
            .save_access_token_list("https://a.mint/", &["t1".into(), "t2".into()])
            .unwrap();

        assert_eq!(
            store.load_access_token("https://a.mint/").unwrap().as_deref(),
            Some("token-a")
        );
        assert_eq!(
            store.load_access_token("https://b.mint/").unwrap().as_deref(),
            Some("token-b")
        );
        assert_eq!(
            store.load_access_token_list("https://a.mint/").unwrap().unwrap(),
            vec!["t1".to_string(), "t2".to_string()]
        );

        store.delete_access_token("https://a.mint/").unwrap();
        assert!(store.load_access_token("https://a.mint/").unwrap().is_none());

        // file names follow the hash scheme
        let expected = format!("accesstoken-{}.enc", mint_hash("https://b.mint/"));
        assert!(dir.path().join(expected).exists());
    }

    #[test]
    fn test_password_mode() {
        let dir = tmpdir();
        {
            let store = SecureStore::open_with_password(dir.path(), "hunter2").unwrap();
            store.save_mnemonic("secret words").unwrap();
            // no raw key on disk
            assert!(!dir.path().join(MASTER_KEY_FILE).exists());
            assert!(dir.path().join(MASTER_KDF_FILE).exists());
        }

        // correct password opens
        let store = SecureStore::open_with_password(dir.path(), "hunter2").unwrap();
        assert_eq!(store.load_mnemonic().unwrap().as_deref(), Some("secret words"));

        // wrong password is rejected up front
        let err = SecureStore::open_with_password(dir.path(), "letmein").unwrap_err();
        assert!(matches!(err, Error::DecryptFailed));
    }

    #[test]
    fn test_rotation() {
        let dir = tmpdir();
        let mut store = SecureStore::open(dir.path()).unwrap();

        store.save_mnemonic("words before rotation").unwrap();
        store.save_seed(&[3u8; 32]).unwrap();
        store.save_access_token("https://a.mint/", "tok").unwrap();

        let seed_file = dir.path().join(SEED_FILE);
        let cipher_before = fs::read(&seed_file).unwrap();
        let key_before = fs::read(dir.path().join(MASTER_KEY_FILE)).unwrap();

        store.rotate_master_key(None).unwrap();

        // everything still decrypts
        assert_eq!(
            store.load_mnemonic().unwrap().as_deref(),
            Some("words before rotation")
        );
        assert_eq!(store.load_seed().unwrap().unwrap(), vec![3u8; 32]);
        assert_eq!(
            store.load_access_token("https://a.mint/").unwrap().as_deref(),
            Some("tok")
        );

        // but the bytes on disk are all new
        assert_ne!(fs::read(&seed_file).unwrap(), cipher_before);
        assert_ne!(fs::read(dir.path().join(MASTER_KEY_FILE)).unwrap(), key_before);

        // and a reopen with the rotated key works
        drop(store);
        let store = SecureStore::open(dir.path()).unwrap();
        assert_eq!(store.load_seed().unwrap().unwrap(), vec![3u8; 32]);
    }

    #[test]
    fn test_rotation_password_mode_needs_password() {
        let dir = tmpdir();
        let mut store = SecureStore::open_with_password(dir.path(), "pw1").unwrap();
        store.save_mnemonic("words").unwrap();

        assert!(matches!(
            store.rotate_master_key(None),
            Err(Error::PasswordRequired)
        ));

        // rotating to a new password re-salts and re-keys
        store.rotate_master_key(Some("pw2")).unwrap();
        assert_eq!(store.load_mnemonic().unwrap().as_deref(), Some("words"));

        drop(store);
        assert!(SecureStore::open_with_password(dir.path(), "pw1").is_err());
        let store = SecureStore::open_with_password(dir.path(), "pw2").unwrap();
        assert_eq!(store.load_mnemonic().unwrap().as_deref(), Some("words"));
    }

    #[test]
    fn test_tmp_leftover_refused() {
        let dir = tmpdir();
        {
            let store = SecureStore::open(dir.path()).unwrap();
            store.save_mnemonic("words").unwrap();
        }

        fs::write(dir.path().join("mnemonic.tmp"), b"partial").unwrap();
        let err = SecureStore::open(dir.path()).unwrap_err();
        assert!(matches!(err, Error::InterruptedRotation(1)));
    }

    #[test]
    fn test_tampered_file_rejected() {
        let dir = tmpdir();
        let store = SecureStore::open(dir.path()).unwrap();
        store.save_seed(&[9u8; 32]).unwrap();

        let path = dir.path().join(SEED_FILE);
        let mut data = fs::read(&path).unwrap();
        let last = data.len() - 1;
        data[last] ^= 0xff;
        fs::write(&path, &data).unwrap();

        assert!(matches!(store.load_seed(), Err(Error::DecryptFailed)));
    }

    #[test]
    fn test_version_byte_checked() {
        let dir = tmpdir();
        let store = SecureStore::open(dir.path()).unwrap();
        store.save_seed(&[9u8; 32]).unwrap();

        let path = dir.path().join(SEED_FILE);
        let mut data = fs::read(&path).unwrap();
        data[0] = 9;
        fs::write(&path, &data).unwrap();

        assert!(matches!(
            store.load_seed(),
            Err(Error::VersionMismatch(9))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_file_modes() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tmpdir();
        let store = SecureStore::open(dir.path()).unwrap();
        store.save_seed(&[1u8; 32]).unwrap();

        let dir_mode = fs::metadata(dir.path()).unwrap().permissions().mode() & 0o777;
        assert_eq!(dir_mode, 0o700);

        for file in [SEED_FILE, MASTER_KEY_FILE] {
            let mode = fs::metadata(dir.path().join(file))
                .unwrap()
                .permissions()
                .mode()
                & 0o777;
            assert_eq!(mode, 0o600, "{}", file);
        }
    }
}
