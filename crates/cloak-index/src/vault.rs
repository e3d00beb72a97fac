//! age sealing of index artifacts.
//!
//! Each artifact is encrypted to the X25519 recipient derived from a locally
//! stored identity. age wraps a fresh file key per artifact and protects the
//! payload with ChaCha20-Poly1305 in 64 KiB chunks, so any modified, truncated,
//! or foreign ciphertext fails to open.

use std::fmt;
use std::io::{ErrorKind, Read as _, Write as _};
use std::path::{Path, PathBuf};

use age::secrecy::ExposeSecret;

#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("failed to read key file: {0}")]
    KeyRead(std::io::Error),
    #[error("failed to write key file: {0}")]
    KeyWrite(std::io::Error),
    #[error("failed to parse age identity: {0}")]
    KeyParse(String),
    #[error("age encryption failed: {0}")]
    Encrypt(String),
    #[error("age decryption failed: {0}")]
    Decrypt(age::DecryptError),
    #[error("I/O error during decryption: {0}")]
    Io(std::io::Error),
}

impl VaultError {
    /// True when the ciphertext itself was rejected, as opposed to a local key problem.
    #[must_use]
    pub fn is_rejected_ciphertext(&self) -> bool {
        matches!(self, Self::Decrypt(_) | Self::Io(_))
    }
}

/// Identity used to seal and open every artifact of one index directory.
pub struct IndexKey {
    identity: age::x25519::Identity,
    path: Option<PathBuf>,
}

impl fmt::Debug for IndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexKey")
            .field("recipient", &self.identity.to_public().to_string())
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl IndexKey {
    /// A throwaway key that is never written anywhere.
    #[must_use]
    pub fn ephemeral() -> Self {
        Self {
            identity: age::x25519::Identity::generate(),
            path: None,
        }
    }

    /// Read the identity at `path`, generating and saving a new one (mode 0600)
    /// if the file does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError`] if the file cannot be read, created, or parsed.
    pub fn load_or_create(path: &Path) -> Result<Self, VaultError> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Self::parse(&contents, path),
            Err(e) if e.kind() == ErrorKind::NotFound => Self::create(path),
            Err(e) => Err(VaultError::KeyRead(e)),
        }
    }

    /// # Errors
    ///
    /// Returns [`VaultError`] if the file is missing or does not hold an identity.
    pub fn load(path: &Path) -> Result<Self, VaultError> {
        let contents = std::fs::read_to_string(path).map_err(VaultError::KeyRead)?;
        Self::parse(&contents, path)
    }

    fn parse(contents: &str, path: &Path) -> Result<Self, VaultError> {
        let key_line = contents
            .lines()
            .find(|l| !l.starts_with('#') && !l.trim().is_empty())
            .ok_or_else(|| VaultError::KeyParse("no identity line found".into()))?;
        let identity: age::x25519::Identity = key_line
            .trim()
            .parse()
            .map_err(|e: &str| VaultError::KeyParse(e.to_owned()))?;
        Ok(Self {
            identity,
            path: Some(path.to_path_buf()),
        })
    }

    fn create(path: &Path) -> Result<Self, VaultError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(VaultError::KeyWrite)?;
        }
        let identity = age::x25519::Identity::generate();
        let contents = format!(
            "# cloak index key\n# public key: {}\n{}\n",
            identity.to_public(),
            identity.to_string().expose_secret()
        );

        let mut options = std::fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt as _;
            options.mode(0o600);
        }
        let mut file = match options.open(path) {
            Ok(file) => file,
            // another process won the race; use its key
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Self::load(path),
            Err(e) => return Err(VaultError::KeyWrite(e)),
        };
        file.write_all(contents.as_bytes())
            .and_then(|()| file.sync_all())
            .map_err(VaultError::KeyWrite)?;

        tracing::info!(path = %path.display(), "generated new index key");
        Ok(Self {
            identity,
            path: Some(path.to_path_buf()),
        })
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Encrypt `plaintext` into a self-contained age file.
    ///
    /// # Errors
    ///
    /// Returns `Encrypt` if age fails to set up or finish the stream.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, VaultError> {
        let recipient = self.identity.to_public();
        let encryptor =
            age::Encryptor::with_recipients(std::iter::once(&recipient as &dyn age::Recipient))
                .map_err(|e| VaultError::Encrypt(e.to_string()))?;
        let mut sealed = Vec::with_capacity(plaintext.len() + 256);
        let mut writer = encryptor
            .wrap_output(&mut sealed)
            .map_err(|e| VaultError::Encrypt(e.to_string()))?;
        writer
            .write_all(plaintext)
            .map_err(|e| VaultError::Encrypt(e.to_string()))?;
        writer
            .finish()
            .map_err(|e| VaultError::Encrypt(e.to_string()))?;
        Ok(sealed)
    }

    /// Decrypt and authenticate an age file produced by [`IndexKey::seal`].
    ///
    /// # Errors
    ///
    /// Returns `Decrypt` or `Io` if the header, key, or any payload chunk fails
    /// authentication.
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, VaultError> {
        let decryptor = age::Decryptor::new(sealed).map_err(VaultError::Decrypt)?;
        let mut reader = decryptor
            .decrypt(std::iter::once(&self.identity as &dyn age::Identity))
            .map_err(VaultError::Decrypt)?;
        let mut plaintext = Vec::new();
        reader.read_to_end(&mut plaintext).map_err(VaultError::Io)?;
        Ok(plaintext)
    }
}
