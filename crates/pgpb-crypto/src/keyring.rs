//! Key-ring files for the age engine.
//!
//! A key-ring directory holds two files:
//!
//! - the public ring (`pubring.pkr`): one key per line, `<age1 recipient> <user id>`,
//!   with `#` comments and blank lines ignored;
//! - the private ring (`secring.skr`): an ASCII-armored, passphrase-encrypted
//!   age file whose plaintext is an age identity file.

use age::armor::{ArmoredReader, ArmoredWriter, Format};
use age::x25519;
use pgpb_core::config::PgpConfig;
use pgpb_log::debug_log;
use pgpb_log::levels::{IO_STATUS, SECURITY_LIFECYCLE};
use secrecy::{ExposeSecret, SecretString};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use zeroize::Zeroizing;

use crate::error::EngineError;

/// File names of the ring pair inside a key-ring directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRingLayout {
    pub public_ring: String,
    pub secret_ring: String,
}

impl Default for KeyRingLayout {
    fn default() -> Self {
        Self {
            public_ring: "pubring.pkr".into(),
            secret_ring: "secring.skr".into(),
        }
    }
}

impl From<&PgpConfig> for KeyRingLayout {
    fn from(config: &PgpConfig) -> Self {
        Self {
            public_ring: config.public_ring.clone(),
            secret_ring: config.secret_ring.clone(),
        }
    }
}

impl KeyRingLayout {
    pub fn public_path(&self, dir: &Path) -> PathBuf {
        dir.join(&self.public_ring)
    }

    pub fn secret_path(&self, dir: &Path) -> PathBuf {
        dir.join(&self.secret_ring)
    }
}

/// One entry of the public ring.
#[derive(Clone)]
pub struct PublicKey {
    pub user_id: String,
    pub recipient: x25519::Recipient,
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublicKey")
            .field("user_id", &self.user_id)
            .field("recipient", &self.recipient.to_string())
            .finish()
    }
}

/// Parse public ring text.
pub fn parse_public_ring(text: &str) -> Result<Vec<PublicKey>, EngineError> {
    let mut keys = Vec::new();
    for (n, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (key, user_id) = line.split_once(char::is_whitespace).ok_or_else(|| {
            EngineError::Malformed {
                what: "public key ring",
                detail: format!("line {}: missing user id", n + 1),
            }
        })?;
        let recipient = key
            .parse::<x25519::Recipient>()
            .map_err(|e| EngineError::Malformed {
                what: "public key ring",
                detail: format!("line {}: {e}", n + 1),
            })?;
        keys.push(PublicKey {
            user_id: user_id.trim().to_string(),
            recipient,
        });
    }
    Ok(keys)
}

/// Render one public ring line.
pub fn public_ring_line(recipient: &x25519::Recipient, user_id: &str) -> String {
    format!("{recipient} {user_id}\n")
}

/// Options for [`generate_key_ring_pair`].
#[derive(Debug, Clone, Default)]
pub struct KeyGenOptions {
    /// scrypt work factor (log2) protecting the private ring; `None` lets age
    /// pick one that takes about a second on this machine
    pub work_factor: Option<u8>,
    /// Replace existing ring files instead of failing
    pub overwrite: bool,
}

/// Create a fresh matching ring pair for `user_id` in `dir`.
///
/// Returns the new public key (`age1…`).
pub fn generate_key_ring_pair(
    dir: &Path,
    layout: &KeyRingLayout,
    user_id: &str,
    passphrase: &SecretString,
    options: &KeyGenOptions,
) -> Result<String, EngineError> {
    if user_id.trim().is_empty() || user_id.contains('\n') {
        return Err(EngineError::Malformed {
            what: "user id",
            detail: "must be a single non-empty line".into(),
        });
    }
    if passphrase.expose_secret().is_empty() {
        return Err(EngineError::Malformed {
            what: "passphrase",
            detail: "must not be empty".into(),
        });
    }

    let public_path = layout.public_path(dir);
    let secret_path = layout.secret_path(dir);
    if !options.overwrite {
        for path in [&public_path, &secret_path] {
            if path.exists() {
                return Err(EngineError::io(
                    path,
                    std::io::Error::new(std::io::ErrorKind::AlreadyExists, "key ring exists"),
                ));
            }
        }
    }
    fs::create_dir_all(dir).map_err(|e| EngineError::io(dir, e))?;

    let identity = x25519::Identity::generate();
    let recipient = identity.to_public();

    let identity_file = Zeroizing::new(format!(
        "# public key: {recipient}\n{}\n",
        identity.to_string().expose_secret()
    ));
    let locked = lock_with_passphrase(identity_file.as_bytes(), passphrase, options.work_factor)?;

    let public = format!(
        "# pgpbridge public key ring\n{}",
        public_ring_line(&recipient, user_id.trim())
    );
    fs::write(&public_path, public).map_err(|e| EngineError::io(&public_path, e))?;
    fs::write(&secret_path, locked).map_err(|e| EngineError::io(&secret_path, e))?;

    debug_log!(
        SECURITY_LIFECYCLE,
        "Generated key ring pair in {} for {}",
        dir.display(),
        user_id
    );
    Ok(recipient.to_string())
}

/// Append another party's public key to the public ring in `dir`.
pub fn add_public_key(
    dir: &Path,
    layout: &KeyRingLayout,
    recipient: &str,
    user_id: &str,
) -> Result<(), EngineError> {
    let line = format!("{} {}", recipient.trim(), user_id.trim());
    // validate before touching the file
    let parsed = parse_public_ring(&line)?;
    let Some(key) = parsed.first() else {
        return Err(EngineError::Malformed {
            what: "public key",
            detail: "empty entry".into(),
        });
    };

    let path = layout.public_path(dir);
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| EngineError::io(&path, e))?;
    file.write_all(public_ring_line(&key.recipient, &key.user_id).as_bytes())
        .map_err(|e| EngineError::io(&path, e))?;
    debug_log!(IO_STATUS, "Added {} to {}", key.user_id, path.display());
    Ok(())
}

/// Encrypt `plaintext` to a passphrase, ASCII armored.
fn lock_with_passphrase(
    plaintext: &[u8],
    passphrase: &SecretString,
    work_factor: Option<u8>,
) -> Result<Vec<u8>, EngineError> {
    let mut recipient =
        age::scrypt::Recipient::new(SecretString::from(passphrase.expose_secret().to_owned()));
    if let Some(log_n) = work_factor {
        recipient.set_work_factor(log_n);
    }
    let encryptor =
        age::Encryptor::with_recipients(std::iter::once(&recipient as &dyn age::Recipient))
            .map_err(|e| EngineError::crypto("locking private key ring", e))?;
    armored_encrypt(encryptor, plaintext)
}

/// Run `encryptor` over `plaintext`, producing ASCII armor.
pub(crate) fn armored_encrypt(
    encryptor: age::Encryptor,
    plaintext: &[u8],
) -> Result<Vec<u8>, EngineError> {
    let mut out = Vec::new();
    let write = |out: &mut Vec<u8>| -> std::io::Result<()> {
        let armor = ArmoredWriter::wrap_output(out, Format::AsciiArmor)?;
        let mut writer = encryptor.wrap_output(armor)?;
        writer.write_all(plaintext)?;
        writer.finish()?.finish()?;
        Ok(())
    };
    write(&mut out).map_err(|e| EngineError::crypto("writing age output", e))?;
    Ok(out)
}

/// Check that `bytes` is a passphrase-protected age file.
pub(crate) fn is_passphrase_protected(bytes: &[u8]) -> Result<bool, EngineError> {
    let decryptor = age::Decryptor::new(ArmoredReader::new(bytes)).map_err(|e| {
        EngineError::Malformed {
            what: "private key ring",
            detail: e.to_string(),
        }
    })?;
    Ok(decryptor.is_scrypt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const ALICE: &str = "age1ql3z7hjy54pw3hyww5ayyfg7zqgvc7w3j2elw8zmrj2kg5sfn9aqmcac8p";

    #[test]
    fn parse_skips_comments_and_blanks() {
        let text = format!("# ring\n\n{ALICE} Alice Example <alice@example.com>\n   \n");
        let keys = parse_public_ring(&text).unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].user_id, "Alice Example <alice@example.com>");
        assert_eq!(keys[0].recipient.to_string(), ALICE);
    }

    #[test]
    fn parse_rejects_missing_user_id() {
        let err = parse_public_ring(ALICE).unwrap_err();
        assert!(err.to_string().contains("line 1: missing user id"));
    }

    #[test]
    fn parse_rejects_bad_recipient() {
        let err = parse_public_ring("age1nope Bob").unwrap_err();
        assert!(matches!(err, EngineError::Malformed { .. }));
    }

    #[test]
    fn layout_paths() {
        let layout = KeyRingLayout::default();
        let dir = Path::new("/etc/rings");
        assert_eq!(layout.public_path(dir), PathBuf::from("/etc/rings/pubring.pkr"));
        assert_eq!(layout.secret_path(dir), PathBuf::from("/etc/rings/secring.skr"));
    }

    #[test]
    fn generate_writes_matching_pair() {
        let tmp = TempDir::new().unwrap();
        let layout = KeyRingLayout::default();
        let pass = SecretString::from("correct horse".to_string());
        let options = KeyGenOptions {
            work_factor: Some(10),
            overwrite: false,
        };

        let public = generate_key_ring_pair(tmp.path(), &layout, "Ops <ops@example.com>", &pass, &options)
            .unwrap();

        let ring = fs::read_to_string(layout.public_path(tmp.path())).unwrap();
        let keys = parse_public_ring(&ring).unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].recipient.to_string(), public);

        let secret = fs::read(layout.secret_path(tmp.path())).unwrap();
        assert!(secret.starts_with(b"-----BEGIN AGE ENCRYPTED FILE-----"));
        assert!(is_passphrase_protected(&secret).unwrap());

        // refuses to clobber without overwrite
        let again = generate_key_ring_pair(tmp.path(), &layout, "Ops", &pass, &options);
        assert!(matches!(again, Err(EngineError::Io { .. })));
    }

    #[test]
    fn add_public_key_appends() {
        let tmp = TempDir::new().unwrap();
        let layout = KeyRingLayout::default();
        add_public_key(tmp.path(), &layout, ALICE, "Alice").unwrap();
        add_public_key(tmp.path(), &layout, ALICE, "Alice Again").unwrap();

        let ring = fs::read_to_string(layout.public_path(tmp.path())).unwrap();
        let keys = parse_public_ring(&ring).unwrap();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[1].user_id, "Alice Again");

        assert!(add_public_key(tmp.path(), &layout, "garbage", "X").is_err());
    }
}
