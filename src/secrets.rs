use secrecy::{ExposeSecret as _, SecretString};
use sha2::{Digest as _, Sha256};

use super::Key;

/// The two stable, installation-specific secret strings that protect the key store.
///
/// The host environment supplies these once, at construction.  They must not change over
/// the life of an installation: the key store on disk can only be reopened with the same
/// pair it was written under.  Neither secret is ever used directly as an encryption key
/// for caller data -- the primary/secondary pair is hashed into the key-store master key,
/// and the secondary alone is mixed into freshly generated key material.
#[derive(Clone, Debug)]
pub struct InstallationSecrets {
	primary: SecretString,
	secondary: SecretString,
}

impl InstallationSecrets {
	pub fn new(primary: impl Into<String>, secondary: impl Into<String>) -> Self {
		Self {
			primary: SecretString::from(primary.into()),
			secondary: SecretString::from(secondary.into()),
		}
	}

	/// The master key protecting the key store at rest: `SHA-256(primary || secondary)`,
	/// used as 32 raw bytes.
	pub(crate) fn master_key(&self) -> Key {
		let mut hasher = Sha256::new();
		hasher.update(self.primary.expose_secret().as_bytes());
		hasher.update(self.secondary.expose_secret().as_bytes());
		let key: [u8; 32] = hasher.finalize().into();

		key.into()
	}

	/// The secret mixed into newly generated key material.
	pub(crate) fn mixing_secret(&self) -> &SecretString {
		&self.secondary
	}
}
