use rand::RngCore as _;
use secrecy::{ExposeSecret as _, SecretString};
use sha2::{Digest as _, Sha256};
use zeroize::Zeroize as _;

/// A 256-bit symmetric key used by the [`Encryptor`](super::Encryptor) for encrypting or
/// decrypting data.
#[derive(Debug)]
pub struct Key(secrecy::SecretBox<[u8; 32]>);

impl Key {
	pub fn expose_secret(&self) -> &[u8; 32] {
		self.0.expose_secret()
	}
}

impl Clone for Key {
	fn clone(&self) -> Self {
		Self(Box::new(*self.expose_secret()).into())
	}
}

impl From<Box<[u8; 32]>> for Key {
	fn from(k: Box<[u8; 32]>) -> Self {
		Key(k.into())
	}
}

impl From<[u8; 32]> for Key {
	fn from(k: [u8; 32]) -> Self {
		Box::new(k).into()
	}
}

/// Create a fresh key for a context.
///
/// The key is built from 32 bytes of CSPRNG output, mixed with an installation-specific
/// secret through SHA-256.  The mixing step ties key material to the installation and
/// smooths the output distribution; it is *not* a substitute for the randomness source.
#[tracing::instrument(level = "debug", skip(mixing_secret))]
pub(crate) fn generate_key(mixing_secret: &SecretString) -> Key {
	let mut random = [0u8; 32];

	rand::rng().fill_bytes(&mut random);

	let mut hasher = Sha256::new();
	hasher.update(random);
	hasher.update(mixing_secret.expose_secret().as_bytes());
	let key: [u8; 32] = hasher.finalize().into();

	random.zeroize();

	key.into()
}
