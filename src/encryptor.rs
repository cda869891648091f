use aes_gcm::aead::{Aead as _, Payload};
use aes_gcm::{Aes256Gcm, KeyInit as _, Nonce};
use hmac::{Hmac, Mac as _};
use rand::{RngCore as _, TryRngCore as _, rngs::OsRng};
use serde::{Serialize, de::DeserializeOwned};
use sha2::Sha256;

use super::envelope::{Envelope, IV_LEN, TAG_LEN};
use super::{Error, Key, KeyManager};

type HmacSha256 = Hmac<Sha256>;

/// Keys for [`Encryptor::hash`] live in a context of their own, so a hashing key can
/// never double as an encryption key.
const HASHING_CONTEXT: &str = "hashing";

/// Longest token [`Encryptor::generate_token`] will produce, in bytes.
const TOKEN_MAX_LEN: usize = 1024;

/// Authenticated encryption for anything the host needs to keep secret at rest --
/// API keys, tokens, personal data.
///
/// Every operation is scoped to a *context*, a caller-chosen namespace string.  The
/// context selects which key (managed by [`KeyManager`]) seals the data, *and* rides
/// along as additional authenticated data, so an envelope lifted from one context will
/// not open under another -- an attacker with write access to storage can't make one
/// subsystem's ciphertext impersonate another's.
///
/// Envelopes are self-describing strings, `v1:` followed by the base64 of
/// `IV || tag || ciphertext`, safe to drop into any text-shaped storage.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use latchkey::{Encryptor, InstallationSecrets, KeyManager, MemoryKeyStorage, NoopScheduler};
///
/// # fn main() -> Result<(), latchkey::Error> {
/// let keys = KeyManager::new(
///     Arc::new(MemoryKeyStorage::default()),
///     Arc::new(NoopScheduler),
///     InstallationSecrets::new("first install secret", "second install secret"),
/// )?;
/// let encryptor = Encryptor::new(keys);
///
/// let envelope = encryptor.encrypt("secret-api-key-123", "api_keys")?;
/// assert!(envelope.starts_with("v1:"));
///
/// assert_eq!(
///     b"secret-api-key-123".to_vec(),
///     encryptor.decrypt(&envelope, "api_keys")?
/// );
///
/// // The context is authenticated: the same envelope refuses to open anywhere else
/// assert!(encryptor.decrypt(&envelope, "user_data").is_err());
/// # Ok(())
/// # }
/// ```
pub struct Encryptor {
	keys: KeyManager,
}

impl std::fmt::Debug for Encryptor {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Encryptor").field("keys", &self.keys).finish()
	}
}

impl Encryptor {
	pub fn new(keys: KeyManager) -> Self {
		Self { keys }
	}

	/// The key manager behind this encryptor, for hosts that need direct access to key
	/// lifecycle operations.
	pub fn key_manager(&self) -> &KeyManager {
		&self.keys
	}

	/// Encrypt `plaintext` under `context`'s current key.
	///
	/// Any byte string goes, including an empty one.  A fresh random IV makes every
	/// envelope unique, identical plaintexts included.
	///
	/// # Errors
	///
	/// Will return [`Error::Storage`] if fetching the key forced a generation or
	/// rotation that could not be persisted, or [`Error::Encryption`] in the (extremely
	/// unlikely) event the cipher itself refuses.  Failures are logged with the context
	/// name only -- never the plaintext.
	#[tracing::instrument(level = "debug", skip(self, plaintext))]
	pub fn encrypt(&self, plaintext: impl AsRef<[u8]>, context: &str) -> Result<String, Error> {
		self.encrypt_inner(plaintext.as_ref(), context)
			.inspect_err(|e| tracing::error!(context, error = %e, "encryption failed"))
	}

	fn encrypt_inner(&self, plaintext: &[u8], context: &str) -> Result<String, Error> {
		let key = self.keys.get_key(context)?;

		let cipher = Aes256Gcm::new_from_slice(key.expose_secret())
			.map_err(|e| Error::invalid_key(e.to_string()))?;

		let mut iv = [0u8; IV_LEN];
		rand::rng().fill_bytes(&mut iv);

		let mut sealed = cipher
			.encrypt(
				Nonce::from_slice(&iv),
				Payload {
					msg: plaintext,
					aad: context.as_bytes(),
				},
			)
			.map_err(|_| Error::encryption("AEAD seal failed"))?;

		// The AEAD layer hands back ciphertext || tag; the envelope wants the tag up
		// front, between IV and ciphertext
		let tag_at = sealed.len() - TAG_LEN;
		let tag: [u8; TAG_LEN] = sealed[tag_at..]
			.try_into()
			.expect("GCM produced less than a tag's worth of output");
		sealed.truncate(tag_at);

		let envelope = Envelope::new(iv, tag, sealed).encode();

		tracing::debug!(
			context,
			plaintext_length = plaintext.len(),
			envelope_length = envelope.len(),
			"data encrypted"
		);

		Ok(envelope)
	}

	/// Decrypt an envelope produced by [`Encryptor::encrypt`] under the same context.
	///
	/// The envelope's structure is validated piecewise before any key material is
	/// touched, so each kind of mangling gets its own error.
	///
	/// # Errors
	///
	/// Will return one of the validation errors ([`Error::EmptyCiphertext`],
	/// [`Error::CiphertextTooShort`], [`Error::UnsupportedVersion`],
	/// [`Error::MissingVersionPrefix`], [`Error::InvalidBase64Characters`],
	/// [`Error::InvalidBase64`], [`Error::TruncatedPayload`]) if the envelope is
	/// malformed, or [`Error::Tampered`] if it is well-formed but fails
	/// authentication -- wrong key, wrong context, or a flipped bit anywhere.
	#[tracing::instrument(level = "debug", skip(self, encrypted))]
	pub fn decrypt(&self, encrypted: &str, context: &str) -> Result<Vec<u8>, Error> {
		self.decrypt_inner(encrypted, context)
			.inspect_err(|e| tracing::error!(context, error = %e, "decryption failed"))
	}

	fn decrypt_inner(&self, encrypted: &str, context: &str) -> Result<Vec<u8>, Error> {
		let envelope = Envelope::try_from(encrypted)?;
		let key = self.keys.get_key(context)?;

		match self.open(&envelope, &key, context) {
			Ok(plaintext) => Ok(plaintext),
			Err(error) => {
				// The current key didn't authenticate this envelope: either it was
				// sealed under a since-rotated key, or somebody has been at it
				if let Some(version) = key_version_hint(&envelope) {
					if let Some(old_key) = self.keys.get_key_by_version(context, version) {
						if let Ok(plaintext) = self.open(&envelope, &old_key, context) {
							return Ok(plaintext);
						}
					}
				}

				Err(error)
			}
		}
	}

	fn open(&self, envelope: &Envelope, key: &Key, context: &str) -> Result<Vec<u8>, Error> {
		let cipher = Aes256Gcm::new_from_slice(key.expose_secret())
			.map_err(|e| Error::invalid_key(e.to_string()))?;

		// The AEAD layer wants the tag back on the tail of the ciphertext
		let mut sealed = Vec::with_capacity(envelope.ciphertext.len() + TAG_LEN);
		sealed.extend_from_slice(&envelope.ciphertext);
		sealed.extend_from_slice(&envelope.tag);

		// Once the key is in, GCM has exactly one way to fail: tag verification
		cipher
			.decrypt(
				Nonce::from_slice(&envelope.iv),
				Payload {
					msg: &sealed,
					aad: context.as_bytes(),
				},
			)
			.map_err(|_| Error::Tampered)
	}

	/// Serialize `data` as JSON and encrypt the result.
	///
	/// # Errors
	///
	/// Will return [`Error::Serialization`] if `data` won't serialize, plus anything
	/// [`Encryptor::encrypt`] can return.
	pub fn encrypt_data<T: Serialize + ?Sized>(
		&self,
		data: &T,
		context: &str,
	) -> Result<String, Error> {
		let json = serde_json::to_vec(data).map_err(|cause| Error::Serialization { cause })?;

		self.encrypt(&json, context)
	}

	/// Decrypt an envelope produced by [`Encryptor::encrypt_data`] and deserialize the
	/// plaintext.
	///
	/// # Errors
	///
	/// Everything [`Encryptor::decrypt`] can return, plus [`Error::NotJson`] if the
	/// plaintext isn't JSON at all and [`Error::Deserialization`] if it is JSON but not
	/// the shape `T` expects.  The distinction matters when debugging: [`Error::NotJson`]
	/// after a *successful* decryption means the envelope never held JSON, not that the
	/// key was wrong.
	pub fn decrypt_data<T: DeserializeOwned>(
		&self,
		encrypted: &str,
		context: &str,
	) -> Result<T, Error> {
		let json = self.decrypt(encrypted, context)?;

		let value: serde_json::Value =
			serde_json::from_slice(&json).map_err(|_| Error::NotJson)?;

		serde_json::from_value(value).map_err(|cause| Error::Deserialization { cause })
	}

	/// A keyed one-way fingerprint of `data`: HMAC-SHA256 under the `hashing` context's
	/// key, hex-encoded.  For integrity checks and blind indexes -- not for passwords.
	///
	/// # Errors
	///
	/// Will return [`Error::Storage`] if the hashing key had to be generated or rotated
	/// and could not be persisted.
	#[tracing::instrument(level = "debug", skip_all)]
	pub fn hash(&self, data: impl AsRef<[u8]>, salt: impl AsRef<[u8]>) -> Result<String, Error> {
		let key = self.keys.get_key(HASHING_CONTEXT)?;

		let mut mac = <HmacSha256 as hmac::Mac>::new_from_slice(key.expose_secret())
			.map_err(|e| Error::invalid_key(e.to_string()))?;
		mac.update(data.as_ref());
		mac.update(salt.as_ref());

		Ok(mac
			.finalize()
			.into_bytes()
			.iter()
			.map(|b| format!("{b:02x}"))
			.collect())
	}

	/// Recompute the fingerprint of `data` and compare it against `hash` in constant
	/// time, so a mismatch reveals nothing about *where* the comparison diverged.
	///
	/// # Errors
	///
	/// As for [`Encryptor::hash`].
	#[tracing::instrument(level = "debug", skip_all)]
	pub fn verify_hash(
		&self,
		data: impl AsRef<[u8]>,
		hash: &str,
		salt: impl AsRef<[u8]>,
	) -> Result<bool, Error> {
		let computed = self.hash(data, salt)?;

		Ok(constant_time_eq::constant_time_eq(
			computed.as_bytes(),
			hash.as_bytes(),
		))
	}

	/// `length` bytes of cryptographically secure randomness, hex-encoded (so the
	/// returned string is `2 * length` characters).
	///
	/// Randomness comes from the OS entropy source, which can report failure; only if
	/// it does is the process CSPRNG used instead.
	///
	/// # Errors
	///
	/// Will return [`Error::TokenLength`] unless `1 <= length <= 1024`.  Out-of-range
	/// requests are a caller bug, refused outright rather than clamped.
	#[tracing::instrument(level = "debug", skip(self))]
	pub fn generate_token(&self, length: usize) -> Result<String, Error> {
		if !(1..=TOKEN_MAX_LEN).contains(&length) {
			return Err(Error::TokenLength(length));
		}

		let mut bytes = vec![0u8; length];

		if OsRng.try_fill_bytes(&mut bytes).is_err() {
			rand::rng().fill_bytes(&mut bytes);
		}

		Ok(bytes.iter().map(|b| format!("{b:02x}")).collect())
	}

	#[cfg(test)]
	fn timewarp(&mut self, secs: i64) {
		self.keys.timewarp(secs)
	}
}

/// Which key version sealed an envelope, if it says.
///
/// v1 envelopes carry no key-version field, so there is never a hint to extract and the
/// fallback branch in [`Encryptor::decrypt`] cannot fire: data sealed before a rotation
/// stays unreadable until the re-encryption task rewrites it.  Embedding the version in
/// the header is the job of a future envelope format.
fn key_version_hint(_envelope: &Envelope) -> Option<u32> {
	None
}
