use parking_lot::Mutex;

use super::Error;

/// Durable storage for the serialized key store.
///
/// All key chains for all contexts persist as a single opaque string; where that string
/// lives (a database row, a file, a host framework's options table) is the embedder's
/// business.  [`KeyManager`](super::KeyManager) reads it once at construction and
/// rewrites it on every key generation or rotation.
pub trait KeyStorage: Send + Sync {
	/// Fetch the previously stored blob, or `None` if nothing has been stored yet.
	fn load(&self) -> Result<Option<String>, Error>;

	/// Durably replace the stored blob.
	fn store(&self, blob: &str) -> Result<(), Error>;
}

/// A [`KeyStorage`] that keeps the blob in memory, so keys live exactly as long as the
/// process.  Useful in tests, and in hosts that deliberately want ephemeral keys.
#[derive(Debug, Default)]
pub struct MemoryKeyStorage {
	blob: Mutex<Option<String>>,
}

impl KeyStorage for MemoryKeyStorage {
	fn load(&self) -> Result<Option<String>, Error> {
		Ok(self.blob.lock().clone())
	}

	fn store(&self, blob: &str) -> Result<(), Error> {
		*self.blob.lock() = Some(blob.to_owned());
		Ok(())
	}
}
