use std::{collections::HashMap, sync::Arc, time::Duration};

use parking_lot::RwLock;

use super::key::generate_key;
use super::key_store::{self, KeyChain, KeyRecord};
use super::{Error, InstallationSecrets, Key, KeyStorage, ReencryptScheduler, ReencryptTask};

/// The context used when a caller doesn't name one.
pub const DEFAULT_CONTEXT: &str = "default";

/// How long a key stays current before [`KeyManager::get_key`] replaces it.
const ROTATION_INTERVAL: Duration = Duration::from_secs(90 * 24 * 60 * 60);

/// How long after a rotation the host should wait before re-encrypting, so the work
/// never lands on the request that happened to trip the rotation.
const REENCRYPT_DELAY: Duration = Duration::from_secs(300);

/// Owns the lifecycle of per-context symmetric keys.
///
/// Each context -- a caller-chosen namespace like `"user_data"` or `"api_keys"` -- gets
/// its own key, generated lazily on first use and replaced automatically once it has
/// been current for 90 days.  Retired keys are never discarded: every context keeps an
/// append-only chain of its key history, so data sealed under an old generation can
/// still be opened via [`KeyManager::get_key_by_version`].
///
/// The full set of chains persists through the injected [`KeyStorage`] as one blob,
/// itself encrypted under a master key derived from the two [`InstallationSecrets`].
/// A blob that is missing or won't open is treated as an empty store (logged, not
/// fatal) -- availability wins over strictness at this layer, in contrast to the strict
/// tamper checks [`Encryptor`](super::Encryptor) applies to caller data.  Failing to
/// *write* the store is always an error: the manager never hands out a key it could
/// not make durable.
///
/// The in-process cache sits behind a lock, so one process never races itself.  Two
/// *processes* rotating the same context concurrently still race on the stored blob,
/// last writer winning; the loser's chain is simply orphaned.
pub struct KeyManager {
	storage: Arc<dyn KeyStorage>,
	scheduler: Arc<dyn ReencryptScheduler>,
	secrets: InstallationSecrets,
	chains: RwLock<HashMap<String, KeyChain>>,

	// This is just a way for us to test that rotation kicks in when it should,
	// by fiddling with time in unit tests
	time: Clock,
}

impl std::fmt::Debug for KeyManager {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("KeyManager")
			.field("contexts", &self.chains.read().len())
			.finish_non_exhaustive()
	}
}

impl KeyManager {
	/// Create a manager, loading whatever key history the storage holds and making sure
	/// the [`DEFAULT_CONTEXT`] key exists.
	///
	/// # Errors
	///
	/// Will return [`Error::Storage`] if a freshly generated key cannot be persisted.
	/// An unreadable *existing* store is not an error -- see the type-level docs.
	#[tracing::instrument(level = "debug", skip_all)]
	pub fn new(
		storage: Arc<dyn KeyStorage>,
		scheduler: Arc<dyn ReencryptScheduler>,
		secrets: InstallationSecrets,
	) -> Result<Self, Error> {
		let manager = Self {
			storage,
			scheduler,
			secrets,
			chains: RwLock::new(HashMap::new()),
			time: Clock::default(),
		};

		manager.load()?;

		Ok(manager)
	}

	/// The current key for `context`, generating or rotating first if needed.
	///
	/// Rotation happens *before* the key is handed out, so once the interval elapses
	/// callers always see the fresh generation; opening data sealed under the retired
	/// key goes through [`KeyManager::get_key_by_version`] instead.
	///
	/// # Errors
	///
	/// Will return [`Error::Storage`] if a generation or rotation cannot be persisted.
	#[tracing::instrument(level = "debug", skip(self))]
	pub fn get_key(&self, context: &str) -> Result<Key, Error> {
		let mut chains = self.chains.write();

		if !chains.contains_key(context) {
			self.generate(&mut chains, context)?;
		} else if self.needs_rotation(&chains[context]) {
			self.rotate(&mut chains, context)?;
		}

		Ok(chains[context].current().key.clone())
	}

	/// A specific historical key for `context`, or `None` if the context or version is
	/// unknown.  Never rotates, never persists, never errors.
	#[tracing::instrument(level = "debug", skip(self))]
	pub fn get_key_by_version(&self, context: &str, version: u32) -> Option<Key> {
		self.chains
			.read()
			.get(context)?
			.find_version(version)
			.map(|record| record.key.clone())
	}

	fn load(&self) -> Result<(), Error> {
		let mut chains = self.chains.write();

		match self.storage.load() {
			Ok(Some(blob)) => match key_store::open(&blob, &self.secrets.master_key()) {
				Some(stored) => *chains = stored,
				None => {
					tracing::warn!("stored keys unreadable, starting with an empty key store");
				}
			},
			Ok(None) => (),
			Err(e) => {
				tracing::warn!(error = %e, "key store load failed, starting with an empty key store");
			}
		}

		if !chains.contains_key(DEFAULT_CONTEXT) {
			self.generate(&mut chains, DEFAULT_CONTEXT)?;
		}

		Ok(())
	}

	fn generate(&self, chains: &mut HashMap<String, KeyChain>, context: &str) -> Result<(), Error> {
		let record = KeyRecord {
			key: generate_key(self.secrets.mixing_secret()),
			created: self.time.now(),
			rotated: None,
			version: 1,
		};

		chains.insert(context.to_string(), KeyChain::first(record));

		self.persist(chains)?;

		tracing::info!(context, version = 1, "encryption key generated");

		Ok(())
	}

	fn rotate(&self, chains: &mut HashMap<String, KeyChain>, context: &str) -> Result<(), Error> {
		let now = self.time.now();

		let chain = chains
			.get_mut(context)
			.expect("rotating a context that has no chain");
		let version = chain.current().version + 1;

		chain.push(KeyRecord {
			key: generate_key(self.secrets.mixing_secret()),
			created: now,
			rotated: Some(now),
			version,
		});

		self.persist(chains)?;

		tracing::warn!(context, version, "encryption key rotated");

		self.scheduler.schedule(ReencryptTask {
			context: context.to_string(),
			delay: REENCRYPT_DELAY,
		});

		Ok(())
	}

	fn needs_rotation(&self, chain: &KeyChain) -> bool {
		self.time.now().saturating_sub(chain.current().created) > ROTATION_INTERVAL.as_secs()
	}

	fn persist(&self, chains: &HashMap<String, KeyChain>) -> Result<(), Error> {
		let blob = key_store::seal(chains, &self.secrets.master_key())?;

		self.storage.store(&blob)
	}

	#[cfg(test)]
	pub(crate) fn timewarp(&mut self, secs: i64) {
		self.time.timewarp(secs)
	}
}

#[cfg(not(test))]
mod real_clock {
	use std::time::{SystemTime, UNIX_EPOCH};

	#[derive(Clone, Debug, Default)]
	pub(super) struct Clock;

	impl Clock {
		pub(super) fn now(&self) -> u64 {
			SystemTime::now()
				.duration_since(UNIX_EPOCH)
				.unwrap()
				.as_secs()
		}
	}
}


#[cfg(not(test))]
use real_clock::Clock;
#[cfg(test)]
use test_clock::Clock;
