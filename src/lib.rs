//! Authenticated encryption with per-context rotating keys.
//!
//! If you need to keep secrets at rest -- API keys, tokens, personal data -- and you want
//! the boring parts (key generation, rotation, storage, tamper detection) handled for
//! you, then latchkey is for you.
//!
//! An [`Encryptor`] encrypts and decrypts data with AES-256-GCM, producing portable
//! `v1:<base64>` envelope strings that carry their own IV and authentication tag.  Every
//! operation is scoped to a *context* -- a caller-chosen namespace such as `"user_data"`
//! or `"api_keys"`.  The context selects the key *and* is authenticated along with the
//! ciphertext, so an envelope cannot be quietly replayed from one context into another.
//! [This Security StackExchange answer](https://security.stackexchange.com/a/179279/167630)
//! is an excellent explanation of why binding ciphertexts to a context is useful.
//!
//! Behind the encryptor, a [`KeyManager`] owns one key chain per context: keys are
//! created lazily on first use, replaced automatically after 90 days, and retired
//! generations are kept around (resolvable by version number) so old data stays
//! decryptable.  The whole key history persists as a single blob -- itself encrypted
//! under a master key derived from two installation-specific secrets -- through whatever
//! [`KeyStorage`] the host provides.
//!
//! Construction is plain dependency injection: give [`KeyManager::new`] a storage
//! backend, a [`ReencryptScheduler`] for the deferred re-encryption work that follows a
//! rotation (or [`NoopScheduler`] if the host has no job system), and the installation's
//! [`InstallationSecrets`].
mod encryptor;
mod envelope;
mod error;
mod key;
mod key_manager;
mod key_store;
mod scheduler;
mod secrets;
mod storage;

pub use encryptor::Encryptor;
pub use error::Error;
pub use key::Key;
pub use key_manager::{DEFAULT_CONTEXT, KeyManager};
pub use scheduler::{NoopScheduler, ReencryptScheduler, ReencryptTask};
pub use secrets::InstallationSecrets;
pub use storage::{KeyStorage, MemoryKeyStorage};
