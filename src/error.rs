#[derive(Debug, thiserror::Error, thiserror_ext::Construct)]
#[non_exhaustive]
pub enum Error {
	// Envelope validation failures, in the order decrypt() checks for them.
	// Messages deliberately never echo the offending input.
	#[error("empty encrypted data provided")]
	EmptyCiphertext,

	#[error("encrypted data too short to be valid")]
	CiphertextTooShort,

	#[error("unsupported encryption version: v{0}")]
	UnsupportedVersion(u32),

	#[error("invalid encryption format: missing version prefix")]
	MissingVersionPrefix,

	#[error("invalid base64 characters detected")]
	InvalidBase64Characters,

	#[error("invalid base64 encoding")]
	InvalidBase64,

	#[error("decoded data too short to contain valid components")]
	TruncatedPayload,

	#[error("authentication tag verification failed: data may be tampered")]
	Tampered,

	#[error("failed to decrypt ciphertext: {0}")]
	Decryption(String),

	#[error("failed to encrypt plaintext: {0}")]
	Encryption(String),

	#[error("invalid key: {0}")]
	InvalidKey(String),

	#[error("failed to encode data as JSON: {cause}")]
	Serialization { cause: serde_json::Error },

	#[error("decrypted data is not valid JSON")]
	NotJson,

	#[error("failed to decode decrypted JSON data: {cause}")]
	Deserialization { cause: serde_json::Error },

	#[error("token length must be between 1 and 1024, got {0}")]
	TokenLength(usize),

	#[error("randomness source failed")]
	Randomness,

	#[error("key store persistence failed: {0}")]
	Storage(String),
}
