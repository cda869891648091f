use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};

use super::Error;

/// AES-256-GCM nonce size.
pub(crate) const IV_LEN: usize = 12;

/// AES-256-GCM authentication tag size.
pub(crate) const TAG_LEN: usize = 16;

/// Every envelope this crate produces starts with this; the digit is bumped if the
/// algorithm or layout ever changes.
pub(crate) const VERSION_PREFIX: &str = "v1:";

/// The shortest string that could possibly be a valid envelope: the version prefix plus
/// the base64 expansion of an IV, a tag, and at least one byte of ciphertext.
const MIN_ENVELOPE_LEN: usize = VERSION_PREFIX.len() + (IV_LEN + TAG_LEN + 1).div_ceil(3) * 4;

/// The parsed form of a `v1:<base64>` envelope string, where the base64 payload decodes
/// to `IV || tag || ciphertext` at fixed offsets.
///
/// Parsing validates everything that can be validated *without* key material, each
/// failure with its own error, so that garbage input never reaches the cipher.
#[derive(Clone, Debug)]
pub(crate) struct Envelope {
	pub(crate) iv: [u8; IV_LEN],
	pub(crate) tag: [u8; TAG_LEN],
	pub(crate) ciphertext: Vec<u8>,
}

impl Envelope {
	pub(crate) fn new(iv: [u8; IV_LEN], tag: [u8; TAG_LEN], ciphertext: Vec<u8>) -> Self {
		Self {
			iv,
			tag,
			ciphertext,
		}
	}

	pub(crate) fn encode(&self) -> String {
		let mut raw = Vec::with_capacity(IV_LEN + TAG_LEN + self.ciphertext.len());

		raw.extend_from_slice(&self.iv);
		raw.extend_from_slice(&self.tag);
		raw.extend_from_slice(&self.ciphertext);

		format!("{VERSION_PREFIX}{}", BASE64.encode(raw))
	}
}

impl TryFrom<&str> for Envelope {
	type Error = Error;

	fn try_from(s: &str) -> Result<Self, Self::Error> {
		if s.is_empty() {
			return Err(Error::EmptyCiphertext);
		}

		if s.len() < MIN_ENVELOPE_LEN {
			return Err(Error::CiphertextTooShort);
		}

		if !s.starts_with(VERSION_PREFIX) {
			// A well-formed prefix with a different number is data from a future
			// version of this crate; anything else was never an envelope.
			if let Some(version) = version_prefix(s) {
				return Err(Error::UnsupportedVersion(version));
			}
			return Err(Error::MissingVersionPrefix);
		}

		let encoded = &s[VERSION_PREFIX.len()..];

		if !plausible_base64(encoded) {
			return Err(Error::InvalidBase64Characters);
		}

		let raw = BASE64.decode(encoded).map_err(|_| Error::InvalidBase64)?;

		if raw.len() < IV_LEN + TAG_LEN + 1 {
			return Err(Error::TruncatedPayload);
		}

		let mut iv = [0u8; IV_LEN];
		iv.copy_from_slice(&raw[..IV_LEN]);

		let mut tag = [0u8; TAG_LEN];
		tag.copy_from_slice(&raw[IV_LEN..IV_LEN + TAG_LEN]);

		Ok(Self {
			iv,
			tag,
			ciphertext: raw[IV_LEN + TAG_LEN..].to_vec(),
		})
	}
}

/// Parse a `v<digits>:` prefix into its version number.
fn version_prefix(s: &str) -> Option<u32> {
	let rest = s.strip_prefix('v')?;
	let digits = &rest[..rest.find(':')?];

	if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
		return None;
	}

	digits.parse().ok()
}

/// The same shape the strict decoder enforces, checked up front so that character junk is
/// reported separately from structural junk: a body of `[A-Za-z0-9+/]`, then at most two
/// trailing `=` padding characters.
fn plausible_base64(s: &str) -> bool {
	let bytes = s.as_bytes();
	let padding = bytes.iter().rev().take(2).take_while(|&&b| b == b'=').count();
	let body = &bytes[..bytes.len() - padding];

	body.iter().all(|&b| b.is_ascii_alphanumeric() || b == b'+' || b == b'/')
}

#[cfg(test)]
mod tests {
	use super::*;

	fn envelope() -> Envelope {
		Envelope::new([1; IV_LEN], [2; TAG_LEN], vec![3, 4, 5])
	}

	#[test]
	fn round_trip() {
		let parsed = Envelope::try_from(envelope().encode().as_str()).unwrap();

		assert_eq!([1; IV_LEN], parsed.iv);
		assert_eq!([2; TAG_LEN], parsed.tag);
		assert_eq!(vec![3, 4, 5], parsed.ciphertext);
	}

	#[test]
	fn empty_input() {
		assert!(matches!(Envelope::try_from(""), Err(Error::EmptyCiphertext)));
	}

	#[test]
	fn short_input() {
		// Short garbage is reported as too-short before anything looks at its shape
		assert!(matches!(Envelope::try_from("garbage"), Err(Error::CiphertextTooShort)));
		assert!(matches!(Envelope::try_from("v1:AAAA"), Err(Error::CiphertextTooShort)));
	}

	#[test]
	fn minimum_length_is_exact() {
		// One ciphertext byte produces the smallest legal envelope
		let smallest = Envelope::new([0; IV_LEN], [0; TAG_LEN], vec![0]).encode();

		assert_eq!(MIN_ENVELOPE_LEN, smallest.len());
		assert!(Envelope::try_from(smallest.as_str()).is_ok());
	}

	#[test]
	fn unsupported_version() {
		let body = "A".repeat(48);

		let Err(Error::UnsupportedVersion(2)) = Envelope::try_from(format!("v2:{body}").as_str())
		else {
			panic!("expected UnsupportedVersion(2)");
		};

		let Err(Error::UnsupportedVersion(999)) =
			Envelope::try_from(format!("v999:{body}").as_str())
		else {
			panic!("expected UnsupportedVersion(999)");
		};
	}

	#[test]
	fn missing_version_prefix() {
		let body = "A".repeat(48);

		assert!(matches!(
			Envelope::try_from(body.as_str()),
			Err(Error::MissingVersionPrefix)
		));
		assert!(matches!(
			Envelope::try_from(format!("vv:{body}").as_str()),
			Err(Error::MissingVersionPrefix)
		));
	}

	#[test]
	fn bad_base64_characters() {
		let body = format!("{}!!", "A".repeat(46));

		assert!(matches!(
			Envelope::try_from(format!("v1:{body}").as_str()),
			Err(Error::InvalidBase64Characters)
		));

		// Padding in the middle is a character-level failure too
		let body = format!("{}=={}", "A".repeat(24), "A".repeat(24));

		assert!(matches!(
			Envelope::try_from(format!("v1:{body}").as_str()),
			Err(Error::InvalidBase64Characters)
		));
	}

	#[test]
	fn bad_base64_structure() {
		// Right characters, wrong length for a base64 quantum
		let body = "A".repeat(49);

		assert!(matches!(
			Envelope::try_from(format!("v1:{body}").as_str()),
			Err(Error::InvalidBase64)
		));
	}

	#[test]
	fn truncated_payload() {
		// Valid base64 of exactly IV + tag, with no ciphertext byte, padded out to pass
		// the string-length check
		let raw = [0u8; IV_LEN + TAG_LEN];
		let encoded = format!("v1:{}", BASE64.encode(raw));

		assert!(matches!(
			Envelope::try_from(encoded.as_str()),
			Err(Error::TruncatedPayload)
		));
	}
}
