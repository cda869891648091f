use std::collections::HashMap;

use aes::Aes256;
use aes::cipher::{
	BlockDecryptMut as _, BlockEncryptMut as _, KeyIvInit as _, block_padding::Pkcs7,
};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use rand::RngCore as _;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::{Error, Key};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// CBC IV (and block) size for the sealed key-store blob.
const STORE_IV_LEN: usize = 16;

/// One key generation for one context.
#[derive(Clone, Debug)]
pub(crate) struct KeyRecord {
	pub(crate) key: Key,
	pub(crate) created: u64,
	pub(crate) rotated: Option<u64>,
	pub(crate) version: u32,
}

/// The append-only history of a context's keys, newest first.  Never empty: a chain
/// comes into being with its version-1 record and only ever grows at the head.
#[derive(Clone, Debug)]
pub(crate) struct KeyChain {
	records: Vec<KeyRecord>,
}

impl KeyChain {
	pub(crate) fn first(record: KeyRecord) -> Self {
		Self {
			records: vec![record],
		}
	}

	pub(crate) fn current(&self) -> &KeyRecord {
		&self.records[0]
	}

	pub(crate) fn push(&mut self, record: KeyRecord) {
		self.records.insert(0, record);
	}

	pub(crate) fn find_version(&self, version: u32) -> Option<&KeyRecord> {
		self.records.iter().find(|r| r.version == version)
	}
}

/// The JSON shape of one node in a persisted chain.  `previous` nests the entire prior
/// history; a version-1 node carries no `previous` member at all.
#[derive(Deserialize, Serialize)]
struct StoredKeyNode {
	key: String,
	created: u64,
	rotated: Option<u64>,
	version: u32,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	previous: Option<Box<StoredKeyNode>>,
}

fn chain_to_node(chain: &KeyChain) -> StoredKeyNode {
	let mut node: Option<Box<StoredKeyNode>> = None;

	for record in chain.records.iter().rev() {
		node = Some(Box::new(StoredKeyNode {
			key: BASE64.encode(record.key.expose_secret()),
			created: record.created,
			rotated: record.rotated,
			version: record.version,
			previous: node,
		}));
	}

	// A KeyChain is never empty, so the fold above always produced a head node
	*node.expect("serialized an empty key chain")
}

fn node_to_chain(node: StoredKeyNode) -> Option<KeyChain> {
	let mut records = Vec::new();
	let mut next = Some(Box::new(node));

	while let Some(n) = next {
		let raw = Zeroizing::new(BASE64.decode(&n.key).ok()?);
		let key: [u8; 32] = raw.as_slice().try_into().ok()?;

		records.push(KeyRecord {
			key: key.into(),
			created: n.created,
			rotated: n.rotated,
			version: n.version,
		});

		next = n.previous;
	}

	Some(KeyChain { records })
}

/// Serialize every chain and seal the result for storage:
/// `base64(IV(16) || AES-256-CBC(JSON))`, keyed by the installation master key.
pub(crate) fn seal(chains: &HashMap<String, KeyChain>, master: &Key) -> Result<String, Error> {
	let nodes: HashMap<&str, StoredKeyNode> = chains
		.iter()
		.map(|(context, chain)| (context.as_str(), chain_to_node(chain)))
		.collect();

	let json =
		Zeroizing::new(serde_json::to_vec(&nodes).map_err(|e| Error::storage(e.to_string()))?);

	let mut iv = [0u8; STORE_IV_LEN];
	rand::rng().fill_bytes(&mut iv);

	let ciphertext = Aes256CbcEnc::new(master.expose_secret().into(), (&iv).into())
		.encrypt_padded_vec_mut::<Pkcs7>(&json);

	let mut raw = Vec::with_capacity(STORE_IV_LEN + ciphertext.len());
	raw.extend_from_slice(&iv);
	raw.extend_from_slice(&ciphertext);

	Ok(BASE64.encode(raw))
}

/// Open a previously sealed blob.  Any failure -- bad base64, wrong master key, mangled
/// JSON, impossible key material -- yields `None`; the caller treats that as an empty
/// store rather than an error.
pub(crate) fn open(blob: &str, master: &Key) -> Option<HashMap<String, KeyChain>> {
	let raw = BASE64.decode(blob).ok()?;

	if raw.len() < STORE_IV_LEN {
		return None;
	}

	let (iv, ciphertext) = raw.split_at(STORE_IV_LEN);

	if ciphertext.is_empty() || ciphertext.len() % STORE_IV_LEN != 0 {
		return None;
	}

	let json = Zeroizing::new(
		Aes256CbcDec::new_from_slices(master.expose_secret(), iv)
			.ok()?
			.decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
			.ok()?,
	);

	let nodes: HashMap<String, StoredKeyNode> = serde_json::from_slice(&json).ok()?;

	let mut chains = HashMap::with_capacity(nodes.len());

	for (context, node) in nodes {
		chains.insert(context, node_to_chain(node)?);
	}

	Some(chains)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn record(version: u32, created: u64) -> KeyRecord {
		KeyRecord {
			key: [version as u8; 32].into(),
			created,
			rotated: (version > 1).then_some(created),
			version,
		}
	}

	fn master() -> Key {
		[42u8; 32].into()
	}

	#[test]
	fn find_version_walks_the_chain() {
		let mut chain = KeyChain::first(record(1, 100));
		chain.push(record(2, 200));
		chain.push(record(3, 300));

		assert_eq!(3, chain.current().version);
		assert_eq!([1u8; 32], *chain.find_version(1).unwrap().key.expose_secret());
		assert_eq!([2u8; 32], *chain.find_version(2).unwrap().key.expose_secret());
		assert_eq!([3u8; 32], *chain.find_version(3).unwrap().key.expose_secret());
		assert!(chain.find_version(4).is_none());
	}

	#[test]
	fn seal_open_round_trip() {
		let mut chain = KeyChain::first(record(1, 100));
		chain.push(record(2, 200));

		let mut chains = HashMap::new();
		chains.insert("default".to_string(), KeyChain::first(record(1, 50)));
		chains.insert("api_keys".to_string(), chain);

		let blob = seal(&chains, &master()).unwrap();
		let reopened = open(&blob, &master()).unwrap();

		assert_eq!(2, reopened.len());
		assert_eq!(1, reopened["default"].current().version);

		let api_keys = &reopened["api_keys"];
		assert_eq!(2, api_keys.current().version);
		assert_eq!(Some(200), api_keys.current().rotated);
		assert_eq!(
			[1u8; 32],
			*api_keys.find_version(1).unwrap().key.expose_secret()
		);
	}

	#[test]
	fn wrong_master_key_fails_closed() {
		let mut chains = HashMap::new();
		chains.insert("default".to_string(), KeyChain::first(record(1, 100)));

		let blob = seal(&chains, &master()).unwrap();

		assert!(open(&blob, &[7u8; 32].into()).is_none());
	}

	#[test]
	fn garbage_blobs_fail_closed() {
		assert!(open("", &master()).is_none());
		assert!(open("not base64 at all!", &master()).is_none());
		assert!(open(&BASE64.encode([0u8; 8]), &master()).is_none());
		assert!(open(&BASE64.encode([0u8; 21]), &master()).is_none());
	}

	#[test]
	fn sealed_blobs_are_salted() {
		let mut chains = HashMap::new();
		chains.insert("default".to_string(), KeyChain::first(record(1, 100)));

		// Fresh IV per seal, so identical contents never produce identical blobs
		assert_ne!(
			seal(&chains, &master()).unwrap(),
			seal(&chains, &master()).unwrap()
		);
	}

	#[test]
	fn stored_node_shape() {
		let mut chain = KeyChain::first(record(1, 100));
		chain.push(record(2, 200));

		let node = serde_json::to_value(chain_to_node(&chain)).unwrap();

		assert_eq!(2, node["version"]);
		assert_eq!(200, node["rotated"]);
		assert_eq!(1, node["previous"]["version"]);
		// Version-1 nodes predate any rotation: rotated is null and there is no
		// previous member at all
		assert!(node["previous"]["rotated"].is_null());
		assert!(node["previous"].get("previous").is_none());
	}
}
