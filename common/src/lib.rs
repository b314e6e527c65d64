use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// The number of cross-chain messages consumed by every block. Blocks with
/// fewer messages are padded with [`Fr::ZERO`].
pub const NUMBER_OF_L1_L2_MESSAGES_PER_ROLLUP: usize = 16;

/// The number of messages consumed by a single base parity circuit.
pub const NUM_MSGS_PER_BASE_PARITY: usize = 4;

/// The number of base parity proofs feeding the root parity circuit.
pub const NUM_BASE_PARITY_PER_ROOT_PARITY: usize = 4;

/// Height of the message subtree inserted per block.
pub const L1_TO_L2_MSG_SUBTREE_HEIGHT: usize = 4;

pub const MAX_NEW_NOTE_HASHES_PER_TX: usize = 4;
pub const MAX_NEW_NULLIFIERS_PER_TX: usize = 4;
pub const MAX_PUBLIC_DATA_UPDATE_REQUESTS_PER_TX: usize = 4;
pub const MAX_NEW_L2_TO_L1_MSGS_PER_TX: usize = 2;

static_assertions::const_assert_eq!(
    NUM_MSGS_PER_BASE_PARITY * NUM_BASE_PARITY_PER_ROOT_PARITY,
    NUMBER_OF_L1_L2_MESSAGES_PER_ROLLUP
);
static_assertions::const_assert_eq!(
    1 << L1_TO_L2_MSG_SUBTREE_HEIGHT,
    NUMBER_OF_L1_L2_MESSAGES_PER_ROLLUP
);

/// A 32-byte field element, serialized as a `0x`-prefixed hex string.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fr(#[serde(with = "crate::hex")] pub [u8; 32]);

impl Fr {
    pub const ZERO: Fr = Fr([0; 32]);

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Hashes two elements together, left first.
    pub fn hash_pair(left: &Fr, right: &Fr) -> Fr {
        sha256([left.as_bytes().as_slice(), right.as_bytes().as_slice()])
    }
}

impl From<u64> for Fr {
    fn from(value: u64) -> Self {
        let mut bytes = [0u8; 32];
        bytes[24..].copy_from_slice(&value.to_be_bytes());
        Fr(bytes)
    }
}

impl fmt::Debug for Fr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", ::hex::encode(self.0))
    }
}

impl fmt::Display for Fr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// SHA-256 over the concatenation of `chunks`.
pub fn sha256<'a>(chunks: impl IntoIterator<Item = &'a [u8]>) -> Fr {
    let mut hasher = Sha256::new();
    for chunk in chunks {
        hasher.update(chunk);
    }
    Fr(hasher.finalize().into())
}

/// Computes the SHA-256 Merkle root of a power-of-two number of leaves.
///
/// # Panics
///
/// Panics if `leaves` is empty or its length is not a power of two.
pub fn sha256_merkle_root(leaves: &[Fr]) -> Fr {
    assert!(
        leaves.len().is_power_of_two(),
        "merkle leaves must be a non-empty power of two, got {}",
        leaves.len()
    );
    let mut layer = leaves.to_vec();
    while layer.len() > 1 {
        layer = layer
            .chunks_exact(2)
            .map(|pair| Fr::hash_pair(&pair[0], &pair[1]))
            .collect();
    }
    layer[0]
}

/// Like `#[serde(with = "::hex")]`, but tolerates and emits leading `0x`
/// prefixes
pub mod hex {
    use serde::{de::Error as _, Deserialize as _, Deserializer, Serializer};

    pub fn serialize<S: Serializer, T>(data: T, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: ::hex::ToHex,
    {
        let s = data.encode_hex::<String>();
        serializer.serialize_str(&format!("0x{}", s))
    }

    pub fn deserialize<'de, D: Deserializer<'de>, T>(deserializer: D) -> Result<T, D::Error>
    where
        T: ::hex::FromHex,
        T::Error: std::fmt::Display,
    {
        let s = String::deserialize(deserializer)?;
        match s.strip_prefix("0x") {
            Some(rest) => T::from_hex(rest),
            None => T::from_hex(&*s),
        }
        .map_err(D::Error::custom)
    }
}

#[test]
fn test_fr_hex_serde_accepts_unprefixed() {
    let fr = Fr::from(0xdead_beef);
    let json = serde_json::to_string(&fr).unwrap();
    assert_eq!(
        json,
        "\"0x00000000000000000000000000000000000000000000000000000000deadbeef\""
    );
    let unprefixed = json.replacen("0x", "", 1);
    assert_eq!(serde_json::from_str::<Fr>(&unprefixed).unwrap(), fr);
}

#[test]
fn test_merkle_root_of_pair_is_hash_pair() {
    let (a, b) = (Fr::from(1), Fr::from(2));
    assert_eq!(sha256_merkle_root(&[a, b]), Fr::hash_pair(&a, &b));
    assert_ne!(Fr::hash_pair(&a, &b), Fr::hash_pair(&b, &a));
}

#[test]
#[should_panic = "merkle leaves must be a non-empty power of two"]
fn test_merkle_root_rejects_uneven_leaves() {
    sha256_merkle_root(&[Fr::ZERO; 3]);
}
