use sha2::{Digest, Sha256};

/// Decimal digits in `u64::MAX`.
const MAX_NONCE_DIGITS: usize = 20;

/// Proof-of-work digest checked by the chain endpoint:
/// `sha256(prev_hash || address || decimal(nonce))`, lowercase hex.
///
/// The inputs are concatenated without separators. The remote verifier
/// recomputes exactly this byte layout, so it must not change.
pub fn pow_hash(prev_hash: &str, address: &str, nonce: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prev_hash.as_bytes());
    hasher.update(address.as_bytes());
    hasher.update(nonce.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// Hashes many nonces against the same `(prev_hash, address)` prefix.
///
/// The prefix is absorbed once and the hashing state cloned per nonce,
/// which yields the same digest as [`pow_hash`].
#[derive(Clone)]
pub struct PowHasher {
    prefix: Sha256,
}

impl PowHasher {
    pub fn new(prev_hash: &str, address: &str) -> Self {
        let mut prefix = Sha256::new();
        prefix.update(prev_hash.as_bytes());
        prefix.update(address.as_bytes());
        PowHasher { prefix }
    }

    pub fn digest(&self, nonce: u64) -> [u8; 32] {
        let mut buf = [0u8; MAX_NONCE_DIGITS];
        let mut hasher = self.prefix.clone();
        hasher.update(encode_decimal(nonce, &mut buf));
        let mut digest = [0u8; 32];
        digest.copy_from_slice(&hasher.finalize());
        digest
    }
}

fn encode_decimal(mut value: u64, buf: &mut [u8; MAX_NONCE_DIGITS]) -> &[u8] {
    let mut pos = buf.len();
    loop {
        pos -= 1;
        buf[pos] = b'0' + (value % 10) as u8;
        value /= 10;
        if value == 0 {
            break;
        }
    }
    &buf[pos..]
}
