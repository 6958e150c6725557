use std::fmt;

use sha2::{Digest, Sha256};

/// SHA-256 over the ordered `(u64 big-endian length, bytes)` pairs of a payload set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PayloadDigest([u8; 32]);

impl PayloadDigest {
    pub fn to_hex(&self) -> String {
        let mut hex = String::with_capacity(64);
        for byte in self.0.iter() {
            use std::fmt::Write;
            let _ = write!(&mut hex, "{byte:02x}");
        }
        hex
    }
}

impl fmt::Display for PayloadDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Digest a payload sequence in order. The length prefix keeps `["ab", "c"]`
/// and `["a", "bc"]` distinct.
pub fn digest_payloads<I, P>(payloads: I) -> PayloadDigest
where
    I: IntoIterator<Item = P>,
    P: AsRef<[u8]>,
{
    let mut hasher = Sha256::new();
    for payload in payloads {
        let payload = payload.as_ref();
        hasher.update((payload.len() as u64).to_be_bytes());
        hasher.update(payload);
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    PayloadDigest(out)
}
