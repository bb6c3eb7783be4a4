use sha1::{Digest, Sha1};

/// Node number for `path`.
///
/// The SHA-1 digest of the path is folded into a machine word by XOR-ing
/// byte `i` into byte `i % 8`, and the high 32 bits are cleared for callers
/// that store node numbers in 32 bits. Collisions are tolerated.
pub fn node_id(path: &str) -> u64 {
    let digest = Sha1::digest(path.as_bytes());
    let mut folded = [0u8; 8];
    for (i, byte) in digest.iter().enumerate() {
        folded[i % 8] ^= byte;
    }
    u64::from_le_bytes(folded) & 0xffff_ffff
}
