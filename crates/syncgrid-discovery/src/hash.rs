//! Storage version hashes.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use sha2::{Digest, Sha256};

/// Hash identifying the backing store of `(group, version, kind)` in
/// `workspace`: base64 of the first 8 bytes of
/// `sha256("<workspace>/<group>/<version>/<kind>")`.
pub fn storage_version_hash(workspace: &str, group: &str, version: &str, kind: &str) -> String {
    let digest = Sha256::digest(format!("{workspace}/{group}/{version}/{kind}").as_bytes());
    STANDARD.encode(&digest[..8])
}
