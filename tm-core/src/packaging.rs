//! Directory-token hashing and tarball creation/extraction helpers shared
//! between the TM (packages) and TDS (extracts).

use md5::{Digest, Md5};
use std::io;
use std::path::Path;
use tokio::process::Command;

/// `md5(utf8(directory))` as lowercase hex, the single URL path segment
/// used when shipping a directory's contents (Invariant ii).
pub fn directory_token(directory: &str) -> String {
    let digest = Md5::digest(directory.as_bytes());
    hex::encode(digest)
}

/// MD5 hex digest of a byte slice, used for the `HTTP_MD5SUM` header and
/// the `.md5` sidecar file.
pub fn md5_hex(bytes: &[u8]) -> String {
    let digest = Md5::digest(bytes);
    hex::encode(digest)
}

/// Create `<dest>` as an xz-compressed tar of `<source_dir>`'s
/// `<entry_name>` subdirectory, run from within `source_dir` so the
/// archive's paths are relative to `entry_name`.
pub async fn create_tar_xz(source_dir: &Path, entry_name: &str, dest: &Path) -> io::Result<()> {
    let status = Command::new("tar")
        .arg("-J")
        .arg("-cf")
        .arg(dest)
        .arg("-C")
        .arg(source_dir)
        .arg(entry_name)
        .status()
        .await?;
    if !status.success() {
        return Err(io::Error::other(format!("tar create exited with {status}")));
    }
    Ok(())
}

/// Extract `archive` in place under `dest_dir`, as invoked by the TDS after
/// a tarball upload passes its MD5 check.
pub async fn extract_tar(archive: &Path, dest_dir: &Path) -> io::Result<()> {
    let status = Command::new("tar")
        .arg("-xf")
        .arg(archive)
        .arg("-C")
        .arg(dest_dir)
        .status()
        .await?;
    if !status.success() {
        return Err(io::Error::other(format!("tar extract exited with {status}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_token_matches_known_md5() {
        assert_eq!(directory_token("/run/1"), "ea6a6baa83b6fd5a54407aa0a00a03c6");
    }

    #[test]
    fn md5_hex_is_lowercase() {
        let digest = md5_hex(b"hello");
        assert_eq!(digest, digest.to_lowercase());
        assert_eq!(digest.len(), 32);
    }
}
