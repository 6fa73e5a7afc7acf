use std::path::Path;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use ed25519_dalek::SigningKey;
use rand_core::OsRng;

/// Load the client's Ed25519 identity from `private_path`/`public_path`,
/// generating and persisting a fresh pair if the private key file is
/// missing. The private key file is restricted to owner-only permissions
/// on Unix.
pub fn load_or_generate(private_path: &Path, public_path: &Path) -> Result<SigningKey> {
    if let Ok(bytes) = std::fs::read(private_path) {
        let seed: [u8; 32] = bytes
            .try_into()
            .map_err(|_| anyhow::anyhow!("private key file {} is not 32 bytes", private_path.display()))?;
        return Ok(SigningKey::from_bytes(&seed));
    }

    let signing_key = SigningKey::generate(&mut OsRng);
    write_key_file(private_path, signing_key.to_bytes().as_ref())
        .with_context(|| format!("writing private key to {}", private_path.display()))?;
    write_key_file(public_path, signing_key.verifying_key().as_bytes())
        .with_context(|| format!("writing public key to {}", public_path.display()))?;
    Ok(signing_key)
}

fn write_key_file(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)?;
        std::io::Write::write_all(&mut file, bytes)?;
    }
    #[cfg(not(unix))]
    {
        std::fs::write(path, bytes)?;
    }
    Ok(())
}

pub fn public_key_b64(signing_key: &SigningKey) -> String {
    B64.encode(signing_key.verifying_key().as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_and_reloads_same_key() {
        let dir = tempfile::tempdir().unwrap();
        let private_path = dir.path().join("id_ed25519");
        let public_path = dir.path().join("id_ed25519.pub");

        let first = load_or_generate(&private_path, &public_path).unwrap();
        let second = load_or_generate(&private_path, &public_path).unwrap();
        assert_eq!(first.to_bytes(), second.to_bytes());
    }

    #[cfg(unix)]
    #[test]
    fn private_key_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let private_path = dir.path().join("id_ed25519");
        let public_path = dir.path().join("id_ed25519.pub");
        load_or_generate(&private_path, &public_path).unwrap();

        let mode = std::fs::metadata(&private_path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
