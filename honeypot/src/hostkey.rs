use std::fs::File;
use std::path::Path;

use anyhow::Context;
use russh_keys::key::KeyPair;
use russh_keys::PublicKeyBase64;
use tracing::info;

/// Load the server host key, generating and persisting an ed25519 key on
/// first start. A key that exists but cannot be parsed is fatal.
pub fn load_or_generate(path: impl AsRef<Path>) -> anyhow::Result<KeyPair> {
    let path = path.as_ref();

    if path.exists() {
        return russh_keys::load_secret_key(path, None)
            .with_context(|| format!("failed to load host key from {}", path.display()));
    }

    info!("no host key at {}, generating one", path.display());
    let key = KeyPair::generate_ed25519().context("failed to generate ed25519 host key")?;

    let file = File::create(path)
        .with_context(|| format!("failed to create host key file {}", path.display()))?;
    russh_keys::encode_pkcs8_pem(&key, file).context("failed to encode host key")?;

    std::fs::write(
        path.with_extension("pub"),
        format!("{} {}\n", key.name(), key.public_key_base64()),
    )
    .context("failed to write public host key")?;

    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_then_reloads_the_same_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("host_key");

        let generated = load_or_generate(&path).unwrap();
        assert!(path.exists());
        assert!(path.with_extension("pub").exists());

        let reloaded = load_or_generate(&path).unwrap();
        assert_eq!(
            generated.public_key_base64(),
            reloaded.public_key_base64()
        );
    }

    #[test]
    fn unreadable_key_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("host_key");
        std::fs::write(&path, "not a key").unwrap();

        assert!(load_or_generate(&path).is_err());
    }
}
