//! Identity file handling: one JSON file per named user under the data
//! directory, created on first use with 0600 permissions.

use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use omnicast_shared::Identity;

#[derive(Debug, Serialize, Deserialize)]
struct IdentityFileV1 {
    version: u8,
    secp256k1_secret_hex: String,
    ed25519_secret_hex: String,
}

fn identity_path(user: &str) -> anyhow::Result<PathBuf> {
    let project_dirs = ProjectDirs::from("net", "omnicast", "omnicast")
        .context("could not determine data directory")?;
    let keys_dir = project_dirs.data_dir().join("identities");
    fs::create_dir_all(&keys_dir)?;
    Ok(keys_dir.join(format!("{user}.json")))
}

pub fn load_or_create(user: &str) -> anyhow::Result<Identity> {
    let path = identity_path(user)?;

    if path.exists() {
        let raw = fs::read_to_string(&path)?;
        let parsed: IdentityFileV1 =
            serde_json::from_str(&raw).context("invalid identity file")?;
        if parsed.version != 1 {
            bail!("unsupported identity file version: {}", parsed.version);
        }

        let secp = decode_secret(&parsed.secp256k1_secret_hex)?;
        let ed = decode_secret(&parsed.ed25519_secret_hex)?;
        return Identity::from_secret_bytes(&secp, &ed).context("invalid stored keys");
    }

    let identity = Identity::generate();
    let file = IdentityFileV1 {
        version: 1,
        secp256k1_secret_hex: hex::encode(identity.secp256k1_secret_bytes()),
        ed25519_secret_hex: hex::encode(identity.ed25519_secret_bytes()),
    };
    fs::write(&path, serde_json::to_string_pretty(&file)?)?;

    // Best-effort file permissions (0600)
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = fs::set_permissions(&path, fs::Permissions::from_mode(0o600));
    }

    tracing::info!(user, path = %path.display(), "created new identity");
    Ok(identity)
}

fn decode_secret(value: &str) -> anyhow::Result<[u8; 32]> {
    let bytes = hex::decode(value).context("invalid hex in identity file")?;
    if bytes.len() != 32 {
        bail!("stored key has wrong length: {}", bytes.len());
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Ok(out)
}
