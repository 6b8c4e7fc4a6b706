// crates/cadence-daemon/src/keys.rs
//
// Devnet producer keys.
//
// Keys live in a single file, one hex-encoded ed25519 secret per line. The
// file is created (or topped up) with freshly generated keys when it holds
// fewer keys than the devnet needs, so restarting the daemon keeps the same
// producer identities.

use std::fs;
use std::path::Path;

use cadence_core::crypto::Keypair;
use cadence_core::{CadenceError, ProducerId};

/// Load `count` keypairs from `path`, generating and saving any that are missing.
pub fn load_or_generate(path: &str, count: usize) -> Result<Vec<Keypair>, CadenceError> {
    let mut keys = match fs::read_to_string(path) {
        Ok(contents) => parse_keys(&contents)?,
        Err(_) => {
            tracing::debug!("No key file at {}", path);
            Vec::new()
        }
    };

    if keys.len() >= count {
        keys.truncate(count);
        tracing::info!("Loaded {} producer keys from {}", count, path);
        return Ok(keys);
    }

    let missing = count - keys.len();
    keys.extend((0..missing).map(|_| Keypair::generate()));
    if let Err(e) = save_keys(path, &keys) {
        tracing::warn!("Could not save producer keys to {}: {}", path, e);
    } else {
        tracing::info!("Generated {} producer keys, saved to {}", missing, path);
    }
    Ok(keys)
}

/// Parse one hex secret per line, ignoring blank lines and `#` comments.
pub fn parse_keys(contents: &str) -> Result<Vec<Keypair>, CadenceError> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(Keypair::from_secret_hex)
        .collect()
}

/// Parse the configured producer set. An empty list yields `None`.
pub fn parse_producers(hex_keys: &[String]) -> Result<Option<Vec<ProducerId>>, CadenceError> {
    if hex_keys.is_empty() {
        return Ok(None);
    }
    hex_keys
        .iter()
        .map(|k| ProducerId::from_public_key_hex(k.trim()))
        .collect::<Result<Vec<_>, _>>()
        .map(Some)
}

fn save_keys(path: &str, keys: &[Keypair]) -> std::io::Result<()> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut contents = String::from("# cadence devnet producer secrets\n");
    for key in keys {
        contents.push_str(&key.secret_hex());
        contents.push('\n');
    }
    fs::write(path, contents)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_key_path(label: &str) -> String {
        let dir = std::env::temp_dir();
        let path = dir.join(format!(
            "cadence_test_{}_{}",
            label,
            hex::encode(rand::random::<[u8; 8]>())
        ));
        path.to_string_lossy().to_string()
    }

    #[test]
    fn test_generate_then_reload_is_stable() {
        let path = temp_key_path("keys");
        let first = load_or_generate(&path, 3).unwrap();
        let second = load_or_generate(&path, 3).unwrap();
        let ids = |keys: &[Keypair]| keys.iter().map(Keypair::producer_id).collect::<Vec<_>>();
        assert_eq!(ids(&first), ids(&second));
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_short_file_is_topped_up() {
        let path = temp_key_path("topup");
        let first = load_or_generate(&path, 1).unwrap();
        let more = load_or_generate(&path, 3).unwrap();
        assert_eq!(more.len(), 3);
        assert_eq!(more[0].producer_id(), first[0].producer_id());
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_parse_keys_rejects_garbage() {
        assert!(parse_keys("not-hex").is_err());
        assert!(parse_keys("# only a comment\n\n").unwrap().is_empty());
    }

    #[test]
    fn test_parse_producers() {
        let key = Keypair::generate();
        let hex_pub = hex::encode(key.public_key_bytes());
        let parsed = parse_producers(&[hex_pub]).unwrap().unwrap();
        assert_eq!(parsed, vec![key.producer_id()]);
        assert!(parse_producers(&[]).unwrap().is_none());
    }
}
