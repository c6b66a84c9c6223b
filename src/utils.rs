use std::path::Path;
use std::sync::OnceLock;

use anyhow::Result;
use log::{error, info};
use regex::Regex;
use tokio::fs;

/// Creates `path` and its parents if missing. Idempotent.
pub async fn ensure_directory_exists<P: AsRef<Path>>(path: P) -> Result<()> {
    let path = path.as_ref();
    if fs::try_exists(path).await.unwrap_or(false) {
        return Ok(());
    }
    fs::create_dir_all(path).await.inspect_err(|e| {
        error!("Failed to create directory at {:?}: {}", path, e);
    })?;
    info!("Created directory at: {:?}", path);
    Ok(())
}

fn mac_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"([0-9A-Fa-f]{2}[:_-]){5}[0-9A-Fa-f]{2}").expect("static MAC pattern is valid")
    })
}

/// Pulls a colon-separated upper-case MAC address out of a platform device id.
///
/// BlueZ ids embed the address with underscores (`.../dev_AA_BB_...`); macOS
/// ids are UUIDs and carry no address, in which case `None` is returned.
pub fn extract_mac_address(device_id: &str) -> Option<String> {
    mac_pattern()
        .find_iter(device_id)
        .last()
        .map(|m| m.as_str().replace(['_', '-'], ":").to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_bluez_style_address() {
        assert_eq!(
            extract_mac_address("/org/bluez/hci0/dev_c0_ff_ee_00_11_22").as_deref(),
            Some("C0:FF:EE:00:11:22")
        );
        assert_eq!(
            extract_mac_address("AA-BB-CC-DD-EE-FF").as_deref(),
            Some("AA:BB:CC:DD:EE:FF")
        );
    }

    #[test]
    fn uuid_ids_have_no_address() {
        assert_eq!(extract_mac_address("6f2a1c7e-1b2d-4d7e-9a51-0b8cb3f2e8a4"), None);
    }
}
