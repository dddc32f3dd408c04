//! Flash layout and the persisted node config.

use busnode_core::config::{CONFIG_PAGE_SIZE, NodeConfig};
use embedded_storage::nor_flash::ReadNorFlash;
use log::{info, warn};

/// Offset of the page holding the encoded [`NodeConfig`].
pub const CONFIG_PAGE_ADDR: u32 = 0x2F000;

/// Read the config page, falling back to defaults when it is blank or
/// does not decode.
pub fn load_config<F: ReadNorFlash>(flash: &mut F) -> NodeConfig {
    let mut page = [0u8; CONFIG_PAGE_SIZE];
    if flash.read(CONFIG_PAGE_ADDR, &mut page).is_err() {
        warn!("Config: page at {:#x} unreadable, using defaults", CONFIG_PAGE_ADDR);
        return NodeConfig::default();
    }
    if page.iter().all(|&b| b == 0xFF) {
        info!("Config: page blank, using defaults");
        return NodeConfig::default();
    }

    match NodeConfig::decode(&page) {
        Ok(config) => {
            info!("Config: loaded from {:#x}", CONFIG_PAGE_ADDR);
            config
        }
        Err(e) => {
            warn!("Config: {}, using defaults", e);
            NodeConfig::default()
        }
    }
}
