//! Wallet configuration.
//!
//! A `solidus.toml` in the data directory can override any subset of
//! the knobs; everything else keeps its built-in default, and a wallet
//! without a config file is fully functional.

use std::path::Path;

use serde::Deserialize;

use crate::constants::{COIN, DEFAULT_KEYPOOL_SIZE};
use crate::Amount;

/// Tunable wallet behavior.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct WalletConfig {
    /// Number of pre-generated keys kept ready in the pool.
    pub keypool_size: i64,
    /// Extra fee per started kilobyte the user volunteers on sends.
    pub pay_tx_fee: Amount,
    /// Sends requiring more than this fee fail instead of paying it.
    pub fee_ceiling: Amount,
    /// Address version byte for this network.
    pub network_id: u8,
}

impl Default for WalletConfig {
    fn default() -> Self {
        WalletConfig {
            keypool_size: DEFAULT_KEYPOOL_SIZE,
            pay_tx_fee: 0,
            fee_ceiling: COIN,
            network_id: 0,
        }
    }
}

impl WalletConfig {
    /// The configuration for `data_dir`: the contents of its
    /// `solidus.toml` when one exists and parses, built-in defaults
    /// otherwise. A malformed file is reported but never fatal.
    pub fn load(data_dir: &Path) -> Self {
        let path = data_dir.join("solidus.toml");
        let Ok(text) = std::fs::read_to_string(&path) else {
            return Self::default();
        };
        match toml::from_str(&text) {
            Ok(config) => {
                tracing::debug!(path = %path.display(), "wallet config read");
                config
            }
            Err(error) => {
                tracing::warn!(
                    path = %path.display(),
                    %error,
                    "wallet config unreadable, running on defaults"
                );
                Self::default()
            }
        }
    }
}
