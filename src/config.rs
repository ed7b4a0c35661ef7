//! Configuration surface (`spec.md` §6). Deserializable with `serde`, e.g.
//! from a TOML file the embedding application reads; this crate only
//! defines the shape and the documented defaults.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Named Xmodem variant. See `spec.md` §4.3/§6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum XmodemFlavor {
    Vanilla,
    Relaxed,
    Crc,
    X1K,
    X1KG,
}

impl Default for XmodemFlavor {
    fn default() -> Self {
        XmodemFlavor::Crc
    }
}

/// `xmodem.*` configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct XmodemConfig {
    pub flavor: XmodemFlavor,
}

impl Default for XmodemConfig {
    fn default() -> Self {
        Self {
            flavor: XmodemFlavor::default(),
        }
    }
}

/// `kermit.*` configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KermitConfig {
    pub streaming: bool,
    pub window_size: u8,
    pub long_packets: bool,
    pub robust_filenames: bool,
    pub force_binary_upload: bool,
    pub force_binary_download: bool,
}

impl Default for KermitConfig {
    fn default() -> Self {
        Self {
            streaming: true,
            window_size: 1,
            long_packets: true,
            robust_filenames: false,
            force_binary_upload: false,
            force_binary_download: false,
        }
    }
}

/// `zmodem.*` configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZmodemConfig {
    pub use_crc32: bool,
    pub escape_control_chars: bool,
    pub download_issue_zchallenge: bool,
}

impl Default for ZmodemConfig {
    fn default() -> Self {
        Self {
            use_crc32: true,
            escape_control_chars: false,
            download_issue_zchallenge: false,
        }
    }
}

/// Top-level configuration recognized by the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub xmodem: XmodemConfig,
    pub kermit: KermitConfig,
    pub zmodem: ZmodemConfig,
    pub download_directory: PathBuf,
    pub overwrite: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            xmodem: XmodemConfig::default(),
            kermit: KermitConfig::default(),
            zmodem: ZmodemConfig::default(),
            download_directory: PathBuf::from("."),
            overwrite: false,
        }
    }
}
