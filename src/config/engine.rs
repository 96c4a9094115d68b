//! Game-engine configuration subset (`Engine.ini`).
//!
//! The values the supervisor cares about are spread over four engine
//! sections; `collect`/`spread` translate between the flat schema struct
//! and that layout.

use std::path::Path;

use crate::ini::{IniDocument, IniValue};

use super::dedicated::DsConfigError;

const URL_SECTION: &str = "URL";
const SYSTEM_SETTINGS_SECTION: &str = "SystemSettings";
const CORE_SYSTEM_SECTION: &str = "Core.System";
const NET_DRIVER_SECTION: &str = "/Script/OnlineSubsystemUtils.IpNetDriver";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// UDP game port.
    pub port: u16,
    /// Forced false while the DS runs under the compatibility runtime.
    pub allow_encryption: bool,
    pub paths: Vec<String>,
    pub max_client_rate: u64,
    pub max_internet_client_rate: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            port: 7777,
            allow_encryption: false,
            paths: Vec::new(),
            max_client_rate: 1_000_000,
            max_internet_client_rate: 1_000_000,
        }
    }
}

impl EngineConfig {
    /// Loads `Engine.ini` (or defaults when absent), forces the encryption
    /// flag, and writes the normalised file back. Idempotent.
    pub fn ensure_config(path: &Path, disable_encryption: bool) -> Result<Self, DsConfigError> {
        let mut config = if path.exists() {
            Self::collect(&IniDocument::load(path)?)
        } else {
            Self::default()
        };

        config.allow_encryption = !disable_encryption;

        config.spread().save(path)?;
        Ok(config)
    }

    /// Picks the schema values out of a full engine INI document; anything
    /// unparsable keeps its default.
    pub fn collect(doc: &IniDocument) -> Self {
        let mut config = Self::default();

        if let Some(port) = doc
            .section(URL_SECTION)
            .and_then(|s| s.get_str("Port"))
            .and_then(|raw| raw.parse().ok())
        {
            config.port = port;
        }
        if let Some(allow) = doc
            .section(SYSTEM_SETTINGS_SECTION)
            .and_then(|s| s.get_bool("net.AllowEncryption"))
        {
            config.allow_encryption = allow;
        }
        if let Some(paths) = doc
            .section(CORE_SYSTEM_SECTION)
            .and_then(|s| s.get("Paths"))
        {
            config.paths = paths.as_list();
        }
        if let Some(driver) = doc.section(NET_DRIVER_SECTION) {
            if let Some(rate) = driver.get_str("MaxClientRate").and_then(|r| r.parse().ok()) {
                config.max_client_rate = rate;
            }
            if let Some(rate) = driver
                .get_str("MaxInternetClientRate")
                .and_then(|r| r.parse().ok())
            {
                config.max_internet_client_rate = rate;
            }
        }

        config
    }

    /// Spreads the schema back over the engine section layout.
    pub fn spread(&self) -> IniDocument {
        let mut doc = IniDocument::new();

        doc.ensure_section(URL_SECTION)
            .set("Port", self.port.to_string());
        doc.ensure_section(SYSTEM_SETTINGS_SECTION)
            .set("net.AllowEncryption", self.allow_encryption);

        let core = doc.ensure_section(CORE_SYSTEM_SECTION);
        match self.paths.as_slice() {
            [] => {}
            [only] => core.set("Paths", only.clone()),
            many => core.set("Paths", IniValue::List(many.to_vec())),
        }

        let driver = doc.ensure_section(NET_DRIVER_SECTION);
        driver.set("MaxClientRate", self.max_client_rate.to_string());
        driver.set(
            "MaxInternetClientRate",
            self.max_internet_client_rate.to_string(),
        );

        doc
    }
}
