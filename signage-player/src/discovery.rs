//! Device identification
//!
//! A player is addressed by its device id. When the configuration does not
//! pin one, it is derived from the primary MAC address so the id survives
//! reinstalls:
//! - Ethernet interfaces first, then wireless, then anything else
//! - Loopback interfaces are never considered
//! - Colons are stripped (`a1:b2:...` -> `a1b2...`)

use anyhow::{anyhow, Context, Result};
use if_addrs::get_if_addrs;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InterfaceType {
    Ethernet,
    Wireless,
    Loopback,
    Other,
}

#[derive(Debug, Clone)]
struct Interface {
    name: String,
    mac: String,
    interface_type: InterfaceType,
}

/// Who this player is, as reported in every heartbeat
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub device_id: String,
    pub hostname: String,
    pub os: String,
}

impl DeviceIdentity {
    /// Use `configured_id` when present, otherwise derive one from the MAC.
    pub fn resolve(configured_id: Option<&str>) -> Result<Self> {
        let hostname = gethostname::gethostname().to_string_lossy().to_string();
        let os = std::env::consts::OS.to_string();

        let device_id = match configured_id.map(str::trim).filter(|id| !id.is_empty()) {
            Some(id) => id.to_string(),
            None => {
                let mac = primary_mac().context("Failed to derive device id from MAC")?;
                mac.replace(':', "")
            }
        };

        info!(%device_id, %hostname, %os, "device identity resolved");
        Ok(Self {
            device_id,
            hostname,
            os,
        })
    }
}

fn primary_mac() -> Result<String> {
    let if_addrs = get_if_addrs().context("Failed to enumerate network interfaces")?;

    let mut interfaces = Vec::new();
    for if_addr in if_addrs {
        if if_addr.is_loopback() {
            continue;
        }
        // interfaces with several addresses show up more than once
        if interfaces.iter().any(|i: &Interface| i.name == if_addr.name) {
            continue;
        }

        match mac_address::mac_address_by_name(&if_addr.name) {
            Ok(Some(mac)) => interfaces.push(Interface {
                interface_type: classify_interface(&if_addr.name),
                name: if_addr.name,
                mac: mac.to_string().to_lowercase(),
            }),
            Ok(None) => debug!("No MAC found for interface: {}", if_addr.name),
            Err(e) => debug!("Error getting MAC for {}: {}", if_addr.name, e),
        }
    }

    select_primary_mac(&interfaces)
}

fn classify_interface(name: &str) -> InterfaceType {
    let name = name.to_lowercase();

    if name == "lo" || name.starts_with("lo0") || name.starts_with("loopback") {
        return InterfaceType::Loopback;
    }
    if ["wlan", "wlp", "wlo", "wifi", "wl"]
        .iter()
        .any(|p| name.starts_with(p))
    {
        return InterfaceType::Wireless;
    }
    if ["eth", "en", "eno", "ens", "enp"]
        .iter()
        .any(|p| name.starts_with(p))
    {
        return InterfaceType::Ethernet;
    }
    InterfaceType::Other
}

fn select_primary_mac(interfaces: &[Interface]) -> Result<String> {
    let candidates = || {
        interfaces
            .iter()
            .filter(|i| i.interface_type != InterfaceType::Loopback)
    };

    for wanted in [InterfaceType::Ethernet, InterfaceType::Wireless] {
        if let Some(interface) = candidates().find(|i| i.interface_type == wanted) {
            debug!("Selected {:?} interface as primary: {}", wanted, interface.name);
            return Ok(interface.mac.clone());
        }
    }

    if let Some(interface) = candidates().next() {
        warn!("No Ethernet/WiFi found, using first interface: {}", interface.name);
        return Ok(interface.mac.clone());
    }

    Err(anyhow!("No suitable network interface found"))
}
