//! Serial device listing for `--list-ports`.
use serde::Serialize;
use serialport::{SerialPortInfo, SerialPortType};
use std::collections::HashSet;

/// One selectable device, as shown to the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortEntry {
    pub name: String,
    pub usb: Option<UsbIds>,
    pub product: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UsbIds {
    pub vid: u16,
    pub pid: u16,
}

impl From<SerialPortInfo> for PortEntry {
    fn from(info: SerialPortInfo) -> Self {
        match info.port_type {
            SerialPortType::UsbPort(usb) => Self {
                name: info.port_name,
                usb: Some(UsbIds {
                    vid: usb.vid,
                    pid: usb.pid,
                }),
                product: usb.product,
            },
            _ => Self {
                name: info.port_name,
                usb: None,
                product: None,
            },
        }
    }
}

/// Available serial devices, USB adapters first, duplicates removed.
pub fn available_ports_sorted() -> Vec<PortEntry> {
    let raw = match serialport::available_ports() {
        Ok(ports) => ports,
        Err(err) => {
            log::warn!("Failed to enumerate serial ports: {err}");
            Vec::new()
        }
    };
    sort_and_dedup_ports(raw.into_iter().map(PortEntry::from).collect())
}

fn base_name(name: &str) -> String {
    name.rsplit('/').next().unwrap_or(name).to_lowercase()
}

fn priority(name: &str) -> i32 {
    let n = name.to_lowercase();
    if n.contains("ttyusb") || n.contains("usb") {
        0
    } else if n.contains("acm") {
        1
    } else if n.contains("ttys") || n.contains("serial") || n.starts_with("com") {
        2
    } else {
        10
    }
}

pub(crate) fn sort_and_dedup_ports(ports: Vec<PortEntry>) -> Vec<PortEntry> {
    let mut seen = HashSet::new();
    let mut unique: Vec<PortEntry> = ports
        .into_iter()
        .filter(|p| {
            let key = match p.usb {
                Some(ids) => format!("{}:vid={:04x}:pid={:04x}", base_name(&p.name), ids.vid, ids.pid),
                None => base_name(&p.name),
            };
            seen.insert(key)
        })
        .collect();

    unique.sort_by(|a, b| {
        priority(&a.name)
            .cmp(&priority(&b.name))
            .then_with(|| a.name.cmp(&b.name))
    });
    unique
}
