//! QEMU networking: netdev modes, published ports and guest MAC addresses.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use bootkit_core::error::{BootError, Result};
use rand::RngCore;

/// Netdev id shared by the `-netdev` backend and the virtio-net device.
pub const NETDEV_ID: &str = "t0";

/// File under the state directory holding the guest MAC address.
pub const MAC_ADDR_FILE: &str = "mac-addr";

/// Transport protocol of a published port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
        }
    }
}

/// A guest port forwarded from the host: `host:guest[/tcp|/udp]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishedPort {
    pub host: u16,
    pub guest: u16,
    pub protocol: Protocol,
}

impl FromStr for PublishedPort {
    type Err = BootError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || {
            BootError::ConfigError(format!(
                "invalid published port '{}': expected host:guest[/proto]",
                s
            ))
        };

        let (ports, protocol) = match s.split_once('/') {
            Some((ports, "tcp")) => (ports, Protocol::Tcp),
            Some((ports, "udp")) => (ports, Protocol::Udp),
            Some(_) => return Err(invalid()),
            None => (s, Protocol::Tcp),
        };
        let (host, guest) = ports.split_once(':').ok_or_else(invalid)?;
        Ok(Self {
            host: host.parse().map_err(|_| invalid())?,
            guest: guest.parse().map_err(|_| invalid())?,
            protocol,
        })
    }
}

impl fmt::Display for PublishedPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.host, self.guest, self.protocol)
    }
}

/// `hostfwd` options appended to a user-mode netdev.
pub fn forwardings(ports: &[PublishedPort]) -> String {
    ports
        .iter()
        .map(|p| format!(",hostfwd={}::{}-:{}", p.protocol, p.host, p.guest))
        .collect()
}

/// Guest networking mode.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Networking {
    /// QEMU user-mode networking
    #[default]
    User,
    /// A preexisting tap device
    Tap(String),
    /// A preexisting bridge
    Bridge(String),
    /// No network device
    None,
}

impl FromStr for Networking {
    type Err = BootError;

    /// Parses `user`, `default`, `tap,<name>`, `bridge,<name>` or `none`.
    /// An empty string selects the default.
    fn from_str(s: &str) -> Result<Self> {
        let (mode, name) = match s.split_once(',') {
            Some((mode, name)) => (mode, Some(name)),
            None => (s, None),
        };
        let named = |mode: &str| {
            name.filter(|n| !n.is_empty())
                .map(str::to_string)
                .ok_or_else(|| {
                    BootError::ConfigError(format!(
                        "Not enough arguments for \"{}\" networking mode",
                        mode
                    ))
                })
        };

        match mode {
            "" | "default" | "user" => Ok(Networking::User),
            "tap" => Ok(Networking::Tap(named("tap")?)),
            "bridge" => Ok(Networking::Bridge(named("bridge")?)),
            "none" => Ok(Networking::None),
            other => Err(BootError::ConfigError(format!(
                "Invalid networking mode: {}",
                other
            ))),
        }
    }
}

impl Networking {
    /// `-netdev` backend options, or `None` when networking is disabled.
    pub fn netdev(&self) -> Option<String> {
        match self {
            Networking::User => Some(format!("user,id={}", NETDEV_ID)),
            Networking::Tap(name) => Some(format!(
                "tap,id={},ifname={},script=no,downscript=no",
                NETDEV_ID, name
            )),
            Networking::Bridge(name) => Some(format!("bridge,id={},br={}", NETDEV_ID, name)),
            Networking::None => None,
        }
    }

    /// Port publishing needs user-mode networking.
    pub fn check_ports(&self, ports: &[PublishedPort]) -> Result<()> {
        if ports.is_empty() || *self == Networking::User {
            Ok(())
        } else {
            Err(BootError::ConfigError(
                "Port publishing requires \"user\" networking mode".to_string(),
            ))
        }
    }
}

/// Ethernet MAC address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    /// Random unicast, locally administered address.
    pub fn generate() -> Self {
        let mut mac = [0u8; 6];
        rand::thread_rng().fill_bytes(&mut mac);
        mac[0] &= !0x01;
        mac[0] |= 0x02;
        Self(mac)
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}", a, b, c, d, e, g)
    }
}

impl FromStr for MacAddress {
    type Err = BootError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || BootError::ConfigError(format!("invalid MAC address '{}'", s));
        let mut mac = [0u8; 6];
        let mut parts = s.split(|c: char| c == ':' || c == '-');
        for byte in mac.iter_mut() {
            let part = parts.next().ok_or_else(invalid)?;
            if part.len() != 2 {
                return Err(invalid());
            }
            *byte = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(Self(mac))
    }
}

/// Load the guest MAC address from `state_dir`, generating and persisting a
/// new one on first use so the guest keeps its address across runs.
pub fn retrieve_mac(state_dir: &Path) -> Result<MacAddress> {
    let file = state_dir.join(MAC_ADDR_FILE);
    match std::fs::read_to_string(&file) {
        Ok(contents) => contents.trim().parse::<MacAddress>().map_err(|e| {
            BootError::ConfigError(format!("failed to parse {}: {}", file.display(), e))
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let mac = MacAddress::generate();
            tracing::debug!(mac = %mac, path = %file.display(), "Generated guest MAC address");
            std::fs::write(&file, mac.to_string()).map_err(|e| BootError::LaunchError {
                message: format!("failed to write {}: {}", file.display(), e),
                hint: None,
            })?;
            Ok(mac)
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_published_port() {
        let port: PublishedPort = "8080:80".parse().unwrap();
        assert_eq!(
            port,
            PublishedPort {
                host: 8080,
                guest: 80,
                protocol: Protocol::Tcp
            }
        );
        let port: PublishedPort = "5353:53/udp".parse().unwrap();
        assert_eq!(port.protocol, Protocol::Udp);
        assert_eq!(port.to_string(), "5353:53/udp");
    }

    #[test]
    fn test_parse_published_port_invalid() {
        assert!("8080".parse::<PublishedPort>().is_err());
        assert!("8080:80/sctp".parse::<PublishedPort>().is_err());
        assert!("99999:80".parse::<PublishedPort>().is_err());
        assert!("a:b".parse::<PublishedPort>().is_err());
    }

    #[test]
    fn test_forwardings() {
        let ports: Vec<PublishedPort> = vec!["2222:22".parse().unwrap(), "5353:53/udp".parse().unwrap()];
        assert_eq!(
            forwardings(&ports),
            ",hostfwd=tcp::2222-:22,hostfwd=udp::5353-:53"
        );
        assert_eq!(forwardings(&[]), "");
    }

    #[test]
    fn test_parse_networking() {
        assert_eq!("".parse::<Networking>().unwrap(), Networking::User);
        assert_eq!("default".parse::<Networking>().unwrap(), Networking::User);
        assert_eq!("user".parse::<Networking>().unwrap(), Networking::User);
        assert_eq!("none".parse::<Networking>().unwrap(), Networking::None);
        assert_eq!(
            "tap,tap0".parse::<Networking>().unwrap(),
            Networking::Tap("tap0".to_string())
        );
        assert_eq!(
            "bridge,br0".parse::<Networking>().unwrap(),
            Networking::Bridge("br0".to_string())
        );
        assert!("tap".parse::<Networking>().is_err());
        assert!("bridge,".parse::<Networking>().is_err());
        assert!("vde".parse::<Networking>().is_err());
    }

    #[test]
    fn test_netdev() {
        assert_eq!(Networking::User.netdev().unwrap(), "user,id=t0");
        assert_eq!(
            Networking::Tap("tap0".to_string()).netdev().unwrap(),
            "tap,id=t0,ifname=tap0,script=no,downscript=no"
        );
        assert_eq!(
            Networking::Bridge("br0".to_string()).netdev().unwrap(),
            "bridge,id=t0,br=br0"
        );
        assert_eq!(Networking::None.netdev(), None);
    }

    #[test]
    fn test_port_publishing_requires_user_mode() {
        let ports: Vec<PublishedPort> = vec!["80:80".parse().unwrap()];
        assert!(Networking::User.check_ports(&ports).is_ok());
        assert!(Networking::None.check_ports(&ports).is_err());
        assert!(Networking::Tap("t".to_string()).check_ports(&ports).is_err());
        assert!(Networking::None.check_ports(&[]).is_ok());
    }

    #[test]
    fn test_generated_mac_is_local_unicast() {
        for _ in 0..32 {
            let mac = MacAddress::generate();
            assert_eq!(mac.0[0] & 0x01, 0);
            assert_eq!(mac.0[0] & 0x02, 0x02);
        }
    }

    #[test]
    fn test_mac_display_parse() {
        let mac = MacAddress([0x02, 0xab, 0x00, 0x10, 0xff, 0x7e]);
        assert_eq!(mac.to_string(), "02:ab:00:10:ff:7e");
        assert_eq!("02:ab:00:10:ff:7e".parse::<MacAddress>().unwrap(), mac);
        assert!("02:ab:00:10:ff".parse::<MacAddress>().is_err());
        assert!("02:ab:00:10:ff:7e:01".parse::<MacAddress>().is_err());
        assert!("zz:ab:00:10:ff:7e".parse::<MacAddress>().is_err());
    }

    #[test]
    fn test_retrieve_mac_persists() {
        let dir = TempDir::new().unwrap();
        let first = retrieve_mac(dir.path()).unwrap();
        let second = retrieve_mac(dir.path()).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            std::fs::read_to_string(dir.path().join(MAC_ADDR_FILE)).unwrap(),
            first.to_string()
        );
    }

    #[test]
    fn test_retrieve_mac_rejects_garbage() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(MAC_ADDR_FILE), "not a mac").unwrap();
        assert!(retrieve_mac(dir.path()).is_err());
    }
}
