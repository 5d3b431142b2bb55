use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::Path;

use crate::error::{Error, Result};
use crate::pool::Pool;

/// Server configuration, loaded from a plain `key=value` text file.
///
/// Every key is optional; a missing file or missing key falls back to the
/// defaults below. Lines starting with `#` and blank lines are ignored, as
/// are unrecognized keys.
///
/// | key                  | default       |
/// |----------------------|---------------|
/// | `ip_pool_start`      | 192.168.1.100 |
/// | `ip_pool_end`        | 192.168.1.200 |
/// | `server_ip`          | 192.168.1.1   |
/// | `subnet_mask`        | 255.255.255.0 |
/// | `router`             | server_ip     |
/// | `dns_server`         | server_ip     |
/// | `dhcp_server_port`   | 67            |
/// | `dhcp_client_port`   | 68            |
/// | `default_lease_time` | 86400         |
/// | `max_leases`         | 100           |
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server_ip: Ipv4Addr,
    pub subnet_mask: Ipv4Addr,
    pub ip_pool_start: Ipv4Addr,
    pub ip_pool_end: Ipv4Addr,
    pub router: Ipv4Addr,
    pub dns_server: Ipv4Addr,
    pub dhcp_server_port: u16,
    pub dhcp_client_port: u16,
    /// Lease duration in seconds handed out with every grant.
    pub default_lease_time: u32,
    /// Fixed capacity of the lease table.
    pub max_leases: usize,
}

impl Default for Config {
    fn default() -> Self {
        let server_ip = Ipv4Addr::new(192, 168, 1, 1);
        Self {
            server_ip,
            subnet_mask: Ipv4Addr::new(255, 255, 255, 0),
            ip_pool_start: Ipv4Addr::new(192, 168, 1, 100),
            ip_pool_end: Ipv4Addr::new(192, 168, 1, 200),
            router: server_ip,
            dns_server: server_ip,
            dhcp_server_port: 67,
            dhcp_client_port: 68,
            default_lease_time: 86400,
            max_leases: 100,
        }
    }
}

impl Config {
    /// Loads configuration from `path`, falling back to defaults if the
    /// file does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if a present key has an unparsable
    /// value, or if the resulting configuration fails [`validate`](Self::validate).
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let mut config = Config::default();
        let mut explicit_router = false;
        let mut explicit_dns = false;

        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            for line in content.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                let Some((key, value)) = line.split_once('=') else {
                    continue;
                };
                let (key, value) = (key.trim(), value.trim());
                match key {
                    "ip_pool_start" => config.ip_pool_start = parse_ip(key, value)?,
                    "ip_pool_end" => config.ip_pool_end = parse_ip(key, value)?,
                    "server_ip" => config.server_ip = parse_ip(key, value)?,
                    "subnet_mask" => config.subnet_mask = parse_ip(key, value)?,
                    "router" => {
                        config.router = parse_ip(key, value)?;
                        explicit_router = true;
                    }
                    "dns_server" => {
                        config.dns_server = parse_ip(key, value)?;
                        explicit_dns = true;
                    }
                    "dhcp_server_port" => config.dhcp_server_port = parse_num(key, value)?,
                    "dhcp_client_port" => config.dhcp_client_port = parse_num(key, value)?,
                    "default_lease_time" => config.default_lease_time = parse_num(key, value)?,
                    "max_leases" => config.max_leases = parse_num(key, value)?,
                    _ => {}
                }
            }
        }

        // router and dns_server track server_ip unless set explicitly
        if !explicit_router {
            config.router = config.server_ip;
        }
        if !explicit_dns {
            config.dns_server = config.server_ip;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let start = u32::from(self.ip_pool_start);
        let end = u32::from(self.ip_pool_end);

        if start > end {
            return Err(Error::InvalidConfig(
                "ip_pool_start must be less than or equal to ip_pool_end".to_string(),
            ));
        }

        if self.default_lease_time == 0 {
            return Err(Error::InvalidConfig(
                "default_lease_time must be greater than 0".to_string(),
            ));
        }

        if self.max_leases == 0 {
            return Err(Error::InvalidConfig(
                "max_leases must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// The assignable address range.
    pub fn pool(&self) -> Pool {
        Pool::new(self.ip_pool_start, self.ip_pool_end)
    }

    pub fn ip_in_pool(&self, ip: Ipv4Addr) -> bool {
        self.pool().contains(ip)
    }

    pub fn pool_size(&self) -> u32 {
        self.pool().size()
    }
}

fn parse_ip(key: &str, value: &str) -> Result<Ipv4Addr> {
    value
        .parse()
        .map_err(|_| Error::InvalidConfig(format!("{key}: invalid IPv4 address '{value}'")))
}

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::InvalidConfig(format!("{key}: invalid number '{value}'")))
}
