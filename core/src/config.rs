use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{MachineError, Result};

const MIB: u64 = 1024 * 1024;

/// Sector size used for every offset in the assembled disk.
pub const SECTOR_SIZE: u64 = 512;

/// Boot partition offset: 8192 sectors.
pub const BOOT_PARTITION_OFFSET: u64 = 8192 * SECTOR_SIZE;

/// Root partition offset: 100 MiB after the boot partition.
pub const ROOT_PARTITION_OFFSET: u64 = BOOT_PARTITION_OFFSET + 100 * MIB;

/// Total size of the assembled raw disk (2 GiB).
pub const DISK_CAPACITY: u64 = 2 * 1024 * MIB;

/// Guest ports exposed by default NAT forwarding: HTTP, HTTPS, SSH.
pub const DEFAULT_GUEST_PORTS: [u16; 3] = [80, 443, 22];

/// Guest architecture.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    #[default]
    Amd64,
    Arm64,
}

impl Arch {
    pub fn as_str(&self) -> &'static str {
        match self {
            Arch::Amd64 => "amd64",
            Arch::Arm64 => "arm64",
        }
    }
}

impl FromStr for Arch {
    type Err = MachineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "amd64" => Ok(Arch::Amd64),
            "arm64" => Ok(Arch::Arm64),
            other => Err(MachineError::UnsupportedArch(other.to_string())),
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Guest memory size in the emulator's notation, e.g. `512M`, `1G`, `1.5G`.
///
/// A non-negative decimal number with an optional unit suffix
/// (`k`, `M`, `G`, `T`, `P`, `E`, case-insensitive, optionally followed by `B`).
/// No suffix means mebibytes, as the emulator interprets it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MemorySize(String);

impl MemorySize {
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let invalid = || {
            MachineError::ConfigError(format!(
                "invalid memory size '{s}': expected a number with optional suffix k, M, G, T, P or E"
            ))
        };

        let body = s
            .strip_suffix('B')
            .or_else(|| s.strip_suffix('b'))
            .unwrap_or(s);
        let number = match body.chars().last() {
            Some(c) if "kKmMgGtTpPeE".contains(c) => &body[..body.len() - 1],
            _ => body,
        };

        if number.is_empty() || number.starts_with('.') || number.ends_with('.') {
            return Err(invalid());
        }
        if number.chars().filter(|c| *c == '.').count() > 1
            || !number.chars().all(|c| c.is_ascii_digit() || c == '.')
        {
            return Err(invalid());
        }

        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MemorySize {
    fn default() -> Self {
        Self("1G".to_string())
    }
}

impl FromStr for MemorySize {
    type Err = MachineError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for MemorySize {
    type Error = MachineError;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<MemorySize> for String {
    fn from(m: MemorySize) -> Self {
        m.0
    }
}

impl fmt::Display for MemorySize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Registry credentials. Empty values mean anonymous access.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryCredentials {
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Operator-supplied disk source inputs.
///
/// The groups are mutually exclusive; which one wins is decided by the
/// source resolver's precedence, not here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpec {
    /// Ready-made raw disk image
    pub full: Option<PathBuf>,
    /// Discrete partition images
    pub mbr: Option<PathBuf>,
    pub boot: Option<PathBuf>,
    pub root: Option<PathBuf>,
    /// Local bundle archive
    pub archive: Option<PathBuf>,
    /// Remote artifact reference (`registry/repository:tag`)
    pub artifact: Option<String>,
    pub credentials: RegistryCredentials,
    /// Talk plain HTTP to the registry
    pub plain_http: bool,
}

impl SourceSpec {
    /// Return the path if it is set and non-empty.
    pub fn path(value: &Option<PathBuf>) -> Option<&Path> {
        value
            .as_deref()
            .filter(|p| !p.as_os_str().is_empty())
    }

    pub fn artifact(&self) -> Option<&str> {
        self.artifact
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// A single host-to-guest TCP forwarding rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortForward {
    pub host: u16,
    pub guest: u16,
}

/// Parse a custom NAT list.
///
/// Entries are comma separated. A bare `HOST` entry is mapped to the next
/// default guest port (80, 443, 22 in order); `HOST:GUEST` is explicit.
pub fn parse_port_forwards(s: &str) -> Result<Vec<PortForward>> {
    let mut forwards = Vec::new();
    let mut positional = DEFAULT_GUEST_PORTS.iter();

    for entry in s.split(',').map(str::trim) {
        if entry.is_empty() {
            return Err(MachineError::ConfigError(format!(
                "empty entry in NAT port list '{s}'"
            )));
        }

        let forward = match entry.split_once(':') {
            Some((host, guest)) => PortForward {
                host: parse_port(host, s)?,
                guest: parse_port(guest, s)?,
            },
            None => {
                let guest = positional.next().ok_or_else(|| {
                    MachineError::ConfigError(format!(
                        "too many NAT ports in '{s}': only {} guest ports have defaults, use HOST:GUEST",
                        DEFAULT_GUEST_PORTS.len()
                    ))
                })?;
                PortForward {
                    host: parse_port(entry, s)?,
                    guest: *guest,
                }
            }
        };
        forwards.push(forward);
    }

    Ok(forwards)
}

fn parse_port(value: &str, list: &str) -> Result<u16> {
    match value.trim().parse::<u16>() {
        Ok(port) if port != 0 => Ok(port),
        _ => Err(MachineError::ConfigError(format!(
            "invalid port '{value}' in NAT port list '{list}'"
        ))),
    }
}

/// Address range for shared (bridged) networking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedNetwork {
    pub start: Ipv4Addr,
    pub end: Ipv4Addr,
    pub subnet_mask: Ipv4Addr,
}

impl FromStr for SharedNetwork {
    type Err = MachineError;

    /// Parse `start,end,subnet-mask`.
    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        if parts.len() != 3 {
            return Err(MachineError::ConfigError(format!(
                "invalid shared network '{s}': expected start,end,subnet-mask"
            )));
        }

        let addr = |v: &str| {
            v.parse::<Ipv4Addr>().map_err(|e| {
                MachineError::ConfigError(format!(
                    "invalid address '{v}' in shared network '{s}': {e}"
                ))
            })
        };

        Ok(SharedNetwork {
            start: addr(parts[0])?,
            end: addr(parts[1])?,
            subnet_mask: addr(parts[2])?,
        })
    }
}

/// Raw networking flags. Both may be set; the launcher applies precedence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSpec {
    pub nat: Option<Vec<PortForward>>,
    pub shared: Option<SharedNetwork>,
}

/// Byte layout of the assembled raw disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskLayout {
    pub boot_offset: u64,
    pub root_offset: u64,
    pub capacity: u64,
}

impl Default for DiskLayout {
    fn default() -> Self {
        Self {
            boot_offset: BOOT_PARTITION_OFFSET,
            root_offset: ROOT_PARTITION_OFFSET,
            capacity: DISK_CAPACITY,
        }
    }
}

impl DiskLayout {
    /// Space available for the MBR image before the boot partition.
    pub fn mbr_limit(&self) -> u64 {
        self.boot_offset
    }

    /// Space available for the boot partition before the root partition.
    pub fn boot_limit(&self) -> u64 {
        self.root_offset.saturating_sub(self.boot_offset)
    }

    /// Space available for the root partition before the end of the disk.
    pub fn root_limit(&self) -> u64 {
        self.capacity.saturating_sub(self.root_offset)
    }

    pub fn validate(&self) -> Result<()> {
        let aligned = |v: u64| v % SECTOR_SIZE == 0;
        if !(aligned(self.boot_offset) && aligned(self.root_offset) && aligned(self.capacity)) {
            return Err(MachineError::ConfigError(format!(
                "disk layout offsets must be multiples of {SECTOR_SIZE} bytes: {self:?}"
            )));
        }
        if self.boot_offset == 0
            || self.boot_offset >= self.root_offset
            || self.root_offset >= self.capacity
        {
            return Err(MachineError::ConfigError(format!(
                "disk layout must satisfy 0 < boot < root < capacity: {self:?}"
            )));
        }
        Ok(())
    }
}

/// Complete, validated configuration for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineConfig {
    /// Emulator instance name
    pub name: String,
    pub arch: Arch,
    pub memory: MemorySize,
    /// Number of guest cores
    pub cores: u32,
    pub source: SourceSpec,
    pub network: NetworkSpec,
    pub layout: DiskLayout,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            name: generate_machine_name(),
            arch: Arch::default(),
            memory: MemorySize::default(),
            cores: 1,
            source: SourceSpec::default(),
            network: NetworkSpec::default(),
            layout: DiskLayout::default(),
        }
    }
}

impl MachineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.cores == 0 {
            return Err(MachineError::ConfigError(
                "cores must be at least 1".to_string(),
            ));
        }
        if self.name.trim().is_empty() {
            return Err(MachineError::ConfigError(
                "machine name must not be empty".to_string(),
            ));
        }
        self.layout.validate()
    }
}

/// Generate a machine name like `gom-3f9a2c1`.
pub fn generate_machine_name() -> String {
    use rand::Rng;
    let id: u64 = rand::thread_rng().gen();
    format!("gom-{}", &format!("{id:016x}")[..7])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arch_parse() {
        assert_eq!("amd64".parse::<Arch>().unwrap(), Arch::Amd64);
        assert_eq!("arm64".parse::<Arch>().unwrap(), Arch::Arm64);
        let err = "riscv64".parse::<Arch>().unwrap_err();
        assert!(matches!(err, MachineError::UnsupportedArch(ref a) if a == "riscv64"));
    }

    #[test]
    fn test_arch_default_and_display() {
        assert_eq!(Arch::default(), Arch::Amd64);
        assert_eq!(Arch::Arm64.to_string(), "arm64");
    }

    #[test]
    fn test_memory_size_valid() {
        for m in ["1G", "512M", "512m", "1.5G", "2048", "4k", "1E", "8GB"] {
            assert!(MemorySize::parse(m).is_ok(), "{m} should be valid");
        }
        assert_eq!(MemorySize::default().as_str(), "1G");
    }

    #[test]
    fn test_memory_size_invalid() {
        for m in ["", "G", "1X", "-1G", "1..5G", ".5G", "1.G", "one"] {
            assert!(MemorySize::parse(m).is_err(), "{m} should be invalid");
        }
    }

    #[test]
    fn test_memory_size_serde_validates() {
        let ok: MemorySize = serde_json::from_str("\"2G\"").unwrap();
        assert_eq!(ok.as_str(), "2G");
        assert!(serde_json::from_str::<MemorySize>("\"lots\"").is_err());
    }

    #[test]
    fn test_parse_port_forwards_positional() {
        let f = parse_port_forwards("8080,8443,2222").unwrap();
        assert_eq!(
            f,
            vec![
                PortForward { host: 8080, guest: 80 },
                PortForward { host: 8443, guest: 443 },
                PortForward { host: 2222, guest: 22 },
            ]
        );
    }

    #[test]
    fn test_parse_port_forwards_partial_and_explicit() {
        let f = parse_port_forwards("8080, 9000:9000").unwrap();
        assert_eq!(
            f,
            vec![
                PortForward { host: 8080, guest: 80 },
                PortForward { host: 9000, guest: 9000 },
            ]
        );
    }

    #[test]
    fn test_parse_port_forwards_errors() {
        assert!(parse_port_forwards("1,2,3,4").is_err());
        assert!(parse_port_forwards("8080,,22").is_err());
        assert!(parse_port_forwards("http").is_err());
        assert!(parse_port_forwards("0").is_err());
        assert!(parse_port_forwards("70000").is_err());
    }

    #[test]
    fn test_shared_network_parse() {
        let n: SharedNetwork = "192.168.105.1,192.168.105.254,255.255.255.0"
            .parse()
            .unwrap();
        assert_eq!(n.start, Ipv4Addr::new(192, 168, 105, 1));
        assert_eq!(n.end, Ipv4Addr::new(192, 168, 105, 254));
        assert_eq!(n.subnet_mask, Ipv4Addr::new(255, 255, 255, 0));

        assert!("192.168.105.1,192.168.105.254".parse::<SharedNetwork>().is_err());
        assert!("a,b,c".parse::<SharedNetwork>().is_err());
    }

    #[test]
    fn test_disk_layout_defaults() {
        let layout = DiskLayout::default();
        assert_eq!(layout.boot_offset, 4 * 1024 * 1024);
        assert_eq!(layout.root_offset, 104 * 1024 * 1024);
        assert_eq!(layout.capacity, 2147483648);
        assert_eq!(layout.boot_limit(), 100 * 1024 * 1024);
        assert_eq!(layout.root_limit(), 2147483648 - 104 * 1024 * 1024);
        assert!(layout.validate().is_ok());
    }

    #[test]
    fn test_disk_layout_validate() {
        let misaligned = DiskLayout {
            boot_offset: 1000,
            root_offset: 4096,
            capacity: 8192,
        };
        assert!(misaligned.validate().is_err());

        let inverted = DiskLayout {
            boot_offset: 4096,
            root_offset: 1024,
            capacity: 8192,
        };
        assert!(inverted.validate().is_err());
    }

    #[test]
    fn test_source_spec_empty_values_are_unset() {
        let spec = SourceSpec {
            full: Some(PathBuf::new()),
            artifact: Some("  ".to_string()),
            ..Default::default()
        };
        assert!(SourceSpec::path(&spec.full).is_none());
        assert!(spec.artifact().is_none());
    }

    #[test]
    fn test_machine_config_validate() {
        let config = MachineConfig::default();
        assert!(config.validate().is_ok());

        let config = MachineConfig {
            cores: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_generate_machine_name() {
        let name = generate_machine_name();
        assert!(name.starts_with("gom-"));
        assert_eq!(name.len(), 11);
        assert!(name[4..].chars().all(|c| c.is_ascii_hexdigit()));
    }
}
