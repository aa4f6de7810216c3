//! Guest networking plans.

use gom_core::config::{NetworkSpec, PortForward, SharedNetwork, DEFAULT_GUEST_PORTS};
use gom_core::error::{MachineError, Result};

use crate::ports::free_ports;

/// Netdev id for user-mode NAT.
const NAT_NETDEV_ID: &str = "net0";

/// Netdev id for shared networking.
const SHARED_NETDEV_ID: &str = "internal";

/// The only host OS with shared (vmnet) networking.
pub const SHARED_NETWORK_OS: &str = "macos";

/// How the guest is connected to the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkPlan {
    /// User-mode NAT forwarding freshly allocated host ports to 80, 443, 22.
    DefaultNat(Vec<PortForward>),
    /// User-mode NAT with operator-chosen forwards.
    CustomNat(Vec<PortForward>),
    /// Bridged onto a host-visible subnet. Needs root.
    Shared(SharedNetwork),
}

impl NetworkPlan {
    /// Build the plan for `spec` on host OS `os`.
    ///
    /// Custom NAT takes precedence over shared networking. Only the default
    /// plan allocates ports.
    pub fn resolve(spec: &NetworkSpec, os: &str) -> Result<Self> {
        if let Some(forwards) = &spec.nat {
            return Ok(NetworkPlan::CustomNat(forwards.clone()));
        }

        if let Some(shared) = spec.shared {
            if os != SHARED_NETWORK_OS {
                return Err(MachineError::UnsupportedPlatform {
                    feature: "shared networking".to_string(),
                    supported: SHARED_NETWORK_OS.to_string(),
                    current: os.to_string(),
                });
            }
            return Ok(NetworkPlan::Shared(shared));
        }

        let forwards = free_ports(DEFAULT_GUEST_PORTS.len())?
            .into_iter()
            .zip(DEFAULT_GUEST_PORTS)
            .map(|(host, guest)| PortForward { host, guest })
            .collect();
        Ok(NetworkPlan::DefaultNat(forwards))
    }

    /// [`NetworkPlan::resolve`] for the current host.
    pub fn for_host(spec: &NetworkSpec) -> Result<Self> {
        Self::resolve(spec, std::env::consts::OS)
    }

    pub fn needs_privileges(&self) -> bool {
        matches!(self, NetworkPlan::Shared(_))
    }

    /// Host-to-guest forwards, empty for shared networking.
    pub fn forwards(&self) -> &[PortForward] {
        match self {
            NetworkPlan::DefaultNat(f) | NetworkPlan::CustomNat(f) => f,
            NetworkPlan::Shared(_) => &[],
        }
    }

    /// Emulator arguments for this plan.
    pub fn args(&self) -> Vec<String> {
        match self {
            NetworkPlan::DefaultNat(forwards) => vec![
                "-device".to_string(),
                format!("e1000,netdev={NAT_NETDEV_ID}"),
                "-netdev".to_string(),
                user_netdev(forwards),
            ],
            NetworkPlan::CustomNat(forwards) => vec![
                "-netdev".to_string(),
                user_netdev(forwards),
                "-device".to_string(),
                format!("e1000,netdev={NAT_NETDEV_ID}"),
            ],
            NetworkPlan::Shared(net) => vec![
                "-netdev".to_string(),
                format!(
                    "vmnet-shared,id={},start-address={},end-address={},subnet-mask={}",
                    SHARED_NETDEV_ID, net.start, net.end, net.subnet_mask
                ),
                "-device".to_string(),
                format!("e1000,netdev={SHARED_NETDEV_ID}"),
            ],
        }
    }
}

fn user_netdev(forwards: &[PortForward]) -> String {
    let mut netdev = format!("user,id={NAT_NETDEV_ID}");
    for f in forwards {
        netdev.push_str(&format!(",hostfwd=tcp::{}-:{}", f.host, f.guest));
    }
    netdev
}
