//! Ephemeral local port allocation for default NAT forwarding.

use std::net::{Ipv4Addr, TcpListener};

use gom_core::error::{MachineError, Result};

/// Ask the kernel for `count` distinct TCP ports that are currently free.
///
/// Every listener is held until all ports are collected, so the kernel cannot
/// hand out the same port twice. The listeners are closed on return; the
/// ports are free but not reserved.
pub fn free_ports(count: usize) -> Result<Vec<u16>> {
    let mut listeners = Vec::with_capacity(count);

    for _ in 0..count {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .map_err(|e| MachineError::PortAllocation(format!("failed to bind: {}", e)))?;
        listeners.push(listener);
    }

    let ports = listeners
        .iter()
        .map(|l| {
            l.local_addr()
                .map(|addr| addr.port())
                .map_err(|e| MachineError::PortAllocation(format!("failed to read address: {}", e)))
        })
        .collect::<Result<Vec<u16>>>()?;

    tracing::debug!(?ports, "Allocated free local ports");

    Ok(ports)
}
