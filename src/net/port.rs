//! Port allocation
//! ===============
//!
//! Best-effort, point-in-time selection of a locally unused TCP port: the
//! currently bound TCP connections/listeners and UDP listeners are
//! enumerated, then the first integer at or above the starting port that is
//! absent from that set wins. The final bind can still race with another
//! process; the server start path surfaces that as a start failure rather
//! than hanging.

use netstat2::{AddressFamilyFlags, ProtocolFlags, ProtocolSocketInfo};

use crate::error::{PgEmbedError, PgEmbedResult};

/// Default lower bound of the port scan.
pub const DEFAULT_PORT_SCAN_START: u16 = 5500;

/// Every local port at or above `starting_port` with a bound TCP socket
/// (connection or listener) or UDP listener, unsorted.
pub fn bound_ports(starting_port: u16) -> PgEmbedResult<Vec<u16>> {
    let af_flags = AddressFamilyFlags::IPV4 | AddressFamilyFlags::IPV6;
    let proto_flags = ProtocolFlags::TCP | ProtocolFlags::UDP;

    let sockets = netstat2::get_sockets_info(af_flags, proto_flags).map_err(|e| {
        PgEmbedError::InvalidConfig {
            field: "port",
            reason: format!("failed to enumerate bound ports: {e}"),
        }
    })?;

    Ok(sockets
        .into_iter()
        .map(|socket| match socket.protocol_socket_info {
            ProtocolSocketInfo::Tcp(tcp) => tcp.local_port,
            ProtocolSocketInfo::Udp(udp) => udp.local_port,
        })
        .filter(|port| *port >= starting_port)
        .collect())
}

/// Pure scan: the first port in `starting_port..=u16::MAX` not present in
/// `bound`, or `None` when the whole range is taken.
pub fn first_free_port(bound: &[u16], starting_port: u16) -> Option<u16> {
    let mut taken = bound.to_vec();
    taken.sort_unstable();
    taken.dedup();

    let mut candidate = starting_port;
    for port in taken {
        if port > candidate {
            break;
        }
        if port == candidate {
            if candidate == u16::MAX {
                return None;
            }
            candidate += 1;
        }
    }
    Some(candidate)
}

/// Enumerate and scan in one step. Exhaustion of the 16-bit range is a fatal
/// construction error for callers.
pub fn allocate(starting_port: u16) -> PgEmbedResult<u16> {
    let bound = bound_ports(starting_port)?;
    first_free_port(&bound, starting_port).ok_or_else(|| PgEmbedError::InvalidConfig {
        field: "port",
        reason: format!("no free TCP port at or above {starting_port}"),
    })
}
