//! Readiness probe
//! ===============
//!
//! Polls raw TCP connectivity until the server's listening socket accepts a
//! connection. Deliberately a liveness check only: a successful connect
//! proves the socket is accepting, not that the engine has finished recovery
//! or replay.

use std::{
    net::{TcpStream, ToSocketAddrs},
    time::{Duration, Instant},
};

use crate::error::{PgEmbedError, PgEmbedResult};

/// Wait between consecutive connection attempts.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

const CONNECT_TIMEOUT: Duration = Duration::from_millis(500);

/// Poll `(host, port)` every [`POLL_INTERVAL`] until a TCP connect succeeds
/// or `timeout` elapses, in which case [`PgEmbedError::StartTimeout`] names
/// the elapsed wait.
pub fn wait_until_ready(host: &str, port: u16, timeout: Duration) -> PgEmbedResult<()> {
    wait_until_ready_with(host, port, timeout, || Ok(()))
}

/// [`wait_until_ready`] with a check run between polls that can fail the
/// wait early, for callers who can tell the start is already lost (e.g. the
/// launching process died).
pub fn wait_until_ready_with(
    host: &str,
    port: u16,
    timeout: Duration,
    mut check: impl FnMut() -> PgEmbedResult<()>,
) -> PgEmbedResult<()> {
    let started = Instant::now();
    let deadline = started + timeout;

    loop {
        if try_connect(host, port) {
            crate::trace!(
                "server at {host}:{port} became reachable after {:?}",
                started.elapsed()
            );
            return Ok(());
        }

        check()?;

        if Instant::now() >= deadline {
            return Err(PgEmbedError::StartTimeout {
                waited: started.elapsed(),
            });
        }

        std::thread::sleep(POLL_INTERVAL);
    }
}

fn try_connect(host: &str, port: u16) -> bool {
    let Ok(addrs) = (host, port).to_socket_addrs() else {
        return false;
    };
    for addr in addrs {
        if TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT).is_ok() {
            return true;
        }
    }
    false
}
