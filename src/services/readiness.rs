use crate::domain::{ContainerRuntime, ProvisioningError, ReadinessProbe, ServiceSpec};
use anyhow::Result;
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const MIN_CONNECT_TIMEOUT: Duration = Duration::from_millis(50);
const MAX_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);
const PAUSE_SLICE: Duration = Duration::from_millis(50);

/// Polls the service's readiness probe until it passes or the retries run out.
/// Services without a probe are considered ready immediately. Raising
/// `interrupt` ends the wait before the next attempt.
pub fn wait_until_ready(
    runtime: &dyn ContainerRuntime,
    spec: &ServiceSpec,
    interrupt: &AtomicBool,
) -> Result<(), ProvisioningError> {
    let Some(probe) = spec.readiness() else {
        debug!("Service '{}' has no readiness probe", spec.name());
        return Ok(());
    };

    info!("Waiting for '{}' to become ready...", spec.name());

    let attempts = probe.retries().max(1);
    let interrupted = || ProvisioningError::Interrupted {
        service: spec.name().to_string(),
    };

    for attempt in 1..=attempts {
        if interrupt.load(Ordering::SeqCst) {
            return Err(interrupted());
        }

        match check(runtime, spec.name(), probe) {
            Ok(true) => {
                info!("'{}' is ready", spec.name());
                return Ok(());
            }
            Ok(false) => debug!(
                "'{}' not ready yet (attempt {attempt}/{attempts})",
                spec.name()
            ),
            Err(e) => warn!("Readiness check for '{}' errored: {:#}", spec.name(), e),
        }

        if attempt < attempts && !pause(probe.interval(), interrupt) {
            return Err(interrupted());
        }
    }

    Err(ProvisioningError::NotReady {
        service: spec.name().to_string(),
        attempts,
    })
}

fn check(runtime: &dyn ContainerRuntime, name: &str, probe: &ReadinessProbe) -> Result<bool> {
    match probe {
        ReadinessProbe::Tcp { port, interval, .. } => Ok(tcp_reachable(
            *port,
            (*interval).clamp(MIN_CONNECT_TIMEOUT, MAX_CONNECT_TIMEOUT),
        )),
        ReadinessProbe::Command { command, .. } => runtime.exec(name, command),
    }
}

/// Whether something accepts connections on `127.0.0.1:port`.
pub fn tcp_reachable(port: u16, timeout: Duration) -> bool {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    TcpStream::connect_timeout(&addr, timeout).is_ok()
}

/// Sleeps for `duration` in short slices. `false` when `interrupt` was
/// raised before the time was up.
pub fn pause(duration: Duration, interrupt: &AtomicBool) -> bool {
    let deadline = Instant::now() + duration;

    loop {
        if interrupt.load(Ordering::SeqCst) {
            return false;
        }

        let now = Instant::now();
        if now >= deadline {
            return true;
        }

        thread::sleep((deadline - now).min(PAUSE_SLICE));
    }
}

/// Fixed wait after the last start. A coarse stand-in for services that
/// declare no probe.
pub fn settle(delay: Duration, interrupt: &AtomicBool) -> bool {
    if !delay.is_zero() {
        debug!("Settling for {:?}", delay);
    }

    pause(delay, interrupt)
}
