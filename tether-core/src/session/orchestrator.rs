//! Session orchestration: how a link comes to exist.
//!
//! Exactly one of two paths runs per session, selected by
//! [`SessionRole`]: the host advertises and accepts inbound links, the
//! viewer discovers endpoints and dials the first candidate. Either
//! way the resulting [`Connection`] is handed to the registry; the
//! orchestrator itself only reports progress. It never retries —
//! whether to try again after a failure is the facade's call.

use std::net::SocketAddr;

use tokio::net::{lookup_host, TcpListener};
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::net::connection::Connection;
use crate::net::registry::RegistryHandle;
use crate::role::SessionRole;
use crate::session::events::{SessionEvent, SessionEventSender};

// ── PeerHandle ───────────────────────────────────────────────────

/// What a session is run against: a display name plus a resolvable
/// `host:port` endpoint. For the host path the endpoint is the bind
/// address; for the viewer path it is the discovery target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerHandle {
    pub name: String,
    pub endpoint: String,
}

impl PeerHandle {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
        }
    }
}

// ── SessionOrchestrator ──────────────────────────────────────────

/// Drives one advertise or browse run until it stops or is cancelled.
pub struct SessionOrchestrator {
    registry: RegistryHandle,
    events: SessionEventSender,
}

impl SessionOrchestrator {
    pub fn new(registry: RegistryHandle, events: SessionEventSender) -> Self {
        Self { registry, events }
    }

    /// Run the path selected by `role` until it ends or `shutdown`
    /// fires. Errors never escape; they become `*Stopped` events.
    pub async fn run(&self, role: SessionRole, peer: PeerHandle, shutdown: CancellationToken) {
        match role {
            SessionRole::Host => self.listen_as_host(&peer, &shutdown).await,
            SessionRole::Viewer => self.browse_as_viewer(&peer, &shutdown).await,
        }
    }

    // ── Host path ────────────────────────────────────────────────

    async fn listen_as_host(&self, peer: &PeerHandle, shutdown: &CancellationToken) {
        let listener = match TcpListener::bind(peer.endpoint.as_str()).await {
            Ok(listener) => listener,
            Err(e) => {
                self.emit(SessionEvent::ListenerStopped {
                    reason: Some(format!("bind failed: {e}")),
                })
                .await;
                return;
            }
        };

        let local_addr = match listener.local_addr() {
            Ok(addr) => addr,
            Err(e) => {
                self.emit(SessionEvent::ListenerStopped {
                    reason: Some(e.to_string()),
                })
                .await;
                return;
            }
        };

        info!(%local_addr, "advertising session");
        self.emit(SessionEvent::ListenerRunning { local_addr }).await;

        loop {
            select! {
                _ = shutdown.cancelled() => {
                    debug!("listener cancelled");
                    self.emit(SessionEvent::ListenerStopped { reason: None }).await;
                    return;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, remote)) => {
                        debug!(%remote, "inbound connection attempt");
                        match Connection::establish(stream, &peer.name) {
                            Ok(connection) => {
                                if let Err(e) = self.registry.add(connection).await {
                                    warn!(error = %e, "registry rejected connection");
                                }
                            }
                            Err(e) => warn!(%remote, error = %e, "failed to set up link"),
                        }
                    }
                    Err(e) => {
                        self.emit(SessionEvent::ListenerStopped {
                            reason: Some(format!("accept failed: {e}")),
                        })
                        .await;
                        return;
                    }
                },
            }
        }
    }

    // ── Viewer path ──────────────────────────────────────────────

    async fn browse_as_viewer(&self, peer: &PeerHandle, shutdown: &CancellationToken) {
        self.emit(SessionEvent::BrowserRunning).await;

        let candidate = select! {
            _ = shutdown.cancelled() => {
                self.emit(SessionEvent::BrowserStopped { reason: None }).await;
                return;
            }
            resolved = self.discover(peer) => match resolved {
                Ok(addr) => addr,
                Err(reason) => {
                    self.emit(SessionEvent::BrowserStopped { reason: Some(reason) }).await;
                    return;
                }
            },
        };

        info!(endpoint = %candidate, peer = %peer.name, "dialing");
        self.emit(SessionEvent::Connecting).await;

        let connection = select! {
            _ = shutdown.cancelled() => {
                self.emit(SessionEvent::BrowserStopped { reason: None }).await;
                return;
            }
            dialed = Connection::dial(candidate, &peer.name) => match dialed {
                Ok(connection) => connection,
                Err(e) => {
                    self.emit(SessionEvent::BrowserStopped {
                        reason: Some(format!("connect failed: {e}")),
                    })
                    .await;
                    return;
                }
            },
        };

        if let Err(e) = self.registry.add(connection).await {
            warn!(error = %e, "registry rejected connection");
            self.emit(SessionEvent::BrowserStopped {
                reason: Some(e.to_string()),
            })
            .await;
        }
    }

    /// Resolve the endpoint's candidates and pick the first.
    async fn discover(&self, peer: &PeerHandle) -> Result<SocketAddr, String> {
        let mut candidates = lookup_host(peer.endpoint.as_str())
            .await
            .map_err(|e| format!("discovery failed: {e}"))?;
        candidates
            .next()
            .ok_or_else(|| format!("no endpoint found for {}", peer.endpoint))
    }

    async fn emit(&self, event: SessionEvent) {
        if self.events.send(event).await.is_err() {
            debug!("session event receiver gone");
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct Fixture {
        orchestrator: SessionOrchestrator,
        events: mpsc::Receiver<SessionEvent>,
    }

    fn orchestrator() -> Fixture {
        let (events_tx, events) = mpsc::channel(64);
        let (inbound_tx, _inbound) = mpsc::channel(64);
        let (actor, registry) = crate::net::registry::ConnectionRegistry::new(
            events_tx.clone(),
            inbound_tx,
        );
        actor.spawn();
        Fixture {
            orchestrator: SessionOrchestrator::new(registry, events_tx),
            events,
        }
    }

    async fn next_event(rx: &mut mpsc::Receiver<SessionEvent>) -> SessionEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("event timeout")
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn host_path_accepts_and_registers_inbound_links() {
        let Fixture {
            orchestrator,
            mut events,
        } = orchestrator();
        let shutdown = CancellationToken::new();
        let guard = shutdown.clone();

        let host = tokio::spawn(async move {
            orchestrator
                .run(
                    SessionRole::Host,
                    PeerHandle::new("viewer", "127.0.0.1:0"),
                    guard,
                )
                .await;
        });

        let local_addr = match next_event(&mut events).await {
            SessionEvent::ListenerRunning { local_addr } => local_addr,
            other => panic!("expected ListenerRunning, got {other:?}"),
        };

        let _remote = Connection::dial(local_addr, "host").await.unwrap();

        match next_event(&mut events).await {
            SessionEvent::ConnectionReady { .. } => {}
            other => panic!("expected ConnectionReady, got {other:?}"),
        }

        shutdown.cancel();
        host.await.unwrap();
    }

    #[tokio::test]
    async fn host_cancel_emits_clean_listener_stopped() {
        let Fixture {
            orchestrator,
            mut events,
        } = orchestrator();
        let shutdown = CancellationToken::new();
        let guard = shutdown.clone();

        let host = tokio::spawn(async move {
            orchestrator
                .run(
                    SessionRole::Host,
                    PeerHandle::new("viewer", "127.0.0.1:0"),
                    guard,
                )
                .await;
        });

        next_event(&mut events).await; // running
        shutdown.cancel();

        match next_event(&mut events).await {
            SessionEvent::ListenerStopped { reason } => assert!(reason.is_none()),
            other => panic!("expected ListenerStopped, got {other:?}"),
        }
        host.await.unwrap();
    }

    #[tokio::test]
    async fn viewer_path_emits_progress_then_registers() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            // Keep the host side alive long enough for readiness.
            let _held = Connection::establish(stream, "viewer").unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let Fixture {
            orchestrator,
            mut events,
        } = orchestrator();

        orchestrator
            .run(
                SessionRole::Viewer,
                PeerHandle::new("host", addr.to_string()),
                CancellationToken::new(),
            )
            .await;

        assert!(matches!(
            next_event(&mut events).await,
            SessionEvent::BrowserRunning
        ));
        assert!(matches!(
            next_event(&mut events).await,
            SessionEvent::Connecting
        ));
        assert!(matches!(
            next_event(&mut events).await,
            SessionEvent::ConnectionReady { .. }
        ));
    }

    #[tokio::test]
    async fn viewer_dial_failure_stops_with_reason() {
        // Bind then drop to get an address nobody is listening on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let Fixture {
            orchestrator,
            mut events,
        } = orchestrator();

        orchestrator
            .run(
                SessionRole::Viewer,
                PeerHandle::new("host", addr.to_string()),
                CancellationToken::new(),
            )
            .await;

        assert!(matches!(
            next_event(&mut events).await,
            SessionEvent::BrowserRunning
        ));
        assert!(matches!(
            next_event(&mut events).await,
            SessionEvent::Connecting
        ));
        match next_event(&mut events).await {
            SessionEvent::BrowserStopped { reason } => {
                assert!(reason.unwrap().contains("connect failed"));
            }
            other => panic!("expected BrowserStopped, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unresolvable_endpoint_stops_browser() {
        let Fixture {
            orchestrator,
            mut events,
        } = orchestrator();

        orchestrator
            .run(
                SessionRole::Viewer,
                PeerHandle::new("host", "definitely-not-a-host.invalid:1"),
                CancellationToken::new(),
            )
            .await;

        assert!(matches!(
            next_event(&mut events).await,
            SessionEvent::BrowserRunning
        ));
        match next_event(&mut events).await {
            SessionEvent::BrowserStopped { reason } => assert!(reason.is_some()),
            other => panic!("expected BrowserStopped, got {other:?}"),
        }
    }
}
