//! `foca`-backed [`GossipTransport`].
//!
//! `foca` implements SWIM sans I/O: it hands us bytes to send and timers to
//! schedule through a `Runtime` we provide, and we feed it incoming bytes
//! and elapsed timers in return. This module is the glue -- a UDP socket, a
//! timer wheel, and a `Runtime` impl that buffers `foca`'s requests so the
//! driving task can drain them after each call.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use foca::{Config, Foca, Identity, Notification, Runtime, Timer};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::gossip::{GossipEvent, GossipTransport, LocalDataSource};

/// SWIM protocol bytes, handed straight to `Foca::handle_data`.
const TAG_SWIM: u8 = 0;
/// An application meta payload broadcast out-of-band from SWIM itself.
const TAG_META: u8 = 1;
/// A reliable point-to-point application payload (the recovery/catch-up
/// unicast path).
const TAG_UNICAST: u8 = 2;

/// Foca peer identity: the node name plus the socket it gossips from.
/// `renew` is a no-op -- node names are stable across restarts by design
/// (see corelib's `NodeId` doc comment), so there's no incarnation bump to
/// perform beyond what `foca`'s own sequence numbers already provide.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PeerIdentity {
    pub name: String,
    pub addr: SocketAddr,
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.addr)
    }
}

impl Identity for PeerIdentity {
    fn renew(&self) -> Option<Self> {
        None
    }
}

/// Buffers everything `Foca` asks the runtime to do during a single call,
/// so the driving loop can act on them afterwards without re-entering
/// `Foca` from inside the trait callback.
struct BufferedRuntime {
    to_send: Vec<(PeerIdentity, Vec<u8>)>,
    timers: Vec<(Duration, Timer<PeerIdentity>)>,
    events: Vec<GossipEvent>,
}

impl BufferedRuntime {
    fn new() -> Self {
        Self {
            to_send: Vec::new(),
            timers: Vec::new(),
            events: Vec::new(),
        }
    }

    fn drain(&mut self) -> (Vec<(PeerIdentity, Vec<u8>)>, Vec<(Duration, Timer<PeerIdentity>)>, Vec<GossipEvent>) {
        (
            std::mem::take(&mut self.to_send),
            std::mem::take(&mut self.timers),
            std::mem::take(&mut self.events),
        )
    }
}

impl Runtime<PeerIdentity> for BufferedRuntime {
    fn notify(&mut self, notification: Notification<PeerIdentity>) {
        match notification {
            Notification::MemberUp(id) => self.events.push(GossipEvent::Joined { peer: id.name }),
            Notification::MemberDown(id) => self.events.push(GossipEvent::Left { peer: id.name }),
            Notification::Rename(_, new) => self.events.push(GossipEvent::Updated { peer: new.name }),
            _ => {}
        }
    }

    fn send_to(&mut self, to: PeerIdentity, data: &[u8]) {
        self.to_send.push((to, data.to_vec()));
    }

    fn submit_after(&mut self, event: Timer<PeerIdentity>, after: Duration) {
        self.timers.push((after, event));
    }
}

/// `foca`-backed transport. One instance per node process.
pub struct FocaTransport {
    identity: PeerIdentity,
    foca: Arc<Mutex<Foca<PeerIdentity, foca::postcard::Codec, StdRng>>>,
    socket: Arc<UdpSocket>,
    cancel: CancellationToken,
    driver: Mutex<Option<JoinHandle<()>>>,
    event_tx: mpsc::Sender<GossipEvent>,
    state_tx: mpsc::Sender<(PeerIdentity, Vec<u8>)>,
}

impl FocaTransport {
    /// Bind the gossip socket and start the driving task. Returns the
    /// transport plus the receiving end of its event channel.
    pub async fn bind(
        identity: PeerIdentity,
        data: Arc<dyn LocalDataSource>,
    ) -> Result<(Arc<Self>, mpsc::Receiver<GossipEvent>)> {
        let socket = UdpSocket::bind(identity.addr)
            .await
            .map_err(|e| Error::Transport(format!("binding gossip socket: {e}")))?;
        let config = Config::simple();
        let foca = Foca::new(
            identity.clone(),
            config,
            StdRng::from_entropy(),
            foca::postcard::Codec::default(),
        );

        let (event_tx, event_rx) = mpsc::channel(64);
        let (state_tx, state_rx) = mpsc::channel::<(PeerIdentity, Vec<u8>)>(64);

        let transport = Arc::new(Self {
            identity,
            foca: Arc::new(Mutex::new(foca)),
            socket: Arc::new(socket),
            cancel: CancellationToken::new(),
            driver: Mutex::new(None),
            event_tx,
            state_tx,
        });

        let handle = transport.clone().spawn_driver(data, state_rx);
        *transport.driver.lock() = Some(handle);

        Ok((transport, event_rx))
    }

    fn spawn_driver(
        self: Arc<Self>,
        data: Arc<dyn LocalDataSource>,
        mut state_rx: mpsc::Receiver<(PeerIdentity, Vec<u8>)>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut recv_buf = vec![0u8; 64 * 1024];
            let mut timer_tick = tokio::time::interval(Duration::from_millis(200));
            let mut meta_tick = tokio::time::interval(Duration::from_secs(2));

            loop {
                tokio::select! {
                    _ = self.cancel.cancelled() => {
                        debug!(node = %self.identity.name, "gossip driver shutting down");
                        break;
                    }
                    Some((target, bytes)) = state_rx.recv() => {
                        let mut framed = Vec::with_capacity(bytes.len() + 1);
                        framed.push(TAG_UNICAST);
                        framed.extend_from_slice(&bytes);
                        if let Err(e) = self.socket.send_to(&framed, target.addr).await {
                            warn!(node = %self.identity.name, %target, error = %e, "reliable send failed");
                        }
                    }
                    recv = self.socket.recv_from(&mut recv_buf) => {
                        match recv {
                            Ok((n, _from)) => self.handle_incoming(&recv_buf[..n]).await,
                            Err(e) => warn!(node = %self.identity.name, error = %e, "gossip recv error"),
                        }
                    }
                    _ = timer_tick.tick() => {
                        self.drain_and_dispatch(|foca, rt| foca.handle_timer(Timer::PeriodicGossip, rt)).await;
                    }
                    _ = meta_tick.tick() => {
                        self.publish_meta(&data).await;
                    }
                }
            }
        })
    }

    /// Gossip the local meta payload to every currently-known member.
    /// Best-effort and out-of-band from SWIM's own anti-entropy -- this is
    /// what lets a peer notice our ranges changed without waiting for the
    /// next ping/ack cycle to carry it as piggybacked data.
    async fn publish_meta(&self, data: &Arc<dyn LocalDataSource>) {
        let bytes = data.local_meta();
        if bytes.is_empty() {
            return;
        }
        let targets: Vec<SocketAddr> = self.foca.lock().iter_members().map(|m| m.addr).collect();
        let mut framed = Vec::with_capacity(bytes.len() + 1);
        framed.push(TAG_META);
        framed.extend_from_slice(&bytes);
        for addr in targets {
            if let Err(e) = self.socket.send_to(&framed, addr).await {
                trace!(node = %self.identity.name, %addr, error = %e, "meta heartbeat send failed");
            }
        }
    }

    async fn handle_incoming(&self, bytes: &[u8]) {
        let Some((&tag, rest)) = bytes.split_first() else {
            return;
        };
        match tag {
            TAG_SWIM => {
                let rest = rest.to_vec();
                self.drain_and_dispatch(move |foca, rt| foca.handle_data(&rest, rt))
                    .await;
            }
            TAG_META => {
                let _ = self.event_tx.try_send(GossipEvent::MetaReceived {
                    bytes: rest.to_vec(),
                });
            }
            TAG_UNICAST => {
                let _ = self.event_tx.try_send(GossipEvent::UnicastReceived {
                    bytes: rest.to_vec(),
                });
            }
            other => warn!(node = %self.identity.name, tag = other, "unrecognised gossip frame tag"),
        }
    }

    /// Run a `Foca` call under the lock, then act on whatever it buffered:
    /// forward events, fire outbound sends, and schedule timers.
    async fn drain_and_dispatch<F>(&self, call: F)
    where
        F: FnOnce(&mut Foca<PeerIdentity, foca::postcard::Codec, StdRng>, &mut BufferedRuntime),
    {
        let (to_send, timers, events) = {
            let mut foca = self.foca.lock();
            let mut rt = BufferedRuntime::new();
            call(&mut foca, &mut rt);
            rt.drain()
        };

        for (target, bytes) in to_send {
            let mut framed = Vec::with_capacity(bytes.len() + 1);
            framed.push(TAG_SWIM);
            framed.extend_from_slice(&bytes);
            if let Err(e) = self.socket.send_to(&framed, target.addr).await {
                trace!(node = %self.identity.name, %target, error = %e, "best-effort send failed");
            }
        }
        for (after, timer) in timers {
            let foca = self.foca.clone();
            let socket = self.socket.clone();
            let identity = self.identity.clone();
            tokio::spawn(async move {
                tokio::time::sleep(after).await;
                let (to_send, _, _) = {
                    let mut foca = foca.lock();
                    let mut rt = BufferedRuntime::new();
                    let _ = foca.handle_timer(timer, &mut rt);
                    rt.drain()
                };
                for (target, bytes) in to_send {
                    let mut framed = Vec::with_capacity(bytes.len() + 1);
                    framed.push(TAG_SWIM);
                    framed.extend_from_slice(&bytes);
                    if let Err(e) = socket.send_to(&framed, target.addr).await {
                        trace!(node = %identity.name, %target, error = %e, "timer-driven send failed");
                    }
                }
            });
        }
        for event in events {
            let _ = self.event_tx.try_send(event);
        }
    }
}

#[async_trait]
impl GossipTransport for FocaTransport {
    async fn join(&self, peers: &[String]) -> Result<usize> {
        let mut joined = 0;
        for peer in peers {
            let addr: SocketAddr = peer
                .parse()
                .map_err(|e| Error::Join(format!("invalid peer address {peer}: {e}")))?;
            let target = PeerIdentity {
                name: peer.clone(),
                addr,
            };
            self.drain_and_dispatch(|foca, rt| {
                let _ = foca.announce(target, rt);
            })
            .await;
            joined += 1;
        }
        Ok(joined)
    }

    fn broadcast_meta(&self, bytes: Vec<u8>) {
        let foca = self.foca.clone();
        let socket = self.socket.clone();
        let identity = self.identity.clone();
        tokio::spawn(async move {
            let targets: Vec<SocketAddr> = foca.lock().iter_members().map(|m| m.addr).collect();
            let mut framed = Vec::with_capacity(bytes.len() + 1);
            framed.push(TAG_META);
            framed.extend_from_slice(&bytes);
            for addr in targets {
                if let Err(e) = socket.send_to(&framed, addr).await {
                    trace!(node = %identity.name, %addr, error = %e, "meta broadcast send failed");
                }
            }
        });
    }

    fn members(&self) -> Vec<String> {
        self.foca
            .lock()
            .iter_members()
            .map(|m| m.name.clone())
            .collect()
    }

    async fn send_reliable(&self, target: &str, bytes: Vec<u8>) -> Result<()> {
        let addr: SocketAddr = target
            .parse()
            .map_err(|e| Error::Transport(format!("invalid unicast target {target}: {e}")))?;
        let identity = PeerIdentity {
            name: target.to_string(),
            addr,
        };
        self.state_tx
            .send((identity, bytes))
            .await
            .map_err(|e| Error::Transport(format!("reliable send queue closed: {e}")))
    }

    async fn leave(&self, grace: Duration) -> Result<()> {
        self.drain_and_dispatch(|foca, rt| {
            let _ = foca.leave_cluster(rt);
        })
        .await;
        tokio::time::sleep(grace).await;
        Ok(())
    }

    async fn shutdown(&self) {
        self.cancel.cancel();
        if let Some(handle) = self.driver.lock().take() {
            let _ = handle.await;
        }
    }
}

