//! The supervisor: startup/shutdown ordering and the degrade / reconnect /
//! partition-heal state machine. It is also the sole owner
//! of the process-wide `tracing_subscriber` installation and the parsed
//! CLI/env configuration, for the same single-owner reason the replication
//! engine exclusively owns a document's state.

use crate::config::Config;
use crate::error::SdkError;
use crate::event::SupervisorEvent;
use crate::sdk::Sdk;
use crate::wire::{WireBody, WireFrame};
use nahma_auth::{sign, verify, AuthError, ReplayGuard, SignedMessage};
use nahma_awareness::{AwarenessHub, OutboundAwareness};
use nahma_crdt::{CrdtError, Engine, NullBackend, PersistenceBackend, Update};
use nahma_mesh::{DiscoveryBudget, Mesh, RelayTransport, SignalingTransport, StunConfig, Transport, WebRtcTransport};
use nahma_model::{DocId, Document, Identity, PeerId, Topic, TypeTag, Workspace};
use nahma_persist::{PersistError, Store};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

const CONNECTIVITY_POLL: Duration = Duration::from_secs(5);
const SUSTAINED_OUTAGE_TICKS: u32 = 12; // 5s * 12 = 60s.

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn install_tracing(verbose: bool) {
    tracing_log::LogTracer::init().ok();
    let default_level = if verbose { "debug" } else { "info" };
    let env = std::env::var(EnvFilter::DEFAULT_ENV).unwrap_or_else(|_| default_level.to_owned());
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_span_events(FmtSpan::ACTIVE | FmtSpan::CLOSE)
        .with_env_filter(EnvFilter::new(env))
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();
}

/// The signed payload behind a topic join. Only the
/// topic travels in the envelope; the issuing peer and replay fields are
/// supplied by `nahma_auth::sign`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnouncePayload {
    pub topic: [u8; 32],
}

/// Owns the whole running peer: identity, persistence, engine, mesh,
/// awareness, and the background tasks that keep them in sync.
pub struct Supervisor {
    identity: Identity,
    local_peer: PeerId,
    store: Option<Arc<Store>>,
    engine: Arc<Engine>,
    mesh: Arc<Mesh>,
    transports: Vec<Arc<dyn Transport>>,
    sdk: Arc<Sdk>,
    awareness: Arc<AwarenessHub>,
    replay_guard: Mutex<ReplayGuard>,
    open_docs: RwLock<Vec<DocId>>,
    /// The workspace each open document belongs to, so an inbound
    /// announce for that document's topic can be checked against the
    /// right role map.
    doc_workspace: RwLock<HashMap<DocId, Workspace>>,
    events_tx: mpsc::UnboundedSender<SupervisorEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<SupervisorEvent>>>,
}

impl Supervisor {
    /// Runs the startup sequence: identity, persistence, mesh, then every
    /// persisted document is opened and its workspace's peers are
    /// registered as topic members.
    pub async fn start(config: Config) -> anyhow::Result<Arc<Self>> {
        install_tracing(config.verbose);

        let (identity, store) = if config.no_persist {
            (Identity::generate("anonymous", now_ms()), None)
        } else {
            let store = Arc::new(Store::open(&config.state_dir)?);
            let identity = match store.load_identity()? {
                Some(identity) => identity,
                None => {
                    let identity = Identity::generate("anonymous", now_ms());
                    store.store_identity(&identity)?;
                    identity
                }
            };
            (identity, Some(store))
        };
        let local_peer = identity.peer_id();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let backend: Arc<dyn PersistenceBackend> = match &store {
            Some(store) => Arc::new(EventingBackend {
                inner: store.clone(),
                consecutive_failures: std::sync::atomic::AtomicU32::new(0),
                events: events_tx.clone(),
            }),
            None => Arc::new(NullBackend),
        };
        let engine = Arc::new(Engine::new(backend));

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let mut transports: Vec<Arc<dyn Transport>> = Vec::new();

        let webrtc = Arc::new(WebRtcTransport::new(
            StunConfig::from_env_value(&config.stun_servers),
            inbound_tx.clone(),
        ));
        transports.push(webrtc);

        if let Some(raw_url) = &config.signaling_url {
            let signaling_url = url::Url::parse(raw_url)?;
            let signaling = Arc::new(SignalingTransport::new(signaling_url, local_peer));
            let run_signaling = signaling.clone();
            let run_inbound = inbound_tx.clone();
            tokio::spawn(async move { run_signaling.run(run_inbound).await });
            transports.push(signaling);

            // The signaling server also doubles as a relay, reached over its
            // own connection so a relay outage does not tear down signaling.
            let relay_url = url::Url::parse(raw_url)?;
            let relay = Arc::new(RelayTransport::new(relay_url, local_peer));
            let run_relay = relay.clone();
            let run_inbound = inbound_tx.clone();
            tokio::spawn(async move {
                if let Err(err) = run_relay.run(run_inbound).await {
                    tracing::warn!(%err, "relay connection ended");
                }
            });
            transports.push(relay);
        }

        let mesh = Mesh::new(transports.clone(), local_peer, inbound_rx);
        let sdk = Arc::new(Sdk::new(engine.clone(), mesh.clone(), local_peer));
        let (awareness_hub, outbound_awareness) = AwarenessHub::new(local_peer);
        let awareness = Arc::new(awareness_hub);

        let supervisor = Arc::new(Self {
            identity,
            local_peer,
            store,
            engine,
            mesh: mesh.clone(),
            transports,
            sdk: sdk.clone(),
            awareness: awareness.clone(),
            replay_guard: Mutex::new(ReplayGuard::new()),
            open_docs: RwLock::new(Vec::new()),
            doc_workspace: RwLock::new(HashMap::new()),
            events_tx: events_tx.clone(),
            events_rx: Mutex::new(Some(events_rx)),
        });

        supervisor.open_persisted_documents().await?;

        tokio::spawn(dispatch_inbound(supervisor.clone()));
        tokio::spawn(forward_awareness(mesh.clone(), outbound_awareness));
        {
            let awareness = awareness.clone();
            tokio::spawn(async move { awareness.run().await });
        }
        tokio::spawn(supervisor.clone().watch_connectivity());

        Ok(supervisor)
    }

    /// The facade the editor integration drives.
    pub fn sdk(&self) -> Arc<Sdk> {
        self.sdk.clone()
    }

    /// This process's peer id.
    pub fn local_peer(&self) -> PeerId {
        self.local_peer
    }

    /// Takes ownership of the structured event stream. May only be called
    /// once, mirroring `Mesh::subscribe`'s single-handler contract.
    pub async fn events(&self) -> Option<mpsc::UnboundedReceiver<SupervisorEvent>> {
        self.events_rx.lock().await.take()
    }

    async fn open_persisted_documents(&self) -> anyhow::Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        for workspace in store.list_workspaces()? {
            for document in store.list_documents(&workspace.id)? {
                self.open_document(&workspace, &document).await?;
            }
        }
        Ok(())
    }

    /// Opens `document`, starts tracking its awareness, registers every
    /// other workspace member as a topic peer so broadcasts and sync
    /// handshakes have somewhere to go, and announces this peer's
    /// presence to them so the join is authenticated rather than assumed.
    pub async fn open_document(&self, workspace: &Workspace, document: &Document) -> Result<(), CrdtError> {
        self.sdk.open_document(document.id, document.type_tag).await?;
        self.awareness.open_document(document.id).await;
        self.open_docs.write().await.push(document.id);
        self.doc_workspace.write().await.insert(document.id, workspace.clone());

        let topic = Topic::derive(&document.id.to_hex(), None);
        let now = now_ms();
        {
            let mut registry = self.mesh.registry().write().await;
            for peer in workspace.roles.keys() {
                if *peer != self.local_peer {
                    registry.observe(*peer, topic.0, now);
                }
            }
        }
        self.broadcast_announce(document.id).await;
        Ok(())
    }

    /// Signs and broadcasts a topic-join announcement to every member of
    /// the document's topic already known to the registry, so they can
    /// authenticate and register this peer without a central directory.
    async fn broadcast_announce(&self, doc: DocId) {
        let Ok(signed) = self.announce(doc) else {
            return;
        };
        let topic = Topic::derive(&doc.to_hex(), None);
        let frame = WireFrame {
            doc,
            body: WireBody::Announce {
                signed,
                hops_remaining: DiscoveryBudget::default().hop_count,
            },
        };
        self.mesh.broadcast(topic.0, &frame.encode()).await;
    }

    /// Closes `doc`, flushing a final snapshot, and stops tracking it.
    pub async fn close_document(&self, doc: DocId) -> Result<(), CrdtError> {
        self.sdk.close_document(doc).await?;
        self.awareness.close_document(doc).await;
        self.open_docs.write().await.retain(|d| *d != doc);
        Ok(())
    }

    /// Signs a topic-join announcement as this peer.
    pub fn announce(&self, doc: DocId) -> Result<SignedMessage<AnnouncePayload>, AuthError> {
        let topic = Topic::derive(&doc.to_hex(), None);
        sign(
            self.identity.keypair(),
            self.local_peer,
            AnnouncePayload { topic: topic.0 },
            now_ms(),
        )
    }

    /// Verifies and admits a peer's topic-join announcement, rejecting it
    /// (and surfacing [`SupervisorEvent::PeerRejected`]) unless the
    /// signature, replay window, and workspace role map all agree.
    pub async fn admit_announce(
        &self,
        workspace: &Workspace,
        signed: &SignedMessage<AnnouncePayload>,
    ) -> bool {
        let reject = |peer: PeerId| {
            let _ = self.events_tx.send(SupervisorEvent::PeerRejected { peer });
            false
        };
        if verify(signed).is_err() {
            return reject(signed.peer);
        }
        if self.replay_guard.lock().await.check(signed, now_ms()).is_err() {
            return reject(signed.peer);
        }
        if workspace.role_of(signed.peer).is_none() {
            return reject(signed.peer);
        }
        self.mesh
            .registry()
            .write()
            .await
            .observe(signed.peer, signed.payload.topic, now_ms());
        true
    }

    /// Re-broadcasts an admitted announce to this peer's other
    /// already-known topic members, bounded by `hops_remaining` and the
    /// registry's discovery budget — the recursive gossip that lets a
    /// join propagate without every peer connecting to every other.
    async fn propagate_announce(
        &self,
        doc: DocId,
        signed: SignedMessage<AnnouncePayload>,
        hops_remaining: u32,
        received_from: PeerId,
    ) {
        if hops_remaining == 0 {
            return;
        }
        let topic = Topic::derive(&doc.to_hex(), None);
        let budget = DiscoveryBudget::default();
        let targets: Vec<PeerId> = {
            let registry = self.mesh.registry().read().await;
            let others: HashSet<PeerId> = registry
                .topic_peers(topic.0)
                .into_iter()
                .filter(|p| *p != signed.peer && *p != received_from)
                .collect();
            if registry
                .plan_next_hop(&[signed.peer], &HashSet::new(), &budget, hops_remaining)
                .is_empty()
            {
                Vec::new()
            } else {
                others.into_iter().collect()
            }
        };
        if targets.is_empty() {
            return;
        }
        let frame = WireFrame {
            doc,
            body: WireBody::Announce {
                signed,
                hops_remaining: hops_remaining - 1,
            },
        };
        let bytes = frame.encode();
        for peer in targets {
            let _ = self.mesh.send(peer, &bytes).await;
        }
    }

    /// Requests a sync handshake with every peer on `doc`'s topic, in
    /// deterministic pubkey-lexicographic order.
    async fn heal_partition(&self, doc: DocId) {
        let topic = Topic::derive(&doc.to_hex(), None);
        let mut peers = self.mesh.registry().read().await.topic_peers(topic.0);
        peers.sort_by_key(|p| p.0);
        for peer in peers {
            if let Err(err) = self.sdk.request_sync(doc, peer).await {
                tracing::debug!(?doc, ?peer, %err, "sync request failed during partition heal");
            }
        }
    }

    async fn watch_connectivity(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(CONNECTIVITY_POLL);
        let mut degraded = false;
        let mut outage_ticks = 0u32;
        loop {
            ticker.tick().await;
            let peers = self.mesh.registry().read().await.known_peers();
            if peers.is_empty() {
                continue;
            }
            let mut reachable = false;
            'peers: for peer in &peers {
                for transport in &self.transports {
                    if transport.is_reachable(*peer).await {
                        reachable = true;
                        break 'peers;
                    }
                }
            }
            if reachable {
                outage_ticks = 0;
                if degraded {
                    degraded = false;
                    let _ = self.events_tx.send(SupervisorEvent::Reconnected);
                    let docs = self.open_docs.read().await.clone();
                    for doc in docs {
                        self.heal_partition(doc).await;
                    }
                }
            } else {
                outage_ticks += 1;
                if !degraded {
                    degraded = true;
                    let _ = self.events_tx.send(SupervisorEvent::Degraded);
                }
                if outage_ticks == SUSTAINED_OUTAGE_TICKS {
                    let _ = self.events_tx.send(SupervisorEvent::NetworkSustainedOutage);
                }
            }
        }
    }

    /// Stops accepting new work and flushes every open document's final
    /// snapshot, in the order they were opened.
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        let docs = self.open_docs.read().await.clone();
        for doc in docs {
            self.engine.close_document(doc).await?;
        }
        Ok(())
    }
}

/// Wraps a real backend to count consecutive write failures, surfacing
/// [`SupervisorEvent::PersistenceReadOnly`] on the third in a row. Reads are passed through untouched; a single
/// succeeding write resets the count.
struct EventingBackend {
    inner: Arc<Store>,
    consecutive_failures: std::sync::atomic::AtomicU32,
    events: mpsc::UnboundedSender<SupervisorEvent>,
}

impl EventingBackend {
    fn record(&self, result: anyhow::Result<()>) -> anyhow::Result<()> {
        use std::sync::atomic::Ordering;
        match &result {
            Ok(()) => self.consecutive_failures.store(0, Ordering::SeqCst),
            Err(_) => {
                if self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1 == 3 {
                    let _ = self.events.send(SupervisorEvent::PersistenceReadOnly);
                }
            }
        }
        result
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for EventingBackend {
    async fn load_snapshot(&self, doc: DocId) -> anyhow::Result<Option<Vec<u8>>> {
        let result = self.inner.load_snapshot(doc).await;
        if let Err(err) = &result {
            if err.downcast_ref::<PersistError>().is_some_and(|e| matches!(e, PersistError::Quarantined(_))) {
                let _ = self.events.send(SupervisorEvent::DocumentQuarantined { doc });
            }
        }
        result
    }

    async fn store_snapshot(&self, doc: DocId, bytes: Vec<u8>) -> anyhow::Result<()> {
        let result = self.inner.store_snapshot(doc, bytes).await;
        self.record(result)
    }

    async fn append_log(&self, doc: DocId, bytes: Vec<u8>) -> anyhow::Result<()> {
        let result = self.inner.append_log(doc, bytes).await;
        self.record(result)
    }

    async fn load_log(&self, doc: DocId) -> anyhow::Result<Vec<Vec<u8>>> {
        self.inner.load_log(doc).await
    }
}

async fn dispatch_inbound(supervisor: Arc<Supervisor>) {
    let Some(mut inbound) = supervisor.mesh.subscribe().await else {
        tracing::error!("mesh inbound stream already taken; supervisor cannot dispatch");
        return;
    };
    while let Some(frame) = inbound.recv().await {
        let wire = match WireFrame::decode(&frame.bytes) {
            Ok(wire) => wire,
            Err(err) => {
                tracing::debug!(peer = ?frame.peer, %err, "dropping malformed inbound frame");
                continue;
            }
        };
        if let Err(err) = supervisor.apply_wire(frame.peer, wire).await {
            tracing::debug!(peer = ?frame.peer, %err, "failed to apply inbound frame");
        }
    }
}

impl Supervisor {
    async fn apply_wire(&self, from: PeerId, frame: WireFrame) -> Result<(), SdkError> {
        match frame.body {
            WireBody::CrdtUpdate(bytes) => {
                self.sdk.deliver_remote(frame.doc, Update::decode(&bytes)?).await?;
            }
            WireBody::Awareness(bytes) => {
                let _ = self.awareness.apply_remote(frame.doc, &bytes).await;
            }
            WireBody::SyncRequest { state_vector } => {
                self.sdk.respond_sync(frame.doc, from, &state_vector).await?;
            }
            WireBody::SyncResponse { update } => {
                self.sdk.deliver_remote(frame.doc, Update::decode(&update)?).await?;
            }
            WireBody::Announce { signed, hops_remaining } => {
                let Some(workspace) = self.doc_workspace.read().await.get(&frame.doc).cloned() else {
                    return Ok(());
                };
                if self.admit_announce(&workspace, &signed).await {
                    self.propagate_announce(frame.doc, signed, hops_remaining, from).await;
                }
            }
        }
        Ok(())
    }
}

async fn forward_awareness(mesh: Arc<Mesh>, mut outbound: mpsc::UnboundedReceiver<OutboundAwareness>) {
    while let Some((doc, bytes)) = outbound.recv().await {
        let topic = Topic::derive(&doc.to_hex(), None);
        let frame = WireFrame {
            doc,
            body: WireBody::Awareness(bytes),
        };
        let _ = mesh.broadcast(topic.0, &frame.encode()).await;
    }
}
