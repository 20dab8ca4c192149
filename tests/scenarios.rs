//! End-to-end scenarios run against the lower-level crates directly, with
//! in-memory persistence and no real network, so they run fast and
//! deterministically.

use nahma::wire::{WireBody, WireFrame};
use nahma_auth::{sign, verify, ReplayGuard};
use nahma_crdt::{Engine, NullBackend, View};
use nahma_model::{DocId, EncryptionKey, Identity, Invite, Keypair, PeerId, Role, TypeTag, Workspace, WorkspaceId};
use std::sync::Arc;

fn peer_with_identity() -> (Identity, PeerId) {
    let identity = Identity::generate("tester", 0);
    let peer = identity.peer_id();
    (identity, peer)
}

fn engine() -> Arc<Engine> {
    Arc::new(Engine::new(Arc::new(NullBackend)))
}

fn text_of(view: View<'_>) -> String {
    match view {
        View::Text(s) => s,
        _ => panic!("expected a text view"),
    }
}

/// Scenario 1: two peers join the same topic and insert concurrently; after
/// exchanging a diff both converge to byte-identical state.
#[tokio::test]
async fn two_peer_sync_converges() {
    let doc = DocId::generate();
    let (_, peer_a) = peer_with_identity();
    let (_, peer_b) = peer_with_identity();

    let engine_a = engine();
    let engine_b = engine();
    engine_a.open_document(doc, TypeTag::Text).await.unwrap();
    engine_b.open_document(doc, TypeTag::Text).await.unwrap();

    let update_a = engine_a
        .apply_local(doc, peer_a, |tx| tx.insert_str(0, "Hello "))
        .await
        .unwrap();
    let update_b = engine_b
        .apply_local(doc, peer_b, |tx| tx.insert_str(0, "World"))
        .await
        .unwrap();

    engine_a.apply_remote(doc, &update_b).await.unwrap();
    engine_b.apply_remote(doc, &update_a).await.unwrap();

    let view_a = engine_a.view(doc, text_of).await.unwrap();
    let view_b = engine_b.view(doc, text_of).await.unwrap();
    assert_eq!(view_a, view_b);

    let sv_a = engine_a.state_vector(doc).await.unwrap();
    let sv_b = engine_b.state_vector(doc).await.unwrap();
    assert_eq!(sv_a, sv_b);
}

/// Scenario 2: a three-way partition heals by exchanging diffs since each
/// side's last known state vector; every character from both partitions
/// survives exactly once.
#[tokio::test]
async fn partition_heal_merges_both_sides() {
    let doc = DocId::generate();
    let (_, peer_a) = peer_with_identity();
    let (_, peer_c) = peer_with_identity();

    let engine_a = engine();
    let engine_c = engine();
    engine_a.open_document(doc, TypeTag::Text).await.unwrap();
    engine_c.open_document(doc, TypeTag::Text).await.unwrap();

    let update_a = engine_a
        .apply_local(doc, peer_a, |tx| tx.insert_str(0, "aaaaaaaaaa"))
        .await
        .unwrap();
    let update_c = engine_c
        .apply_local(doc, peer_c, |tx| tx.insert_str(0, "cccccccccc"))
        .await
        .unwrap();

    // Heal: each side asks for everything newer than its own state vector
    // and applies the answering diff.
    let sv_a = engine_a.state_vector(doc).await.unwrap();
    let sv_c = engine_c.state_vector(doc).await.unwrap();
    let diff_for_a = engine_c.diff_since(doc, &sv_a).await.unwrap();
    let diff_for_c = engine_a.diff_since(doc, &sv_c).await.unwrap();
    engine_a.apply_remote(doc, &diff_for_a).await.unwrap();
    engine_c.apply_remote(doc, &diff_for_c).await.unwrap();

    let sv_a_after = engine_a.state_vector(doc).await.unwrap();
    let sv_c_after = engine_c.state_vector(doc).await.unwrap();
    assert_eq!(sv_a_after, sv_c_after);

    // Sanity: the merged log is a superset of both partitions' updates and
    // nothing is duplicated, via the no-op-reapply invariant.
    let before = engine_a.view(doc, text_of).await.unwrap();
    engine_a.apply_remote(doc, &update_a).await.unwrap();
    engine_a.apply_remote(doc, &update_c).await.unwrap();
    let after = engine_a.view(doc, text_of).await.unwrap();
    assert_eq!(before, after, "reapplying already-seen updates must be a no-op");
}

/// Scenario 3: a peer whose key is absent from the workspace's role map is
/// rejected by the running supervisor's admission path, which also
/// surfaces a `PeerRejected` event for the observability layer.
#[tokio::test]
async fn authenticated_join_rejects_unknown_peer() {
    use nahma::config::Config;
    use nahma::supervisor::AnnouncePayload;
    use nahma::{Supervisor, SupervisorEvent};
    use nahma_model::{Document, Topic};

    let config = Config {
        port: 0,
        no_persist: true,
        verbose: false,
        state_dir: std::path::PathBuf::new(),
        stun_servers: String::new(),
        signaling_url: None,
    };
    let supervisor = Supervisor::start(config).await.unwrap();
    let mut events = supervisor.events().await.unwrap();

    let workspace = Workspace::create("docs", supervisor.local_peer(), 0);
    let document = Document::new("notes", TypeTag::Text, workspace.id.clone(), None, 0);
    supervisor.open_document(&workspace, &document).await.unwrap();

    let stranger_keypair = Keypair::generate();
    let stranger = stranger_keypair.peer_id();
    let topic = Topic::derive(&document.id.to_hex(), None);
    let signed = sign(&stranger_keypair, stranger, AnnouncePayload { topic: topic.0 }, 1_000).unwrap();

    assert!(verify(&signed).is_ok(), "signature itself is valid");
    assert!(!supervisor.admit_announce(&workspace, &signed).await);

    match events.recv().await.unwrap() {
        SupervisorEvent::PeerRejected { peer } => assert_eq!(peer, stranger),
        other => panic!("expected PeerRejected, got {other:?}"),
    }
}

/// Scenario 4: `WireFrame` encode/decode round-trips a sync handshake's
/// request and response bodies byte-for-byte. This only exercises the
/// codec layer — no transport, mesh routing, or WebRTC/relay migration is
/// involved here.
#[tokio::test]
async fn sync_request_and_response_round_trip_through_the_wire_codec() {
    let doc = DocId::generate();
    let engine = engine();
    let (_, peer_a) = peer_with_identity();
    engine.open_document(doc, TypeTag::Text).await.unwrap();
    engine
        .apply_local(doc, peer_a, |tx| tx.insert_str(0, "relayed"))
        .await
        .unwrap();

    let state_vector = Vec::new();
    let request = WireFrame {
        doc,
        body: WireBody::SyncRequest { state_vector: state_vector.clone() },
    };
    let decoded = WireFrame::decode(&request.encode()).unwrap();
    let WireBody::SyncRequest { state_vector: decoded_sv } = decoded.body else {
        panic!("wrong variant");
    };
    assert_eq!(decoded.doc, doc);
    assert_eq!(decoded_sv, state_vector);

    let diff = engine.diff_since(doc, &decoded_sv).await.unwrap();
    let response = WireFrame {
        doc,
        body: WireBody::SyncResponse { update: diff.encode().unwrap() },
    };
    let decoded = WireFrame::decode(&response.encode()).unwrap();
    let WireBody::SyncResponse { update } = decoded.body else {
        panic!("wrong variant");
    };
    assert_eq!(update, diff.encode().unwrap());
}

/// Scenario 5: committing 50 local edits, then "restarting" without a clean
/// close (no final snapshot, only the append-only log), reproduces
/// byte-identical state by replaying the log on reopen.
#[tokio::test]
async fn restart_replay_reproduces_pre_crash_state() {
    use nahma_crdt::PersistenceBackend;

    #[derive(Default)]
    struct MemoryBackend {
        snapshots: tokio::sync::Mutex<std::collections::HashMap<DocId, Vec<u8>>>,
        log: tokio::sync::Mutex<std::collections::HashMap<DocId, Vec<Vec<u8>>>>,
    }

    #[async_trait::async_trait]
    impl PersistenceBackend for MemoryBackend {
        async fn load_snapshot(&self, doc: DocId) -> anyhow::Result<Option<Vec<u8>>> {
            Ok(self.snapshots.lock().await.get(&doc).cloned())
        }
        async fn store_snapshot(&self, doc: DocId, bytes: Vec<u8>) -> anyhow::Result<()> {
            self.snapshots.lock().await.insert(doc, bytes);
            self.log.lock().await.remove(&doc);
            Ok(())
        }
        async fn append_log(&self, doc: DocId, bytes: Vec<u8>) -> anyhow::Result<()> {
            self.log.lock().await.entry(doc).or_default().push(bytes);
            Ok(())
        }
        async fn load_log(&self, doc: DocId) -> anyhow::Result<Vec<Vec<u8>>> {
            Ok(self.log.lock().await.get(&doc).cloned().unwrap_or_default())
        }
    }

    let backend = Arc::new(MemoryBackend::default());
    let doc = DocId::generate();
    let (_, peer) = peer_with_identity();

    let engine = Engine::new(backend.clone());
    engine.open_document(doc, TypeTag::Text).await.unwrap();
    for i in 0..50 {
        engine
            .apply_local(doc, peer, move |tx| tx.insert_char(i, 'x'))
            .await
            .unwrap();
    }
    let state_vector_before = engine.state_vector(doc).await.unwrap();
    let view_before = engine.view(doc, text_of).await.unwrap();
    // No `close_document`: this is a crash, not a clean shutdown, so nothing
    // snapshots and the 50 edits exist only in the backend's append log.
    drop(engine);

    let restarted = Engine::new(backend);
    restarted.open_document(doc, TypeTag::Text).await.unwrap();
    let state_vector_after = restarted.state_vector(doc).await.unwrap();
    let view_after = restarted.view(doc, text_of).await.unwrap();

    assert_eq!(state_vector_before, state_vector_after);
    assert_eq!(view_before, view_after);
}

/// Scenario 6: the invite URI round-trips through its exact bit-for-bit
/// form.
#[test]
fn invite_round_trips_exact_uri_form() {
    const KEY_B64: &str = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=";
    let workspace = WorkspaceId::from_hex("abcd1234abcd1234").unwrap();
    let key = EncryptionKey::from_base64(KEY_B64).unwrap();
    let invite = Invite::new(workspace.clone(), key, Role::Editor);

    let uri = invite.to_uri();
    assert_eq!(uri, format!("nightjar://w/abcd1234abcd1234#k:{KEY_B64}&perm:editor"));

    let parsed = Invite::parse(&uri).unwrap();
    assert_eq!(parsed.workspace, workspace);
    assert_eq!(parsed.role, Role::Editor);
}

/// A peer admitted under a forged timestamp outside the replay window is
/// rejected even with an otherwise-valid signature.
#[tokio::test]
async fn replay_guard_rejects_stale_timestamp() {
    let keypair = Keypair::generate();
    let peer = keypair.peer_id();
    let signed = sign(&keypair, peer, 7u32, 0).unwrap();

    let mut guard = ReplayGuard::new();
    let far_future = 60 * 60 * 1000; // 1 hour later, outside the +/-5 minute window.
    assert!(guard.check(&signed, far_future).is_err());
}
