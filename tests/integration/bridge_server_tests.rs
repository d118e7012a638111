//! Terminal bridge server over real sockets, exercised through the remote
//! transports.

use std::time::Duration;

use bytes::Bytes;
use orc_supervisor::bridge::protocol::{ClientFrame, SessionSummary};
use orc_supervisor::bridge::viewer::{PollTransport, StreamTransport};
use orc_supervisor::bridge::{self, HttpPollTransport, InputBody, WsStreamTransport};
use orc_supervisor::host::TermSize;
use orc_supervisor::models::session::SessionStatus;
use orc_supervisor::AppError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::test_helpers::{harness, wait_until, Harness};

struct Server {
    addr: std::net::SocketAddr,
    ct: CancellationToken,
    join: JoinHandle<()>,
}

impl Server {
    fn http(&self) -> String {
        format!("http://{}", self.addr)
    }

    fn ws(&self) -> String {
        format!("ws://{}", self.addr)
    }

    async fn stop(self) {
        self.ct.cancel();
        // Upgraded sockets may outlive graceful shutdown; don't wait on them.
        if tokio::time::timeout(Duration::from_secs(2), self.join)
            .await
            .is_err()
        {
            eprintln!("bridge server still draining connections");
        }
    }
}

async fn start(h: &Harness) -> Server {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    let ct = CancellationToken::new();
    let registry = h.registry.clone();
    let server_ct = ct.clone();
    let join = tokio::spawn(async move {
        bridge::serve(listener, registry, server_ct)
            .await
            .expect("serve");
    });
    Server { addr, ct, join }
}

async fn spawned(name: &str) -> (Harness, u64) {
    let h = harness();
    let ws = h.workspace(name);
    h.registry.spawn(name, &ws).await.expect("spawn");
    let id = h.process_id(name).await;
    (h, id)
}

#[tokio::test]
async fn health_and_session_listing() {
    let (h, id) = spawned("alpha").await;
    let beta = h.workspace("beta");
    h.registry.spawn("beta", &beta).await.expect("spawn beta");
    h.host.mark_dead_silently(h.process_id("beta").await);
    let server = start(&h).await;

    let health = reqwest::get(format!("{}/health", server.http()))
        .await
        .expect("health");
    assert!(health.status().is_success());
    assert_eq!(health.text().await.expect("body"), "ok");

    let rows: Vec<SessionSummary> = reqwest::get(format!("{}/sessions", server.http()))
        .await
        .expect("sessions")
        .json()
        .await
        .expect("json");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].name, "alpha");
    assert_eq!(rows[0].status, SessionStatus::Active);
    assert!(rows[0].alive);
    assert_eq!(rows[1].name, "beta");
    assert!(!rows[1].alive, "liveness is observed, not declared");

    assert!(h.host.alive(id));
    server.stop().await;
}

#[tokio::test]
async fn polling_endpoints_serve_snapshot_and_accept_input() {
    let (h, id) = spawned("alpha").await;
    h.host.set_screen(id, "\x1b[1mbold\x1b[0m prompt$ ");
    let server = start(&h).await;
    let poll = HttpPollTransport::new(server.http());

    let snapshot = poll.fetch("alpha").await.expect("snapshot");
    assert_eq!(snapshot.content, "\x1b[1mbold\x1b[0m prompt$ ");

    poll.submit(
        "alpha",
        InputBody {
            data: "echo hi\r".into(),
        },
    )
    .await
    .expect("submit");
    assert_eq!(h.host.inputs(id), vec![b"echo hi\r".to_vec()]);

    let err = poll.fetch("ghost").await.unwrap_err();
    assert!(matches!(err, AppError::StreamDropped(_)), "got {err}");
    server.stop().await;
}

#[tokio::test]
async fn websocket_streams_output_input_and_resize() {
    let (h, id) = spawned("alpha").await;
    let server = start(&h).await;
    let stream = WsStreamTransport::new(server.ws());

    let mut channel = stream.open("alpha").await.expect("open stream");

    h.host.emit_output(id, b"\x1b[31mred\x1b[0m");
    let chunk = tokio::time::timeout(Duration::from_secs(2), channel.output.recv())
        .await
        .expect("output in time")
        .expect("stream open");
    assert_eq!(chunk, Bytes::from_static(b"\x1b[31mred\x1b[0m"));

    let size = TermSize { rows: 33, cols: 101 };
    channel
        .input
        .send(ClientFrame::Resize(size))
        .await
        .expect("send resize");
    channel
        .input
        .send(ClientFrame::Input(Bytes::from_static(b"\x1b[A\r")))
        .await
        .expect("send input");

    let host = h.host.clone();
    assert!(
        wait_until(|| {
            let host = host.clone();
            async move { host.inputs(id).contains(&b"\x1b[A\r".to_vec()) }
        })
        .await
    );
    assert_eq!(h.host.size(id), Some(size));
    server.stop().await;
}

#[tokio::test]
async fn websocket_to_unknown_session_is_refused() {
    let (h, _) = spawned("alpha").await;
    let server = start(&h).await;
    let stream = WsStreamTransport::new(server.ws());

    let err = stream.open("ghost").await.err().expect("open must fail");
    assert!(matches!(err, AppError::StreamDropped(_)));
    server.stop().await;
}

#[tokio::test]
async fn websocket_closes_when_session_is_torn_down() {
    let (h, _) = spawned("alpha").await;
    let server = start(&h).await;
    let stream = WsStreamTransport::new(server.ws());
    let mut channel = stream.open("alpha").await.expect("open stream");

    h.registry.teardown("alpha", true).await.expect("teardown");

    let end = tokio::time::timeout(Duration::from_secs(2), async {
        while channel.output.recv().await.is_some() {}
    })
    .await;
    assert!(end.is_ok(), "stream must end after teardown");
    server.stop().await;
}
