//! Graceful and forced shutdown over real sockets.

mod common;

use std::time::Duration;

use common::{TestClient, TestServer};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn graceful_shutdown_quiesces_connections() {
    let server = TestServer::spawn().await;

    let mut client = TestClient::connect(&server.addr).await;
    client.register("alice").await;

    let shutdown = {
        let server = server.server.clone();
        tokio::spawn(async move { server.shutdown(CancellationToken::new()).await })
    };

    let error = client.recv().await;
    assert_eq!(
        error,
        "ERROR :Closing link: 127.0.0.1 [Quit: Server shutting down.]"
    );
    assert!(client.recv_eof().await);

    shutdown
        .await
        .expect("shutdown task")
        .expect("graceful shutdown");
    assert!(server.server.conns().is_empty());
}

#[tokio::test]
async fn shutdown_returns_when_the_context_fires_first() {
    let server = TestServer::spawn().await;

    // A connection that never leaves New is never quiescent, so the drain
    // loop cannot finish and the context decides.
    let stuck = emberd::Conn::new(&server.server);
    server.server.conns().insert("synthetic".to_owned(), stuck);

    let ctx = CancellationToken::new();
    {
        let ctx = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            ctx.cancel();
        });
    }

    let err = server
        .server
        .shutdown(ctx)
        .await
        .expect_err("shutdown cannot drain a pre-handshake connection");
    assert!(err.to_string().contains("still active"));
}

#[tokio::test]
async fn kill_uses_operator_phrasing() {
    let server = TestServer::spawn().await;

    let mut alice = TestClient::connect(&server.addr).await;
    alice.register("alice").await;
    alice.join("#room").await;

    let mut bob = TestClient::connect(&server.addr).await;
    bob.register("bob").await;
    bob.join("#room").await;
    alice.recv_until("JOIN #room").await;

    let conn = server
        .server
        .conns()
        .values()
        .into_iter()
        .find(|conn| conn.user().nick() == "alice")
        .expect("alice's connection tracked");
    conn.do_kill("flooding", "oper").await;

    let error = alice.recv().await;
    assert_eq!(
        error,
        "ERROR :Closing link: 127.0.0.1 [Killed: oper [flooding]]"
    );
    assert!(alice.recv_eof().await);

    let seen = bob.recv().await;
    assert_eq!(seen, ":alice!alice@127.0.0.1 QUIT :Killed: oper [flooding]");
}

#[tokio::test]
async fn close_cancels_remaining_connections() {
    let server = TestServer::spawn().await;

    let mut client = TestClient::connect(&server.addr).await;
    client.register("alice").await;

    server.server.close().await;
    assert!(client.recv_eof().await);
}

#[tokio::test]
async fn new_listeners_are_rejected_after_shutdown() {
    let server = TestServer::spawn().await;
    server.server.close().await;

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let err = server
        .server
        .serve(listener, None)
        .await
        .expect_err("serve after close");
    assert!(err.to_string().contains("server closed"));
}

#[tokio::test]
async fn accepting_stops_once_listeners_close() {
    let server = TestServer::spawn().await;

    let mut before = TestClient::connect(&server.addr).await;
    before.register("alice").await;

    server.server.close().await;

    // The listener socket is gone; a fresh connection cannot register.
    match tokio::net::TcpStream::connect(&server.addr).await {
        Err(_) => {}
        Ok(stream) => {
            // Accept raced the close; the socket must be dead, not served.
            let mut probe = TestClient::from_stream(stream);
            probe.send("NICK carol").await;
            probe.send("USER carol 0 * :Carol").await;
            assert!(
                tokio::time::timeout(Duration::from_secs(2), probe.recv_eof())
                    .await
                    .unwrap_or(true)
            );
        }
    }
}
