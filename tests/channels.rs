//! Channel membership and chat relay over real sockets.

mod common;

use common::{TestClient, TestServer, HOSTNAME};

#[tokio::test]
async fn first_join_creates_the_channel_and_makes_the_joiner_owner() {
    let server = TestServer::spawn().await;
    let mut alice = TestClient::connect(&server.addr).await;
    alice.register("alice").await;

    alice.send("JOIN #room").await;

    let echo = alice.recv().await;
    assert_eq!(echo, ":alice!alice@127.0.0.1 JOIN #room");

    let names = alice.recv().await;
    assert_eq!(names, format!(":{HOSTNAME} 353 alice = #room :~alice"));

    let end = alice.recv().await;
    assert_eq!(end, format!(":{HOSTNAME} 366 alice #room :End of NAMES list."));
}

#[tokio::test]
async fn joins_are_announced_to_existing_members() {
    let server = TestServer::spawn().await;

    let mut alice = TestClient::connect(&server.addr).await;
    alice.register("alice").await;
    alice.join("#room").await;

    let mut bob = TestClient::connect(&server.addr).await;
    bob.register("bob").await;
    bob.join("#room").await;

    let seen = alice.recv().await;
    assert_eq!(seen, ":bob!bob@127.0.0.1 JOIN #room");
}

#[tokio::test]
async fn channel_messages_reach_other_members_but_not_the_sender() {
    let server = TestServer::spawn().await;

    let mut alice = TestClient::connect(&server.addr).await;
    alice.register("alice").await;
    alice.join("#room").await;

    let mut bob = TestClient::connect(&server.addr).await;
    bob.register("bob").await;
    bob.join("#room").await;
    alice.recv_until("JOIN #room").await;

    alice.send("PRIVMSG #room :hello there").await;
    let line = bob.recv().await;
    assert_eq!(line, ":alice!alice@127.0.0.1 PRIVMSG #room :hello there");

    // The sender sees nothing back; a follow-up PING answers first.
    alice.send("PING :sync").await;
    let line = alice.recv().await;
    assert_eq!(line, format!(":{HOSTNAME} PONG :sync"));
}

#[tokio::test]
async fn direct_messages_reach_the_target_user() {
    let server = TestServer::spawn().await;

    let mut alice = TestClient::connect(&server.addr).await;
    alice.register("alice").await;

    let mut bob = TestClient::connect(&server.addr).await;
    bob.register("bob").await;

    alice.send("PRIVMSG bob :psst").await;
    let line = bob.recv().await;
    assert_eq!(line, ":alice!alice@127.0.0.1 PRIVMSG bob :psst");
}

#[tokio::test]
async fn messages_to_unknown_targets_get_401() {
    let server = TestServer::spawn().await;
    let mut alice = TestClient::connect(&server.addr).await;
    alice.register("alice").await;

    alice.send("PRIVMSG ghost :anyone?").await;
    let line = alice.recv().await;
    assert_eq!(line, format!(":{HOSTNAME} 401 alice ghost :Nick not found"));
}

#[tokio::test]
async fn part_is_announced_before_leaving() {
    let server = TestServer::spawn().await;

    let mut alice = TestClient::connect(&server.addr).await;
    alice.register("alice").await;
    alice.join("#room").await;

    let mut bob = TestClient::connect(&server.addr).await;
    bob.register("bob").await;
    bob.join("#room").await;
    alice.recv_until("JOIN #room").await;

    bob.send("PART #room :later").await;
    let line = alice.recv().await;
    assert_eq!(line, ":bob!bob@127.0.0.1 PART #room :later");

    // Bob saw his own PART too.
    let line = bob.recv().await;
    assert_eq!(line, ":bob!bob@127.0.0.1 PART #room :later");
}

#[tokio::test]
async fn topic_set_and_query() {
    let server = TestServer::spawn().await;

    let mut alice = TestClient::connect(&server.addr).await;
    alice.register("alice").await;
    alice.join("#room").await;

    alice.send("TOPIC #room").await;
    let line = alice.recv().await;
    assert_eq!(line, format!(":{HOSTNAME} 331 alice #room :No topic is set"));

    alice.send("TOPIC #room :All things ember").await;
    let line = alice.recv().await;
    assert_eq!(line, ":alice!alice@127.0.0.1 TOPIC #room :All things ember");

    alice.send("TOPIC #room").await;
    let line = alice.recv().await;
    assert_eq!(line, format!(":{HOSTNAME} 332 alice #room :All things ember"));
}

#[tokio::test]
async fn bad_channel_names_are_rejected() {
    let server = TestServer::spawn().await;
    let mut alice = TestClient::connect(&server.addr).await;
    alice.register("alice").await;

    alice.send("JOIN room").await;
    let line = alice.recv().await;
    assert!(line.contains(" 476 alice room "));
}

#[tokio::test]
async fn nick_changes_propagate_to_channels_and_the_registry() {
    let server = TestServer::spawn().await;

    let mut alice = TestClient::connect(&server.addr).await;
    alice.register("alice").await;
    alice.join("#room").await;

    let mut bob = TestClient::connect(&server.addr).await;
    bob.register("bob").await;
    bob.join("#room").await;
    alice.recv_until("JOIN #room").await;

    alice.send("NICK alicia").await;
    let own = alice.recv().await;
    assert_eq!(own, ":alice!alice@127.0.0.1 NICK :alicia");
    let seen = bob.recv().await;
    assert_eq!(seen, ":alice!alice@127.0.0.1 NICK :alicia");

    // The registry follows the rename: the old nick is gone, the new one
    // receives messages.
    bob.send("PRIVMSG alice :hello?").await;
    let line = bob.recv().await;
    assert_eq!(line, format!(":{HOSTNAME} 401 bob alice :Nick not found"));

    bob.send("PRIVMSG alicia :hello!").await;
    let line = alice.recv().await;
    assert_eq!(line, ":bob!bob@127.0.0.1 PRIVMSG alicia :hello!");
}

#[tokio::test]
async fn quit_broadcasts_to_shared_channels() {
    let server = TestServer::spawn().await;

    let mut alice = TestClient::connect(&server.addr).await;
    alice.register("alice").await;
    alice.join("#room").await;

    let mut bob = TestClient::connect(&server.addr).await;
    bob.register("bob").await;
    bob.join("#room").await;
    alice.recv_until("JOIN #room").await;

    bob.send("QUIT :gone fishing").await;

    let error = bob.recv().await;
    assert_eq!(
        error,
        "ERROR :Closing link: 127.0.0.1 [Quit: gone fishing]"
    );
    assert!(bob.recv_eof().await);

    let seen = alice.recv().await;
    assert_eq!(seen, ":bob!bob@127.0.0.1 QUIT :gone fishing");
}
