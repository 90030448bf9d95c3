//! Shared harness for integration tests: a real server on an ephemeral
//! port and a line-oriented test client.

#![allow(dead_code)]

use std::time::Duration;

use emberd::{with_hostname, with_network, with_welcome, Server};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};

pub const HOSTNAME: &str = "irc.test.net";
pub const WELCOME: &str = "Welcome to the test net";

pub struct TestServer {
    pub server: Server,
    pub addr: String,
}

impl TestServer {
    /// Start a server on an ephemeral port and serve it in the background.
    pub async fn spawn() -> TestServer {
        let server = Server::new(vec![
            with_hostname(HOSTNAME),
            with_network("testnet"),
            with_welcome(WELCOME),
        ])
        .expect("server options");

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr").to_string();

        {
            let server = server.clone();
            tokio::spawn(async move {
                let _ = server.serve(listener, None).await;
            });
        }

        TestServer { server, addr }
    }
}

pub struct TestClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl TestClient {
    pub async fn connect(addr: &str) -> TestClient {
        let stream = TcpStream::connect(addr).await.expect("connect");
        Self::from_stream(stream)
    }

    pub fn from_stream(stream: TcpStream) -> TestClient {
        let (read_half, write_half) = stream.into_split();
        TestClient {
            reader: BufReader::new(read_half),
            writer: write_half,
        }
    }

    /// Send one CRLF-terminated line.
    pub async fn send(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.expect("write");
        self.writer.write_all(b"\r\n").await.expect("write crlf");
    }

    /// Receive one line, stripped of its terminator.
    pub async fn recv(&mut self) -> String {
        let mut line = String::new();
        let read = tokio::time::timeout(Duration::from_secs(5), self.reader.read_line(&mut line))
            .await
            .expect("timed out waiting for a line")
            .expect("read");
        assert!(read > 0, "connection closed while expecting a line");
        line.trim_end().to_owned()
    }

    /// Receive lines until one contains `needle`.
    pub async fn recv_until(&mut self, needle: &str) -> String {
        for _ in 0..64 {
            let line = self.recv().await;
            if line.contains(needle) {
                return line;
            }
        }
        panic!("never received a line containing {needle:?}");
    }

    /// True when the server closes the stream without another line.
    pub async fn recv_eof(&mut self) -> bool {
        let mut line = String::new();
        matches!(
            tokio::time::timeout(Duration::from_secs(5), self.reader.read_line(&mut line)).await,
            Ok(Ok(0))
        )
    }

    /// NICK+USER registration, consuming the welcome burst.
    pub async fn register(&mut self, nick: &str) {
        self.send(&format!("NICK {nick}")).await;
        self.send(&format!("USER {nick} 0 * :{nick} Example")).await;
        self.recv_until(" 001 ").await;
        self.recv_until("are supported by this server").await;
    }

    /// JOIN a channel, consuming the echo and the names burst.
    pub async fn join(&mut self, channel: &str) {
        self.send(&format!("JOIN {channel}")).await;
        self.recv_until("End of NAMES list.").await;
    }
}
