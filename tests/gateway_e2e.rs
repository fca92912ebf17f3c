//! End-to-end gateway scenarios
//!
//! Drives the full server over a real TCP socket. Kafka is replaced by a
//! scripted message source per consumer, so every scenario runs without a
//! broker while exercising the accept loop, the dispatcher, the consumer
//! pool, and shutdown exactly as deployed.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use respgate::config::Config;
use respgate::gateway::{
    ClientTable, ConsumerManager, Message, MessageSource, Server, SourceFactory,
};

type Commits = Arc<Mutex<Vec<(String, i32, i64)>>>;

/// Source that yields scripted messages for its topic set, then idles.
/// Commits are recorded for assertions.
struct ScriptedSource {
    messages: Mutex<VecDeque<Message>>,
    commits: Commits,
}

#[async_trait]
impl MessageSource for ScriptedSource {
    async fn poll(&self, deadline: Duration) -> respgate::gateway::Result<Option<Message>> {
        if let Some(msg) = self.messages.lock().unwrap().pop_front() {
            return Ok(Some(msg));
        }
        tokio::time::sleep(deadline).await;
        Ok(None)
    }

    async fn commit(
        &self,
        topic: &str,
        partition: i32,
        next_offset: i64,
    ) -> respgate::gateway::Result<()> {
        self.commits
            .lock()
            .unwrap()
            .push((topic.to_string(), partition, next_offset));
        Ok(())
    }
}

struct Gateway {
    addr: std::net::SocketAddr,
    cancel: CancellationToken,
    commits: Commits,
    server_task: JoinHandle<respgate::gateway::Result<()>>,
    manager_task: JoinHandle<()>,
}

impl Gateway {
    /// Shut the gateway down and wait for both long-lived tasks.
    async fn stop(self) {
        self.cancel.cancel();
        self.server_task.await.unwrap().unwrap();
        self.manager_task.await.unwrap();
    }
}

/// Boot a gateway on an ephemeral port. `scripts` maps a comma-joined,
/// sorted topic set to the messages its consumer should deliver.
async fn spawn_gateway(scripts: HashMap<String, Vec<Message>>) -> Gateway {
    let config = Arc::new(Config {
        blpop_timeout: Duration::from_secs(1),
        ..Config::default()
    });
    let cancel = CancellationToken::new();
    let clients = Arc::new(ClientTable::new());
    let commits: Commits = Arc::new(Mutex::new(Vec::new()));

    let factory: SourceFactory = {
        let commits = commits.clone();
        let scripts = Mutex::new(scripts);
        Arc::new(move |_group_id, topics| {
            let mut sorted: Vec<&str> = topics.iter().map(String::as_str).collect();
            sorted.sort_unstable();
            let key = sorted.join(",");
            let messages = scripts.lock().unwrap().remove(&key).unwrap_or_default();
            Ok(Arc::new(ScriptedSource {
                messages: Mutex::new(messages.into()),
                commits: commits.clone(),
            }) as Arc<dyn MessageSource>)
        })
    };

    let manager = Arc::new(ConsumerManager::new(
        config.clone(),
        clients.clone(),
        cancel.clone(),
        factory,
    ));
    let manager_task = tokio::spawn({
        let manager = manager.clone();
        async move { manager.run().await }
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = Arc::new(Server::new(config, manager, clients, cancel.clone()));
    let server_task = tokio::spawn(async move { server.serve(listener).await });

    Gateway {
        addr,
        cancel,
        commits,
        server_task,
        manager_task,
    }
}

/// Minimal RESP client for the tests.
struct RespClient {
    stream: TcpStream,
    buf: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Reply {
    Bulk(Vec<u8>),
    Nil,
    Error(String),
    Integer(i64),
    Array(Vec<Reply>),
}

impl Reply {
    fn bulk_str(&self) -> &str {
        match self {
            Reply::Bulk(data) => std::str::from_utf8(data).unwrap(),
            other => panic!("expected bulk reply, got {other:?}"),
        }
    }

    fn error(&self) -> &str {
        match self {
            Reply::Error(msg) => msg,
            other => panic!("expected error reply, got {other:?}"),
        }
    }
}

impl RespClient {
    async fn connect(addr: std::net::SocketAddr) -> Self {
        Self {
            stream: TcpStream::connect(addr).await.unwrap(),
            buf: Vec::new(),
        }
    }

    fn local_id(&self) -> String {
        self.stream.local_addr().unwrap().to_string()
    }

    async fn send(&mut self, args: &[&str]) {
        self.stream.write_all(&encode_command(args)).await.unwrap();
    }

    async fn send_raw(&mut self, data: &[u8]) {
        self.stream.write_all(data).await.unwrap();
    }

    async fn fill(&mut self) {
        let mut chunk = [0u8; 4096];
        let n = self.stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "connection closed while awaiting a reply");
        self.buf.extend_from_slice(&chunk[..n]);
    }

    async fn line(&mut self) -> Vec<u8> {
        loop {
            if let Some(pos) = self.buf.windows(2).position(|w| w == b"\r\n") {
                let line = self.buf[..pos].to_vec();
                self.buf.drain(..pos + 2);
                return line;
            }
            self.fill().await;
        }
    }

    async fn take(&mut self, n: usize) -> Vec<u8> {
        while self.buf.len() < n + 2 {
            self.fill().await;
        }
        let data = self.buf[..n].to_vec();
        self.buf.drain(..n + 2);
        data
    }

    async fn read_scalar(&mut self) -> Reply {
        let line = self.line().await;
        let body = String::from_utf8_lossy(&line[1..]).into_owned();
        match line[0] {
            b'-' => Reply::Error(body),
            b':' => Reply::Integer(body.parse().unwrap()),
            b'$' => {
                let len: i64 = body.parse().unwrap();
                if len < 0 {
                    Reply::Nil
                } else {
                    Reply::Bulk(self.take(len as usize).await)
                }
            }
            other => panic!("unexpected reply prefix {:?}", other as char),
        }
    }

    async fn read_reply(&mut self) -> Reply {
        while self.buf.is_empty() {
            self.fill().await;
        }
        if self.buf[0] == b'*' {
            let line = self.line().await;
            let len: usize = String::from_utf8_lossy(&line[1..]).parse().unwrap();
            let mut elements = Vec::with_capacity(len);
            for _ in 0..len {
                elements.push(self.read_scalar().await);
            }
            Reply::Array(elements)
        } else {
            self.read_scalar().await
        }
    }

    /// Read the connection until the peer closes it.
    async fn read_to_eof(&mut self) {
        let mut chunk = [0u8; 4096];
        loop {
            match self.stream.read(&mut chunk).await {
                Ok(0) | Err(_) => return,
                Ok(_) => {}
            }
        }
    }
}

fn encode_command(args: &[&str]) -> Vec<u8> {
    let mut out = format!("*{}\r\n", args.len()).into_bytes();
    for arg in args {
        out.extend_from_slice(format!("${}\r\n{arg}\r\n", arg.len()).as_bytes());
    }
    out
}

// ===== S1: PING/PONG =====

#[tokio::test]
async fn test_ping_pong() {
    let gateway = spawn_gateway(HashMap::new()).await;
    let mut client = RespClient::connect(gateway.addr).await;

    client.send(&["PING"]).await;
    assert_eq!(client.read_reply().await.bulk_str(), "PONG");

    gateway.stop().await;
}

// ===== S2: naming collision =====

#[tokio::test]
async fn test_setname_collision() {
    let gateway = spawn_gateway(HashMap::new()).await;

    let mut a = RespClient::connect(gateway.addr).await;
    a.send(&["CLIENT", "SETNAME", "foo"]).await;
    assert_eq!(a.read_reply().await.bulk_str(), "OK");

    let mut b = RespClient::connect(gateway.addr).await;
    b.send(&["CLIENT", "SETNAME", "foo"]).await;
    assert_eq!(b.read_reply().await.error(), "id foo is already taken");

    // B keeps its endpoint-derived temporary id.
    b.send(&["CLIENT", "GETNAME"]).await;
    assert_eq!(b.read_reply().await.bulk_str(), b.local_id());

    gateway.stop().await;
}

// ===== S3: BLPOP delivers and RPUSH acks =====

#[tokio::test]
async fn test_blpop_delivers_and_rpush_commits() {
    let scripts = HashMap::from([(
        "t".to_string(),
        vec![Message::new("t", 0, 42, b"hello".to_vec())],
    )]);
    let gateway = spawn_gateway(scripts).await;
    let mut client = RespClient::connect(gateway.addr).await;

    client.send(&["CLIENT", "SETNAME", "c1"]).await;
    assert_eq!(client.read_reply().await.bulk_str(), "OK");

    client.send(&["BLPOP", "topics:t", "5"]).await;
    let reply = client.read_reply().await;
    assert_eq!(
        reply,
        Reply::Array(vec![
            Reply::Bulk(b"topic".to_vec()),
            Reply::Bulk(b"t".to_vec()),
            Reply::Bulk(b"partition".to_vec()),
            Reply::Integer(0),
            Reply::Bulk(b"offset".to_vec()),
            Reply::Integer(42),
            Reply::Bulk(b"value".to_vec()),
            Reply::Bulk(b"hello".to_vec()),
        ])
    );

    client.send(&["RPUSH", "acks", "t:0:42"]).await;
    assert_eq!(client.read_reply().await.bulk_str(), "OK");

    // Committed position is offset + 1.
    assert_eq!(
        *gateway.commits.lock().unwrap(),
        vec![("t".to_string(), 0, 43)]
    );

    gateway.stop().await;
}

// ===== S4: BLPOP timeout =====

#[tokio::test]
async fn test_blpop_times_out_with_nil() {
    let gateway = spawn_gateway(HashMap::new()).await;
    let mut client = RespClient::connect(gateway.addr).await;

    let start = Instant::now();
    client.send(&["BLPOP", "topics:t", "1"]).await;
    assert_eq!(client.read_reply().await, Reply::Nil);

    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(1), "returned early: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(3), "returned late: {elapsed:?}");

    gateway.stop().await;
}

// ===== S5: ack without a consumer =====

#[tokio::test]
async fn test_ack_without_consumer_is_rejected() {
    let gateway = spawn_gateway(HashMap::new()).await;
    let mut client = RespClient::connect(gateway.addr).await;

    client.send(&["RPUSH", "acks", "t:0:0"]).await;
    assert!(client.read_reply().await.error().contains("no consumer"));
    assert!(gateway.commits.lock().unwrap().is_empty());

    gateway.stop().await;
}

// ===== S6: graceful shutdown mid-BLPOP =====

#[tokio::test]
async fn test_shutdown_interrupts_blpop() {
    let gateway = spawn_gateway(HashMap::new()).await;
    let mut client = RespClient::connect(gateway.addr).await;

    client.send(&["BLPOP", "topics:t", "60"]).await;
    // Let the wait begin before pulling the plug.
    tokio::time::sleep(Duration::from_millis(100)).await;
    gateway.cancel.cancel();

    assert_eq!(client.read_reply().await.error(), "SERVER SHUTDOWN");
    client.read_to_eof().await;

    gateway.server_task.await.unwrap().unwrap();
    gateway.manager_task.await.unwrap();
}

// ===== Command surface =====

#[tokio::test]
async fn test_unsupported_command() {
    let gateway = spawn_gateway(HashMap::new()).await;
    let mut client = RespClient::connect(gateway.addr).await;

    client.send(&["GET", "x"]).await;
    assert_eq!(client.read_reply().await.error(), "Command not supported");

    // The session continues.
    client.send(&["PING"]).await;
    assert_eq!(client.read_reply().await.bulk_str(), "PONG");

    gateway.stop().await;
}

#[tokio::test]
async fn test_rpush_rejects_other_keys() {
    let gateway = spawn_gateway(HashMap::new()).await;
    let mut client = RespClient::connect(gateway.addr).await;

    client.send(&["RPUSH", "queue", "t:0:0"]).await;
    assert_eq!(
        client.read_reply().await.error(),
        "ERR You can only push to the 'acks' key"
    );

    gateway.stop().await;
}

#[tokio::test]
async fn test_malformed_topics_key() {
    let gateway = spawn_gateway(HashMap::new()).await;
    let mut client = RespClient::connect(gateway.addr).await;

    client.send(&["BLPOP", "queues:t", "1"]).await;
    assert_eq!(
        client.read_reply().await.error(),
        "Cannot parse topics: 'queues:t'"
    );

    gateway.stop().await;
}

#[tokio::test]
async fn test_unknown_client_subcommand() {
    let gateway = spawn_gateway(HashMap::new()).await;
    let mut client = RespClient::connect(gateway.addr).await;

    client.send(&["CLIENT", "LIST"]).await;
    assert_eq!(client.read_reply().await.error(), "ERR syntax error");

    gateway.stop().await;
}

#[tokio::test]
async fn test_setname_twice_fails() {
    let gateway = spawn_gateway(HashMap::new()).await;
    let mut client = RespClient::connect(gateway.addr).await;

    client.send(&["CLIENT", "SETNAME", "c1"]).await;
    assert_eq!(client.read_reply().await.bulk_str(), "OK");

    client.send(&["CLIENT", "SETNAME", "c2"]).await;
    assert!(client.read_reply().await.error().contains("already named"));

    // Identity unchanged; and "c2" was not leaked into the table, so
    // another connection may claim it.
    client.send(&["CLIENT", "GETNAME"]).await;
    assert_eq!(client.read_reply().await.bulk_str(), "c1");

    let mut other = RespClient::connect(gateway.addr).await;
    other.send(&["CLIENT", "SETNAME", "c2"]).await;
    assert_eq!(other.read_reply().await.bulk_str(), "OK");

    gateway.stop().await;
}

// ===== Pipelining =====

#[tokio::test]
async fn test_pipelined_commands_answer_in_order() {
    let gateway = spawn_gateway(HashMap::new()).await;
    let mut client = RespClient::connect(gateway.addr).await;

    let mut batch = encode_command(&["PING"]);
    batch.extend_from_slice(&encode_command(&["CLIENT", "GETNAME"]));
    batch.extend_from_slice(&encode_command(&["PING"]));
    client.send_raw(&batch).await;

    assert_eq!(client.read_reply().await.bulk_str(), "PONG");
    assert_eq!(client.read_reply().await.bulk_str(), client.local_id());
    assert_eq!(client.read_reply().await.bulk_str(), "PONG");

    gateway.stop().await;
}

// ===== Multiple deliveries preserve order =====

#[tokio::test]
async fn test_repeated_blpop_preserves_partition_order() {
    let scripts = HashMap::from([(
        "t".to_string(),
        vec![
            Message::new("t", 0, 10, b"a".to_vec()),
            Message::new("t", 0, 11, b"b".to_vec()),
            Message::new("t", 0, 12, b"c".to_vec()),
        ],
    )]);
    let gateway = spawn_gateway(scripts).await;
    let mut client = RespClient::connect(gateway.addr).await;

    for expected in [10i64, 11, 12] {
        client.send(&["BLPOP", "topics:t", "5"]).await;
        match client.read_reply().await {
            Reply::Array(fields) => assert_eq!(fields[5], Reply::Integer(expected)),
            other => panic!("expected array, got {other:?}"),
        }
    }

    gateway.stop().await;
}
