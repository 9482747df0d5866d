//! Black-box RESP tests against the real `emberkvd` binary.
//!
//! Each test spawns its own daemon on a fresh loopback port and temp
//! snapshot path, speaks raw RESP over a `TcpStream`, and kills the
//! daemon at the end.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::path::PathBuf;
use std::process::{Child, Command};
use std::time::{Duration, Instant};

fn emberkvd_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .join("target/debug/emberkvd")
}

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

struct Daemon {
    child: Child,
    port: u16,
    snapshot_path: PathBuf,
}

static NEXT_SNAPSHOT_ID: std::sync::atomic::AtomicU32 = std::sync::atomic::AtomicU32::new(0);

impl Daemon {
    fn spawn() -> Self {
        let id = NEXT_SNAPSHOT_ID.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        Self::spawn_with_snapshot(
            std::env::temp_dir().join(format!("emberkv-integration-{}-{id}.rdb", std::process::id())),
        )
    }

    fn spawn_with_snapshot(snapshot_path: PathBuf) -> Self {
        let port = free_port();
        let child = Command::new(emberkvd_path())
            .env("EMBERKV_BIND_ADDRESS", "127.0.0.1")
            .env("EMBERKV_PORT", port.to_string())
            .env("EMBERKV_SNAPSHOT_PATH", &snapshot_path)
            .env("RUST_LOG", "error")
            .spawn()
            .expect("spawn emberkvd (run `cargo build` first)");

        let daemon = Self {
            child,
            port,
            snapshot_path,
        };
        daemon.wait_until_accepting();
        daemon
    }

    fn wait_until_accepting(&self) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if TcpStream::connect(("127.0.0.1", self.port)).is_ok() {
                return;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        panic!("emberkvd never started listening on port {}", self.port);
    }

    fn connect(&self) -> TcpStream {
        TcpStream::connect(("127.0.0.1", self.port)).expect("connect to emberkvd")
    }
}

impl Drop for Daemon {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
        std::fs::remove_file(&self.snapshot_path).ok();
    }
}

/// Encodes a command as a RESP array of bulk strings.
fn encode(args: &[&str]) -> Vec<u8> {
    let mut out = format!("*{}\r\n", args.len()).into_bytes();
    for arg in args {
        out.extend_from_slice(format!("${}\r\n", arg.len()).as_bytes());
        out.extend_from_slice(arg.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out
}

/// Sends one RESP command and reads back one reply's raw bytes. Relies
/// on the server writing the whole reply before this test's next read,
/// which holds for the single-command-at-a-time usage in these tests.
fn roundtrip(stream: &mut TcpStream, args: &[&str]) -> String {
    stream.write_all(&encode(args)).unwrap();
    read_one_reply(stream)
}

fn read_one_reply(stream: &mut TcpStream) -> String {
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = stream.read(&mut chunk).expect("read reply");
        assert!(n > 0, "connection closed before a full reply arrived");
        buf.extend_from_slice(&chunk[..n]);
        if reply_is_complete(&buf) {
            return String::from_utf8_lossy(&buf).into_owned();
        }
    }
}

/// A crude completeness check good enough for these tests: every RESP
/// frame kind we emit ends in `\r\n`, and bulk strings/arrays carry
/// their own length prefix that a real client would use instead.
fn reply_is_complete(buf: &[u8]) -> bool {
    buf.ends_with(b"\r\n")
}

#[test]
fn ping_replies_pong() {
    let daemon = Daemon::spawn();
    let mut stream = daemon.connect();
    assert_eq!(roundtrip(&mut stream, &["PING"]), "+PONG\r\n");
}

#[test]
fn set_get_and_missing_key() {
    let daemon = Daemon::spawn();
    let mut stream = daemon.connect();

    assert_eq!(roundtrip(&mut stream, &["SET", "greeting", "hello"]), "+OK\r\n");
    assert_eq!(
        roundtrip(&mut stream, &["GET", "greeting"]),
        "$5\r\nhello\r\n"
    );
    assert_eq!(roundtrip(&mut stream, &["GET", "nope"]), "$-1\r\n");
}

#[test]
fn wrong_type_against_a_hash_is_reported() {
    let daemon = Daemon::spawn();
    let mut stream = daemon.connect();

    roundtrip(&mut stream, &["HSET", "profile", "name", "ada"]);
    let reply = roundtrip(&mut stream, &["GET", "profile"]);
    assert!(
        reply.starts_with("-WRONGTYPE"),
        "expected a WRONGTYPE error, got {reply:?}"
    );
}

#[test]
fn list_push_and_range_round_trip() {
    let daemon = Daemon::spawn();
    let mut stream = daemon.connect();

    assert_eq!(roundtrip(&mut stream, &["RPUSH", "queue", "a"]), ":1\r\n");
    assert_eq!(roundtrip(&mut stream, &["RPUSH", "queue", "b"]), ":2\r\n");
    assert_eq!(
        roundtrip(&mut stream, &["LRANGE", "queue", "0", "-1"]),
        "*2\r\n$1\r\na\r\n$1\r\nb\r\n"
    );
}

#[test]
fn pipelined_requests_in_one_write_each_get_a_reply() {
    let daemon = Daemon::spawn();
    let mut stream = daemon.connect();

    let mut batch = encode(&["SET", "a", "1"]);
    batch.extend_from_slice(&encode(&["SET", "b", "2"]));
    batch.extend_from_slice(&encode(&["GET", "a"]));
    batch.extend_from_slice(&encode(&["GET", "b"]));
    stream.write_all(&batch).unwrap();

    let mut received = Vec::new();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    let mut chunk = [0u8; 4096];
    let expected = b"+OK\r\n+OK\r\n$1\r\n1\r\n$1\r\n2\r\n";
    while received.len() < expected.len() {
        let n = stream.read(&mut chunk).expect("read pipelined replies");
        assert!(n > 0);
        received.extend_from_slice(&chunk[..n]);
    }
    assert_eq!(received, expected);
}

#[test]
fn snapshot_survives_a_restart() {
    let snapshot_path = std::env::temp_dir().join(format!(
        "emberkv-integration-restart-{}.rdb",
        std::process::id()
    ));
    std::fs::remove_file(&snapshot_path).ok();

    {
        let daemon = Daemon::spawn_with_snapshot(snapshot_path.clone());
        let mut stream = daemon.connect();
        roundtrip(&mut stream, &["SET", "durable", "yes"]);
        assert_eq!(roundtrip(&mut stream, &["SAVE"]), "+OK\r\n");
    }

    let daemon = Daemon::spawn_with_snapshot(snapshot_path);
    let mut stream = daemon.connect();
    assert_eq!(
        roundtrip(&mut stream, &["GET", "durable"]),
        "$3\r\nyes\r\n"
    );
}

#[test]
fn unknown_command_is_an_error_reply() {
    let daemon = Daemon::spawn();
    let mut stream = daemon.connect();
    let reply = roundtrip(&mut stream, &["FROBNICATE"]);
    assert!(reply.starts_with("-ERR unknown command"));
}
