//! End-to-end tests over real TCP connections

mod common;

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use common::{local_config, query_command, send_lines, wait_for_stats, Producer, TestServer};
use loghub::config::ServerConfig;
use loghub::server::Server;
use loghub::StartupError;

#[tokio::test]
async fn banners_identify_both_listeners() {
    let server = TestServer::start(local_config()).await;

    let producer = Producer::connect(server.ingest_addr).await;
    assert!(producer.banner.contains("loghub"));
    producer.finish().await;

    let stream = TcpStream::connect(server.query_addr).await.unwrap();
    let mut reader = BufReader::new(stream);
    let mut banner = String::new();
    reader.read_line(&mut banner).await.unwrap();
    assert!(banner.contains("loghub"));
    banner.clear();
    reader.read_line(&mut banner).await.unwrap();
    assert!(banner.contains("Commands"));

    server.shutdown().await;
}

#[tokio::test]
async fn ingested_lines_are_retrievable() {
    let server = TestServer::start(local_config()).await;

    send_lines(server.ingest_addr, &["happy-path-line"]).await;

    let count = query_command(server.query_addr, "COUNT").await;
    assert_eq!(count, "COUNT: 1\n");

    let response = query_command(server.query_addr, "QUERY keyword=happy-path-line").await;
    assert!(response.starts_with("FOUND: 1 matches\n"));
    assert!(response.contains("happy-path-line"));

    server.shutdown().await;
}

#[tokio::test]
async fn sample_scenario_matches_expected_counts() {
    let server = TestServer::start(local_config()).await;

    send_lines(
        server.ingest_addr,
        &["ERROR: a", "WARNING: b", "ERROR: c"],
    )
    .await;

    let response = query_command(server.query_addr, "QUERY keyword=ERROR").await;
    assert!(response.starts_with("FOUND: 2 matches\n"));
    assert!(response.contains("ERROR: a"));
    assert!(response.contains("ERROR: c"));

    let response =
        query_command(server.query_addr, "QUERY keywords=ERROR,WARNING operator=OR").await;
    assert!(response.starts_with("FOUND: 3 matches\n"));

    let response =
        query_command(server.query_addr, "QUERY keywords=ERROR,b operator=AND").await;
    assert_eq!(response, "FOUND: 0 matches\n");

    server.shutdown().await;
}

#[tokio::test]
async fn fragmented_lines_are_reassembled() {
    let server = TestServer::start(local_config()).await;

    let mut producer = Producer::connect(server.ingest_addr).await;
    for fragment in ["frag", "mented-", "line\n"] {
        producer
            .writer
            .write_all(fragment.as_bytes())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    producer.finish().await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let response = query_command(server.query_addr, "QUERY keyword=fragmented-line").await;
    assert!(response.starts_with("FOUND: 1 matches\n"));

    server.shutdown().await;
}

#[tokio::test]
async fn fragmented_query_commands_are_reassembled() {
    let server = TestServer::start(local_config()).await;

    send_lines(server.ingest_addr, &["needle-for-fragments"]).await;

    let stream = TcpStream::connect(server.query_addr).await.unwrap();
    let (read_half, mut writer) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut banner = String::new();
    reader.read_line(&mut banner).await.unwrap();
    banner.clear();
    reader.read_line(&mut banner).await.unwrap();

    for fragment in ["Q", "UERY keyword=needle-for-fragments", "\n"] {
        writer.write_all(fragment.as_bytes()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    writer.shutdown().await.unwrap();

    let mut response = String::new();
    reader.read_to_string(&mut response).await.unwrap();
    assert!(response.starts_with("FOUND: 1 matches\n"));
    assert!(response.contains("needle-for-fragments"));

    server.shutdown().await;
}

#[tokio::test]
async fn unterminated_ingest_line_is_ignored() {
    let server = TestServer::start(local_config()).await;

    let mut producer = Producer::connect(server.ingest_addr).await;
    producer.send_line("kept-line").await;
    producer
        .writer
        .write_all(b"discarded-tail-without-newline")
        .await
        .unwrap();
    producer.finish().await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(query_command(server.query_addr, "COUNT").await, "COUNT: 1\n");
    let response = query_command(server.query_addr, "QUERY keyword=discarded-tail").await;
    assert_eq!(response, "FOUND: 0 matches\n");

    server.shutdown().await;
}

#[tokio::test]
async fn unterminated_query_command_is_still_served() {
    let server = TestServer::start(local_config()).await;

    let stream = TcpStream::connect(server.query_addr).await.unwrap();
    let (read_half, mut writer) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut banner = String::new();
    reader.read_line(&mut banner).await.unwrap();
    banner.clear();
    reader.read_line(&mut banner).await.unwrap();

    // No trailing newline; the peer half-closes instead.
    writer.write_all(b"COUNT").await.unwrap();
    writer.shutdown().await.unwrap();

    let mut response = String::new();
    reader.read_to_string(&mut response).await.unwrap();
    assert_eq!(response, "COUNT: 0\n");

    server.shutdown().await;
}

#[tokio::test]
async fn oversized_line_round_trips_truncated() {
    let server = TestServer::start(local_config()).await;

    let marker = "unique-oversize-marker";
    let long_line = format!("{}{}", marker, "x".repeat(2000));
    send_lines(server.ingest_addr, &[&long_line]).await;

    let response = query_command(server.query_addr, &format!("QUERY keyword={}", marker)).await;
    let mut lines = response.lines();
    assert_eq!(lines.next(), Some("FOUND: 1 matches"));
    let stored = lines.next().expect("one stored line");
    assert!(stored.ends_with("..."));
    assert_eq!(stored.len(), 1024);
    assert!(stored.starts_with(marker));

    server.shutdown().await;
}

#[tokio::test]
async fn unknown_and_invalid_commands_report_errors() {
    let server = TestServer::start(local_config()).await;

    let response = query_command(server.query_addr, "NOPE").await;
    assert!(response.starts_with("ERROR:"));

    let response =
        query_command(server.query_addr, "QUERY keywords=alpha,beta operator=NOTREAL").await;
    assert!(response.starts_with("ERROR:"));

    let response = query_command(server.query_addr, "QUERY keywords=alpha,beta").await;
    assert!(response.starts_with("ERROR:"));

    server.shutdown().await;
}

#[tokio::test]
async fn repeated_invalid_regex_leaves_the_server_healthy() {
    let server = TestServer::start(local_config()).await;

    send_lines(server.ingest_addr, &["regex-victim"]).await;

    // One reused connection issuing the bad query 100 times.
    let stream = TcpStream::connect(server.query_addr).await.unwrap();
    let (read_half, mut writer) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();
    reader.read_line(&mut line).await.unwrap();
    line.clear();
    reader.read_line(&mut line).await.unwrap();

    for _ in 0..100 {
        writer.write_all(b"QUERY regex=[unclosed\n").await.unwrap();
        line.clear();
        reader.read_line(&mut line).await.unwrap();
        assert!(line.starts_with("ERROR:"), "got {line:?}");
    }
    writer.write_all(b"QUERY keyword=regex-victim\n").await.unwrap();
    line.clear();
    reader.read_line(&mut line).await.unwrap();
    assert_eq!(line, "FOUND: 1 matches\n");
    writer.shutdown().await.unwrap();

    server.shutdown().await;
}

#[tokio::test]
async fn producers_over_capacity_are_refused() {
    let config = ServerConfig {
        max_clients: 2,
        ..local_config()
    };
    let server = TestServer::start(config).await;

    // Two producers hold the only slots (banner read ⇒ slot held).
    let first = Producer::connect(server.ingest_addr).await;
    let second = Producer::connect(server.ingest_addr).await;

    let stream = TcpStream::connect(server.ingest_addr).await.unwrap();
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader.read_line(&mut line).await.unwrap();
    assert!(line.contains("capacity"), "got {line:?}");
    // The refused connection is closed right after the message.
    line.clear();
    let trailing = reader.read_line(&mut line).await.unwrap();
    assert_eq!(trailing, 0);

    // Rejected connections are not counted as producers.
    let stats = query_command(server.query_addr, "STATS").await;
    assert!(stats.contains("ActiveProducers=2"), "got {stats:?}");

    // Releasing a slot lets the next producer in.
    first.finish().await;
    wait_for_stats(server.query_addr, |s| s.contains("ActiveProducers=1")).await;
    let third = Producer::connect(server.ingest_addr).await;
    assert!(third.banner.contains("loghub"));

    third.finish().await;
    second.finish().await;
    server.shutdown().await;
}

#[tokio::test]
async fn connection_counters_return_to_zero() {
    let server = TestServer::start(local_config()).await;

    for cycle in 0..50 {
        // Clean producer cycle.
        let mut producer = Producer::connect(server.ingest_addr).await;
        producer.send_line(&format!("cycle {}", cycle)).await;
        producer.finish().await;

        // Abrupt producer close: no banner read, immediate drop.
        let abrupt = TcpStream::connect(server.ingest_addr).await.unwrap();
        drop(abrupt);

        // Query cycle.
        let _ = query_command(server.query_addr, "COUNT").await;
    }

    // The STATS connection itself is the only live query client.
    let stats = wait_for_stats(server.query_addr, |s| {
        s.contains("ActiveProducers=0") && s.contains("ActiveQueryClients=1")
    })
    .await;
    assert!(stats.starts_with("STATS:"));

    server.shutdown().await;
}

#[tokio::test]
async fn time_bounds_are_inclusive_over_the_wire() {
    let server = TestServer::start(local_config()).await;

    send_lines(server.ingest_addr, &["timed-entry"]).await;

    // Entries were just ingested; a window around "now" must include
    // them and an ancient window must not.
    let now = chrono_now();
    let response = query_command(
        server.query_addr,
        &format!("QUERY time_from={} time_to={}", now - 60, now + 60),
    )
    .await;
    assert!(response.starts_with("FOUND: 1 matches\n"));

    let response = query_command(
        server.query_addr,
        "QUERY time_from=1000000 time_to=2000000",
    )
    .await;
    assert_eq!(response, "FOUND: 0 matches\n");

    server.shutdown().await;
}

fn chrono_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[tokio::test]
async fn idle_producers_do_not_delay_queries() {
    let server = TestServer::start(local_config()).await;

    // Park a few idle producers.
    let idle: Vec<Producer> = {
        let mut conns = Vec::new();
        for _ in 0..5 {
            conns.push(Producer::connect(server.ingest_addr).await);
        }
        conns
    };

    let started = tokio::time::Instant::now();
    let count = query_command(server.query_addr, "COUNT").await;
    assert_eq!(count, "COUNT: 0\n");
    assert!(started.elapsed() < Duration::from_secs(1));

    for producer in idle {
        producer.finish().await;
    }
    server.shutdown().await;
}

#[tokio::test]
async fn identical_listener_addresses_fail_startup() {
    let addr: std::net::SocketAddr = "127.0.0.1:45991".parse().unwrap();
    let config = ServerConfig {
        ingest_addr: addr,
        query_addr: addr,
        ..ServerConfig::default()
    };

    let err = Server::bind(config).await.expect_err("must not bind");
    assert!(matches!(err, StartupError::IdenticalAddresses(_)));
}

#[tokio::test]
async fn conflicting_bind_fails_startup() {
    let server = TestServer::start(local_config()).await;

    let config = ServerConfig {
        ingest_addr: server.ingest_addr,
        query_addr: "127.0.0.1:0".parse().unwrap(),
        ..ServerConfig::default()
    };
    let err = Server::bind(config).await.expect_err("address is taken");
    assert!(matches!(err, StartupError::Bind { role: "ingestion", .. }));

    server.shutdown().await;
}

#[tokio::test]
async fn shutdown_closes_open_connections() {
    let server = TestServer::start(local_config()).await;

    let mut producer = Producer::connect(server.ingest_addr).await;
    producer.send_line("before shutdown").await;

    server.shutdown().await;

    // The parked producer's socket is closed by the drain.
    let mut buf = String::new();
    let read = tokio::time::timeout(
        Duration::from_secs(5),
        producer.reader.read_line(&mut buf),
    )
    .await
    .expect("read must complete after shutdown");
    assert_eq!(read.unwrap_or(0), 0);
}
