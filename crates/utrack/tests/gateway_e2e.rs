// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! End-to-end gateway tests over real TCP connections.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use utrack::{GatewayConfig, GatewayServer, RotationConfig, ServerError};

const IMEI: &str = "123456789012345";

struct Gateway {
    server: GatewayServer,
    addr: SocketAddr,
    handle: JoinHandle<Result<(), ServerError>>,
}

impl Gateway {
    async fn start(config: GatewayConfig) -> Self {
        let server = GatewayServer::new(config).expect("valid config");
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn({
            let server = server.clone();
            async move { server.serve(listener).await }
        });
        Self {
            server,
            addr,
            handle,
        }
    }

    async fn stop(self) {
        self.server.shutdown();
        tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("server stops")
            .unwrap()
            .unwrap();
    }
}

struct Device {
    stream: TcpStream,
}

impl Device {
    async fn connect(addr: SocketAddr) -> Self {
        Self {
            stream: TcpStream::connect(addr).await.unwrap(),
        }
    }

    async fn send(&mut self, frame: &str) {
        self.stream.write_all(frame.as_bytes()).await.unwrap();
        self.stream.write_all(b"\r\n").await.unwrap();
    }

    async fn expect_reply(&mut self, expected: &[u8]) {
        let mut reply = vec![0u8; expected.len()];
        tokio::time::timeout(Duration::from_secs(5), self.stream.read_exact(&mut reply))
            .await
            .expect("reply in time")
            .unwrap();
        assert_eq!(reply, expected, "got {:?}", String::from_utf8_lossy(&reply));
    }

    async fn expect_closed(&mut self) {
        let mut rest = Vec::new();
        let read = tokio::time::timeout(Duration::from_secs(5), self.stream.read_to_end(&mut rest))
            .await
            .expect("connection closed in time");
        match read {
            Ok(_) => {}
            // Unread input on the server side turns the close into a reset
            Err(e) if e.kind() == std::io::ErrorKind::ConnectionReset => {}
            Err(e) => panic!("unexpected read error: {}", e),
        }
        assert!(rest.is_empty(), "unexpected reply {:?}", rest);
    }
}

fn config(root: &Path) -> GatewayConfig {
    GatewayConfig {
        data_root: root.to_path_buf(),
        ..Default::default()
    }
}

fn frame(imei: &str, fix: &str, seq: u32) -> String {
    format!(
        "imei:{},tracker,2024010112{:04},,{},,,,4916.45,N,12311.12,E,15;",
        imei, seq, fix
    )
}

fn windows(dir: PathBuf) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .map(|entries| entries.map(|e| e.unwrap().path()).collect())
        .unwrap_or_default();
    files.sort();
    files
}

fn placemarks(path: &Path) -> Vec<(f64, f64)> {
    let text = std::fs::read_to_string(path).unwrap();
    let doc = roxmltree::Document::parse(&text).unwrap();
    doc.descendants()
        .filter(|n| n.tag_name().name() == "coordinates")
        .map(|n| {
            let values: Vec<f64> = n
                .text()
                .unwrap()
                .trim()
                .split(',')
                .map(|v| v.parse().unwrap())
                .collect();
            (values[0], values[1])
        })
        .collect()
}

/// Wait until the server has finalized the session's windows.
async fn wait_for_windows(dir: PathBuf, count: usize) -> Vec<PathBuf> {
    for _ in 0..200 {
        let files = windows(dir.clone());
        let settled = files
            .iter()
            .all(|p| p.extension().is_some_and(|e| e != "part"));
        if files.len() >= count && settled {
            return files;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("windows not finalized in {}", dir.display());
}

#[tokio::test]
async fn test_registration_and_report() {
    let root = TempDir::new().unwrap();
    let gateway = Gateway::start(config(root.path())).await;

    let mut device = Device::connect(gateway.addr).await;
    device.send("##,imei:123456789012345,.;").await;
    device.expect_reply(b"LOAD\r\n").await;

    device
        .send("imei:123456789012345,T,20240101120000,,F,,,,4916.45,N,12311.12,E,15;")
        .await;
    device.expect_reply(b"ON\r\n").await;
    drop(device);

    let kml = wait_for_windows(root.path().join(IMEI).join("kml"), 1).await;
    let points = placemarks(&kml[0]);
    assert_eq!(points.len(), 1);
    assert!((points[0].0 - 123.1853).abs() < 1e-4);
    assert!((points[0].1 - 49.2742).abs() < 1e-4);

    let raw = windows(root.path().join(IMEI).join("raw"));
    assert_eq!(raw.len(), 1);
    let text = std::fs::read_to_string(&raw[0]).unwrap();
    assert_eq!(
        text,
        "123456789012345,T,20240101120000,,F,,,,4916.45,N,12311.12,E,15\n"
    );

    gateway.stop().await;
}

#[tokio::test]
async fn test_unlocked_frame_gets_keepalive_only() {
    let root = TempDir::new().unwrap();
    let gateway = Gateway::start(config(root.path())).await;

    let mut device = Device::connect(gateway.addr).await;
    device.send("##,imei:123456789012345,A;").await;
    device.expect_reply(b"LOAD\r\n").await;
    device.send(&frame(IMEI, "A", 1)).await;
    device.expect_reply(b"ON\r\n").await;
    drop(device);

    let kml = wait_for_windows(root.path().join(IMEI).join("kml"), 1).await;
    assert!(placemarks(&kml[0]).is_empty());
    let raw = windows(root.path().join(IMEI).join("raw"));
    assert_eq!(std::fs::read_to_string(&raw[0]).unwrap(), "");

    gateway.stop().await;
}

#[tokio::test]
async fn test_rejected_registration_gets_no_reply() {
    let root = TempDir::new().unwrap();
    let gateway = Gateway::start(config(root.path())).await;

    let mut device = Device::connect(gateway.addr).await;
    device.send(&frame(IMEI, "F", 1)).await;
    device.expect_closed().await;
    assert!(windows(root.path().to_path_buf()).is_empty());

    gateway.stop().await;
}

#[tokio::test]
async fn test_rotation_by_points_across_sinks() {
    let root = TempDir::new().unwrap();
    let gateway = Gateway::start(GatewayConfig {
        rotation: RotationConfig {
            max_points: 2,
            ..Default::default()
        },
        ..config(root.path())
    })
    .await;

    let mut device = Device::connect(gateway.addr).await;
    device.send("##,imei:123456789012345,A;").await;
    device.expect_reply(b"LOAD\r\n").await;
    for seq in 1..=5 {
        device.send(&frame(IMEI, "F", seq)).await;
        device.expect_reply(b"ON\r\n").await;
    }
    drop(device);

    let kml = wait_for_windows(root.path().join(IMEI).join("kml"), 3).await;
    let mut counts: Vec<usize> = kml.iter().map(|p| placemarks(p).len()).collect();
    counts.sort();
    assert_eq!(counts, vec![1, 2, 2]);

    let raw = windows(root.path().join(IMEI).join("raw"));
    let mut lines: Vec<usize> = raw
        .iter()
        .map(|p| std::fs::read_to_string(p).unwrap().lines().count())
        .collect();
    lines.sort();
    assert_eq!(lines, vec![1, 2, 2]);

    gateway.stop().await;
}

#[tokio::test]
async fn test_devices_are_isolated() {
    let root = TempDir::new().unwrap();
    let gateway = Gateway::start(config(root.path())).await;

    let mut a = Device::connect(gateway.addr).await;
    let mut b = Device::connect(gateway.addr).await;
    a.send("##,imei:111111111111111,A;").await;
    b.send("##,imei:222222222222222,A;").await;
    a.expect_reply(b"LOAD\r\n").await;
    b.expect_reply(b"LOAD\r\n").await;

    a.send(&frame("111111111111111", "F", 1)).await;
    b.send(&frame("222222222222222", "F", 1)).await;
    b.send(&frame("222222222222222", "F", 2)).await;
    a.expect_reply(b"ON\r\n").await;
    b.expect_reply(b"ON\r\nON\r\n").await;
    drop(a);
    drop(b);

    let a_kml = wait_for_windows(root.path().join("111111111111111").join("kml"), 1).await;
    let b_kml = wait_for_windows(root.path().join("222222222222222").join("kml"), 1).await;
    assert_eq!(placemarks(&a_kml[0]).len(), 1);
    assert_eq!(placemarks(&b_kml[0]).len(), 2);

    gateway.stop().await;
}

#[tokio::test]
async fn test_shutdown_finalizes_live_sessions() {
    let root = TempDir::new().unwrap();
    let gateway = Gateway::start(config(root.path())).await;

    let mut device = Device::connect(gateway.addr).await;
    device.send("##,imei:123456789012345,A;").await;
    device.expect_reply(b"LOAD\r\n").await;
    device.send(&frame(IMEI, "F", 1)).await;
    device.expect_reply(b"ON\r\n").await;

    gateway.stop().await;
    device.expect_closed().await;

    let kml = windows(root.path().join(IMEI).join("kml"));
    assert_eq!(kml.len(), 1);
    assert_eq!(placemarks(&kml[0]).len(), 1);
}
