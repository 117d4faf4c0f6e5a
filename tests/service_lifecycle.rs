//! End-to-end: local polling, http ingestion and udp ACK through one
//! running service, then an ordered shutdown.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};

use sensor_collect::config::ServiceConfig;
use sensor_collect::hal::SimulatedLines;
use sensor_collect::lifecycle::Service;
use sensor_collect::scheduler::WorkerState;
use sensor_collect::store::StoredRecord;
use sensor_collect::Status;

fn test_config(root: &Path) -> ServiceConfig {
    let sensors = root.join("local-sensors.toml");
    std::fs::write(
        &sensors,
        r#"
[float]
pin = 17
name = "Float switch"
wait = 0.01
stuck_threshold = 2

[miswired]
pin = 22
wait = 0.01
"#,
    )
    .unwrap();

    let mut config = ServiceConfig::default();
    config.storage.data_folder = Some(root.join("data"));
    config.sensors.config_file = Some(sensors);
    config.network.bind_address = "127.0.0.1".parse().unwrap();
    config.network.http_port = 0;
    config.network.udp_port = 0;
    config
}

fn records(dir: &Path) -> Vec<StoredRecord> {
    if !dir.exists() {
        return Vec::new();
    }
    let mut paths: Vec<_> = std::fs::read_dir(dir).unwrap().map(|e| e.unwrap().path()).collect();
    paths.sort();
    paths
        .into_iter()
        .map(|p| serde_json::from_slice(&std::fs::read(p).unwrap()).unwrap())
        .collect()
}

async fn raw_put(addr: std::net::SocketAddr, path: &str, body: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "PUT {} HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        path,
        body.len(),
        body
    );
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    response
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn service_polls_ingests_and_shuts_down() {
    let tmp = tempfile::tempdir().unwrap();
    let lines = Arc::new(SimulatedLines::new());
    lines.set_level(17, true);
    lines.fail_bind(22);

    let service = Service::init(test_config(tmp.path()), lines.clone()).unwrap();
    assert_eq!(service.registry().len(), 2);
    let running = service.start().await.unwrap();
    assert_eq!(running.registry().get("float").map(|s| s.pin), Some(17));
    assert_eq!(running.store().root(), tmp.path().join("data"));

    // local path: the healthy worker runs, the miswired one fails alone
    let scheduler = running.scheduler().expect("local sensors configured");
    let mut float_state = scheduler.watch_state("float").unwrap();
    tokio::time::timeout(Duration::from_secs(2), float_state.wait_for(|s| *s == WorkerState::Running))
        .await
        .unwrap()
        .unwrap();
    let mut miswired_state = scheduler.watch_state("miswired").unwrap();
    tokio::time::timeout(Duration::from_secs(2), miswired_state.wait_for(|s| *s == WorkerState::Stopped))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(scheduler.startup_failures().len(), 1);

    // remote path
    let response = raw_put(
        running.http_addr(),
        "/v1/tank-b/measure",
        r#"{"sensorName":"Tank B","sensorStatus":"empty"}"#,
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 200"), "{}", response);
    assert!(response.contains(r#"{"status":"success"}"#));

    let response = raw_put(running.http_addr(), "/v1/tank-b/measure", r#"{"sensorStatus":"bogus"}"#).await;
    assert!(response.starts_with("HTTP/1.1 400"), "{}", response);

    // datagram path
    let udp_addr = running.udp_addr().expect("udp listener bound");
    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    client.send_to(b"ping", udp_addr).await.unwrap();
    let mut buf = [0u8; 8];
    let (len, _) = tokio::time::timeout(Duration::from_secs(2), client.recv_from(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf[..len], b"ACK");

    tokio::time::sleep(Duration::from_millis(50)).await;
    let data = tmp.path().join("data");
    running.shutdown().await;

    assert_eq!(lines.released(), vec![17]);
    assert!(!lines.is_bound(17));

    let local = records(&data.join("float"));
    assert!(local.len() >= 2, "float sensor should have been polled");
    assert!(local.iter().all(|r| r.status == Status::Stuck && r.name == "Float switch"));

    let remote = records(&data.join("tank-b"));
    assert_eq!(remote.len(), 1);
    assert_eq!(remote[0].status, Status::Empty);
    assert_eq!(remote[0].name, "Tank B");

    assert!(records(&data.join("miswired")).is_empty());
}
