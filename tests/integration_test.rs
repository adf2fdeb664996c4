// Integration tests for the lab gateway
// Each test boots the full warp stack on an ephemeral port and drives it with real WebSocket clients

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use lab_gateway::api::routes;
use lab_gateway::collab::{InMemoryRoster, JwtAuthenticator, PresenceStore, RosterEntry};
use lab_gateway::config::GatewayConfig;
use lab_gateway::error::Result;
use lab_gateway::hub::{BatchId, GroupName, LabHub, Mode, PresenceState, PresenceStatus, StudentId};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const SECRET: &str = "integration-secret";
const PUBLISH_KEY: &str = "integration-key";
const MONITOR_USER: i64 = 900;

struct TestServer {
    addr: SocketAddr,
    hub: Arc<LabHub>,
    roster: Arc<InMemoryRoster>,
    auth: JwtAuthenticator,
}

/// Roster-backed presence store with artificial latency
struct SlowStore {
    roster: Arc<InMemoryRoster>,
    snapshot_delay: Duration,
    write_delay: Duration,
}

#[async_trait]
impl PresenceStore for SlowStore {
    async fn read_presence_snapshot(&self, batch_id: BatchId) -> Result<Vec<PresenceState>> {
        sleep(self.snapshot_delay).await;
        self.roster.read_presence_snapshot(batch_id).await
    }

    async fn write_presence(
        &self,
        student_id: StudentId,
        status: PresenceStatus,
        mode: Option<Mode>,
    ) -> Result<PresenceState> {
        sleep(self.write_delay).await;
        self.roster.write_presence(student_id, status, mode).await
    }
}

impl TestServer {
    async fn start(entries: Vec<RosterEntry>) -> Self {
        let roster = Arc::new(InMemoryRoster::from_entries(entries).await);
        Self::serve(GatewayConfig::default(), roster.clone(), roster).await
    }

    /// Same roster, but every snapshot read and presence write is delayed
    async fn start_slow(
        entries: Vec<RosterEntry>,
        config: GatewayConfig,
        snapshot_delay: Duration,
        write_delay: Duration,
    ) -> Self {
        let roster = Arc::new(InMemoryRoster::from_entries(entries).await);
        let store = Arc::new(SlowStore {
            roster: roster.clone(),
            snapshot_delay,
            write_delay,
        });
        Self::serve(config, roster, store).await
    }

    async fn serve(config: GatewayConfig, roster: Arc<InMemoryRoster>, store: Arc<dyn PresenceStore>) -> Self {
        let hub = LabHub::new(
            config,
            Arc::new(JwtAuthenticator::new(SECRET)),
            roster.clone(),
            store,
        );

        let filter = routes::routes(hub.clone(), Some(PUBLISH_KEY.to_string()));
        let (addr, server) = warp::serve(filter).bind_ephemeral(([127, 0, 0, 1], 0));
        tokio::spawn(server);

        Self {
            addr,
            hub,
            roster,
            auth: JwtAuthenticator::new(SECRET),
        }
    }

    fn token(&self, user_id: i64) -> String {
        self.auth
            .issue_access_token(user_id, Duration::from_secs(60))
            .unwrap()
    }

    async fn monitor(&self, batch_id: i64) -> Client {
        let url = format!(
            "ws://{}/ws/monitor/{}/?token={}",
            self.addr,
            batch_id,
            self.token(MONITOR_USER)
        );
        let (ws, _) = connect_async(url).await.expect("monitor should connect");
        ws
    }

    /// Connects a monitor and consumes its `initial_load`
    async fn ready_monitor(&self, batch_id: i64) -> Client {
        let mut ws = self.monitor(batch_id).await;
        assert_eq!(next_event(&mut ws).await["type"], "initial_load");
        ws
    }

    async fn student(&self, user_id: i64) -> Client {
        let url = format!("ws://{}/ws/student/?token={}", self.addr, self.token(user_id));
        let (ws, _) = connect_async(url).await.expect("student should connect");
        ws
    }

    async fn wait_for_members(&self, group: GroupName, count: usize) {
        for _ in 0..100 {
            if self.hub.registry().members(group).await.len() == count {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("{} never reached {} members", group, count);
    }
}

fn entry(id: i64, user_id: i64, name: &str, batch_id: i64, status: PresenceStatus) -> RosterEntry {
    RosterEntry {
        id,
        user_id,
        name: name.to_string(),
        batch_id,
        pc_id: Some(format!("PC-{:02}", id)),
        status,
        mode: Mode::Normal,
        ..Default::default()
    }
}

/// A and B in batch 7, D in batch 3
fn small_roster() -> Vec<RosterEntry> {
    vec![
        entry(1, 101, "Asha", 7, PresenceStatus::Online),
        entry(2, 102, "Bilal", 7, PresenceStatus::Offline),
        entry(4, 104, "Dev", 3, PresenceStatus::Offline),
    ]
}

/// A, B and C in batch 7, D in batch 3
fn full_roster() -> Vec<RosterEntry> {
    let mut entries = small_roster();
    entries.push(entry(3, 103, "Chen", 7, PresenceStatus::Offline));
    entries
}

async fn next_event(ws: &mut Client) -> serde_json::Value {
    loop {
        match timeout(Duration::from_secs(2), ws.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => return serde_json::from_str(&text).unwrap(),
            Ok(Some(Ok(Message::Ping(_)))) | Ok(Some(Ok(Message::Pong(_)))) => continue,
            Ok(other) => panic!("expected an event, got {:?}", other),
            Err(_) => panic!("timed out waiting for an event"),
        }
    }
}

async fn assert_silent(ws: &mut Client) {
    if let Ok(Some(Ok(Message::Text(text)))) = timeout(Duration::from_millis(200), ws.next()).await {
        panic!("expected no event, got {}", text);
    }
}

fn task_event(id: i64) -> serde_json::Value {
    json!({
        "type": "task_event",
        "event_type": "task_created",
        "task": {
            "id": id,
            "title": "Binary search trees",
            "description": "Insert, delete and in-order traversal",
            "status": "active",
            "batch_id": 7,
            "created_at": "2026-10-19T09:00:00Z",
            "faculty_name": "Dr. Rao",
            "deadline": "2026-10-19T12:00:00Z"
        }
    })
}

#[tokio::test]
async fn test_health_endpoint() {
    let server = TestServer::start(small_roster()).await;
    let _monitor = server.ready_monitor(7).await;

    let body: serde_json::Value = reqwest::get(format!("http://{}/health", server.addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "lab-gateway");
    assert_eq!(body["connections"], 1);
    assert_eq!(body["groups"], 1);
}

#[tokio::test]
async fn test_monitor_receives_snapshot_first() {
    let server = TestServer::start(small_roster()).await;
    let mut monitor = server.monitor(7).await;

    let first = next_event(&mut monitor).await;
    assert_eq!(first["type"], "initial_load");

    let mut students: Vec<(i64, String)> = first["students"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| (s["id"].as_i64().unwrap(), s["status"].as_str().unwrap().to_string()))
        .collect();
    students.sort();
    assert_eq!(students, vec![(1, "online".to_string()), (2, "offline".to_string())]);

    assert_silent(&mut monitor).await;
}

#[tokio::test]
async fn test_trailing_slash_is_optional() {
    let server = TestServer::start(small_roster()).await;
    let url = format!("ws://{}/ws/monitor/7?token={}", server.addr, server.token(MONITOR_USER));
    let (mut ws, _) = connect_async(url).await.unwrap();

    assert_eq!(next_event(&mut ws).await["type"], "initial_load");
}

#[tokio::test]
async fn test_student_presence_fans_out_to_own_batch_monitors() {
    let server = TestServer::start(full_roster()).await;
    let mut monitor_a = server.ready_monitor(7).await;
    let mut monitor_b = server.ready_monitor(7).await;
    let mut other_batch = server.ready_monitor(3).await;

    let _student = server.student(103).await;

    for monitor in [&mut monitor_a, &mut monitor_b] {
        let event = next_event(monitor).await;
        assert_eq!(event["type"], "student_status");
        assert_eq!(event["student_id"], 3);
        assert_eq!(event["status"], "online");
        assert_eq!(event["name"], "Chen");
        assert_silent(monitor).await;
    }
    assert_silent(&mut other_batch).await;

    assert_eq!(server.roster.get(3).await.unwrap().status, PresenceStatus::Online);
}

#[tokio::test]
async fn test_student_disconnect_goes_offline() {
    let server = TestServer::start(full_roster()).await;
    let mut monitor = server.ready_monitor(7).await;

    let mut student = server.student(103).await;
    assert_eq!(next_event(&mut monitor).await["status"], "online");

    student.close(None).await.unwrap();

    let event = next_event(&mut monitor).await;
    assert_eq!(event["type"], "student_status");
    assert_eq!(event["student_id"], 3);
    assert_eq!(event["status"], "offline");
    assert_silent(&mut monitor).await;

    server.wait_for_members(GroupName::batch(7), 0).await;
    assert_eq!(server.roster.get(3).await.unwrap().status, PresenceStatus::Offline);
}

#[tokio::test]
async fn test_abrupt_disconnect_goes_offline() {
    let server = TestServer::start(full_roster()).await;
    let mut monitor = server.ready_monitor(7).await;

    let student = server.student(102).await;
    assert_eq!(next_event(&mut monitor).await["status"], "online");

    drop(student);

    let event = next_event(&mut monitor).await;
    assert_eq!(event["student_id"], 2);
    assert_eq!(event["status"], "offline");
}

#[tokio::test]
async fn test_task_broadcast_reaches_only_batch_members() {
    let server = TestServer::start(full_roster()).await;

    let mut batch_students = Vec::new();
    for user_id in [101, 102, 103] {
        batch_students.push(server.student(user_id).await);
    }
    let mut outsider = server.student(104).await;
    server.wait_for_members(GroupName::batch(7), 3).await;
    server.wait_for_members(GroupName::batch(3), 1).await;

    let event = serde_json::from_value(task_event(42)).unwrap();
    server.hub.outbox().emit(GroupName::batch(7), event).unwrap();

    for student in batch_students.iter_mut() {
        assert_eq!(next_event(student).await, task_event(42));
    }
    assert_silent(&mut outsider).await;
}

#[tokio::test]
async fn test_http_publish_reaches_student_group() {
    let server = TestServer::start(full_roster()).await;
    let mut student = server.student(101).await;
    server.wait_for_members(GroupName::student(1), 1).await;

    let resp = reqwest::Client::new()
        .post(format!("http://{}/internal/publish", server.addr))
        .bearer_auth(PUBLISH_KEY)
        .json(&json!({ "group": "student_1", "event": task_event(7) }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);

    assert_eq!(next_event(&mut student).await, task_event(7));
}

#[tokio::test]
async fn test_malformed_input_keeps_monitor_active() {
    let server = TestServer::start(full_roster()).await;
    let mut monitor = server.ready_monitor(7).await;

    monitor.send(Message::Text("not json".into())).await.unwrap();
    assert_silent(&mut monitor).await;

    monitor
        .send(Message::Text(
            json!({ "type": "status_update", "student_id": 2, "status": "online", "mode": "exam" }).to_string(),
        ))
        .await
        .unwrap();

    let event = next_event(&mut monitor).await;
    assert_eq!(event["type"], "status_broadcast");
    assert_eq!(event["student_id"], 2);
    assert_eq!(event["status"], "online");
    assert_eq!(event["mode"], "exam");
    assert_eq!(server.roster.get(2).await.unwrap().mode, Mode::Exam);
}

#[tokio::test]
async fn test_manual_override_race_converges_offline() {
    let server = TestServer::start(full_roster()).await;
    let mut monitor = server.ready_monitor(7).await;

    let mut student = server.student(103).await;
    assert_eq!(next_event(&mut monitor).await["status"], "online");

    let update = json!({ "type": "status_update", "student_id": 3, "status": "offline" }).to_string();
    let (sent, closed) = tokio::join!(monitor.send(Message::Text(update)), student.close(None));
    sent.unwrap();
    closed.unwrap();

    let mut broadcasts = Vec::new();
    while let Ok(Some(Ok(Message::Text(text)))) = timeout(Duration::from_millis(500), monitor.next()).await {
        broadcasts.push(serde_json::from_str::<serde_json::Value>(&text).unwrap());
    }

    assert!((1..=2).contains(&broadcasts.len()), "got {:?}", broadcasts);
    assert!(broadcasts.iter().all(|b| b["student_id"] == 3 && b["status"] == "offline"));
    assert_eq!(server.roster.get(3).await.unwrap().status, PresenceStatus::Offline);
}

#[tokio::test]
async fn test_invalid_token_is_rejected_before_joining() {
    let server = TestServer::start(full_roster()).await;
    let mut monitor = server.ready_monitor(7).await;

    for url in [
        format!("ws://{}/ws/student/?token=garbage", server.addr),
        format!("ws://{}/ws/student/", server.addr),
        format!("ws://{}/ws/monitor/7/?token=garbage", server.addr),
    ] {
        let (mut ws, _) = connect_async(url).await.unwrap();
        match timeout(Duration::from_secs(2), ws.next()).await {
            Ok(Some(Ok(Message::Close(_)))) | Ok(None) | Ok(Some(Err(_))) => {}
            other => panic!("expected the server to close, got {:?}", other),
        }
    }

    // only the ready monitor is registered
    assert_eq!(server.hub.registry().connection_count().await, 1);
    assert_silent(&mut monitor).await;
}

#[tokio::test]
async fn test_student_without_profile_is_rejected() {
    let server = TestServer::start(full_roster()).await;
    let mut monitor = server.ready_monitor(7).await;

    let mut ws = server.student(555).await;
    match timeout(Duration::from_secs(2), ws.next()).await {
        Ok(Some(Ok(Message::Close(_)))) | Ok(None) | Ok(Some(Err(_))) => {}
        other => panic!("expected the server to close, got {:?}", other),
    }

    assert_eq!(server.hub.registry().connection_count().await, 1);
    assert_silent(&mut monitor).await;
}

#[tokio::test]
async fn test_shutdown_closes_students_with_offline() {
    let server = TestServer::start(full_roster()).await;
    let mut student = server.student(101).await;
    server.wait_for_members(GroupName::batch(7), 1).await;

    server.hub.shutdown();

    match timeout(Duration::from_secs(2), student.next()).await {
        Ok(Some(Ok(Message::Close(_)))) | Ok(None) | Ok(Some(Err(_))) => {}
        other => panic!("expected the server to close, got {:?}", other),
    }
    server.wait_for_members(GroupName::batch(7), 0).await;
    assert_eq!(server.roster.get(1).await.unwrap().status, PresenceStatus::Offline);
}

#[tokio::test]
async fn test_slow_offline_write_outlives_socket_close_bound() {
    let config = GatewayConfig {
        close_timeout: Duration::from_millis(50),
        collaborator_timeout: Duration::from_secs(2),
        ..GatewayConfig::default()
    };
    let server = TestServer::start_slow(full_roster(), config, Duration::ZERO, Duration::from_millis(300)).await;
    let mut monitor = server.ready_monitor(7).await;

    let mut student = server.student(103).await;
    let online = next_event(&mut monitor).await;
    assert_eq!((online["student_id"].clone(), online["status"].clone()), (json!(3), json!("online")));

    student.close(None).await.unwrap();

    let offline = next_event(&mut monitor).await;
    assert_eq!(offline["type"], "student_status");
    assert_eq!((offline["student_id"].clone(), offline["status"].clone()), (json!(3), json!("offline")));
    assert_eq!(server.roster.get(3).await.unwrap().status, PresenceStatus::Offline);
}

#[tokio::test]
async fn test_drain_waits_for_slow_offline_writes() {
    let server = TestServer::start_slow(
        full_roster(),
        GatewayConfig::default(),
        Duration::ZERO,
        Duration::from_millis(300),
    )
    .await;
    let _student = server.student(103).await;
    server.wait_for_members(GroupName::batch(7), 1).await;
    for _ in 0..100 {
        if server.roster.get(3).await.unwrap().status == PresenceStatus::Online {
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(server.hub.live_sessions(), 1);

    server.hub.shutdown();
    assert!(server.hub.drain(Duration::from_secs(2)).await);

    assert_eq!(server.hub.live_sessions(), 0);
    assert_eq!(server.roster.get(3).await.unwrap().status, PresenceStatus::Offline);
}

#[tokio::test]
async fn test_snapshot_precedes_group_traffic_while_snapshot_stalls() {
    let server = TestServer::start_slow(
        full_roster(),
        GatewayConfig::default(),
        Duration::from_millis(300),
        Duration::ZERO,
    )
    .await;

    let mut monitor = server.monitor(7).await;
    server.wait_for_members(GroupName::monitor_batch(7), 1).await;

    // the monitor is a member but its snapshot read is still pending
    let event = serde_json::from_value(task_event(21)).unwrap();
    server.hub.publish(GroupName::monitor_batch(7), &event).await.unwrap();

    let first = next_event(&mut monitor).await;
    assert_eq!(first["type"], "initial_load");
    assert_eq!(first["students"].as_array().unwrap().len(), 3);
    let second = next_event(&mut monitor).await;
    assert_eq!(second["type"], "task_event");
    assert_eq!(second["task"]["id"], 21);
}
