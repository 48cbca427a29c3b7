use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_test::assert_ok;
use tokio_tungstenite::tungstenite::Message;

use tick_pairs::app::App;
use tick_pairs::config::Config;
use tick_pairs::model::tick::{Side, Tick};
use tick_pairs::server;

const TEST_CONFIG: &str = r#"
[feed]
source = "synthetic"
symbols = ["btcusdt", "ethusdt"]
synthetic_period_ms = 20

[store]
database_path = ""

[delivery]
batch_flush_ms = 20

[server]
bind_addr = "127.0.0.1:0"
"#;

struct TestServer {
    app: App,
    addr: SocketAddr,
    server: JoinHandle<anyhow::Result<()>>,
    client: reqwest::Client,
}

impl TestServer {
    async fn spawn() -> Self {
        let config = Config::from_toml_str(TEST_CONFIG).expect("test config should parse");
        let app = App::build(config).expect("app should build");
        let listener = TcpListener::bind(&app.config.server.bind_addr)
            .await
            .expect("bind should succeed");
        let addr = listener.local_addr().expect("listener address");
        let server = tokio::spawn(server::serve(listener, app.state()));
        Self {
            app,
            addr,
            server,
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    async fn get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(self.url(path))
            .send()
            .await
            .expect("request should succeed")
    }

    async fn post(&self, path: &str, body: Value) -> reqwest::Response {
        self.client
            .post(self.url(path))
            .json(&body)
            .send()
            .await
            .expect("request should succeed")
    }

    async fn delete(&self, path: &str) -> reqwest::Response {
        self.client
            .delete(self.url(path))
            .send()
            .await
            .expect("request should succeed")
    }

    /// close(ethusdt) = 2 * close(btcusdt) + 3, one tick per minute.
    fn seed_linear_pair(&self, points: u64) {
        for i in 0..points {
            let x = 100.0 + i as f64 + ((i * 3) % 7) as f64;
            let ts = 1_700_000_000_000 + i * 60_000;
            self.app
                .store
                .append(Tick::new("btcusdt", x, 1.0, ts, Side::Buy))
                .expect("append should succeed");
            self.app
                .store
                .append(Tick::new("ethusdt", 2.0 * x + 3.0, 1.0, ts, Side::Buy))
                .expect("append should succeed");
        }
    }

    async fn shutdown(self) {
        assert_ok!(self.app.shutdown().await);
        let served = tokio::time::timeout(Duration::from_secs(5), self.server)
            .await
            .expect("server should stop after shutdown")
            .expect("server task should not panic");
        assert_ok!(served);
    }
}

#[tokio::test]
/// Verifies the health endpoint reports the configured source and symbols.
async fn health_reports_source_and_symbols() {
    let srv = TestServer::spawn().await;
    let resp = srv.get("/api/health").await;
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.expect("json body");
    assert_eq!(body["status"], "ok");
    assert_eq!(body["collecting"], false);
    assert_eq!(body["source"], "synthetic");
    assert_eq!(body["symbols"], json!(["btcusdt", "ethusdt"]));
    srv.shutdown().await;
}

#[tokio::test]
/// Verifies symbol management: invalid symbols are 400, valid ones are
/// normalized, added and removed.
async fn symbol_management() {
    let srv = TestServer::spawn().await;

    let resp = srv.post("/api/symbols", json!({ "symbol": "SOL/USDT" })).await;
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.expect("json body");
    assert!(body["error"].as_str().is_some());

    let body: Value = srv
        .post("/api/symbols", json!({ "symbol": "SOLUSDT" }))
        .await
        .json()
        .await
        .expect("json body");
    assert_eq!(body["added"], true);
    assert_eq!(body["symbols"], json!(["btcusdt", "ethusdt", "solusdt"]));

    let body: Value = srv
        .delete("/api/symbols/ETHUSDT")
        .await
        .json()
        .await
        .expect("json body");
    assert_eq!(body["removed"], true);
    assert_eq!(srv.app.ingestor.symbols(), vec!["btcusdt", "solusdt"]);
    srv.shutdown().await;
}

#[tokio::test]
/// Verifies start and stop collection are idempotent over HTTP and that a
/// running synthetic feed fills the store.
async fn collection_lifecycle() {
    let srv = TestServer::spawn().await;

    let body: Value = srv.post("/api/start-collection", json!({})).await.json().await.expect("json body");
    assert_eq!(body["status"], "started");
    let body: Value = srv.post("/api/start-collection", json!({})).await.json().await.expect("json body");
    assert_eq!(body["status"], "already_running");

    let mut filled = false;
    for _ in 0..200 {
        if srv.app.store.len("btcusdt") > 0 {
            filled = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(filled, "synthetic feed should produce ticks");

    let body: Value = srv.post("/api/stop-collection", json!({})).await.json().await.expect("json body");
    assert_eq!(body["status"], "stopped");
    let body: Value = srv.post("/api/stop-collection", json!({})).await.json().await.expect("json body");
    assert_eq!(body["status"], "not_running");
    srv.shutdown().await;
}

#[tokio::test]
/// Verifies pair analytics over HTTP: a bad timeframe is a 400, a valid
/// request returns the recovered hedge ratio.
async fn calculate_analytics_over_http() {
    let srv = TestServer::spawn().await;
    srv.seed_linear_pair(60);

    let resp = srv
        .post(
            "/api/calculate-analytics",
            json!({ "symbol1": "btcusdt", "symbol2": "ethusdt", "timeframe": "7q" }),
        )
        .await;
    assert_eq!(resp.status(), 400);

    let resp = srv
        .post(
            "/api/calculate-analytics",
            json!({ "symbol1": "btcusdt", "symbol2": "ethusdt", "timeframe": "5é" }),
        )
        .await;
    assert_eq!(resp.status(), 400);

    let resp = srv
        .post(
            "/api/calculate-analytics",
            json!({ "symbol1": "BTCUSDT", "symbol2": "ethusdt", "timeframe": "1m", "window_size": 20 }),
        )
        .await;
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.expect("json body");
    assert_eq!(body["success"], true);
    assert_eq!(body["aligned_points"], 60);
    let hedge = body["hedge_ratio"].as_f64().expect("hedge ratio");
    assert!((hedge - 2.0).abs() < 1e-9);
    assert_eq!(body["adf"]["placeholder"], true);
    assert_eq!(body["pair"]["symbol1"], "btcusdt");

    let body: Value = srv
        .post(
            "/api/calculate-analytics",
            json!({ "symbol1": "btcusdt", "symbol2": "dogeusdt" }),
        )
        .await
        .json()
        .await
        .expect("json body");
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["kind"], "insufficient_data");
    srv.shutdown().await;
}

#[tokio::test]
/// Verifies tick export in both formats and the per-symbol summary.
async fn export_and_stats() {
    let srv = TestServer::spawn().await;
    srv.seed_linear_pair(10);

    let ticks: Vec<Value> = srv
        .get("/api/ticks/btcusdt?from_ms=1700000060000&to_ms=1700000180000")
        .await
        .json()
        .await
        .expect("json body");
    assert_eq!(ticks.len(), 3);

    let resp = srv.get("/api/ticks/btcusdt?format=csv").await;
    assert_eq!(resp.status(), 200);
    let csv = resp.text().await.expect("text body");
    assert_eq!(csv.lines().count(), 11);
    assert!(csv.starts_with("symbol,timestamp_ms,price,size,side"));

    assert_eq!(srv.get("/api/ticks/btcusdt?format=xml").await.status(), 400);

    let stats: Value = srv.get("/api/stats/ethusdt?limit=5").await.json().await.expect("json body");
    assert_eq!(stats["tick_count"], 5);
    srv.shutdown().await;
}

#[tokio::test]
/// Verifies generated history fills every active symbol and shows up in the
/// initial data snapshot.
async fn generate_test_data_then_initial_data() {
    let srv = TestServer::spawn().await;
    let body: Value = srv
        .post("/api/generate-test-data", json!({}))
        .await
        .json()
        .await
        .expect("json body");
    assert_eq!(body["ticks"], 200);

    let initial: Value = srv.get("/api/initial-data").await.json().await.expect("json body");
    assert_eq!(initial["btcusdt"].as_array().map(Vec::len), Some(100));
    assert_eq!(initial["ethusdt"].as_array().map(Vec::len), Some(100));
    srv.shutdown().await;
}

#[tokio::test]
/// Verifies alert create, list and delete, including 400 and 404 paths.
async fn alert_crud() {
    let srv = TestServer::spawn().await;

    let resp = srv
        .post(
            "/api/alerts",
            json!({ "name": "", "symbol": "btcusdt", "condition": "above", "threshold": -1.0 }),
        )
        .await;
    assert_eq!(resp.status(), 400);

    let resp = srv
        .post(
            "/api/alerts",
            json!({ "name": "btc high", "symbol": "BTCUSDT", "condition": "above", "threshold": 70000.0 }),
        )
        .await;
    assert_eq!(resp.status(), 201);
    let created: Value = resp.json().await.expect("json body");
    let id = created["id"].as_u64().expect("alert id");
    assert_eq!(created["symbol"], "btcusdt");
    assert_eq!(created["triggered"], false);

    let listed: Vec<Value> = srv.get("/api/alerts").await.json().await.expect("json body");
    assert_eq!(listed.len(), 1);

    assert_eq!(srv.delete(&format!("/api/alerts/{}", id)).await.status(), 200);
    assert_eq!(srv.delete(&format!("/api/alerts/{}", id)).await.status(), 404);
    srv.shutdown().await;
}

#[tokio::test]
/// Verifies the websocket greets the client, accepts symbol commands and
/// streams live ticks once collection runs.
async fn websocket_streams_ticks_and_accepts_commands() {
    let srv = TestServer::spawn().await;
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", srv.addr))
        .await
        .expect("ws connect");

    let hello = ws.next().await.expect("hello frame").expect("hello ok");
    let hello: Value = serde_json::from_str(hello.to_text().expect("text frame")).expect("json");
    assert_eq!(hello["type"], "status");

    ws.send(Message::Text(
        json!({ "type": "add_symbol", "symbol": "ADAUSDT" }).to_string().into(),
    ))
    .await
    .expect("ws send");
    ws.send(Message::Text(
        json!({ "type": "remove_symbol", "symbol": "ethusdt" }).to_string().into(),
    ))
    .await
    .expect("ws send");

    let mut updated = false;
    for _ in 0..200 {
        if srv.app.ingestor.symbols() == vec!["adausdt", "btcusdt"] {
            updated = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(updated, "ws commands should update the symbol set");

    srv.app.ingestor.start().await;
    let frame = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    let event: Value = serde_json::from_str(&text).expect("json event");
                    if event["type"] == "ticks" {
                        return event;
                    }
                }
                Some(Ok(_)) => {}
                other => panic!("ws closed early: {:?}", other),
            }
        }
    })
    .await
    .expect("tick event within timeout");
    let first = &frame["data"][0];
    assert!(first["symbol"] == "adausdt" || first["symbol"] == "btcusdt");

    srv.shutdown().await;
}
