#![allow(dead_code)]

use once_cell::sync::Lazy;
use reqwest::Client;
use serde_json::{json, Value};
use std::net::TcpListener;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::sleep;

pub struct TestServer {
    pub base_url: String,
    child: Child,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

pub static TEST_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));
static SERVER: Lazy<Mutex<Option<Arc<TestServer>>>> = Lazy::new(|| Mutex::new(None));

#[cfg(unix)]
mod cleanup {
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Once;

    static REGISTER: Once = Once::new();
    static PID: AtomicI32 = AtomicI32::new(0);

    pub fn register(pid: u32) {
        REGISTER.call_once(|| {
            PID.store(pid as i32, Ordering::SeqCst);
            unsafe {
                libc::atexit(on_exit);
            }
        });
    }

    extern "C" fn on_exit() {
        let pid = PID.load(Ordering::SeqCst);
        if pid > 0 {
            unsafe {
                libc::kill(pid, libc::SIGTERM);
            }
        }
    }
}

fn pick_free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind random port");
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

fn unique_data_path() -> std::path::PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let mut path = std::env::temp_dir();
    path.push(format!("dandani_http_{}_{}.json", std::process::id(), nanos));
    path
}

/// Challenges and practices every scenario runs against.
///
/// Challenge 1 has 31 days, challenge 2 is recommended with 3 days and
/// challenge 3 has no practice for day 2. `returning-user` has records on
/// challenge 1 from an earlier run.
pub fn seed() -> Value {
    let mut practices = Vec::new();
    let mut next_id = 1;
    let mut add = |challenge_id: u32, day: u32| {
        practices.push(json!({
            "id": next_id,
            "challenge_id": challenge_id,
            "day": day,
            "title": format!("Challenge {challenge_id} day {day}"),
            "description": "Write down one thing you noticed today.",
            "category": "reflection",
        }));
        next_id += 1;
    };
    for day in 1..=31 {
        add(1, day);
    }
    for day in 1..=3 {
        add(2, day);
    }
    add(3, 1);
    add(3, 3);

    json!({
        "challenges": [
            {
                "id": 1,
                "name": "Thirty-one calm days",
                "description": "A month of small pauses.",
                "is_recommended": false,
                "is_popular": true,
                "created_at": "2024-01-01T00:00:00Z"
            },
            {
                "id": 2,
                "name": "Three-day reset",
                "description": "A short start.",
                "is_recommended": true,
                "is_popular": false,
                "created_at": "2024-01-02T00:00:00Z"
            },
            {
                "id": 3,
                "name": "Patchy plan",
                "description": "Missing a day on purpose.",
                "created_at": "2024-01-03T00:00:00Z"
            }
        ],
        "practices": practices,
        "feedback": [
            {
                "user_id": "returning-user",
                "challenge_id": 1,
                "practice_day": 3,
                "mood_change": "same",
                "was_helpful": "yes",
                "practice_description": null,
                "created_at": "2024-02-01T09:00:00Z"
            },
            {
                "user_id": "returning-user",
                "challenge_id": 1,
                "practice_day": 5,
                "mood_change": "improved",
                "was_helpful": "yes",
                "practice_description": "felt lighter",
                "created_at": "2024-02-03T09:00:00Z"
            }
        ],
        "events": []
    })
}

async fn wait_until_ready(base_url: &str) {
    let client = Client::new();
    let deadline = Instant::now() + Duration::from_secs(3);
    loop {
        if let Ok(resp) = client.get(format!("{base_url}/api/challenges")).send().await {
            if resp.status().is_success() {
                return;
            }
        }
        if Instant::now() > deadline {
            panic!("server did not become ready");
        }
        sleep(Duration::from_millis(100)).await;
    }
}

async fn spawn_server() -> TestServer {
    let port = pick_free_port();
    let data_path = unique_data_path();
    std::fs::write(&data_path, serde_json::to_vec_pretty(&seed()).unwrap())
        .expect("write seed data");

    let child = Command::new(env!("CARGO_BIN_EXE_dandani"))
        .env("PORT", port.to_string())
        .env("APP_DATA_PATH", &data_path)
        .env("DIGEST_ENABLED", "false")
        .env("REPORT_TIMEZONE", "UTC")
        .env("RUST_LOG", "info")
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .spawn()
        .expect("failed to spawn server");

    #[cfg(unix)]
    cleanup::register(child.id());

    let base_url = format!("http://127.0.0.1:{port}");
    wait_until_ready(&base_url).await;

    TestServer { base_url, child }
}

pub async fn shared_server() -> Arc<TestServer> {
    let mut guard = SERVER.lock().await;
    if let Some(server) = guard.as_ref() {
        return Arc::clone(server);
    }
    let server = Arc::new(spawn_server().await);
    *guard = Some(Arc::clone(&server));
    server
}
