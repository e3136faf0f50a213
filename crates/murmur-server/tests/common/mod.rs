//! Shared setup for the server integration tests: an in-memory store, a
//! mailer that keeps what it sends, and an ephemeral-port server.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{SubsecRound, Utc};

use murmur_api::mailer::Mailer;
use murmur_api::password;
use murmur_db::Database;
use murmur_server::config::Config;
use murmur_server::{ServerState, app};
use murmur_types::ObjectId;
use murmur_types::models::User;

pub const TEST_SECRET: &str = "test-secret";
pub const PASSWORD: &str = "Secret123";

#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<(String, String)>>,
}

impl Mailer for RecordingMailer {
    fn send(&self, to: &str, _subject: &str, body: &str) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push((to.to_string(), body.to_string()));
        Ok(())
    }
}

impl RecordingMailer {
    /// The six-digit code from the latest mail to `to`, waiting briefly for
    /// background delivery.
    pub async fn wait_for_code(&self, to: &str) -> String {
        for _ in 0..100 {
            let code = self
                .sent
                .lock()
                .unwrap()
                .iter()
                .rev()
                .find(|(addr, _)| addr == to)
                .and_then(|(_, body)| extract_code(body));
            if let Some(code) = code {
                return code;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("no verification code mailed to {to}");
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

fn extract_code(body: &str) -> Option<String> {
    body.split(|c: char| !c.is_ascii_digit())
        .find(|part| part.len() == 6)
        .map(str::to_string)
}

pub struct Harness {
    pub state: ServerState,
    pub db: Arc<Database>,
    pub mailer: Arc<RecordingMailer>,
}

pub fn harness_with(configure: impl FnOnce(&mut Config)) -> Harness {
    let mut config = Config::from_lookup(|_| None).unwrap();
    config.jwt_secret = TEST_SECRET.to_string();
    configure(&mut config);

    let db = Arc::new(Database::open_in_memory().unwrap());
    let mailer = Arc::new(RecordingMailer::default());
    let state = ServerState::new(db.clone(), &config, mailer.clone());
    Harness { state, db, mailer }
}

pub fn harness() -> Harness {
    harness_with(|_| {})
}

/// Serve the app on 127.0.0.1 with an OS-assigned port.
pub async fn spawn_server(state: ServerState) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app(state)).await.unwrap();
    });
    addr
}

/// Insert a verified user with a fixed id.
pub fn seed_user(db: &Database, id: &str, name: &str) -> ObjectId {
    let now = Utc::now().trunc_subsecs(6);
    let id: ObjectId = id.parse().unwrap();
    db.insert_user(&User {
        id,
        email: format!("{name}@example.com"),
        username: name.to_string(),
        password: password::hash(PASSWORD).unwrap(),
        verified_email: true,
        otp_token: None,
        otp_expires_at: None,
        created_at: now,
        updated_at: now,
    })
    .unwrap();
    id
}
