mod common;

use std::io;
use std::sync::{Arc, Mutex};

use tokio_tungstenite::connect_async;
use tracing_subscriber::EnvFilter;

use murmur_api::token;

use common::{TEST_SECRET, harness, seed_user, spawn_server};

/// Shared buffer the fmt subscriber writes into.
#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl LogBuffer {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

#[tokio::test]
async fn upgrade_token_stays_out_of_request_logs() {
    let logs = LogBuffer::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("murmur=debug,tower_http=debug"))
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let h = harness();
    let user = seed_user(&h.db, "aaaaaaaaaaaaaaaaaaaaaaaa", "alice");
    let addr = spawn_server(h.state.clone()).await;
    let jwt = token::mint(TEST_SECRET, user).unwrap();

    let (mut ws, _) = connect_async(format!("ws://{addr}/ws?token={jwt}")).await.unwrap();
    ws.close(None).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let contents = logs.contents();
    assert!(contents.contains("path=/ws"), "request span not logged:\n{contents}");
    assert!(!contents.contains(&jwt), "token leaked into logs:\n{contents}");
}
