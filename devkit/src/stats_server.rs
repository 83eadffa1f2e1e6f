/*!
Faux serveur de stats uWSGI

Écoute sur un port loopback et, comme le vrai socket de stats, écrit le
payload courant à chaque client puis ferme la connexion.
*/

use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use uwsgi_fleet_kernel::HostAddress;

/// Serveur de stats sur 127.0.0.1, arrêté au drop
pub struct FakeStatsServer {
    address: HostAddress,
    payload: Arc<Mutex<Vec<u8>>>,
    connections: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl FakeStatsServer {
    pub async fn start(payload: impl Into<Vec<u8>>) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("bind fake stats server")?;
        let port = listener.local_addr()?.port();
        let payload = Arc::new(Mutex::new(payload.into()));
        let connections = Arc::new(AtomicUsize::new(0));

        let served = payload.clone();
        let counter = connections.clone();
        let task = tokio::spawn(async move {
            loop {
                let (mut sock, peer) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(e) => {
                        log::warn!("⚠️ [FAKE] Accept failed: {}", e);
                        continue;
                    }
                };
                counter.fetch_add(1, Ordering::SeqCst);
                let body = served.lock().clone();
                tokio::spawn(async move {
                    if let Err(e) = sock.write_all(&body).await {
                        log::warn!("⚠️ [FAKE] Write to {} failed: {}", peer, e);
                    }
                    let _ = sock.shutdown().await;
                });
            }
        });

        log::info!("🚀 [FAKE] Stats server on 127.0.0.1:{}", port);
        Ok(Self {
            address: HostAddress::new("127.0.0.1", port),
            payload,
            connections,
            task,
        })
    }

    pub fn address(&self) -> &HostAddress {
        &self.address
    }

    pub fn port(&self) -> u16 {
        self.address.port
    }

    pub fn set_payload(&self, payload: impl Into<Vec<u8>>) {
        *self.payload.lock() = payload.into();
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

impl Drop for FakeStatsServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}
