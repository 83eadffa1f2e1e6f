/*!
Helpers pour les tests async : setup du logging et attentes bornées.
*/

use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Instant};

/// Installe env_logger une fois ; les appels suivants sont ignorés.
pub fn init_test_logging() {
    env_logger::builder().is_test(true).try_init().ok();
}

/// Prochain message, ou `None` si rien n'arrive dans `within`.
pub async fn recv_within<T>(rx: &mut mpsc::Receiver<T>, within: Duration) -> Option<T> {
    timeout(within, rx.recv()).await.ok().flatten()
}

/// Évalue `cond` toutes les 5ms jusqu'à ce qu'elle tienne. Renvoie false au timeout.
pub async fn wait_for<F, Fut>(within: Duration, mut cond: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + within;
    loop {
        if cond().await {
            return true;
        }
        if Instant::now() >= deadline {
            log::warn!("⏰ Condition not met within {:?}", within);
            return false;
        }
        sleep(Duration::from_millis(5)).await;
    }
}
