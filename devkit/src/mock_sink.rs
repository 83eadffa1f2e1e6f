/*!
Mock du sink de métriques

Enregistre chaque datum poussé. Peut rejeter les push, ou bloquer pour
déclencher les délais de push.
*/

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use uwsgi_fleet_kernel::{MetricDatum, MetricsSink, SinkError};

#[derive(Debug, Default)]
struct State {
    pushed: Vec<MetricDatum>,
    attempts: usize,
    failing: bool,
    delay: Option<Duration>,
}

/// Mock de sink qui simule un backend de métriques
#[derive(Clone, Default)]
pub struct MockSink {
    state: Arc<Mutex<State>>,
}

impl MockSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.state.lock().failing = failing;
    }

    /// Durée d'attente dans chaque push.
    pub fn set_delay(&self, delay: Option<Duration>) {
        self.state.lock().delay = delay;
    }

    /// Données poussées avec succès, dans l'ordre.
    pub fn pushed(&self) -> Vec<MetricDatum> {
        self.state.lock().pushed.clone()
    }

    /// Tous les appels à `push`, rejetés compris.
    pub fn attempts(&self) -> usize {
        self.state.lock().attempts
    }

    /// Dernière valeur poussée par nom de métrique.
    pub fn latest(&self) -> HashMap<String, f64> {
        self.state
            .lock()
            .pushed
            .iter()
            .map(|d| (d.metric_name.clone(), d.value))
            .collect()
    }

    pub fn clear(&self) {
        self.state.lock().pushed.clear();
    }
}

#[async_trait]
impl MetricsSink for MockSink {
    async fn push(&self, datum: &MetricDatum) -> Result<(), SinkError> {
        let delay = {
            let mut state = self.state.lock();
            state.attempts += 1;
            if state.failing {
                log::info!("❌ [MOCK] Rejected {}", datum.metric_name);
                return Err(SinkError::Rejected {
                    metric: datum.metric_name.clone(),
                    reason: "mock sink failing".into(),
                });
            }
            state.delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        log::info!("📤 [MOCK] Pushed {} = {}", datum.metric_name, datum.value);
        self.state.lock().pushed.push(datum.clone());
        Ok(())
    }
}
