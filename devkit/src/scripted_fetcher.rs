/*!
Fetcher de stats scripté

Rejoue une file d'étapes par adresse cible. Quand la file d'une cible est vide,
l'étape par défaut s'applique (connexion refusée sauf changement).
*/

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use uwsgi_fleet_kernel::{FetchError, HostAddress, StatsConnection, StatsFetcher};

#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Connexion refusée.
    Refuse,
    /// Connecté, mais la lecture échoue.
    ReadError,
    /// Sert ce body.
    Body(String),
}

#[derive(Debug)]
struct State {
    scripts: HashMap<HostAddress, VecDeque<Step>>,
    default: Step,
    connects: HashMap<HostAddress, usize>,
}

/// Fetcher qui rejoue un script au lieu d'ouvrir des sockets
#[derive(Clone)]
pub struct ScriptedFetcher {
    state: Arc<Mutex<State>>,
}

impl Default for ScriptedFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                scripts: HashMap::new(),
                default: Step::Refuse,
                connects: HashMap::new(),
            })),
        }
    }

    /// Ajoute des étapes pour `target`.
    pub fn script(&self, target: &HostAddress, steps: impl IntoIterator<Item = Step>) {
        self.state
            .lock()
            .scripts
            .entry(target.clone())
            .or_default()
            .extend(steps);
    }

    pub fn set_default(&self, step: Step) {
        self.state.lock().default = step;
    }

    /// Tentatives de connexion vers `target` jusqu'ici.
    pub fn connects(&self, target: &HostAddress) -> usize {
        self.state.lock().connects.get(target).copied().unwrap_or(0)
    }
}

struct ScriptedConnection {
    target: String,
    step: Step,
}

#[async_trait]
impl StatsConnection for ScriptedConnection {
    async fn read_to_end(self: Box<Self>) -> Result<Vec<u8>, FetchError> {
        let ScriptedConnection { target, step } = *self;
        match step {
            Step::Body(body) => Ok(body.into_bytes()),
            _ => Err(FetchError::Read {
                target,
                source: std::io::ErrorKind::ConnectionReset.into(),
            }),
        }
    }
}

#[async_trait]
impl StatsFetcher for ScriptedFetcher {
    async fn connect(&self, target: &HostAddress) -> Result<Box<dyn StatsConnection>, FetchError> {
        let step = {
            let mut state = self.state.lock();
            *state.connects.entry(target.clone()).or_insert(0) += 1;
            let default = state.default.clone();
            state
                .scripts
                .get_mut(target)
                .and_then(VecDeque::pop_front)
                .unwrap_or(default)
        };
        log::debug!("🔌 [MOCK] Connect {} -> {:?}", target, step);
        match step {
            Step::Refuse => Err(FetchError::Connect {
                target: target.to_string(),
                source: std::io::ErrorKind::ConnectionRefused.into(),
            }),
            step => Ok(Box::new(ScriptedConnection {
                target: target.to_string(),
                step,
            })),
        }
    }
}
