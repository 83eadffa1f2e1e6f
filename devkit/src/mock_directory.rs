/*!
Mock du service d'annuaire

Arbre de clés plat gardé en mémoire. Les clés sont des chemins complets
(`/services/web/a`) ; un listing renvoie les enfants directs du chemin demandé.
Chaque panne que le watcher doit encaisser s'active et se désactive à chaud.
*/

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use uwsgi_fleet_kernel::{DirEntry, DirListing, Directory, DirectoryError};

#[derive(Debug, Clone)]
enum Node {
    Value(String),
    Dir,
}

#[derive(Debug, Default)]
struct State {
    nodes: BTreeMap<String, Node>,
    failing_keys: HashSet<String>,
    unreachable: bool,
    not_a_directory: bool,
    list_calls: usize,
    get_calls: usize,
}

/// Mock d'annuaire qui simule un etcd v2
#[derive(Clone, Default)]
pub struct MockDirectory {
    state: Arc<Mutex<State>>,
}

impl MockDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enregistre `value` sous le chemin complet de la clé.
    pub fn set(&self, key: &str, value: &str) {
        log::debug!("📝 [MOCK] Set {} = {}", key, value);
        self.state.lock().nodes.insert(key.to_string(), Node::Value(value.to_string()));
    }

    pub fn remove(&self, key: &str) {
        log::debug!("🗑️ [MOCK] Removed {}", key);
        self.state.lock().nodes.remove(key);
    }

    pub fn add_subdir(&self, key: &str) {
        self.state.lock().nodes.insert(key.to_string(), Node::Dir);
    }

    /// Les lectures de `key` échouent jusqu'à l'appel de [`heal_key`](Self::heal_key).
    pub fn fail_key(&self, key: &str) {
        self.state.lock().failing_keys.insert(key.to_string());
    }

    pub fn heal_key(&self, key: &str) {
        self.state.lock().failing_keys.remove(key);
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.lock().unreachable = unreachable;
    }

    /// Fait passer chaque chemin listé pour une simple valeur.
    pub fn set_not_a_directory(&self, flag: bool) {
        self.state.lock().not_a_directory = flag;
    }

    pub fn list_calls(&self) -> usize {
        self.state.lock().list_calls
    }

    pub fn get_calls(&self) -> usize {
        self.state.lock().get_calls
    }
}

fn is_direct_child(parent: &str, key: &str) -> bool {
    let prefix = format!("{}/", parent.trim_end_matches('/'));
    match key.strip_prefix(&prefix) {
        Some(rest) => !rest.is_empty() && !rest.contains('/'),
        None => false,
    }
}

#[async_trait]
impl Directory for MockDirectory {
    async fn list(&self, path: &str) -> Result<DirListing, DirectoryError> {
        let mut state = self.state.lock();
        state.list_calls += 1;
        if state.unreachable {
            return Err(DirectoryError::Unreachable(format!("mock: {path} unreachable")));
        }
        if state.not_a_directory {
            return Ok(DirListing {
                is_dir: false,
                children: Vec::new(),
            });
        }
        let children = state
            .nodes
            .iter()
            .filter(|(key, _)| is_direct_child(path, key))
            .map(|(key, node)| DirEntry {
                key: key.clone(),
                is_dir: matches!(node, Node::Dir),
            })
            .collect();
        Ok(DirListing {
            is_dir: true,
            children,
        })
    }

    async fn get(&self, key: &str) -> Result<String, DirectoryError> {
        let mut state = self.state.lock();
        state.get_calls += 1;
        if state.failing_keys.contains(key) {
            return Err(DirectoryError::Unreachable(format!("mock: read of {key} failed")));
        }
        match state.nodes.get(key) {
            Some(Node::Value(v)) => Ok(v.clone()),
            Some(Node::Dir) => Err(DirectoryError::Protocol(format!("{key} is a directory"))),
            None => Err(DirectoryError::NotFound(key.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_children_only() {
        assert!(is_direct_child("/web", "/web/a"));
        assert!(is_direct_child("/", "/a"));
        assert!(!is_direct_child("/web", "/web/sub/a"));
        assert!(!is_direct_child("/web", "/webby/a"));
        assert!(!is_direct_child("/web", "/web/"));
    }
}
