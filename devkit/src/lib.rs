/*!
# uwsgi-fleet DevKit - Outils de test pour le kernel de flotte

Remplaçants en mémoire ou en loopback pour chaque collaborateur du kernel :
- `MockDirectory` : service d'annuaire avec clés et pannes scriptées
- `ScriptedFetcher` : fetcher de stats qui rejoue des étapes par hôte
- `FakeStatsServer` : vrai socket TCP de stats servant un payload JSON
- `MockSink` : sink de métriques qui enregistre chaque push
- `StatsPayload` : builder de documents de stats uWSGI
*/

pub mod mock_directory;
pub mod mock_sink;
pub mod payloads;
pub mod scripted_fetcher;
pub mod stats_server;
pub mod test_utils;

pub use mock_directory::MockDirectory;
pub use mock_sink::MockSink;
pub use payloads::StatsPayload;
pub use scripted_fetcher::{ScriptedFetcher, Step};
pub use stats_server::FakeStatsServer;
pub use test_utils::{init_test_logging, recv_within, wait_for};
