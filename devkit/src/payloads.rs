/*!
Documents de stats uWSGI pour les tests

Produit du JSON calqué sur un vrai dump du socket `stats`, avec autant de
workers busy et idle que demandé.
*/

use serde_json::{json, Value};

#[derive(Debug, Clone)]
pub struct StatsPayload {
    cwd: String,
    uid: i64,
    gid: i64,
    pid: i64,
    busy: usize,
    idle: usize,
    other: usize,
    exceptions_per_worker: u64,
    load: i64,
}

impl StatsPayload {
    pub fn new(pid: i64) -> Self {
        Self {
            cwd: "/srv/app".into(),
            uid: 33,
            gid: 33,
            pid,
            busy: 0,
            idle: 0,
            other: 0,
            exceptions_per_worker: 0,
            load: 0,
        }
    }

    pub fn cwd(mut self, cwd: &str) -> Self {
        self.cwd = cwd.into();
        self
    }

    pub fn workers(mut self, busy: usize, idle: usize) -> Self {
        self.busy = busy;
        self.idle = idle;
        self
    }

    /// Workers ni busy ni idle (ex. `cheap`).
    pub fn other_workers(mut self, n: usize) -> Self {
        self.other = n;
        self
    }

    pub fn exceptions_per_worker(mut self, n: u64) -> Self {
        self.exceptions_per_worker = n;
        self
    }

    pub fn load(mut self, load: i64) -> Self {
        self.load = load;
        self
    }

    /// `HostId` que le kernel dérivera de ce document.
    pub fn host_id(&self) -> String {
        format!("{}:{}:{}:{}", self.cwd, self.uid, self.pid, self.gid)
    }

    pub fn to_value(&self) -> Value {
        let statuses = std::iter::repeat("busy")
            .take(self.busy)
            .chain(std::iter::repeat("idle").take(self.idle))
            .chain(std::iter::repeat("cheap").take(self.other));
        let workers: Vec<Value> = statuses
            .enumerate()
            .map(|(i, status)| {
                json!({
                    "id": i + 1,
                    "pid": self.pid + 1 + i as i64,
                    "accepting": 1,
                    "requests": 100,
                    "delta_requests": 3,
                    "exceptions": self.exceptions_per_worker,
                    "harakiri_count": 0,
                    "signals": 0,
                    "signal_queue": 0,
                    "status": status,
                    "rss": 0,
                    "vsz": 0,
                    "running_time": 12345,
                    "last_spawn": 1700000000,
                    "respawn_count": 1,
                    "tx": 2048,
                    "avg_rt": 1500,
                    "apps": [{
                        "id": 0,
                        "modifier1": 0,
                        "mountpoint": "",
                        "requests": 100,
                        "exceptions": 0,
                        "chdir": ""
                    }],
                    "cores": [{
                        "id": 0,
                        "requests": 100,
                        "static_requests": 0,
                        "routed_requests": 0,
                        "offloaded_requests": 0,
                        "write_errors": 0,
                        "read_errors": 0,
                        "in_request": 0,
                        "vars": []
                    }]
                })
            })
            .collect();
        json!({
            "version": "2.0.21",
            "listen_queue": 0,
            "listen_queue_errors": 0,
            "signal_queue": 0,
            "load": self.load,
            "pid": self.pid,
            "uid": self.uid,
            "gid": self.gid,
            "cwd": self.cwd,
            "locks": [{"user 0": 0}, {"signal": 0}],
            "sockets": [{
                "name": ":3031",
                "proto": "uwsgi",
                "queue": 0,
                "max_queue": 100,
                "shared": 0,
                "can_offload": 0
            }],
            "workers": workers
        })
    }

    pub fn to_json(&self) -> String {
        self.to_value().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_counts() {
        let v = StatsPayload::new(100).workers(2, 3).other_workers(1).to_value();
        let workers = v["workers"].as_array().unwrap();
        assert_eq!(workers.len(), 6);
        assert_eq!(workers.iter().filter(|w| w["status"] == "busy").count(), 2);
        assert_eq!(workers.iter().filter(|w| w["status"] == "idle").count(), 3);
    }
}
