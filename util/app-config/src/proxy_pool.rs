use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Deserialize;

use quarry_types::ProxySpec;

#[derive(Deserialize)]
struct ProxyConfigFile {
    pools: HashMap<String, Vec<ProxySpec>>,
}

/// Proxies of one named pool, handed out round-robin per invocation.
/// Selection state never crosses process boundaries.
#[derive(Debug)]
pub struct ProxyPool {
    proxies: Vec<ProxySpec>,
    cursor: AtomicUsize,
}

impl ProxyPool {
    /// Loads `pool` from a proxy-config JSON file of the shape
    /// `{ "pools": { "<name>": [ { "server": ..., "username"?, "password"? } ] } }`.
    pub fn load(path: &Path, pool: &str) -> Result<ProxyPool, String> {
        let raw = std::fs::read_to_string(path)
            .map_err(|err| format!("cannot read proxy config {}: {err}", path.display()))?;
        let config: ProxyConfigFile = serde_json::from_str(&raw).map_err(|err| {
            format!(
                "proxy config {} is not valid: {err}; expected \
                 {{\"pools\": {{\"default\": [{{\"server\": \"http://host:port\"}}]}}}}",
                path.display()
            )
        })?;
        let proxies = config.pools.get(pool).cloned().ok_or_else(|| {
            let mut known: Vec<&str> = config.pools.keys().map(String::as_str).collect();
            known.sort_unstable();
            format!(
                "proxy pool {pool:?} not found in {}; known pools: {known:?}; \
                 pass e.g. --proxy-pool {}",
                path.display(),
                known.first().unwrap_or(&"default")
            )
        })?;
        if proxies.is_empty() {
            return Err(format!(
                "proxy pool {pool:?} in {} is empty",
                path.display()
            ));
        }
        Ok(ProxyPool {
            proxies,
            cursor: AtomicUsize::new(0),
        })
    }

    /// Next proxy, round-robin.
    pub fn next(&self) -> ProxySpec {
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.proxies.len();
        self.proxies[index].clone()
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_robin_rotation() {
        let tmp = tempfile::TempDir::new().expect("tempdir");
        let path = tmp.path().join("proxies.json");
        std::fs::write(
            &path,
            r#"{"pools": {"default": [
                {"server": "http://a:1"},
                {"server": "http://b:2", "username": "u", "password": "p"}
            ]}}"#,
        )
        .expect("write");

        let pool = ProxyPool::load(&path, "default").expect("load");
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.next().server, "http://a:1");
        assert_eq!(pool.next().server, "http://b:2");
        assert_eq!(pool.next().server, "http://a:1");
    }

    #[test]
    fn unknown_pool_names_the_alternatives() {
        let tmp = tempfile::TempDir::new().expect("tempdir");
        let path = tmp.path().join("proxies.json");
        std::fs::write(&path, r#"{"pools": {"eu": [{"server": "http://a:1"}]}}"#).expect("write");

        let err = ProxyPool::load(&path, "us").expect_err("unknown pool");
        assert!(err.contains("\"us\""));
        assert!(err.contains("eu"));
        assert!(err.contains("--proxy-pool"));
    }
}
