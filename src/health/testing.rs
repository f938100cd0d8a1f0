//! Scripted probe kind for unit tests.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::{Arc, Mutex};

use crate::health::probes::{ProbeRegistry, Prober};

#[derive(Debug, Default)]
struct Script {
    results: HashMap<IpAddr, bool>,
    hanging: HashSet<IpAddr>,
}

/// Per-destination probe results controlled by the test. Unknown
/// destinations are healthy.
#[derive(Debug, Clone, Default)]
pub struct ScriptedProbes {
    script: Arc<Mutex<Script>>,
}

impl ScriptedProbes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, ip: IpAddr, healthy: bool) {
        self.script.lock().unwrap().results.insert(ip, healthy);
    }

    /// Make probes to `ip` never complete.
    pub fn hang(&self, ip: IpAddr) {
        self.script.lock().unwrap().hanging.insert(ip);
    }

    /// A registry holding the builtins plus the `scripted` kind.
    pub fn registry(&self) -> ProbeRegistry {
        let mut registry = ProbeRegistry::with_builtins();
        let script = self.script.clone();
        registry.register("scripted", move |ip, _| {
            Ok(Box::new(ScriptedProbe {
                ip,
                script: script.clone(),
            }))
        });
        registry
    }
}

#[derive(Debug)]
struct ScriptedProbe {
    ip: IpAddr,
    script: Arc<Mutex<Script>>,
}

#[async_trait]
impl Prober for ScriptedProbe {
    async fn probe(&self) -> bool {
        let (hang, result) = {
            let script = self.script.lock().unwrap();
            (
                script.hanging.contains(&self.ip),
                script.results.get(&self.ip).copied().unwrap_or(true),
            )
        };
        if hang {
            std::future::pending::<()>().await;
        }
        result
    }
}
