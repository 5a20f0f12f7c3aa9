use comms::specs::{Endpoint, Topology};

use crate::OrchestratorError;

/// Computes the endpoints of every slot of a cluster, before anything is spawned.
///
/// Ports are handed out sequentially from the base port: parameter servers first,
/// then workers.
#[derive(Debug, Clone)]
pub struct TopologyBuilder {
    param_servers: usize,
    workers: usize,
    host: String,
    base_port: u16,
}

impl TopologyBuilder {
    pub const DEFAULT_HOST: &'static str = "127.0.0.1";
    pub const DEFAULT_BASE_PORT: u16 = 12222;

    pub fn new(param_servers: usize, workers: usize) -> Self {
        Self {
            param_servers,
            workers,
            host: Self::DEFAULT_HOST.to_string(),
            base_port: Self::DEFAULT_BASE_PORT,
        }
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn base_port(mut self, base_port: u16) -> Self {
        self.base_port = base_port;
        self
    }

    /// Builds the topology.
    ///
    /// # Errors
    /// `InvalidConfig` if a role has no slots or the ports don't fit in `u16`.
    pub fn build(self) -> Result<Topology, OrchestratorError> {
        if self.param_servers == 0 {
            return Err(OrchestratorError::InvalidConfig(
                "at least one parameter server is required".into(),
            ));
        }

        if self.workers == 0 {
            return Err(OrchestratorError::InvalidConfig(
                "at least one worker is required".into(),
            ));
        }

        let slots = self.param_servers + self.workers;
        let last = usize::from(self.base_port) + slots - 1;
        if last > usize::from(u16::MAX) {
            return Err(OrchestratorError::InvalidConfig(format!(
                "{slots} slots starting at port {} overflow the port range",
                self.base_port
            )));
        }

        // Bounded by the check above.
        let endpoint = |slot: usize| Endpoint::new(self.host.clone(), self.base_port + slot as u16);
        let ps = (0..self.param_servers).map(endpoint).collect();
        let worker = (self.param_servers..slots).map(endpoint).collect();

        Ok(Topology::from_endpoints(ps, worker)?)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use comms::specs::Role;

    use super::*;

    #[test]
    fn every_slot_gets_a_unique_sequential_port() {
        for (ps, workers) in [(1, 1), (2, 3), (4, 16), (1, 64)] {
            let topology = TopologyBuilder::new(ps, workers).build().unwrap();

            let servers = topology.endpoints(Role::ParameterServer);
            let workers_eps = topology.endpoints(Role::Worker);
            assert_eq!(servers.len(), ps);
            assert_eq!(workers_eps.len(), workers);

            let ports: HashSet<_> = servers.iter().chain(workers_eps).map(|e| e.port).collect();
            assert_eq!(ports.len(), ps + workers);

            assert_eq!(servers[0].port, TopologyBuilder::DEFAULT_BASE_PORT);
            assert_eq!(workers_eps[0].port, TopologyBuilder::DEFAULT_BASE_PORT + ps as u16);
            assert!(servers.iter().all(|e| e.host == "127.0.0.1"));
        }
    }

    #[test]
    fn empty_roles_are_invalid() {
        assert!(matches!(
            TopologyBuilder::new(0, 2).build(),
            Err(OrchestratorError::InvalidConfig(_))
        ));
        assert!(matches!(
            TopologyBuilder::new(2, 0).build(),
            Err(OrchestratorError::InvalidConfig(_))
        ));
    }

    #[test]
    fn port_overflow_is_invalid() {
        let res = TopologyBuilder::new(1, 2).base_port(u16::MAX - 1).build();
        assert!(matches!(res, Err(OrchestratorError::InvalidConfig(_))));

        let topology = TopologyBuilder::new(1, 1)
            .host("10.0.0.7")
            .base_port(u16::MAX - 1)
            .build()
            .unwrap();
        assert_eq!(topology.endpoints(Role::Worker)[0].port, u16::MAX);
        assert_eq!(topology.endpoints(Role::Worker)[0].host, "10.0.0.7");
    }
}
