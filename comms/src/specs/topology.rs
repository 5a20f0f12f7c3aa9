use std::{
    collections::HashSet,
    error::Error,
    fmt::{self, Display},
    str::FromStr,
};

use serde::{Deserialize, Serialize};

/// The role a process plays inside the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    ParameterServer,
    Worker,
}

impl Role {
    /// The short job name used in file names and on the command line.
    pub fn job_name(self) -> &'static str {
        match self {
            Role::ParameterServer => "ps",
            Role::Worker => "worker",
        }
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.job_name())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ps" => Ok(Role::ParameterServer),
            "worker" => Ok(Role::Worker),
            other => Err(format!("unknown role {other}, expected `ps` or `worker`")),
        }
    }
}

/// A `(role, index)` pair, unique per process and fixed for its whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub role: Role,
    pub index: usize,
}

impl Identity {
    pub fn new(role: Role, index: usize) -> Self {
        Self { role, index }
    }

    /// The first worker is the chief, it alone initializes shared state.
    pub fn is_leader(&self) -> bool {
        self.role == Role::Worker && self.index == 0
    }
}

impl Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.role, self.index)
    }
}

/// A reachable `host:port` network address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Error returned whenever a set of endpoints can't form a valid cluster.
#[derive(Debug, PartialEq, Eq)]
pub enum TopologyErr {
    EmptyRole(Role),
    DuplicatePort(u16),
}

impl Display for TopologyErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TopologyErr::EmptyRole(role) => write!(f, "role {role} needs at least one endpoint"),
            TopologyErr::DuplicatePort(port) => write!(f, "port {port} is assigned twice"),
        }
    }
}

impl Error for TopologyErr {}

/// The fixed mapping of roles to network endpoints, computed before any process spawns.
///
/// Deserialized topologies go through the same validation as `from_endpoints`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawTopology")]
pub struct Topology {
    ps: Vec<Endpoint>,
    worker: Vec<Endpoint>,
}

#[derive(Deserialize)]
struct RawTopology {
    ps: Vec<Endpoint>,
    worker: Vec<Endpoint>,
}

impl TryFrom<RawTopology> for Topology {
    type Error = TopologyErr;

    fn try_from(raw: RawTopology) -> Result<Self, Self::Error> {
        Self::from_endpoints(raw.ps, raw.worker)
    }
}

impl Topology {
    /// Creates a new `Topology` out of already chosen endpoints.
    ///
    /// # Arguments
    /// * `ps` - The parameter server endpoints, in index order.
    /// * `worker` - The worker endpoints, in index order.
    ///
    /// # Returns
    /// The topology or a `TopologyErr` if a role is empty or a port is repeated.
    pub fn from_endpoints(ps: Vec<Endpoint>, worker: Vec<Endpoint>) -> Result<Self, TopologyErr> {
        if ps.is_empty() {
            return Err(TopologyErr::EmptyRole(Role::ParameterServer));
        }

        if worker.is_empty() {
            return Err(TopologyErr::EmptyRole(Role::Worker));
        }

        let mut seen = HashSet::with_capacity(ps.len() + worker.len());
        for endpoint in ps.iter().chain(&worker) {
            if !seen.insert(endpoint.port) {
                return Err(TopologyErr::DuplicatePort(endpoint.port));
            }
        }

        Ok(Self { ps, worker })
    }

    /// All the endpoints of a role, in index order.
    pub fn endpoints(&self, role: Role) -> &[Endpoint] {
        match role {
            Role::ParameterServer => &self.ps,
            Role::Worker => &self.worker,
        }
    }

    /// The endpoint of a single process, if its identity belongs to this topology.
    pub fn endpoint(&self, identity: Identity) -> Option<&Endpoint> {
        self.endpoints(identity.role).get(identity.index)
    }

    pub fn param_servers(&self) -> usize {
        self.ps.len()
    }

    pub fn workers(&self) -> usize {
        self.worker.len()
    }

    /// Every identity of the cluster, parameter servers first.
    pub fn identities(&self) -> impl Iterator<Item = Identity> + '_ {
        let ps = (0..self.ps.len()).map(|i| Identity::new(Role::ParameterServer, i));
        let workers = (0..self.worker.len()).map(|i| Identity::new(Role::Worker, i));
        ps.chain(workers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local(port: u16) -> Endpoint {
        Endpoint::new("127.0.0.1", port)
    }

    #[test]
    fn duplicate_ports_across_roles_are_rejected() {
        let err = Topology::from_endpoints(vec![local(1000)], vec![local(1001), local(1000)]);
        assert_eq!(err, Err(TopologyErr::DuplicatePort(1000)));
    }

    #[test]
    fn empty_roles_are_rejected() {
        assert_eq!(
            Topology::from_endpoints(vec![], vec![local(1)]),
            Err(TopologyErr::EmptyRole(Role::ParameterServer))
        );
        assert_eq!(
            Topology::from_endpoints(vec![local(1)], vec![]),
            Err(TopologyErr::EmptyRole(Role::Worker))
        );
    }

    #[test]
    fn identities_list_servers_first() {
        let topology = Topology::from_endpoints(vec![local(1)], vec![local(2), local(3)]).unwrap();
        let ids: Vec<_> = topology.identities().map(|id| id.to_string()).collect();
        assert_eq!(ids, ["ps_0", "worker_0", "worker_1"]);
        assert_eq!(
            topology.endpoint(Identity::new(Role::Worker, 1)),
            Some(&local(3))
        );
    }

    #[test]
    fn deserialized_topologies_are_validated() {
        let json = r#"{
            "ps": [{"host": "127.0.0.1", "port": 7}],
            "worker": [{"host": "127.0.0.1", "port": 7}]
        }"#;
        assert!(serde_json::from_str::<Topology>(json).is_err());
    }

    #[test]
    fn only_the_first_worker_leads() {
        assert!(Identity::new(Role::Worker, 0).is_leader());
        assert!(!Identity::new(Role::Worker, 1).is_leader());
        assert!(!Identity::new(Role::ParameterServer, 0).is_leader());
    }

    #[test]
    fn role_parses_job_names() {
        assert_eq!("ps".parse(), Ok(Role::ParameterServer));
        assert_eq!("worker".parse(), Ok(Role::Worker));
        assert!("chief".parse::<Role>().is_err());
    }
}
