//! Game-server fleet directory backed by the `servers` config section.
use crate::model::ServerInfo;

pub trait ServerDirectory: Send + Sync {
    /// Resolve a single server by id, short name or alias.
    fn resolve_server(&self, name: &str) -> Option<ServerInfo>;

    /// Resolve a server, or every server in the category of that name.
    fn resolve_server_or_category(&self, name: &str) -> Vec<ServerInfo>;
}

#[derive(Debug, Clone, Default)]
pub struct FleetDirectory {
    servers: Vec<ServerInfo>,
}

impl FleetDirectory {
    pub fn new(servers: Vec<ServerInfo>) -> Self {
        Self { servers }
    }
}

impl ServerDirectory for FleetDirectory {
    fn resolve_server(&self, name: &str) -> Option<ServerInfo> {
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        self.servers
            .iter()
            .find(|s| {
                s.id.eq_ignore_ascii_case(name)
                    || s.tgs.eq_ignore_ascii_case(name)
                    || s.short_name.eq_ignore_ascii_case(name)
                    || s.aliases.iter().any(|a| a.eq_ignore_ascii_case(name))
            })
            .cloned()
    }

    fn resolve_server_or_category(&self, name: &str) -> Vec<ServerInfo> {
        if let Some(server) = self.resolve_server(name) {
            return vec![server];
        }
        let name = name.trim();
        self.servers
            .iter()
            .filter(|s| s.categories.iter().any(|c| c.eq_ignore_ascii_case(name)))
            .cloned()
            .collect()
    }
}
