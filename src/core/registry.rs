use crate::core::failure::{RunError, RunResult};
use crate::models::{DeployConfig, Host, Value};
use std::collections::BTreeMap;

/// Static role → hosts and host → attributes mapping for one run.
/// Built once from the configuration snapshot, read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct HostRegistry {
    roles: BTreeMap<String, Vec<String>>,
    role_vars: BTreeMap<String, BTreeMap<String, Value>>,
    hosts: BTreeMap<String, Host>,
}

impl HostRegistry {
    pub fn from_config(config: &DeployConfig) -> Self {
        let mut registry = Self::default();
        for (id, attributes) in &config.hosts {
            registry.hosts.insert(
                id.clone(),
                Host {
                    id: id.clone(),
                    attributes: attributes.clone(),
                },
            );
        }
        for (name, role) in &config.roles {
            registry.add_role(name, role.hosts().iter().map(String::as_str));
            if let Some(vars) = role.vars() {
                registry.role_vars.insert(name.clone(), vars.clone());
            }
        }
        registry
    }

    /// Adds (or extends) a role. Hosts without configured attributes are
    /// registered with an empty attribute map. Duplicates keep their first
    /// position.
    pub fn add_role<'a>(&mut self, name: &str, hosts: impl IntoIterator<Item = &'a str>) {
        let members = self.roles.entry(name.to_string()).or_default();
        for id in hosts {
            if !members.iter().any(|h| h == id) {
                members.push(id.to_string());
            }
            self.hosts
                .entry(id.to_string())
                .or_insert_with(|| Host::new(id));
        }
    }

    pub fn add_host(&mut self, host: Host) {
        self.hosts.insert(host.id.clone(), host);
    }

    pub fn resolve(&self, role: &str) -> RunResult<Vec<&Host>> {
        let members = self.roles.get(role).ok_or_else(|| RunError::UnknownTarget {
            kind: "role",
            name: role.to_string(),
        })?;
        members.iter().map(|id| self.host(id)).collect()
    }

    /// Union over every configured role, in role order, without duplicates.
    pub fn resolve_all(&self) -> Vec<&Host> {
        let mut out: Vec<&Host> = Vec::new();
        for id in self.roles.values().flatten() {
            if let Some(host) = self.hosts.get(id)
                && !out.iter().any(|h| h.id == host.id)
            {
                out.push(host);
            }
        }
        out
    }

    /// Union over the given roles, in the given order, without duplicates.
    pub fn resolve_many(&self, roles: &[&str]) -> RunResult<Vec<&Host>> {
        let mut out: Vec<&Host> = Vec::new();
        for role in roles {
            for host in self.resolve(role)? {
                if !out.iter().any(|h| h.id == host.id) {
                    out.push(host);
                }
            }
        }
        Ok(out)
    }

    pub fn host(&self, id: &str) -> RunResult<&Host> {
        self.hosts.get(id).ok_or_else(|| RunError::UnknownTarget {
            kind: "host",
            name: id.to_string(),
        })
    }

    pub fn attributes(&self, id: &str) -> RunResult<&BTreeMap<String, Value>> {
        self.host(id).map(|h| &h.attributes)
    }

    /// Role-level settings applied when operating "as" a role.
    pub fn role_vars(&self, role: &str) -> RunResult<Option<&BTreeMap<String, Value>>> {
        if !self.roles.contains_key(role) {
            return Err(RunError::UnknownTarget {
                kind: "role",
                name: role.to_string(),
            });
        }
        Ok(self.role_vars.get(role))
    }

    /// First role (in role order) that lists `host`.
    pub fn role_of(&self, host: &str) -> Option<&str> {
        self.roles
            .iter()
            .find(|(_, members)| members.iter().any(|h| h == host))
            .map(|(name, _)| name.as_str())
    }

    pub fn hosts(&self) -> impl Iterator<Item = &Host> {
        self.hosts.values()
    }
}
