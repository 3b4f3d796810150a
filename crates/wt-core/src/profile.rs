//! Saved connection profiles
//!
//! A profile is a named connection configuration. It carries *references* to
//! secrets (`password:<id>`, `key:<id>`), never secret values; the values
//! live in the OS secret store under those keys.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::config::{load_toml, save_toml};
use crate::error::{ConfigError, NotFound, WtError, WtResult};
use crate::time::unix_now_secs;

const PROFILES_FILE: &str = "profiles.toml";

fn default_port() -> u16 {
    22
}

fn default_keepalive() -> u32 {
    20
}

/// How to authenticate, by reference into the secret store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthMethod {
    /// Password stored under `password:<owner>`
    Password { password_key: String },
    /// Private key stored under `key:<owner>`, optional `passphrase:<owner>`
    Key { key_id: String },
    /// Defer to a running key agent
    Agent,
}

impl Default for AuthMethod {
    fn default() -> Self {
        AuthMethod::Agent
    }
}

/// Intermediate hop on the way to the target host
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JumpHost {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub auth_method: AuthMethod,
}

/// Host-key checking policy.
///
/// `Accept` skips verification entirely. It exists for fleets with an
/// out-of-band trust layer, is never the default, and every use is logged
/// as insecure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostKeyPolicy {
    #[default]
    Strict,
    Ask,
    Accept,
}

/// Per-profile connection options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileOptions {
    #[serde(default = "default_keepalive")]
    pub keepalive_interval: u32,
    #[serde(default)]
    pub agent_forwarding: bool,
    #[serde(default)]
    pub host_key_policy: HostKeyPolicy,
    #[serde(default)]
    pub startup_commands: Vec<String>,
    #[serde(default)]
    pub environment: HashMap<String, String>,
}

impl Default for ProfileOptions {
    fn default() -> Self {
        Self {
            keepalive_interval: default_keepalive(),
            agent_forwarding: false,
            host_key_policy: HostKeyPolicy::default(),
            startup_commands: vec![],
            environment: HashMap::new(),
        }
    }
}

/// Saved connection profile (no secret values)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub name: String,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub auth_method: AuthMethod,
    #[serde(default)]
    pub jump_hosts: Vec<JumpHost>,
    #[serde(default)]
    pub options: ProfileOptions,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub created_at: u64,
    #[serde(default)]
    pub updated_at: u64,
}

impl Profile {
    pub fn new(name: impl Into<String>, host: impl Into<String>, username: impl Into<String>) -> Self {
        let now = unix_now_secs();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            host: host.into(),
            port: 22,
            username: username.into(),
            auth_method: AuthMethod::Agent,
            jump_hosts: vec![],
            options: ProfileOptions::default(),
            tags: vec![],
            notes: String::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// On-disk file format
#[derive(Debug, Default, Serialize, Deserialize)]
struct ProfilesFile {
    #[serde(default)]
    profiles: Vec<Profile>,
}

/// Process-wide store of saved profiles.
///
/// Concurrent reads, serialized writes; every mutation persists to
/// `profiles.toml` before returning.
pub struct ProfileStore {
    profiles: RwLock<HashMap<String, Profile>>,
    path: Option<PathBuf>,
}

impl ProfileStore {
    /// Load profiles from `<config_dir>/profiles.toml`, starting empty if
    /// the file does not exist yet
    pub fn load(config_dir: &Path) -> WtResult<Self> {
        let path = config_dir.join(PROFILES_FILE);
        let profiles = match load_toml::<ProfilesFile>(&path) {
            Ok(file) => file
                .profiles
                .into_iter()
                .map(|p| (p.id.clone(), p))
                .collect(),
            Err(ConfigError::NotFound(_)) => HashMap::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            profiles: RwLock::new(profiles),
            path: Some(path),
        })
    }

    /// In-memory store without persistence, for tests and ad-hoc use
    pub fn in_memory() -> Self {
        Self {
            profiles: RwLock::new(HashMap::new()),
            path: None,
        }
    }

    pub fn list(&self) -> Vec<Profile> {
        self.profiles.read().values().cloned().collect()
    }

    pub fn get(&self, id: &str) -> Option<Profile> {
        self.profiles.read().get(id).cloned()
    }

    pub fn add(&self, profile: Profile) -> WtResult<()> {
        let id = profile.id.clone();
        {
            let mut profiles = self.profiles.write();
            profiles.insert(id.clone(), profile);
            self.persist(&profiles)?;
        }
        tracing::info!(profile = %id, "profile saved");
        Ok(())
    }

    pub fn update(&self, mut profile: Profile) -> WtResult<()> {
        let mut profiles = self.profiles.write();
        if !profiles.contains_key(&profile.id) {
            return Err(NotFound::Profile(profile.id).into());
        }
        profile.updated_at = unix_now_secs();
        let id = profile.id.clone();
        profiles.insert(id.clone(), profile);
        self.persist(&profiles)?;
        tracing::debug!(profile = %id, "profile updated");
        Ok(())
    }

    /// Remove a profile, returning it so the caller can void its secrets
    pub fn remove(&self, id: &str) -> WtResult<Profile> {
        let mut profiles = self.profiles.write();
        let removed = profiles
            .remove(id)
            .ok_or_else(|| WtError::from(NotFound::Profile(id.to_string())))?;
        self.persist(&profiles)?;
        tracing::info!(profile = id, "profile removed");
        Ok(removed)
    }

    fn persist(&self, profiles: &HashMap<String, Profile>) -> WtResult<()> {
        if let Some(path) = &self.path {
            let file = ProfilesFile {
                profiles: profiles.values().cloned().collect(),
            };
            save_toml(path, &file)?;
        }
        Ok(())
    }
}

/// Import profiles from OpenSSH client config content.
///
/// Understands Host/HostName/User/Port/IdentityFile/ProxyJump/ForwardAgent;
/// wildcard and incomplete entries are dropped.
pub fn import_openssh_config(content: &str) -> Vec<Profile> {
    let mut profiles: Vec<Profile> = Vec::new();
    let mut current: Option<Profile> = None;

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let mut parts = line.splitn(2, char::is_whitespace);
        let (key, value) = match (parts.next(), parts.next()) {
            (Some(k), Some(v)) => (k.to_ascii_lowercase(), v.trim()),
            _ => continue,
        };

        match key.as_str() {
            "host" => {
                if let Some(profile) = current.take() {
                    profiles.push(profile);
                }
                current = Some(Profile::new(value, "", ""));
            }
            "hostname" => {
                if let Some(p) = current.as_mut() {
                    p.host = value.to_string();
                }
            }
            "user" => {
                if let Some(p) = current.as_mut() {
                    p.username = value.to_string();
                }
            }
            "port" => {
                if let (Some(p), Ok(port)) = (current.as_mut(), value.parse()) {
                    p.port = port;
                }
            }
            "identityfile" => {
                if let Some(p) = current.as_mut() {
                    p.auth_method = AuthMethod::Key {
                        key_id: format!("imported_{}", sanitize_owner(value)),
                    };
                }
            }
            "proxyjump" => {
                if let Some(p) = current.as_mut() {
                    p.jump_hosts = value.split(',').map(parse_jump_spec).collect();
                }
            }
            "forwardagent" => {
                if let Some(p) = current.as_mut() {
                    p.options.agent_forwarding = value.eq_ignore_ascii_case("yes");
                }
            }
            _ => {}
        }
    }

    if let Some(profile) = current {
        profiles.push(profile);
    }

    profiles
        .into_iter()
        .filter(|p| !p.host.is_empty() && !p.host.contains('*') && !p.host.contains('?'))
        .collect()
}

/// Render profiles as OpenSSH client config content.
///
/// Secret references do not survive the trip; exported entries fall back to
/// agent or default identity resolution on the OpenSSH side.
pub fn export_openssh_config(profiles: &[Profile]) -> String {
    let mut out = String::new();
    for profile in profiles {
        out.push_str(&format!("Host {}\n", profile.name));
        out.push_str(&format!("    HostName {}\n", profile.host));
        if !profile.username.is_empty() {
            out.push_str(&format!("    User {}\n", profile.username));
        }
        if profile.port != 22 {
            out.push_str(&format!("    Port {}\n", profile.port));
        }
        if profile.options.agent_forwarding {
            out.push_str("    ForwardAgent yes\n");
        }
        if !profile.jump_hosts.is_empty() {
            let hops: Vec<String> = profile
                .jump_hosts
                .iter()
                .map(|jump| {
                    let mut hop = String::new();
                    if !jump.username.is_empty() {
                        hop.push_str(&jump.username);
                        hop.push('@');
                    }
                    hop.push_str(&jump.host);
                    if jump.port != 22 {
                        hop.push_str(&format!(":{}", jump.port));
                    }
                    hop
                })
                .collect();
            out.push_str(&format!("    ProxyJump {}\n", hops.join(",")));
        }
        out.push('\n');
    }
    out
}

/// Parse a single `[user@]host[:port]` jump spec
fn parse_jump_spec(spec: &str) -> JumpHost {
    let spec = spec.trim();
    let (username, host_port) = match spec.split_once('@') {
        Some((user, rest)) => (user.to_string(), rest),
        None => (String::new(), spec),
    };
    let (host, port) = match host_port.split_once(':') {
        Some((h, p)) => (h.to_string(), p.parse().unwrap_or(22)),
        None => (host_port.to_string(), 22),
    };
    JumpHost {
        host,
        port,
        username,
        auth_method: AuthMethod::Agent,
    }
}

/// Reduce an arbitrary identity-file path to a valid secret owner id
fn sanitize_owner(value: &str) -> String {
    value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
