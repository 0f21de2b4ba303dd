use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActorId(pub String);

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    Client,
    Provider,
    Admin,
}

/// What a role may attempt at all. Ownership and entity state are checked by the policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    SubmitQuotes,
    ManageOwnQuotes,
    ReviewQuotes,
    NegotiateQuotes,
    BypassPolicy,
}

const CLIENT_CAPABILITIES: &[Capability] = &[Capability::ReviewQuotes, Capability::NegotiateQuotes];

const PROVIDER_CAPABILITIES: &[Capability] =
    &[Capability::SubmitQuotes, Capability::ManageOwnQuotes, Capability::NegotiateQuotes];

const ADMIN_CAPABILITIES: &[Capability] = &[Capability::BypassPolicy];

impl ActorRole {
    pub fn capabilities(self) -> &'static [Capability] {
        match self {
            Self::Client => CLIENT_CAPABILITIES,
            Self::Provider => PROVIDER_CAPABILITIES,
            Self::Admin => ADMIN_CAPABILITIES,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Provider => "provider",
            Self::Admin => "admin",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: ActorId,
    pub role: ActorRole,
    pub active: bool,
    pub approved: bool,
    pub service_categories: BTreeSet<String>,
}

impl Actor {
    pub fn client(id: impl Into<String>) -> Self {
        Self::with_role(id, ActorRole::Client)
    }

    pub fn provider(id: impl Into<String>, categories: &[&str]) -> Self {
        let mut actor = Self::with_role(id, ActorRole::Provider);
        actor.service_categories = categories.iter().map(|category| normalize(category)).collect();
        actor
    }

    pub fn admin(id: impl Into<String>) -> Self {
        Self::with_role(id, ActorRole::Admin)
    }

    fn with_role(id: impl Into<String>, role: ActorRole) -> Self {
        Self {
            id: ActorId(id.into()),
            role,
            active: true,
            approved: true,
            service_categories: BTreeSet::new(),
        }
    }

    pub fn has_capability(&self, capability: Capability) -> bool {
        self.role.capabilities().contains(&capability)
    }

    pub fn is(&self, id: &ActorId) -> bool {
        &self.id == id
    }

    pub fn offers_category(&self, category: &str) -> bool {
        self.service_categories.contains(&normalize(category))
    }
}

fn normalize(category: &str) -> String {
    category.trim().to_ascii_lowercase()
}
