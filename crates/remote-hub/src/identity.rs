//! Identity lookup for incoming sockets and REST calls.
//!
//! The hub does not authenticate anybody itself: the hosting session layer
//! hands out tokens, and an [`IdentityProvider`] tells the hub which profile
//! and display name belong to a token.

use std::collections::HashMap;
use std::sync::RwLock;

use axum::http::{header, HeaderMap};
use remote_proto::config::IdentityConfig;
use remote_proto::protocol::{DeviceId, ProfileId, SESSION_COOKIE};

#[derive(Debug, Clone, PartialEq)]
pub struct SessionIdentity {
    pub profile_id: ProfileId,
    pub device_id: DeviceId,
    pub device_name: String,
}

pub trait IdentityProvider: Send + Sync {
    fn resolve(&self, token: &str) -> Option<SessionIdentity>;

    /// Change the display name behind `token`.  Returns false for unknown
    /// tokens.
    fn rename(&self, token: &str, device_name: &str) -> bool;
}

#[derive(Debug, Clone)]
struct Account {
    profile_id: ProfileId,
    device_name: String,
}

/// Token table loaded from `[[identity.sessions]]`.
#[derive(Debug, Default)]
pub struct StaticIdentity {
    accounts: RwLock<HashMap<String, Account>>,
}

impl StaticIdentity {
    pub fn from_config(config: &IdentityConfig) -> Self {
        let identity = Self::default();
        for entry in &config.sessions {
            identity.insert(&entry.token, entry.profile_id, &entry.device_name);
        }
        identity
    }

    pub fn insert(&self, token: &str, profile_id: ProfileId, device_name: &str) {
        if let Ok(mut accounts) = self.accounts.write() {
            accounts.insert(
                token.to_string(),
                Account {
                    profile_id,
                    device_name: device_name.to_string(),
                },
            );
        }
    }

    pub fn session_count(&self) -> usize {
        self.accounts.read().map(|a| a.len()).unwrap_or(0)
    }
}

impl IdentityProvider for StaticIdentity {
    fn resolve(&self, token: &str) -> Option<SessionIdentity> {
        let accounts = self.accounts.read().ok()?;
        accounts.get(token).map(|account| SessionIdentity {
            profile_id: account.profile_id,
            device_id: DeviceId::from_token(token),
            device_name: account.device_name.clone(),
        })
    }

    fn rename(&self, token: &str, device_name: &str) -> bool {
        let Ok(mut accounts) = self.accounts.write() else {
            return false;
        };
        match accounts.get_mut(token) {
            Some(account) => {
                account.device_name = device_name.to_string();
                true
            }
            None => false,
        }
    }
}

/// Session token from the `pytr_session` cookie, falling back to a `token`
/// query parameter (for clients that cannot set cookies on a socket).
pub fn session_token(headers: &HeaderMap, query_token: Option<&str>) -> Option<String> {
    let from_cookie = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|cookies| cookies.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.trim().to_string());

    from_cookie
        .or_else(|| query_token.map(str::to_string))
        .filter(|token| !token.is_empty())
}
