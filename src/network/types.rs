use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum NetworkState {
    Online,
    Offline,
}

impl NetworkState {
    pub fn is_online(&self) -> bool {
        matches!(self, NetworkState::Online)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkState::Online => "online",
            NetworkState::Offline => "offline",
        }
    }
}

impl From<bool> for NetworkState {
    fn from(online: bool) -> Self {
        if online {
            NetworkState::Online
        } else {
            NetworkState::Offline
        }
    }
}

/// A connectivity transition observed by the tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectivityChange {
    pub previous: NetworkState,
    pub current: NetworkState,
    pub changed_at: i64,
}

impl ConnectivityChange {
    pub fn is_reconnect(&self) -> bool {
        !self.previous.is_online() && self.current.is_online()
    }
}
