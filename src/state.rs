use std::fmt;

use serde::{Deserialize, Serialize};

/// Leadership as observed by one candidate after a participant read.
///
/// Equality is structural: `Standby(None)` is distinct from both
/// `Standby(Some(_))` and `ElectedAsLeader`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LeadershipState {
    ElectedAsLeader,
    Standby {
        #[serde(skip_serializing_if = "Option::is_none")]
        current_leader: Option<String>,
    },
}

impl LeadershipState {
    pub fn standby(current_leader: Option<String>) -> Self {
        LeadershipState::Standby { current_leader }
    }
}

impl fmt::Display for LeadershipState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LeadershipState::ElectedAsLeader => write!(f, "leader won"),
            LeadershipState::Standby { current_leader: Some(id) } => {
                write!(f, "leader defeated; current leader = {id}")
            }
            LeadershipState::Standby { current_leader: None } => write!(f, "leader unknown"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standby_none_differs_from_standby_some_and_leader() {
        let a = LeadershipState::standby(None);
        let b = LeadershipState::standby(Some("x".to_string()));
        let c = LeadershipState::ElectedAsLeader;
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_ne!(b, c);
    }

    #[test]
    fn serde_round_trip() {
        for state in [
            LeadershipState::ElectedAsLeader,
            LeadershipState::standby(None),
            LeadershipState::standby(Some("A:1".to_string())),
        ] {
            let json = serde_json::to_string(&state).unwrap();
            let back: LeadershipState = serde_json::from_str(&json).unwrap();
            assert_eq!(state, back);
        }
    }

    #[test]
    fn display_messages_match_log_surface() {
        assert_eq!(LeadershipState::ElectedAsLeader.to_string(), "leader won");
        assert_eq!(
            LeadershipState::standby(Some("A:1".to_string())).to_string(),
            "leader defeated; current leader = A:1"
        );
        assert_eq!(LeadershipState::standby(None).to_string(), "leader unknown");
    }
}
