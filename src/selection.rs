//! Choosing which host issues a command for a target.
//!
//! Any host with a configured mount of the target can start or stop it through the
//! HA resource manager, provided its LNet is up. Hosts the monitor heard from most
//! recently are tried first.

use std::cmp::Reverse;

use itertools::Itertools;

use crate::model::{Host, LnetState, TargetMount, TargetMountState};

/// Filter and order the hosts that may run a command for a target.
///
/// `mounts` pairs each mount with its host. Hosts never contacted sort last; ties keep
/// mount order.
pub fn candidates(mounts: Vec<(TargetMount, Host)>) -> Vec<(TargetMount, Host)> {
    mounts
        .into_iter()
        .filter(|(tm, host)| {
            tm.state == TargetMountState::Configured && host.lnet_state == LnetState::Up
        })
        .sorted_by_key(|(_, host)| Reverse(host.last_success))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{HostId, TargetId, TargetMountId};
    use chrono::{TimeZone, Utc};

    fn pair(id: u32, state: TargetMountState, lnet: LnetState, seen: Option<i64>) -> (TargetMount, Host) {
        (
            TargetMount {
                id: TargetMountId(id),
                target: TargetId(1),
                host: HostId(id),
                primary: id == 1,
                state,
                mount_point: "/mnt/ost0".to_string(),
                block_device: None,
            },
            Host {
                id: HostId(id),
                address: format!("oss{:02}", id),
                port: None,
                user: None,
                lnet_state: lnet,
                last_success: seen.map(|s| Utc.timestamp_opt(s, 0).unwrap()),
                nids: vec![],
            },
        )
    }

    fn ids(selected: &[(TargetMount, Host)]) -> Vec<u32> {
        selected.iter().map(|(tm, _)| tm.id.0).collect()
    }

    #[test]
    fn test_freshest_first() {
        let selected = candidates(vec![
            pair(1, TargetMountState::Configured, LnetState::Up, Some(100)),
            pair(2, TargetMountState::Configured, LnetState::Up, Some(300)),
            pair(3, TargetMountState::Configured, LnetState::Up, Some(200)),
        ]);
        assert_eq!(ids(&selected), vec![2, 3, 1]);
    }

    #[test]
    fn test_unconfigured_and_lnet_down_are_skipped() {
        let selected = candidates(vec![
            pair(1, TargetMountState::Unconfigured, LnetState::Up, Some(300)),
            pair(2, TargetMountState::Configured, LnetState::Down, Some(200)),
            pair(3, TargetMountState::Configured, LnetState::Up, Some(100)),
        ]);
        assert_eq!(ids(&selected), vec![3]);
    }

    #[test]
    fn test_never_contacted_sorts_last() {
        let selected = candidates(vec![
            pair(1, TargetMountState::Configured, LnetState::Up, None),
            pair(2, TargetMountState::Configured, LnetState::Up, Some(5)),
            pair(3, TargetMountState::Configured, LnetState::Up, None),
        ]);
        assert_eq!(ids(&selected), vec![2, 1, 3]);
    }
}
