//! Version bookkeeping for deployment updates.
//!
//! A node accepts an update only when the deployment version grows by one
//! and every workload whose content changed carries the new version.
//! Workloads left untouched keep the version they were provisioned at, so
//! the node leaves them running.

use grid_types::Deployment;

/// Copy the deployment version and each same-named workload version from `old`.
pub fn match_old_versions(old: &Deployment, new: &mut Deployment) {
    new.version = old.version;
    let versions = old.workload_versions();
    for wl in &mut new.workloads {
        if let Some(version) = versions.get(&wl.name) {
            wl.version = *version;
        }
    }
}

/// Bump the deployment version and stamp it on new or changed workloads.
///
/// Expects `new` to have gone through [`match_old_versions`] first.
pub fn assign_versions(old: &Deployment, new: &mut Deployment) {
    let hashes = old.workload_hashes();
    new.version = old.version + 1;
    for wl in &mut new.workloads {
        let unchanged = hashes
            .get(&wl.name)
            .is_some_and(|hash| *hash == wl.challenge_hash());
        if !unchanged {
            wl.version = new.version;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grid_types::{Workload, WorkloadData, ZMount, GIGABYTE};

    fn disk(name: &str, gb: u64) -> Workload {
        Workload::new(name, WorkloadData::ZMount(ZMount { size: gb * GIGABYTE }))
    }

    fn provisioned() -> Deployment {
        let mut dl = Deployment::new_grid_deployment(7, vec![disk("a", 1), disk("b", 2), disk("c", 3)]);
        dl.version = 2;
        dl.workloads[0].version = 0;
        dl.workloads[1].version = 2;
        dl.workloads[2].version = 1;
        dl
    }

    #[test]
    fn test_unchanged_workloads_keep_their_version() {
        let old = provisioned();
        let mut new = Deployment::new_grid_deployment(7, vec![disk("a", 1), disk("b", 5), disk("c", 3)]);

        match_old_versions(&old, &mut new);
        assert_eq!(new.version, 2);
        assign_versions(&old, &mut new);

        assert_eq!(new.version, 3);
        assert_eq!(new.get("a").unwrap().version, 0);
        assert_eq!(new.get("b").unwrap().version, 3);
        assert_eq!(new.get("c").unwrap().version, 1);
    }

    #[test]
    fn test_new_and_renamed_workloads_take_new_version() {
        let old = provisioned();
        let mut new = Deployment::new_grid_deployment(7, vec![disk("a", 1), disk("d", 3)]);

        match_old_versions(&old, &mut new);
        assign_versions(&old, &mut new);

        assert_eq!(new.version, 3);
        assert_eq!(new.get("a").unwrap().version, 0);
        assert_eq!(new.get("d").unwrap().version, 3);
    }

    #[test]
    fn test_identical_deployment_hashes_equal_after_matching() {
        let old = provisioned();
        let mut new = Deployment::new_grid_deployment(7, vec![disk("a", 1), disk("b", 2), disk("c", 3)]);
        assert_ne!(old.challenge_hash(), new.challenge_hash());
        match_old_versions(&old, &mut new);
        assert_eq!(old.challenge_hash(), new.challenge_hash());
    }
}
