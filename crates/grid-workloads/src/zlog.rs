//! Log streams attached to a machine.

use grid_types::challenge::md5_digest;
use grid_types::{Deployment, Workload, WorkloadData, WorkloadType, ZLogs};
use serde::{Deserialize, Serialize};

use crate::error::{ResultExt, WorkloadsResult};
use crate::name::validate_name;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Zlog {
    pub zmachine: String,
    pub output: String,
}

impl Zlog {
    pub fn validate(&self) -> WorkloadsResult<()> {
        validate_name(&self.zmachine).context("zmachine name is invalid")
    }

    /// The workload is named after the md5 of its output URL.
    pub fn zos_workload(&self) -> Workload {
        let name = hex::encode(md5_digest(self.output.as_bytes()));
        Workload::new(
            name,
            WorkloadData::ZLogs(ZLogs {
                zmachine: self.zmachine.clone(),
                output: self.output.clone(),
            }),
        )
    }
}

/// Provisioned log streams of machine `name`.
pub(crate) fn zlogs_of(dl: &Deployment, name: &str) -> Vec<Zlog> {
    dl.by_type(&[WorkloadType::ZLogs])
        .into_iter()
        .filter(|wl| wl.result.state.is_okay())
        .filter_map(|wl| wl.zlogs().ok())
        .filter(|data| data.zmachine == name)
        .map(|data| Zlog {
            zmachine: name.to_string(),
            output: data.output.clone(),
        })
        .collect()
}
