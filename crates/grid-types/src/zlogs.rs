//! Log streaming (`zlogs`) workload data.

use serde::{Deserialize, Serialize};

use crate::challenge::{Challenge, ChallengeWriter};

/// Streams the logs of a machine in the same deployment to `output`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZLogs {
    /// Name of the zmachine workload whose logs are streamed.
    pub zmachine: String,
    /// Target url, e.g. `redis://host:port/channel`.
    pub output: String,
}

impl Challenge for ZLogs {
    fn challenge(&self, w: &mut ChallengeWriter) {
        w.write(&self.zmachine).write(&self.output);
    }
}
