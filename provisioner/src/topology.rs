//! Read-only description of where the network runs.

use crate::Error;
use serde::{Deserialize, Serialize};
use std::{fs::File, path::Path};
use tracing::info;

/// Where a participant node runs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    /// Account name (possibly under a legacy parent, see [crate::participants::remap]).
    pub name: String,
    /// Host or IP the participant's node listens on.
    pub address: String,
}

/// The deployed network layout, in participant order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    /// Account the signing contract is deployed to.
    pub contract: String,
    pub participants: Vec<Placement>,
}

impl Topology {
    pub fn load(path: &Path) -> Result<Self, Error> {
        let file = File::open(path)?;
        let topology: Topology = serde_yaml::from_reader(file)?;
        info!(
            contract = topology.contract.as_str(),
            participants = topology.participants.len(),
            "loaded topology"
        );
        Ok(topology)
    }
}
