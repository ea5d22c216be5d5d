//! Deployments: the signed, versioned bundle of workloads a node accepts.

use std::collections::{HashMap, HashSet};

use grid_core::{Identity, KeyType};
use serde::{Deserialize, Serialize};

use crate::capacity::Capacity;
use crate::challenge::{md5_digest, Challenge, ChallengeWriter};
use crate::error::{TypesError, TypesResult};
use crate::workload::{Workload, WorkloadData, WorkloadType};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureRequest {
    pub twin_id: u32,
    #[serde(default)]
    pub required: bool,
    pub weight: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub twin_id: u32,
    /// Hex-encoded signature over the challenge hash.
    pub signature: String,
    pub signature_type: String,
}

/// Who must sign a deployment and how much weight is enough.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureRequirement {
    #[serde(default)]
    pub requests: Vec<SignatureRequest>,
    #[serde(default)]
    pub weight_required: u32,
    #[serde(default)]
    pub signatures: Vec<Signature>,
    #[serde(default)]
    pub signature_style: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    /// Zero on creation, incremented on every accepted update.
    #[serde(default)]
    pub version: u32,
    pub twin_id: u32,
    /// Set once the node contract exists; the node checks the contract hash.
    #[serde(default)]
    pub contract_id: u64,
    #[serde(default)]
    pub metadata: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub expiration: i64,
    #[serde(default)]
    pub signature_requirement: SignatureRequirement,
    #[serde(default)]
    pub workloads: Vec<Workload>,
}

impl Deployment {
    /// A version-zero deployment owned and signed by `twin` alone.
    pub fn new_grid_deployment(twin: u32, workloads: Vec<Workload>) -> Self {
        Self {
            twin_id: twin,
            workloads,
            signature_requirement: SignatureRequirement {
                weight_required: 1,
                requests: vec![SignatureRequest {
                    twin_id: twin,
                    required: false,
                    weight: 1,
                }],
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn challenge_hash(&self) -> [u8; 16] {
        let mut w = ChallengeWriter::new();
        self.challenge(&mut w);
        md5_digest(w.as_bytes())
    }

    /// Hex form of the challenge hash, as registered on the node contract.
    pub fn challenge_hash_hex(&self) -> String {
        hex::encode(self.challenge_hash())
    }

    /// Sign the challenge hash as `twin`, replacing any earlier signature
    /// of the same twin.
    pub fn sign(&mut self, twin: u32, identity: &Identity) -> TypesResult<()> {
        let hash = self.challenge_hash();
        let signature = Signature {
            twin_id: twin,
            signature: hex::encode(identity.sign(&hash)),
            signature_type: identity.key_type().as_str().to_string(),
        };

        let signatures = &mut self.signature_requirement.signatures;
        match signatures.iter_mut().find(|s| s.twin_id == twin) {
            Some(existing) => *existing = signature,
            None => signatures.push(signature),
        }
        Ok(())
    }

    /// Check the stored signature of `twin` against `public_key`.
    pub fn verify(&self, twin: u32, public_key: &[u8]) -> TypesResult<()> {
        let signature = self
            .signature_requirement
            .signatures
            .iter()
            .find(|s| s.twin_id == twin)
            .ok_or_else(|| {
                TypesError::InvalidDeployment(format!("no signature found for twin {twin}"))
            })?;
        let key_type: KeyType = signature.signature_type.parse()?;
        let raw = hex::decode(&signature.signature).map_err(|e| {
            TypesError::InvalidDeployment(format!("signature of twin {twin} is not hex: {e}"))
        })?;
        Identity::verify(key_type, public_key, &self.challenge_hash(), &raw)?;
        Ok(())
    }

    /// Shape checks a node would otherwise reject the deployment for.
    pub fn valid(&self) -> TypesResult<()> {
        let mut names = HashSet::new();
        for wl in &self.workloads {
            if wl.name.is_empty() {
                return Err(TypesError::InvalidDeployment(
                    "workload name cannot be empty".to_string(),
                ));
            }
            if !names.insert(wl.name.as_str()) {
                return Err(TypesError::InvalidDeployment(format!(
                    "multiple workloads with the same name '{}'",
                    wl.name
                )));
            }
        }

        for wl in &self.workloads {
            self.valid_references(wl)?;
        }

        let requirement = &self.signature_requirement;
        if requirement.weight_required == 0 {
            return Err(TypesError::InvalidDeployment(
                "signature requirement weight cannot be zero".to_string(),
            ));
        }
        let achievable: u32 = requirement.requests.iter().map(|r| r.weight).sum();
        if achievable < requirement.weight_required {
            return Err(TypesError::InvalidDeployment(format!(
                "signature requirement weight {} is not achievable, total request weight is {}",
                requirement.weight_required, achievable
            )));
        }
        Ok(())
    }

    fn valid_references(&self, wl: &Workload) -> TypesResult<()> {
        let invalid = |reason: String| TypesError::InvalidWorkload {
            name: wl.name.clone(),
            reason,
        };

        match &wl.data {
            WorkloadData::ZMachine(vm) | WorkloadData::ZMachineLight(vm) => {
                for mount in &vm.mounts {
                    let target = self.get(&mount.name).map_err(|_| {
                        invalid(format!("mount '{}' does not exist in deployment", mount.name))
                    })?;
                    if !matches!(
                        target.workload_type(),
                        WorkloadType::ZMount | WorkloadType::Volume | WorkloadType::Qsfs
                    ) {
                        return Err(invalid(format!("mount '{}' is not a disk", mount.name)));
                    }
                }
                if !vm.network.public_ip.is_empty() {
                    let target = self.get(&vm.network.public_ip).map_err(|_| {
                        invalid(format!(
                            "public ip '{}' does not exist in deployment",
                            vm.network.public_ip
                        ))
                    })?;
                    if !matches!(
                        target.workload_type(),
                        WorkloadType::PublicIp | WorkloadType::PublicIpv4
                    ) {
                        return Err(invalid(format!(
                            "'{}' is not a public ip workload",
                            vm.network.public_ip
                        )));
                    }
                }
                if vm.network.interfaces.iter().any(|i| i.network.is_empty()) {
                    return Err(invalid("interface network name cannot be empty".to_string()));
                }
            }
            WorkloadData::ZLogs(logs) => {
                let target = self.get(&logs.zmachine).map_err(|_| {
                    invalid(format!("zmachine '{}' does not exist in deployment", logs.zmachine))
                })?;
                target.zmachine()?;
            }
            _ => {}
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> TypesResult<&Workload> {
        self.workloads
            .iter()
            .find(|wl| wl.name == name)
            .ok_or_else(|| TypesError::WorkloadNotFound(name.to_string()))
    }

    pub fn get_mut(&mut self, name: &str) -> TypesResult<&mut Workload> {
        self.workloads
            .iter_mut()
            .find(|wl| wl.name == name)
            .ok_or_else(|| TypesError::WorkloadNotFound(name.to_string()))
    }

    pub fn by_type(&self, types: &[WorkloadType]) -> Vec<&Workload> {
        self.workloads
            .iter()
            .filter(|wl| types.contains(&wl.workload_type()))
            .collect()
    }

    /// Number of public IPv4 addresses the deployment reserves.
    pub fn count_public_ips(&self) -> u32 {
        self.workloads
            .iter()
            .filter(|wl| match &wl.data {
                WorkloadData::PublicIp(ip) => ip.v4,
                WorkloadData::PublicIpv4(_) => true,
                _ => false,
            })
            .count() as u32
    }

    pub fn capacity(&self) -> Capacity {
        self.workloads
            .iter()
            .fold(Capacity::default(), |acc, wl| acc + wl.capacity())
    }

    pub fn workload_versions(&self) -> HashMap<String, u32> {
        self.workloads
            .iter()
            .map(|wl| (wl.name.clone(), wl.version))
            .collect()
    }

    pub fn workload_hashes(&self) -> HashMap<String, [u8; 16]> {
        self.workloads
            .iter()
            .map(|wl| (wl.name.clone(), wl.challenge_hash()))
            .collect()
    }

    /// Names of the workloads of `self` that are not in `other`.
    pub fn missing_names<'a>(&'a self, other: &Deployment) -> Vec<&'a str> {
        let theirs: HashSet<&str> = other.workloads.iter().map(|wl| wl.name.as_str()).collect();
        self.workloads
            .iter()
            .map(|wl| wl.name.as_str())
            .filter(|name| !theirs.contains(name))
            .collect()
    }
}

/// Whether both deployments carry exactly the same workload names.
pub fn same_workload_names(a: &Deployment, b: &Deployment) -> bool {
    if a.workloads.len() != b.workloads.len() {
        return false;
    }
    a.missing_names(b).is_empty() && b.missing_names(a).is_empty()
}

impl Challenge for Deployment {
    fn challenge(&self, w: &mut ChallengeWriter) {
        w.write(self.version)
            .write(self.twin_id)
            .write(&self.metadata)
            .write(&self.description)
            .write(self.expiration);
        self.workloads.challenge(w);

        let requirement = &self.signature_requirement;
        w.write(requirement.weight_required);
        for request in &requirement.requests {
            w.write(request.twin_id)
                .write(request.required)
                .write(request.weight);
        }
        w.write(&requirement.signature_style);
    }
}
