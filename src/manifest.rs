//! Submission inputs.
//!
//! The simulation data model lives outside this crate; it plugs in through
//! [`SimulationModel`]. [`InputManifest`] is what actually gets uploaded.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::SimError;
use crate::state_machine::TaskType;

/// A local simulation description that can be validated and serialized.
pub trait SimulationModel {
    fn task_type(&self) -> TaskType;

    /// Checks local constraints. Failures are [`SimError::Validation`].
    fn validate(&self) -> Result<(), SimError>;

    fn serialize(&self) -> Result<Vec<u8>, SimError>;

    /// Extra binary inputs uploaded next to the simulation, e.g. meshes.
    fn auxiliary(&self) -> Result<Vec<AuxiliaryPayload>, SimError> {
        Ok(Vec::new())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuxiliaryPayload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// What the backend needs to register a job, without the payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestMetadata {
    pub name: String,
    pub task_type: TaskType,
    pub file_names: Vec<String>,
}

/// Serialized simulation plus auxiliary payloads, consumed by one submission.
#[derive(Debug, Clone)]
pub struct InputManifest {
    pub name: String,
    pub task_type: TaskType,
    pub simulation: Vec<u8>,
    pub auxiliary: Vec<AuxiliaryPayload>,
}

impl InputManifest {
    pub const SIMULATION_FILE: &'static str = "simulation.json";

    /// Validates `model` and serializes it.
    pub fn from_model(model: &impl SimulationModel, name: &str) -> Result<Self, SimError> {
        if name.trim().is_empty() {
            return Err(SimError::Validation("job name must not be empty".into()));
        }
        model.validate()?;

        let auxiliary = model.auxiliary()?;
        let mut seen = HashSet::from([Self::SIMULATION_FILE]);
        for payload in &auxiliary {
            if payload.file_name.is_empty() || !seen.insert(payload.file_name.as_str()) {
                return Err(SimError::Validation(format!(
                    "duplicate or empty auxiliary file name {:?}",
                    payload.file_name
                )));
            }
        }

        Ok(Self {
            name: name.trim().to_string(),
            task_type: model.task_type(),
            simulation: model.serialize()?,
            auxiliary,
        })
    }

    pub fn metadata(&self) -> ManifestMetadata {
        let file_names = std::iter::once(Self::SIMULATION_FILE.to_string())
            .chain(self.auxiliary.iter().map(|a| a.file_name.clone()))
            .collect();
        ManifestMetadata {
            name: self.name.clone(),
            task_type: self.task_type,
            file_names,
        }
    }

    /// Consumes the manifest into `(file_name, bytes)` pairs, simulation first.
    pub fn into_files(self) -> Vec<(String, Vec<u8>)> {
        std::iter::once((Self::SIMULATION_FILE.to_string(), self.simulation))
            .chain(self.auxiliary.into_iter().map(|a| (a.file_name, a.bytes)))
            .collect()
    }
}

/// A simulation already serialized as a JSON document on disk.
#[derive(Debug, Clone)]
pub struct JsonModel {
    pub task_type: TaskType,
    pub document: serde_json::Value,
    pub attachments: Vec<PathBuf>,
}

impl JsonModel {
    pub fn from_file(path: &Path, task_type: TaskType) -> Result<Self, SimError> {
        let contents = std::fs::read(path)?;
        let document = serde_json::from_slice(&contents).map_err(|e| {
            SimError::Validation(format!("{} is not valid JSON: {e}", path.display()))
        })?;
        Ok(Self {
            task_type,
            document,
            attachments: Vec::new(),
        })
    }

    pub fn with_attachments(mut self, attachments: Vec<PathBuf>) -> Self {
        self.attachments = attachments;
        self
    }
}

impl SimulationModel for JsonModel {
    fn task_type(&self) -> TaskType {
        self.task_type
    }

    fn validate(&self) -> Result<(), SimError> {
        match self.document.as_object() {
            Some(fields) if !fields.is_empty() => Ok(()),
            _ => Err(SimError::Validation(
                "simulation document must be a non-empty JSON object".into(),
            )),
        }
    }

    fn serialize(&self) -> Result<Vec<u8>, SimError> {
        Ok(serde_json::to_vec(&self.document)?)
    }

    fn auxiliary(&self) -> Result<Vec<AuxiliaryPayload>, SimError> {
        self.attachments
            .iter()
            .map(|path| {
                let file_name = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .ok_or_else(|| {
                        SimError::Validation(format!("bad attachment path {}", path.display()))
                    })?
                    .to_string();
                Ok(AuxiliaryPayload {
                    file_name,
                    bytes: std::fs::read(path)?,
                })
            })
            .collect()
    }
}
