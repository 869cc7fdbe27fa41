//! The simulation aggregate: kernel, specimen, synthesizer and objective.
//!
//! [`Simulation`] is the model a fitting strategy works on. Its parameter
//! vector is the concatenation of the kernel registry, then every object's
//! registry followed by the registries of that object's fluorophore
//! properties, in insertion order.

use nalgebra::Vector3;
use thiserror::Error;

use shared::{Volume, VoxelRegion};

use crate::config::{ImagingConfig, SimulationConfig};
use crate::objective::{ObjectiveError, ObjectiveHost, ObjectiveScore};
use crate::optimizer::{CancelFlag, FitModel, OptimizationRun, Optimizer, RunReport, SearchError};
use crate::parameters::{
    ChangeToken, ParameterError, ParameterOwner, ParameterRegistry, ParameterSnapshot,
    ParameterVector,
};
use crate::psf::KernelProvider;
use crate::sampling::SamplingError;
use crate::specimen::SpecimenObject;
use crate::synth::{CpuSynthesizer, ImageSynthesizer, LabelBatch, PointGradient, SynthesisError};

/// Errors surfaced by the simulation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimulationError {
    #[error(transparent)]
    Parameter(#[from] ParameterError),
    #[error(transparent)]
    Sampling(#[from] SamplingError),
    #[error(transparent)]
    Objective(#[from] ObjectiveError),
    #[error(transparent)]
    Synthesis(#[from] SynthesisError),
    #[error(transparent)]
    Search(#[from] SearchError),
    #[error("No specimen object with index {0}")]
    UnknownObject(usize),
    #[error("No reference image is bound")]
    NoReference,
}

/// Location of a flat parameter index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Kernel(usize),
    Object {
        object: usize,
        local: usize,
    },
    Fluorophore {
        object: usize,
        property: usize,
        local: usize,
    },
}

#[derive(Debug)]
pub struct Simulation {
    imaging: ImagingConfig,
    kernel: KernelProvider,
    objects: Vec<Box<dyn SpecimenObject>>,
    synthesizer: Box<dyn ImageSynthesizer>,
    objective: ObjectiveHost,
}

impl Simulation {
    pub fn new(config: SimulationConfig, synthesizer: Box<dyn ImageSynthesizer>) -> Self {
        log::info!(
            "Simulation with {:?} kernel, {} synthesizer, {} objective",
            config.kernel.model,
            synthesizer.name(),
            config.objective
        );
        Self {
            kernel: config.kernel.build_provider(),
            imaging: config.imaging,
            objects: Vec::new(),
            synthesizer,
            objective: ObjectiveHost::new(config.objective),
        }
    }

    /// Simulation rendering with the [`CpuSynthesizer`]
    pub fn with_cpu(config: SimulationConfig) -> Self {
        Self::new(config, Box::new(CpuSynthesizer::new()))
    }

    /// Add an object and return its index
    pub fn add_object(&mut self, mut object: Box<dyn SpecimenObject>) -> usize {
        let index = self.objects.len();
        object
            .parameters_mut()
            .set_owner(ParameterOwner::Object(index));
        for (property, fluorophore) in object.fluorophores_mut().iter_mut().enumerate() {
            fluorophore
                .parameters_mut()
                .set_owner(ParameterOwner::Fluorophore {
                    object: index,
                    property,
                });
        }
        object.refresh_derived();
        log::debug!("Added object {index} '{}'", object.name());
        self.objects.push(object);
        index
    }

    pub fn kernel(&self) -> &KernelProvider {
        &self.kernel
    }

    /// Kernel parameters edited here take effect at the next render
    pub fn kernel_mut(&mut self) -> &mut KernelProvider {
        &mut self.kernel
    }

    pub fn objects(&self) -> &[Box<dyn SpecimenObject>] {
        &self.objects
    }

    pub fn object(&self, index: usize) -> Option<&dyn SpecimenObject> {
        self.objects.get(index).map(|object| object.as_ref())
    }

    pub fn object_mut(&mut self, index: usize) -> Option<&mut (dyn SpecimenObject + 'static)> {
        self.objects.get_mut(index).map(|object| object.as_mut())
    }

    pub fn imaging(&self) -> &ImagingConfig {
        &self.imaging
    }

    pub fn set_imaging(&mut self, imaging: ImagingConfig) {
        self.imaging = imaging;
    }

    pub fn synthesizer_name(&self) -> &str {
        self.synthesizer.name()
    }

    pub fn reference(&self) -> Option<&Volume> {
        self.objective.reference()
    }

    pub fn set_reference(&mut self, reference: Volume) {
        if reference.shape() != self.imaging.shape() {
            log::warn!(
                "Reference is {} but the imaging grid is {}",
                reference.shape(),
                self.imaging.shape()
            );
        }
        self.objective.set_reference(reference);
    }

    pub fn clear_reference(&mut self) -> Option<Volume> {
        self.objective.clear_reference()
    }

    /// Restrict scoring to `region`; `None` scores the whole image
    pub fn set_region(&mut self, region: Option<VoxelRegion>) {
        self.objective.set_region(region);
    }

    pub fn objective(&self) -> &ObjectiveHost {
        &self.objective
    }

    pub fn available_objective_function_names(&self) -> Vec<&'static str> {
        ObjectiveHost::available_names()
    }

    pub fn set_active_objective_function_by_name(
        &mut self,
        name: &str,
    ) -> Result<(), SimulationError> {
        self.objective.set_active_by_name(name)?;
        Ok(())
    }

    /// Refresh every fluorophore property whose object or own parameters
    /// changed, and collect the render input
    pub fn label_batches(&mut self) -> Result<Vec<LabelBatch>, SimulationError> {
        let mut batches = Vec::new();
        for (index, object) in self.objects.iter_mut().enumerate() {
            let geometry = object.geometry();
            let revision = object.parameters().revision();
            for fluorophore in object.fluorophores_mut() {
                fluorophore.refresh(&geometry, revision)?;
                batches.push(fluorophore.label_batch(index));
            }
        }
        Ok(batches)
    }

    fn prepare(&mut self) -> Result<Vec<LabelBatch>, SimulationError> {
        self.kernel.generate();
        self.label_batches()
    }

    /// Render the specimen with the current parameters
    pub fn synthesize_image(&mut self) -> Result<Volume, SimulationError> {
        let batches = self.prepare()?;
        let image = self
            .synthesizer
            .render(&batches, &self.kernel, &self.imaging)?;
        Ok(image)
    }

    /// Render and score against the bound reference
    pub fn score(&mut self) -> Result<ObjectiveScore, SimulationError> {
        let candidate = self.synthesize_image()?;
        Ok(self.objective.score(&candidate)?)
    }

    /// Cost of the current parameters for previews.
    ///
    /// `f64::MAX` without a reference or when rendering or scoring fails.
    pub fn objective_function_value(&mut self) -> f64 {
        if !self.objective.has_reference() {
            return f64::MAX;
        }
        match self.score() {
            Ok(score) => score.cost,
            Err(e) => {
                log::warn!("Objective evaluation failed: {e}");
                f64::MAX
            }
        }
    }

    /// Run `optimizer` on this simulation until it reaches a terminal state
    pub fn start_optimization(
        &mut self,
        optimizer: &mut dyn Optimizer,
        cancel: Option<CancelFlag>,
    ) -> RunReport {
        let run = OptimizationRun::new(self, optimizer);
        match cancel {
            Some(cancel) => run.with_cancel(cancel).execute(),
            None => run.execute(),
        }
    }

    /// Flat index of the parameter with the qualified `name`
    pub fn find_parameter(&self, name: &str) -> Option<usize> {
        (0..self.parameter_count()).find(|&i| self.parameter_name(i).as_deref() == Some(name))
    }

    /// Every parameter with its qualified name
    pub fn parameter_snapshot(&self) -> Vec<ParameterSnapshot> {
        let mut snapshot = Vec::with_capacity(self.parameter_count());
        for index in 0..self.parameter_count() {
            let Some(slot) = self.locate(index) else {
                continue;
            };
            let (registry, local) = self.registry(slot);
            if let Some(mut entry) = registry.snapshot().into_iter().nth(local) {
                entry.name = self.qualified_name(slot, &entry.name);
                snapshot.push(entry);
            }
        }
        snapshot
    }

    fn locate(&self, index: usize) -> Option<Slot> {
        let mut rest = index;
        let kernel_len = self.kernel.parameters().len();
        if rest < kernel_len {
            return Some(Slot::Kernel(rest));
        }
        rest -= kernel_len;

        for (object, entry) in self.objects.iter().enumerate() {
            let len = entry.parameters().len();
            if rest < len {
                return Some(Slot::Object { object, local: rest });
            }
            rest -= len;
            for (property, fluorophore) in entry.fluorophores().iter().enumerate() {
                let len = fluorophore.parameters().len();
                if rest < len {
                    return Some(Slot::Fluorophore {
                        object,
                        property,
                        local: rest,
                    });
                }
                rest -= len;
            }
        }
        None
    }

    /// Registry and local index of a located slot
    fn registry(&self, slot: Slot) -> (&ParameterRegistry, usize) {
        match slot {
            Slot::Kernel(local) => (self.kernel.parameters(), local),
            Slot::Object { object, local } => (self.objects[object].parameters(), local),
            Slot::Fluorophore {
                object,
                property,
                local,
            } => (
                self.objects[object].fluorophores()[property].parameters(),
                local,
            ),
        }
    }

    fn qualified_name(&self, slot: Slot, name: &str) -> String {
        match slot {
            Slot::Kernel(_) => format!("Kernel/{name}"),
            Slot::Object { object, .. } => format!("{}/{name}", self.objects[object].name()),
            Slot::Fluorophore {
                object, property, ..
            } => {
                let owner = &self.objects[object];
                format!(
                    "{}/{}/{name}",
                    owner.name(),
                    owner.fluorophores()[property].name()
                )
            }
        }
    }
}

impl ParameterVector for Simulation {
    fn parameter_count(&self) -> usize {
        self.kernel.parameters().len()
            + self
                .objects
                .iter()
                .map(|object| {
                    object.parameters().len()
                        + object
                            .fluorophores()
                            .iter()
                            .map(|f| f.parameters().len())
                            .sum::<usize>()
                })
                .sum::<usize>()
    }

    fn parameter(&self, index: usize) -> Option<f64> {
        let (registry, local) = self.registry(self.locate(index)?);
        registry.get(local)
    }

    fn set_parameter(&mut self, index: usize, value: f64) -> Result<ChangeToken, ParameterError> {
        let slot = self.locate(index).ok_or(ParameterError::IndexOutOfRange {
            index,
            len: self.parameter_count(),
        })?;
        match slot {
            Slot::Kernel(local) => self.kernel.parameters_mut().set(local, value),
            Slot::Object { object, local } => {
                let entry = &mut self.objects[object];
                let token = entry.parameters_mut().set(local, value)?;
                entry.refresh_derived();
                Ok(token)
            }
            Slot::Fluorophore {
                object,
                property,
                local,
            } => self.objects[object].fluorophores_mut()[property]
                .parameters_mut()
                .set(local, value),
        }
    }

    fn is_optimizable(&self, index: usize) -> bool {
        self.locate(index)
            .map(|slot| {
                let (registry, local) = self.registry(slot);
                registry.is_optimizable(local)
            })
            .unwrap_or(false)
    }

    fn mask(&self, index: usize) -> bool {
        self.locate(index)
            .map(|slot| {
                let (registry, local) = self.registry(slot);
                registry.mask(local)
            })
            .unwrap_or(false)
    }

    fn set_mask(&mut self, index: usize, active: bool) -> bool {
        let Some(slot) = self.locate(index) else {
            return false;
        };
        match slot {
            Slot::Kernel(local) => self.kernel.parameters_mut().set_mask(local, active),
            Slot::Object { object, local } => {
                self.objects[object].parameters_mut().set_mask(local, active)
            }
            Slot::Fluorophore {
                object,
                property,
                local,
            } => self.objects[object].fluorophores_mut()[property]
                .parameters_mut()
                .set_mask(local, active),
        }
    }

    fn parameter_name(&self, index: usize) -> Option<String> {
        let slot = self.locate(index)?;
        let (registry, local) = self.registry(slot);
        let descriptor = registry.descriptor(local)?;
        Some(self.qualified_name(slot, &descriptor.name))
    }
}

impl FitModel for Simulation {
    fn has_reference(&self) -> bool {
        self.objective.has_reference()
    }

    fn evaluate_cost(&mut self) -> Result<f64, SimulationError> {
        if !self.objective.has_reference() {
            return Err(SimulationError::NoReference);
        }
        Ok(self.score()?.cost)
    }

    fn point_gradient(&mut self, object_index: usize) -> Result<PointGradient, SimulationError> {
        if object_index >= self.objects.len() {
            return Err(SimulationError::UnknownObject(object_index));
        }
        let batches = self.prepare()?;
        let reference = self
            .objective
            .reference()
            .ok_or(SimulationError::NoReference)?;
        let gradient = self.synthesizer.render_point_gradient(
            &batches,
            &self.kernel,
            &self.imaging,
            object_index,
            reference,
        )?;
        Ok(gradient)
    }

    fn supports_point_forces(&self, object_index: usize) -> Option<bool> {
        self.objects
            .get(object_index)
            .map(|object| object.supports_point_forces())
    }

    fn apply_point_forces(
        &mut self,
        object_index: usize,
        point_index: usize,
        displacement: &Vector3<f64>,
    ) -> bool {
        let Some(object) = self.objects.get_mut(object_index) else {
            return false;
        };
        let applied = object.apply_point_forces(point_index, displacement);
        if applied {
            object.refresh_derived();
        }
        applied
    }
}
