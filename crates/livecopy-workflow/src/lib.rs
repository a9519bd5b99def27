//! livecopy provisioning workflow.
//!
//! Copies a running live system onto USB sticks, SD cards or disks
//! (partition planning, formatting, transfer, boot loader), or repackages it
//! as an ISO image. Every side effect goes through `livecopy_hal::SystemHal`.

pub mod boot_config;
pub mod bootloader;
pub mod config;
pub mod iso;
pub mod manifest;
pub mod mounts;
pub mod orchestrator;
pub mod planner;
pub mod progress;
pub mod provisioner;
pub mod safety;
pub mod telemetry;
pub mod validation;
pub mod workflow;

pub use config::{Flavor, ProvisioningOptions, SourceDescriptors, SwapPolicy, Timings};
pub use iso::IsoTarget;
pub use planner::{LayoutClass, PartitionLayout};
pub use progress::{Phase, ProgressReporter, ProgressState, ProgressUpdate};
pub use safety::{Answer, ArmToken, ConfirmRequest, Confirmer, ScriptedConfirmer};
pub use telemetry::{ProgressEvent, ProgressParser, ProgressStream};
pub use validation::{PlannedDevice, SourceSizes};
pub use workflow::{DeviceOutcome, RunResult, Workflow, WorkflowState};
