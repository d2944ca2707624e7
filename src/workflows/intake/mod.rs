//! Cross-channel loan application intake.
//!
//! One applicant, several channels: a session per channel holds the wizard
//! position and accumulated form data, short reference codes link the
//! channels together, and the synchronization engine keeps paired sessions
//! converging on the same application. External systems (catalog, document
//! pipeline, downstream intake) sit behind the `CatalogLookup`,
//! `FormTypeDetector`, and `SubmissionSink` seams.

pub mod catalog;
pub mod codes;
pub mod controller;
pub(crate) mod detector;
pub mod domain;
pub mod router;
pub(crate) mod steps;
pub mod store;
pub mod sync;
pub(crate) mod validation;

#[cfg(test)]
mod tests;

pub use catalog::{CatalogKind, CatalogLookup, StaticCatalog};
pub use codes::{CodeError, CodeGenerator, OsRngCodes, ReferenceCodeService};
pub use controller::{
    AdvanceOutcome, CompletedSubmission, ControllerError, StartOutcome, SubmissionError,
    SubmissionSink, TracingSink, WizardController,
};
pub use detector::{FormTypeDetector, MarkerDetector};
pub use domain::{
    ApplicationState, Channel, FormData, FormVariant, NewState, SessionLifetimes, StatePatch, Step,
};
pub use router::{intake_router, IntakeState};
pub use steps::{compute_steps, next_step, previous_step};
pub use store::{MemoryStateStore, StateStore, StoreError};
pub use sync::{SyncEngine, SyncError, SyncOutcome, SyncStatus, WebSwitch, WhatsappSwitch};
pub use validation::{validate_step, FieldError, ValidationOutcome};
