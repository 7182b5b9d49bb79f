//! Payload mapping and substitution engine.
//!
//! Applies a [`dynmap_core::MappingRule`] to a payload and produces the
//! platform requests the rule describes.
//!
//! ```text
//! payload ──> extract ──> plan records ──> resolve identities ──> dispatch
//!              │             │                  │                   │
//!         evaluator     repair strategies   identity cache       facades
//! ```
//!
//! Every run returns a [`ProcessingContext`] holding the request log and all
//! errors. Failures stay local to the substitution, record or request that
//! caused them.

pub mod context;
pub mod dispatch;
pub mod document;
pub mod engine;
pub mod error;
pub mod extract;
pub mod facade;
pub mod identity;
pub mod substitute;

pub use context::{
    ProcessingContext, ProcessingType, Request, RequestId, RequestMethod, RunSummary,
    SubstituteValue, SubstitutionCache, TypedValue, NOT_DEFINED,
};
pub use dispatch::{device_body, RequestOrchestrator};
pub use engine::MappingEngine;
pub use error::{EngineError, FacadeError, FacadeResult, IdentityError, Result};
pub use facade::{ApiFacade, Facades, IdentityFacade, MessagePublisher, NoIdentity};
pub use identity::{DeviceIdentityResolver, IdentityBackend, IdentityLookup};
pub use substitute::Anchor;
