//! Domain types shared by the engine components.

pub mod creator;
pub mod event;
pub mod snapshot;
pub mod status;

pub use creator::{
    Binding, BindingTarget, Creator, EndpointProfile, EndpointRef, NotifyKinds, TemplateOverrides,
};
pub use event::{Event, EventKind, SubjectKind, SubjectRef};
pub use snapshot::{LiveStatus, PostInfo, PostKind, PriorSnapshot, Snapshot};
pub use status::{
    BindingStatus, ConnectionState, CreatorStatus, DeliveryAttempt, DeliveryResult,
};
