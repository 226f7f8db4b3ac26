pub mod adapter;
pub mod collaborator;
pub mod deletion;
pub mod engine;
pub mod gate;
pub mod matcher;
pub mod memory;
pub mod model;
pub mod pairer;
pub mod report;
pub mod resolver;
pub mod state;

pub use adapter::{ItemAdapter, NoteAdapter, OwnedResource, ReminderAdapter};
pub use collaborator::{
    CollaboratorError, ContainerProvisioner, Enumerator, Mutator, SideStore,
};
pub use engine::{DriverConfig, EngineError, PassState, SyncDriver};
pub use gate::{ActionGate, AllowAll, DryRun, PlannedAction};
pub use memory::MemoryStore;
pub use model::{
    Attachment, Container, ContainerRef, Direction, Item, ItemKind, NotePayload, PairingRecord,
    Payload, ReminderPayload, Side, SnapshotEntry,
};
pub use pairer::PairingPolicy;
pub use report::{
    ActionKind, ActionOutcome, ActionRecord, ContainerOutcome, PassStatus, RunReport,
};
pub use state::{StateError, StateStore};
