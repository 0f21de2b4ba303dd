pub mod engine;
pub mod states;

pub use engine::LifecycleEngine;
pub use states::{
    ChangeSet, Initiator, LifecycleSettings, Transition, TransitionOutcome,
    SIBLING_ACCEPTED_REASON,
};
