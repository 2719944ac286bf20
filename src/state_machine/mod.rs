//! The generic work-item state machine.

mod context;
mod handler;
mod machine;
mod state;

pub use context::{StateContext, epoch_seconds};
pub use handler::{HandlerRegistry, StateHandler};
pub use machine::StateMachine;
pub use state::{Event, State, Target, TransitionTable};
