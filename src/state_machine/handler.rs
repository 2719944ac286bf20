use std::collections::HashMap;

use super::{Event, State, StateContext};
use crate::recovery::Failure;
use crate::work_item::WorkItem;

/// Performs the UI work of one state and reports what happened.
pub trait StateHandler: Send {
    fn execute(&self, ctx: &mut StateContext, item: &WorkItem) -> Result<Event, Failure>;
}

impl<F> StateHandler for F
where
    F: Fn(&mut StateContext, &WorkItem) -> Result<Event, Failure> + Send,
{
    fn execute(&self, ctx: &mut StateContext, item: &WorkItem) -> Result<Event, Failure> {
        self(ctx, item)
    }
}

/// One handler per state.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<State, Box<dyn StateHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `state`, replacing any previous one.
    pub fn register(&mut self, state: State, handler: impl StateHandler + 'static) -> &mut Self {
        self.handlers.insert(state, Box::new(handler));
        self
    }

    pub fn get(&self, state: State) -> Option<&dyn StateHandler> {
        self.handlers.get(&state).map(|h| h.as_ref())
    }

    pub fn contains(&self, state: State) -> bool {
        self.handlers.contains_key(&state)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::work_item::WorkItem;

    #[test]
    fn registry_dispatches_by_state() {
        let mut registry = HandlerRegistry::new();
        registry
            .register(State::LoadingNit, |_: &mut StateContext, _: &WorkItem| {
                Ok(Event::NitLoaded)
            })
            .register(State::LoadingOrder, |_: &mut StateContext, _: &WorkItem| {
                Ok(Event::OrderLoaded)
            });

        let item = WorkItem::sample("order1.json");
        let mut ctx = StateContext::default();
        let handler = registry.get(State::LoadingOrder).unwrap();
        assert_eq!(handler.execute(&mut ctx, &item), Ok(Event::OrderLoaded));
        assert!(registry.get(State::LoadingDate).is_none());
        assert_eq!(registry.len(), 2);
    }
}
