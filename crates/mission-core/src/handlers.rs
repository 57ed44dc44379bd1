//! Behavior handlers derived from a mission descriptor.
//!
//! A mission can carry two pluggable behaviors:
//!
//! - a [`WorldDecorator`] that builds the world before participants join and
//!   gets a chance to update it on every running step;
//! - a [`QuitEvaluator`] that decides when the server itself should end the
//!   running phase, and with which outcome.
//!
//! Both are built once per mission by a [`HandlerFactory`] when the mission
//! is accepted, and dropped at cleanup.

use mission_types::MissionDescriptor;
use tracing::debug;

use crate::host::WorldHost;

/// Quit code reported by [`TickLimitQuit`] when the descriptor has none.
pub const DEFAULT_TIME_LIMIT_OUTCOME: &str = "Out of time";

/// Failure to build the world for a mission.
#[derive(Debug, thiserror::Error)]
pub enum DecoratorError {
    /// The decorator could not build the requested world.
    #[error("{detail}")]
    Build {
        /// Human-readable detail, reported to participants in the abort.
        detail: String,
    },
}

/// Failure to derive behavior handlers from a descriptor.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// The quit conditions cannot be satisfied.
    #[error("invalid quit conditions: {reason}")]
    InvalidQuitConditions {
        /// What is wrong with them.
        reason: String,
    },

    /// No decorator could be built for the requested world.
    #[error("cannot build world decorator: {reason}")]
    Decorator {
        /// What went wrong.
        reason: String,
    },
}

/// Builds and maintains the mission's world.
pub trait WorldDecorator: Send {
    /// Build the world before participants join.
    ///
    /// # Errors
    ///
    /// Returns [`DecoratorError::Build`] when the world cannot be built.
    fn build_on_world(
        &mut self,
        descriptor: &MissionDescriptor,
        host: &mut dyn WorldHost,
    ) -> Result<(), DecoratorError>;

    /// Called once per running step, after the host advanced its world.
    fn update(&mut self, _host: &mut dyn WorldHost) {}
}

/// Decides when the server ends a running mission on its own.
pub trait QuitEvaluator: Send {
    /// Called once when the running phase starts.
    fn prepare(&mut self, descriptor: &MissionDescriptor);

    /// Polled once per running step.
    fn wants_to_quit(&mut self, descriptor: &MissionDescriptor) -> bool;

    /// The quit code to report once [`wants_to_quit`](Self::wants_to_quit)
    /// returned `true`.
    fn outcome(&self) -> String;

    /// Called once when the running phase ends, whichever way.
    fn cleanup(&mut self);
}

/// The handlers built for one mission. Either may be absent.
#[derive(Default)]
pub struct BehaviorHandlers {
    /// World builder, if the mission needs one.
    pub world_decorator: Option<Box<dyn WorldDecorator>>,
    /// Server-side quit condition, if the mission declares one.
    pub quit_evaluator: Option<Box<dyn QuitEvaluator>>,
}

impl core::fmt::Debug for BehaviorHandlers {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BehaviorHandlers")
            .field("world_decorator", &self.world_decorator.is_some())
            .field("quit_evaluator", &self.quit_evaluator.is_some())
            .finish()
    }
}

/// Derives [`BehaviorHandlers`] from a descriptor.
pub trait HandlerFactory: Send {
    /// Build the handlers for a mission.
    ///
    /// # Errors
    ///
    /// Returns a [`HandlerError`] when the descriptor asks for behavior
    /// that cannot be provided.
    fn create(&self, descriptor: &MissionDescriptor) -> Result<BehaviorHandlers, HandlerError>;
}

impl<F> HandlerFactory for F
where
    F: Fn(&MissionDescriptor) -> Result<BehaviorHandlers, HandlerError> + Send,
{
    fn create(&self, descriptor: &MissionDescriptor) -> Result<BehaviorHandlers, HandlerError> {
        self(descriptor)
    }
}

/// Closure that builds an optional world decorator for a descriptor.
pub type DecoratorBuilder = Box<
    dyn Fn(&MissionDescriptor) -> Result<Option<Box<dyn WorldDecorator>>, HandlerError> + Send,
>;

/// The built-in factory.
///
/// Quit conditions map to a [`TickLimitQuit`]; the world decorator comes
/// from an optional builder supplied by the embedding host.
#[derive(Default)]
pub struct DefaultHandlerFactory {
    decorator: Option<DecoratorBuilder>,
}

impl DefaultHandlerFactory {
    /// A factory that builds no world decorator.
    pub fn new() -> Self {
        Self::default()
    }

    /// A factory that asks `builder` for a world decorator per mission.
    pub fn with_decorator<B>(builder: B) -> Self
    where
        B: Fn(&MissionDescriptor) -> Result<Option<Box<dyn WorldDecorator>>, HandlerError>
            + Send
            + 'static,
    {
        Self {
            decorator: Some(Box::new(builder)),
        }
    }
}

impl core::fmt::Debug for DefaultHandlerFactory {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DefaultHandlerFactory")
            .field("decorator", &self.decorator.is_some())
            .finish()
    }
}

impl HandlerFactory for DefaultHandlerFactory {
    fn create(&self, descriptor: &MissionDescriptor) -> Result<BehaviorHandlers, HandlerError> {
        let quit_evaluator: Option<Box<dyn QuitEvaluator>> = match descriptor.quit.time_limit_ticks
        {
            Some(0) => {
                return Err(HandlerError::InvalidQuitConditions {
                    reason: String::from("time limit must be at least one tick"),
                });
            }
            Some(limit) => {
                let outcome = descriptor
                    .quit
                    .description
                    .clone()
                    .unwrap_or_else(|| DEFAULT_TIME_LIMIT_OUTCOME.to_owned());
                Some(Box::new(TickLimitQuit::new(limit, outcome)))
            }
            None => None,
        };

        let world_decorator = match &self.decorator {
            Some(build) => build(descriptor)?,
            None => None,
        };

        debug!(
            decorator = world_decorator.is_some(),
            quit_evaluator = quit_evaluator.is_some(),
            "Behavior handlers created"
        );

        Ok(BehaviorHandlers {
            world_decorator,
            quit_evaluator,
        })
    }
}

/// Ends the mission after a fixed number of running steps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickLimitQuit {
    limit: u64,
    elapsed: u64,
    outcome: String,
}

impl TickLimitQuit {
    /// Quit after `limit` polls, reporting `outcome`.
    pub const fn new(limit: u64, outcome: String) -> Self {
        Self {
            limit,
            elapsed: 0,
            outcome,
        }
    }
}

impl QuitEvaluator for TickLimitQuit {
    fn prepare(&mut self, _descriptor: &MissionDescriptor) {
        self.elapsed = 0;
    }

    fn wants_to_quit(&mut self, _descriptor: &MissionDescriptor) -> bool {
        self.elapsed = self.elapsed.saturating_add(1);
        self.elapsed >= self.limit
    }

    fn outcome(&self) -> String {
        self.outcome.clone()
    }

    fn cleanup(&mut self) {
        self.elapsed = 0;
    }
}
