//! External service integrations.

pub mod gateway {
    pub use crate::gateway::*;
}

pub mod notifier {
    pub use crate::notifier::*;
}
