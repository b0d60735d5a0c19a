// Domain-layer modules and shared errors/models
pub mod trust_score {
    pub use crate::trust_score::*;
}

pub mod retry_engine {
    pub use crate::retry_engine::*;
}

pub mod cascade {
    pub use crate::cascade::*;
}

pub mod vouch_ledger {
    pub use crate::vouch_ledger::*;
}

pub mod models {
    pub use crate::models::*;
}

pub mod errors {
    pub use crate::errors::*;
}
