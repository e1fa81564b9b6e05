//! External service integrations.

pub mod facebook_client {
    pub use crate::facebook_client::*;
}

pub mod b2cor_client {
    pub use crate::b2cor_client::*;
}

pub mod delivery_ledger {
    pub use crate::delivery_ledger::*;
}

pub mod credentials {
    pub use crate::credentials::*;
}
