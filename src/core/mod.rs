// Pipeline components and shared errors/models
pub mod extractor {
    pub use crate::extractor::*;
}

pub mod sender {
    pub use crate::sender::*;
}

pub mod retention {
    pub use crate::retention::*;
}

pub mod scheduler {
    pub use crate::scheduler::*;
}

pub mod orchestrator {
    pub use crate::orchestrator::*;
}

pub mod models {
    pub use crate::models::*;
}

pub mod errors {
    pub use crate::errors::*;
}
