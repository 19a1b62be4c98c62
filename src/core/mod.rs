// Domain-layer modules and shared errors/models
pub mod soil_health {
    pub use crate::soil_health::*;
}

pub mod prediction {
    pub use crate::prediction::*;
}

pub mod classifier {
    pub use crate::classifier::*;
}

pub mod models {
    pub use crate::models::*;
}

pub mod errors {
    pub use crate::errors::*;
}
