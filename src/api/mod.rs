// Thin namespace wrapper for API-layer components
pub mod handlers {
    pub use crate::handlers::*;
}

pub mod document_insight {
    pub use crate::document_insight::*;
}
