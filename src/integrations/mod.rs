//! External service integrations.

pub mod gemini_client {
    pub use crate::gemini_client::*;
}

pub mod inference {
    pub use crate::inference::*;
}
