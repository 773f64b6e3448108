pub mod config;
pub mod emitter;
pub mod error;
pub mod observability;
pub mod result;
pub mod state;
pub mod stream;

mod registry;
mod util;

pub use emitter::TokenEmitter;
pub use error::{ParseError, StreamError};
pub use registry::Subscription;
pub use result::{StreamHandle, StreamResult, WeakStreamHandle};
pub use state::StreamFactory;
