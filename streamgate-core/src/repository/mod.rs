pub mod stream;

pub use stream::{InMemoryStreamCatalog, StreamCatalog};
