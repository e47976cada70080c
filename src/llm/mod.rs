pub mod error;
pub mod ndjson;
pub mod shape;
pub mod transport;

pub use error::TransportError;
pub use ndjson::NdjsonStream;
pub use shape::{ RequestBody, RequestShape };
pub use transport::{ ByteStream, ModelInfo, OllamaTransport };
