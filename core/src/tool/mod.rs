//! Tool identity, specs, and codecs.

mod catalog;
mod codec;
mod id;
mod spec;

pub use catalog::ToolCatalog;
pub use codec::{CodecError, CodecJson, ErasedResultCodec, SerdeJsonCodec};
pub use id::{ToolId, ToolIdParseError};
pub use spec::{ToolSpec, TypeSpec};
