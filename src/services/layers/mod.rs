pub mod backend;
pub mod codec;
pub mod store;

pub use backend::{FileBackend, KvBackend, MemoryBackend};
pub use codec::{decode_record, encode_record, DecodedRecord, RECORD_VERSION};
pub use store::{record_key, renumber, LayerStore};
