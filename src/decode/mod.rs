pub mod pool;
pub mod proto;
pub mod registry;
pub mod tx;

pub use pool::DecoderPool;
pub use registry::{DecodeError, DecodeRegistry};
pub use tx::{decode_tx_bytes, placeholder_tx, TX_TYPE_URL};
