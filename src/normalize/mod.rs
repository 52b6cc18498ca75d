pub mod case;
pub mod coin;
pub mod events;

pub use case::convert_keys_deep;
pub use coin::{parse_coin, Coin};
pub use events::{is_canonical_base64, normalize_event, normalize_events, parse_raw_log};
