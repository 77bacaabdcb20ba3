//! Wire codec for the script entry point.
//!
//! - **codec**: positional argument encoding, payload JSON handling and
//!   typed reply decoders
//! - **clock**: the injectable timestamp source

pub mod clock;
pub mod codec;

pub use clock::{Clock, FixedClock, SystemClock};
pub use codec::{
    decode_bool, decode_bytes, decode_integer, decode_json, decode_string, decode_string_list,
    empty_payload, encode_payload, Arg, ConfigValue, Invocation, Opcode, Reply, EMPTY_PAYLOAD,
    NO_DATA_SENTINEL, QUALIFIER,
};
