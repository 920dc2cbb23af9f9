//! Streaming byte pipelines with an incremental ASN.1 BER/DER codec.
//!
//! # Crate Structure
//!
//! - [`stage`]: Stage contract, queues, sinks, filters and channel routing
//! - [`ber`]: Length codec, TLV decoder/encoder, demultiplexer, key-info framing
//! - [`logging`]: Subscriber setup for the library's tracing events (behind `logging` feature)

/// Re-export stage types.
pub mod stage {
    pub use pipeprims_stage::*;
}

/// Re-export BER/DER types.
pub mod ber {
    pub use pipeprims_ber::*;
}

#[cfg(feature = "logging")]
pub mod logging;
