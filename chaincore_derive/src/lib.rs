//! Derive macros for the chaincore crate.
//!
//! Provides:
//! - `#[derive(BinaryCodec)]` - deterministic binary serialization
//! - `#[derive(Error)]` - error type boilerplate (thiserror replacement)

mod codec;
mod error;

use proc_macro::TokenStream;

/// Implements the `Encode` and `Decode` traits for deterministic binary
/// serialization.
///
/// Fields are serialized in declaration order using the crate's big-endian
/// wire format. An optional `#[binary_codec(max_size = EXPR)]` attribute
/// wraps the record in an 8-byte length prefix and rejects payloads larger
/// than the bound during decoding.
#[proc_macro_derive(BinaryCodec, attributes(binary_codec))]
pub fn derive_binary_codec(input: TokenStream) -> TokenStream {
    codec::derive_binary_codec(input)
}

/// Implements `Display` and `std::error::Error` from `#[error("...")]`
/// attributes on the type or its variants.
#[proc_macro_derive(Error, attributes(error))]
pub fn derive_error(input: TokenStream) -> TokenStream {
    error::derive_error(input)
}
