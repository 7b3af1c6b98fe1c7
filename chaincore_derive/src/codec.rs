//! Derive macro for deterministic binary serialization.
//!
//! Generates `Encode` and `Decode` implementations for structs and enums.
//! Fields are processed in declaration order; enums carry a `u8`
//! discriminant before the variant fields. The wire format itself lives in
//! `chaincore::types::encoding`, so the generated code only chains trait
//! calls.
//!
//! A struct may opt into a length-prefixed envelope:
//!
//! ```ignore
//! #[derive(BinaryCodec)]
//! #[binary_codec(max_size = MAX_BLOCK_BYTES)]
//! pub struct Block { ... }
//! ```
//!
//! The envelope writes the encoded payload size as a `u64` before the
//! fields and rejects any length prefix above the bound while decoding,
//! which keeps a corrupted or hostile length from driving allocations.

use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, Data, DataEnum, DeriveInput, Fields};

pub fn derive_binary_codec(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    match expand(&input) {
        Ok(tokens) => TokenStream::from(tokens),
        Err(err) => err.to_compile_error().into(),
    }
}

fn expand(input: &DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();
    let max_size = envelope_bound(input)?;

    let (encode_body, decode_body) = match &input.data {
        Data::Struct(data) => struct_impls(&data.fields),
        Data::Enum(data) => {
            if max_size.is_some() {
                return Err(syn::Error::new_spanned(
                    input,
                    "#[binary_codec(max_size = ...)] is only supported on structs",
                ));
            }
            enum_impls(data)
        }
        Data::Union(_) => {
            return Err(syn::Error::new_spanned(
                input,
                "BinaryCodec derive does not support unions",
            ));
        }
    };

    let type_name = name.to_string();
    let expanded = match max_size {
        None => quote! {
            impl #impl_generics crate::types::encoding::Encode for #name #ty_generics #where_clause {
                fn encode<S: crate::types::encoding::EncodeSink>(&self, out: &mut S) {
                    #encode_body
                }
            }

            impl #impl_generics crate::types::encoding::Decode for #name #ty_generics #where_clause {
                fn decode(
                    input: &mut &[u8],
                ) -> ::std::result::Result<Self, crate::types::encoding::DecodeError> {
                    #decode_body
                }
            }
        },
        Some(bound) => quote! {
            impl #impl_generics crate::types::encoding::Encode for #name #ty_generics #where_clause {
                fn encode<S: crate::types::encoding::EncodeSink>(&self, out: &mut S) {
                    let mut counter = crate::types::encoding::SizeCounter::new();
                    {
                        let out = &mut counter;
                        #encode_body
                    }
                    crate::types::encoding::Encode::encode(&(counter.len() as u64), out);
                    #encode_body
                }
            }

            impl #impl_generics crate::types::encoding::Decode for #name #ty_generics #where_clause {
                fn decode(
                    input: &mut &[u8],
                ) -> ::std::result::Result<Self, crate::types::encoding::DecodeError> {
                    let declared = <u64 as crate::types::encoding::Decode>::decode(input)? as usize;
                    if declared > #bound {
                        return Err(crate::types::encoding::DecodeError::LengthOverflow {
                            type_name: #type_name,
                        });
                    }
                    if input.len() < declared {
                        return Err(crate::types::encoding::DecodeError::UnexpectedEof);
                    }
                    let (payload, rest) = input.split_at(declared);
                    *input = rest;
                    let mut payload = payload;
                    let input = &mut payload;
                    let value = { #decode_body }?;
                    if !input.is_empty() {
                        return Err(crate::types::encoding::DecodeError::InvalidValue);
                    }
                    Ok(value)
                }
            }
        },
    };

    Ok(expanded)
}

/// Extracts the `max_size` bound from `#[binary_codec(max_size = EXPR)]`.
fn envelope_bound(input: &DeriveInput) -> syn::Result<Option<syn::Expr>> {
    for attr in &input.attrs {
        if !attr.path().is_ident("binary_codec") {
            continue;
        }
        let pair: syn::MetaNameValue = attr.parse_args()?;
        if !pair.path.is_ident("max_size") {
            return Err(syn::Error::new_spanned(
                &pair.path,
                "unknown #[binary_codec] option; expected `max_size = EXPR`",
            ));
        }
        return Ok(Some(pair.value));
    }
    Ok(None)
}

/// Builds the encode statements and the decode expression for a struct.
fn struct_impls(fields: &Fields) -> (proc_macro2::TokenStream, proc_macro2::TokenStream) {
    match fields {
        Fields::Named(fields) => {
            let names: Vec<_> = fields.named.iter().map(|f| &f.ident).collect();
            let encode = quote! {
                #(crate::types::encoding::Encode::encode(&self.#names, out);)*
            };
            let decode = quote! {
                Ok(Self {
                    #(#names: crate::types::encoding::Decode::decode(input)?,)*
                })
            };
            (encode, decode)
        }
        Fields::Unnamed(fields) => {
            let indices: Vec<_> = (0..fields.unnamed.len()).map(syn::Index::from).collect();
            let decodes = indices.iter().map(|_| {
                quote! { crate::types::encoding::Decode::decode(input)?, }
            });
            let encode = quote! {
                #(crate::types::encoding::Encode::encode(&self.#indices, out);)*
            };
            let decode = quote! { Ok(Self(#(#decodes)*)) };
            (encode, decode)
        }
        Fields::Unit => (quote! {}, quote! { Ok(Self) }),
    }
}

/// Builds the encode statements and the decode expression for an enum.
///
/// Variants are tagged with a `u8` discriminant, honoring explicit
/// `Variant = N` assignments and auto-incrementing otherwise.
fn enum_impls(data: &DataEnum) -> (proc_macro2::TokenStream, proc_macro2::TokenStream) {
    let tags = discriminants(data);

    let encode_arms = data.variants.iter().zip(&tags).map(|(variant, &tag)| {
        let ident = &variant.ident;
        match &variant.fields {
            Fields::Unit => quote! {
                Self::#ident => {
                    crate::types::encoding::Encode::encode(&#tag, out);
                }
            },
            Fields::Unnamed(fields) => {
                let bindings: Vec<_> = (0..fields.unnamed.len())
                    .map(|i| quote::format_ident!("f{}", i))
                    .collect();
                quote! {
                    Self::#ident(#(#bindings),*) => {
                        crate::types::encoding::Encode::encode(&#tag, out);
                        #(crate::types::encoding::Encode::encode(#bindings, out);)*
                    }
                }
            }
            Fields::Named(fields) => {
                let bindings: Vec<_> = fields.named.iter().map(|f| &f.ident).collect();
                quote! {
                    Self::#ident { #(#bindings),* } => {
                        crate::types::encoding::Encode::encode(&#tag, out);
                        #(crate::types::encoding::Encode::encode(#bindings, out);)*
                    }
                }
            }
        }
    });

    let decode_arms = data.variants.iter().zip(&tags).map(|(variant, &tag)| {
        let ident = &variant.ident;
        match &variant.fields {
            Fields::Unit => quote! { #tag => Ok(Self::#ident), },
            Fields::Unnamed(fields) => {
                let decodes = (0..fields.unnamed.len()).map(|_| {
                    quote! { crate::types::encoding::Decode::decode(input)?, }
                });
                quote! { #tag => Ok(Self::#ident(#(#decodes)*)), }
            }
            Fields::Named(fields) => {
                let decodes = fields.named.iter().map(|f| {
                    let name = &f.ident;
                    quote! { #name: crate::types::encoding::Decode::decode(input)?, }
                });
                quote! { #tag => Ok(Self::#ident { #(#decodes)* }), }
            }
        }
    });

    let encode = quote! {
        match self {
            #(#encode_arms)*
        }
    };
    let decode = quote! {
        {
            let tag: u8 = crate::types::encoding::Decode::decode(input)?;
            match tag {
                #(#decode_arms)*
                _ => Err(crate::types::encoding::DecodeError::InvalidValue),
            }
        }
    };
    (encode, decode)
}

/// Computes the `u8` discriminant for each variant, following Rust's rules:
/// explicit `= N` values are honored, everything else increments from the
/// previous variant.
fn discriminants(data: &DataEnum) -> Vec<u8> {
    let mut tags = Vec::with_capacity(data.variants.len());
    let mut next: u8 = 0;

    for variant in &data.variants {
        let tag = match &variant.discriminant {
            Some((_, syn::Expr::Lit(lit))) => match &lit.lit {
                syn::Lit::Int(int) => int
                    .base10_parse::<u8>()
                    .expect("enum discriminant must fit in u8"),
                _ => panic!("enum discriminant must be an integer literal"),
            },
            Some(_) => panic!("enum discriminant must be a simple integer literal"),
            None => next,
        };
        tags.push(tag);
        next = tag.wrapping_add(1);
    }

    tags
}
