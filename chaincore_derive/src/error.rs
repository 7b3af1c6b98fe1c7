//! Derive macro for error types.
//!
//! Generates `std::fmt::Display` and `std::error::Error` implementations
//! from `#[error("...")]` attributes, interpolating `{0}`, `{1}` for tuple
//! fields and `{name}` for named fields.
//!
//! ```ignore
//! #[derive(Debug, Error)]
//! pub enum StoreError {
//!     #[error("key not found: {0}")]
//!     NotFound(String),
//!
//!     #[error("corrupt record at {key}: {reason}")]
//!     Corrupt { key: String, reason: String },
//! }
//! ```

use proc_macro::TokenStream;
use quote::{quote, ToTokens};
use syn::{parse_macro_input, Data, DeriveInput, Fields, Lit, Meta};

pub fn derive_error(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    match expand(&input) {
        Ok(tokens) => TokenStream::from(tokens),
        Err(err) => err.to_compile_error().into(),
    }
}

fn expand(input: &DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let display_body = match &input.data {
        Data::Enum(data) => {
            let arms = data
                .variants
                .iter()
                .map(|variant| {
                    let ident = &variant.ident;
                    let message = message_from_attrs(
                        &variant.attrs,
                        ident,
                        &format!("variant `{}`", ident),
                    )?;
                    Ok(match &variant.fields {
                        Fields::Unit => quote! {
                            Self::#ident => write!(f, #message),
                        },
                        Fields::Unnamed(fields) => {
                            let bindings: Vec<_> = (0..fields.unnamed.len())
                                .map(|i| quote::format_ident!("f{}", i))
                                .collect();
                            let format = positional_to_named(&message, fields.unnamed.len());
                            quote! {
                                Self::#ident(#(#bindings),*) =>
                                    write!(f, #format, #(#bindings = #bindings),*),
                            }
                        }
                        Fields::Named(fields) => {
                            let bindings: Vec<_> =
                                fields.named.iter().map(|f| &f.ident).collect();
                            quote! {
                                Self::#ident { #(#bindings),* } =>
                                    write!(f, #message, #(#bindings = #bindings),*),
                            }
                        }
                    })
                })
                .collect::<syn::Result<Vec<_>>>()?;

            quote! {
                match self {
                    #(#arms)*
                }
            }
        }
        Data::Struct(data) => {
            let message =
                message_from_attrs(&input.attrs, name, &format!("type `{}`", name))?;
            match &data.fields {
                Fields::Unit => quote! { write!(f, #message) },
                Fields::Named(fields) => {
                    let names: Vec<_> = fields.named.iter().map(|f| &f.ident).collect();
                    quote! { write!(f, #message, #(#names = self.#names),*) }
                }
                Fields::Unnamed(fields) => {
                    let bindings: Vec<_> = (0..fields.unnamed.len())
                        .map(|i| quote::format_ident!("f{}", i))
                        .collect();
                    let indices: Vec<_> =
                        (0..fields.unnamed.len()).map(syn::Index::from).collect();
                    let format = positional_to_named(&message, fields.unnamed.len());
                    quote! { write!(f, #format, #(#bindings = self.#indices),*) }
                }
            }
        }
        Data::Union(_) => {
            return Err(syn::Error::new_spanned(
                input,
                "Error derive does not support unions",
            ));
        }
    };

    Ok(quote! {
        impl #impl_generics ::std::fmt::Display for #name #ty_generics #where_clause {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                #display_body
            }
        }

        impl #impl_generics ::std::error::Error for #name #ty_generics #where_clause {}
    })
}

/// Extracts the message literal from an `#[error("...")]` attribute.
fn message_from_attrs<T: ToTokens>(
    attrs: &[syn::Attribute],
    target: &T,
    target_desc: &str,
) -> syn::Result<String> {
    for attr in attrs {
        if !attr.path().is_ident("error") {
            continue;
        }
        let Meta::List(list) = &attr.meta else {
            return Err(syn::Error::new_spanned(
                &attr.meta,
                "invalid #[error] attribute; use #[error(\"message\")]",
            ));
        };
        let lit = syn::parse2::<Lit>(list.tokens.clone()).map_err(|_| {
            syn::Error::new_spanned(
                &attr.meta,
                "failed to parse #[error] attribute; expected a string literal",
            )
        })?;
        let Lit::Str(message) = lit else {
            return Err(syn::Error::new_spanned(
                &attr.meta,
                "#[error] message must be a string literal",
            ));
        };
        return Ok(message.value());
    }

    Err(syn::Error::new_spanned(
        target,
        format!(
            "missing #[error(\"...\")] attribute on {}; every error must declare a display message",
            target_desc
        ),
    ))
}

/// Rewrites positional format args `{0}`, `{1}` into named args `{f0}`,
/// `{f1}` so tuple fields can be bound by identifier.
fn positional_to_named(format: &str, field_count: usize) -> String {
    let mut result = format.to_string();
    for i in (0..field_count).rev() {
        result = result.replace(&format!("{{{}}}", i), &format!("{{f{}}}", i));
    }
    result
}
