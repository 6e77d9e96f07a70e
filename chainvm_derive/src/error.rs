//! Derive macro for error types.
//!
//! Generates `std::fmt::Display` and `std::error::Error` implementations
//! from `#[error("...")]` attributes, replacing the `thiserror` crate.
//!
//! # Usage
//!
//! ```ignore
//! use chainvm_derive::Error;
//!
//! #[derive(Debug, Error)]
//! pub enum RuntimeError {
//!     #[error("invalid opcode: {0}")]
//!     InvalidCode(u8),
//!
//!     #[error("index {index} out of bound (len {len})")]
//!     OutOfBound { index: u8, len: usize },
//!
//!     #[error("out of gas")]
//!     OutOfGas,
//! }
//! ```
//!
//! Messages interpolate `{0}`, `{1}` for tuple fields and `{name}` for
//! named fields; format specs like `{name:?}` pass through for named
//! fields only.

use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, Data, DataStruct, DeriveInput, Fields, Lit, Meta};

/// Derives `Display` and `Error` for an enum or struct.
///
/// Every enum variant (or the struct itself) must carry an
/// `#[error("...")]` attribute with its display message.
pub fn derive_error(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    let body = match &input.data {
        Data::Enum(data_enum) => data_enum
            .variants
            .iter()
            .map(variant_display_arm)
            .collect::<syn::Result<Vec<_>>>()
            .map(|arms| {
                quote! {
                    match self {
                        #(#arms)*
                    }
                }
            }),
        Data::Struct(data_struct) => struct_display_body(&input, data_struct),
        Data::Union(_) => Err(syn::Error::new_spanned(
            &input,
            "Error derive does not support unions",
        )),
    };

    match body {
        Ok(display_body) => error_impls(&input, display_body).into(),
        Err(err) => err.to_compile_error().into(),
    }
}

/// Wraps a generated `Display` body with the trait impl pair.
fn error_impls(input: &DeriveInput, display_body: proc_macro2::TokenStream) -> proc_macro2::TokenStream {
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    quote! {
        impl #impl_generics ::std::fmt::Display for #name #ty_generics #where_clause {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                #display_body
            }
        }

        impl #impl_generics ::std::error::Error for #name #ty_generics #where_clause {}
    }
}

/// One `match self` arm rendering a variant's message.
fn variant_display_arm(variant: &syn::Variant) -> syn::Result<proc_macro2::TokenStream> {
    let variant_name = &variant.ident;
    let message = error_message(
        &variant.attrs,
        variant,
        &format!("variant `{}`", variant_name),
    )?;

    let arm = match &variant.fields {
        Fields::Unit => quote! {
            Self::#variant_name => write!(f, #message),
        },
        Fields::Unnamed(fields) => {
            let bindings: Vec<_> = (0..fields.unnamed.len())
                .map(|i| quote::format_ident!("f{}", i))
                .collect();
            let format_str = rename_positional_args(&message, fields.unnamed.len());
            quote! {
                Self::#variant_name(#(#bindings),*) => write!(f, #format_str, #(#bindings = #bindings),*),
            }
        }
        Fields::Named(fields) => {
            let bindings: Vec<_> = fields.named.iter().map(|field| &field.ident).collect();
            quote! {
                Self::#variant_name { #(#bindings),* } => write!(f, #message, #(#bindings = #bindings),*),
            }
        }
    };

    Ok(arm)
}

/// The `write!` body for a struct, interpolating its fields from `self`.
fn struct_display_body(
    input: &DeriveInput,
    data_struct: &DataStruct,
) -> syn::Result<proc_macro2::TokenStream> {
    let message = error_message(
        &input.attrs,
        &input.ident,
        &format!("type `{}`", input.ident),
    )?;

    let body = match &data_struct.fields {
        Fields::Unit => quote! {
            write!(f, #message)
        },
        Fields::Named(fields) => {
            let names: Vec<_> = fields.named.iter().map(|field| &field.ident).collect();
            quote! {
                write!(f, #message, #(#names = self.#names),*)
            }
        }
        Fields::Unnamed(fields) => {
            let bindings: Vec<_> = (0..fields.unnamed.len())
                .map(|i| quote::format_ident!("f{}", i))
                .collect();
            let indices: Vec<_> = (0..fields.unnamed.len()).map(syn::Index::from).collect();
            let format_str = rename_positional_args(&message, fields.unnamed.len());
            quote! {
                write!(f, #format_str, #(#bindings = self.#indices),*)
            }
        }
    };

    Ok(body)
}

/// Finds the `#[error("...")]` attribute and extracts its message.
///
/// `target_desc` names the variant or type in the diagnostics so a missing
/// or malformed attribute points at the right place.
fn error_message<T: quote::ToTokens>(
    attrs: &[syn::Attribute],
    target: &T,
    target_desc: &str,
) -> syn::Result<String> {
    let attr = match attrs.iter().find(|attr| attr.path().is_ident("error")) {
        Some(attr) => attr,
        None => {
            return Err(syn::Error::new_spanned(
                target,
                format!(
                    "missing #[error(\"...\")] attribute on {}; every error variant must declare a display message",
                    target_desc
                ),
            ));
        }
    };

    let Meta::List(meta_list) = &attr.meta else {
        return Err(syn::Error::new_spanned(
            &attr.meta,
            "invalid #[error] attribute; use #[error(\"message\")] to describe the error",
        ));
    };

    match syn::parse2::<Lit>(meta_list.tokens.clone()) {
        Ok(Lit::Str(lit_str)) => Ok(lit_str.value()),
        Ok(_) => Err(syn::Error::new_spanned(
            &attr.meta,
            "invalid #[error] attribute: message must be a string literal, e.g. #[error(\"invalid opcode: {0}\")]",
        )),
        Err(_) => Err(syn::Error::new_spanned(
            &attr.meta,
            "failed to parse #[error] attribute; expected a string literal like #[error(\"invalid opcode: {0}\")]",
        )),
    }
}

/// Rewrites positional format args `{0}`, `{1}` to the named bindings
/// `{f0}`, `{f1}` the generated `write!` supplies.
///
/// Iterates highest index first so `{1}` is not clobbered while replacing
/// `{0}` in messages with ten or more fields.
fn rename_positional_args(format_str: &str, field_count: usize) -> String {
    let mut result = format_str.to_string();
    for i in (0..field_count).rev() {
        result = result.replace(&format!("{{{}}}", i), &format!("{{f{}}}", i));
    }
    result
}
