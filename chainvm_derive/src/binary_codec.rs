//! Derive macro for automatic consensus serialization.
//!
//! Generates `Encode` and `Decode` implementations for structs and enums
//! against the canonical wire format defined in `chainvm::types::encoding`.
//!
//! # Supported Types
//!
//! - **Named structs**: `struct Foo { a: u32, b: U256 }`
//! - **Tuple structs**: `struct Hash([u8; 32])`
//! - **Unit structs**: `struct Marker`
//! - **Enums**: `enum Val { Bool(bool), U256(U256) }`
//!
//! Unions are not supported.
//!
//! # Wire Format
//!
//! Fields are serialized in declaration order using each field type's own
//! `Encode`/`Decode` impl. Enums prefix a single `u8` discriminant, honoring
//! explicit discriminant values (e.g., `Variant = 5`). The format admits a
//! single representation per value, making it suitable for consensus hashing.

use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, Data, DataEnum, DeriveInput, Fields};

/// Derives `Encode` and `Decode` for a type.
///
/// # Example
///
/// ```ignore
/// use chainvm_derive::BinaryCodec;
///
/// #[derive(BinaryCodec)]
/// pub struct AssetOutput {
///     pub amount: U256,
///     pub lockup: LockupScript,
/// }
/// ```
pub fn derive_binary_codec(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    let name = &input.ident;
    let generics = &input.generics;
    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();

    let expanded = match &input.data {
        Data::Struct(data_struct) => match &data_struct.fields {
            Fields::Named(fields) => {
                named_struct_impl(name, &impl_generics, &ty_generics, where_clause, fields)
            }
            Fields::Unnamed(fields) => {
                tuple_struct_impl(name, &impl_generics, &ty_generics, where_clause, fields)
            }
            Fields::Unit => unit_struct_impl(name, &impl_generics, &ty_generics, where_clause),
        },
        Data::Enum(data_enum) => {
            enum_impl(name, &impl_generics, &ty_generics, where_clause, data_enum)
        }
        Data::Union(_) => {
            syn::Error::new_spanned(&input, "BinaryCodec derive does not support unions")
                .to_compile_error()
        }
    };

    TokenStream::from(expanded)
}

/// `Encode`/`Decode` for named-field structs: fields in declaration order.
fn named_struct_impl(
    name: &syn::Ident,
    impl_generics: &syn::ImplGenerics,
    ty_generics: &syn::TypeGenerics,
    where_clause: Option<&syn::WhereClause>,
    fields: &syn::FieldsNamed,
) -> proc_macro2::TokenStream {
    let field_names: Vec<_> = fields.named.iter().map(|f| &f.ident).collect();

    let encode_fields = field_names.iter().map(|name| {
        quote! {
            crate::types::encoding::Encode::encode(&self.#name, out);
        }
    });

    let decode_fields = field_names.iter().map(|name| {
        quote! {
            #name: crate::types::encoding::Decode::decode(input)?,
        }
    });

    quote! {
        impl #impl_generics crate::types::encoding::Encode for #name #ty_generics #where_clause {
            fn encode<S: crate::types::encoding::EncodeSink>(&self, out: &mut S) {
                #(#encode_fields)*
            }
        }

        impl #impl_generics crate::types::encoding::Decode for #name #ty_generics #where_clause {
            fn decode(input: &mut &[u8]) -> ::std::result::Result<Self, crate::types::encoding::DecodeError> {
                Ok(Self {
                    #(#decode_fields)*
                })
            }
        }
    }
}

/// `Encode`/`Decode` for tuple structs, common for newtype wrappers like
/// `struct Hash(pub [u8; 32])`.
fn tuple_struct_impl(
    name: &syn::Ident,
    impl_generics: &syn::ImplGenerics,
    ty_generics: &syn::TypeGenerics,
    where_clause: Option<&syn::WhereClause>,
    fields: &syn::FieldsUnnamed,
) -> proc_macro2::TokenStream {
    let field_indices: Vec<_> = (0..fields.unnamed.len()).map(syn::Index::from).collect();

    let encode_fields = field_indices.iter().map(|idx| {
        quote! {
            crate::types::encoding::Encode::encode(&self.#idx, out);
        }
    });

    let decode_fields = field_indices.iter().map(|_| {
        quote! {
            crate::types::encoding::Decode::decode(input)?,
        }
    });

    quote! {
        impl #impl_generics crate::types::encoding::Encode for #name #ty_generics #where_clause {
            fn encode<S: crate::types::encoding::EncodeSink>(&self, out: &mut S) {
                #(#encode_fields)*
            }
        }

        impl #impl_generics crate::types::encoding::Decode for #name #ty_generics #where_clause {
            fn decode(input: &mut &[u8]) -> ::std::result::Result<Self, crate::types::encoding::DecodeError> {
                Ok(Self(
                    #(#decode_fields)*
                ))
            }
        }
    }
}

/// `Encode`/`Decode` for unit structs: encoding writes nothing.
fn unit_struct_impl(
    name: &syn::Ident,
    impl_generics: &syn::ImplGenerics,
    ty_generics: &syn::TypeGenerics,
    where_clause: Option<&syn::WhereClause>,
) -> proc_macro2::TokenStream {
    quote! {
        impl #impl_generics crate::types::encoding::Encode for #name #ty_generics #where_clause {
            fn encode<S: crate::types::encoding::EncodeSink>(&self, _out: &mut S) {}
        }

        impl #impl_generics crate::types::encoding::Decode for #name #ty_generics #where_clause {
            fn decode(_input: &mut &[u8]) -> ::std::result::Result<Self, crate::types::encoding::DecodeError> {
                Ok(Self)
            }
        }
    }
}

/// `Encode`/`Decode` for enums: u8 discriminant followed by variant fields.
///
/// Unknown discriminants decode to `DecodeError::InvalidValue`, so a type
/// never deserializes into a variant outside its declared set.
fn enum_impl(
    name: &syn::Ident,
    impl_generics: &syn::ImplGenerics,
    ty_generics: &syn::TypeGenerics,
    where_clause: Option<&syn::WhereClause>,
    data_enum: &DataEnum,
) -> proc_macro2::TokenStream {
    let discriminants: Vec<u8> = compute_discriminants(data_enum);

    let encode_arms = data_enum.variants.iter().zip(discriminants.iter()).map(|(variant, &idx)| {
        let variant_name = &variant.ident;

        match &variant.fields {
            Fields::Unit => {
                quote! {
                    Self::#variant_name => {
                        crate::types::encoding::Encode::encode(&#idx, out);
                    }
                }
            }
            Fields::Unnamed(fields) => {
                let field_names: Vec<_> = (0..fields.unnamed.len())
                    .map(|i| quote::format_ident!("f{}", i))
                    .collect();
                let encode_fields = field_names.iter().map(|f| {
                    quote! { crate::types::encoding::Encode::encode(#f, out); }
                });
                quote! {
                    Self::#variant_name(#(#field_names),*) => {
                        crate::types::encoding::Encode::encode(&#idx, out);
                        #(#encode_fields)*
                    }
                }
            }
            Fields::Named(fields) => {
                let field_names: Vec<_> = fields.named.iter().map(|f| &f.ident).collect();
                let encode_fields = field_names.iter().map(|f| {
                    quote! { crate::types::encoding::Encode::encode(#f, out); }
                });
                quote! {
                    Self::#variant_name { #(#field_names),* } => {
                        crate::types::encoding::Encode::encode(&#idx, out);
                        #(#encode_fields)*
                    }
                }
            }
        }
    });

    let decode_arms = data_enum.variants.iter().zip(discriminants.iter()).map(|(variant, &idx)| {
        let variant_name = &variant.ident;

        match &variant.fields {
            Fields::Unit => {
                quote! {
                    #idx => Ok(Self::#variant_name),
                }
            }
            Fields::Unnamed(fields) => {
                let decode_fields = (0..fields.unnamed.len()).map(|_| {
                    quote! { crate::types::encoding::Decode::decode(input)?, }
                });
                quote! {
                    #idx => Ok(Self::#variant_name(#(#decode_fields)*)),
                }
            }
            Fields::Named(fields) => {
                let decode_fields = fields.named.iter().map(|f| {
                    let field_name = &f.ident;
                    quote! { #field_name: crate::types::encoding::Decode::decode(input)?, }
                });
                quote! {
                    #idx => Ok(Self::#variant_name { #(#decode_fields)* }),
                }
            }
        }
    });

    quote! {
        impl #impl_generics crate::types::encoding::Encode for #name #ty_generics #where_clause {
            fn encode<S: crate::types::encoding::EncodeSink>(&self, out: &mut S) {
                match self {
                    #(#encode_arms)*
                }
            }
        }

        impl #impl_generics crate::types::encoding::Decode for #name #ty_generics #where_clause {
            fn decode(input: &mut &[u8]) -> ::std::result::Result<Self, crate::types::encoding::DecodeError> {
                let variant_idx: u8 = crate::types::encoding::Decode::decode(input)?;
                match variant_idx {
                    #(#decode_arms)*
                    _ => Err(crate::types::encoding::DecodeError::InvalidValue),
                }
            }
        }
    }
}

/// Computes discriminant values for each enum variant.
///
/// Follows Rust's discriminant rules: explicit values are honored, the rest
/// increment from the previous variant, starting at 0.
fn compute_discriminants(data_enum: &DataEnum) -> Vec<u8> {
    let mut discriminants = Vec::with_capacity(data_enum.variants.len());
    let mut next_discriminant: u8 = 0;

    for variant in &data_enum.variants {
        let discriminant = if let Some((_, expr)) = &variant.discriminant {
            parse_discriminant_expr(expr)
        } else {
            next_discriminant
        };

        discriminants.push(discriminant);
        next_discriminant = discriminant.checked_add(1).unwrap_or(0);
    }

    discriminants
}

/// Parses a discriminant expression to extract its u8 value.
///
/// Supports integer literals. Panics on unsupported expressions.
fn parse_discriminant_expr(expr: &syn::Expr) -> u8 {
    match expr {
        syn::Expr::Lit(expr_lit) => match &expr_lit.lit {
            syn::Lit::Int(lit_int) => lit_int
                .base10_parse::<u8>()
                .expect("Discriminant must be a valid u8"),
            _ => panic!("Discriminant must be an integer literal"),
        },
        _ => panic!("Discriminant must be a simple integer literal"),
    }
}
