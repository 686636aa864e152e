//! Derive macros for domainbus.
//!
//! This crate provides `#[derive(EventKind)]`, which turns an enum of typed
//! payloads into a tagged event kind: every variant is bound to one
//! dot-namespaced event name, and the generated code encodes and decodes the
//! variant's payload exactly once at the bus boundary.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use std::collections::HashSet;
use syn::{parse_macro_input, Attribute, Data, DeriveInput, Fields, LitStr};

/// Derives `domainbus::EventKind` for an enum.
///
/// Each variant either wraps exactly one payload type or carries no data.
/// Names are taken from `#[event(name = "...")]` on the variant, or built as
/// `<namespace>.<variant_in_snake_case>` when the enum has
/// `#[event(namespace = "...")]`.
///
/// # Examples
///
/// ```rust,ignore
/// use domainbus::EventKind;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Serialize, Deserialize)]
/// struct ExampleCreated { title: String }
///
/// #[derive(Debug, EventKind)]
/// #[event(namespace = "example")]
/// enum ExampleEvent {
///     Created(ExampleCreated),         // "example.created"
///     #[event(name = "example.purged")]
///     Deleted,                         // "example.purged"
/// }
/// ```
#[proc_macro_derive(EventKind, attributes(event))]
pub fn derive_event_kind(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    match expand_event_kind(&input) {
        Ok(tokens) => tokens.into(),
        Err(error) => error.to_compile_error().into(),
    }
}

/// A variant bound to its event name.
struct KindVariant {
    ident: syn::Ident,
    name: LitStr,
    has_payload: bool,
}

fn expand_event_kind(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let data = match &input.data {
        Data::Enum(data) => data,
        Data::Struct(_) | Data::Union(_) => {
            return Err(syn::Error::new_spanned(
                &input.ident,
                "EventKind can only be derived for enums",
            ))
        }
    };

    let namespace = parse_event_attr(&input.attrs, "namespace")?;
    let mut variants = Vec::with_capacity(data.variants.len());
    let mut seen = HashSet::new();

    for variant in &data.variants {
        let has_payload = match &variant.fields {
            Fields::Unit => false,
            Fields::Unnamed(fields) if fields.unnamed.len() == 1 => true,
            _ => {
                return Err(syn::Error::new_spanned(
                    variant,
                    "EventKind variants must be unit variants or wrap exactly one payload type",
                ))
            }
        };

        let name = match (parse_event_attr(&variant.attrs, "name")?, &namespace) {
            (Some(name), _) => name,
            (None, Some(namespace)) => LitStr::new(
                &format!("{}.{}", namespace.value(), snake_case(&variant.ident.to_string())),
                variant.ident.span(),
            ),
            (None, None) => {
                return Err(syn::Error::new_spanned(
                    variant,
                    "missing #[event(name = \"...\")] and no #[event(namespace = \"...\")] on the enum",
                ))
            }
        };

        check_event_name(&name)?;
        if !seen.insert(name.value()) {
            return Err(syn::Error::new_spanned(
                &name,
                format!("event name `{}` is used by more than one variant", name.value()),
            ));
        }

        variants.push(KindVariant {
            ident: variant.ident.clone(),
            name,
            has_payload,
        });
    }

    if variants.is_empty() {
        return Err(syn::Error::new_spanned(
            &input.ident,
            "EventKind needs at least one variant",
        ));
    }

    let enum_name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let names = variants.iter().map(|v| &v.name);

    let name_arms = variants.iter().map(|v| {
        let ident = &v.ident;
        let name = &v.name;
        if v.has_payload {
            quote! { Self::#ident(..) => #name, }
        } else {
            quote! { Self::#ident => #name, }
        }
    });

    let encode_arms = variants.iter().map(|v| {
        let ident = &v.ident;
        let name = &v.name;
        if v.has_payload {
            quote! {
                Self::#ident(payload) => ::domainbus::__private::serde_json::to_value(payload)
                    .map_err(|source| ::domainbus::PayloadError::Encode {
                        event_name: ::std::string::String::from(#name),
                        source,
                    }),
            }
        } else {
            quote! {
                Self::#ident => ::std::result::Result::Ok(::domainbus::__private::serde_json::Value::Null),
            }
        }
    });

    let decode_arms = variants.iter().map(|v| {
        let ident = &v.ident;
        let name = &v.name;
        if v.has_payload {
            quote! { #name => ::std::result::Result::Ok(Self::#ident(event.decode_payload()?)), }
        } else {
            quote! { #name => ::std::result::Result::Ok(Self::#ident), }
        }
    });

    Ok(quote! {
        impl #impl_generics ::domainbus::EventKind for #enum_name #ty_generics #where_clause {
            const NAMES: &'static [&'static str] = &[#(#names),*];

            fn event_name(&self) -> &'static str {
                match self {
                    #(#name_arms)*
                }
            }

            fn encode_payload(
                &self,
            ) -> ::std::result::Result<::domainbus::__private::serde_json::Value, ::domainbus::PayloadError> {
                match self {
                    #(#encode_arms)*
                }
            }

            fn decode(
                event: &::domainbus::Event,
            ) -> ::std::result::Result<Self, ::domainbus::PayloadError> {
                match event.event_name() {
                    #(#decode_arms)*
                    other => ::std::result::Result::Err(::domainbus::PayloadError::UnknownKind {
                        event_name: ::std::string::String::from(other),
                    }),
                }
            }
        }
    })
}

/// Reads `#[event(<key> = "...")]` from a list of attributes.
fn parse_event_attr(attrs: &[Attribute], key: &str) -> syn::Result<Option<LitStr>> {
    let mut found = None;
    for attr in attrs.iter().filter(|attr| attr.path().is_ident("event")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident(key) {
                found = Some(meta.value()?.parse::<LitStr>()?);
                Ok(())
            } else if meta.path.is_ident("name") || meta.path.is_ident("namespace") {
                Err(meta.error("`name` belongs on variants and `namespace` on the enum"))
            } else {
                Err(meta.error("unsupported event attribute, expected `name` or `namespace`"))
            }
        })?;
    }
    Ok(found)
}

/// Rejects names a bus would refuse at publish time.
fn check_event_name(name: &LitStr) -> syn::Result<()> {
    let value = name.value();
    if value.is_empty()
        || value.chars().any(char::is_whitespace)
        || value.split('.').any(str::is_empty)
    {
        return Err(syn::Error::new(
            name.span(),
            format!("`{value}` is not a valid dot-namespaced event name"),
        ));
    }
    Ok(())
}

fn snake_case(ident: &str) -> String {
    let mut out = String::with_capacity(ident.len() + 4);
    for (i, ch) in ident.chars().enumerate() {
        if ch.is_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expand(tokens: TokenStream2) -> syn::Result<TokenStream2> {
        let parsed: DeriveInput = syn::parse2(tokens).expect("test input should parse");
        expand_event_kind(&parsed)
    }

    #[test]
    fn test_explicit_names_expand() {
        let output = expand(quote! {
            enum ExampleEvent {
                #[event(name = "example.created")]
                Created(ExampleCreated),
                #[event(name = "example.deleted")]
                Deleted,
            }
        })
        .expect("expansion should succeed");

        let text = output.to_string();
        assert!(text.contains("\"example.created\""));
        assert!(text.contains("\"example.deleted\""));
        assert!(text.contains("UnknownKind"));
    }

    #[test]
    fn test_namespace_builds_snake_case_names() {
        let output = expand(quote! {
            #[event(namespace = "billing")]
            enum BillingEvent {
                InvoicePaid(InvoicePaid),
                #[event(name = "billing.voided")]
                InvoiceVoided,
            }
        })
        .expect("expansion should succeed");

        let text = output.to_string();
        assert!(text.contains("\"billing.invoice_paid\""));
        assert!(text.contains("\"billing.voided\""));
    }

    #[test]
    fn test_struct_rejected() {
        let error = expand(quote! {
            struct NotAnEnum { value: i32 }
        })
        .unwrap_err();
        assert!(error.to_string().contains("only be derived for enums"));
    }

    #[test]
    fn test_missing_name_rejected() {
        let error = expand(quote! {
            enum ExampleEvent {
                Created(ExampleCreated),
            }
        })
        .unwrap_err();
        assert!(error.to_string().contains("missing #[event(name"));
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let error = expand(quote! {
            enum ExampleEvent {
                #[event(name = "example.created")]
                Created(ExampleCreated),
                #[event(name = "example.created")]
                Recreated(ExampleCreated),
            }
        })
        .unwrap_err();
        assert!(error.to_string().contains("more than one variant"));
    }

    #[test]
    fn test_invalid_name_rejected() {
        let error = expand(quote! {
            enum ExampleEvent {
                #[event(name = "example..created")]
                Created(ExampleCreated),
            }
        })
        .unwrap_err();
        assert!(error.to_string().contains("not a valid dot-namespaced event name"));
    }

    #[test]
    fn test_multi_field_variant_rejected() {
        let error = expand(quote! {
            enum ExampleEvent {
                #[event(name = "example.moved")]
                Moved(String, String),
            }
        })
        .unwrap_err();
        assert!(error.to_string().contains("exactly one payload type"));
    }

    #[test]
    fn test_snake_case() {
        assert_eq!(snake_case("Created"), "created");
        assert_eq!(snake_case("InvoicePaid"), "invoice_paid");
    }
}
