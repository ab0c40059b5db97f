//! Derive macro for domain-injector
//!
//! `#[derive(Inject)]` generates `Inject::declare` from field attributes,
//! replacing the hand-written injection point list.
//!
//! # Example
//!
//! ```rust,ignore
//! use domain_injector::{Dep, Inject, Slot};
//! use std::sync::Arc;
//!
//! trait Weapon: Send + Sync {}
//! struct Armor;
//! struct Banner;
//!
//! #[derive(Default, Inject)]
//! struct Knight {
//!     #[inject]
//!     armor: Dep<Armor>,
//!     #[inject(optional)]
//!     banner: Dep<Banner>,
//!     #[inject(all)]
//!     weapons: Slot<Vec<Arc<dyn Weapon>>>,
//!     // Fields without #[inject] are left alone
//!     wins: u32,
//! }
//!
//! // Generated:
//! // impl Inject for Knight {
//! //     fn declare(points: &mut InjectionPoints<Self>) {
//! //         points.required("armor", |target| &target.armor);
//! //         points.optional("banner", |target| &target.banner);
//! //         points.all("weapons", |target| &target.weapons);
//! //     }
//! // }
//! ```

use proc_macro::TokenStream;
use quote::quote;
use syn::{Attribute, Data, DeriveInput, Fields, Type, parse_macro_input};

/// Derive macro for `domain_injector::Inject`.
///
/// # Attributes
///
/// - `#[inject]` - Required single slot. The field type must be `Dep<T>` or
///   `Slot<Arc<T>>`.
/// - `#[inject(optional)]` - Optional single slot, same field types.
/// - `#[inject(all)]` - Inject-all slot. The field type must be
///   `Slot<C>` where `C` is a supported collection shape.
///
/// Method injection is not derived; declare it by implementing `Inject`
/// by hand.
#[proc_macro_derive(Inject, attributes(inject))]
pub fn derive_inject(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    let name = &input.ident;
    let generics = &input.generics;
    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();

    // Only support structs with named fields
    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            _ => {
                return syn::Error::new_spanned(
                    &input,
                    "Inject can only be derived for structs with named fields",
                )
                .to_compile_error()
                .into();
            }
        },
        _ => {
            return syn::Error::new_spanned(&input, "Inject can only be derived for structs")
                .to_compile_error()
                .into();
        }
    };

    let mut points = Vec::new();

    for field in fields.iter() {
        let Some(field_name) = field.ident.as_ref() else {
            continue;
        };
        let field_type = &field.ty;
        let slot_name = field_name.to_string();

        let kind = match find_inject_attr(&field.attrs) {
            Ok(Some(kind)) => kind,
            Ok(None) => continue,
            Err(err) => return err.to_compile_error().into(),
        };

        let method = match kind {
            InjectAttr::Required | InjectAttr::Optional => {
                if !is_single_slot(field_type) {
                    return syn::Error::new_spanned(
                        field_type,
                        "Fields marked with #[inject] must have type Dep<T> or Slot<Arc<T>>",
                    )
                    .to_compile_error()
                    .into();
                }
                if matches!(kind, InjectAttr::Required) {
                    quote! { required }
                } else {
                    quote! { optional }
                }
            }
            InjectAttr::All => {
                if last_segment_is(field_type, "Slot").is_none() {
                    return syn::Error::new_spanned(
                        field_type,
                        "Fields marked with #[inject(all)] must have type Slot<C>",
                    )
                    .to_compile_error()
                    .into();
                }
                quote! { all }
            }
        };

        points.push(quote! {
            points.#method(#slot_name, |target| &target.#field_name);
        });
    }

    let expanded = quote! {
        impl #impl_generics ::domain_injector::Inject for #name #ty_generics #where_clause {
            fn declare(points: &mut ::domain_injector::InjectionPoints<Self>) {
                let _ = &points;
                #(#points)*
            }
        }
    };

    TokenStream::from(expanded)
}

/// Kinds of `#[inject]` attribute
enum InjectAttr {
    Required,
    Optional,
    All,
}

/// Find and parse the #[inject] attribute
fn find_inject_attr(attrs: &[Attribute]) -> syn::Result<Option<InjectAttr>> {
    for attr in attrs {
        if !attr.path().is_ident("inject") {
            continue;
        }

        if attr.meta.require_path_only().is_ok() {
            return Ok(Some(InjectAttr::Required));
        }

        let nested = attr.parse_args::<syn::Ident>()?;
        return match nested.to_string().as_str() {
            "optional" => Ok(Some(InjectAttr::Optional)),
            "all" => Ok(Some(InjectAttr::All)),
            _ => Err(syn::Error::new_spanned(
                nested,
                "expected #[inject], #[inject(optional)] or #[inject(all)]",
            )),
        };
    }
    Ok(None)
}

/// The generic arguments of `ty` if its last path segment is `ident`
fn last_segment_is<'a>(ty: &'a Type, ident: &str) -> Option<&'a syn::PathArguments> {
    if let Type::Path(type_path) = ty {
        let segment = type_path.path.segments.last()?;
        if segment.ident == ident {
            return Some(&segment.arguments);
        }
    }
    None
}

/// `Dep<T>` or `Slot<Arc<T>>`
fn is_single_slot(ty: &Type) -> bool {
    if last_segment_is(ty, "Dep").is_some() {
        return true;
    }

    match last_segment_is(ty, "Slot") {
        Some(syn::PathArguments::AngleBracketed(args)) => matches!(
            args.args.first(),
            Some(syn::GenericArgument::Type(inner)) if last_segment_is(inner, "Arc").is_some()
        ),
        _ => false,
    }
}
