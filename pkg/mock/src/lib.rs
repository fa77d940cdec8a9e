//! Procedural macros for generating mock implementations.
//!
//! # collaborator
//!
//! Generates a scripted mock for an async collaborator trait.
//!
//! Use `#[cfg_attr(test, mock::collaborator)]` before `#[async_trait]` so the
//! mock only exists during test compilation:
//!
//! ```ignore
//! use async_trait::async_trait;
//!
//! #[cfg_attr(test, mock::collaborator)]
//! #[async_trait]
//! pub trait ProviderClient: Send + Sync + 'static {
//!     async fn discover(&self, issuer: &str) -> Result<ProviderMetadata, TransportError>;
//! }
//!
//! // Generates:
//! // pub struct MockProviderClient {
//! //     pub discover: Mutex<VecDeque<Result<ProviderMetadata, TransportError>>>,
//! //     pub discover_call_count: AtomicUsize,
//! // }
//! // impl Default for MockProviderClient { ... }
//! // impl MockProviderClient { fn with_discover(self, ..) -> Self; fn discover_calls(&self) -> usize }
//! // #[async_trait] impl ProviderClient for MockProviderClient { ... }
//! ```
//!
//! Every call pops the next scripted value. A call without a scripted value
//! panics with the method name, so unexpected collaborator traffic fails the
//! test loudly.
//!
//! ## Checking Call Counts in Tests
//!
//! ```ignore
//! assert_eq!(mock.exchange_code_calls(), 1);
//! ```

use proc_macro::TokenStream;
use quote::ToTokens;
use quote::{format_ident, quote};
use syn::{FnArg, ItemTrait, ReturnType, TraitItem, parse_macro_input};

/// Generates a scripted mock implementation for an async trait.
#[proc_macro_attribute]
pub fn collaborator(_attr: TokenStream, item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as ItemTrait);
    let trait_name = &input.ident;
    let mock_name = format_ident!("Mock{}", trait_name);
    let vis = &input.vis;

    let mut field_definitions = Vec::new();
    let mut default_fields = Vec::new();
    let mut impl_methods = Vec::new();
    let mut helper_methods = Vec::new();

    for item in &input.items {
        let TraitItem::Fn(method) = item else {
            continue;
        };
        let method_name = &method.sig.ident;
        let call_count_field = format_ident!("{}_call_count", method_name);
        let call_count_method = format_ident!("{}_calls", method_name);
        let script_method = format_ident!("with_{}", method_name);
        let unexpected_call = format!("unexpected call to `{method_name}`");

        let return_type = match &method.sig.output {
            ReturnType::Default => quote! { () },
            ReturnType::Type(_, ty) => quote! { #ty },
        };

        field_definitions.push(quote! {
            pub #method_name: ::std::sync::Mutex<::std::collections::VecDeque<#return_type>>
        });
        field_definitions.push(quote! {
            pub #call_count_field: ::std::sync::atomic::AtomicUsize
        });

        default_fields.push(quote! {
            #method_name: ::std::sync::Mutex::new(::std::collections::VecDeque::new())
        });
        default_fields.push(quote! {
            #call_count_field: ::std::sync::atomic::AtomicUsize::new(0)
        });

        helper_methods.push(quote! {
            /// Queues the value returned by the next call.
            pub fn #script_method(self, value: #return_type) -> Self {
                self.#method_name.lock().unwrap().push_back(value);
                self
            }

            pub fn #call_count_method(&self) -> usize {
                self.#call_count_field.load(::std::sync::atomic::Ordering::SeqCst)
            }
        });

        let params: Vec<_> = method
            .sig
            .inputs
            .iter()
            .filter_map(|arg| {
                let FnArg::Typed(pat_type) = arg else {
                    return None;
                };
                let ty = &pat_type.ty;
                let pat_str = pat_type.pat.to_token_stream().to_string();
                let prefixed_name = format_ident!("_{}", pat_str);
                Some(quote! { #prefixed_name: #ty })
            })
            .collect();

        let asyncness = &method.sig.asyncness;
        impl_methods.push(quote! {
            #asyncness fn #method_name(&self, #(#params),*) -> #return_type {
                self.#call_count_field.fetch_add(1, ::std::sync::atomic::Ordering::SeqCst);
                self.#method_name
                    .lock()
                    .unwrap()
                    .pop_front()
                    .expect(#unexpected_call)
            }
        });
    }

    let expanded = quote! {
        #input

        #vis struct #mock_name {
            #(#field_definitions),*
        }

        impl ::std::default::Default for #mock_name {
            fn default() -> Self {
                Self {
                    #(#default_fields),*
                }
            }
        }

        impl #mock_name {
            #(#helper_methods)*
        }

        #[::async_trait::async_trait]
        impl #trait_name for #mock_name {
            #(#impl_methods)*
        }
    };

    TokenStream::from(expanded)
}
