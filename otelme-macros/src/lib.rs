//! Procedural macros for [`otelme`](https://docs.rs/otelme).
//!
//! Use the attribute through the `otelme` crate, which re-exports it next to
//! the `tell` naming call.

use proc_macro::TokenStream;
use quote::ToTokens;
use syn::{parse_macro_input, parse_quote, ItemFn, LitStr};

/// Wraps a function so every invocation runs inside a span.
///
/// The span is named after the function itself, or after the explicit
/// override given as `#[tell("name")]` or `#[tell(name = "name")]`. The
/// wrapped function keeps its signature, return value, and control flow;
/// `async fn`s are scoped through the future adapter so the span follows the
/// task across suspension points.
///
/// # Examples
///
/// ```
/// #[otelme::tell]
/// fn process(batch: &[u8]) -> usize {
///     otelme::tell("batch_len") | batch.len()
/// }
///
/// #[otelme::tell("persist")]
/// async fn store(batch: Vec<u8>) {
///     // runs inside a span named `persist`
/// }
/// # assert_eq!(process(&[1, 2]), 2);
/// ```
#[proc_macro_attribute]
pub fn tell(attr: TokenStream, item: TokenStream) -> TokenStream {
    let item_fn = parse_macro_input!(item as ItemFn);

    let name = if attr.is_empty() {
        item_fn.sig.ident.to_string()
    } else {
        match parse_name(attr) {
            Ok(name) => name,
            Err(err) => return err.to_compile_error().into(),
        }
    };
    if name.is_empty() {
        return syn::Error::new(item_fn.sig.ident.span(), "span name must be non-empty")
            .to_compile_error()
            .into();
    }

    expand(item_fn, &name)
}

/// Accepts either a bare string literal or `name = "literal"`.
fn parse_name(attr: TokenStream) -> syn::Result<String> {
    if let Ok(lit) = syn::parse::<LitStr>(attr.clone()) {
        return Ok(lit.value());
    }

    let mut name = None;
    let parser = syn::meta::parser(|meta| {
        if meta.path.is_ident("name") {
            name = Some(meta.value()?.parse::<LitStr>()?.value());
            Ok(())
        } else {
            Err(meta.error("unsupported attribute; expected a span name string"))
        }
    });
    syn::parse::Parser::parse(parser, attr)?;

    name.ok_or_else(|| {
        syn::Error::new(
            proc_macro2::Span::call_site(),
            "expected a span name string",
        )
    })
}

fn expand(mut item_fn: ItemFn, name: &str) -> TokenStream {
    let block = &item_fn.block;

    let new_block: syn::Block = if item_fn.sig.asyncness.is_some() {
        parse_quote!({
            ::otelme::FutureTellExt::told(async move #block, ::otelme::tell(#name)).await
        })
    } else {
        parse_quote!({
            let __otelme_scope = ::otelme::tell(#name).enter();
            #block
        })
    };

    item_fn.block = Box::new(new_block);
    item_fn.into_token_stream().into()
}
