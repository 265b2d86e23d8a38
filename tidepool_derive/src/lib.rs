use proc_macro::TokenStream;
use quote::quote;
use syn::{Data, DeriveInput, Fields, Index, Member, Path, parse_macro_input, spanned::Spanned};

#[derive(Default)]
struct Hooks {
    reset: Option<Path>,
    destroy: Option<Path>,
}

fn container_hooks(input: &DeriveInput) -> syn::Result<Hooks> {
    let mut hooks = Hooks::default();
    for attr in input.attrs.iter().filter(|a| a.path().is_ident("pool")) {
        attr.parse_nested_meta(|meta| {
            let slot = if meta.path.is_ident("reset") {
                &mut hooks.reset
            } else if meta.path.is_ident("destroy") {
                &mut hooks.destroy
            } else {
                return Err(meta.error("expected `reset` or `destroy`"));
            };
            if slot.is_some() {
                return Err(meta.error("hook specified more than once"));
            }
            *slot = Some(meta.value()?.parse()?);
            Ok(())
        })?;
    }
    Ok(hooks)
}

fn thread_tag_field(input: &DeriveInput) -> syn::Result<Option<Member>> {
    let fields = match &input.data {
        Data::Struct(s) => &s.fields,
        Data::Enum(_) | Data::Union(_) => return Ok(None),
    };
    let mut found = None;
    let iter: Box<dyn Iterator<Item = _>> = match fields {
        Fields::Named(f) => Box::new(f.named.iter()),
        Fields::Unnamed(f) => Box::new(f.unnamed.iter()),
        Fields::Unit => Box::new(std::iter::empty()),
    };
    for (i, field) in iter.enumerate() {
        for attr in field.attrs.iter().filter(|a| a.path().is_ident("pool")) {
            attr.parse_nested_meta(|meta| {
                if !meta.path.is_ident("thread_tag") {
                    return Err(meta.error("expected `thread_tag`"));
                }
                if found.is_some() {
                    return Err(meta.error("only one field can hold the thread tag"));
                }
                found = Some(match &field.ident {
                    Some(id) => Member::Named(id.clone()),
                    None => Member::Unnamed(Index { index: i as u32, span: field.span() }),
                });
                Ok(())
            })?;
        }
    }
    Ok(found)
}

fn expand(input: DeriveInput) -> syn::Result<TokenStream> {
    let hooks = container_hooks(&input)?;
    let tag = thread_tag_field(&input)?;
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();
    let reset = hooks.reset.map(|path| {
        quote! {
            fn reset(&mut self) -> ::tidepool::Hook {
                ::tidepool::Hook::ran(#path(self))
            }
        }
    });
    let destroy = hooks.destroy.map(|path| {
        quote! {
            fn destroy(&mut self) -> ::tidepool::Hook {
                ::tidepool::Hook::ran(#path(self))
            }
        }
    });
    let tag = tag.map(|member| {
        quote! {
            fn thread_tag(&self) -> ::core::option::Option<::tidepool::ThreadTag> {
                ::core::option::Option::Some(self.#member)
            }

            fn set_thread_tag(&mut self, tag: ::tidepool::ThreadTag) {
                self.#member = tag
            }
        }
    });
    Ok(quote! {
        impl #impl_generics ::tidepool::Poolable for #name #ty_generics #where_clause {
            fn empty() -> Self {
                <Self as ::core::default::Default>::default()
            }

            #reset
            #destroy
            #tag
        }
    }
    .into())
}

/// Derive `Poolable` for a type that implements `Default`.
///
/// `empty` is `Default::default`. Hooks are given as paths to functions
/// taking `&mut Self` and returning `()` or a `Result<(), E: Display>`:
///
/// ```ignore
/// #[derive(Default, Poolable)]
/// #[pool(reset = clear_conn, destroy = close_conn)]
/// struct Conn {
///     buf: Vec<u8>,
///     #[pool(thread_tag)]
///     owner: tidepool::ThreadTag,
/// }
/// ```
///
/// A field marked `#[pool(thread_tag)]` must be a `tidepool::ThreadTag`. The
/// pool stamps it when the object is created and uses it to route cross
/// thread returns to the shared store.
#[proc_macro_derive(Poolable, attributes(pool))]
pub fn derive_poolable(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand(input) {
        Ok(tokens) => tokens,
        Err(e) => e.to_compile_error().into(),
    }
}
