use proc_macro::TokenStream;
use proc_macro2::Span;
use quote::quote;
use syn::{Data, DeriveInput, Fields, Ident, LitStr};

/// One named field of the deriving struct, with its `#[record(...)]` options.
struct FieldSpec {
    ident: Ident,
    key: String,
    is_id: bool,
    has_default: bool,
}

pub fn derive_record(input: TokenStream) -> TokenStream {
    let input = syn::parse_macro_input!(input as DeriveInput);
    match expand(&input) {
        Ok(tokens) => TokenStream::from(tokens),
        Err(err) => TokenStream::from(err.to_compile_error()),
    }
}

fn expand(input: &DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let name = &input.ident;
    let collection = extract_collection(input)?;
    let fields = extract_fields(input)?;

    let id_field = fields
        .iter()
        .find(|f| f.is_id)
        .or_else(|| fields.iter().find(|f| f.ident == "id"))
        .map(|f| f.ident.clone())
        .ok_or_else(|| {
            syn::Error::new(
                Span::call_site(),
                "Record derive: no field marked with #[record(id)] and no field named `id`",
            )
        })?;

    let idents: Vec<&Ident> = fields.iter().map(|f| &f.ident).collect();
    let decoders = fields.iter().map(|f| {
        let ident = &f.ident;
        let key = &f.key;
        let optional = f.has_default;
        quote! {
            let #ident = data_access::record::decode_field(payload, #key, #optional, &mut problems);
        }
    });

    let accessors = fields.iter().map(|f| {
        let ident = &f.ident;
        let rust_name = ident.to_string();
        let key = &f.key;
        let pattern = if rust_name == *key {
            quote! { #rust_name }
        } else {
            quote! { #rust_name | #key }
        };
        quote! {
            #pattern => Some(data_access::record::RecordField::to_field_value(&self.#ident)),
        }
    });

    let expanded = quote! {
        impl data_access::Record for #name {
            const COLLECTION: &'static str = #collection;

            fn id(&self) -> &str {
                &self.#id_field
            }

            fn set_id(&mut self, id: String) {
                self.#id_field = id;
            }

            fn field(&self, name: &str) -> Option<data_access::FieldValue> {
                match name {
                    #(#accessors)*
                    _ => None,
                }
            }

            fn decode(
                payload: &data_access::record::Payload,
            ) -> Result<Self, data_access::DecodeError> {
                let mut problems = Vec::new();
                #(#decoders)*
                match (#(#idents,)*) {
                    (#(Some(#idents),)*) => Ok(Self { #(#idents,)* }),
                    _ => Err(data_access::DecodeError::Fields {
                        collection: #collection,
                        problems,
                    }),
                }
            }
        }
    };

    Ok(expanded)
}

fn extract_collection(input: &DeriveInput) -> syn::Result<String> {
    for attr in &input.attrs {
        if !attr.path().is_ident("record") {
            continue;
        }

        let mut collection = None;
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("collection") {
                let value: LitStr = meta.value()?.parse()?;
                collection = Some(value.value());
                Ok(())
            } else {
                Err(meta.error("unsupported record attribute"))
            }
        })?;

        if let Some(c) = collection {
            return Ok(c);
        }
    }

    // Default: snake_case struct name + "s"
    let name = input.ident.to_string();
    Ok(format!("{}s", to_snake_case(&name)))
}

fn extract_fields(input: &DeriveInput) -> syn::Result<Vec<FieldSpec>> {
    let Data::Struct(data_struct) = &input.data else {
        return Err(syn::Error::new(
            Span::call_site(),
            "Record derive only supports structs",
        ));
    };
    let Fields::Named(named) = &data_struct.fields else {
        return Err(syn::Error::new(
            Span::call_site(),
            "Record derive requires named fields",
        ));
    };

    let mut specs = Vec::with_capacity(named.named.len());
    for field in &named.named {
        let Some(ident) = field.ident.clone() else {
            continue;
        };
        let mut spec = FieldSpec {
            key: ident.to_string(),
            ident,
            is_id: false,
            has_default: false,
        };

        for attr in &field.attrs {
            if !attr.path().is_ident("record") {
                continue;
            }
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("id") {
                    spec.is_id = true;
                } else if meta.path.is_ident("default") {
                    spec.has_default = true;
                } else if meta.path.is_ident("rename") {
                    let value: LitStr = meta.value()?.parse()?;
                    spec.key = value.value();
                } else {
                    return Err(meta.error("unsupported record field attribute"));
                }
                Ok(())
            })?;
        }

        specs.push(spec);
    }

    Ok(specs)
}

fn to_snake_case(s: &str) -> String {
    let mut result = String::new();
    for (i, ch) in s.chars().enumerate() {
        if ch.is_uppercase() {
            if i > 0 {
                result.push('_');
            }
            result.extend(ch.to_lowercase());
        } else {
            result.push(ch);
        }
    }
    result
}
