mod record;

use proc_macro::TokenStream;

// ============================================================================
// #[derive(Record)] derive macro
// ============================================================================

/// Derive macro for the `Record` trait.
///
/// # Usage
///
/// ```ignore
/// #[derive(Clone, Default, Serialize, Deserialize, Record)]
/// #[record(collection = "rooms")]
/// struct Room {
///     #[record(id)]
///     pub id: String,
///     pub name: String,
///     #[record(rename = "isLive")]
///     pub live: bool,
///     #[record(default)]
///     pub capacity: i64,
/// }
/// ```
///
/// - `#[record(collection = "...")]` sets the collection name (the record's type tag).
///   If omitted, defaults to snake_case struct name + "s".
/// - `#[record(id)]` marks the `String` field used as the unique identifier.
///   If omitted, defaults to a field named `id`.
/// - `#[record(rename = "...")]` reads the field from a different payload key.
///   Predicates may use either name.
/// - `#[record(default)]` makes the payload key optional; a missing key decodes
///   to `Default::default()`.
///
/// The generated `decode` reads every field explicitly and reports all missing
/// or mistyped fields at once.
#[proc_macro_derive(Record, attributes(record))]
pub fn derive_record(input: TokenStream) -> TokenStream {
    record::derive_record(input)
}
