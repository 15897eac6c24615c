/// Data ingestion from the HLNUG WISKI-Web feed.
///
/// `hlnug` owns the HTTP fetch and the index lookup; `fixtures` holds
/// representative payloads for the parser tests.

pub mod hlnug;

#[cfg(test)]
pub(crate) mod fixtures;
