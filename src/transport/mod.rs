//! Transport layer for hosted backends.
//!
//! The Supabase client is shared by the record store (PostgREST) and the blob
//! store (Storage API).

mod supabase;

pub use supabase::{SupabaseClient, SupabaseSettings, DEFAULT_EVIDENCE_BUCKET};
