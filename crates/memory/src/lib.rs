pub mod retrieval;
pub mod schema;
pub mod store;

pub use retrieval::{RankMode, RankedEntry, cosine_similarity, keyword_score};
pub use schema::{EntryKey, MemoryEntry, content_hash_of};
pub use store::MemoryStore;
