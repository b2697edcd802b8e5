mod feed_items;
mod local_store;
mod preferences;
mod schema;
mod types;

pub use local_store::LocalStore;
pub use schema::Database;
pub use types::{DatabaseError, FeedItem, PageCursor};
