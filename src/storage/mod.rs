mod entries;
mod feed_states;
mod read_state;
mod types;

pub use entries::EntryStore;
pub use feed_states::FeedStateTracker;
pub use read_state::{MemoryReadState, ReadState, ReadStateError, SqliteReadState};
pub use types::{Entry, EntryStatus, Feed, FeedState, FeedStatus, Progress, RawEntry};
