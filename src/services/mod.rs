// Service exports
pub mod dispatch;
pub mod feed;
pub mod ledger_store;
pub mod store;

pub use dispatch::{ChannelSink, DispatchError, DispatchSink, LogSink, WebhookSink};
pub use feed::{FeedError, HelpRequestFeed, MemoryFeed, VolunteerFeed};
pub use ledger_store::{LedgerStore, LedgerStoreError, RedisLedgerStore};
pub use store::{StoreClient, StoreCollections};
