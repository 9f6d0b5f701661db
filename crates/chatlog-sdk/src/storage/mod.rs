/// 存储模块
///
/// - `kv`：基于 sled 的键值存储（同步断点持久化）
/// - `channel_store`：频道永久消息与 last_synced_log_id

pub mod kv;
pub mod channel_store;

pub use kv::KvStore;
pub use channel_store::ChannelStore;
