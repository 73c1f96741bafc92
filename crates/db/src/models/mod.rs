pub mod author;
pub mod channel;
pub mod clip;
pub mod guild;
pub mod message;
pub mod scan_status;
pub mod settings;
pub mod thumbnail;

pub use author::{Author, AuthorRecord};
pub use channel::{Channel, ChannelKind, ChannelSnapshot};
pub use clip::{Clip, ClipRecord, ThumbnailState};
pub use guild::{Guild, GuildSnapshot};
pub use message::{Message, MessageRecord};
pub use scan_status::{ChannelScanStatus, ScanState};
pub use settings::{ChannelSettingsRow, GuildSettingsRow};
pub use thumbnail::{FailedThumbnail, Thumbnail, ThumbnailSizeType};
