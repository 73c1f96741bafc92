pub mod authors;
pub mod channels;
pub mod clips;
pub mod failed_thumbnails;
pub mod guilds;
pub mod messages;
pub mod scan_recovery;
pub mod scan_status;
pub mod settings;
pub mod thumbnails;

pub use authors::AuthorRepository;
pub use channels::ChannelRepository;
pub use clips::ClipRepository;
pub use failed_thumbnails::FailedThumbnailRepository;
pub use guilds::GuildRepository;
pub use messages::MessageRepository;
pub use scan_recovery::ScanRecoveryRepository;
pub use scan_status::ScanStatusRepository;
pub use settings::SettingsRepository;
pub use thumbnails::ThumbnailRepository;
