pub mod images;
pub mod nav_counts;
pub mod pager;
pub mod sessions;
pub mod show_feed;

pub use images::{HttpImageFetcher, ImageFetcher, ImagePreloader, PreloaderConfig, Priority};
pub use nav_counts::{fetch_nav_counts, NavCounter, NavCounts};
pub use pager::{FeedPager, PagerSettings, PagerSnapshot, Phase};
pub use sessions::{FeedSessions, SessionRequest};
pub use show_feed::{FeedSettings, ShowFeed, ShowRequest, UserShowRequest};
