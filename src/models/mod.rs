pub mod filters;
pub mod page;
pub mod show;
pub mod streamer;
pub mod user_show;

pub use filters::{FilterState, SortBy, View, YearRange};
pub use page::{dedup_by_id, merge_unique, ShowPage};
pub use show::{Genre, Show, ShowRow, UserProfile};
pub use user_show::{ShowStatus, StatusFilter, UserShowRow, UserShowWrite};
