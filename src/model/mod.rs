pub mod app;
pub mod app_id;
pub mod app_list;
pub mod cache;
pub mod category;
pub mod config;

pub use app::{App, AppChange, AppKind, AppState, Progress, Quirks};
pub use app_id::{AppId, AppIdError};
pub use app_list::{AppList, DedupOptions};
pub use cache::AppCache;
pub use category::{Category, CategoryList};
pub use config::HostConfig;
