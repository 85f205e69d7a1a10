pub mod assets;
pub mod git_url;
pub mod path;
pub mod progress;
pub mod response;
