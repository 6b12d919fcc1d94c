pub mod classifier;
pub mod cli;
pub mod entities;
pub mod expander;
pub mod extractor;
pub mod generate_ts;
pub mod pipeline;
pub mod scraper;
pub mod server;
pub mod sitemap;
pub mod storage;
pub mod utils;

pub use classifier::*;
pub use cli::*;
pub use entities::*;
pub use expander::*;
pub use extractor::*;
pub use pipeline::*;
pub use scraper::*;
pub use sitemap::*;
pub use storage::*;
pub use utils::*;
