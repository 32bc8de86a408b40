pub mod html;
pub mod loaders;
pub mod scraper;
pub mod splitter;

pub use self::loaders::{link_as_source, load_bytes, load_json, MetadataFn};
pub use self::scraper::{extract_article, ScrapedArticle, WebScraper};
pub use self::splitter::RecursiveTextSplitter;
