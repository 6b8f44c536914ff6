pub mod feed_file;

pub use feed_file::{FeedAuthenticator, FeedFileSource};
